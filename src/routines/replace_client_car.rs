/// Replacement-car handover dialogue
use crate::models::{ReplaceClientCarInfo, User};

use super::{Script, Step, EMPLOYEE_REPLY, GREETING_PROMPT};

/// Origin sent when the request does not name one.
const DEFAULT_ORIGIN: &str = "חנייה";

pub(super) fn script(user: &User, info: &ReplaceClientCarInfo) -> Script {
    let origin = info
        .replacement_car_origin
        .clone()
        .unwrap_or_else(|| DEFAULT_ORIGIN.to_string());

    let steps = vec![
        Step::list_title(GREETING_PROMPT, EMPLOYEE_REPLY),
        Step::list_row("מסירת / החזרת חלופי", "מסירת / החזרת חלופי"),
        Step::button("נא לבחור את סוג הדיווח:", "מסירת רכב חלופי"),
        Step::plain("נא להזין את שמך", user.name.clone()),
        Step::plain(
            &format!("{}, אנא הזן מספר עובד", user.name),
            user.company_id.clone(),
        ),
        Step::plain("אנא הזן מספר רכב חלופי", info.replacement_car_id.clone()),
        Step::plain("אנא הזן מקור נסיעה", origin),
        Step::plain("אנא הזן מספר רכב מקורי", info.client_car_id.clone()),
        Step::plain("אנא הזן שם חברה (לקוח)", info.name_of_client_company.clone()),
    ];

    let summary = format!(
        "אני צריך בבקשה לפתוח רכב חליפי:\nמקורי: {}\nחליפי: {}\n{} {}",
        info.client_car_id, info.replacement_car_id, user.name, user.company_id
    );

    Script { steps, summary }
}
