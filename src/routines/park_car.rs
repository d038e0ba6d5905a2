/// Vehicle parking report dialogue
use crate::models::{ParkCarInfo, User};

use super::{Script, Step, EMPLOYEE_REPLY, GREETING_PROMPT};

pub(super) fn script(user: &User, info: &ParkCarInfo) -> Script {
    let steps = vec![
        Step::list_title(GREETING_PROMPT, EMPLOYEE_REPLY),
        Step::list_row("מחלקת שינוע", "מחלקת שינוע"),
        Step::list_row("לדיווח תנועה", "לדיווח תנועה"),
        Step::plain("נא להזין את שמך", user.name.clone()),
        Step::plain(
            &format!("{}, אנא הזן מספר עובד", user.name),
            user.company_id.clone(),
        ),
        Step::plain("אנא הזן מספר רכב", info.car_id.clone()),
        Step::plain("נא הזן ק\"מ עדכני ברכב", info.km.to_string()),
        Step::plain("נא להזין שעת נסיעה", "עכשיו"),
        Step::plain("אנא הזן מקור נסיעה", info.starting_point.clone()),
        Step::button("נא לבחור את סוג הדיווח:", "חנייה"),
        Step::plain("אנא הזן יעד נסיעה", info.destination.clone()),
    ];

    let summary = format!(
        "דיווח חנייה:\n{}\nמקור: {}\nיעד: {}\nק\"מ: {}\n{} {}",
        info.car_id, info.starting_point, info.destination, info.km, user.name, user.company_id
    );

    Script { steps, summary }
}
