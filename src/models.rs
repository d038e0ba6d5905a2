/// Core domain types: users, routine payloads, and outcome shapes.
/// JSON field names follow the browser-facing wire contract (camelCase).
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// A company employee on whose behalf sessions are opened.
/// Identity is owned by the user directory; sessions and engines only read it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub name: String,
    #[serde(rename = "companyID")]
    pub company_id: String,
    #[serde(rename = "phoneNumber")]
    pub phone_number: String,
    /// Epoch milliseconds of the last confirmed chat-network authentication.
    #[serde(rename = "lastAuth", skip_serializing_if = "Option::is_none")]
    pub last_auth: Option<i64>,
}

impl User {
    /// Phone number with separator dashes removed, as sent to the
    /// identity-verification fallback.
    pub fn phone_digits(&self) -> String {
        self.phone_number.replace('-', "")
    }
}

static CAR_ID: OnceLock<Regex> = OnceLock::new();

/// Car ids come in the format 398-35-902 or 39853902.
pub fn is_valid_car_id(value: &str) -> bool {
    let re = CAR_ID.get_or_init(|| {
        Regex::new(r"^\d{3}-?\d{2}-?\d{3}$").expect("car id pattern is valid")
    });
    re.is_match(value)
}

pub const CAR_ID_FORMAT_ERROR: &str =
    "carId must be in the format 398-35-902 or 39853902";

/// Payload for the park-car reporting routine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParkCarInfo {
    #[serde(rename = "carID")]
    pub car_id: String,
    pub km: u32,
    #[serde(rename = "startingPoint")]
    pub starting_point: String,
    pub destination: String,
}

/// Payload for the replacement-car handover routine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplaceClientCarInfo {
    #[serde(rename = "clientCarID")]
    pub client_car_id: String,
    #[serde(rename = "replacementCarID")]
    pub replacement_car_id: String,
    #[serde(rename = "nameOfClientCompany")]
    pub name_of_client_company: String,
    #[serde(rename = "replacementCarOrigin", skip_serializing_if = "Option::is_none")]
    pub replacement_car_origin: Option<String>,
}

/// A reporting request, discriminated by payload shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RoutineRequest {
    ParkCar(ParkCarInfo),
    ReplaceClientCar(ReplaceClientCarInfo),
}

impl RoutineRequest {
    /// Validate every car id field against the fixed pattern.
    pub fn validate(&self) -> Result<(), String> {
        let ids: Vec<&str> = match self {
            RoutineRequest::ParkCar(info) => vec![&info.car_id],
            RoutineRequest::ReplaceClientCar(info) => {
                vec![&info.client_car_id, &info.replacement_car_id]
            }
        };
        for id in ids {
            if !is_valid_car_id(id) {
                return Err(CAR_ID_FORMAT_ERROR.to_string());
            }
        }
        Ok(())
    }
}

/// Result of a login request.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    /// The stored identity is still valid; no pairing needed.
    Completed,
    /// The browser must render the pairing code and open the relay stream.
    PairingRequired { qr_code: String, pairing_token: String },
    Failed(String),
}

/// Result of a reporting routine.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutineOutcome {
    Completed,
    /// The user must pair first; the routine continues once they do.
    PairingRequired { qr_code: String },
    Failed(String),
}

/// Per-user result of a background login refresh pass.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RefreshReport {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user() -> User {
        User {
            user_id: "u-1".to_string(),
            name: "Dana".to_string(),
            company_id: "4821".to_string(),
            phone_number: "052-123-4567".to_string(),
            last_auth: None,
        }
    }

    #[test]
    fn test_car_id_formats() {
        assert!(is_valid_car_id("398-35-902"));
        assert!(is_valid_car_id("39835902"));
        assert!(is_valid_car_id("398-35902"));
        assert!(!is_valid_car_id("398-35-90"));
        assert!(!is_valid_car_id("9835902"));
        assert!(!is_valid_car_id("398-35-902x"));
        assert!(!is_valid_car_id("abc-de-fgh"));
    }

    #[test]
    fn test_phone_digits() {
        assert_eq!(test_user().phone_digits(), "0521234567");
    }

    #[test]
    fn test_routine_request_decodes_park_car() {
        let body = r#"{"carID":"398-35-902","km":12345,"startingPoint":"מוסך","destination":"חניון"}"#;
        let request: RoutineRequest =
            serde_json::from_str(body).expect("Failed to decode park-car body");
        match request {
            RoutineRequest::ParkCar(info) => {
                assert_eq!(info.car_id, "398-35-902");
                assert_eq!(info.km, 12345);
            }
            other => panic!("decoded wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_routine_request_decodes_replacement() {
        let body = r#"{"clientCarID":"336-42-708","replacementCarID":"802-23-402","nameOfClientCompany":"אלון"}"#;
        let request: RoutineRequest =
            serde_json::from_str(body).expect("Failed to decode replacement body");
        match request {
            RoutineRequest::ReplaceClientCar(info) => {
                assert_eq!(info.replacement_car_id, "802-23-402");
                assert!(info.replacement_car_origin.is_none());
            }
            other => panic!("decoded wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_bad_car_id() {
        let request = RoutineRequest::ParkCar(ParkCarInfo {
            car_id: "12-345".to_string(),
            km: 1,
            starting_point: "a".to_string(),
            destination: "b".to_string(),
        });
        let err = request.validate().expect_err("expected validation failure");
        assert_eq!(err, CAR_ID_FORMAT_ERROR);
    }

    #[test]
    fn test_user_wire_names() {
        let user = test_user();
        let json = serde_json::to_value(&user).expect("Failed to serialize user");
        assert_eq!(json["userID"], "u-1");
        assert_eq!(json["companyID"], "4821");
        assert_eq!(json["phoneNumber"], "052-123-4567");
        assert!(json.get("lastAuth").is_none());
    }
}
