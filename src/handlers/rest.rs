/// REST handlers for the agent's HTTP surface
///
/// Thin layer over AgentService and the user directory: decode, look the
/// user up, delegate, map the outcome onto a status code.
use actix_web::{web, HttpResponse, Result as ActixResult};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::db::{Database, DbPool, LOGIN_FRESHNESS_MS};
use crate::models::{LoginOutcome, ParkCarInfo, ReplaceClientCarInfo, RoutineOutcome, RoutineRequest, User};
use crate::service::AgentService;

/// GET /health
pub async fn health() -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().body("OK"))
}

/// POST /api/users
pub async fn create_user(
    pool: web::Data<DbPool>,
    body: web::Json<User>,
) -> ActixResult<HttpResponse> {
    let user = body.into_inner();
    match Database::insert_user(&pool, &user).await {
        Ok(()) => {
            log::info!("created user {}", user.user_id);
            Ok(HttpResponse::Created().json(user))
        }
        Err(e) if e.to_string().contains("UNIQUE constraint failed") => {
            Ok(HttpResponse::Conflict().json(json!({
                "error": "User already exists"
            })))
        }
        Err(e) => {
            log::error!("failed to create user: {}", e);
            Ok(HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            })))
        }
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(rename = "userID")]
    pub user_id: String,
}

#[derive(Deserialize)]
pub struct LoginQuery {
    /// Present (any value) to trust the stored identity without pairing.
    pub skipqr: Option<String>,
}

/// POST /api/login
pub async fn login(
    service: web::Data<AgentService>,
    pool: web::Data<DbPool>,
    query: web::Query<LoginQuery>,
    body: web::Json<LoginRequest>,
) -> ActixResult<HttpResponse> {
    let user = match Database::get_user(&pool, &body.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return Ok(HttpResponse::Unauthorized().json(json!({
                "success": false,
                "error": "Invalid userID"
            })));
        }
        Err(e) => {
            log::error!("failed to load user {}: {}", body.user_id, e);
            return Ok(HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            })));
        }
    };

    // A recent enough login can be reused without touching the network.
    let fresh = user
        .last_auth
        .is_some_and(|last| Utc::now().timestamp_millis() - last < LOGIN_FRESHNESS_MS);
    if query.skipqr.is_some() || fresh {
        return Ok(HttpResponse::Ok().json(json!({ "success": true })));
    }

    match service.start_login(&user).await {
        LoginOutcome::Completed => Ok(HttpResponse::Ok().json(json!({ "success": true }))),
        LoginOutcome::PairingRequired {
            qr_code,
            pairing_token,
        } => Ok(HttpResponse::Ok().json(json!({
            "qrCode": qr_code,
            "pairingToken": pairing_token
        }))),
        LoginOutcome::Failed(error) => Ok(HttpResponse::Unauthorized().json(json!({
            "success": false,
            "error": error
        }))),
    }
}

#[derive(Deserialize)]
pub struct ParkCarRequest {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(flatten)]
    pub info: ParkCarInfo,
}

/// POST /api/park-car
pub async fn park_car(
    service: web::Data<AgentService>,
    pool: web::Data<DbPool>,
    body: web::Json<ParkCarRequest>,
) -> ActixResult<HttpResponse> {
    let request = body.into_inner();
    run_routine(
        service,
        pool,
        &request.user_id,
        RoutineRequest::ParkCar(request.info),
    )
    .await
}

#[derive(Deserialize)]
pub struct ReplaceClientCarRequest {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(flatten)]
    pub info: ReplaceClientCarInfo,
}

/// POST /api/replace-client-car
pub async fn replace_client_car(
    service: web::Data<AgentService>,
    pool: web::Data<DbPool>,
    body: web::Json<ReplaceClientCarRequest>,
) -> ActixResult<HttpResponse> {
    let request = body.into_inner();
    run_routine(
        service,
        pool,
        &request.user_id,
        RoutineRequest::ReplaceClientCar(request.info),
    )
    .await
}

async fn run_routine(
    service: web::Data<AgentService>,
    pool: web::Data<DbPool>,
    user_id: &str,
    request: RoutineRequest,
) -> ActixResult<HttpResponse> {
    let user = match Database::get_user(&pool, user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return Ok(HttpResponse::BadRequest().json(json!({
                "success": false,
                "error": "Invalid userID"
            })));
        }
        Err(e) => {
            log::error!("failed to load user {}: {}", user_id, e);
            return Ok(HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            })));
        }
    };

    match service.run_routine(&user, &request).await {
        RoutineOutcome::Completed => Ok(HttpResponse::Ok().json(json!({ "success": true }))),
        RoutineOutcome::PairingRequired { qr_code } => {
            Ok(HttpResponse::Ok().json(json!({ "qrCode": qr_code })))
        }
        RoutineOutcome::Failed(error) => Ok(HttpResponse::BadRequest().json(json!({
            "success": false,
            "error": error
        }))),
    }
}

/// GET /api/connections
pub async fn connections(service: web::Data<AgentService>) -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(service.relay().active_connections()))
}

/// POST /api/refresh-logins
pub async fn refresh_logins(service: web::Data<AgentService>) -> ActixResult<HttpResponse> {
    match service.refresh_logins().await {
        Ok(reports) => Ok(HttpResponse::Ok().json(reports)),
        Err(e) => {
            log::error!("refresh pass failed: {}", e);
            Ok(HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            })))
        }
    }
}
