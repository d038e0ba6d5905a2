/// HTTP server factory and route table.
/// Provides reusable functions to create and configure the HTTP server
/// for use in both the main binary and tests.

use actix_web::{middleware, web, App, HttpServer};

use crate::db::DbPool;
use crate::handlers::{
    connections, create_user, health, login, park_car, refresh_logins, replace_client_car, sse,
};
use crate::service::AgentService;

/// Register every route the agent exposes.
///
/// Shared by the production factory, the ephemeral-port test factory and
/// `actix_web::test::init_service` based tests so the route table only
/// exists in one place.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/api/users", web::post().to(create_user))
        .route("/api/login", web::post().to(login))
        .route("/api/park-car", web::post().to(park_car))
        .route("/api/replace-client-car", web::post().to(replace_client_car))
        .route("/api/connections", web::get().to(connections))
        .route("/api/refresh-logins", web::post().to(refresh_logins))
        .route("/sse", web::get().to(sse));
}

/// Create a configured HTTP server
///
/// Takes the agent service, a database pool and a bind address, then returns
/// a fully configured server ready to be awaited.
///
/// # Arguments
/// * `service` - Agent service wrapped in web::Data
/// * `pool` - Database connection pool wrapped in web::Data
/// * `bind_addr` - Address to bind the server to (e.g., "127.0.0.1:4000")
pub fn create_http_server(
    service: web::Data<AgentService>,
    pool: web::Data<DbPool>,
    bind_addr: &str,
) -> std::io::Result<actix_web::dev::Server> {
    let service_clone = service.clone();
    let pool_clone = pool.clone();

    let server = HttpServer::new(move || {
        App::new()
            .app_data(service_clone.clone())
            .app_data(pool_clone.clone())
            .wrap(middleware::Logger::default())
            .configure(configure_routes)
    })
    .bind(bind_addr)?
    .run();

    Ok(server)
}

/// Create a test HTTP server bound to a random available port.
///
/// # Returns
/// A tuple of (server, bind_address) where bind_address can be used to make
/// requests against the running server.
#[cfg(any(test, feature = "test_utils"))]
pub fn create_test_http_server(
    service: web::Data<AgentService>,
    pool: web::Data<DbPool>,
) -> std::io::Result<(actix_web::dev::Server, String)> {
    let service_clone = service.clone();
    let pool_clone = pool.clone();

    let server = HttpServer::new(move || {
        App::new()
            .app_data(service_clone.clone())
            .app_data(pool_clone.clone())
            .configure(configure_routes)
    })
    .workers(1)
    .bind("127.0.0.1:0")?;

    let addrs = server.addrs();
    let addr_str = addrs
        .first()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "No bind address found"))?
        .to_string();

    let server = server.run();

    Ok((server, addr_str))
}
