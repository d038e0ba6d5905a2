/// Fleet Chat Agent - Main entry point
///
/// Handles:
/// - Command-line argument parsing
/// - Database initialization
/// - Service assembly and HTTP server startup
/// - Optional periodic login refresh task
use std::sync::Arc;
use std::time::Duration;

use actix_web::web;
use anyhow::Context;
use log::info;

use fleet_chat_agent::config::Config;
use fleet_chat_agent::db;
use fleet_chat_agent::server;
use fleet_chat_agent::service::{AgentService, ServiceSettings};
use fleet_chat_agent::transport::gateway::GatewayTransport;
use fleet_chat_agent::transport::jid_from_phone;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .format_timestamp_millis()
        .init();

    let config = Config::from_args();

    info!("Starting Fleet Chat Agent");
    info!("Gateway: {}", config.gateway_url);
    info!("Database: {:?}", config.database);
    if config.reduced_flow {
        info!("Reduced flow enabled: final routine step is skipped");
    }

    let db_path = config
        .database
        .to_str()
        .context("Database path is not valid UTF-8")?;
    let pool = db::create_pool(db_path).context("Failed to create database pool")?;

    info!("Database initialized");

    let transport = Arc::new(
        GatewayTransport::new(&config.gateway_url)
            .context("Failed to configure gateway transport")?,
    );
    let settings = ServiceSettings {
        operator_jid: jid_from_phone(&config.operator_phone),
        reduced_flow: config.reduced_flow,
    };
    let service = web::Data::new(AgentService::new(pool.clone(), transport, settings));

    if config.refresh_interval_hours > 0 {
        let refresher = service.clone();
        let period = Duration::from_secs(config.refresh_interval_hours * 60 * 60);
        info!(
            "Login refresh task enabled: every {}h",
            config.refresh_interval_hours
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately; consume it so the first
            // pass runs a full period after startup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match refresher.refresh_logins().await {
                    Ok(reports) => {
                        info!("Login refresh pass finished: {} user(s)", reports.len())
                    }
                    Err(err) => log::error!("Login refresh pass failed: {}", err),
                }
            }
        });
    }

    let bind_addr = config.bind_addr();
    info!("Starting HTTP server on {}", bind_addr);

    let http_server = server::create_http_server(service, web::Data::new(pool), &bind_addr)?;
    http_server.await?;
    Ok(())
}
