/// Configuration management for the fleet chat agent.
/// Handles command-line argument parsing with environment fallbacks.
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "Fleet Chat Agent")]
#[command(about = "Chat agent that files vehicle movement reports", long_about = None)]
pub struct Config {
    /// HTTP API port (default: 4000)
    #[arg(long, default_value = "4000")]
    pub port: u16,

    /// Host interface to bind (default: 127.0.0.1)
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// SQLite database file path (default: fleet-agent.db)
    #[arg(long, default_value = "fleet-agent.db")]
    pub database: PathBuf,

    /// Base URL of the chat protocol bridge
    #[arg(long, env = "GATEWAY_URL")]
    pub gateway_url: String,

    /// Phone number of the operator bot the agent converses with
    #[arg(long, env = "OPERATE_PHONE_NUMBER")]
    pub operator_phone: String,

    /// Skip the final non-deterministic step of every routine
    #[arg(long, env = "TEST_MODE")]
    pub reduced_flow: bool,

    /// Hours between background login refresh passes (0 disables)
    #[arg(long, default_value = "0")]
    pub refresh_interval_hours: u64,
}

impl Config {
    /// Parse command-line arguments into Config
    pub fn from_args() -> Self {
        Config::parse()
    }

    /// Socket address string the HTTP server binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
