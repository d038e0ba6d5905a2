/// Fleet Chat Agent Library
/// Automates vehicle movement reports over a chat transport on behalf of
/// fleet employees

pub mod config;
pub mod credentials;
pub mod db;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod models;
pub mod relay;
pub mod routines;
pub mod server;
pub mod service;
pub mod session;
pub mod tokens;
pub mod transport;

pub use error::{EngineError, RelayError, SessionError, StoreError, TransportError};
pub use models::{LoginOutcome, RoutineOutcome, RoutineRequest, User};
pub use service::{AgentService, ServiceSettings};
pub use session::{Session, SessionEvent};
