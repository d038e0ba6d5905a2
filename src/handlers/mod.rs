/// HTTP request handlers
pub mod rest;
pub mod sse;

pub use rest::{
    connections, create_user, health, login, park_car, refresh_logins, replace_client_car,
};
pub use sse::sse;
