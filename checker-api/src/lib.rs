// HTTP control plane: status, health, metrics and check CRUD routes.

pub mod config;
pub mod middleware;
pub mod routes;
pub mod server;

pub use config::ServerConfig;
pub use routes::{router, AppState};
