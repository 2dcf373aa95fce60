//! Gateway server implementation

pub mod auth;
pub mod paths;
mod server;

pub use auth::{AuthGate, CurrentSession, GateSettings, RequiredSession, auth_gate};
pub use paths::PathMatcher;
pub use server::Gateway;
