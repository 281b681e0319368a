pub mod auth;
pub mod error;
pub mod history;
pub mod middleware;
pub mod uploads;
pub mod users;

pub use auth::{AppState, AppStateInner};
