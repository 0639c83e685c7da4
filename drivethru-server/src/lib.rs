//! drivethru-server: HTTP surface and process wiring
//!
//! Builds the station ring and the vision pipeline from [`settings::AppConfig`]
//! and exposes both over axum.

pub mod http;
pub mod settings;
pub mod state;

pub use http::create_router;
pub use settings::AppConfig;
pub use state::AppState;
