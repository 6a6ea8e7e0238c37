//! API endpoint modules.

pub mod health;

pub use health::configure_health_routes;
