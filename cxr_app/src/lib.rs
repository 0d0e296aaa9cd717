mod routes;

pub mod app;
pub mod config;
pub mod server;
pub mod telemetry;

pub use app::start_app;
