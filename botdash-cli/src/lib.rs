pub mod app;
pub mod render;
pub mod shutdown;
pub mod telemetry;

pub use app::run as run_app;
