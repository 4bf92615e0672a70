mod error;
mod routes;

pub mod app;
pub mod server;
pub mod telemetry;

pub use app::start_app;
pub use error::ApiError;
pub use server::{build_router, SharedState};
