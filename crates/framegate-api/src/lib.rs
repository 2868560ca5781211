//! Framegate API crate - axum HTTP ingress for the intake pipeline.
//!
//! Exposes frame submission, on-demand batch runs, record lookups,
//! stats and maintenance endpoints.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
