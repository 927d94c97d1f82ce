//! HTTP API of the agent (MIP-003).
//!
//! ## Endpoints
//!
//! - `POST /start_job` - Register a job and request payment for it
//! - `GET /status?job_id=...` - Get job status and result
//! - `GET /availability` - Whether the agent accepts jobs
//! - `GET /input_schema` - Input expected by `start_job`
//! - `GET /health` - Health check

mod error;
mod jobs;
mod routes;
pub mod types;

pub use error::ApiError;
pub use routes::{router, serve, AppState};
pub use types::*;
