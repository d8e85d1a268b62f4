//! HTTP service for queued TSR analyses.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │      POST /api/analyze · GET /api/jobs[/{job_id}] · /health     │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────────────┐  ┌─────────────────┐  │
//! │  │  handlers   │  │        jobs         │  │     routes      │  │
//! │  │ (requests)  │  │ (queue, semaphore)  │  │ (router config) │  │
//! │  └─────────────┘  └─────────────────────┘  └─────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod jobs;
pub mod routes;

pub use handlers::{
    analyze_handler, health_handler, job_handler, jobs_handler, ApiError, AppState,
    ErrorResponse, HealthResponse, JobsResponse,
};
pub use jobs::{Job, JobQueue, JobStatus, DEFAULT_JOB_HISTORY};
pub use routes::{create_router, RouterConfig};
