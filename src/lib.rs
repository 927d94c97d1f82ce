//! # Masumi Agent
//!
//! A Cardano agent service speaking the Masumi Agentic Service API (MIP-003).
//!
//! Purchasers start a job, pay for it through the Masumi payment service,
//! and poll for the result once the agent has run.
//!
//! ## Job Flow
//!
//! ```text
//!  POST /start_job ──► payment request ──► job (awaiting_payment)
//!                                                  │
//!                     PaymentMonitor polls ◄───────┘
//!                                │ funds locked
//!                                ▼
//!                     JobRunner ──► Agent (wallet report via Kupo)
//!                                │
//!                                ▼
//!                     submit result hash ──► job (completed)
//! ```
//!
//! ## Modules
//! - `api`: HTTP endpoints and server startup
//! - `jobs`: Job records and their stores (memory, SQLite)
//! - `payment`: Masumi payment service client
//! - `monitor`: Background payment polling
//! - `runner`: Job execution and result submission
//! - `agent`: The work a paid job performs
//! - `kupo`: Kupo chain-index client

pub mod agent;
pub mod api;
pub mod config;
pub mod jobs;
pub mod kupo;
pub mod monitor;
pub mod payment;
pub mod pricing;
pub mod runner;
pub mod util;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use jobs::{Job, JobStatus, JobStore, PaymentStatus};
