//! # guardian-api
//!
//! HTTP surface for Guardian Autotune governance.
//!
//! This crate is a thin composition layer with no domain policy. Every
//! rule lives in `guardian-autotune`; handlers translate requests, call
//! [`guardian_autotune::Governance`], and map errors onto status codes.
//!
//! ## Endpoints
//!
//! ```text
//! GET  /health                                   - Liveness
//! GET  /ready                                    - Event log caught up
//! GET  /metrics                                  - Prometheus text
//! GET  /guardian/autotune/config                 - Live settings
//! PUT  /guardian/autotune/config                 - Patch settings
//! POST /guardian/autotune/run                    - Manual proposal scan
//! GET  /guardian/autotune/consistency            - Live state vs. replay
//! GET  /guardian/autotune/lifecycle/latest       - Newest proposal
//! GET  /guardian/autotune/lifecycle/history      - Chain and metrics
//! GET  /guardian/autotune/evaluation/logs        - Scheduler runs
//! POST /guardian/autotune/lifecycle/{action}     - Governance action
//! POST /guardian/events                          - Observation ingest
//! POST /sys/cycle                                - Scan then scheduler tick
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use guardian_api::config::Config;
//! use guardian_api::server::Server;
//!
//! let server = Server::open(Config::from_env()?).await?;
//! server.serve().await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod openapi;
pub mod request_id;
pub mod routes;
pub mod server;
