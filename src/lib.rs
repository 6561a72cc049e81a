#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # JACS Services
//!
//! Asynchronous service orchestration engine for scientific image-processing pipelines.
//!
//! ## Overview
//!
//! Clients submit named services (copy a file, extract LSM metadata, merge an LSM pair) with a
//! flat list of command-line style arguments. The engine persists a record for every submission,
//! queues it, runs it through a four-stage processor pipeline under a per-location concurrency
//! limit and drives its record through a monotonic lifecycle:
//!
//! ```text
//! CREATED ─► QUEUED ─► RUNNING ─┬─► SUCCESS
//!                               ├─► ERROR
//!                               └─► CANCELED
//! ```
//!
//! Composite services fan out to child services and resume once every child is terminal.
//! Work done by external tools is expressed as a generated shell script executed locally or
//! through a cluster submission wrapper.
//!
//! ## Module Organization
//!
//! - [`engine`] - submissions, dispatch, completion waiting, cancellation, statistics
//! - [`processor`] - the service pipeline, external tool invocation and script generation
//! - [`services`] - the built-in services
//! - [`registry`] - service name to processor lookup
//! - [`computation`] - composable asynchronous results
//! - [`state_machine`] - lifecycle transitions
//! - [`persistence`] - in-memory and PostgreSQL record stores
//! - [`args`] - argument schemas and parsing
//! - [`config`] - layered configuration
//! - [`error`] - structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use jacs_services::{JacsServiceEngine, ServiceSubmission};
//!
//! # async fn example() -> jacs_services::Result<()> {
//! let engine = JacsServiceEngine::builder().build()?;
//! engine.start()?;
//!
//! let service = engine
//!     .submit_single_service(
//!         ServiceSubmission::new("fileCopy")
//!             .arg("-src", "/data/in/stack.lsm")
//!             .arg("-dst", "/data/out/stack.lsm"),
//!     )
//!     .await?;
//! let finished = engine.wait_for_completion(service.id).await?;
//! println!("{} finished {}", finished.name, finished.state);
//! # Ok(())
//! # }
//! ```

pub mod args;
pub mod computation;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod logging;
pub mod models;
pub mod persistence;
pub mod processor;
pub mod registry;
pub mod services;
pub mod state_machine;

pub use args::{ArgSpec, ArgumentError, ServiceArgs, ServiceMetaData};
pub use computation::{
    ComputationError, ComputationErrorKind, ComputationResult, ServiceComputation,
    ServiceComputationFactory,
};
pub use config::EngineConfig;
pub use engine::{EngineStats, JacsServiceEngine, JacsServiceEngineBuilder};
pub use error::{JacsError, Result};
pub use models::{JacsServiceData, ProcessingLocation, ServiceId, ServiceSubmission};
pub use persistence::{
    InMemoryServiceDataPersistence, JacsServiceDataPersistence, PersistenceError,
};
#[cfg(feature = "postgres")]
pub use persistence::PgServiceDataPersistence;
pub use processor::{
    ExeBasedProcessor, ExeBasedServiceProcessor, ServiceContext, ServiceProcessor,
};
pub use registry::{ServiceDescriptor, ServiceRegistry};
pub use state_machine::{JacsServiceState, ServiceEvent};
