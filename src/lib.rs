//! Observe Provider Core
//!
//! This crate holds the logic behind the Observe infrastructure provider that
//! does not depend on any particular IaC host: object ids, the OPAL query
//! compiler, result decoding, monitor rule mapping and a client that drives
//! the Observe API through a pluggable [`Backend`].
//!
//! # Overview
//!
//! - **Object ids**: [`Oid`] parses and formats `o:<type>:<id>[:<version>]`
//! - **Pipelines**: [`Pipeline`] normalizes OPAL pipeline text
//! - **Queries**: [`Query`] compiles named inputs and stages into the
//!   backend's multi-stage form, and reconstructs them from it
//! - **Results**: [`decode_task_results`] turns columnar task results into
//!   rows of typed cells
//! - **Monitors**: [`MonitorConfig`] maps count and change rules to and from
//!   the backend
//! - **Client**: [`Client`] serializes mutations, stamps ownership metadata
//!   and waits on asynchronous backend work
//! - **Validation**: attribute validators that report [`Diagnostic`]s
//! - **Logging**: Integration with `tracing` for structured logging
//!
//! # Quick Start
//!
//! ```ignore
//! use observe_provider::{Client, ClientConfig, Input, Query, Stage};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     observe_provider::init_logging();
//!
//!     let config = ClientConfig::from_value(&serde_json::json!({
//!         "customer": "101",
//!         "token": "...",
//!     }))?;
//!     let client = Client::new(MyHttpBackend::new(&config), config);
//!
//!     let query = Query::new()
//!         .with_input("obs", Input::dataset("o:dataset:41000123"))
//!         .with_stage(Stage::new("filter severity = \"error\""));
//!     let dataset = client
//!         .save_dataset("41000001", Default::default(), &query)
//!         .await?;
//!     tracing::info!(id = %dataset.id, "Saved dataset");
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! Flags are set through the `flags` map of the configuration. Setting
//! [`config::FLAG_CONCURRENT_MUTATIONS`] lets mutations run concurrently
//! instead of one at a time.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod oid;
pub mod pipeline;
pub mod query;
pub mod result;
pub mod testing;
pub mod validation;

#[allow(missing_docs)]
pub mod wire;

// Re-export main types at crate root
pub use client::{Backend, Client, MutationLock};
pub use config::ClientConfig;
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use monitor::{Monitor, MonitorConfig};
pub use oid::{ObjectType, Oid};
pub use pipeline::Pipeline;
pub use query::{Input, Query, QueryConfig, Stage};
pub use result::{decode_task_results, DecodeTable, QueryResult};
pub use validation::Diagnostic;

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tonic;
pub use tracing;
