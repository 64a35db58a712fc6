//! gamegrab core library
//!
//! Finds game releases across several catalog sites, resolves a chosen
//! release to a magnet locator, and drives the peer-to-peer transfer through
//! an external client while keeping a durable record of its progress.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`fetch`] - Resilient HTML fetching (manual redirects, bounded retries)
//! - [`source`] - Per-site search and locator extraction
//! - [`discovery`] - Concurrent fan-out across sources
//! - [`transfer`] - Transfer engine, store, client seam and event publisher
//! - [`db`] - Database connection and schema management

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod db;
pub mod discovery;
pub mod fetch;
pub mod http_client;
pub mod source;
pub mod transfer;
mod user_agent;

// Re-export commonly used types
pub use db::{Database, DbError};
pub use discovery::{Discovery, MAX_RESULTS_PER_SOURCE};
pub use fetch::{DEFAULT_RETRIES, FetchError, Fetcher};
pub use source::{
    Candidate, DodiAdapter, FitGirlAdapter, LeetxAdapter, SIZE_UNKNOWN, Source, SourceAdapter,
    default_adapters,
};
pub use transfer::{
    Aria2Connector, ClientConnector, ClientError, ClientEvent, EngineOptions, ProgressPublisher,
    StoreError, Transfer, TransferClient, TransferEngine, TransferError, TransferEvent,
    TransferHandle, TransferSample, TransferStatus, TransferStore,
};
pub use user_agent::BROWSER_USER_AGENT;
