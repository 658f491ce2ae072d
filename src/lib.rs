//! ferry library
//!
//! Flat-directory file server and concurrent chunked download client over a
//! line-based TCP protocol.

pub mod checksum;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod log;
pub mod logging;
pub mod orchestrator;
pub mod progress;
pub mod protocol;
pub mod protocol_core;
pub mod seed;
pub mod server;

pub use client::{connect, Connection};
pub use config::{ClientConfig, Endpoint, ServerConfig};
pub use error::{Result, TransferError};
pub use orchestrator::{Batch, BatchOptions, DownloadTask, Orchestrator, TaskEvent, TaskStatus};
pub use server::{serve, Server};
