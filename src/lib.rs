//! crmsync - Reconcile local directory subjects with a remote CRM
//!
//! This crate provides the sync engine and the `crmsync` CLI.
//!
//! # Architecture
//!
//! - [`engine`] - Reconciliation engine (base, full, on-change, login sync)
//! - [`mapping`] - Field mapping model and value normalization
//! - [`remote`] - Remote CRM gateway and HTTP transport
//! - [`directory`] - Local subjects and the directory trait
//! - [`storage`] - SQLite directory and lock cache
//! - [`cache`] - Shared cache trait and TTL locks
//! - [`context`] / [`log`] - Per-run sync context and structured events
//! - [`jobs`] - Exclusive bulk sync job
//! - [`config`] - Settings and path resolution
//! - [`cli`] - Command-line interface using clap
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod directory;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod log;
pub mod mapping;
pub mod remote;
pub mod storage;

pub use engine::{Direction, Engine, SkipReason, SyncOutcome};
pub use error::{Error, Result};
