//! kosync-opds: KOReader progress sync and OPDS catalog server.
//!
//! This crate provides a server that KOReader (and any OPDS reader) can
//! use to keep reading positions in step across devices and to browse
//! and download a directory of EPUB files.
//!
//! # Features
//!
//! - KOReader sync protocol (`/users/*`, `/syncs/progress`)
//! - Optional auto-registration of unknown sync users
//! - OPDS catalog generated fresh from the books directory on each request
//! - EPUB metadata extraction with per-file failure isolation
//! - Argon2 credential storage compatible with KOReader's MD5 keys

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Authentication and user management.
pub mod auth;
/// Configuration and CLI.
pub mod config;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// Book format handlers.
pub mod formats;
/// Catalog model and scanning.
pub mod library;
/// OPDS feed generation.
pub mod opds;
/// Reading progress store.
pub mod progress;
/// HTTP server.
pub mod server;


pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use server::AppState;
