//! Security middleware for the CMMC assessment platform.
//!
//! Request-handling code calls into a shared [`SecurityMiddleware`] before
//! forwarding form submissions, uploads and API calls to the backend.

pub mod api;
pub mod config;
pub mod core;
pub mod models;
pub mod utils;

pub use crate::core::SecurityMiddleware;
