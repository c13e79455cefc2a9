//! Stockbook Core - Shared types library.
//!
//! This crate provides common types used across all Stockbook components:
//! - `ledger` - The stock and allocation ledger library
//! - `cli` - Command-line tools for migrations and register management
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access. This
//! keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe entity IDs

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
