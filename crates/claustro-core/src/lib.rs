//! Core types and trait definitions for the Claustro staff directory.
//!
//! This crate is deliberately free of backend dependencies. All other crates
//! depend on it; it depends on nothing proprietary.

pub mod activity;
pub mod auth;
pub mod document;
pub mod error;
pub mod identity;
pub mod outcome;
pub mod settings;
pub mod user;

pub use error::{Result, StoreError, WriteError};
