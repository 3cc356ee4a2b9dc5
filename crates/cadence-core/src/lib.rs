//! Cadence CI Core
//!
//! Core domain types, traits, and error handling for the Cadence CI
//! scheduling core. This crate has minimal dependencies and defines the
//! shared vocabulary used by the resolver, the timeline and their adapters.

pub mod error;
pub mod filter;
pub mod ids;
pub mod material;
pub mod pipeline;
pub mod ports;
pub mod revision;
pub mod timeline;

pub use error::{Error, Result};
pub use ids::*;
