//! Common types shared across the party service crates.

#![warn(clippy::pedantic)]

/// Module for common data types
pub mod types;

pub use types::{PartyId, SessionId, UserId};
