//! Synchronization protocol.
//!
//! Server side: every committed mutation is pushed as an event tagged with the
//! party's `VersionNumber`; with acknowledgments enabled the party then waits
//! (bounded by the ack timeout) for every connected member to confirm receipt
//! before running the next unit of work.
//!
//! Client side: [`ClientPartyView`] applies pushed events and asks for a full
//! resync on any version gap.
//!
//! - [`ack`] - acknowledgment collection with timeout
//! - [`client_view`] - client-side version tracking

pub mod ack;
pub mod client_view;

pub use ack::{drain_stale_acks, wait_for_acks, Ack, AckOutcome};
pub use client_view::{ApplyResult, ClientPartyView};
