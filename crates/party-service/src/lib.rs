//! Party Service Library
//!
//! Server-authoritative coordination of parties: small groups of players
//! that gather before and during matchmaking.
//!
//! - Membership with a connecting gate, reservations and leader succession
//! - Leader-only settings, promotion and kicks
//! - Per-member ready status, fenced on the settings version
//! - Version-tagged push updates with optional client acknowledgment
//! - Invitations through pluggable platform backends
//!
//! # Architecture
//!
//! ```text
//! PartyRegistryActor (singleton)
//! └── PartyActor (one per party)
//!     ├── PartyState (members, settings, versions, invitations)
//!     ├── InvitationManager (backend selection)
//!     └── PeerActor (one per connected member)
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Registry, party and peer actors
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with client error codes
//! - [`invitations`] - Invitation backends and the pending-invitation map
//! - [`observability`] - Health endpoints and Prometheus metrics
//! - [`state`] - The party state store
//! - [`sync`] - Acknowledgments and client-side version tracking

pub mod actors;
pub mod config;
pub mod errors;
pub mod invitations;
pub mod observability;
pub mod state;
pub mod sync;
