//! Actor model implementation for the party service.
//!
//! ```text
//! PartyRegistryActor (singleton per service instance)
//! └── supervises N PartyActors
//!     └── PartyActor (one per party)
//!         ├── owns the party state; its mailbox is the mutation queue
//!         └── supervises N PeerActors
//!             └── PeerActor (one per connected member)
//! ```
//!
//! # Key Design Decisions
//!
//! - **One writer per party**: every read-for-consistency or write of a party
//!   runs as a message in the party's mailbox, one at a time
//! - **No cross-party locks**: parties only share the registry, which never
//!   touches party state
//! - **CancellationToken propagation**: parent actors pass child tokens for graceful shutdown
//! - **Mailbox monitoring**: depth thresholds with metrics (Party: 64/256, Peer: 32/128)
//!
//! # Modules
//!
//! - [`registry`] - `PartyRegistryActor` singleton that supervises parties
//! - [`party`] - `PartyActor` per party, owns the party state
//! - [`peer`] - `PeerActor` per connected member
//! - [`messages`] - Message and event types
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod messages;
pub mod metrics;
pub mod party;
pub mod peer;
pub mod registry;

// Re-export primary types
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
pub use party::{PartyActor, PartyActorHandle};
pub use peer::{PeerActor, PeerActorHandle};
pub use registry::{PartyRegistryActor, PartyRegistryActorHandle};
