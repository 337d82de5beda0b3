//! Observability for the party service.
//!
//! Metric labels are bounded:
//! - `actor_type`: registry, party, peer
//! - `operation`: bounded by `PartyMessage` variants
//! - `status`: success, error kind (bounded by `PartyError`)
//! - `backend`: bounded by configured invitation backends
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `party_parties_active` | Gauge | none | Live party actors |
//! | `party_members_active` | Gauge | none | Members and reservations across parties |
//! | `party_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure indicator |
//! | `party_mutations_total` | Counter | `operation`, `status` | Mutation outcomes |
//! | `party_mutation_duration_seconds` | Histogram | `operation` | Time spent in the party queue |
//! | `party_ack_timeouts_total` | Counter | none | Broadcasts that hit the ack timeout |
//! | `party_invitations_total` | Counter | `backend`, `outcome` | Invitation outcomes |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
