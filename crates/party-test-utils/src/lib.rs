//! # Party Test Utilities
//!
//! Shared test utilities for the party service.
//!
//! - `mock_backend` - Scriptable invitation backend
//! - `recording_peer` - A connected member that records every pushed event
//! - `fixtures` - Party and member fixtures
//!
//! ## Usage
//!
//! ```rust,ignore
//! use party_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let party = TestParty::builder().public().game_finder("duo").spawn();
//!     let mut leader = RecordingPeer::connect(&party.handle, "leader").await.unwrap();
//!     let mut member = RecordingPeer::connect(&party.handle, "member").await.unwrap();
//!
//!     party.handle.update_settings(leader.session_id(), party.settings()).await.unwrap();
//!     let event = member.next_event().await;
//! }
//! ```

pub mod fixtures;
pub mod mock_backend;
pub mod recording_peer;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_backend::*;
pub use recording_peer::*;
