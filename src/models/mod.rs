//! Core data models for the paste store.
//!
//! Pastes carry no metadata beyond their id, size and modification time, so
//! the only standalone model is the identifier itself.

pub mod paste_id;

pub use paste_id::{ID_LEN, ParseIdError, PasteId, SHARD_LEN};
