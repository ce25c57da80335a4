//! Event types produced for UI and observability collaborators.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so hosts can
//! forward them over whatever event bus they use.

pub mod events;
