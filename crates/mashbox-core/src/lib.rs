//! Mashbox Core - Resumable round-robin episode playback
//!
//! This crate provides the pieces behind Mashbox: listing the episode
//! directory, choosing the next episode, persisting the playback pointer,
//! and supervising the external player.

pub mod catalog;
pub mod config;
pub mod sequencer;
pub mod state;
pub mod supervisor;

pub use catalog::{ Catalog, CatalogError };
pub use config::{ Config, ConfigError };
pub use sequencer::{ next_episode, SequenceError, Step, StepReason };
pub use state::{ PlaybackState, StateError, StateStore };
pub use supervisor::{ CycleOutcome, Phase, PlayerExit, Supervisor, SupervisorError };
