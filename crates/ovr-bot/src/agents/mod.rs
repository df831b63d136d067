//! The five cooperating agents.
//!
//! Oracle and Watcher produce (scores in, books in), Brain decides, Sniper
//! executes, Shield accounts. They share nothing but the typed channels,
//! the book cache and the risk state.

pub mod brain;
pub mod oracle;
pub mod shield;
pub mod sniper;
pub mod watcher;

pub use brain::{Brain, BrainParams};
pub use oracle::Oracle;
pub use shield::Shield;
pub use sniper::Sniper;
pub use watcher::{Watcher, WatcherHandle};
