//! Core domain + application logic for the RSS relay.
//!
//! This crate is framework-agnostic. Telegram lives behind the
//! [`messaging::port::MessagingPort`] trait, implemented in an adapter crate.

pub mod config;
pub mod dedup;
pub mod delivery;
pub mod domain;
pub mod errors;
pub mod feed_config;
pub mod fetcher;
pub mod formatting;
pub mod logging;
pub mod matching;
pub mod messaging;
pub mod scheduler;
pub mod watcher;

pub use errors::{Error, Result};
