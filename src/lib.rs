//! igmon: profile ban/recovery watchdog.
//!
//! Polls a scraped profile endpoint for a bounded set of tracked handles,
//! classifies each response into terminal (banned / recovered) or transient,
//! and notifies a gateway exactly once when a terminal state is reached.

pub mod api;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod notification;
pub mod registry;
pub mod supervisor;
pub mod utils;
pub mod watch;

pub use error::{Error, Result};
