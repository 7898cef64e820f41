#![forbid(unsafe_code)]

//! A file watching service.
//!
//! The daemon maintains an in-memory model of watched directory trees and
//! answers queries about files that changed since a client-supplied clock
//! position. Clients speak newline-delimited JSON over a Unix socket;
//! subscriptions and user-defined triggers react to settle notifications.

pub mod cli;
pub mod clock;
pub mod config;
pub mod daemon;
mod error;
mod paths;
pub mod query;
pub mod telemetry;
pub mod view;
pub mod watcher;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

pub use clock::{ClockPosition, ClockSpec};
