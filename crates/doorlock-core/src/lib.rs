//! Door lock command and attribute delivery
//!
//! This crate finds a working channel to a lock through an unreliable host
//! transport, retries with backoff, learns what worked, and keeps a
//! canonical state snapshot fed by polling and pushed reports.

pub mod cache;
pub mod config;
pub mod device;
pub mod error;
pub mod executor;
pub mod listener;
pub mod manager;
pub mod persistence;
pub mod polling;
pub mod reader;
pub mod resolver;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{ChannelCache, LearnedChannel, ResolvedChannel};
pub use config::{PollIntervals, RetryPolicy};
pub use device::{DeviceHints, LockDevice};
pub use error::{AttemptError, AttemptFailure, LockError};
pub use executor::{CommandExecutor, CommandRequest, Delivery, WriteRequest};
pub use listener::{AttributeReport, EventListener};
pub use manager::{
    ChannelReport, CommandOutcome, LockManager, ManagerConfig, PurposeChannels, RefreshResult,
};
pub use polling::{PollGroup, PollingScheduler};
pub use reader::{AttributeReader, AttributeReading, AttributeRequest};
pub use resolver::TransportResolver;
pub use store::{DeviceStateStore, StateEntry, StateEvent};
pub use transport::{TransportClient, TransportError};
