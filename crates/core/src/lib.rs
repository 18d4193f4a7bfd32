//! Server-managed broadcast channels.
//!
//! A [`types::Channel`] is a named group of [`types::Subscriber`]s, each holding
//! a session token for the push transport. Messages are fanned out by a queued
//! job; subscribers that stop answering liveness probes are evicted.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod liveness;
pub mod store;
pub mod subscriber;
pub mod token;
pub mod transport;
pub mod types;

#[cfg(test)]
mod broadcast_tests;

pub use broadcast::{Broadcaster, FanoutReport, TimeoutHook, TimeoutHooks, FANOUT_QUEUE};
pub use error::{BroadcastError, Result};
pub use store::{MemoryStore, SubscriberStore};
pub use token::{SessionTokenProvider, SignedTokenProvider};
pub use transport::{HttpPushTransport, Transport};
