//! Per-subscriber liveness decisions.
//!
//! A subscriber that stays silent longer than its channel's ping interval gets
//! its next message flagged as a probe. If the probe is still unanswered
//! [`PROBE_GRACE_SECS`] later, the next send reports a timeout and the
//! subscriber is evicted. A subscriber that has never answered is overdue
//! immediately.

use chrono::{DateTime, Duration, Utc};

use crate::error::{BroadcastError, Result};
use crate::types::{SendStatus, SessionToken, Subscriber};

/// How long a probe may stay unanswered, independent of the ping interval.
pub const PROBE_GRACE_SECS: i64 = 10;

pub fn probe_grace() -> Duration {
    Duration::seconds(PROBE_GRACE_SECS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPlan {
    Evict,
    /// `ping_request` sends also move `last_ping` to the send time.
    Deliver { ping_request: bool },
}

impl SendPlan {
    pub fn status(&self) -> SendStatus {
        match self {
            SendPlan::Evict => SendStatus::Timeout,
            SendPlan::Deliver { ping_request: true } => SendStatus::Update,
            SendPlan::Deliver { ping_request: false } => SendStatus::Ok,
        }
    }
}

impl Subscriber {
    /// Silent for longer than `ping_interval`, or never answered at all.
    pub fn is_overdue(&self, ping_interval: Duration, now: DateTime<Utc>) -> bool {
        match self.last_pong {
            Some(last_pong) => last_pong + ping_interval < now,
            None => true,
        }
    }

    pub fn probe_expired(&self, now: DateTime<Utc>) -> bool {
        self.last_ping
            .is_some_and(|last_ping| last_ping < now - probe_grace())
    }

    /// Decide how the next message to this subscriber is handled. A probe
    /// send records its time in `last_ping`, also when an earlier probe is
    /// still within its grace window.
    pub fn plan_send(&mut self, ping_interval: Duration, now: DateTime<Utc>) -> Result<SendPlan> {
        if self.session.is_none() {
            return Err(BroadcastError::MissingToken(self.id.clone()));
        }

        if !self.is_overdue(ping_interval, now) {
            return Ok(SendPlan::Deliver { ping_request: false });
        }

        if self.probe_expired(now) {
            return Ok(SendPlan::Evict);
        }

        self.last_ping = Some(now);
        Ok(SendPlan::Deliver { ping_request: true })
    }

    pub fn token_expired(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.session
            .as_ref()
            .map_or(true, |session| session.is_expired(max_age, now))
    }

    pub fn issue_token(&mut self, token: String, now: DateTime<Utc>) {
        self.session = Some(SessionToken {
            token,
            issued_at: now,
        });
    }

    pub fn record_pong(&mut self, now: DateTime<Utc>) {
        self.last_pong = Some(now);
        self.last_ping = None;
    }
}
