//! Restriction window implementation.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::frontend::{LocationId, RequesterId};

/// A time-boxed denial for one requester in one location.
///
/// Expiry is passive: the window simply stops reporting itself active once
/// `duration` has elapsed.
#[derive(Debug, Clone)]
pub struct RestrictionWindow {
    /// Distinguishes this window from a later one for the same requester
    pub id: Uuid,
    pub requester: RequesterId,
    pub location: LocationId,
    /// Wall-clock creation time, for logging
    pub created_at: DateTime<Utc>,
    started: Instant,
    duration: Duration,
}

impl RestrictionWindow {
    /// Open a new window starting now.
    pub fn new(requester: RequesterId, location: LocationId, duration: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            requester,
            location,
            created_at: Utc::now(),
            started: Instant::now(),
            duration,
        }
    }

    pub fn is_active(&self) -> bool {
        self.started.elapsed() < self.duration
    }

    /// Get the duration until the window expires.
    pub fn remaining(&self) -> Duration {
        self.duration.saturating_sub(self.started.elapsed())
    }
}
