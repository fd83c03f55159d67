//! Core cooldown limiter implementation.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::window::RestrictionWindow;
use crate::frontend::{AuthLevel, LocationId, LocationPermissions, Requester, RequesterId};

/// Default cooldown applied after a rate-limited action.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Per-requester cooldown tracking.
///
/// This struct is thread-safe and can be shared across multiple tasks.
/// Each restricted requester holds at most one [`RestrictionWindow`];
/// applying again replaces it.
pub struct RateLimiter {
    /// Active windows indexed by requester
    windows: Arc<DashMap<RequesterId, RestrictionWindow>>,
    /// Installs and removes the actual denial in the front-end
    permissions: Arc<dyn LocationPermissions>,
    /// Locations where cooldowns apply
    restricted_locations: HashSet<LocationId>,
    admin_level: AuthLevel,
    cooldown: Duration,
}

impl RateLimiter {
    /// Create a new limiter with the default 30 second cooldown.
    pub fn new(
        permissions: Arc<dyn LocationPermissions>,
        restricted_locations: HashSet<LocationId>,
    ) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            permissions,
            restricted_locations,
            admin_level: AuthLevel::ADMIN,
            cooldown: DEFAULT_COOLDOWN,
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_admin_level(mut self, admin_level: AuthLevel) -> Self {
        self.admin_level = admin_level;
        self
    }

    pub fn admin_level(&self) -> AuthLevel {
        self.admin_level
    }

    /// Whether `location` is one of the designated interactive locations.
    pub fn is_restricted_location(&self, location: LocationId) -> bool {
        self.restricted_locations.contains(&location)
    }

    /// Whether the requester is currently inside a restriction window.
    pub fn is_restricted(&self, requester: &RequesterId) -> bool {
        self.remaining(requester).is_some()
    }

    /// Time left on the requester's window, if one is active.
    pub fn remaining(&self, requester: &RequesterId) -> Option<Duration> {
        self.windows
            .get(requester)
            .filter(|w| w.is_active())
            .map(|w| w.remaining())
    }

    /// Start a cooldown for `requester`.
    ///
    /// Admins and requests from outside the restricted locations are exempt.
    /// Returns `true` if a restriction was installed.
    pub async fn apply(&self, requester: &Requester) -> bool {
        if requester.level >= self.admin_level
            || !self.is_restricted_location(requester.location)
        {
            trace!(
                requester = %requester.id,
                location = %requester.location,
                "Cooldown not applicable"
            );
            return false;
        }

        let window = RestrictionWindow::new(requester.id, requester.location, self.cooldown);
        let window_id = window.id;
        debug!(
            requester = %requester.id,
            location = %requester.location,
            window = %window_id,
            created_at = %window.created_at,
            cooldown_secs = self.cooldown.as_secs(),
            "Starting cooldown"
        );
        self.windows.insert(requester.id, window);

        if let Err(e) = self.permissions.deny(requester.id, requester.location).await {
            warn!(requester = %requester.id, error = %e, "Failed to install cooldown denial");
        }

        let windows = self.windows.clone();
        let permissions = self.permissions.clone();
        let cooldown = self.cooldown;
        let (id, location) = (requester.id, requester.location);
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;

            // A newer window owns the denial now; its own task will revoke it.
            if windows.remove_if(&id, |_, w| w.id == window_id).is_none() {
                trace!(requester = %id, window = %window_id, "Cooldown superseded");
                return;
            }

            match permissions.revoke(id, location).await {
                Ok(()) => debug!(requester = %id, "Cooldown cleared"),
                Err(e) => warn!(requester = %id, error = %e, "Failed to revoke cooldown denial"),
            }
        });

        true
    }

    /// Get the number of tracked windows, expired or not.
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePermissions;

    const CHANNEL: LocationId = LocationId(100);
    const LOBBY: LocationId = LocationId(200);

    fn requester(id: u64, level: AuthLevel, location: LocationId) -> Requester {
        Requester {
            id: RequesterId(id),
            level,
            location,
        }
    }

    fn limiter(permissions: Arc<FakePermissions>) -> RateLimiter {
        RateLimiter::new(permissions, HashSet::from([CHANNEL]))
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_restricts_until_cooldown_elapses() {
        let permissions = Arc::new(FakePermissions::default());
        let limiter = limiter(permissions.clone());
        let user = requester(1, AuthLevel::DEFAULT, CHANNEL);

        assert!(!limiter.is_restricted(&user.id));
        assert!(limiter.apply(&user).await);
        assert!(limiter.is_restricted(&user.id));
        assert_eq!(permissions.denied(), vec![(user.id, CHANNEL)]);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(limiter.is_restricted(&user.id));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!limiter.is_restricted(&user.id));
        assert_eq!(permissions.revoked(), vec![(user.id, CHANNEL)]);
        assert_eq!(limiter.window_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admins_are_exempt() {
        let permissions = Arc::new(FakePermissions::default());
        let limiter = limiter(permissions.clone());

        for location in [CHANNEL, LOBBY] {
            let admin = requester(2, AuthLevel::ADMIN, location);
            assert!(!limiter.apply(&admin).await);
            assert!(!limiter.is_restricted(&admin.id));
        }
        assert!(permissions.denied().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrestricted_location_is_exempt() {
        let permissions = Arc::new(FakePermissions::default());
        let limiter = limiter(permissions.clone());
        let user = requester(3, AuthLevel::DEFAULT, LOBBY);

        assert!(!limiter.apply(&user).await);
        assert!(!limiter.is_restricted(&user.id));
        assert_eq!(limiter.window_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reapply_replaces_window() {
        let permissions = Arc::new(FakePermissions::default());
        let limiter = limiter(permissions.clone());
        let user = requester(4, AuthLevel::DEFAULT, CHANNEL);

        limiter.apply(&user).await;
        tokio::time::sleep(Duration::from_secs(20)).await;
        limiter.apply(&user).await;
        assert_eq!(limiter.window_count(), 1);

        // The first window's timer fires but must not lift the second one.
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(limiter.is_restricted(&user.id));
        assert!(permissions.revoked().is_empty());

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(!limiter.is_restricted(&user.id));
        assert_eq!(permissions.revoked().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revoke_failure_is_swallowed() {
        let permissions = Arc::new(FakePermissions::failing());
        let limiter = limiter(permissions.clone()).with_cooldown(Duration::from_secs(5));
        let user = requester(5, AuthLevel::DEFAULT, CHANNEL);

        assert!(limiter.apply(&user).await);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!limiter.is_restricted(&user.id));

        // Still usable afterwards.
        assert!(limiter.apply(&user).await);
        assert!(limiter.is_restricted(&user.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_admin_level() {
        let permissions = Arc::new(FakePermissions::default());
        let limiter = limiter(permissions).with_admin_level(AuthLevel(50));
        let moderator = requester(6, AuthLevel(50), CHANNEL);

        assert!(!limiter.apply(&moderator).await);
        assert_eq!(limiter.admin_level(), AuthLevel(50));
    }
}
