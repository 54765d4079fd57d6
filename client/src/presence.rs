//! Avatar presence — which peers are in the mural and where they stand.
//!
//! DESIGN
//! ======
//! Remote positions arrive as periodic avatar updates; each one doubles as a
//! heartbeat. The tracker keeps the latest position per peer and evicts
//! anyone whose heartbeat goes quiet for longer than the timeout, so a
//! crashed client's avatar does not linger. Explicit disconnect notices
//! remove the avatar immediately.
//!
//! The tracker is pure state driven by injected `Instant`s; the periodic
//! eviction loop lives in [`spawn_sweep`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Vec3;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use protocol::avatar::AvatarData;

/// Heartbeats arrive at roughly 10 Hz; ten seconds of silence means the
/// peer is gone, not slow.
pub const DEFAULT_AVATAR_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RemoteAvatar {
    pub position: Vec3,
    pub username: String,
    last_seen: Instant,
}

pub struct PresenceTracker {
    client_id: String,
    username: String,
    mural_id: u32,
    timeout: Duration,
    avatars: HashMap<String, RemoteAvatar>,
}

impl PresenceTracker {
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        username: impl Into<String>,
        mural_id: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            username: username.into(),
            mural_id,
            timeout,
            avatars: HashMap::new(),
        }
    }

    #[must_use]
    pub fn mural_id(&self) -> u32 {
        self.mural_id
    }

    /// Own presence announcement for the current mural, ready to publish.
    #[must_use]
    pub fn heartbeat(&self, position: Vec3) -> AvatarData {
        self.own_avatar(position)
    }

    /// Record a peer update. Updates for other murals and echoes of this
    /// client's own heartbeat are ignored.
    pub fn on_update(&mut self, avatar: &AvatarData, now: Instant) {
        if avatar.mural_id != self.mural_id || avatar.client_id == self.client_id {
            return;
        }
        self.avatars.insert(
            avatar.client_id.clone(),
            RemoteAvatar {
                position: Vec3::new(avatar.x, avatar.y, avatar.z),
                username: avatar.username.clone(),
                last_seen: now,
            },
        );
    }

    /// Drop a peer on its explicit disconnect notice. Returns whether the
    /// peer was present.
    pub fn on_disconnect(&mut self, client_id: &str) -> bool {
        self.avatars.remove(client_id).is_some()
    }

    /// Evict every peer whose last heartbeat is older than the timeout.
    /// Returns the evicted client ids; an already-evicted peer is never
    /// reported twice.
    pub fn sweep(&mut self, now: Instant) -> Vec<String> {
        let timeout = self.timeout;
        let expired: Vec<String> = self
            .avatars
            .iter()
            .filter(|(_, avatar)| now.duration_since(avatar.last_seen) >= timeout)
            .map(|(client_id, _)| client_id.clone())
            .collect();
        for client_id in &expired {
            self.avatars.remove(client_id);
        }
        expired
    }

    /// Move to another mural: forgets all tracked peers and returns the
    /// disconnect notice to publish on the old mural's topic. `None` when
    /// already there.
    pub fn switch_mural(&mut self, mural_id: u32) -> Option<AvatarData> {
        if mural_id == self.mural_id {
            return None;
        }
        let notice = self.own_avatar(Vec3::ZERO);
        self.mural_id = mural_id;
        self.avatars.clear();
        Some(notice)
    }

    /// Forget every tracked peer without leaving the mural.
    pub fn clear(&mut self) {
        self.avatars.clear();
    }

    #[must_use]
    pub fn get(&self, client_id: &str) -> Option<&RemoteAvatar> {
        self.avatars.get(client_id)
    }

    #[must_use]
    pub fn avatars(&self) -> &HashMap<String, RemoteAvatar> {
        &self.avatars
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.avatars.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.avatars.is_empty()
    }

    fn own_avatar(&self, position: Vec3) -> AvatarData {
        AvatarData {
            client_id: self.client_id.clone(),
            x: position.x,
            y: position.y,
            z: position.z,
            username: self.username.clone(),
            mural_id: self.mural_id,
        }
    }
}

/// Periodic eviction loop. Skips missed ticks rather than bursting after a
/// stall, so a resumed process does not mass-evict on stale timing.
pub fn spawn_sweep(
    tracker: Arc<Mutex<PresenceTracker>>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let evicted = tracker.lock().await.sweep(Instant::now());
            for client_id in evicted {
                debug!(client_id, "presence: peer heartbeat timed out");
            }
        }
    })
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
