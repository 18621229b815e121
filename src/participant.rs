//! Per-peer state: address, heartbeat time, flags, and a fixed-window
//! rate limiter. Mutated only by the event loop; never shared.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use uuid::Uuid;

/// Packets allowed per rate-limit window.
pub const RATE_LIMIT_BURST: u32 = 60;
/// Width of the fixed rate-limit window.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct Participant {
    pub id: Uuid,
    pub remote_address: SocketAddr,
    pub last_heartbeat: Instant,
    pub flags: u8,
    window_start: Instant,
    window_count: u32,
}

impl Participant {
    pub fn new(id: Uuid, remote_address: SocketAddr, now: Instant) -> Self {
        Self {
            id,
            remote_address,
            last_heartbeat: now,
            flags: 0,
            window_start: now,
            window_count: 0,
        }
    }

    pub fn is_alive(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_heartbeat) < timeout
    }

    pub fn update_heartbeat(&mut self, now: Instant) {
        self.last_heartbeat = now;
    }

    /// Fixed-window limiter: 60 packets per 1.0s window.
    pub fn check_rate_limit(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.window_start) >= RATE_LIMIT_WINDOW {
            self.window_start = now;
            self.window_count = 1;
            return true;
        }
        self.window_count += 1;
        self.window_count <= RATE_LIMIT_BURST
    }
}
