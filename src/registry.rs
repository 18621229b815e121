//! Central orchestrator: map of channels, join/leave/forward, and the
//! sweep driver. Runs entirely on the single event-loop task; no locking.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use tracing::warn;
use uuid::Uuid;

use crate::channel::VoiceChannel;
use crate::codec::{self, Packet};
use crate::config::ServerConfig;
use crate::participant::Participant;

pub struct ChannelRegistry {
    channels: HashMap<Uuid, VoiceChannel>,
    config: ServerConfig,
}

impl ChannelRegistry {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            channels: HashMap::new(),
            config,
        }
    }

    #[cfg(test)]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    #[cfg(test)]
    pub fn channel(&self, id: &Uuid) -> Option<&VoiceChannel> {
        self.channels.get(id)
    }

    /// Return the existing channel, or create it. Soft-capped: exceeding
    /// `max_channels` only logs a warning, since refusing to create a
    /// channel would silently partition newly-arriving clients.
    pub fn get_or_create_channel(&mut self, id: Uuid, now: Instant) -> &mut VoiceChannel {
        if !self.channels.contains_key(&id) && self.channels.len() >= self.config.max_channels {
            warn!(channel_id = %id, limit = self.config.max_channels, "soft channel cap exceeded; creating anyway");
        }
        self.channels
            .entry(id)
            .or_insert_with(|| VoiceChannel::new(id, now))
    }

    /// Resolve/create the channel; update the sender's address if already a
    /// member (NAT rebind), otherwise insert a fresh participant unless the
    /// channel is at its hard per-channel cap. Any data packet implicitly
    /// joins. Returns `false` when the join was refused.
    pub fn handle_join(
        &mut self,
        channel_id: Uuid,
        participant_id: Uuid,
        address: SocketAddr,
        now: Instant,
    ) -> bool {
        let max_participants = self.config.max_participants_per_channel;
        let channel = self.get_or_create_channel(channel_id, now);
        if channel.contains(&participant_id) {
            channel.update_participant(&participant_id, address, None, now);
            return true;
        }
        if channel.len() >= max_participants {
            warn!(
                channel_id = %channel_id,
                participant_id = %participant_id,
                limit = max_participants,
                "channel at capacity; join refused"
            );
            return false;
        }
        channel.add_participant(Participant::new(participant_id, address, now));
        true
    }

    /// Remove the participant; if the channel is now empty, remove it too.
    pub fn handle_leave(&mut self, channel_id: Uuid, participant_id: Uuid) {
        let Some(channel) = self.channels.get_mut(&channel_id) else {
            return;
        };
        channel.remove_participant(&participant_id);
        if channel.is_empty() {
            self.channels.remove(&channel_id);
        }
    }

    pub fn is_admin(&self, channel_id: &Uuid, participant_id: &Uuid) -> bool {
        self.channels
            .get(channel_id)
            .map(|c| c.is_admin(participant_id))
            .unwrap_or(false)
    }

    pub fn check_rate_limit(&mut self, channel_id: &Uuid, participant_id: &Uuid, now: Instant) -> bool {
        self.channels
            .get_mut(channel_id)
            .map(|c| c.check_rate_limit(participant_id, now))
            .unwrap_or(false)
    }

    pub fn update_participant(
        &mut self,
        channel_id: &Uuid,
        participant_id: &Uuid,
        address: SocketAddr,
        flags: Option<u8>,
        now: Instant,
    ) -> bool {
        self.channels
            .get_mut(channel_id)
            .map(|c| c.update_participant(participant_id, address, flags, now))
            .unwrap_or(false)
    }

    pub fn participant_address(&self, channel_id: &Uuid, participant_id: &Uuid) -> Option<SocketAddr> {
        self.channels
            .get(channel_id)
            .and_then(|c| c.get(participant_id))
            .map(|p| p.remote_address)
    }

    /// Encode `packet` once and collect every other channel member's
    /// address. Returns `None` if the destination channel doesn't exist.
    pub fn forward(&self, packet: &Packet, sender_id: Uuid) -> Option<(Vec<u8>, Vec<SocketAddr>)> {
        let channel = self.channels.get(&packet.channel_id)?;
        let recipients: Vec<SocketAddr> = channel
            .all_participants_except(&sender_id)
            .into_iter()
            .map(|p| p.remote_address)
            .collect();
        let buffer = codec::encode_to_vec(packet);
        Some((buffer, recipients))
    }

    /// Evict stale participants in every channel, then drop channels left
    /// empty, in a second pass so the outer map isn't mutated mid-iteration.
    pub fn cleanup_stale_participants(&mut self, now: Instant) {
        for channel in self.channels.values_mut() {
            channel.remove_stale_participants(now, self.config.heartbeat_timeout);
        }
        let empty: Vec<Uuid> = self
            .channels
            .iter()
            .filter(|(_, c)| c.is_empty())
            .map(|(id, _)| *id)
            .collect();
        for id in empty {
            self.channels.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{PacketType, FLAG_VOX};
    use std::time::Duration;

    fn cfg() -> ServerConfig {
        ServerConfig {
            max_channels: 100,
            max_participants_per_channel: 40,
            heartbeat_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(3),
        }
    }

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn packet(channel_id: Uuid, sender: Uuid) -> Packet {
        Packet {
            version: codec::VERSION,
            packet_type: PacketType::Audio,
            sequence_number: 1,
            timestamp: 1,
            channel_id,
            participant_id: sender,
            flags: FLAG_VOX,
            reserved: 0,
            payload: vec![1, 2, 3],
        }
    }

    #[test]
    fn join_then_leave_removes_empty_channel() {
        let now = Instant::now();
        let mut reg = ChannelRegistry::new(cfg());
        let channel_id = Uuid::new_v4();
        let participant_id = Uuid::new_v4();
        assert!(reg.handle_join(channel_id, participant_id, addr(1), now));
        assert_eq!(reg.channel_count(), 1);
        reg.handle_leave(channel_id, participant_id);
        assert_eq!(reg.channel_count(), 0);
    }

    #[test]
    fn nat_rebind_updates_address() {
        let now = Instant::now();
        let mut reg = ChannelRegistry::new(cfg());
        let channel_id = Uuid::new_v4();
        let participant_id = Uuid::new_v4();
        reg.handle_join(channel_id, participant_id, addr(1), now);
        reg.handle_join(channel_id, participant_id, addr(2), now + Duration::from_secs(1));
        assert_eq!(
            reg.participant_address(&channel_id, &participant_id),
            Some(addr(2))
        );
    }

    #[test]
    fn participant_cap_is_hard() {
        let now = Instant::now();
        let mut config = cfg();
        config.max_participants_per_channel = 1;
        let mut reg = ChannelRegistry::new(config);
        let channel_id = Uuid::new_v4();
        reg.handle_join(channel_id, Uuid::new_v4(), addr(1), now);
        let refused = reg.handle_join(channel_id, Uuid::new_v4(), addr(2), now);
        assert!(!refused);
    }

    #[test]
    fn channel_cap_is_soft() {
        let now = Instant::now();
        let mut config = cfg();
        config.max_channels = 1;
        let mut reg = ChannelRegistry::new(config);
        reg.handle_join(Uuid::new_v4(), Uuid::new_v4(), addr(1), now);
        reg.handle_join(Uuid::new_v4(), Uuid::new_v4(), addr(2), now);
        assert_eq!(reg.channel_count(), 2);
    }

    #[test]
    fn forward_fans_out_to_other_members() {
        let now = Instant::now();
        let mut reg = ChannelRegistry::new(cfg());
        let channel_id = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        reg.handle_join(channel_id, a, addr(1), now);
        reg.handle_join(channel_id, b, addr(2), now);
        reg.handle_join(channel_id, c, addr(3), now);
        let (buf, recipients) = reg.forward(&packet(channel_id, a), a).unwrap();
        assert_eq!(recipients.len(), 2);
        assert!(recipients.contains(&addr(2)));
        assert!(recipients.contains(&addr(3)));
        assert_eq!(codec::decode(&buf).unwrap().channel_id, channel_id);
    }

    #[test]
    fn forward_to_missing_channel_is_none() {
        let reg = ChannelRegistry::new(cfg());
        let ghost = Uuid::new_v4();
        assert!(reg.forward(&packet(ghost, Uuid::new_v4()), Uuid::new_v4()).is_none());
    }

    #[test]
    fn sweep_evicts_stale_and_drops_empty_channels() {
        let now = Instant::now();
        let mut reg = ChannelRegistry::new(cfg());
        let channel_id = Uuid::new_v4();
        reg.handle_join(channel_id, Uuid::new_v4(), addr(1), now);
        reg.cleanup_stale_participants(now + Duration::from_secs(3));
        assert_eq!(reg.channel_count(), 1);
        reg.cleanup_stale_participants(now + Duration::from_secs(12));
        assert_eq!(reg.channel_count(), 0);
    }

    #[test]
    fn admin_is_sticky_through_registry() {
        let now = Instant::now();
        let mut reg = ChannelRegistry::new(cfg());
        let channel_id = Uuid::new_v4();
        let admin = Uuid::new_v4();
        reg.handle_join(channel_id, admin, addr(1), now);
        reg.update_participant(&channel_id, &admin, addr(1), Some(codec::FLAG_ADMIN), now);
        assert!(reg.is_admin(&channel_id, &admin));
        reg.update_participant(&channel_id, &admin, addr(1), Some(0), now);
        assert!(reg.is_admin(&channel_id, &admin));
    }
}
