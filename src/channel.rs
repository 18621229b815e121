//! A voice channel: participants keyed by id, a sticky admin set, and the
//! fan-out/eviction operations the registry drives.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::codec::FLAG_ADMIN;
use crate::participant::Participant;

pub struct VoiceChannel {
    pub id: Uuid,
    participants: HashMap<Uuid, Participant>,
    admin_ids: HashSet<Uuid>,
    pub created_at: Instant,
}

impl VoiceChannel {
    pub fn new(id: Uuid, now: Instant) -> Self {
        Self {
            id,
            participants: HashMap::new(),
            admin_ids: HashSet::new(),
            created_at: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.participants.contains_key(id)
    }

    pub fn get(&self, id: &Uuid) -> Option<&Participant> {
        self.participants.get(id)
    }

    /// Insert or replace by `p.id`.
    pub fn add_participant(&mut self, p: Participant) {
        self.participants.insert(p.id, p);
    }

    /// Idempotent delete.
    pub fn remove_participant(&mut self, id: &Uuid) -> Option<Participant> {
        self.participants.remove(id)
    }

    /// Overwrite address and refresh the heartbeat clock. If `flags` carries
    /// the admin bit, the id is added to the sticky admin set and the flags
    /// are stored on the record; admin status is never revoked by a later
    /// call lacking the bit.
    pub fn update_participant(
        &mut self,
        id: &Uuid,
        address: SocketAddr,
        flags: Option<u8>,
        now: Instant,
    ) -> bool {
        let Some(participant) = self.participants.get_mut(id) else {
            return false;
        };
        participant.remote_address = address;
        participant.update_heartbeat(now);
        if let Some(flags) = flags {
            if flags & FLAG_ADMIN != 0 {
                self.admin_ids.insert(*id);
                participant.flags = flags;
            }
        }
        true
    }

    pub fn is_admin(&self, id: &Uuid) -> bool {
        self.admin_ids.contains(id)
    }

    /// Missing participant returns false (drop).
    pub fn check_rate_limit(&mut self, id: &Uuid, now: Instant) -> bool {
        match self.participants.get_mut(id) {
            Some(p) => p.check_rate_limit(now),
            None => false,
        }
    }

    /// Every participant other than `except`. Snapshotting into a `Vec`
    /// makes the sequence stable within this call, as required; ordering
    /// across calls is unspecified.
    pub fn all_participants_except(&self, except: &Uuid) -> Vec<&Participant> {
        self.participants
            .values()
            .filter(|p| &p.id != except)
            .collect()
    }

    /// Single pass removing every participant failing `is_alive`. Returns
    /// the evicted ids; admin set is pruned to match.
    pub fn remove_stale_participants(&mut self, now: Instant, timeout: Duration) -> Vec<Uuid> {
        let stale: Vec<Uuid> = self
            .participants
            .iter()
            .filter(|(_, p)| !p.is_alive(now, timeout))
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            self.participants.remove(id);
            self.admin_ids.remove(id);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn admin_status_is_sticky() {
        let now = Instant::now();
        let mut ch = VoiceChannel::new(Uuid::new_v4(), now);
        let id = Uuid::new_v4();
        ch.add_participant(Participant::new(id, addr(), now));
        assert!(ch.update_participant(&id, addr(), Some(FLAG_ADMIN), now));
        assert!(ch.is_admin(&id));
        // A later heartbeat without the admin bit must not downgrade.
        assert!(ch.update_participant(&id, addr(), Some(0), now));
        assert!(ch.is_admin(&id));
    }

    #[test]
    fn admin_ids_subset_of_participants_after_eviction() {
        let now = Instant::now();
        let mut ch = VoiceChannel::new(Uuid::new_v4(), now);
        let id = Uuid::new_v4();
        ch.add_participant(Participant::new(id, addr(), now));
        ch.update_participant(&id, addr(), Some(FLAG_ADMIN), now);
        let later = now + Duration::from_secs(100);
        ch.remove_stale_participants(later, Duration::from_secs(10));
        assert!(!ch.is_admin(&id));
        assert!(ch.is_empty());
    }

    #[test]
    fn update_participant_on_missing_id_is_noop() {
        let now = Instant::now();
        let mut ch = VoiceChannel::new(Uuid::new_v4(), now);
        assert!(!ch.update_participant(&Uuid::new_v4(), addr(), None, now));
    }

    #[test]
    fn all_participants_except_excludes_self() {
        let now = Instant::now();
        let mut ch = VoiceChannel::new(Uuid::new_v4(), now);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        ch.add_participant(Participant::new(a, addr(), now));
        ch.add_participant(Participant::new(b, addr(), now));
        let recipients = ch.all_participants_except(&a);
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].id, b);
    }

    #[test]
    fn remove_participant_is_idempotent() {
        let now = Instant::now();
        let mut ch = VoiceChannel::new(Uuid::new_v4(), now);
        let id = Uuid::new_v4();
        assert!(ch.remove_participant(&id).is_none());
        ch.add_participant(Participant::new(id, addr(), now));
        assert!(ch.remove_participant(&id).is_some());
        assert!(ch.remove_participant(&id).is_none());
    }
}
