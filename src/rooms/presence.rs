use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::RoomError;

/// Stable logical identity of a user, shared by every transport they use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ephemeral id of one push connection. Routes events; never decides membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
}

impl Participant {
    pub fn new(id: u64, display_name: impl Into<String>) -> Self {
        Self {
            id: ParticipantId(id),
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A new identity took a free slot.
    Joined,
    /// An already-present identity replaced its own entry.
    Rejoined,
}

#[derive(Debug, Clone)]
struct Entry {
    participant: Participant,
    last_seen_at: Instant,
    /// Push connection currently owning this participant, if any.
    connection: Option<ConnectionId>,
}

/// Capacity-bounded participant set, kept in join order.
#[derive(Debug)]
pub struct Presence {
    capacity: usize,
    entries: Vec<Entry>,
}

impl Presence {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Inserts `participant`, or replaces the entry already held under its id.
    ///
    /// A re-join never counts against the cap. `connection` records which push
    /// channel owns the entry; pull joins pass `None`.
    pub fn join(
        &mut self,
        participant: Participant,
        connection: Option<ConnectionId>,
        now: Instant,
    ) -> Result<JoinOutcome, RoomError> {
        if let Some(entry) = self.entry_mut(participant.id) {
            entry.participant = participant;
            entry.last_seen_at = now;
            entry.connection = connection;
            return Ok(JoinOutcome::Rejoined);
        }

        if self.entries.len() >= self.capacity {
            return Err(RoomError::RoomFull);
        }

        self.entries.push(Entry {
            participant,
            last_seen_at: now,
            connection,
        });
        Ok(JoinOutcome::Joined)
    }

    pub fn touch(&mut self, id: ParticipantId, now: Instant) -> Result<(), RoomError> {
        let entry = self.entry_mut(id).ok_or(RoomError::NotPresent)?;
        entry.last_seen_at = now;
        Ok(())
    }

    /// Idempotent; returns the removed participant when there was one.
    pub fn leave(&mut self, id: ParticipantId) -> Option<Participant> {
        let index = self.entries.iter().position(|e| e.participant.id == id)?;
        Some(self.entries.remove(index).participant)
    }

    /// Removes `id` only while `connection` still owns it.
    ///
    /// A channel superseded by a newer join (over push or pull) closes without
    /// evicting the session that replaced it.
    pub fn disconnect(&mut self, id: ParticipantId, connection: ConnectionId) -> Option<Participant> {
        let index = self
            .entries
            .iter()
            .position(|e| e.participant.id == id && e.connection == Some(connection))?;
        Some(self.entries.remove(index).participant)
    }

    /// Succeeds only while `connection` owns `id`. A superseded channel is
    /// treated as absent.
    pub fn check_owner(&self, id: ParticipantId, connection: ConnectionId) -> Result<(), RoomError> {
        match self.entries.iter().find(|e| e.participant.id == id) {
            Some(entry) if entry.connection == Some(connection) => Ok(()),
            _ => Err(RoomError::NotPresent),
        }
    }

    /// Drops everyone idle for longer than `timeout`, returning them in join order.
    pub fn evict_stale(&mut self, now: Instant, timeout: Duration) -> Vec<Participant> {
        let mut evicted = Vec::new();
        self.entries.retain(|e| {
            let idle = now.saturating_duration_since(e.last_seen_at);
            if idle > timeout {
                evicted.push(e.participant.clone());
                false
            } else {
                true
            }
        });
        evicted
    }

    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.entries
            .iter()
            .find(|e| e.participant.id == id)
            .map(|e| &e.participant)
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.get(id).is_some()
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.entries.iter().map(|e| e.participant.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_mut(&mut self, id: ParticipantId) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.participant.id == id)
    }
}
