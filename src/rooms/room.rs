use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::{sync::broadcast, time::Instant};
use tracing::{debug, info};

use crate::{config::ChatConfig, error::RoomError};

use super::{
    msg::{Message, MessageId, MessageLog},
    presence::{ConnectionId, JoinOutcome, Participant, ParticipantId, Presence},
};

/// What a participant sees right after joining.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub participants: Vec<Participant>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeaveReason {
    /// Explicit leave request.
    Left,
    /// Idle past the presence timeout.
    Evicted,
    /// The owning push channel closed.
    Disconnected,
}

/// Published to every subscriber whenever the room changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum RoomEvent {
    MessageAppended { message: Message },
    PresenceChanged { participants: Vec<Participant> },
    ParticipantJoined { participant: Participant },
    ParticipantLeft { participant: Participant, reason: LeaveReason },
}

/// Result of one pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum PollOutcome {
    Ok {
        messages: Vec<Message>,
        participants: Vec<Participant>,
        participant_count: usize,
    },
    /// The server no longer holds this participant; join again, then keep polling.
    RejoinRequired,
}

/// The single chat room: presence, message log and event fan-out.
///
/// Every method takes `&mut self` or `&self` and never awaits, so wrapping the
/// room in one lock (see [`RoomHandle`]) serializes all mutation.
#[derive(Debug)]
pub struct Room {
    presence: Presence,
    log: MessageLog,
    catch_up: usize,
    presence_timeout: Duration,
    events: broadcast::Sender<RoomEvent>,
}

impl Room {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            presence: Presence::new(config.max_participants),
            log: MessageLog::new(config.max_log_size),
            catch_up: config.catch_up,
            presence_timeout: config.presence_timeout(),
            events: broadcast::channel(config.event_buffer).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn join(
        &mut self,
        participant: Participant,
        connection: Option<ConnectionId>,
        now: Instant,
    ) -> Result<RoomSnapshot, RoomError> {
        // A slot held by someone long gone should not keep a newcomer out.
        self.evict_stale(now, self.presence_timeout);

        let outcome = match self.presence.join(participant.clone(), connection, now) {
            Ok(outcome) => outcome,
            Err(err) => {
                info!(id = %participant.id, name = %participant.display_name, "join refused: room full");
                return Err(err);
            }
        };

        match outcome {
            JoinOutcome::Joined => {
                info!(id = %participant.id, name = %participant.display_name, transport = transport_label(connection), "participant joined");
                self.publish(RoomEvent::ParticipantJoined { participant });
            }
            JoinOutcome::Rejoined => {
                info!(id = %participant.id, transport = transport_label(connection), "participant rejoined");
            }
        }
        self.publish_presence();

        Ok(RoomSnapshot {
            participants: self.presence.participants(),
            messages: self.tail(self.catch_up),
        })
    }

    /// Marks `id` as alive, then sweeps idle participants.
    pub fn touch(&mut self, id: ParticipantId, now: Instant) -> Result<(), RoomError> {
        self.presence.touch(id, now)?;
        self.evict_stale(now, self.presence_timeout);
        Ok(())
    }

    /// `touch` on behalf of a push channel, which must still own `id`.
    pub fn touch_via(&mut self, id: ParticipantId, connection: ConnectionId, now: Instant) -> Result<(), RoomError> {
        self.presence.check_owner(id, connection)?;
        self.touch(id, now)
    }

    /// Idempotent. Returns whether anyone was removed.
    pub fn leave(&mut self, id: ParticipantId) -> bool {
        let Some(participant) = self.presence.leave(id) else {
            return false;
        };
        info!(%id, "participant left");
        self.publish_departure(participant, LeaveReason::Left);
        true
    }

    /// Leave on behalf of a closed push channel, if it still owns `id`.
    pub fn disconnect(&mut self, id: ParticipantId, connection: ConnectionId) -> bool {
        let Some(participant) = self.presence.disconnect(id, connection) else {
            debug!(%id, %connection, "closed channel no longer owns participant");
            return false;
        };
        info!(%id, %connection, "participant disconnected");
        self.publish_departure(participant, LeaveReason::Disconnected);
        true
    }

    pub fn evict_stale(&mut self, now: Instant, timeout: Duration) -> Vec<Participant> {
        let evicted = self.presence.evict_stale(now, timeout);
        if evicted.is_empty() {
            return evicted;
        }

        for participant in &evicted {
            info!(id = %participant.id, "participant evicted after idle timeout");
            self.publish(RoomEvent::ParticipantLeft {
                participant: participant.clone(),
                reason: LeaveReason::Evicted,
            });
        }
        self.publish_presence();
        evicted
    }

    /// Sweeps with the configured presence timeout.
    pub fn sweep(&mut self, now: Instant) -> Vec<Participant> {
        self.evict_stale(now, self.presence_timeout)
    }

    pub fn append(
        &mut self,
        author_id: ParticipantId,
        content: &str,
        created_at: OffsetDateTime,
    ) -> Result<Message, RoomError> {
        let author = self.presence.get(author_id).ok_or(RoomError::NotPresent)?;
        let message = self.log.append(author, content, created_at)?;

        debug!(id = %message.id, author = %author_id, "message appended");
        self.publish(RoomEvent::MessageAppended {
            message: message.clone(),
        });
        Ok(message)
    }

    /// `append` on behalf of a push channel, which must still own the author.
    pub fn append_via(
        &mut self,
        author_id: ParticipantId,
        connection: ConnectionId,
        content: &str,
        created_at: OffsetDateTime,
    ) -> Result<Message, RoomError> {
        self.presence.check_owner(author_id, connection)?;
        self.append(author_id, content, created_at)
    }

    pub fn since(&self, cursor: Option<MessageId>) -> Vec<Message> {
        self.log.since(cursor)
    }

    pub fn tail(&self, n: usize) -> Vec<Message> {
        self.log.tail(n)
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.presence.participants()
    }

    pub fn is_present(&self, id: ParticipantId) -> bool {
        self.presence.contains(id)
    }

    pub fn message_count(&self) -> usize {
        self.log.len()
    }

    /// One pull request: touch, sweep, then read everything after `cursor`.
    pub fn poll(&mut self, id: ParticipantId, cursor: Option<MessageId>, now: Instant) -> PollOutcome {
        if self.touch(id, now).is_err() {
            debug!(%id, "poll from absent participant, asking for rejoin");
            return PollOutcome::RejoinRequired;
        }

        let participants = self.presence.participants();
        PollOutcome::Ok {
            messages: self.since(cursor),
            participant_count: participants.len(),
            participants,
        }
    }

    fn publish_departure(&mut self, participant: Participant, reason: LeaveReason) {
        self.publish(RoomEvent::ParticipantLeft { participant, reason });
        self.publish_presence();
    }

    fn publish_presence(&self) {
        self.publish(RoomEvent::PresenceChanged {
            participants: self.presence.participants(),
        });
    }

    fn publish(&self, event: RoomEvent) {
        // no subscribers is fine: pull-only rooms have none
        let _ = self.events.send(event);
    }
}

fn transport_label(connection: Option<ConnectionId>) -> &'static str {
    if connection.is_some() { "push" } else { "pull" }
}

/// Shared, lock-guarded owner of the room for the lifetime of the process.
#[derive(Clone, Debug)]
pub struct RoomHandle {
    room: Arc<Mutex<Room>>,
}

impl RoomHandle {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            room: Arc::new(Mutex::new(Room::new(config))),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.room.lock().subscribe()
    }

    pub fn join(
        &self,
        participant: Participant,
        connection: Option<ConnectionId>,
    ) -> Result<RoomSnapshot, RoomError> {
        self.room.lock().join(participant, connection, Instant::now())
    }

    pub fn touch_via(&self, id: ParticipantId, connection: ConnectionId) -> Result<(), RoomError> {
        self.room.lock().touch_via(id, connection, Instant::now())
    }

    pub fn leave(&self, id: ParticipantId) -> bool {
        self.room.lock().leave(id)
    }

    pub fn disconnect(&self, id: ParticipantId, connection: ConnectionId) -> bool {
        self.room.lock().disconnect(id, connection)
    }

    pub fn send(&self, author_id: ParticipantId, content: &str) -> Result<Message, RoomError> {
        self.room
            .lock()
            .append(author_id, content, OffsetDateTime::now_utc())
    }

    pub fn send_via(
        &self,
        author_id: ParticipantId,
        connection: ConnectionId,
        content: &str,
    ) -> Result<Message, RoomError> {
        self.room
            .lock()
            .append_via(author_id, connection, content, OffsetDateTime::now_utc())
    }

    pub fn sweep(&self) -> Vec<Participant> {
        self.room.lock().sweep(Instant::now())
    }

    pub fn poll(&self, id: ParticipantId, cursor: Option<MessageId>) -> PollOutcome {
        self.room.lock().poll(id, cursor, Instant::now())
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.room.lock().participants()
    }

    pub fn is_present(&self, id: ParticipantId) -> bool {
        self.room.lock().is_present(id)
    }

    pub fn message_count(&self) -> usize {
        self.room.lock().message_count()
    }

    pub fn subscriber_count(&self) -> usize {
        self.room.lock().subscriber_count()
    }
}
