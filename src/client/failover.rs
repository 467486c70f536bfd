//! Transport failover for one client session.
//!
//! The controller prefers push delivery, counts consecutive failures to open
//! it, and moves the session to pull delivery once the limit is reached or an
//! active push channel breaks. It is the only place that knows both transports
//! exist; callers just see joins, sends and updates.

use std::time::Duration;

use rand::Rng;
use tokio::time;
use tracing::{debug, info, warn};

use crate::{
    config::ChatConfig,
    error::RoomError,
    rooms::{Message, MessageId, Participant, RoomSnapshot},
};

use super::{ClientError, Connector, DeliveryStrategy, Transport, Update};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Not started (or left).
    PreferPush,
    Connecting,
    PushActive,
    FallingBack,
    PullActive,
}

/// New room state for the caller, already de-duplicated against the cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientUpdate {
    pub messages: Vec<Message>,
    pub participants: Option<Vec<Participant>>,
}

impl ClientUpdate {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.participants.is_none()
    }

    fn merge(&mut self, newer: ClientUpdate) {
        self.messages.extend(newer.messages);
        if newer.participants.is_some() {
            self.participants = newer.participants;
        }
    }
}

pub struct FailoverController<C> {
    connector: C,
    me: Participant,
    state: TransportState,
    failures: u32,
    max_failures: u32,
    connect_timeout: Duration,
    retry_delay: Duration,
    active: Option<Box<dyn DeliveryStrategy>>,
    /// Highest message id handed to the caller.
    cursor: Option<MessageId>,
    /// Catch-up gathered while recovering inside `send`.
    pending: Option<ClientUpdate>,
}

impl<C: Connector> FailoverController<C> {
    pub fn new(connector: C, me: Participant, config: &ChatConfig) -> Self {
        Self {
            connector,
            me,
            state: TransportState::PreferPush,
            failures: 0,
            max_failures: config.max_push_failures,
            connect_timeout: config.push_connect_timeout(),
            retry_delay: config.push_retry_delay(),
            active: None,
            cursor: None,
            pending: None,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn transport(&self) -> Option<Transport> {
        self.active.as_ref().map(|active| active.transport())
    }

    pub fn cursor(&self) -> Option<MessageId> {
        self.cursor
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    pub fn participant(&self) -> &Participant {
        &self.me
    }

    /// Joins the room, over push if it can be opened, otherwise over pull.
    ///
    /// `RoomFull` is returned as-is and never retried.
    pub async fn start(&mut self) -> Result<ClientUpdate, ClientError> {
        self.teardown().await;
        self.state = TransportState::Connecting;

        loop {
            match self.open_push().await {
                Ok(update) => {
                    self.state = TransportState::PushActive;
                    self.failures = 0;
                    info!(id = %self.me.id, "push delivery active");
                    return Ok(update);
                }
                Err(err) if err.is_transport() => {
                    self.failures += 1;
                    warn!(error = %err, failures = self.failures, "push channel failed to open");
                    if self.failures >= self.max_failures {
                        return self.fall_back().await;
                    }
                    time::sleep(jittered(self.retry_delay)).await;
                }
                Err(err) => {
                    self.state = TransportState::PreferPush;
                    return Err(err);
                }
            }
        }
    }

    /// Waits for the next non-empty update, recovering from transport loss and
    /// lost sessions along the way.
    pub async fn next_update(&mut self) -> Result<ClientUpdate, ClientError> {
        if let Some(pending) = self.pending.take() {
            return Ok(pending);
        }

        loop {
            if self.state == TransportState::FallingBack {
                return self.fall_back().await;
            }

            let cursor = self.cursor;
            let Some(active) = self.active.as_mut() else {
                return Err(ClientError::ChannelClosed);
            };

            match active.next_update(cursor).await {
                Ok(Update::Batch { messages, participants }) => {
                    let update = self.accept(messages, participants);
                    if !update.is_empty() {
                        return Ok(update);
                    }
                }
                Ok(Update::SessionLost) => return self.rejoin().await,
                Err(err) if err.is_transport() => {
                    if self.state == TransportState::PushActive {
                        warn!(error = %err, "push channel broke");
                        return self.fall_back().await;
                    }
                    warn!(error = %err, "poll failed, retrying on next tick");
                }
                Err(err) if err.room_error() == Some(RoomError::NotPresent) => {
                    return self.rejoin().await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Sends `content`, rejoining or falling back as needed so the message is
    /// stored exactly when this returns `Ok`.
    pub async fn send(&mut self, content: &str) -> Result<Message, ClientError> {
        if content.trim().is_empty() {
            return Err(RoomError::EmptyContent.into());
        }
        if self.state == TransportState::FallingBack {
            let update = self.fall_back().await?;
            self.stash(update);
        }

        let Some(active) = self.active.as_mut() else {
            return Err(ClientError::ChannelClosed);
        };

        match active.send(content).await {
            Ok(message) => Ok(message),
            Err(err) if err.room_error() == Some(RoomError::NotPresent) => {
                let update = self.rejoin().await?;
                self.stash(update);
                self.resend(content).await
            }
            Err(err) if err.is_transport() && self.state == TransportState::PushActive => {
                warn!(error = %err, "push send failed");
                let update = self.fall_back().await?;
                self.stash(update);
                self.resend(content).await
            }
            Err(err) => Err(err),
        }
    }

    /// Leaves the room and releases the active transport.
    pub async fn leave(&mut self) -> Result<(), ClientError> {
        let result = match self.active.as_mut() {
            Some(active) => active.leave().await,
            None => Ok(()),
        };
        self.teardown().await;
        result
    }

    async fn open_push(&mut self) -> Result<ClientUpdate, ClientError> {
        let attempt = async {
            let mut push = self.connector.connect_push().await?;
            match push.join(&self.me).await {
                Ok(snapshot) => Ok::<_, ClientError>((push, snapshot)),
                Err(err) => {
                    push.close().await;
                    Err(err)
                }
            }
        };

        let (push, snapshot) = time::timeout(self.connect_timeout, attempt)
            .await
            .map_err(|_| ClientError::ConnectTimeout)??;
        self.active = Some(push);
        Ok(self.absorb(snapshot))
    }

    /// Joins over pull, then drops whatever push channel is left.
    async fn fall_back(&mut self) -> Result<ClientUpdate, ClientError> {
        self.state = TransportState::FallingBack;
        info!(id = %self.me.id, "falling back to pull delivery");

        let mut pull = self.connector.pull();
        let snapshot = pull.join(&self.me).await?;
        if let Some(mut residual) = self.active.replace(pull) {
            residual.close().await;
        }

        self.state = TransportState::PullActive;
        Ok(self.absorb(snapshot))
    }

    /// Joins again over the current transport.
    async fn rejoin(&mut self) -> Result<ClientUpdate, ClientError> {
        let Some(active) = self.active.as_mut() else {
            return Err(ClientError::ChannelClosed);
        };
        info!(id = %self.me.id, transport = ?active.transport(), "session lost, rejoining");

        match active.join(&self.me).await {
            Ok(snapshot) => Ok(self.absorb(snapshot)),
            Err(err) if err.is_transport() && self.state == TransportState::PushActive => {
                warn!(error = %err, "rejoin over push failed");
                self.fall_back().await
            }
            Err(err) => Err(err),
        }
    }

    async fn resend(&mut self, content: &str) -> Result<Message, ClientError> {
        match self.active.as_mut() {
            Some(active) => active.send(content).await,
            None => Err(ClientError::ChannelClosed),
        }
    }

    async fn teardown(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.close().await;
        }
        self.state = TransportState::PreferPush;
        self.pending = None;
    }

    fn absorb(&mut self, snapshot: RoomSnapshot) -> ClientUpdate {
        self.accept(snapshot.messages, Some(snapshot.participants))
    }

    /// Keeps only messages past the cursor and advances it.
    fn accept(&mut self, messages: Vec<Message>, participants: Option<Vec<Participant>>) -> ClientUpdate {
        let mut fresh = Vec::with_capacity(messages.len());
        for message in messages {
            if self.cursor.is_none_or(|cursor| message.id > cursor) {
                self.cursor = Some(message.id);
                fresh.push(message);
            } else {
                debug!(id = %message.id, "dropping already delivered message");
            }
        }
        ClientUpdate {
            messages: fresh,
            participants,
        }
    }

    fn stash(&mut self, update: ClientUpdate) {
        match self.pending.as_mut() {
            Some(pending) => pending.merge(update),
            None => self.pending = Some(update),
        }
    }
}

fn jittered(base: Duration) -> Duration {
    base.mul_f64(rand::rng().random_range(0.5..=1.5))
}
