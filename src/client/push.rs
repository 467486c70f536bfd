use std::{collections::VecDeque, time::Duration};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    time::{self, Instant, Interval, MissedTickBehavior},
};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::{
    error::{ErrorCode, RoomError},
    rooms::{ClientFrame, Message, MessageId, Participant, ParticipantId, RoomSnapshot, ServerFrame},
};

use super::{ClientError, DeliveryStrategy, Transport, Update};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Persistent WebSocket delivery. Heartbeats keep the participant fresh while idle.
pub struct PushDelivery {
    stream: WsStream,
    heartbeat: Interval,
    participant: Option<ParticipantId>,
    /// Frames read while waiting for a `sent` ack, replayed by `next_update`.
    backlog: VecDeque<ServerFrame>,
}

impl PushDelivery {
    pub async fn connect(url: &str, heartbeat_interval: Duration) -> Result<Self, ClientError> {
        let (stream, _) = connect_async(url).await?;
        debug!(url, "push channel connected");

        let mut heartbeat = time::interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Ok(Self {
            stream,
            heartbeat,
            participant: None,
            backlog: VecDeque::new(),
        })
    }

    async fn write(&mut self, frame: &ClientFrame) -> Result<(), ClientError> {
        let text = serde_json::to_string(frame)?;
        self.stream.send(WsMessage::Text(text.into())).await?;
        Ok(())
    }

    /// Maps a server frame to an update, or `None` for frames the caller does not need.
    fn interpret(&self, frame: ServerFrame) -> Result<Option<Update>, ClientError> {
        let update = match frame {
            ServerFrame::MessageAppended { message } => Update::Batch {
                messages: vec![message],
                participants: None,
            },
            ServerFrame::PresenceChanged { participants } => Update::Batch {
                messages: Vec::new(),
                participants: Some(participants),
            },
            ServerFrame::Joined { participants, messages } => Update::Batch {
                messages,
                participants: Some(participants),
            },
            ServerFrame::SessionLost { participant_id } if Some(participant_id) == self.participant => {
                Update::SessionLost
            }
            // only expected while `send` waits for it
            ServerFrame::Sent { .. } => return Ok(None),
            ServerFrame::Error { code, message } => match RoomError::from_code(code) {
                Some(RoomError::NotPresent) => Update::SessionLost,
                _ => {
                    warn!(?code, %message, "push request rejected");
                    return Ok(None);
                }
            },
            ServerFrame::RoomFull { .. } => return Err(RoomError::RoomFull.into()),
            other => {
                debug!(frame = ?other, "ignoring push notice");
                return Ok(None);
            }
        };
        Ok(Some(update))
    }
}

fn rejected(code: ErrorCode, message: String) -> ClientError {
    RoomError::from_code(code)
        .map(ClientError::Room)
        .unwrap_or(ClientError::Server(message))
}

async fn read_frame(stream: &mut WsStream) -> Result<ServerFrame, ClientError> {
    loop {
        match stream.next().await {
            Some(Ok(WsMessage::Text(text))) => return Ok(serde_json::from_str(text.as_str())?),
            Some(Ok(WsMessage::Close(_))) | None => return Err(ClientError::ChannelClosed),
            Some(Ok(_)) => {}
            Some(Err(err)) => return Err(err.into()),
        }
    }
}

#[async_trait]
impl DeliveryStrategy for PushDelivery {
    fn transport(&self) -> Transport {
        Transport::Push
    }

    async fn join(&mut self, participant: &Participant) -> Result<RoomSnapshot, ClientError> {
        self.backlog.clear();
        self.write(&ClientFrame::Join {
            participant: participant.clone(),
        })
        .await?;

        loop {
            match read_frame(&mut self.stream).await? {
                ServerFrame::Joined { participants, messages } => {
                    self.participant = Some(participant.id);
                    return Ok(RoomSnapshot { participants, messages });
                }
                ServerFrame::RoomFull { .. } => return Err(RoomError::RoomFull.into()),
                ServerFrame::Error { code, message } => return Err(rejected(code, message)),
                // leftovers from before the join; the snapshot covers them
                _ => {}
            }
        }
    }

    async fn send(&mut self, content: &str) -> Result<Message, ClientError> {
        self.write(&ClientFrame::Send {
            content: content.to_owned(),
        })
        .await?;

        loop {
            match read_frame(&mut self.stream).await? {
                ServerFrame::Sent { message } => return Ok(message),
                ServerFrame::SessionLost { participant_id } if Some(participant_id) == self.participant => {
                    return Err(RoomError::NotPresent.into());
                }
                ServerFrame::Error { code, message } => return Err(rejected(code, message)),
                other => self.backlog.push_back(other),
            }
        }
    }

    async fn next_update(&mut self, _cursor: Option<MessageId>) -> Result<Update, ClientError> {
        while let Some(frame) = self.backlog.pop_front() {
            if let Some(update) = self.interpret(frame)? {
                return Ok(update);
            }
        }

        loop {
            tokio::select! {
                frame = read_frame(&mut self.stream) => {
                    if let Some(update) = self.interpret(frame?)? {
                        return Ok(update);
                    }
                }
                _ = self.heartbeat.tick() => {
                    self.write(&ClientFrame::Heartbeat).await?;
                }
            }
        }
    }

    async fn leave(&mut self) -> Result<(), ClientError> {
        if self.participant.take().is_some() {
            self.write(&ClientFrame::Leave).await?;
        }
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            debug!(error = %err, "push channel close failed");
        }
    }
}
