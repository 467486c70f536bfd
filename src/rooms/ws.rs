use std::ops::ControlFlow;

use axum::{
    debug_handler,
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::{
    sync::{broadcast, broadcast::error::RecvError, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::error::{ErrorCode, RoomError};

use super::{
    presence::{ConnectionId, Participant, ParticipantId},
    room::{RoomEvent, RoomHandle},
    wire::{ClientFrame, ServerFrame},
};

const OUTBOUND_BUFFER: usize = 64;

#[debug_handler(state = crate::AppState)]
pub async fn room_ws(State(room): State<RoomHandle>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| push_channel(room, socket))
}

/// Drives one push connection until either side closes it.
async fn push_channel(room: RoomHandle, socket: WebSocket) {
    let connection = ConnectionId::new();
    let (mut sender, mut receiver) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::channel::<ServerFrame>(OUTBOUND_BUFFER);
    debug!(%connection, "push channel opened");

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(err) => {
                    warn!(error = %err, "failed to serialize push frame");
                    continue;
                }
            };
            if sender.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut channel = PushChannel {
        room,
        connection,
        bound: None,
        relay: None,
        outbound,
    };

    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if channel.handle_text(text.as_str()).await.is_break() {
                        break;
                    }
                }
                Some(Ok(WsMessage::Ping(_))) => channel.heartbeat().await,
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(%connection, error = %err, "push channel errored");
                    break;
                }
            },
            _ = &mut send_task => break,
        }
    }

    channel.close();
    send_task.abort();
    debug!(%connection, "push channel closed");
}

struct PushChannel {
    room: RoomHandle,
    connection: ConnectionId,
    /// Participant this connection joined as.
    bound: Option<ParticipantId>,
    /// Forwards room events to `outbound` once bound.
    relay: Option<JoinHandle<()>>,
    outbound: mpsc::Sender<ServerFrame>,
}

impl PushChannel {
    async fn handle_text(&mut self, text: &str) -> ControlFlow<()> {
        let frame = match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(connection = %self.connection, error = %err, "ignoring malformed frame");
                return self
                    .reply(ServerFrame::Error {
                        code: ErrorCode::Malformed,
                        message: format!("malformed frame: {err}"),
                    })
                    .await;
            }
        };

        match frame {
            ClientFrame::Join { participant } => self.join(participant).await,
            ClientFrame::Send { content } => self.send(&content).await,
            ClientFrame::Heartbeat => {
                self.heartbeat().await;
                ControlFlow::Continue(())
            }
            ClientFrame::Leave => {
                if let Some(id) = self.bound.take() {
                    self.stop_relay();
                    self.room.leave(id);
                }
                ControlFlow::Continue(())
            }
        }
    }

    async fn join(&mut self, participant: Participant) -> ControlFlow<()> {
        let id = participant.id;
        if let Some(previous) = self.bound.filter(|&previous| previous != id) {
            self.room.disconnect(previous, self.connection);
        }
        self.stop_relay();

        // Subscribe first so nothing published after the snapshot is missed.
        let events = self.room.subscribe();
        match self.room.join(participant, Some(self.connection)) {
            Ok(snapshot) => {
                self.bound = Some(id);
                let flow = self.reply(snapshot.into()).await;
                self.relay = Some(tokio::spawn(relay(events, self.outbound.clone(), id)));
                flow
            }
            Err(err) => {
                self.bound = None;
                self.reply(rejection(err)).await
            }
        }
    }

    async fn send(&mut self, content: &str) -> ControlFlow<()> {
        let Some(id) = self.bound else {
            return self.reply(rejection(RoomError::NotPresent)).await;
        };

        match self.room.send_via(id, self.connection, content) {
            Ok(message) => self.reply(ServerFrame::Sent { message }).await,
            Err(RoomError::NotPresent) => self.session_lost(id).await,
            Err(err) => self.reply(rejection(err)).await,
        }
    }

    async fn heartbeat(&mut self) {
        let Some(id) = self.bound else {
            return;
        };
        if self.room.touch_via(id, self.connection).is_err() {
            let _ = self.session_lost(id).await;
        }
    }

    async fn session_lost(&mut self, id: ParticipantId) -> ControlFlow<()> {
        info!(%id, connection = %self.connection, "push session lost, asking client to rejoin");
        self.reply(ServerFrame::SessionLost { participant_id: id }).await
    }

    async fn reply(&self, frame: ServerFrame) -> ControlFlow<()> {
        match self.outbound.send(frame).await {
            Ok(()) => ControlFlow::Continue(()),
            Err(_) => ControlFlow::Break(()),
        }
    }

    fn stop_relay(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.abort();
        }
    }

    /// Leave on close. A newer session for the same participant is left alone.
    fn close(&mut self) {
        self.stop_relay();
        if let Some(id) = self.bound.take() {
            self.room.disconnect(id, self.connection);
        }
    }
}

fn rejection(err: RoomError) -> ServerFrame {
    match err {
        RoomError::RoomFull => ServerFrame::RoomFull {
            message: err.to_string(),
        },
        _ => ServerFrame::Error {
            code: err.code(),
            message: err.to_string(),
        },
    }
}

async fn relay(
    mut events: broadcast::Receiver<RoomEvent>,
    outbound: mpsc::Sender<ServerFrame>,
    participant: ParticipantId,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                // the client rejoins and refills the gap from the catch-up tail
                warn!(%participant, skipped, "push subscriber lagged behind room events");
                if outbound.send(ServerFrame::SessionLost { participant_id: participant }).await.is_err() {
                    break;
                }
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let departed = matches!(
            &event,
            RoomEvent::ParticipantLeft { participant: p, .. } if p.id == participant
        );
        if outbound.send(event.into()).await.is_err() {
            break;
        }
        if departed
            && outbound
                .send(ServerFrame::SessionLost { participant_id: participant })
                .await
                .is_err()
        {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::{config::ChatConfig, rooms::LeaveReason};

    fn channel(room: &RoomHandle) -> (PushChannel, mpsc::Receiver<ServerFrame>) {
        let (outbound, frames) = mpsc::channel(OUTBOUND_BUFFER);
        let channel = PushChannel {
            room: room.clone(),
            connection: ConnectionId::new(),
            bound: None,
            relay: None,
            outbound,
        };
        (channel, frames)
    }

    async fn next_matching(
        frames: &mut mpsc::Receiver<ServerFrame>,
        wanted: impl Fn(&ServerFrame) -> bool,
    ) -> ServerFrame {
        loop {
            let frame = timeout(Duration::from_secs(1), frames.recv())
                .await
                .expect("no frame in time")
                .expect("outbound closed");
            if wanted(&frame) {
                return frame;
            }
        }
    }

    fn alice() -> Participant {
        Participant::new(1, "Alice")
    }

    fn is_session_lost(frame: &ServerFrame) -> bool {
        matches!(frame, ServerFrame::SessionLost { participant_id } if *participant_id == ParticipantId(1))
    }

    #[tokio::test]
    async fn send_is_acknowledged_with_the_stored_message() {
        let room = RoomHandle::new(&ChatConfig::default());
        let (mut push, mut frames) = channel(&room);
        assert!(push.join(alice()).await.is_continue());

        assert!(push.send("  hi  ").await.is_continue());
        match next_matching(&mut frames, |f| matches!(f, ServerFrame::Sent { .. })).await {
            ServerFrame::Sent { message } => {
                assert_eq!(message.content, "hi");
                assert_eq!(message.author_id, ParticipantId(1));
            }
            _ => unreachable!(),
        }
        assert_eq!(room.message_count(), 1);
    }

    #[tokio::test]
    async fn superseded_channel_loses_its_session() {
        let room = RoomHandle::new(&ChatConfig::default());
        let (mut old, mut old_frames) = channel(&room);
        let (mut new, _new_frames) = channel(&room);
        assert!(old.join(alice()).await.is_continue());
        assert!(new.join(alice()).await.is_continue());

        assert!(old.send("from the old tab").await.is_continue());
        next_matching(&mut old_frames, is_session_lost).await;
        assert_eq!(room.message_count(), 0);

        old.heartbeat().await;
        next_matching(&mut old_frames, is_session_lost).await;

        // closing the old channel leaves the newer session alone
        old.close();
        assert!(room.is_present(ParticipantId(1)));
    }

    #[tokio::test]
    async fn leaving_through_another_path_ends_the_push_session() {
        let room = RoomHandle::new(&ChatConfig::default());
        let (mut push, mut frames) = channel(&room);
        assert!(push.join(alice()).await.is_continue());

        room.leave(ParticipantId(1));
        let left = next_matching(&mut frames, |f| matches!(f, ServerFrame::ParticipantLeft { .. })).await;
        assert!(matches!(left, ServerFrame::ParticipantLeft { reason: LeaveReason::Left, .. }));
        next_matching(&mut frames, is_session_lost).await;
    }

    #[tokio::test]
    async fn heartbeat_keeps_the_owner_fresh() {
        let room = RoomHandle::new(&ChatConfig::default());
        let (mut push, mut frames) = channel(&room);
        assert!(push.join(alice()).await.is_continue());
        push.heartbeat().await;
        assert!(room.is_present(ParticipantId(1)));

        assert!(push.send("after heartbeat").await.is_continue());
        next_matching(&mut frames, |f| matches!(f, ServerFrame::Sent { .. })).await;
    }

    #[tokio::test]
    async fn malformed_frame_is_a_client_error() {
        let room = RoomHandle::new(&ChatConfig::default());
        let (mut push, mut frames) = channel(&room);

        assert!(push.handle_text("{not json").await.is_continue());
        let frame = next_matching(&mut frames, |_| true).await;
        assert!(matches!(frame, ServerFrame::Error { code: ErrorCode::Malformed, .. }));
    }

    #[tokio::test]
    async fn lagging_relay_asks_the_client_to_rejoin() {
        let (events, receiver) = broadcast::channel(2);
        for _ in 0..5 {
            events.send(RoomEvent::PresenceChanged { participants: vec![] }).unwrap();
        }
        let (outbound, mut frames) = mpsc::channel(OUTBOUND_BUFFER);
        let relay = tokio::spawn(relay(receiver, outbound, ParticipantId(1)));

        let first = next_matching(&mut frames, |_| true).await;
        assert_eq!(first, ServerFrame::SessionLost { participant_id: ParticipantId(1) });

        drop(events);
        relay.await.unwrap();
    }
}
