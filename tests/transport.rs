//! End-to-end tests against a real server: raw push frames and the failover client.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use duet::{
    client::{
        ClientError, ClientUpdate, Connector, DeliveryStrategy, FailoverController, HttpConnector,
        Transport, TransportState,
    },
    rooms::{ClientFrame, LeaveReason, MessageId, Participant, ParticipantId, ServerFrame},
    server, AppState, ChatConfig,
};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

fn test_config() -> ChatConfig {
    ChatConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        poll_interval_ms: 50,
        push_retry_delay_ms: 10,
        push_connect_timeout_secs: 2,
        heartbeat_interval_secs: 1,
        ..ChatConfig::default()
    }
}

async fn boot() -> (String, AppState) {
    boot_with(test_config()).await
}

async fn boot_with(config: ChatConfig) -> (String, AppState) {
    let (addr, state, _handle) = server::spawn(config).await.unwrap();
    (format!("http://{addr}"), state)
}

async fn open_ws(base: &str) -> WsStream {
    let url = format!("{}/ws", base.replacen("http://", "ws://", 1));
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn write(ws: &mut WsStream, frame: ClientFrame) {
    let text = serde_json::to_string(&frame).unwrap();
    ws.send(WsMessage::Text(text.into())).await.unwrap();
}

async fn read(ws: &mut WsStream) -> ServerFrame {
    loop {
        let message = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("push channel closed")
            .unwrap();
        if let WsMessage::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Reads until a frame matches, skipping presence chatter.
async fn read_until(ws: &mut WsStream, wanted: impl Fn(&ServerFrame) -> bool) -> ServerFrame {
    loop {
        let frame = read(ws).await;
        if wanted(&frame) {
            return frame;
        }
    }
}

async fn http_join(base: &str, participant: &Participant) {
    let status = reqwest::Client::new()
        .put(format!("{base}/api/chat"))
        .json(participant)
        .send()
        .await
        .unwrap()
        .status();
    assert!(status.is_success(), "{status}");
}

async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(TIMEOUT, async {
        while !check() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition never held");
}

/// Waits on the controller until an update carries `content`.
async fn receive(controller: &mut FailoverController<impl Connector>, content: &str) -> ClientUpdate {
    timeout(TIMEOUT, async {
        loop {
            let update = controller.next_update().await.unwrap();
            if update.messages.iter().any(|m| m.content == content) {
                return update;
            }
        }
    })
    .await
    .expect("message never arrived")
}

#[tokio::test]
async fn push_frames_follow_room_changes() {
    let (base, state) = boot().await;
    let mut ws = open_ws(&base).await;

    write(&mut ws, ClientFrame::Join { participant: Participant::new(1, "Ann") }).await;
    match read(&mut ws).await {
        ServerFrame::Joined { participants, messages } => {
            assert_eq!(participants, vec![Participant::new(1, "Ann")]);
            assert!(messages.is_empty());
        }
        other => panic!("expected joined, got {other:?}"),
    }

    http_join(&base, &Participant::new(2, "Bo")).await;
    // our own join is echoed too; wait for Bo's
    let joined = read_until(&mut ws, |f| {
        matches!(f, ServerFrame::ParticipantJoined { participant } if participant.id == ParticipantId(2))
    })
    .await;
    assert_eq!(joined, ServerFrame::ParticipantJoined { participant: Participant::new(2, "Bo") });

    write(&mut ws, ClientFrame::Send { content: "hello".into() }).await;
    match read_until(&mut ws, |f| matches!(f, ServerFrame::MessageAppended { .. })).await {
        ServerFrame::MessageAppended { message } => {
            assert_eq!(message.content, "hello");
            assert_eq!(message.author_id, ParticipantId(1));
        }
        _ => unreachable!(),
    }
    assert_eq!(state.room.message_count(), 1);
}

#[tokio::test]
async fn third_push_join_gets_room_full() {
    let (base, _state) = boot().await;
    http_join(&base, &Participant::new(1, "Ann")).await;
    http_join(&base, &Participant::new(2, "Bo")).await;

    let mut ws = open_ws(&base).await;
    write(&mut ws, ClientFrame::Join { participant: Participant::new(3, "Cy") }).await;
    assert!(matches!(read(&mut ws).await, ServerFrame::RoomFull { .. }));
}

#[tokio::test]
async fn push_send_after_removal_reports_session_lost() {
    let (base, state) = boot().await;
    let mut ws = open_ws(&base).await;
    write(&mut ws, ClientFrame::Join { participant: Participant::new(1, "Ann") }).await;
    read(&mut ws).await;

    let status = reqwest::Client::new()
        .delete(format!("{base}/api/chat?participantId=1"))
        .send()
        .await
        .unwrap()
        .status();
    assert!(status.is_success());
    let left = read_until(&mut ws, |f| matches!(f, ServerFrame::ParticipantLeft { .. })).await;
    assert!(matches!(left, ServerFrame::ParticipantLeft { reason: LeaveReason::Left, .. }));
    // announced without waiting for the next send
    assert_eq!(read(&mut ws).await, ServerFrame::SessionLost { participant_id: ParticipantId(1) });

    write(&mut ws, ClientFrame::Send { content: "still here?".into() }).await;
    let lost = read_until(&mut ws, |f| matches!(f, ServerFrame::SessionLost { .. })).await;
    assert_eq!(lost, ServerFrame::SessionLost { participant_id: ParticipantId(1) });
    assert_eq!(state.room.message_count(), 0);
}

fn is_session_lost(frame: &ServerFrame) -> bool {
    matches!(frame, ServerFrame::SessionLost { participant_id } if *participant_id == ParticipantId(1))
}

#[tokio::test]
async fn heartbeats_keep_a_quiet_push_participant_present() {
    let (base, state) = boot_with(ChatConfig { presence_timeout_secs: 1, ..test_config() }).await;
    let mut ws = open_ws(&base).await;
    write(&mut ws, ClientFrame::Join { participant: Participant::new(1, "Ann") }).await;
    read(&mut ws).await;

    for _ in 0..8 {
        sleep(Duration::from_millis(300)).await;
        write(&mut ws, ClientFrame::Heartbeat).await;
    }
    // joining sweeps idle participants
    http_join(&base, &Participant::new(2, "Bo")).await;
    assert!(state.room.is_present(ParticipantId(1)));

    sleep(Duration::from_millis(1500)).await;
    assert!(state.room.sweep().iter().any(|p| p.id == ParticipantId(1)));
    read_until(&mut ws, is_session_lost).await;

    // a late heartbeat does not bring the participant back
    write(&mut ws, ClientFrame::Heartbeat).await;
    read_until(&mut ws, is_session_lost).await;
    assert!(!state.room.is_present(ParticipantId(1)));
}

#[tokio::test]
async fn push_send_after_server_side_leave_is_delivered() {
    let (base, state) = boot().await;
    let config = test_config();
    let mut ann = FailoverController::new(HttpConnector::new(&base, &config), Participant::new(1, "Ann"), &config);
    ann.start().await.unwrap();
    assert_eq!(ann.state(), TransportState::PushActive);

    assert!(state.room.leave(ParticipantId(1)));
    let message = ann.send("important").await.unwrap();
    assert_eq!(message.content, "important");
    assert_eq!(state.room.message_count(), 1);
    assert!(state.room.is_present(ParticipantId(1)));
    assert_eq!(ann.state(), TransportState::PushActive);
}

#[tokio::test]
async fn closing_push_channel_releases_the_slot() {
    let (base, state) = boot().await;
    let mut ws = open_ws(&base).await;
    write(&mut ws, ClientFrame::Join { participant: Participant::new(1, "Ann") }).await;
    read(&mut ws).await;
    assert!(state.room.is_present(ParticipantId(1)));

    ws.close(None).await.unwrap();
    let room = state.room.clone();
    eventually(|| !room.is_present(ParticipantId(1))).await;
}

#[tokio::test]
async fn pull_rejoin_survives_old_push_close() {
    let (base, state) = boot().await;
    let mut ws = open_ws(&base).await;
    let ann = Participant::new(1, "Ann");
    write(&mut ws, ClientFrame::Join { participant: ann.clone() }).await;
    read(&mut ws).await;

    // the client switched transports and the old channel goes away afterwards
    http_join(&base, &ann).await;
    ws.close(None).await.unwrap();
    drop(ws);

    sleep(Duration::from_millis(200)).await;
    assert!(state.room.is_present(ParticipantId(1)));
}

/// Refuses every push attempt so the controller has to fall back.
struct PullOnly(HttpConnector);

#[async_trait]
impl Connector for PullOnly {
    async fn connect_push(&self) -> Result<Box<dyn DeliveryStrategy>, ClientError> {
        Err(ClientError::ChannelClosed)
    }

    fn pull(&self) -> Box<dyn DeliveryStrategy> {
        self.0.pull()
    }
}

#[tokio::test]
async fn push_and_pull_clients_talk_to_each_other() {
    let (base, state) = boot().await;
    let config = test_config();

    let mut ann = FailoverController::new(HttpConnector::new(&base, &config), Participant::new(1, "Ann"), &config);
    ann.start().await.unwrap();
    assert_eq!(ann.state(), TransportState::PushActive);
    assert_eq!(ann.transport(), Some(Transport::Push));

    let mut bo = FailoverController::new(
        PullOnly(HttpConnector::new(&base, &config)),
        Participant::new(2, "Bo"),
        &config,
    );
    bo.start().await.unwrap();
    assert_eq!(bo.state(), TransportState::PullActive);
    assert_eq!(bo.transport(), Some(Transport::Pull));
    assert_eq!(bo.consecutive_failures(), config.max_push_failures);
    assert_eq!(state.room.participants().len(), 2);

    ann.send("hi Bo").await.unwrap();
    let update = receive(&mut bo, "hi Bo").await;
    assert_eq!(update.messages[0].author_display_name, "Ann");

    bo.send("hi Ann").await.unwrap();
    receive(&mut ann, "hi Ann").await;
    receive(&mut bo, "hi Ann").await;
    assert_eq!(ann.cursor(), Some(MessageId(2)));
    assert_eq!(bo.cursor(), Some(MessageId(2)));

    bo.leave().await.unwrap();
    ann.leave().await.unwrap();
    let room = state.room.clone();
    eventually(|| room.participants().is_empty()).await;
}

#[tokio::test]
async fn client_refused_when_room_is_full() {
    let (base, _state) = boot().await;
    http_join(&base, &Participant::new(1, "Ann")).await;
    http_join(&base, &Participant::new(2, "Bo")).await;

    let config = test_config();
    let mut cy = FailoverController::new(HttpConnector::new(&base, &config), Participant::new(3, "Cy"), &config);
    let err = cy.start().await.unwrap_err();
    assert!(matches!(err, ClientError::Room(duet::RoomError::RoomFull)));
    assert_eq!(cy.state(), TransportState::PreferPush);
}
