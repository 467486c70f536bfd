use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::debug;

use crate::{
    appresult::ErrorBody,
    error::RoomError,
    rooms::{
        JoinResponse, Message, MessageId, Participant, ParticipantId, PollOutcome, RoomSnapshot, SendRequest,
        SendResponse,
    },
};

use super::{ClientError, DeliveryStrategy, Transport, Update};

/// Periodic request/response delivery against the chat endpoint.
pub struct PullDelivery {
    http: Client,
    endpoint: String,
    ticker: Interval,
    participant: Option<ParticipantId>,
}

impl PullDelivery {
    pub fn new(http: Client, endpoint: impl Into<String>, poll_interval: Duration) -> Self {
        let mut ticker = time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            http,
            endpoint: endpoint.into(),
            ticker,
            participant: None,
        }
    }

    fn participant(&self) -> Result<ParticipantId, ClientError> {
        self.participant.ok_or(ClientError::Room(RoomError::NotPresent))
    }
}

#[async_trait]
impl DeliveryStrategy for PullDelivery {
    fn transport(&self) -> Transport {
        Transport::Pull
    }

    async fn join(&mut self, participant: &Participant) -> Result<RoomSnapshot, ClientError> {
        let response = self.http.put(&self.endpoint).json(participant).send().await?;
        let JoinResponse { participants, messages, .. } = decode(response).await?;
        self.participant = Some(participant.id);
        Ok(RoomSnapshot { participants, messages })
    }

    async fn send(&mut self, content: &str) -> Result<Message, ClientError> {
        let request = SendRequest {
            participant_id: self.participant()?,
            content: content.to_owned(),
        };
        let response = self.http.post(&self.endpoint).json(&request).send().await?;
        let SendResponse { message } = decode(response).await?;
        debug!(id = %message.id, "message accepted");
        Ok(message)
    }

    async fn next_update(&mut self, cursor: Option<MessageId>) -> Result<Update, ClientError> {
        self.ticker.tick().await;

        let mut query = vec![("participantId", self.participant()?.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        let response = self.http.get(&self.endpoint).query(&query).send().await?;

        match decode(response).await? {
            PollOutcome::Ok { messages, participants, .. } => Ok(Update::Batch {
                messages,
                participants: Some(participants),
            }),
            PollOutcome::RejoinRequired => Ok(Update::SessionLost),
        }
    }

    async fn leave(&mut self) -> Result<(), ClientError> {
        let Some(id) = self.participant.take() else {
            return Ok(());
        };
        let response = self
            .http
            .delete(&self.endpoint)
            .query(&[("participantId", id.to_string())])
            .send()
            .await?;
        let _: serde_json::Value = decode(response).await?;
        Ok(())
    }

    // Nothing to release: an abandoned pull client simply ages out of presence.
    async fn close(&mut self) {}
}

/// Decodes a success body, or turns the API's error body back into a typed error.
pub(crate) async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let body = response.text().await?;
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(ErrorBody { error, message, .. }) => Err(RoomError::from_code(error)
            .map(ClientError::Room)
            .unwrap_or(ClientError::Server(message))),
        Err(_) => Err(ClientError::UnexpectedStatus {
            status: status.as_u16(),
            body,
        }),
    }
}
