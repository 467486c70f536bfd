use std::{collections::VecDeque, fmt};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::RoomError;

use super::presence::{Participant, ParticipantId};

/// Absolute position in the room's history. Doubles as the pull cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub author_id: ParticipantId,
    pub author_display_name: String,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Bounded, append-only message history.
///
/// Ids keep counting across truncation so a cursor always names an absolute
/// position, never a slot in the buffer.
#[derive(Debug)]
pub struct MessageLog {
    capacity: usize,
    next_id: u64,
    messages: VecDeque<Message>,
}

impl MessageLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_id: 1,
            messages: VecDeque::with_capacity(capacity),
        }
    }

    pub fn append(
        &mut self,
        author: &Participant,
        content: &str,
        created_at: OffsetDateTime,
    ) -> Result<Message, RoomError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(RoomError::EmptyContent);
        }

        let message = Message {
            id: MessageId(self.next_id),
            author_id: author.id,
            author_display_name: author.display_name.clone(),
            content: content.to_owned(),
            created_at,
        };
        self.next_id += 1;

        self.messages.push_back(message.clone());
        while self.messages.len() > self.capacity {
            self.messages.pop_front();
        }

        Ok(message)
    }

    /// Retained messages newer than `cursor`, oldest first.
    ///
    /// A cursor that predates the retained window yields the whole window; the
    /// truncated gap is not reported.
    pub fn since(&self, cursor: Option<MessageId>) -> Vec<Message> {
        let start = match cursor {
            Some(cursor) => self.messages.partition_point(|m| m.id <= cursor),
            None => 0,
        };
        self.messages.range(start..).cloned().collect()
    }

    /// The `n` most recent messages, oldest first.
    pub fn tail(&self, n: usize) -> Vec<Message> {
        let start = self.messages.len().saturating_sub(n);
        self.messages.range(start..).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
