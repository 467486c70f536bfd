use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::{
    config::ChatConfig,
    rooms::{CHAT_PATH, WS_PATH},
};

use super::{ClientError, Connector, DeliveryStrategy, PullDelivery, PushDelivery};

/// Connects to a chat server from its base URL, e.g. `http://127.0.0.1:8080`.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    base: String,
    http: Client,
    poll_interval: Duration,
    heartbeat_interval: Duration,
}

impl HttpConnector {
    pub fn new(base_url: &str, config: &ChatConfig) -> Self {
        Self {
            base: base_url.trim_end_matches('/').to_owned(),
            http: Client::new(),
            poll_interval: config.poll_interval(),
            heartbeat_interval: config.heartbeat_interval(),
        }
    }

    pub fn chat_url(&self) -> String {
        format!("{}{CHAT_PATH}", self.base)
    }

    pub fn ws_url(&self) -> String {
        let base = if let Some(rest) = self.base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base.clone()
        };
        format!("{base}{WS_PATH}")
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect_push(&self) -> Result<Box<dyn DeliveryStrategy>, ClientError> {
        let push = PushDelivery::connect(&self.ws_url(), self.heartbeat_interval).await?;
        Ok(Box::new(push))
    }

    fn pull(&self) -> Box<dyn DeliveryStrategy> {
        Box::new(PullDelivery::new(self.http.clone(), self.chat_url(), self.poll_interval))
    }
}
