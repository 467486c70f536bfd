//! Runtime configuration.
//!
//! Every knob has a default matching the reference deployment; `.env` files and
//! `DUET_*` environment variables override them at startup.

use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};

pub const MAX_PARTICIPANTS: usize = 2;
pub const MAX_LOG_SIZE: usize = 100;
pub const CATCH_UP: usize = 50;
pub const PRESENCE_TIMEOUT: Duration = Duration::from_secs(30);
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const MAX_CONSECUTIVE_PUSH_FAILURES: u32 = 2;
pub const PUSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Address the server listens on.
    pub bind: SocketAddr,
    /// Hard cap on concurrently present participants.
    pub max_participants: usize,
    /// Number of messages the log retains.
    pub max_log_size: usize,
    /// Messages handed to a participant on join.
    pub catch_up: usize,
    /// Idle time after which a participant is evicted.
    pub presence_timeout_secs: u64,
    /// Pull client poll period.
    pub poll_interval_ms: u64,
    /// Failed push attempts before a client falls back to pulling.
    pub max_push_failures: u32,
    pub push_connect_timeout_secs: u64,
    /// Base delay between push connect attempts (jittered).
    pub push_retry_delay_ms: u64,
    /// Push client heartbeat period; keeps `lastSeenAt` fresh while idle.
    pub heartbeat_interval_secs: u64,
    /// Capacity of the room event broadcast channel.
    pub event_buffer: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_participants: MAX_PARTICIPANTS,
            max_log_size: MAX_LOG_SIZE,
            catch_up: CATCH_UP,
            presence_timeout_secs: PRESENCE_TIMEOUT.as_secs(),
            poll_interval_ms: POLL_INTERVAL.as_millis() as u64,
            max_push_failures: MAX_CONSECUTIVE_PUSH_FAILURES,
            push_connect_timeout_secs: PUSH_CONNECT_TIMEOUT.as_secs(),
            push_retry_delay_ms: 1000,
            heartbeat_interval_secs: 10,
            event_buffer: 256,
        }
    }
}

impl ChatConfig {
    /// Defaults, overridden by `.env` and `DUET_*` variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        override_from_env(&mut config.bind, "DUET_BIND")?;
        override_from_env(&mut config.max_participants, "DUET_MAX_PARTICIPANTS")?;
        override_from_env(&mut config.max_log_size, "DUET_MAX_LOG_SIZE")?;
        override_from_env(&mut config.catch_up, "DUET_CATCH_UP")?;
        override_from_env(&mut config.presence_timeout_secs, "DUET_PRESENCE_TIMEOUT_SECS")?;
        override_from_env(&mut config.poll_interval_ms, "DUET_POLL_INTERVAL_MS")?;
        override_from_env(&mut config.max_push_failures, "DUET_MAX_PUSH_FAILURES")?;
        override_from_env(&mut config.push_connect_timeout_secs, "DUET_PUSH_CONNECT_TIMEOUT_SECS")?;
        override_from_env(&mut config.push_retry_delay_ms, "DUET_PUSH_RETRY_DELAY_MS")?;
        override_from_env(&mut config.heartbeat_interval_secs, "DUET_HEARTBEAT_INTERVAL_SECS")?;
        override_from_env(&mut config.event_buffer, "DUET_EVENT_BUFFER")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.max_participants > 0, "max_participants must be at least 1");
        ensure!(self.max_log_size > 0, "max_log_size must be at least 1");
        ensure!(self.poll_interval_ms > 0, "poll_interval_ms must be positive");
        ensure!(self.max_push_failures > 0, "max_push_failures must be at least 1");
        ensure!(self.heartbeat_interval_secs > 0, "heartbeat_interval_secs must be positive");
        ensure!(self.event_buffer > 0, "event_buffer must be at least 1");
        Ok(())
    }

    pub fn presence_timeout(&self) -> Duration {
        Duration::from_secs(self.presence_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn push_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.push_connect_timeout_secs)
    }

    pub fn push_retry_delay(&self) -> Duration {
        Duration::from_millis(self.push_retry_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

fn override_from_env<T>(slot: &mut T, key: &str) -> anyhow::Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Ok(raw) = dotenv::var(key) {
        *slot = raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_constants() {
        let cfg = ChatConfig::default();
        assert_eq!(cfg.max_participants, 2);
        assert_eq!(cfg.max_log_size, 100);
        assert_eq!(cfg.catch_up, 50);
        assert_eq!(cfg.presence_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.poll_interval(), Duration::from_secs(2));
        assert_eq!(cfg.max_push_failures, 2);
        assert_eq!(cfg.push_connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn default_bind_port() {
        assert_eq!(ChatConfig::default().bind.port(), 8080);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: ChatConfig = serde_json::from_str(r#"{"max_log_size": 10}"#).unwrap();
        assert_eq!(cfg.max_log_size, 10);
        assert_eq!(cfg.max_participants, 2);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let cfg = ChatConfig {
            max_participants: 0,
            ..ChatConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_override_parses_and_rejects_garbage() {
        let mut slot = 5usize;
        // SAFETY: test-local variable name, not read by other tests.
        unsafe { std::env::set_var("DUET_TEST_SLOT", "7") };
        override_from_env(&mut slot, "DUET_TEST_SLOT").unwrap();
        assert_eq!(slot, 7);

        unsafe { std::env::set_var("DUET_TEST_SLOT", "seven") };
        assert!(override_from_env(&mut slot, "DUET_TEST_SLOT").is_err());
        assert_eq!(slot, 7);
        unsafe { std::env::remove_var("DUET_TEST_SLOT") };
    }
}
