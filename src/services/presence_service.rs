use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::cache::SessionCache;
use crate::config::ProctoringPolicy;
use crate::database::attempt_store::AttemptStore;
use crate::dto::attempt_dto::SocketQuery;
use crate::error::{Error, Result};
use crate::services::attempt_service::{AttemptService, TabSwitchOutcome};
use crate::services::grace_timers::GraceTimers;
use crate::utils::token::tokens_match;

pub const PONG: &str = "pong";
pub const TERMINATED_TAB_SWITCHES: &str = "terminated:tab_switches";
pub const ATTEMPT_LOCKED: &str = "attempt_locked";

/// Commands a client may send as JSON text frames.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientCommand {
    TabSwitch,
    #[serde(other)]
    Unknown,
}

/// What the socket loop should do after a frame was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Continue,
    Reply(&'static str),
    /// Send the text, then close the connection.
    Close(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    HeartbeatTimeout,
    ClientClosed,
    ConnectionError,
    ServerClosed,
}

impl DisconnectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DisconnectReason::HeartbeatTimeout => "heartbeat_timeout",
            DisconnectReason::ClientClosed => "client_closed",
            DisconnectReason::ConnectionError => "connection_error",
            DisconnectReason::ServerClosed => "server_closed",
        }
    }
}

/// An admitted live connection.
#[derive(Debug, Clone)]
pub struct PresenceSession {
    pub attempt_id: Uuid,
    pub connection_id: String,
}

/// Owns live exam connections: admission, heartbeats, proctoring commands and
/// the disconnect grace period.
#[derive(Clone)]
pub struct PresenceService {
    store: AttemptStore,
    cache: SessionCache,
    attempts: AttemptService,
    timers: GraceTimers,
    policy: Arc<ProctoringPolicy>,
}

impl PresenceService {
    pub fn new(
        store: AttemptStore,
        cache: SessionCache,
        attempts: AttemptService,
        policy: Arc<ProctoringPolicy>,
    ) -> Self {
        Self {
            store,
            cache,
            attempts,
            timers: GraceTimers::new(),
            policy,
        }
    }

    pub fn timers(&self) -> &GraceTimers {
        &self.timers
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.policy.heartbeat_timeout()
    }

    pub async fn admit(&self, query: SocketQuery) -> Result<PresenceSession> {
        let attempt_param = query.attempt_id.as_deref().map(str::trim).filter(|v| !v.is_empty());
        let token = query.token.as_deref().map(str::trim).filter(|v| !v.is_empty());
        let (Some(attempt_param), Some(token)) = (attempt_param, token) else {
            return Err(Error::MissingParams("attempt_id and token are required".to_string()));
        };

        let attempt_id = Uuid::parse_str(attempt_param)
            .map_err(|_| Error::NotFound("Attempt not found".to_string()))?;
        let attempt = self
            .store
            .find_attempt(attempt_id)
            .await?
            .ok_or_else(|| Error::NotFound("Attempt not found".to_string()))?;

        let stored = attempt.exam_token.as_deref().unwrap_or_default();
        if !tokens_match(token, stored) {
            tracing::warn!(%attempt_id, "rejected connection with a foreign token");
            return Err(Error::InvalidToken);
        }
        if !attempt.is_open() {
            return Err(Error::AttemptLocked);
        }

        let connection_id = Uuid::new_v4().to_string();
        match self.cache.acquire_presence(attempt_id, &connection_id).await {
            Ok(true) => {}
            Ok(false) => return Err(Error::AnotherSessionActive),
            Err(err) => {
                tracing::warn!(%attempt_id, error = %err, "presence unavailable; admitting without it");
            }
        }

        if self.timers.cancel(attempt_id) {
            tracing::info!(%attempt_id, "reconnected within grace period");
        }

        if let Some(fp) = query.fingerprint.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            if let Err(err) = self.store.set_fingerprint_if_empty(attempt_id, fp).await {
                tracing::warn!(%attempt_id, error = %err, "could not record device fingerprint");
            }
        }

        tracing::info!(%attempt_id, %connection_id, "exam connection admitted");
        Ok(PresenceSession {
            attempt_id,
            connection_id,
        })
    }

    /// Handles one text frame from the client.
    pub async fn handle_text(&self, session: &PresenceSession, text: &str) -> Directive {
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("ping") || trimmed.eq_ignore_ascii_case("heartbeat") {
            self.touch(session).await;
            return Directive::Reply(PONG);
        }

        let command = match serde_json::from_str::<ClientCommand>(trimmed) {
            Ok(command) => command,
            Err(err) => {
                tracing::debug!(attempt_id = %session.attempt_id, error = %err, "ignoring malformed frame");
                return Directive::Continue;
            }
        };

        match command {
            ClientCommand::TabSwitch => self.tab_switch(session).await,
            ClientCommand::Unknown => Directive::Continue,
        }
    }

    /// Extends the presence lease.
    pub async fn touch(&self, session: &PresenceSession) {
        if let Err(err) = self.cache.refresh_presence(session.attempt_id).await {
            tracing::debug!(attempt_id = %session.attempt_id, error = %err, "presence refresh failed");
        }
    }

    async fn tab_switch(&self, session: &PresenceSession) -> Directive {
        match self.attempts.record_tab_switch(session.attempt_id).await {
            Ok(TabSwitchOutcome::Counted(_)) => Directive::Continue,
            Ok(TabSwitchOutcome::Terminated) => Directive::Close(TERMINATED_TAB_SWITCHES),
            Ok(TabSwitchOutcome::Locked) => Directive::Close(ATTEMPT_LOCKED),
            Err(err) => {
                tracing::error!(attempt_id = %session.attempt_id, error = %err, "failed to record tab switch");
                Directive::Continue
            }
        }
    }

    /// Releases presence and, if the attempt is still open, starts the grace period.
    pub async fn on_disconnect(&self, session: &PresenceSession, reason: DisconnectReason) {
        let attempt_id = session.attempt_id;
        if let Err(err) = self
            .cache
            .release_presence(attempt_id, &session.connection_id)
            .await
        {
            tracing::warn!(%attempt_id, error = %err, "could not release presence");
        }

        let still_open = match self.store.find_attempt(attempt_id).await {
            Ok(found) => found.is_some_and(|attempt| attempt.is_open()),
            Err(err) => {
                tracing::warn!(%attempt_id, error = %err, "could not load attempt on disconnect");
                true
            }
        };
        tracing::info!(%attempt_id, reason = reason.as_str(), still_open, "exam connection closed");

        if still_open {
            self.schedule_grace(attempt_id);
        }
    }

    fn schedule_grace(&self, attempt_id: Uuid) {
        let cache = self.cache.clone();
        let attempts = self.attempts.clone();
        self.timers
            .schedule(attempt_id, self.policy.disconnect_grace, async move {
                match cache.presence_held(attempt_id).await {
                    Ok(true) => {
                        tracing::debug!(%attempt_id, "connection is back; grace period ends quietly");
                        return;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        tracing::warn!(%attempt_id, error = %err, "presence unknown; leaving attempt to the deadline sweep");
                        return;
                    }
                }
                match attempts.auto_submit(attempt_id).await {
                    Ok(Some(_)) => tracing::info!(%attempt_id, "attempt auto-submitted after disconnect"),
                    Ok(None) => tracing::debug!(%attempt_id, "attempt was already finalized"),
                    Err(err) => tracing::error!(%attempt_id, error = %err, "auto-submit failed"),
                }
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_commands() {
        let cmd: ClientCommand = serde_json::from_str(r#"{"type":"tab-switch"}"#).unwrap();
        assert_eq!(cmd, ClientCommand::TabSwitch);
    }

    #[test]
    fn unknown_commands_decode_to_noop() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"screen-share","extra":1}"#).unwrap();
        assert_eq!(cmd, ClientCommand::Unknown);
    }

    #[test]
    fn frames_without_type_are_rejected() {
        assert!(serde_json::from_str::<ClientCommand>(r#"{"kind":"tab-switch"}"#).is_err());
        assert!(serde_json::from_str::<ClientCommand>("tab-switch").is_err());
    }

    #[test]
    fn disconnect_reasons_have_stable_names() {
        assert_eq!(DisconnectReason::HeartbeatTimeout.as_str(), "heartbeat_timeout");
        assert_eq!(DisconnectReason::ClientClosed.as_str(), "client_closed");
    }
}
