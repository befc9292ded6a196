//! Multi-relay publishing
//!
//! Every target relay gets its own attempt on its own task. An attempt connects,
//! sends `["EVENT", ...]` and waits for the matching `OK`, each step bounded by
//! its own timeout. Attempts never wait on each other; the publish is done when
//! the last one reports a terminal state.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::channel::mpsc;
use futures::{Stream, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::relays::connection::{RelayConnector, RelaySocket, WsConnector};
use crate::relays::types::{
    ClientMessage, PublishOptions, PublishReport, PublishStatus, RelayError, RelayMessage,
    RelayStatusUpdate, AUTH_REQUIRED_PREFIX,
};
use crate::relays::utils::partition_relays;
use crate::signer::{Signer, SigningIdentity};
use crate::types::{Event, EventId, UnsignedEvent};

/// Publishes signed events to sets of relays over short-lived connections.
#[derive(Clone)]
pub struct RelayPublisher {
    connector: Arc<dyn RelayConnector>,
    signer: Signer,
    auth: Option<SigningIdentity>,
}

impl Default for RelayPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayPublisher {
    pub fn new() -> Self {
        Self::with_connector(Arc::new(WsConnector))
    }

    pub fn with_connector(connector: Arc<dyn RelayConnector>) -> Self {
        Self {
            connector,
            signer: Signer::default(),
            auth: None,
        }
    }

    /// Identity used to answer NIP-42 challenges when `allow_auth` is set.
    pub fn with_auth(mut self, identity: SigningIdentity) -> Self {
        self.auth = Some(identity);
        self
    }

    pub fn with_signer(mut self, signer: Signer) -> Self {
        self.signer = signer;
        self
    }

    /// Start publishing `event` to every relay in `relays`. Must be called
    /// from within a tokio runtime.
    pub fn publish<S: AsRef<str>>(
        &self,
        event: Event,
        relays: &[S],
        options: PublishOptions,
    ) -> PublishHandle {
        let (valid, invalid) = partition_relays(relays);
        let mut handle = PublishHandle::new(event.id);

        for (relay, error) in invalid {
            warn!(relay = %relay, "[publish] skipping relay: {}", error);
            handle.report.record(&RelayStatusUpdate {
                relay,
                status: PublishStatus::Error,
                message: Some(error.to_string()),
            });
        }

        info!("[publish] event {} to {} relay(s)", event.id, valid.len());
        self.spawn_attempts(&mut handle, event, valid, PublishStatus::Pending, options);
        handle
    }

    /// Publish again to the relays that asked for auth, with auth enabled.
    /// Relays with any other outcome in `report` are not contacted.
    pub fn retry_auth_required(
        &self,
        event: Event,
        report: &PublishReport,
        options: PublishOptions,
    ) -> PublishHandle {
        let relays: Vec<String> = report.auth_required().into_iter().map(str::to_string).collect();
        let mut handle = PublishHandle::new(event.id);

        info!("[publish] retrying event {} on {} relay(s) with auth", event.id, relays.len());
        let options = PublishOptions {
            allow_auth: true,
            ..options
        };
        self.spawn_attempts(&mut handle, event, relays, PublishStatus::AuthRequired, options);
        handle
    }

    fn spawn_attempts(
        &self,
        handle: &mut PublishHandle,
        event: Event,
        relays: Vec<String>,
        initial: PublishStatus,
        options: PublishOptions,
    ) {
        let (tx, rx) = mpsc::unbounded();
        handle.updates = Some(rx);
        let event = Arc::new(event);

        for relay in relays {
            handle.report.outcomes.insert(relay.clone(), initial);
            let attempt = PublishAttempt {
                relay,
                event: event.clone(),
                options: options.clone(),
                status: initial,
                connector: self.connector.clone(),
                signer: self.signer.clone(),
                auth: self.auth.clone(),
                cancel: handle.cancel.child_token(),
                updates: tx.clone(),
            };
            tokio::spawn(attempt.run());
        }
    }
}

/// Caller's side of an in-flight publish.
///
/// Yields [`RelayStatusUpdate`]s as a stream; [`PublishHandle::wait`] drains
/// them into the final report. Dropping the handle cancels whatever is still
/// running.
pub struct PublishHandle {
    event_id: EventId,
    updates: Option<mpsc::UnboundedReceiver<RelayStatusUpdate>>,
    cancel: CancellationToken,
    report: PublishReport,
}

impl PublishHandle {
    fn new(event_id: EventId) -> Self {
        Self {
            event_id,
            updates: None,
            cancel: CancellationToken::new(),
            report: PublishReport::new(event_id),
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    /// Abort every attempt; their connections are dropped.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Outcomes seen so far.
    pub fn report(&self) -> &PublishReport {
        &self.report
    }

    /// Wait for every relay to finish.
    pub async fn wait(mut self) -> PublishReport {
        while self.next().await.is_some() {}
        self.report.clone()
    }
}

impl Stream for PublishHandle {
    type Item = RelayStatusUpdate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let Some(updates) = this.updates.as_mut() else {
            return Poll::Ready(None);
        };
        match updates.poll_next_unpin(cx) {
            Poll::Ready(Some(update)) => {
                this.report.record(&update);
                Poll::Ready(Some(update))
            }
            other => other,
        }
    }
}

impl Drop for PublishHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// How an attempt ended.
enum Outcome {
    Published(String),
    Error(String),
    AuthRequired(String),
    Cancelled,
}

struct PublishAttempt {
    relay: String,
    event: Arc<Event>,
    options: PublishOptions,
    status: PublishStatus,
    connector: Arc<dyn RelayConnector>,
    signer: Signer,
    auth: Option<SigningIdentity>,
    cancel: CancellationToken,
    updates: mpsc::UnboundedSender<RelayStatusUpdate>,
}

impl PublishAttempt {
    async fn run(mut self) {
        if self.status == PublishStatus::AuthRequired {
            self.advance(PublishStatus::Pending, None);
        }

        let cancel = self.cancel.clone();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Outcome::Cancelled,
            outcome = self.attempt() => outcome,
        };

        let (status, message) = match outcome {
            Outcome::Published(message) => (PublishStatus::Published, message),
            Outcome::Error(message) => (PublishStatus::Error, message),
            Outcome::AuthRequired(message) => (PublishStatus::AuthRequired, message),
            Outcome::Cancelled => (PublishStatus::Cancelled, "cancelled".to_string()),
        };
        debug!(relay = %self.relay, ?status, "[publish] {}", message);
        self.advance(status, Some(message));
    }

    fn advance(&mut self, next: PublishStatus, message: Option<String>) {
        if !self.status.can_transition_to(next) {
            warn!(relay = %self.relay, "[publish] ignoring {:?} -> {:?}", self.status, next);
            return;
        }
        self.status = next;
        // The receiver may be gone if the caller dropped the handle.
        let _ = self.updates.unbounded_send(RelayStatusUpdate {
            relay: self.relay.clone(),
            status: next,
            message,
        });
    }

    async fn attempt(&mut self) -> Outcome {
        self.advance(PublishStatus::Connecting, None);

        let connect = self.connector.connect(&self.relay);
        let mut socket = match tokio::time::timeout(self.options.connect_timeout, connect).await {
            Ok(Ok(socket)) => socket,
            Ok(Err(e)) => return Outcome::Error(e.to_string()),
            Err(_) => return Outcome::Error(RelayError::Timeout(self.options.connect_timeout).to_string()),
        };

        self.advance(PublishStatus::Publishing, None);
        let frame = ClientMessage::Event((*self.event).clone()).to_json();
        if let Err(e) = socket.send(frame).await {
            return Outcome::Error(e.to_string());
        }

        let deadline = Instant::now() + self.options.publish_timeout;
        let outcome = self.await_ok(socket.as_mut(), deadline).await;
        socket.close().await;
        outcome
    }

    /// Read frames until the relay answers for our event or `deadline` passes.
    async fn await_ok(&self, socket: &mut dyn RelaySocket, deadline: Instant) -> Outcome {
        let event_id = self.event.id.to_hex();
        let timed_out = || RelayError::Timeout(self.options.publish_timeout).to_string();
        let mut challenge: Option<String> = None;
        let mut authenticated = false;
        // Set when the relay asked for auth before sending its challenge.
        let mut awaiting_challenge: Option<(String, &SigningIdentity)> = None;

        loop {
            let message = match tokio::time::timeout_at(deadline, next_message(socket)).await {
                Ok(Ok(message)) => message,
                Ok(Err(e)) => {
                    return match awaiting_challenge {
                        Some((message, _)) => Outcome::AuthRequired(message),
                        None => Outcome::Error(e.to_string()),
                    }
                }
                Err(_) => {
                    return match awaiting_challenge {
                        Some((message, _)) => Outcome::AuthRequired(message),
                        None => Outcome::Error(timed_out()),
                    }
                }
            };

            match message {
                RelayMessage::Auth { challenge: c } => {
                    debug!(relay = %self.relay, "[publish] auth challenge received");
                    if let Some((_, identity)) = awaiting_challenge.take() {
                        if let Err(outcome) = self.authenticate_and_resend(socket, identity, &c, deadline).await {
                            return outcome;
                        }
                        authenticated = true;
                    }
                    challenge = Some(c);
                }
                RelayMessage::Notice { message } => {
                    debug!(relay = %self.relay, "[publish] notice: {}", message);
                }
                RelayMessage::Unknown { message_type } => {
                    debug!(relay = %self.relay, "[publish] skipping {} frame", message_type);
                }
                RelayMessage::Ok {
                    event_id: id,
                    accepted,
                    message,
                } if id == event_id => {
                    if accepted {
                        return Outcome::Published(message);
                    }
                    if !message.starts_with(AUTH_REQUIRED_PREFIX) {
                        return Outcome::Error(message);
                    }
                    if authenticated {
                        return Outcome::Error(message);
                    }
                    let Some(identity) = self.auth.as_ref().filter(|_| self.options.allow_auth) else {
                        return Outcome::AuthRequired(message);
                    };
                    let Some(challenge) = challenge.as_deref() else {
                        debug!(relay = %self.relay, "[publish] auth required, waiting for challenge");
                        awaiting_challenge = Some((message, identity));
                        continue;
                    };

                    if let Err(outcome) = self.authenticate_and_resend(socket, identity, challenge, deadline).await {
                        return outcome;
                    }
                    authenticated = true;
                }
                _ => {}
            }
        }
    }

    async fn authenticate_and_resend(
        &self,
        socket: &mut dyn RelaySocket,
        identity: &SigningIdentity,
        challenge: &str,
        deadline: Instant,
    ) -> Result<(), Outcome> {
        match tokio::time::timeout_at(deadline, self.authenticate(socket, identity, challenge)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(Outcome::Error(e)),
            Err(_) => {
                return Err(Outcome::Error(
                    RelayError::Timeout(self.options.publish_timeout).to_string(),
                ))
            }
        }

        let frame = ClientMessage::Event((*self.event).clone()).to_json();
        socket
            .send(frame)
            .await
            .map_err(|e| Outcome::Error(e.to_string()))
    }

    /// NIP-42: sign the challenge, send it and wait for the relay's OK.
    async fn authenticate(
        &self,
        socket: &mut dyn RelaySocket,
        identity: &SigningIdentity,
        challenge: &str,
    ) -> Result<(), String> {
        let unsigned = UnsignedEvent::client_auth(&self.relay, challenge);
        let auth_event = self
            .signer
            .sign_with_cancel(&unsigned, identity, &self.cancel)
            .await
            .map_err(|e| format!("auth signing failed: {}", e))?;
        let auth_id = auth_event.id.to_hex();

        info!(relay = %self.relay, "[publish] authenticating as {}", identity.pubkey());
        socket
            .send(ClientMessage::Auth(auth_event).to_json())
            .await
            .map_err(|e| e.to_string())?;

        loop {
            match next_message(socket).await.map_err(|e| e.to_string())? {
                RelayMessage::Ok {
                    event_id,
                    accepted,
                    message,
                } if event_id == auth_id => {
                    return if accepted {
                        Ok(())
                    } else {
                        Err(format!("auth rejected: {}", message))
                    };
                }
                _ => {}
            }
        }
    }
}

async fn next_message(socket: &mut dyn RelaySocket) -> Result<RelayMessage, RelayError> {
    match socket.recv().await {
        Some(Ok(text)) => RelayMessage::from_json(&text),
        Some(Err(e)) => Err(e),
        None => Err(RelayError::ConnectionClosed),
    }
}
