//! Connection bookkeeping, independent of the socket.
//!
//! [`Connection`] decides when to reconnect, what to queue, and which
//! callback a response belongs to. The socket task feeds it events and
//! carries out its decisions.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use super::{PtyUpdate, CMD_DATA_TYPE, HELLO_TYPE, PING_TYPE, PONG_TYPE, PTY_TYPE};
use crate::config::TransportConfig;
use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Closed,
    Opening,
    Open,
    /// Gave up reconnecting; only a manual reconnect leaves this state.
    Exhausted,
}

/// What to do after the connection dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Retry { attempt: u32, delay: Duration },
    GiveUp,
}

/// Invoked exactly once with the response to a request, or its failure.
pub type ResponseCallback = Box<dyn FnOnce(Result<Value, TransportError>) + Send>;

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// The peer wants a pong.
    Ping,
    Pong,
    /// Handshake ack; the connection is trusted from here on.
    Hello,
    /// A `cmddata` response. `matched` is false when no request was waiting.
    Response { request_id: String, matched: bool },
    Pty(PtyUpdate),
    /// Unknown or malformed message type, ignored.
    Ignored(String),
}

pub struct Connection {
    state: ConnectionState,
    attempt: u32,
    schedule: Vec<Duration>,
    max_attempts: u32,
    fail_pending_on_disconnect: bool,
    outbound: VecDeque<Value>,
    pending: HashMap<String, ResponseCallback>,
}

impl Connection {
    pub fn new(config: &TransportConfig) -> Self {
        let mut schedule: Vec<Duration> = config
            .reconnect_schedule_secs
            .iter()
            .map(|&secs| Duration::from_secs(secs))
            .collect();
        if schedule.is_empty() {
            schedule.push(Duration::ZERO);
        }
        Self {
            state: ConnectionState::Closed,
            attempt: 0,
            schedule,
            max_attempts: config.max_reconnect_attempts,
            fail_pending_on_disconnect: config.fail_pending_on_disconnect,
            outbound: VecDeque::new(),
            pending: HashMap::new(),
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let index = (attempt.max(1) as usize - 1).min(self.schedule.len() - 1);
        self.schedule[index]
    }

    /// Move to `Opening`. Returns `false` once the transport has given up.
    pub fn begin_connect(&mut self) -> bool {
        if self.state == ConnectionState::Exhausted {
            return false;
        }
        self.state = ConnectionState::Opening;
        true
    }

    pub fn on_open(&mut self) {
        self.state = ConnectionState::Open;
        log::info!(
            "transport open (attempt {}, {} queued messages)",
            self.attempt,
            self.outbound.len()
        );
    }

    /// Handshake received: only now is the retry budget restored.
    pub fn on_hello(&mut self) {
        if self.attempt > 0 {
            log::debug!("handshake received, resetting {} reconnect attempts", self.attempt);
        }
        self.attempt = 0;
    }

    /// Record a failed connect or a dropped connection.
    pub fn on_disconnect(&mut self) -> ReconnectDecision {
        self.state = ConnectionState::Closed;
        if self.fail_pending_on_disconnect {
            self.fail_pending();
        }

        self.attempt += 1;
        if self.attempt > self.max_attempts {
            log::error!("cannot connect, giving up after {} attempts", self.max_attempts);
            self.state = ConnectionState::Exhausted;
            self.give_up();
            return ReconnectDecision::GiveUp;
        }
        let delay = self.backoff_delay(self.attempt);
        log::info!("transport closed, reconnect attempt {} in {:?}", self.attempt, delay);
        ReconnectDecision::Retry {
            attempt: self.attempt,
            delay,
        }
    }

    /// A user-requested reconnect restores the full retry budget.
    pub fn manual_reconnect(&mut self) {
        self.attempt = 0;
        if self.state == ConnectionState::Exhausted {
            self.state = ConnectionState::Closed;
        }
    }

    fn exhausted_error(&self) -> TransportError {
        TransportError::Exhausted {
            attempts: self.max_attempts,
        }
    }

    /// Nothing will be sent until a manual reconnect, so every waiting
    /// request fails and the backlog is dropped.
    fn give_up(&mut self) {
        if !self.outbound.is_empty() {
            log::warn!("dropping {} queued messages", self.outbound.len());
            self.outbound.clear();
        }
        let attempts = self.max_attempts;
        for (_, callback) in self.pending.drain() {
            callback(Err(TransportError::Exhausted { attempts }));
        }
    }

    fn fail_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        log::warn!("failing {} pending requests on disconnect", self.pending.len());
        for (_, callback) in self.pending.drain() {
            callback(Err(TransportError::Disconnected));
        }
    }

    /// Queue `message`, or hand it back when it can go out right away.
    ///
    /// While a backlog exists new messages join its tail so the peer sees
    /// them in submission order.
    pub fn enqueue(&mut self, message: Value) -> Option<Value> {
        if self.state == ConnectionState::Exhausted {
            log::warn!("transport has given up, dropping outbound message");
            return None;
        }
        if self.state == ConnectionState::Open && self.outbound.is_empty() {
            return Some(message);
        }
        self.outbound.push_back(message);
        None
    }

    /// Put back a message whose send failed so it goes out first next time.
    pub fn requeue_front(&mut self, message: Value) {
        if self.state == ConnectionState::Exhausted {
            return;
        }
        self.outbound.push_front(message);
    }

    /// Next queued message for this pacing tick, if open.
    pub fn next_paced(&mut self) -> Option<Value> {
        if self.state != ConnectionState::Open {
            return None;
        }
        self.outbound.pop_front()
    }

    /// Store `callback` under `request_id`, then enqueue `message`.
    pub fn register_and_send(
        &mut self,
        request_id: String,
        message: Value,
        callback: ResponseCallback,
    ) -> Option<Value> {
        if self.state == ConnectionState::Exhausted {
            log::warn!("transport has given up, failing request {}", request_id);
            callback(Err(self.exhausted_error()));
            return None;
        }
        if let Some(previous) = self.pending.insert(request_id.clone(), callback) {
            log::warn!("request id {} reused while still pending", request_id);
            previous(Err(TransportError::DuplicateRequest(request_id)));
        }
        self.enqueue(message)
    }

    /// Drop a pending request without invoking its callback.
    pub fn cancel(&mut self, request_id: &str) -> bool {
        self.pending.remove(request_id).is_some()
    }

    /// Decode one text frame and settle any request it answers.
    pub fn handle_inbound(&mut self, text: &str) -> Result<Inbound, TransportError> {
        let message: Value = serde_json::from_str(text)?;
        let kind = message
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let inbound = match kind.as_str() {
            PING_TYPE => Inbound::Ping,
            PONG_TYPE => Inbound::Pong,
            HELLO_TYPE => {
                self.on_hello();
                Inbound::Hello
            }
            CMD_DATA_TYPE => match message.get("respid").and_then(Value::as_str) {
                Some(request_id) => {
                    let request_id = request_id.to_string();
                    let matched = match self.pending.remove(&request_id) {
                        Some(callback) => {
                            callback(Ok(message));
                            true
                        }
                        None => {
                            log::warn!("response {} matches no pending request", request_id);
                            false
                        }
                    };
                    Inbound::Response { request_id, matched }
                }
                None => {
                    log::warn!("cmddata message without respid");
                    Inbound::Ignored(kind)
                }
            },
            PTY_TYPE => Inbound::Pty(serde_json::from_value(message)?),
            _ => {
                log::warn!("ignoring message with unknown type {:?}", kind);
                Inbound::Ignored(kind)
            }
        };
        Ok(inbound)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn queue_len(&self) -> usize {
        self.outbound.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
