use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::connection::{Connection, ConnectionState, Inbound, ReconnectDecision, ResponseCallback};
use super::{ping_message, pong_message, PtyUpdate};
use crate::config::TransportConfig;
use crate::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Control {
    Send(Value),
    Request {
        request_id: String,
        message: Value,
        callback: ResponseCallback,
    },
    Cancel(String),
    Reconnect,
    Shutdown,
}

/// How a connected session ended.
enum Exit {
    Dropped,
    Reconnect,
    Shutdown,
}

/// Handle to the transport task. Cloning shares the same connection.
#[derive(Clone)]
pub struct TransportHandle {
    tx: mpsc::UnboundedSender<Control>,
    state: watch::Receiver<ConnectionState>,
}

impl TransportHandle {
    /// Send a message, queuing it while disconnected.
    pub fn send(&self, message: Value) -> Result<(), TransportError> {
        self.control(Control::Send(message))
    }

    /// Register `callback` under `request_id` and send `message`.
    pub fn register_and_send(
        &self,
        request_id: impl Into<String>,
        message: Value,
        callback: ResponseCallback,
    ) -> Result<(), TransportError> {
        self.control(Control::Request {
            request_id: request_id.into(),
            message,
            callback,
        })
    }

    /// Send a request and wait for the `cmddata` response carrying its id.
    pub async fn request(
        &self,
        request_id: impl Into<String>,
        message: Value,
    ) -> Result<Value, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.register_and_send(
            request_id,
            message,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        )?;
        rx.await.map_err(|_| TransportError::Closed)?
    }

    pub fn cancel(&self, request_id: impl Into<String>) -> Result<(), TransportError> {
        self.control(Control::Cancel(request_id.into()))
    }

    /// Close and reopen the connection with a fresh retry budget.
    pub fn reconnect(&self) -> Result<(), TransportError> {
        self.control(Control::Reconnect)
    }

    pub fn shutdown(&self) -> Result<(), TransportError> {
        self.control(Control::Shutdown)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    fn control(&self, control: Control) -> Result<(), TransportError> {
        self.tx.send(control).map_err(|_| TransportError::Closed)
    }
}

/// Spawn the transport task for `url`.
///
/// Pty updates are forwarded to `deliveries`. `open_message`, when set, is
/// sent first on every new connection (e.g. the screen-watch request that
/// carries the auth key).
pub fn spawn_transport(
    url: String,
    config: TransportConfig,
    open_message: Option<Value>,
    deliveries: mpsc::UnboundedSender<PtyUpdate>,
) -> TransportHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Closed);
    let driver = Driver {
        url,
        conn: Connection::new(&config),
        config,
        open_message,
        rx,
        state: state_tx,
        deliveries,
    };
    tokio::spawn(driver.run());
    TransportHandle { tx, state: state_rx }
}

struct Driver {
    url: String,
    config: TransportConfig,
    conn: Connection,
    open_message: Option<Value>,
    rx: mpsc::UnboundedReceiver<Control>,
    state: watch::Sender<ConnectionState>,
    deliveries: mpsc::UnboundedSender<PtyUpdate>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            if !self.conn.begin_connect() {
                self.publish();
                // exhausted: only a manual reconnect brings us back
                match self.idle(None).await {
                    Exit::Shutdown => break,
                    _ => continue,
                }
            }
            self.publish();

            let connect = connect_async(self.url.as_str());
            let exit = match tokio::time::timeout(self.config.connect_timeout(), connect).await {
                Ok(Ok((ws, _))) => {
                    self.conn.on_open();
                    self.publish();
                    self.serve(ws).await
                }
                Ok(Err(e)) => {
                    log::warn!("connecting to {} failed: {}", self.url, e);
                    Exit::Dropped
                }
                Err(_) => {
                    log::warn!("connecting to {} timed out", self.url);
                    Exit::Dropped
                }
            };

            match exit {
                Exit::Shutdown => break,
                Exit::Reconnect => {
                    self.conn.on_disconnect();
                    self.conn.manual_reconnect();
                    continue;
                }
                Exit::Dropped => {}
            }
            let decision = self.conn.on_disconnect();
            self.publish();
            if let ReconnectDecision::Retry { delay, .. } = decision {
                if let Exit::Shutdown = self.idle(Some(delay)).await {
                    break;
                }
            }
        }
        self.state.send_replace(ConnectionState::Closed);
        log::info!("transport to {} shut down", self.url);
    }

    fn publish(&self) {
        self.state.send_if_modified(|current| {
            let next = self.conn.state();
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    /// Wait out a backoff delay (or forever when `None`) while disconnected,
    /// queuing whatever the caller sends meanwhile.
    async fn idle(&mut self, delay: Option<Duration>) -> Exit {
        let deadline = delay.map(|d| Instant::now() + d);
        loop {
            let control = match deadline {
                Some(deadline) => tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => return Exit::Dropped,
                    control = self.rx.recv() => control,
                },
                None => self.rx.recv().await,
            };
            match control {
                Some(Control::Send(message)) => {
                    self.conn.enqueue(message);
                }
                Some(Control::Request { request_id, message, callback }) => {
                    self.conn.register_and_send(request_id, message, callback);
                }
                Some(Control::Cancel(request_id)) => {
                    self.conn.cancel(&request_id);
                }
                Some(Control::Reconnect) => {
                    self.conn.manual_reconnect();
                    return Exit::Reconnect;
                }
                Some(Control::Shutdown) | None => return Exit::Shutdown,
            }
        }
    }

    async fn serve(&mut self, ws: WsStream) -> Exit {
        let (mut sink, mut stream) = ws.split();

        if let Some(message) = self.open_message.clone() {
            if let Err(e) = send_json(&mut sink, &message).await {
                log::warn!("sending open message failed: {}", e);
                return Exit::Dropped;
            }
        }

        let mut pacing = interval(self.config.pacing_interval());
        pacing.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let heartbeat_every = self.config.heartbeat_interval();
        let mut heartbeat = interval_at(Instant::now() + heartbeat_every, heartbeat_every);

        loop {
            // `requeue`: the message came from the outbound queue and must not
            // be lost if the send fails
            let (outgoing, requeue) = tokio::select! {
                inbound = stream.next() => match self.on_frame(inbound) {
                    Ok(reply) => (reply, false),
                    Err(exit) => return exit,
                },
                control = self.rx.recv() => match control {
                    Some(Control::Send(message)) => (self.conn.enqueue(message), true),
                    Some(Control::Request { request_id, message, callback }) => {
                        (self.conn.register_and_send(request_id, message, callback), true)
                    }
                    Some(Control::Cancel(request_id)) => {
                        self.conn.cancel(&request_id);
                        (None, false)
                    }
                    Some(Control::Reconnect) => {
                        log::info!("manual reconnect requested");
                        close(&mut sink).await;
                        return Exit::Reconnect;
                    }
                    Some(Control::Shutdown) | None => {
                        close(&mut sink).await;
                        return Exit::Shutdown;
                    }
                },
                _ = pacing.tick() => (self.conn.next_paced(), true),
                _ = heartbeat.tick() => (Some(ping_message()), false),
            };

            if let Some(message) = outgoing {
                if let Err(e) = send_json(&mut sink, &message).await {
                    log::warn!("websocket send failed: {}", e);
                    if requeue {
                        self.conn.requeue_front(message);
                    }
                    return Exit::Dropped;
                }
            }
        }
    }

    /// Handle one inbound frame, returning an immediate reply if one is due.
    fn on_frame(
        &mut self,
        frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) -> Result<Option<Value>, Exit> {
        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => {
                log::info!("websocket closed by peer");
                return Err(Exit::Dropped);
            }
            Some(Ok(_)) => return Ok(None),
            Some(Err(e)) => {
                log::warn!("websocket error: {}", e);
                return Err(Exit::Dropped);
            }
        };

        match self.conn.handle_inbound(&text) {
            Ok(Inbound::Ping) => return Ok(Some(pong_message())),
            Ok(Inbound::Pty(update)) => {
                if self.deliveries.send(update).is_err() {
                    log::debug!("dropping pty update: no receiver");
                }
            }
            Ok(_) => {}
            Err(e) => log::warn!("bad inbound message: {}", e),
        }
        Ok(None)
    }
}

async fn send_json(
    sink: &mut SplitSink<WsStream, Message>,
    message: &Value,
) -> Result<(), TransportError> {
    let text = serde_json::to_string(message)?;
    sink.send(Message::Text(text)).await?;
    Ok(())
}

async fn close(sink: &mut SplitSink<WsStream, Message>) {
    if let Err(e) = sink.close().await {
        log::debug!("closing websocket: {}", e);
    }
}
