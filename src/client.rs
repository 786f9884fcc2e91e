//! Application-root context: one transport, one fetcher, and the renderers
//! pty data is routed to. Constructed explicitly and passed down; nothing
//! here is global.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use serde_json::json;
use tokio::sync::mpsc;
use url::Url;

use crate::buffer::GrowableByteBuffer;
use crate::config::{ClientConfig, TerminalConfig};
use crate::packet::framer::{PacketCallback, PacketFramer};
use crate::sync::{spawn_session, HttpPtyFetcher, PtyFetcher, SessionHandle, SessionKey, TermSession};
use crate::terminal::VtEmulator;
use crate::transport::{spawn_transport, PtyUpdate, TransportHandle};

/// Where a session's pty bytes go.
pub enum Renderer {
    /// Reconciled into a terminal emulator.
    Terminal(SessionHandle),
    /// Line-framed packets for structured viewers.
    Packet(PacketFramer),
    /// Raw bytes collected as-is.
    Blob(GrowableByteBuffer),
}

/// The open renderers, keyed by session.
pub struct SessionRegistry {
    fetcher: Arc<dyn PtyFetcher>,
    terminal: TerminalConfig,
    renderers: HashMap<SessionKey, Renderer>,
}

impl SessionRegistry {
    pub fn new(fetcher: Arc<dyn PtyFetcher>, terminal: TerminalConfig) -> Self {
        Self {
            fetcher,
            terminal,
            renderers: HashMap::new(),
        }
    }

    /// Start a terminal session and its initial reload. Reopening an open key
    /// returns the existing handle.
    pub fn open_terminal(&mut self, key: SessionKey) -> SessionHandle {
        if let Some(Renderer::Terminal(handle)) = self.renderers.get(&key) {
            return handle.clone();
        }
        let emulator = VtEmulator::with_scrollback(
            self.terminal.cols as usize,
            self.terminal.rows as usize,
            self.terminal.scrollback,
        );
        let session = TermSession::new(key.clone(), emulator, self.terminal.initial_buffer_capacity);
        let handle = spawn_session(session, self.fetcher.clone(), self.terminal.settle_delay());
        if handle.reload().is_err() {
            log::warn!("session {} exited before its first reload", key);
        }
        log::info!("opened terminal session {}", key);
        self.renderers.insert(key, Renderer::Terminal(handle.clone()));
        handle
    }

    pub fn open_packets(&mut self, key: SessionKey, on_packet: PacketCallback) {
        let framer = PacketFramer::new(self.terminal.initial_buffer_capacity, on_packet);
        log::info!("opened packet stream {}", key);
        self.renderers.insert(key, Renderer::Packet(framer));
    }

    pub fn open_blob(&mut self, key: SessionKey) {
        let buffer = GrowableByteBuffer::new(self.terminal.initial_buffer_capacity);
        log::info!("opened blob stream {}", key);
        self.renderers.insert(key, Renderer::Blob(buffer));
    }

    /// Remove a renderer, stopping its session task if it has one.
    pub fn close(&mut self, key: &SessionKey) -> bool {
        match self.renderers.remove(key) {
            Some(Renderer::Terminal(handle)) => {
                let _ = handle.close();
                true
            }
            Some(Renderer::Packet(_)) | Some(Renderer::Blob(_)) => true,
            None => false,
        }
    }

    /// Hand a chunk to the renderer for `key`. Returns `false` when no
    /// renderer is open for it.
    pub fn deliver(&mut self, key: &SessionKey, position: u64, data: Vec<u8>) -> bool {
        let closed = match self.renderers.get_mut(key) {
            None => {
                log::trace!("no renderer for {}, dropping {} bytes", key, data.len());
                return false;
            }
            Some(Renderer::Terminal(handle)) => handle.update(position, data).is_err(),
            Some(Renderer::Packet(framer)) => {
                framer.feed(position, &data);
                false
            }
            Some(Renderer::Blob(buffer)) => {
                if let Err(e) = buffer.append(position, &data) {
                    log::warn!("blob {} dropped {} bytes: {}", key, data.len(), e);
                }
                false
            }
        };
        if closed {
            log::debug!("session {} has exited, removing it", key);
            self.renderers.remove(key);
            return false;
        }
        true
    }

    /// Route a transport update to its renderer.
    pub fn route(&mut self, update: PtyUpdate) -> bool {
        let Some(key) = update.key() else {
            log::warn!("pty update at {} names no session", update.position);
            return false;
        };
        match update.payload() {
            Ok(data) => self.deliver(&key, update.position, data),
            Err(e) => {
                log::warn!("bad pty payload for {}: {}", key, e);
                false
            }
        }
    }

    pub fn get(&self, key: &SessionKey) -> Option<&Renderer> {
        self.renderers.get(key)
    }

    pub fn len(&self) -> usize {
        self.renderers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renderers.is_empty()
    }
}

/// Transport plus registry, wired together.
pub struct Client {
    registry: SessionRegistry,
    transport: TransportHandle,
    deliveries: mpsc::UnboundedReceiver<PtyUpdate>,
}

impl Client {
    /// Build the fetcher and start the transport. Needs a tokio runtime.
    pub fn connect(config: ClientConfig) -> anyhow::Result<Self> {
        let base_url = Url::parse(&config.server_url)
            .with_context(|| format!("invalid server url {:?}", config.server_url))?;
        let fetcher = HttpPtyFetcher::new(base_url, config.auth_key.clone(), config.fetch_timeout())
            .context("building http client")?;

        let open_message = config.auth_key.as_ref().map(|auth_key| {
            json!({
                "type": "watchscreen",
                "connect": true,
                "authkey": auth_key,
                "clientid": config.client_id,
            })
        });
        let (delivery_tx, deliveries) = mpsc::unbounded_channel();
        let transport = spawn_transport(
            config.ws_url.clone(),
            config.transport.clone(),
            open_message,
            delivery_tx,
        );
        log::info!("client started for {}", config.server_url);

        Ok(Self {
            registry: SessionRegistry::new(Arc::new(fetcher), config.terminal),
            transport,
            deliveries,
        })
    }

    pub fn registry(&mut self) -> &mut SessionRegistry {
        &mut self.registry
    }

    pub fn transport(&self) -> &TransportHandle {
        &self.transport
    }

    /// Route transport deliveries until the transport shuts down.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        while let Some(update) = self.deliveries.recv().await {
            self.registry.route(update);
        }
        anyhow::bail!("transport closed")
    }

    pub fn shutdown(&mut self) {
        let _ = self.transport.shutdown();
        let keys: Vec<SessionKey> = self.registry.renderers.keys().cloned().collect();
        for key in keys {
            self.registry.close(&key);
        }
    }
}
