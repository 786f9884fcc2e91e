//! Drives a [`TermSession`] from a single work queue.
//!
//! Every mutation happens on the session task, one command at a time. A
//! reload fetch runs as its own task and posts the result back into the
//! queue after the settle delay, so updates that arrive meanwhile are queued
//! by the session and replayed behind the reload payload.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use super::{PtyContent, PtyFetcher, SessionKey, SessionStatus, TermSession};
use crate::error::{FetchError, SessionClosed};
use crate::terminal::TerminalModel;

enum Command {
    Update { position: u64, data: Vec<u8> },
    Reload,
    ReloadDone(Result<PtyContent, FetchError>),
    Resize { cols: usize, rows: usize },
    SetRunning(bool),
    Close,
}

/// Cheap, cloneable handle to a running session task.
#[derive(Clone)]
pub struct SessionHandle {
    key: SessionKey,
    tx: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Deliver a chunk that starts at stream offset `position`.
    pub fn update(&self, position: u64, data: Vec<u8>) -> Result<(), SessionClosed> {
        self.send(Command::Update { position, data })
    }

    /// Request a full reload; coalesced if one is in flight.
    pub fn reload(&self) -> Result<(), SessionClosed> {
        self.send(Command::Reload)
    }

    pub fn resize(&self, cols: usize, rows: usize) -> Result<(), SessionClosed> {
        self.send(Command::Resize { cols, rows })
    }

    pub fn set_running(&self, is_running: bool) -> Result<(), SessionClosed> {
        self.send(Command::SetRunning(is_running))
    }

    /// Stop the task; queued commands ahead of this one still run.
    pub fn close(&self) -> Result<(), SessionClosed> {
        self.send(Command::Close)
    }

    /// Latest published status.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Receiver that wakes whenever the status changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    fn send(&self, command: Command) -> Result<(), SessionClosed> {
        self.tx.send(command).map_err(|_| SessionClosed)
    }
}

/// Spawn the task that owns `session`. Must be called inside a tokio runtime.
pub fn spawn_session<M>(
    mut session: TermSession<M>,
    fetcher: Arc<dyn PtyFetcher>,
    settle_delay: Duration,
) -> SessionHandle
where
    M: TerminalModel + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(session.status());
    let key = session.key().clone();

    let worker = Worker {
        fetcher,
        settle_delay,
        loopback: tx.downgrade(),
        status: status_tx,
    };
    tokio::spawn(worker.run(session, rx));

    SessionHandle {
        key,
        tx,
        status: status_rx,
    }
}

struct Worker {
    fetcher: Arc<dyn PtyFetcher>,
    settle_delay: Duration,
    /// Weak so the task still ends once every handle is dropped.
    loopback: mpsc::WeakUnboundedSender<Command>,
    status: watch::Sender<SessionStatus>,
}

impl Worker {
    async fn run<M: TerminalModel>(
        self,
        mut session: TermSession<M>,
        mut rx: mpsc::UnboundedReceiver<Command>,
    ) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Update { position, data } => {
                    session.receive_update(position, &data);
                }
                Command::Reload => {
                    if session.begin_reload() {
                        self.start_fetch(session.key().clone());
                    }
                }
                Command::ReloadDone(result) => session.complete_reload(result),
                Command::Resize { cols, rows } => session.resize(cols, rows),
                Command::SetRunning(is_running) => session.set_running(is_running),
                Command::Close => break,
            }
            self.status.send_if_modified(|current| {
                let next = session.status();
                if *current == next {
                    return false;
                }
                *current = next;
                true
            });
        }
        log::debug!("session task for {} exiting", session.key());
    }

    fn start_fetch(&self, key: SessionKey) {
        let Some(tx) = self.loopback.upgrade() else {
            log::debug!("not fetching {}: no handles left", key);
            return;
        };
        let fetcher = self.fetcher.clone();
        let settle_delay = self.settle_delay;
        tokio::spawn(async move {
            let result = fetcher.fetch(&key).await;
            if result.is_ok() && !settle_delay.is_zero() {
                tokio::time::sleep(settle_delay).await;
            }
            let _ = tx.send(Command::ReloadDone(result));
        });
    }
}
