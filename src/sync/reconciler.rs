use std::collections::VecDeque;

use serde::Serialize;

use super::{PtyContent, SessionKey};
use crate::buffer::GrowableByteBuffer;
use crate::error::FetchError;
use crate::terminal::{TerminalModel, UsedRowsEstimator};

/// Lifecycle of a mirrored pty stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Nothing applied yet.
    Idle,
    /// A full reload is in flight; updates are queued.
    Reloading,
    Live,
    /// A reload failed or the mirror broke. Only a new reload recovers.
    Broken,
}

/// An update that arrived while a reload was in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    pub position: u64,
    pub payload: Vec<u8>,
}

/// What `receive_update` did with a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Applied in full.
    Applied,
    /// The first `skipped` bytes were already applied; the rest was.
    Trimmed { skipped: usize },
    /// Everything in the chunk was already applied.
    Duplicate,
    /// Bytes between the local offset and the chunk were lost; applied anyway.
    GapAccepted { missed: u64 },
    /// Held until the in-flight reload settles.
    Queued,
    /// The session is broken; nothing is written until a reload succeeds.
    Suppressed,
}

/// Snapshot published to the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub offset: u64,
    pub version: u64,
    pub used_rows: usize,
    pub load_error: Option<String>,
}

/// One remote pty mirrored into a terminal model.
///
/// Chunks are placed by offset arithmetic only: duplicates and overlaps are
/// trimmed, gaps are accepted by snapping forward, and nothing is reordered.
/// A full reload is split into [`begin_reload`](Self::begin_reload) and
/// [`complete_reload`](Self::complete_reload) so the caller can fetch in
/// between while updates keep arriving.
pub struct TermSession<M> {
    key: SessionKey,
    model: M,
    mirror: GrowableByteBuffer,
    /// Stream offset of `mirror[0]`.
    mirror_base: u64,
    offset: u64,
    state: SessionState,
    pending: VecDeque<PendingUpdate>,
    load_error: Option<String>,
    rows: UsedRowsEstimator,
    is_running: bool,
}

impl<M: TerminalModel> TermSession<M> {
    pub fn new(key: SessionKey, model: M, initial_capacity: usize) -> Self {
        Self {
            key,
            model,
            mirror: GrowableByteBuffer::new(initial_capacity),
            mirror_base: 0,
            offset: 0,
            state: SessionState::Idle,
            pending: VecDeque::new(),
            load_error: None,
            rows: UsedRowsEstimator::new(),
            is_running: true,
        }
    }

    /// Start a reload. Returns `false` when one is already in flight, in
    /// which case the request is coalesced into it.
    pub fn begin_reload(&mut self) -> bool {
        if self.state == SessionState::Reloading {
            log::debug!("reload of {} already in flight", self.key);
            return false;
        }
        log::info!("reloading {}", self.key);
        self.state = SessionState::Reloading;
        self.load_error = None;
        self.pending.clear();
        self.model.clear();
        self.rows.force_recompute();
        true
    }

    /// Finish the in-flight reload with the fetch result.
    ///
    /// On success the payload is written at the server's offset and every
    /// queued update is replayed in arrival order before this returns.
    pub fn complete_reload(&mut self, result: Result<PtyContent, FetchError>) {
        if self.state != SessionState::Reloading {
            log::warn!("ignoring reload result for {}: no reload in flight", self.key);
            return;
        }
        let content = match result {
            Ok(content) => content,
            Err(e) => {
                log::error!("reload of {} failed: {}", self.key, e);
                self.pending.clear();
                self.fail(e.to_string());
                return;
            }
        };

        self.rebase(content.offset);
        self.state = SessionState::Live;
        self.apply(&content.data);

        let replay = std::mem::take(&mut self.pending);
        log::debug!(
            "reload of {} applied {} bytes at {}, replaying {} queued updates",
            self.key,
            content.data.len(),
            content.offset,
            replay.len()
        );
        for update in replay {
            self.receive_update(update.position, &update.payload);
        }
    }

    /// Place a chunk that starts at stream offset `position`.
    pub fn receive_update(&mut self, position: u64, data: &[u8]) -> UpdateOutcome {
        match self.state {
            SessionState::Broken => return UpdateOutcome::Suppressed,
            SessionState::Reloading => {
                self.pending.push_back(PendingUpdate {
                    position,
                    payload: data.to_vec(),
                });
                return UpdateOutcome::Queued;
            }
            SessionState::Idle | SessionState::Live => {}
        }

        if position > self.offset {
            let missed = position - self.offset;
            log::warn!(
                "gap in {}: local offset {}, update at {}, {} bytes lost",
                self.key,
                self.offset,
                position,
                missed
            );
            self.rebase(position);
            self.apply(data);
            return UpdateOutcome::GapAccepted { missed };
        }

        if position < self.offset {
            let diff = self.offset - position;
            if diff >= data.len() as u64 {
                log::trace!("{}: dropping duplicate update at {}", self.key, position);
                return UpdateOutcome::Duplicate;
            }
            let skipped = diff as usize;
            self.apply(&data[skipped..]);
            return UpdateOutcome::Trimmed { skipped };
        }

        self.apply(data);
        UpdateOutcome::Applied
    }

    fn apply(&mut self, data: &[u8]) {
        if self.state == SessionState::Broken {
            return;
        }
        self.state = SessionState::Live;
        if data.is_empty() {
            return;
        }
        if let Err(e) = self.mirror.append(self.offset - self.mirror_base, data) {
            log::error!("mirror of {} broke: {}", self.key, e);
            self.fail(e.to_string());
            return;
        }
        self.model.write(data);
        self.offset += data.len() as u64;
    }

    /// Restart the mirror so that it begins at `offset`.
    fn rebase(&mut self, offset: u64) {
        self.mirror.reset();
        self.mirror_base = offset;
        self.offset = offset;
    }

    fn fail(&mut self, reason: String) {
        self.state = SessionState::Broken;
        self.load_error = Some(reason);
    }

    pub fn resize(&mut self, cols: usize, rows: usize) {
        self.model.resize(cols, rows);
        self.rows.force_recompute();
    }

    pub fn set_running(&mut self, is_running: bool) {
        self.is_running = is_running;
    }

    /// Current row-count estimate.
    pub fn used_rows(&mut self) -> usize {
        self.rows.estimate(&self.model, self.is_running)
    }

    pub fn status(&mut self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            offset: self.offset,
            version: self.mirror.version(),
            used_rows: self.used_rows(),
            load_error: self.load_error.clone(),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_reloading(&self) -> bool {
        self.state == SessionState::Reloading
    }

    /// Stream offset of the next expected byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Mirrored bytes and the stream offset of the first one.
    pub fn mirror(&self) -> (u64, &[u8]) {
        (self.mirror_base, self.mirror.snapshot())
    }

    pub fn version(&self) -> u64 {
        self.mirror.version()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    pub fn model(&self) -> &M {
        &self.model
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Terminal model that records every write.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingModel {
        pub writes: Arc<Mutex<Vec<Vec<u8>>>>,
        pub clears: Arc<Mutex<usize>>,
    }

    impl RecordingModel {
        pub fn written(&self) -> Vec<u8> {
            self.writes.lock().unwrap().concat()
        }
    }

    impl TerminalModel for RecordingModel {
        fn write(&mut self, data: &[u8]) {
            self.writes.lock().unwrap().push(data.to_vec());
        }
        fn clear(&mut self) {
            self.writes.lock().unwrap().clear();
            *self.clears.lock().unwrap() += 1;
        }
        fn resize(&mut self, _cols: usize, _rows: usize) {}
        fn rows(&self) -> usize {
            24
        }
        fn line_count(&self) -> usize {
            24
        }
        fn cursor_row(&self) -> usize {
            0
        }
        fn row_is_blank(&self, _row: usize) -> bool {
            true
        }
    }

    fn session() -> (TermSession<RecordingModel>, RecordingModel) {
        let model = RecordingModel::default();
        (TermSession::new(SessionKey::command("s1", "l1"), model.clone(), 16), model)
    }

    fn loaded(offset: u64, data: &[u8]) -> (TermSession<RecordingModel>, RecordingModel) {
        let (mut s, model) = session();
        assert!(s.begin_reload());
        s.complete_reload(Ok(PtyContent { offset, data: data.to_vec() }));
        (s, model)
    }

    #[test]
    fn test_contiguous_updates_apply() {
        let (mut s, model) = session();
        assert_eq!(s.state(), SessionState::Idle);
        assert_eq!(s.receive_update(0, b"abc"), UpdateOutcome::Applied);
        assert_eq!(s.receive_update(3, b"def"), UpdateOutcome::Applied);
        assert_eq!(s.state(), SessionState::Live);
        assert_eq!(s.offset(), 6);
        assert_eq!(model.written(), b"abcdef");
        assert_eq!(s.mirror(), (0, &b"abcdef"[..]));
    }

    #[test]
    fn test_overlap_trimming_is_idempotent() {
        let payload: Vec<u8> = (0u8..100).collect();
        let (mut s, model) = loaded(0, &payload);
        assert_eq!(s.offset(), 100);

        let chunk: Vec<u8> = (90u8..110).collect();
        assert_eq!(s.receive_update(90, &chunk), UpdateOutcome::Trimmed { skipped: 10 });
        assert_eq!(s.offset(), 110);
        assert_eq!(model.writes.lock().unwrap().last().unwrap(), &chunk[10..].to_vec());

        let writes_before = model.writes.lock().unwrap().len();
        assert_eq!(s.receive_update(90, &chunk), UpdateOutcome::Duplicate);
        assert_eq!(s.offset(), 110);
        assert_eq!(model.writes.lock().unwrap().len(), writes_before);
        assert_eq!(s.mirror().1, (0u8..110).collect::<Vec<_>>().as_slice());
    }

    #[test]
    fn test_gap_snaps_forward() {
        let (mut s, model) = loaded(0, b"0123");
        assert_eq!(s.receive_update(10, b"xy"), UpdateOutcome::GapAccepted { missed: 6 });
        assert_eq!(s.offset(), 12);
        assert_eq!(model.written(), b"0123xy");
        // the mirror restarts at the gap
        assert_eq!(s.mirror(), (10, &b"xy"[..]));
        assert_eq!(s.receive_update(12, b"z"), UpdateOutcome::Applied);
        assert_eq!(s.mirror(), (10, &b"xyz"[..]));
    }

    #[test]
    fn test_reload_replays_in_arrival_order() {
        let (mut s, model) = session();
        s.receive_update(0, b"stale");
        assert!(s.begin_reload());
        assert_eq!(*model.clears.lock().unwrap(), 1);
        assert!(model.written().is_empty());

        assert_eq!(s.receive_update(5, b"U1"), UpdateOutcome::Queued);
        assert_eq!(s.receive_update(7, b"U2"), UpdateOutcome::Queued);
        assert_eq!(s.receive_update(9, b"U3"), UpdateOutcome::Queued);
        assert_eq!(s.pending_len(), 3);

        s.complete_reload(Ok(PtyContent { offset: 0, data: b"hello".to_vec() }));
        let writes = model.writes.lock().unwrap().clone();
        let expected: Vec<Vec<u8>> = vec![b"hello".to_vec(), b"U1".to_vec(), b"U2".to_vec(), b"U3".to_vec()];
        assert_eq!(writes, expected);
        assert_eq!(s.pending_len(), 0);
        assert!(!s.is_reloading());
        assert_eq!(s.offset(), 11);
    }

    #[test]
    fn test_replay_trims_updates_covered_by_payload() {
        let (mut s, model) = session();
        s.begin_reload();
        // arrived during the fetch but the fetched payload already has them
        s.receive_update(0, b"hel");
        s.receive_update(3, b"lo wo");
        s.complete_reload(Ok(PtyContent { offset: 0, data: b"hello".to_vec() }));
        assert_eq!(model.written(), b"hello wo");
        assert_eq!(s.offset(), 8);
    }

    #[test]
    fn test_reload_at_nonzero_offset() {
        let (mut s, model) = loaded(1000, b"tail");
        assert_eq!(s.offset(), 1004);
        assert_eq!(s.mirror(), (1000, &b"tail"[..]));
        assert_eq!(s.receive_update(1004, b"!"), UpdateOutcome::Applied);
        assert_eq!(model.written(), b"tail!");
    }

    #[test]
    fn test_second_reload_is_coalesced() {
        let (mut s, model) = session();
        assert!(s.begin_reload());
        assert!(!s.begin_reload());
        assert_eq!(*model.clears.lock().unwrap(), 1);
    }

    #[test]
    fn test_failed_reload_breaks_session() {
        let (mut s, model) = session();
        s.begin_reload();
        s.receive_update(0, b"queued");
        s.complete_reload(Err(FetchError::HttpStatus { status: 500, body: String::new() }));
        assert_eq!(s.state(), SessionState::Broken);
        assert_eq!(s.pending_len(), 0);
        assert!(s.load_error().unwrap().contains("500"));

        assert_eq!(s.receive_update(0, b"more"), UpdateOutcome::Suppressed);
        assert!(model.written().is_empty());

        // retrying the reload is the way out
        assert!(s.begin_reload());
        assert!(s.load_error().is_none());
        s.complete_reload(Ok(PtyContent { offset: 0, data: b"ok".to_vec() }));
        assert_eq!(s.state(), SessionState::Live);
        assert_eq!(model.written(), b"ok");
    }

    #[test]
    fn test_stray_reload_result_ignored() {
        let (mut s, model) = loaded(0, b"abc");
        s.complete_reload(Ok(PtyContent { offset: 0, data: b"zzz".to_vec() }));
        assert_eq!(model.written(), b"abc");
        assert_eq!(s.offset(), 3);
    }

    #[test]
    fn test_resize_recomputes_latched_rows() {
        let emulator = crate::terminal::VtEmulator::new(20, 4);
        let mut s = TermSession::new(SessionKey::remote("r1"), emulator, 16);
        s.receive_update(0, b"1\r\n2\r\n3\r\n4\r\n5");
        assert_eq!(s.used_rows(), 4);

        s.resize(20, 10);
        // output still overflowed, so the new full height is the answer
        assert_eq!(s.used_rows(), 10);

        s.resize(20, 2);
        assert_eq!(s.used_rows(), 2);
    }

    #[test]
    fn test_status_tracks_version() {
        let (mut s, _model) = session();
        let before = s.status();
        s.receive_update(0, b"x");
        let after = s.status();
        assert!(after.version > before.version);
        assert_eq!(after.offset, 1);
        assert_eq!(after.state, SessionState::Live);
    }
}
