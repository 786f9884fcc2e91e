use super::TerminalModel;

/// Computes how many viewport rows are actually used so a flex-rows view can
/// size itself without reflowing on every byte.
///
/// Once output has scrolled past the viewport the answer is always the full
/// height, so the estimator latches and skips all work until a resize calls
/// [`force_recompute`](Self::force_recompute).
#[derive(Debug, Default, Clone)]
pub struct UsedRowsEstimator {
    latched: bool,
    last: usize,
}

impl UsedRowsEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn estimate<M: TerminalModel + ?Sized>(&mut self, model: &M, is_running: bool) -> usize {
        if self.latched {
            return self.last;
        }
        let rows = model.rows();
        if model.line_count() > rows {
            self.latched = true;
            self.last = rows;
            return rows;
        }

        let mut used = if is_running { 1 } else { 0 };
        if is_running {
            used = used.max(model.cursor_row() + 1);
        }
        if let Some(row) = (used..rows).rev().find(|&row| !model.row_is_blank(row)) {
            used = row + 1;
        }
        self.last = used;
        used
    }

    /// Drop the latch; the next `estimate` recomputes from scratch.
    pub fn force_recompute(&mut self) {
        self.latched = false;
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::VtEmulator;

    #[test]
    fn test_empty_terminal() {
        let emu = VtEmulator::new(20, 10);
        let mut est = UsedRowsEstimator::new();
        assert_eq!(est.estimate(&emu, false), 0);
        assert_eq!(est.estimate(&emu, true), 1);
    }

    #[test]
    fn test_trailing_blank_rows_excluded() {
        let mut emu = VtEmulator::new(20, 10);
        emu.process(b"one\r\ntwo\r\nthree\r\n");
        let mut est = UsedRowsEstimator::new();
        // cursor sits on the blank fourth row
        assert_eq!(est.estimate(&emu, false), 3);
        // a running command keeps the cursor row visible
        assert_eq!(est.estimate(&emu, true), 4);
    }

    #[test]
    fn test_gap_rows_are_counted() {
        let mut emu = VtEmulator::new(20, 10);
        emu.process(b"top\x1b[6;1Hbottom\x1b[1;1H");
        let mut est = UsedRowsEstimator::new();
        assert_eq!(est.estimate(&emu, true), 6);
    }

    #[test]
    fn test_latches_at_max() {
        let mut emu = VtEmulator::new(20, 4);
        let mut est = UsedRowsEstimator::new();
        emu.process(b"1\r\n2\r\n3");
        assert_eq!(est.estimate(&emu, true), 3);
        assert!(!est.is_latched());

        emu.process(b"\r\n4\r\n5");
        assert_eq!(est.estimate(&emu, true), 4);
        assert!(est.is_latched());

        // clearing the screen does not un-latch
        emu.process(b"\x1b[2J\x1b[H");
        assert_eq!(est.estimate(&emu, false), 4);

        emu.reset();
        est.force_recompute();
        assert_eq!(est.estimate(&emu, false), 0);
    }

    #[test]
    fn test_latches_without_scrollback() {
        let mut emu = VtEmulator::with_scrollback(20, 3, 0);
        let mut est = UsedRowsEstimator::new();
        emu.process(b"1\r\n2\r\n3\r\n4");
        assert_eq!(est.estimate(&emu, true), 3);
        assert!(est.is_latched());
    }
}
