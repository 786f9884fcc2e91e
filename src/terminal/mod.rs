pub mod emulator;
pub mod rows;

pub use emulator::VtEmulator;
pub use rows::UsedRowsEstimator;

/// The terminal model reconciled pty bytes are written into.
///
/// Besides accepting bytes it exposes the cursor and buffer state the row
/// estimator needs. [`VtEmulator`] is the production implementation.
pub trait TerminalModel: Send {
    /// Feed pty output.
    fn write(&mut self, data: &[u8]);

    /// Drop all content, including scrollback, ahead of a full reload.
    fn clear(&mut self);

    fn resize(&mut self, cols: usize, rows: usize);

    /// Viewport height.
    fn rows(&self) -> usize;

    /// Viewport lines plus every line that has scrolled off the top since
    /// the last clear, whether or not scrollback retained it.
    fn line_count(&self) -> usize;

    /// Viewport row of the cursor, 0-based.
    fn cursor_row(&self) -> usize;

    /// Whether a viewport row holds only whitespace.
    fn row_is_blank(&self, row: usize) -> bool;
}
