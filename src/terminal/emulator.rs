use std::collections::VecDeque;

use vte::{Parser, Perform};

use super::TerminalModel;

/// Lines kept above the viewport when no limit is configured.
pub const DEFAULT_SCROLLBACK: usize = 1000;

/// VT100/ANSI escape sequence parser wrapping `vte` crate.
/// Tracks cursor position, screen content and lines scrolled off the top.
pub struct VtEmulator {
    parser: Parser,
    pub cursor_x: usize,
    pub cursor_y: usize,
    pub cols: usize,
    pub rows: usize,
    /// Screen buffer: rows x cols of characters
    pub cells: Vec<Vec<char>>,
    /// Lines that scrolled off the top, oldest first
    pub scrollback: VecDeque<Vec<char>>,
    scrollback_limit: usize,
    /// Lines scrolled off the top since the last reset, kept or not.
    scrolled: usize,
}

impl VtEmulator {
    pub fn new(cols: usize, rows: usize) -> Self {
        Self::with_scrollback(cols, rows, DEFAULT_SCROLLBACK)
    }

    pub fn with_scrollback(cols: usize, rows: usize, scrollback_limit: usize) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            parser: Parser::new(),
            cursor_x: 0,
            cursor_y: 0,
            cols,
            rows,
            cells: vec![vec![' '; cols]; rows],
            scrollback: VecDeque::new(),
            scrollback_limit,
            scrolled: 0,
        }
    }

    /// Feed raw pty bytes into the VT parser.
    pub fn process(&mut self, bytes: &[u8]) {
        let mut performer = EmulatorPerformer {
            cursor_x: &mut self.cursor_x,
            cursor_y: &mut self.cursor_y,
            cols: self.cols,
            rows: self.rows,
            cells: &mut self.cells,
            scrollback: &mut self.scrollback,
            scrollback_limit: self.scrollback_limit,
            scrolled: &mut self.scrolled,
        };
        self.parser.advance(&mut performer, bytes);
    }

    /// Blank the screen, drop scrollback and home the cursor.
    pub fn reset(&mut self) {
        self.parser = Parser::new();
        self.cells = vec![vec![' '; self.cols]; self.rows];
        self.scrollback.clear();
        self.scrolled = 0;
        self.cursor_x = 0;
        self.cursor_y = 0;
    }

    /// Resize the emulator grid.
    pub fn resize(&mut self, cols: usize, rows: usize) {
        let cols = cols.max(1);
        let rows = rows.max(1);
        self.cols = cols;
        self.rows = rows;
        self.cells.resize(rows, vec![' '; cols]);
        for row in self.cells.iter_mut() {
            row.resize(cols, ' ');
        }
        self.cursor_x = self.cursor_x.min(cols - 1);
        self.cursor_y = self.cursor_y.min(rows - 1);
    }

    /// Get the text content of a specific viewport line.
    pub fn get_line_text(&self, row: usize) -> String {
        self.cells
            .get(row)
            .map(|line| line.iter().collect())
            .unwrap_or_default()
    }
}

impl TerminalModel for VtEmulator {
    fn write(&mut self, data: &[u8]) {
        self.process(data);
    }

    fn clear(&mut self) {
        self.reset();
    }

    fn resize(&mut self, cols: usize, rows: usize) {
        VtEmulator::resize(self, cols, rows);
    }

    fn rows(&self) -> usize {
        self.rows
    }

    /// Counts every line that scrolled off, so a zero scrollback limit
    /// still reports overflow.
    fn line_count(&self) -> usize {
        self.scrolled.saturating_add(self.rows)
    }

    fn cursor_row(&self) -> usize {
        self.cursor_y
    }

    fn row_is_blank(&self, row: usize) -> bool {
        self.cells
            .get(row)
            .map_or(true, |line| line.iter().all(|c| c.is_whitespace()))
    }
}

/// Internal performer that implements vte::Perform.
struct EmulatorPerformer<'a> {
    cursor_x: &'a mut usize,
    cursor_y: &'a mut usize,
    cols: usize,
    rows: usize,
    cells: &'a mut Vec<Vec<char>>,
    scrollback: &'a mut VecDeque<Vec<char>>,
    scrollback_limit: usize,
    scrolled: &'a mut usize,
}

impl<'a> EmulatorPerformer<'a> {
    fn scroll_up(&mut self) {
        let top = self.cells.remove(0);
        *self.scrolled = self.scrolled.saturating_add(1);
        if self.scrollback_limit > 0 {
            self.scrollback.push_back(top);
            if self.scrollback.len() > self.scrollback_limit {
                self.scrollback.pop_front();
            }
        }
        self.cells.push(vec![' '; self.cols]);
    }

    fn line_feed(&mut self) {
        if *self.cursor_y + 1 >= self.rows {
            self.scroll_up();
        } else {
            *self.cursor_y += 1;
        }
    }

    fn clear_cells(&mut self, row: usize, from: usize, to: usize) {
        if let Some(line) = self.cells.get_mut(row) {
            let to = to.min(line.len());
            for cell in line.iter_mut().take(to).skip(from) {
                *cell = ' ';
            }
        }
    }
}

impl<'a> Perform for EmulatorPerformer<'a> {
    fn print(&mut self, ch: char) {
        if *self.cursor_x >= self.cols {
            *self.cursor_x = 0;
            self.line_feed();
        }
        self.cells[*self.cursor_y][*self.cursor_x] = ch;
        *self.cursor_x += 1;
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            // LF, VT, FF
            b'\n' | 0x0b | 0x0c => self.line_feed(),
            b'\r' => *self.cursor_x = 0,
            // Backspace
            0x08 => *self.cursor_x = self.cursor_x.saturating_sub(1),
            b'\t' => {
                let next_tab = (*self.cursor_x / 8 + 1) * 8;
                *self.cursor_x = next_tab.min(self.cols - 1);
            }
            _ => {}
        }
    }

    fn hook(&mut self, _params: &vte::Params, _intermediates: &[u8], _ignore: bool, _action: char) {}
    fn put(&mut self, _byte: u8) {}
    fn unhook(&mut self) {}
    fn osc_dispatch(&mut self, _params: &[&[u8]], _bell_terminated: bool) {}

    fn csi_dispatch(&mut self, params: &vte::Params, _intermediates: &[u8], _ignore: bool, action: char) {
        let mut params_iter = params.iter();
        let first = params_iter.next().and_then(|p| p.first().copied()).unwrap_or(0);
        let second = params_iter.next().and_then(|p| p.first().copied()).unwrap_or(0);
        let count = if first == 0 { 1 } else { first as usize };
        let last_col = self.cols - 1;
        let last_row = self.rows - 1;

        match action {
            'A' => *self.cursor_y = self.cursor_y.saturating_sub(count),
            'B' => *self.cursor_y = (*self.cursor_y + count).min(last_row),
            'C' => *self.cursor_x = (*self.cursor_x + count).min(last_col),
            'D' => *self.cursor_x = self.cursor_x.saturating_sub(count),
            // Cursor Horizontal Absolute
            'G' => *self.cursor_x = (count - 1).min(last_col),
            // Line Position Absolute
            'd' => *self.cursor_y = (count - 1).min(last_row),
            'H' | 'f' => {
                let col = if second == 0 { 1 } else { second as usize };
                *self.cursor_y = (count - 1).min(last_row);
                *self.cursor_x = (col - 1).min(last_col);
            }
            // Erase in Display
            'J' => {
                let (x, y) = (*self.cursor_x, *self.cursor_y);
                match first {
                    0 => {
                        self.clear_cells(y, x, self.cols);
                        for row in (y + 1)..self.rows {
                            self.clear_cells(row, 0, self.cols);
                        }
                    }
                    1 => {
                        for row in 0..y {
                            self.clear_cells(row, 0, self.cols);
                        }
                        self.clear_cells(y, 0, x + 1);
                    }
                    2 | 3 => {
                        for row in 0..self.rows {
                            self.clear_cells(row, 0, self.cols);
                        }
                        if first == 3 {
                            self.scrollback.clear();
                        }
                    }
                    _ => {}
                }
            }
            // Erase in Line
            'K' => {
                let (x, y) = (*self.cursor_x, *self.cursor_y);
                match first {
                    0 => self.clear_cells(y, x, self.cols),
                    1 => self.clear_cells(y, 0, x + 1),
                    2 => self.clear_cells(y, 0, self.cols),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fn esc_dispatch(&mut self, intermediates: &[u8], _ignore: bool, byte: u8) {
        // RIS, full reset
        if intermediates.is_empty() && byte == b'c' {
            for row in 0..self.rows {
                self.clear_cells(row, 0, self.cols);
            }
            self.scrollback.clear();
            *self.scrolled = 0;
            *self.cursor_x = 0;
            *self.cursor_y = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_basic() {
        let mut emu = VtEmulator::new(80, 24);
        emu.process(b"Hello, remote!");
        assert_eq!(emu.get_line_text(0).trim(), "Hello, remote!");
        assert_eq!(emu.cursor_x, 14);
        assert_eq!(emu.cursor_y, 0);
    }

    #[test]
    fn test_newline() {
        let mut emu = VtEmulator::new(80, 24);
        emu.process(b"Line1\r\nLine2");
        assert_eq!(emu.get_line_text(0).trim(), "Line1");
        assert_eq!(emu.get_line_text(1).trim(), "Line2");
    }

    #[test]
    fn test_cursor_movement() {
        let mut emu = VtEmulator::new(80, 24);
        // ESC[5;10H moves cursor to row 5, col 10
        emu.process(b"\x1b[5;10HX");
        assert_eq!(emu.cells[4][9], 'X');
    }

    #[test]
    fn test_split_escape_sequence() {
        let mut emu = VtEmulator::new(80, 24);
        emu.process(b"\x1b[3");
        emu.process(b";2HY");
        assert_eq!(emu.cells[2][1], 'Y');
    }

    #[test]
    fn test_clear_screen() {
        let mut emu = VtEmulator::new(80, 24);
        emu.process(b"Some text");
        emu.process(b"\x1b[2J");
        assert_eq!(emu.get_line_text(0).trim(), "");
        assert!(emu.row_is_blank(0));
    }

    #[test]
    fn test_scrollback_grows_line_count() {
        let mut emu = VtEmulator::with_scrollback(10, 3, 2);
        assert_eq!(emu.line_count(), 3);
        emu.process(b"a\r\nb\r\nc\r\nd\r\ne\r\nf");
        assert_eq!(emu.get_line_text(2).trim(), "f");
        // three lines scrolled off but only two are kept
        assert_eq!(emu.scrollback.len(), 2);
        assert_eq!(emu.scrollback.front().unwrap()[0], 'b');
        assert_eq!(emu.line_count(), 6);
    }

    #[test]
    fn test_overflow_counted_without_scrollback() {
        let mut emu = VtEmulator::with_scrollback(10, 2, 0);
        emu.process(b"a\r\nb\r\nc");
        assert!(emu.scrollback.is_empty());
        assert_eq!(emu.line_count(), 3);
        emu.reset();
        assert_eq!(emu.line_count(), 2);
    }

    #[test]
    fn test_full_reset() {
        let mut emu = VtEmulator::new(10, 3);
        emu.process(b"1\r\n2\r\n3\r\n4");
        emu.process(b"\x1bcZ");
        assert_eq!(emu.line_count(), 3);
        assert_eq!((emu.cursor_x, emu.cursor_y), (1, 0));
        assert_eq!(emu.get_line_text(0).trim(), "Z");
        assert!(emu.row_is_blank(1));
    }

    #[test]
    fn test_wrap_at_last_column() {
        let mut emu = VtEmulator::new(4, 2);
        emu.process(b"abcdef");
        assert_eq!(emu.get_line_text(0), "abcd");
        assert_eq!(emu.get_line_text(1).trim(), "ef");
        assert_eq!(emu.cursor_row(), 1);
    }
}
