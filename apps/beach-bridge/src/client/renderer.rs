//! The glyph renderer boundary and a headless line-buffer implementation.

use parking_lot::Mutex;
use std::sync::Arc;

/// The surface the bridge writes to. Implementations own glyph layout; the
/// bridge only streams text in and reads contents and metrics back.
pub trait Renderer: Send {
    fn write(&mut self, data: &str);

    /// Rendered rows, scrollback included, without trailing blanks.
    fn lines(&self) -> Vec<String>;

    fn resize(&mut self, cols: u16, rows: u16);

    fn size(&self) -> (u16, u16);

    /// `(row, col)` of the cursor within `lines()`.
    fn cursor(&self) -> (usize, usize);

    fn clear(&mut self);

    /// Non-whitespace glyphs across the whole buffer. Stable under rewrap,
    /// which makes it usable for loss detection.
    fn content_length(&self) -> usize {
        self.lines()
            .iter()
            .map(|line| line.chars().filter(|c| !c.is_whitespace()).count())
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Parse {
    Ground,
    Escape,
    Csi,
    Osc,
    OscEscape,
}

/// Headless renderer: a grid of rows that wraps on write and, like many
/// real renderers, clips rows on resize instead of reflowing them.
#[derive(Debug, Clone)]
pub struct MemoryRenderer {
    rows_buf: Vec<Vec<char>>,
    row: usize,
    col: usize,
    cols: u16,
    rows: u16,
    scrollback: usize,
    parse: Parse,
    csi_params: String,
    resizes: usize,
}

impl MemoryRenderer {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self::with_scrollback(cols, rows, 10_000)
    }

    pub fn with_scrollback(cols: u16, rows: u16, scrollback: usize) -> Self {
        Self {
            rows_buf: vec![Vec::new()],
            row: 0,
            col: 0,
            cols: cols.max(1),
            rows: rows.max(1),
            scrollback: scrollback.max(1),
            parse: Parse::Ground,
            csi_params: String::new(),
            resizes: 0,
        }
    }

    /// Number of resizes that actually changed the grid.
    pub fn resize_count(&self) -> usize {
        self.resizes
    }

    pub fn text(&self) -> String {
        self.lines().join("\n")
    }

    fn newline(&mut self) {
        self.row += 1;
        self.col = 0;
        if self.row >= self.rows_buf.len() {
            self.rows_buf.push(Vec::new());
        }
        if self.rows_buf.len() > self.scrollback {
            let excess = self.rows_buf.len() - self.scrollback;
            self.rows_buf.drain(..excess);
            self.row = self.row.saturating_sub(excess);
        }
    }

    fn put(&mut self, ch: char) {
        if self.col >= self.cols as usize {
            self.newline();
        }
        let line = &mut self.rows_buf[self.row];
        if line.len() <= self.col {
            line.resize(self.col, ' ');
            line.push(ch);
        } else {
            line[self.col] = ch;
        }
        self.col += 1;
    }

    fn finish_csi(&mut self, final_byte: char) {
        let params = std::mem::take(&mut self.csi_params);
        match final_byte {
            'K' if params.is_empty() || params == "0" => {
                self.rows_buf[self.row].truncate(self.col);
            }
            'J' if params == "2" || params == "3" => self.clear(),
            _ => {}
        }
    }
}

impl Renderer for MemoryRenderer {
    fn write(&mut self, data: &str) {
        for ch in data.chars() {
            match self.parse {
                Parse::Ground => match ch {
                    '\x1b' => self.parse = Parse::Escape,
                    '\n' => self.newline(),
                    '\r' => self.col = 0,
                    '\x08' => self.col = self.col.saturating_sub(1),
                    '\t' => {
                        let next = (self.col / 8 + 1) * 8;
                        while self.col < next.min(self.cols as usize) {
                            self.put(' ');
                        }
                    }
                    c if c.is_control() => {}
                    c => self.put(c),
                },
                Parse::Escape => {
                    self.parse = match ch {
                        '[' => Parse::Csi,
                        ']' => Parse::Osc,
                        _ => Parse::Ground,
                    }
                }
                Parse::Csi => {
                    if ('\x40'..='\x7e').contains(&ch) {
                        self.parse = Parse::Ground;
                        self.finish_csi(ch);
                    } else {
                        self.csi_params.push(ch);
                    }
                }
                Parse::Osc => match ch {
                    '\x07' => self.parse = Parse::Ground,
                    '\x1b' => self.parse = Parse::OscEscape,
                    _ => {}
                },
                Parse::OscEscape => self.parse = Parse::Ground,
            }
        }
    }

    fn lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .rows_buf
            .iter()
            .map(|row| row.iter().collect::<String>().trim_end().to_string())
            .collect();
        while lines.last().is_some_and(|line| line.is_empty()) {
            lines.pop();
        }
        lines
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        let (cols, rows) = (cols.max(1), rows.max(1));
        if (cols, rows) == (self.cols, self.rows) {
            return;
        }
        self.cols = cols;
        self.rows = rows;
        for row in &mut self.rows_buf {
            row.truncate(cols as usize);
        }
        self.col = self.col.min(cols as usize);
        self.resizes += 1;
    }

    fn size(&self) -> (u16, u16) {
        (self.cols, self.rows)
    }

    fn cursor(&self) -> (usize, usize) {
        (self.row, self.col)
    }

    fn clear(&mut self) {
        self.rows_buf = vec![Vec::new()];
        self.row = 0;
        self.col = 0;
    }
}

/// A renderer the runtime writes to while another task inspects it.
#[derive(Debug)]
pub struct SharedRenderer<R> {
    inner: Arc<Mutex<R>>,
}

impl<R> Clone for SharedRenderer<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Renderer> SharedRenderer<R> {
    pub fn new(renderer: R) -> Self {
        Self {
            inner: Arc::new(Mutex::new(renderer)),
        }
    }

    pub fn with<T>(&self, f: impl FnOnce(&R) -> T) -> T {
        f(&self.inner.lock())
    }
}

impl<R: Renderer> Renderer for SharedRenderer<R> {
    fn write(&mut self, data: &str) {
        self.inner.lock().write(data);
    }

    fn lines(&self) -> Vec<String> {
        self.inner.lock().lines()
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        self.inner.lock().resize(cols, rows);
    }

    fn size(&self) -> (u16, u16) {
        self.inner.lock().size()
    }

    fn cursor(&self) -> (usize, usize) {
        self.inner.lock().cursor()
    }

    fn clear(&mut self) {
        self.inner.lock().clear();
    }

    fn content_length(&self) -> usize {
        self.inner.lock().content_length()
    }
}
