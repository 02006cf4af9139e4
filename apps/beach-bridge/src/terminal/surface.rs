//! The local terminal as the bridge's surface: stdout for output, crossterm
//! events for keys and window size.

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::{self, Write};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::client::BridgeInput;
use crate::client::renderer::{MemoryRenderer, Renderer};
use crate::client::resize::{CellMetrics, LayoutEvent};

/// Ctrl+] detaches, as in telnet.
const DETACH_KEY: char = ']';
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct RawModeGuard(bool);

impl RawModeGuard {
    pub fn new(enable: bool) -> Self {
        if enable {
            match enable_raw_mode() {
                Ok(()) => Self(true),
                Err(err) => {
                    warn!(target: "bridge::terminal", error = %err, "failed to enable raw mode");
                    Self(false)
                }
            }
        } else {
            Self(false)
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.0 {
            let _ = disable_raw_mode();
        }
    }
}

/// Writes through to stdout and mirrors into a [`MemoryRenderer`] so the
/// buffer guard can read contents back.
pub struct StdoutRenderer {
    mirror: MemoryRenderer,
    out: io::Stdout,
}

impl StdoutRenderer {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            mirror: MemoryRenderer::new(cols, rows),
            out: io::stdout(),
        }
    }

    fn emit(&mut self, data: &str) {
        let mut out = self.out.lock();
        if out.write_all(data.as_bytes()).and_then(|_| out.flush()).is_err() {
            debug!(target: "bridge::terminal", "stdout write failed");
        }
    }
}

impl Renderer for StdoutRenderer {
    fn write(&mut self, data: &str) {
        self.emit(data);
        self.mirror.write(data);
    }

    fn lines(&self) -> Vec<String> {
        self.mirror.lines()
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        self.mirror.resize(cols, rows);
    }

    fn size(&self) -> (u16, u16) {
        self.mirror.size()
    }

    fn cursor(&self) -> (usize, usize) {
        self.mirror.cursor()
    }

    fn clear(&mut self) {
        self.emit("\x1b[2J\x1b[H");
        self.mirror.clear();
    }
}

/// Bytes a terminal would send for `key`, or `None` for keys the remote
/// shell has no use for.
pub fn key_bytes(key: &KeyEvent) -> Option<String> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let alt = key.modifiers.contains(KeyModifiers::ALT);
    let bytes = match key.code {
        KeyCode::Char(c) if ctrl => {
            let upper = c.to_ascii_uppercase();
            if !('@'..='_').contains(&upper) {
                return None;
            }
            (((upper as u8) & 0x1f) as char).to_string()
        }
        KeyCode::Char(c) => c.to_string(),
        KeyCode::Enter => "\r".to_string(),
        KeyCode::Backspace => "\x7f".to_string(),
        KeyCode::Tab => "\t".to_string(),
        KeyCode::BackTab => "\x1b[Z".to_string(),
        KeyCode::Esc => "\x1b".to_string(),
        KeyCode::Up => "\x1b[A".to_string(),
        KeyCode::Down => "\x1b[B".to_string(),
        KeyCode::Right => "\x1b[C".to_string(),
        KeyCode::Left => "\x1b[D".to_string(),
        KeyCode::Home => "\x1b[H".to_string(),
        KeyCode::End => "\x1b[F".to_string(),
        KeyCode::Delete => "\x1b[3~".to_string(),
        KeyCode::PageUp => "\x1b[5~".to_string(),
        KeyCode::PageDown => "\x1b[6~".to_string(),
        _ => return None,
    };
    Some(if alt { format!("\x1b{bytes}") } else { bytes })
}

fn translate(event: Event, metrics: CellMetrics) -> Option<BridgeInput> {
    match event {
        Event::Key(key) => {
            if key.kind == KeyEventKind::Release {
                return None;
            }
            if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char(DETACH_KEY) {
                return Some(BridgeInput::Shutdown);
            }
            if key.code == KeyCode::F(9) {
                return Some(BridgeInput::EmergencyStop);
            }
            key_bytes(&key).map(BridgeInput::Keys)
        }
        Event::Paste(text) => Some(BridgeInput::Keys(text)),
        Event::Resize(cols, rows) => {
            let (width_px, height_px) = metrics.pixels(cols, rows);
            Some(BridgeInput::Layout(LayoutEvent::WindowResized {
                width_px,
                height_px,
            }))
        }
        _ => None,
    }
}

/// Read crossterm events on a blocking thread until the bridge hangs up.
pub fn spawn_input_pump(
    inputs: mpsc::UnboundedSender<BridgeInput>,
    metrics: CellMetrics,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while !inputs.is_closed() {
            match event::poll(POLL_INTERVAL) {
                Ok(false) => continue,
                Ok(true) => {}
                Err(err) => {
                    warn!(target: "bridge::terminal", error = %err, "input poll failed");
                    break;
                }
            }
            let event = match event::read() {
                Ok(event) => event,
                Err(err) => {
                    warn!(target: "bridge::terminal", error = %err, "input read failed");
                    break;
                }
            };
            if let Some(input) = translate(event, metrics) {
                let stop = input == BridgeInput::Shutdown;
                if inputs.send(input).is_err() || stop {
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn keys_map_to_terminal_bytes() {
        assert_eq!(key_bytes(&key(KeyCode::Char('a'), KeyModifiers::NONE)).as_deref(), Some("a"));
        assert_eq!(key_bytes(&key(KeyCode::Char('c'), KeyModifiers::CONTROL)).as_deref(), Some("\x03"));
        assert_eq!(key_bytes(&key(KeyCode::Enter, KeyModifiers::NONE)).as_deref(), Some("\r"));
        assert_eq!(key_bytes(&key(KeyCode::Backspace, KeyModifiers::NONE)).as_deref(), Some("\x7f"));
        assert_eq!(key_bytes(&key(KeyCode::Up, KeyModifiers::NONE)).as_deref(), Some("\x1b[A"));
        assert_eq!(key_bytes(&key(KeyCode::Char('b'), KeyModifiers::ALT)).as_deref(), Some("\x1bb"));
        assert_eq!(key_bytes(&key(KeyCode::F(5), KeyModifiers::NONE)), None);
    }

    #[test]
    fn hotkeys_and_resizes_become_bridge_inputs() {
        let metrics = CellMetrics::default();
        assert_eq!(
            translate(Event::Key(key(KeyCode::Char(']'), KeyModifiers::CONTROL)), metrics),
            Some(BridgeInput::Shutdown)
        );
        assert_eq!(
            translate(Event::Key(key(KeyCode::F(9), KeyModifiers::NONE)), metrics),
            Some(BridgeInput::EmergencyStop)
        );
        assert_eq!(
            translate(Event::Resize(100, 30), metrics),
            Some(BridgeInput::Layout(LayoutEvent::WindowResized {
                width_px: 900,
                height_px: 510
            }))
        );
    }
}
