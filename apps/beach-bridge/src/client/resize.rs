//! One entry point for window, drag and reflow resizes.

use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::buffer_guard::{BufferGuard, BufferGuardConfig, FitGate, RepairOutcome};
use super::renderer::Renderer;

/// Fixed character cell used to turn container pixels into a grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellMetrics {
    pub width_px: f32,
    pub height_px: f32,
}

impl Default for CellMetrics {
    fn default() -> Self {
        Self {
            width_px: 9.0,
            height_px: 17.0,
        }
    }
}

impl CellMetrics {
    pub fn grid(&self, width_px: u32, height_px: u32) -> (u16, u16) {
        let cols = (width_px as f32 / self.width_px.max(1.0)).floor();
        let rows = (height_px as f32 / self.height_px.max(1.0)).floor();
        (
            cols.clamp(1.0, u16::MAX as f32) as u16,
            rows.clamp(1.0, u16::MAX as f32) as u16,
        )
    }

    pub fn pixels(&self, cols: u16, rows: u16) -> (u32, u32) {
        (
            (cols as f32 * self.width_px).ceil() as u32,
            (rows as f32 * self.height_px).ceil() as u32,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeSource {
    Window,
    Drag,
    Reflow,
}

/// Layout changes observed on the surface hosting the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutEvent {
    WindowResized { width_px: u32, height_px: u32 },
    DragStarted,
    DragMoved { width_px: u32, height_px: u32 },
    DragEnded { width_px: u32, height_px: u32 },
    Reflow { width_px: u32, height_px: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeRequest {
    pub width_px: u32,
    pub height_px: u32,
    pub cols: u16,
    pub rows: u16,
    pub source: ResizeSource,
    pub timestamp: Instant,
}

/// Result of one applied fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitOutcome {
    pub cols: u16,
    pub rows: u16,
    pub source: ResizeSource,
    pub renderer_resized: bool,
    /// Whether `terminal:resize` must go out; false when the remote already
    /// has these dimensions.
    pub send_remote: bool,
    pub repair: RepairOutcome,
}

#[derive(Debug)]
pub struct ResizeCoordinator {
    metrics: CellMetrics,
    settle: Duration,
    guard: BufferGuard,
    pending: Option<ResizeRequest>,
    due: Option<Instant>,
    last_sent: (u16, u16),
    superseded: u64,
}

impl ResizeCoordinator {
    /// `initial` is what `terminal:create` announced.
    pub fn new(
        metrics: CellMetrics,
        settle: Duration,
        guard: BufferGuardConfig,
        initial: (u16, u16),
    ) -> Self {
        Self {
            metrics,
            settle,
            guard: BufferGuard::new(guard),
            pending: None,
            due: None,
            last_sent: initial,
            superseded: 0,
        }
    }

    pub fn guard(&self) -> &BufferGuard {
        &self.guard
    }

    pub fn guard_mut(&mut self) -> &mut BufferGuard {
        &mut self.guard
    }

    pub fn pending(&self) -> Option<&ResizeRequest> {
        self.pending.as_ref()
    }

    pub fn last_sent(&self) -> (u16, u16) {
        self.last_sent
    }

    /// Record a `terminal:resize` sent outside [`tick`](Self::tick), such as
    /// the one a remount issues for a differently sized view.
    pub fn note_sent(&mut self, cols: u16, rows: u16) {
        self.last_sent = (cols, rows);
    }

    /// Requests replaced by a newer one before they settled.
    pub fn superseded(&self) -> u64 {
        self.superseded
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.due
    }

    pub fn record_output(&mut self, data: &str, now: Instant) {
        self.guard.record_output(data, now);
    }

    pub fn handle(&mut self, event: LayoutEvent, renderer: &dyn Renderer, now: Instant) {
        match event {
            LayoutEvent::DragStarted => self.guard.begin_drag(renderer, now),
            LayoutEvent::DragMoved {
                width_px,
                height_px,
            } => self.request(width_px, height_px, ResizeSource::Drag, now),
            LayoutEvent::DragEnded {
                width_px,
                height_px,
            } => {
                self.guard.end_drag(width_px, height_px);
                self.request(width_px, height_px, ResizeSource::Drag, now);
            }
            LayoutEvent::WindowResized {
                width_px,
                height_px,
            } => {
                self.guard.observe_dimensions(width_px, height_px, renderer, now);
                self.request(width_px, height_px, ResizeSource::Window, now);
            }
            LayoutEvent::Reflow {
                width_px,
                height_px,
            } => {
                self.guard.observe_dimensions(width_px, height_px, renderer, now);
                self.request(width_px, height_px, ResizeSource::Reflow, now);
            }
        }
    }

    /// Last write wins: a newer request replaces the pending one and
    /// restarts the settle window.
    fn request(&mut self, width_px: u32, height_px: u32, source: ResizeSource, now: Instant) {
        let (cols, rows) = self.metrics.grid(width_px, height_px);
        let request = ResizeRequest {
            width_px,
            height_px,
            cols,
            rows,
            source,
            timestamp: now,
        };
        if self.pending.replace(request).is_some() {
            self.superseded += 1;
        }
        self.due = Some(now + self.settle);
        trace!(
            target: "bridge::resize",
            ?source,
            width_px,
            height_px,
            cols,
            rows,
            "resize requested"
        );
    }

    /// Apply the pending request if its settle window has passed and the
    /// buffer guard lets it through.
    pub fn tick(&mut self, renderer: &mut dyn Renderer, now: Instant) -> Option<FitOutcome> {
        let due = self.due?;
        if now < due {
            return None;
        }
        match self.guard.gate(now) {
            FitGate::Suppressed => {
                self.due = None;
                return None;
            }
            FitGate::Deferred(retry_at) => {
                self.due = Some(retry_at.max(due));
                return None;
            }
            FitGate::Allowed => {}
        }
        self.due = None;
        let request = self.pending.take()?;

        self.guard.ensure_snapshot(renderer, now);
        let renderer_resized = renderer.size() != (request.cols, request.rows);
        if renderer_resized {
            renderer.resize(request.cols, request.rows);
        }
        let repair = self.guard.check_and_repair(renderer);

        let send_remote = self.last_sent != (request.cols, request.rows);
        if send_remote {
            self.last_sent = (request.cols, request.rows);
        }
        debug!(
            target: "bridge::resize",
            cols = request.cols,
            rows = request.rows,
            source = ?request.source,
            send_remote,
            ?repair,
            "fit applied"
        );
        Some(FitOutcome {
            cols: request.cols,
            rows: request.rows,
            source: request.source,
            renderer_resized,
            send_remote,
            repair,
        })
    }

    /// Drop pending work; used on teardown.
    pub fn cancel(&mut self) {
        self.pending = None;
        self.due = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::renderer::MemoryRenderer;

    const SETTLE: Duration = Duration::from_millis(150);

    fn coordinator() -> ResizeCoordinator {
        ResizeCoordinator::new(
            CellMetrics::default(),
            SETTLE,
            BufferGuardConfig::default(),
            (80, 24),
        )
    }

    #[test]
    fn grid_uses_fixed_cell_size() {
        let metrics = CellMetrics::default();
        assert_eq!(metrics.grid(720, 408), (80, 24));
        assert_eq!(metrics.grid(3, 3), (1, 1));
        assert_eq!(metrics.pixels(80, 24), (720, 408));
    }

    #[test]
    fn ten_triggers_within_fifty_ms_apply_once() {
        let mut coordinator = coordinator();
        let mut renderer = MemoryRenderer::new(80, 24);
        let start = Instant::now();
        for i in 0..10u32 {
            let now = start + Duration::from_millis(5 * i as u64);
            let event = match i % 3 {
                0 => LayoutEvent::WindowResized {
                    width_px: 900 + i * 9,
                    height_px: 510,
                },
                1 => LayoutEvent::Reflow {
                    width_px: 900 + i * 9,
                    height_px: 510,
                },
                _ => LayoutEvent::DragMoved {
                    width_px: 900 + i * 9,
                    height_px: 510,
                },
            };
            coordinator.handle(event, &renderer, now);
            assert!(coordinator.tick(&mut renderer, now).is_none());
        }
        assert_eq!(coordinator.superseded(), 9);

        let settled = start + Duration::from_millis(45) + SETTLE;
        let fit = coordinator.tick(&mut renderer, settled).expect("fit");
        assert_eq!((fit.cols, fit.rows), (109, 30));
        assert!(fit.send_remote);
        assert_eq!(renderer.resize_count(), 1);
        assert!(coordinator.tick(&mut renderer, settled + SETTLE).is_none());
    }

    #[test]
    fn unchanged_dimensions_are_not_sent_again() {
        let mut coordinator = coordinator();
        let mut renderer = MemoryRenderer::new(80, 24);
        let now = Instant::now();
        coordinator.handle(
            LayoutEvent::WindowResized {
                width_px: 725,
                height_px: 410,
            },
            &renderer,
            now,
        );
        let fit = coordinator.tick(&mut renderer, now + SETTLE).expect("fit");
        assert!(!fit.send_remote);
        assert!(!fit.renderer_resized);
    }

    #[test]
    fn fitting_back_after_an_outside_send_is_sent_again() {
        let mut coordinator = coordinator();
        let mut renderer = MemoryRenderer::new(100, 30);
        coordinator.note_sent(100, 30);
        let now = Instant::now();
        coordinator.handle(
            LayoutEvent::WindowResized {
                width_px: 720,
                height_px: 408,
            },
            &renderer,
            now,
        );
        let fit = coordinator.tick(&mut renderer, now + SETTLE).expect("fit");
        assert_eq!((fit.cols, fit.rows), (80, 24));
        assert!(fit.send_remote);
        assert_eq!(coordinator.last_sent(), (80, 24));
    }

    #[test]
    fn drag_collapse_then_restore_keeps_content() {
        let mut coordinator = coordinator();
        let mut renderer = MemoryRenderer::new(80, 24);
        for i in 0..20 {
            renderer.write(&format!("row {i} with some text\r\n"));
        }
        let before = renderer.content_length();
        let t0 = Instant::now();

        coordinator.handle(LayoutEvent::DragStarted, &renderer, t0);
        coordinator.handle(
            LayoutEvent::DragMoved {
                width_px: 10,
                height_px: 10,
            },
            &renderer,
            t0 + Duration::from_millis(10),
        );
        assert!(coordinator.tick(&mut renderer, t0 + Duration::from_secs(1)).is_none());
        assert_eq!(renderer.resize_count(), 0);

        let t1 = t0 + Duration::from_secs(2);
        coordinator.handle(
            LayoutEvent::DragEnded {
                width_px: 720,
                height_px: 408,
            },
            &renderer,
            t1,
        );
        let fit = coordinator.tick(&mut renderer, t1 + SETTLE).expect("fit");
        assert!(!fit.send_remote);
        assert_eq!(renderer.content_length(), before);
    }

    #[test]
    fn collapse_without_drag_waits_then_repairs_lossy_fit() {
        let mut coordinator = coordinator();
        let mut renderer = MemoryRenderer::new(80, 24);
        for i in 0..20 {
            renderer.write(&format!("a fairly long row number {i} of scrollback\r\n"));
        }
        let before = renderer.content_length();
        let t0 = Instant::now();

        coordinator.handle(
            LayoutEvent::WindowResized {
                width_px: 10,
                height_px: 10,
            },
            &renderer,
            t0,
        );
        assert!(coordinator.tick(&mut renderer, t0 + SETTLE).is_none());

        let t1 = t0 + Duration::from_millis(300);
        coordinator.handle(
            LayoutEvent::WindowResized {
                width_px: 180,
                height_px: 408,
            },
            &renderer,
            t1,
        );
        assert!(coordinator.tick(&mut renderer, t1 + SETTLE).is_none());
        assert_eq!(
            coordinator.next_deadline(),
            Some(t1 + Duration::from_millis(500))
        );

        let fit = coordinator
            .tick(&mut renderer, t1 + Duration::from_millis(500))
            .expect("fit");
        assert_eq!((fit.cols, fit.rows), (20, 24));
        assert!(matches!(fit.repair, RepairOutcome::Repaired { .. }));
        assert_eq!(renderer.content_length(), before);
    }

    #[test]
    fn streaming_output_defers_fit() {
        let mut coordinator = coordinator();
        let mut renderer = MemoryRenderer::new(80, 24);
        let now = Instant::now();
        coordinator.handle(
            LayoutEvent::WindowResized {
                width_px: 900,
                height_px: 510,
            },
            &renderer,
            now,
        );
        coordinator.record_output("chunk", now + Duration::from_millis(140));
        assert!(coordinator.tick(&mut renderer, now + SETTLE).is_none());
        assert_eq!(
            coordinator.next_deadline(),
            Some(now + Duration::from_millis(340))
        );
        assert!(
            coordinator
                .tick(&mut renderer, now + Duration::from_millis(340))
                .is_some()
        );
    }
}
