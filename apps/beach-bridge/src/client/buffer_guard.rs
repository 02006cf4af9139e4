//! Guards rendered scrollback across layout changes.
//!
//! A snapshot is taken when a layout-changing trigger starts. Fits are
//! suppressed while the trigger is live and deferred while output streams.
//! After a fit, content that shrank below the repair ratio is rewritten
//! from the snapshot plus whatever output arrived since it was taken.

use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::renderer::Renderer;

/// Output received after a snapshot is replayed on repair; past this size
/// the snapshot is considered stale and dropped.
const MAX_PENDING_TAIL: usize = 256 * 1024;

/// Erase-display sequences that wipe the whole surface.
const FULL_CLEARS: [&str; 2] = ["\x1b[2J", "\x1b[3J"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferGuardConfig {
    /// Container edges below this many pixels count as collapsed.
    pub collapse_threshold_px: u32,
    /// Quiet period of stable dimensions that ends a collapse.
    pub stable_quiet: Duration,
    /// Output within this window counts as actively streaming.
    pub streaming_quiet: Duration,
    pub repair_ratio: f32,
}

impl Default for BufferGuardConfig {
    fn default() -> Self {
        Self {
            collapse_threshold_px: 50,
            stable_quiet: Duration::from_millis(500),
            streaming_quiet: Duration::from_millis(200),
            repair_ratio: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSnapshot {
    pub lines: Vec<String>,
    pub captured_length: usize,
    pub cursor_row: usize,
    pub captured_at: Instant,
}

impl BufferSnapshot {
    pub fn capture(renderer: &dyn Renderer, now: Instant) -> Self {
        Self {
            lines: renderer.lines(),
            captured_length: renderer.content_length(),
            cursor_row: renderer.cursor().0,
            captured_at: now,
        }
    }

    /// Baseline for a surface that was just wiped on purpose.
    pub fn blank(now: Instant) -> Self {
        Self {
            lines: Vec::new(),
            captured_length: 0,
            cursor_row: 0,
            captured_at: now,
        }
    }

    /// Rewrite the captured rows, leaving the cursor on the row it was on.
    pub fn restore_into(&self, renderer: &mut dyn Renderer) {
        renderer.write(&self.lines.join("\r\n"));
        let last_row = self.lines.len().saturating_sub(1);
        for _ in last_row..self.cursor_row {
            renderer.write("\r\n");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Drag,
    Collapsed,
    Recovering { since: Instant },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitGate {
    Allowed,
    /// A trigger is live; wait for the next layout event.
    Suppressed,
    /// Retry at the given instant.
    Deferred(Instant),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    NoSnapshot,
    Intact,
    Repaired { before: usize, after: usize },
    /// Rewrite did not bring content back over the threshold.
    Failed { expected: usize, actual: usize },
}

#[derive(Debug)]
pub struct BufferGuard {
    config: BufferGuardConfig,
    snapshot: Option<BufferSnapshot>,
    tail: String,
    trigger: Option<Trigger>,
    last_output: Option<Instant>,
    repairs: u32,
}

impl BufferGuard {
    pub fn new(config: BufferGuardConfig) -> Self {
        Self {
            config,
            snapshot: None,
            tail: String::new(),
            trigger: None,
            last_output: None,
            repairs: 0,
        }
    }

    pub fn config(&self) -> &BufferGuardConfig {
        &self.config
    }

    pub fn snapshot(&self) -> Option<&BufferSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn repairs(&self) -> u32 {
        self.repairs
    }

    pub fn is_collapsed(&self, width_px: u32, height_px: u32) -> bool {
        width_px < self.config.collapse_threshold_px || height_px < self.config.collapse_threshold_px
    }

    /// Snapshot now unless one is already held for the current cycle.
    pub fn ensure_snapshot(&mut self, renderer: &dyn Renderer, now: Instant) {
        if self.snapshot.is_none() {
            let snapshot = BufferSnapshot::capture(renderer, now);
            trace!(
                target: "bridge::buffer",
                lines = snapshot.lines.len(),
                captured_length = snapshot.captured_length,
                "captured buffer snapshot"
            );
            self.snapshot = Some(snapshot);
            self.tail.clear();
        }
    }

    /// Seed the guard with a snapshot taken elsewhere, e.g. before a remount.
    pub fn adopt_snapshot(&mut self, snapshot: BufferSnapshot) {
        self.snapshot = Some(snapshot);
        self.tail.clear();
    }

    pub fn take_snapshot(&mut self) -> Option<BufferSnapshot> {
        self.tail.clear();
        self.snapshot.take()
    }

    pub fn begin_drag(&mut self, renderer: &dyn Renderer, now: Instant) {
        self.ensure_snapshot(renderer, now);
        self.trigger = Some(Trigger::Drag);
        debug!(target: "bridge::buffer", "drag started; fits suppressed");
    }

    pub fn end_drag(&mut self, width_px: u32, height_px: u32) {
        if self.trigger != Some(Trigger::Drag) {
            return;
        }
        self.trigger = if self.is_collapsed(width_px, height_px) {
            Some(Trigger::Collapsed)
        } else {
            None
        };
        debug!(target: "bridge::buffer", collapsed = self.trigger.is_some(), "drag released");
    }

    /// Feed every observed container size. Collapsing snapshots first;
    /// coming back from a collapse starts the stability window.
    pub fn observe_dimensions(
        &mut self,
        width_px: u32,
        height_px: u32,
        renderer: &dyn Renderer,
        now: Instant,
    ) {
        if self.trigger == Some(Trigger::Drag) {
            return;
        }
        if self.is_collapsed(width_px, height_px) {
            if self.trigger != Some(Trigger::Collapsed) {
                self.ensure_snapshot(renderer, now);
                debug!(target: "bridge::buffer", width_px, height_px, "container collapsed");
            }
            self.trigger = Some(Trigger::Collapsed);
        } else if matches!(
            self.trigger,
            Some(Trigger::Collapsed) | Some(Trigger::Recovering { .. })
        ) {
            self.trigger = Some(Trigger::Recovering { since: now });
        }
    }

    /// The surface was cleared on purpose. A held snapshot is rebased onto
    /// the empty surface so a later repair cannot bring old rows back.
    pub fn surface_cleared(&mut self, now: Instant) {
        if self.snapshot.is_some() {
            debug!(target: "bridge::buffer", "surface cleared; snapshot rebased");
            self.snapshot = Some(BufferSnapshot::blank(now));
            self.tail.clear();
        }
    }

    pub fn record_output(&mut self, data: &str, now: Instant) {
        self.last_output = Some(now);
        if self.snapshot.is_none() {
            return;
        }
        let data = match last_full_clear(data) {
            Some(end) => {
                self.surface_cleared(now);
                &data[end..]
            }
            None => data,
        };
        if self.tail.len() + data.len() > MAX_PENDING_TAIL {
            warn!(
                target: "bridge::buffer",
                "output since snapshot exceeded replay budget; dropping snapshot"
            );
            self.snapshot = None;
            self.tail.clear();
        } else {
            self.tail.push_str(data);
        }
    }

    pub fn gate(&mut self, now: Instant) -> FitGate {
        match self.trigger {
            Some(Trigger::Drag) | Some(Trigger::Collapsed) => return FitGate::Suppressed,
            Some(Trigger::Recovering { since }) => {
                let stable_at = since + self.config.stable_quiet;
                if now < stable_at {
                    return FitGate::Deferred(stable_at);
                }
                self.trigger = None;
            }
            None => {}
        }
        if let Some(last) = self.last_output {
            let quiet_at = last + self.config.streaming_quiet;
            if now < quiet_at {
                trace!(target: "bridge::buffer", "output streaming; deferring resize cycle");
                return FitGate::Deferred(quiet_at);
            }
        }
        FitGate::Allowed
    }

    /// Compare against the snapshot, rewrite if content was lost, and
    /// discard the snapshot either way.
    pub fn check_and_repair(&mut self, renderer: &mut dyn Renderer) -> RepairOutcome {
        let Some(snapshot) = self.snapshot.take() else {
            return RepairOutcome::NoSnapshot;
        };
        let tail = std::mem::take(&mut self.tail);
        let current = renderer.content_length();
        let threshold = snapshot.captured_length as f32 * self.config.repair_ratio;
        if (current as f32) >= threshold {
            return RepairOutcome::Intact;
        }

        renderer.clear();
        snapshot.restore_into(renderer);
        if !tail.is_empty() {
            renderer.write(&tail);
        }
        let after = renderer.content_length();
        if (after as f32) < threshold {
            warn!(
                target: "bridge::buffer",
                expected = snapshot.captured_length,
                actual = after,
                "buffer repair did not restore content"
            );
            return RepairOutcome::Failed {
                expected: snapshot.captured_length,
                actual: after,
            };
        }
        self.repairs += 1;
        debug!(target: "bridge::buffer", before = current, after, "repaired buffer from snapshot");
        RepairOutcome::Repaired {
            before: current,
            after,
        }
    }
}

/// Byte offset just past the last full-clear sequence in `data`.
fn last_full_clear(data: &str) -> Option<usize> {
    FULL_CLEARS
        .iter()
        .filter_map(|seq| data.rfind(seq).map(|at| at + seq.len()))
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::renderer::MemoryRenderer;

    fn filled(lines: usize) -> MemoryRenderer {
        let mut renderer = MemoryRenderer::new(40, 10);
        for i in 0..lines {
            renderer.write(&format!("line {i:02} of output\r\n"));
        }
        renderer
    }

    #[test]
    fn drag_suppresses_fits_until_release() {
        let renderer = filled(3);
        let mut guard = BufferGuard::new(BufferGuardConfig::default());
        let now = Instant::now();
        guard.begin_drag(&renderer, now);
        assert!(guard.snapshot().is_some());
        assert_eq!(guard.gate(now), FitGate::Suppressed);
        guard.end_drag(400, 300);
        assert_eq!(guard.gate(now), FitGate::Allowed);
    }

    #[test]
    fn collapse_waits_for_stable_dimensions() {
        let renderer = filled(3);
        let mut guard = BufferGuard::new(BufferGuardConfig::default());
        let t0 = Instant::now();
        guard.observe_dimensions(10, 10, &renderer, t0);
        assert_eq!(guard.gate(t0), FitGate::Suppressed);

        let t1 = t0 + Duration::from_millis(100);
        guard.observe_dimensions(400, 300, &renderer, t1);
        let stable_at = t1 + Duration::from_millis(500);
        assert_eq!(guard.gate(t1), FitGate::Deferred(stable_at));

        let t2 = t1 + Duration::from_millis(300);
        guard.observe_dimensions(410, 300, &renderer, t2);
        assert_eq!(
            guard.gate(stable_at),
            FitGate::Deferred(t2 + Duration::from_millis(500))
        );
        assert_eq!(guard.gate(t2 + Duration::from_millis(500)), FitGate::Allowed);
    }

    #[test]
    fn streaming_output_defers_the_cycle() {
        let mut guard = BufferGuard::new(BufferGuardConfig::default());
        let now = Instant::now();
        guard.record_output("x", now);
        assert_eq!(
            guard.gate(now + Duration::from_millis(50)),
            FitGate::Deferred(now + Duration::from_millis(200))
        );
        assert_eq!(guard.gate(now + Duration::from_millis(200)), FitGate::Allowed);
    }

    #[test]
    fn repair_restores_lost_content_and_replays_tail() {
        let mut renderer = filled(5);
        let before = renderer.content_length();
        let mut guard = BufferGuard::new(BufferGuardConfig::default());
        let now = Instant::now();
        guard.ensure_snapshot(&renderer, now);

        renderer.write("late\r\n");
        guard.record_output("late\r\n", now);
        renderer.resize(2, 10);
        assert!(renderer.content_length() < before);

        renderer.resize(40, 10);
        let outcome = guard.check_and_repair(&mut renderer);
        assert!(matches!(outcome, RepairOutcome::Repaired { .. }));
        assert_eq!(renderer.content_length(), before + "late".len());
        assert_eq!(renderer.lines().last().map(String::as_str), Some("late"));
        assert!(guard.snapshot().is_none());
        assert_eq!(guard.repairs(), 1);
    }

    #[test]
    fn cleared_surface_is_not_repaired_back() {
        let mut renderer = filled(10);
        let mut guard = BufferGuard::new(BufferGuardConfig::default());
        let now = Instant::now();
        guard.begin_drag(&renderer, now);

        renderer.write("\x1b[2J\x1b[Hfresh\r\n");
        guard.record_output("\x1b[2J\x1b[Hfresh\r\n", now);
        guard.end_drag(400, 300);
        assert_eq!(guard.check_and_repair(&mut renderer), RepairOutcome::Intact);
        assert_eq!(renderer.lines().first().map(String::as_str), Some("fresh"));
        assert!(!renderer.text().contains("line 00"));
    }

    #[test]
    fn small_losses_are_left_alone() {
        let mut renderer = filled(10);
        let mut guard = BufferGuard::new(BufferGuardConfig::default());
        guard.ensure_snapshot(&renderer, Instant::now());
        renderer.resize(15, 10);
        assert_eq!(guard.check_and_repair(&mut renderer), RepairOutcome::Intact);
        assert_eq!(guard.check_and_repair(&mut renderer), RepairOutcome::NoSnapshot);
    }
}
