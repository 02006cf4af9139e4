//! Keystroke routing between local directives and the remote shell.
//!
//! The router is a prefix automaton over the current line. While the line
//! could still be a directive its characters are held and echoed locally;
//! the moment it cannot, the held characters are flushed to the remote in
//! order and the rest of the line passes through untouched. A completed
//! line is therefore either resolved locally or forwarded, never both.

use std::collections::{HashMap, VecDeque};
use tracing::{debug, trace};

use super::directives::{self, Classification, Directive, DirectiveSpec};
use super::modes::ModeKind;

/// Erases one locally echoed glyph.
const ERASE_ONE: &str = "\x08 \x08";
pub const ENTER: &str = "\r";
pub const INTERRUPT: &str = "\x03";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputUnit {
    Char(char),
    Enter,
    /// Carries the byte the keyboard sent (0x7f or 0x08).
    Backspace(char),
    Interrupt,
    Escape(String),
    Control(char),
}

impl InputUnit {
    /// The bytes to forward for this unit.
    pub fn raw(&self) -> String {
        match self {
            InputUnit::Char(ch) | InputUnit::Backspace(ch) | InputUnit::Control(ch) => {
                ch.to_string()
            }
            InputUnit::Enter => ENTER.to_string(),
            InputUnit::Interrupt => INTERRUPT.to_string(),
            InputUnit::Escape(seq) => seq.clone(),
        }
    }
}

/// Split raw keyboard data into units. `\r\n` is a single Enter.
pub fn split_units(data: &str) -> Vec<InputUnit> {
    let mut units = Vec::new();
    let mut chars = data.chars().peekable();
    while let Some(ch) = chars.next() {
        let unit = match ch {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                InputUnit::Enter
            }
            '\n' => InputUnit::Enter,
            '\x7f' | '\x08' => InputUnit::Backspace(ch),
            '\x03' => InputUnit::Interrupt,
            '\x1b' => {
                let mut seq = String::from(ch);
                match chars.peek().copied() {
                    Some('[') => {
                        seq.push('[');
                        chars.next();
                        while let Some(next) = chars.next() {
                            seq.push(next);
                            if ('\x40'..='\x7e').contains(&next) {
                                break;
                            }
                        }
                    }
                    Some('O') => {
                        seq.push('O');
                        chars.next();
                        if let Some(next) = chars.next() {
                            seq.push(next);
                        }
                    }
                    Some(next) if !next.is_control() => {
                        seq.push(next);
                        chars.next();
                    }
                    _ => {}
                }
                InputUnit::Escape(seq)
            }
            c if c.is_control() => InputUnit::Control(c),
            c => InputUnit::Char(c),
        };
        units.push(unit);
    }
    units
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAction {
    /// Send to the remote PTY as `terminal:data`.
    Forward(String),
    /// Write to the local surface only.
    Echo(String),
    Resolve(Directive),
    Usage(&'static DirectiveSpec),
    /// A completed line while a mode claims exclusive routing.
    Broadcast { claimant: ModeKind, line: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineMode {
    /// Nothing of this line has reached the remote yet.
    Holding,
    /// At least one byte went out; the remote owns the line.
    PassThrough,
}

/// Bounded history of lines that went to the remote shell.
#[derive(Debug, Clone)]
pub struct CommandHistory {
    entries: VecDeque<String>,
    capacity: usize,
}

impl CommandHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(line.to_string());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest first.
    pub fn recent(&self, n: usize) -> Vec<&str> {
        self.entries.iter().rev().take(n).map(String::as_str).collect()
    }

    /// Commands seen at least `min` times, most frequent first.
    pub fn repeated(&self, min: usize) -> Vec<(String, usize)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for entry in &self.entries {
            *counts.entry(entry.as_str()).or_default() += 1;
        }
        let mut repeated: Vec<(String, usize)> = counts
            .into_iter()
            .filter(|(_, count)| *count >= min)
            .map(|(command, count)| (command.to_string(), count))
            .collect();
        repeated.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        repeated
    }
}

#[derive(Debug)]
pub struct CommandRouter {
    buffer: String,
    mode: LineMode,
    /// The remote line may differ from `buffer` (history recall, completion).
    tainted: bool,
    history: CommandHistory,
}

impl CommandRouter {
    pub fn new(history_limit: usize) -> Self {
        Self {
            buffer: String::new(),
            mode: LineMode::Holding,
            tainted: false,
            history: CommandHistory::new(history_limit),
        }
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    /// Characters held locally and not yet sent.
    pub fn held(&self) -> &str {
        match self.mode {
            LineMode::Holding => &self.buffer,
            LineMode::PassThrough => "",
        }
    }

    /// Route one chunk of keyboard data. `claim` is the first active mode
    /// that claims exclusive routing, if any.
    pub fn route(&mut self, data: &str, claim: Option<ModeKind>) -> Vec<RouteAction> {
        let mut actions = Vec::new();
        for unit in split_units(data) {
            match claim {
                Some(claimant) => self.route_exclusive(unit, claimant, &mut actions),
                None => self.route_local(unit, &mut actions),
            }
        }
        actions
    }

    fn reset_line(&mut self) {
        self.buffer.clear();
        self.mode = LineMode::Holding;
        self.tainted = false;
    }

    /// Erase the local echo and send the held characters followed by
    /// `extra`. The line becomes pass-through.
    fn flush_held(&mut self, extra: &str, actions: &mut Vec<RouteAction>) {
        let held_len = self.buffer.chars().count() - extra.chars().count();
        if held_len > 0 {
            actions.push(RouteAction::Echo(ERASE_ONE.repeat(held_len)));
            trace!(target: "bridge::router", held = held_len, "flushing held prefix");
        }
        actions.push(RouteAction::Forward(self.buffer.clone()));
        self.mode = LineMode::PassThrough;
    }

    fn route_exclusive(
        &mut self,
        unit: InputUnit,
        claimant: ModeKind,
        actions: &mut Vec<RouteAction>,
    ) {
        if self.mode == LineMode::Holding && !self.buffer.is_empty() {
            self.flush_held("", actions);
        }
        actions.push(RouteAction::Forward(unit.raw()));
        match unit {
            InputUnit::Char(ch) => {
                self.buffer.push(ch);
                self.mode = LineMode::PassThrough;
            }
            InputUnit::Backspace(_) => {
                self.buffer.pop();
            }
            InputUnit::Enter => {
                let line = self.buffer.trim().to_string();
                if !line.is_empty() {
                    self.history.push(&line);
                    actions.push(RouteAction::Broadcast { claimant, line });
                }
                self.reset_line();
            }
            InputUnit::Interrupt => self.reset_line(),
            InputUnit::Escape(_) | InputUnit::Control(_) => {
                self.tainted = true;
                self.mode = LineMode::PassThrough;
            }
        }
    }

    fn route_local(&mut self, unit: InputUnit, actions: &mut Vec<RouteAction>) {
        match self.mode {
            LineMode::Holding => self.route_holding(unit, actions),
            LineMode::PassThrough => self.route_passthrough(unit, actions),
        }
    }

    fn route_holding(&mut self, unit: InputUnit, actions: &mut Vec<RouteAction>) {
        match unit {
            InputUnit::Char(ch) => {
                self.buffer.push(ch);
                if directives::classify(&self.buffer).is_local() {
                    actions.push(RouteAction::Echo(ch.to_string()));
                } else {
                    self.flush_held(&ch.to_string(), actions);
                }
            }
            InputUnit::Backspace(raw) => {
                if self.buffer.pop().is_some() {
                    actions.push(RouteAction::Echo(ERASE_ONE.to_string()));
                } else {
                    actions.push(RouteAction::Forward(raw.to_string()));
                }
            }
            InputUnit::Enter => {
                let classification = directives::classify(&self.buffer);
                match classification {
                    Classification::Complete(directive) => {
                        debug!(target: "bridge::router", directive = directive.name(), "resolving locally");
                        actions.push(RouteAction::Echo("\r\n".into()));
                        actions.push(RouteAction::Resolve(directive));
                        self.reset_line();
                    }
                    Classification::Usage(spec) => {
                        actions.push(RouteAction::Echo("\r\n".into()));
                        actions.push(RouteAction::Usage(spec));
                        self.reset_line();
                    }
                    Classification::Prefix | Classification::NotDirective => {
                        if !self.buffer.is_empty() {
                            self.flush_held("", actions);
                        }
                        self.complete_remote_line(actions);
                    }
                }
            }
            InputUnit::Interrupt => {
                let held = self.buffer.chars().count();
                if held > 0 {
                    actions.push(RouteAction::Echo(ERASE_ONE.repeat(held)));
                }
                actions.push(RouteAction::Forward(INTERRUPT.into()));
                self.reset_line();
            }
            InputUnit::Escape(_) | InputUnit::Control(_) => {
                if !self.buffer.is_empty() {
                    self.flush_held("", actions);
                }
                actions.push(RouteAction::Forward(unit.raw()));
                self.mode = LineMode::PassThrough;
                self.tainted = true;
            }
        }
    }

    fn route_passthrough(&mut self, unit: InputUnit, actions: &mut Vec<RouteAction>) {
        match unit {
            InputUnit::Char(ch) => {
                self.buffer.push(ch);
                actions.push(RouteAction::Forward(ch.to_string()));
            }
            InputUnit::Backspace(raw) => {
                self.buffer.pop();
                actions.push(RouteAction::Forward(raw.to_string()));
                if self.buffer.is_empty() && !self.tainted {
                    self.mode = LineMode::Holding;
                }
            }
            InputUnit::Enter => self.complete_remote_line(actions),
            InputUnit::Interrupt => {
                actions.push(RouteAction::Forward(INTERRUPT.into()));
                self.reset_line();
            }
            InputUnit::Escape(_) | InputUnit::Control(_) => {
                actions.push(RouteAction::Forward(unit.raw()));
                self.tainted = true;
            }
        }
    }

    fn complete_remote_line(&mut self, actions: &mut Vec<RouteAction>) {
        actions.push(RouteAction::Forward(ENTER.into()));
        if !self.tainted {
            self.history.push(&self.buffer);
        }
        self.reset_line();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forwarded(actions: &[RouteAction]) -> Vec<String> {
        actions
            .iter()
            .filter_map(|action| match action {
                RouteAction::Forward(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    fn type_keys(router: &mut CommandRouter, keys: &str, claim: Option<ModeKind>) -> Vec<RouteAction> {
        keys.chars()
            .flat_map(|key| router.route(&key.to_string(), claim))
            .collect()
    }

    #[test]
    fn splits_enter_variants_and_escape_sequences() {
        assert_eq!(
            split_units("a\r\nb\n\x1b[A\x1bOP\x7f\x03\t"),
            vec![
                InputUnit::Char('a'),
                InputUnit::Enter,
                InputUnit::Char('b'),
                InputUnit::Enter,
                InputUnit::Escape("\x1b[A".into()),
                InputUnit::Escape("\x1bOP".into()),
                InputUnit::Backspace('\x7f'),
                InputUnit::Interrupt,
                InputUnit::Control('\t'),
            ]
        );
    }

    #[test]
    fn shell_line_is_forwarded_key_by_key() {
        let mut router = CommandRouter::new(100);
        let actions = type_keys(&mut router, "echo hi\r", None);
        assert_eq!(
            forwarded(&actions),
            vec!["e", "c", "h", "o", " ", "h", "i", "\r"]
        );
        assert_eq!(router.history().recent(1), vec!["echo hi"]);
    }

    #[test]
    fn help_never_reaches_the_remote() {
        let mut router = CommandRouter::new(100);
        let actions = type_keys(&mut router, "/help\r", None);
        assert!(forwarded(&actions).is_empty());
        assert!(
            actions
                .iter()
                .any(|action| matches!(action, RouteAction::Resolve(d) if d.name() == "help"))
        );
        assert!(router.history().is_empty());
    }

    #[test]
    fn leading_blanks_are_held_with_the_directive() {
        let mut router = CommandRouter::new(100);
        let actions = type_keys(&mut router, " /help\r", None);
        assert!(forwarded(&actions).is_empty(), "{actions:?}");
        assert!(
            actions
                .iter()
                .any(|action| matches!(action, RouteAction::Resolve(d) if d.name() == "help"))
        );

        let actions = type_keys(&mut router, "  ls\r", None);
        assert_eq!(forwarded(&actions), vec!["  l", "s", "\r"]);
        assert!(actions.contains(&RouteAction::Echo(ERASE_ONE.repeat(2))));
        assert_eq!(router.history().recent(1), vec!["ls"]);
    }

    #[test]
    fn diverging_prefix_flushes_held_characters_in_order() {
        let mut router = CommandRouter::new(100);
        let actions = type_keys(&mut router, "/hex\r", None);
        assert_eq!(forwarded(&actions), vec!["/hex", "\r"]);
        assert!(actions.contains(&RouteAction::Echo(ERASE_ONE.repeat(3))));
        assert_eq!(router.history().recent(1), vec!["/hex"]);
    }

    #[test]
    fn unfinished_prefix_on_enter_is_not_dropped() {
        let mut router = CommandRouter::new(100);
        let actions = type_keys(&mut router, "/he\r", None);
        assert_eq!(forwarded(&actions), vec!["/he", "\r"]);
    }

    #[test]
    fn backspace_on_held_prefix_erases_locally() {
        let mut router = CommandRouter::new(100);
        let actions = type_keys(&mut router, "/hx\x7f\x7f\x7felp\r", None);
        assert_eq!(
            forwarded(&actions),
            vec!["/hx", "\x7f", "\x7f", "\x7f", "e", "l", "p", "\r"]
        );

        let actions = type_keys(&mut router, "/st\x7f\x7f\x7f/help\r", None);
        assert!(forwarded(&actions).is_empty(), "{actions:?}");
    }

    #[test]
    fn emptied_line_reenables_directive_detection() {
        let mut router = CommandRouter::new(100);
        type_keys(&mut router, "ab\x7f\x7f", None);
        let actions = type_keys(&mut router, "/status\r", None);
        assert!(forwarded(&actions).is_empty());
    }

    #[test]
    fn interrupt_discards_held_line() {
        let mut router = CommandRouter::new(100);
        let actions = type_keys(&mut router, "/rev\x03", None);
        assert_eq!(forwarded(&actions), vec!["\x03"]);
        assert_eq!(router.buffer(), "");
    }

    #[test]
    fn escape_on_held_line_flushes_first() {
        let mut router = CommandRouter::new(100);
        let actions = type_keys(&mut router, "/", None);
        assert!(forwarded(&actions).is_empty());
        let actions = router.route("\x1b[A", None);
        assert_eq!(forwarded(&actions), vec!["/", "\x1b[A"]);
        let actions = router.route("\r", None);
        assert_eq!(forwarded(&actions), vec!["\r"]);
        assert!(router.history().is_empty());
    }

    #[test]
    fn exclusive_claim_forwards_everything_verbatim() {
        let mut router = CommandRouter::new(100);
        let actions = type_keys(&mut router, "/help\x7fp\r", Some(ModeKind::AiTeam));
        assert_eq!(
            forwarded(&actions),
            vec!["/", "h", "e", "l", "p", "\x7f", "p", "\r"]
        );
        assert!(actions.contains(&RouteAction::Broadcast {
            claimant: ModeKind::AiTeam,
            line: "/help".into(),
        }));
        assert!(!actions.iter().any(|action| matches!(action, RouteAction::Resolve(_))));
    }

    #[test]
    fn claim_arriving_mid_line_flushes_held_prefix() {
        let mut router = CommandRouter::new(100);
        type_keys(&mut router, "/he", None);
        let actions = router.route("l", Some(ModeKind::AiTeam));
        assert_eq!(forwarded(&actions), vec!["/he", "l"]);
    }

    #[test]
    fn history_is_bounded_and_counts_repeats() {
        let mut history = CommandHistory::new(3);
        for line in ["ls", "cargo test", "cargo test", "git status"] {
            history.push(line);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.recent(2), vec!["git status", "cargo test"]);
        assert_eq!(history.repeated(2), vec![("cargo test".to_string(), 2)]);
    }
}
