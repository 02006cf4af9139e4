//! Text blocks written to the terminal surface. Every block starts on a
//! fresh line and ends with `\r\n`.

use serde_json::Value;
use std::time::{Duration, Instant};

use super::{DIRECTIVES, DirectiveError, DirectiveOutput, DirectiveSpec, Resolution};
use crate::session::TerminalSession;

const DIM: &str = "\x1b[2m";
const BOLD: &str = "\x1b[1m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

fn lines_to_block<I, S>(lines: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut block = String::new();
    for line in lines {
        block.push_str(line.as_ref());
        block.push_str("\r\n");
    }
    block
}

pub fn help_block() -> String {
    let width = DIRECTIVES
        .iter()
        .map(|spec| spec.usage.len())
        .max()
        .unwrap_or(0);
    let mut lines = vec![format!("{BOLD}Bridge directives{RESET}")];
    for spec in DIRECTIVES {
        let marker = match spec.resolution {
            Resolution::Local => "",
            Resolution::Service => " *",
        };
        lines.push(format!(
            "  {CYAN}{:width$}{RESET}  {}{marker}",
            spec.usage, spec.summary
        ));
    }
    lines.push(format!(
        "{DIM}* answered by the directive service. Anything else goes to the shell.{RESET}"
    ));
    lines_to_block(lines)
}

pub fn usage_block(spec: &DirectiveSpec) -> String {
    lines_to_block([
        format!("{YELLOW}usage:{RESET} {}", spec.usage),
        format!("  {}", spec.summary),
    ])
}

/// A line of mode state for `/status`, e.g. `("ai-team", "active (3 agents)")`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeLine {
    pub mode: String,
    pub state: String,
}

#[derive(Debug)]
pub struct StatusReport<'a> {
    pub session: &'a TerminalSession,
    pub endpoint: String,
    pub modes: Vec<ModeLine>,
    pub recent: Vec<String>,
    pub hooks: Vec<(String, usize)>,
    pub now: Instant,
}

pub fn status_block(report: &StatusReport<'_>) -> String {
    let session = report.session;
    let connection = if session.exited {
        match session.exit_code {
            Some(code) => format!("exited ({code})"),
            None => "exited".to_string(),
        }
    } else if session.connected {
        "connected".to_string()
    } else {
        "reconnecting".to_string()
    };

    let mut lines = vec![
        format!("{BOLD}Session{RESET}"),
        format!("  id          {}", session.id),
        format!("  endpoint    {}", report.endpoint),
        format!("  state       {connection}"),
        format!(
            "  pid         {}",
            session
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".into())
        ),
        format!("  size        {}x{}", session.cols, session.rows),
        format!("  uptime      {}", format_duration(session.uptime(report.now))),
        format!("  idle        {}", format_duration(session.idle(report.now))),
        format!(
            "  traffic     {} in / {} out",
            format_bytes(session.bytes_in),
            format_bytes(session.bytes_out)
        ),
        format!("  reattached  {} time(s)", session.reattachments),
        format!("{BOLD}Modes{RESET}"),
    ];
    for mode in &report.modes {
        lines.push(format!("  {:<12}{}", mode.mode, mode.state));
    }
    if !report.recent.is_empty() {
        lines.push(format!("{BOLD}Recent commands{RESET}"));
        for command in &report.recent {
            lines.push(format!("  {command}"));
        }
    }
    if !report.hooks.is_empty() {
        lines.push(format!("{BOLD}Suggested hooks{RESET}"));
        for (command, count) in &report.hooks {
            lines.push(format!("  {command}  {DIM}(run {count} times){RESET}"));
        }
    }
    lines_to_block(lines)
}

pub fn config_block(rendered: &str) -> String {
    let mut lines = vec![format!("{BOLD}Effective configuration{RESET}")];
    lines.extend(rendered.lines().map(|line| format!("  {line}")));
    lines_to_block(lines)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoctorCheck {
    pub name: &'static str,
    pub ok: bool,
    pub detail: String,
}

pub fn doctor_block(checks: &[DoctorCheck]) -> String {
    let mut lines = vec![format!("{BOLD}Bridge doctor{RESET}")];
    for check in checks {
        let mark = if check.ok {
            format!("{CYAN}ok{RESET}  ")
        } else {
            format!("{RED}fail{RESET}")
        };
        lines.push(format!("  {mark} {:<12} {}", check.name, check.detail));
    }
    lines_to_block(lines)
}

pub fn output_block(name: &str, output: &DirectiveOutput) -> String {
    let mut lines = vec![format!("{BOLD}/{name}{RESET}")];
    match output {
        DirectiveOutput::Text(text) => lines.extend(text.lines().map(str::to_string)),
        DirectiveOutput::Structured(value) => lines.extend(format_structured(value)),
    }
    lines_to_block(lines)
}

pub fn error_block(name: &str, error: &DirectiveError) -> String {
    let mut lines = vec![format!("{RED}/{name} failed:{RESET} {error}")];
    if let Some(hint) = error.suggestion() {
        lines.push(format!("  {DIM}{hint}{RESET}"));
    }
    lines_to_block(lines)
}

/// One-line notice such as a reconnect or mode banner.
pub fn banner(text: &str) -> String {
    format!("\r\n{YELLOW}[bridge]{RESET} {text}\r\n")
}

pub fn advisory_block(suggestion: &str, command: Option<&str>, confidence: Option<f32>) -> String {
    let mut lines = vec![format!("{CYAN}[supervisor]{RESET} {suggestion}")];
    if let Some(command) = command {
        let confidence = confidence
            .map(|value| format!(" ({:.0}% confidence)", value * 100.0))
            .unwrap_or_default();
        lines.push(format!("  {DIM}suggested:{RESET} {command}{confidence}"));
        lines.push(format!("  {DIM}not executed; type it yourself to run it{RESET}"));
    }
    let mut block = String::from("\r\n");
    block.push_str(&lines_to_block(lines));
    block
}

/// Objects become aligned `key: value` lines; nested keys are dotted.
pub fn format_structured(value: &Value) -> Vec<String> {
    let mut pairs = Vec::new();
    flatten("", value, &mut pairs);
    if pairs.len() == 1 && pairs[0].0.is_empty() {
        return pairs.remove(0).1.lines().map(str::to_string).collect();
    }
    let width = pairs.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    pairs
        .into_iter()
        .map(|(key, value)| format!("{:width$}: {value}", key))
        .collect()
}

fn flatten(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, nested) in map {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&key, nested, out);
            }
        }
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(scalar).collect();
            out.push((prefix.to_string(), rendered.join(", ")));
        }
        other => out.push((prefix.to_string(), scalar(other))),
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3599 => format!("{}m {}s", secs / 60, secs % 60),
        _ => format!("{}h {}m", secs / 3600, (secs % 3600) / 60),
    }
}

fn format_bytes(bytes: u64) -> String {
    match bytes {
        0..=1023 => format!("{bytes} B"),
        1024..=1_048_575 => format!("{:.1} KiB", bytes as f64 / 1024.0),
        _ => format!("{:.1} MiB", bytes as f64 / 1_048_576.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::renderer::{MemoryRenderer, Renderer};
    use crate::session::SessionId;
    use serde_json::json;

    #[test]
    fn help_lists_every_directive() {
        let mut renderer = MemoryRenderer::new(120, 40);
        renderer.write(&help_block());
        let text = renderer.text();
        for spec in DIRECTIVES {
            assert!(text.contains(spec.usage), "missing {}", spec.usage);
        }
    }

    #[test]
    fn structured_output_is_aligned() {
        let lines = format_structured(&json!({
            "model": "large",
            "usage": {"input": 10, "output": 4},
            "tags": ["a", "b"]
        }));
        assert_eq!(
            lines,
            vec![
                "model       : large",
                "tags        : a, b",
                "usage.input : 10",
                "usage.output: 4",
            ]
        );
    }

    #[test]
    fn scalar_structured_output_is_printed_plainly() {
        assert_eq!(format_structured(&json!("just text")), vec!["just text"]);
    }

    #[test]
    fn status_includes_session_summary_and_hooks() {
        let now = Instant::now();
        let mut session = TerminalSession::new(SessionId::new(), 100, 30, now);
        session.on_created(99, now);
        let report = StatusReport {
            session: &session,
            endpoint: "ws://127.0.0.1:4100".into(),
            modes: vec![ModeLine {
                mode: "ai-team".into(),
                state: "off".into(),
            }],
            recent: vec!["cargo test".into()],
            hooks: vec![("cargo test".into(), 4)],
            now: now + Duration::from_secs(75),
        };
        let mut renderer = MemoryRenderer::new(120, 40);
        renderer.write(&status_block(&report));
        let text = renderer.text();
        assert!(text.contains(session.id.as_str()));
        assert!(text.contains("100x30"));
        assert!(text.contains("1m 15s"));
        assert!(text.contains("run 4 times"));
    }

    #[test]
    fn durations_are_compact() {
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m");
        assert_eq!(format_bytes(2048), "2.0 KiB");
    }
}
