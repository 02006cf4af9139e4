//! Locally interpreted directives.
//!
//! Everything the router knows about directives lives in [`DIRECTIVES`];
//! adding one means adding a row there (and a resolver for service rows).

pub mod blocks;
pub mod resolver;

pub use resolver::{
    DirectiveError, DirectiveOutput, DirectiveRequest, DirectiveResolver, HttpDirectiveResolver,
    UnavailableResolver,
};

/// Leading sigil of every directive line.
pub const SIGIL: char = '/';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// `/name` and nothing else.
    Fixed,
    /// `/name <rest>`; rest is required.
    Rest,
    /// `/name <word> <rest>`; both required.
    WordRest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Answered from local state.
    Local,
    /// Delegated to a [`DirectiveResolver`].
    Service,
}

#[derive(Debug, PartialEq, Eq)]
pub struct DirectiveSpec {
    pub name: &'static str,
    pub arity: Arity,
    pub resolution: Resolution,
    pub usage: &'static str,
    pub summary: &'static str,
}

pub const DIRECTIVES: &[DirectiveSpec] = &[
    DirectiveSpec {
        name: "help",
        arity: Arity::Fixed,
        resolution: Resolution::Local,
        usage: "/help",
        summary: "Show this list",
    },
    DirectiveSpec {
        name: "clear",
        arity: Arity::Fixed,
        resolution: Resolution::Local,
        usage: "/clear",
        summary: "Clear the terminal surface",
    },
    DirectiveSpec {
        name: "status",
        arity: Arity::Fixed,
        resolution: Resolution::Local,
        usage: "/status",
        summary: "Session summary, active modes and suggested hooks",
    },
    DirectiveSpec {
        name: "config",
        arity: Arity::Fixed,
        resolution: Resolution::Local,
        usage: "/config",
        summary: "Print the effective bridge configuration",
    },
    DirectiveSpec {
        name: "cost",
        arity: Arity::Fixed,
        resolution: Resolution::Service,
        usage: "/cost",
        summary: "Usage and spend for this session",
    },
    DirectiveSpec {
        name: "model",
        arity: Arity::Fixed,
        resolution: Resolution::Service,
        usage: "/model",
        summary: "Show the model serving directives",
    },
    DirectiveSpec {
        name: "init",
        arity: Arity::Fixed,
        resolution: Resolution::Service,
        usage: "/init",
        summary: "Generate project context for the working directory",
    },
    DirectiveSpec {
        name: "review",
        arity: Arity::Fixed,
        resolution: Resolution::Service,
        usage: "/review",
        summary: "Review recent changes",
    },
    DirectiveSpec {
        name: "doctor",
        arity: Arity::Fixed,
        resolution: Resolution::Local,
        usage: "/doctor",
        summary: "Check connection and service health",
    },
    DirectiveSpec {
        name: "ui",
        arity: Arity::Rest,
        resolution: Resolution::Service,
        usage: "/ui <description>",
        summary: "Generate a UI component",
    },
    DirectiveSpec {
        name: "agent",
        arity: Arity::WordRest,
        resolution: Resolution::Service,
        usage: "/agent <name> <task>",
        summary: "Run a task with a named agent",
    },
    DirectiveSpec {
        name: "repo",
        arity: Arity::Rest,
        resolution: Resolution::Service,
        usage: "/repo <query>",
        summary: "Ask a question about the repository",
    },
];

pub fn lookup(name: &str) -> Option<&'static DirectiveSpec> {
    DIRECTIVES.iter().find(|spec| spec.name == name)
}

/// A complete, resolvable directive line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub spec: &'static DirectiveSpec,
    pub args: Vec<String>,
}

impl Directive {
    pub fn name(&self) -> &'static str {
        self.spec.name
    }

    pub fn is_local(&self) -> bool {
        self.spec.resolution == Resolution::Local
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    NotDirective,
    /// Could still become a directive.
    Prefix,
    Complete(Directive),
    /// A family keyword missing its arguments.
    Usage(&'static DirectiveSpec),
}

impl Classification {
    /// Whether a line in this state stays local.
    pub fn is_local(&self) -> bool {
        !matches!(self, Classification::NotDirective)
    }
}

/// Classify the trimmed command buffer against [`DIRECTIVES`].
pub fn classify(line: &str) -> Classification {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Classification::Prefix;
    }
    let Some(body) = trimmed.strip_prefix(SIGIL) else {
        return Classification::NotDirective;
    };

    let (word, rest) = match body.find(char::is_whitespace) {
        Some(split) => (&body[..split], body[split..].trim_start()),
        None => (body, ""),
    };

    if let Some(spec) = lookup(word) {
        return match spec.arity {
            Arity::Fixed if rest.is_empty() => Classification::Complete(Directive {
                spec,
                args: Vec::new(),
            }),
            Arity::Fixed => Classification::NotDirective,
            Arity::Rest if rest.is_empty() => Classification::Usage(spec),
            Arity::Rest => Classification::Complete(Directive {
                spec,
                args: vec![rest.to_string()],
            }),
            Arity::WordRest => match rest.find(char::is_whitespace) {
                Some(split) => Classification::Complete(Directive {
                    spec,
                    args: vec![
                        rest[..split].to_string(),
                        rest[split..].trim_start().to_string(),
                    ],
                }),
                None => Classification::Usage(spec),
            },
        };
    }

    if rest.is_empty() && DIRECTIVES.iter().any(|spec| spec.name.starts_with(word)) {
        Classification::Prefix
    } else {
        Classification::NotDirective
    }
}
