//! Textual constraints on candidate specifications.
//!
//! Two independent checks gate a draft:
//! - the no-code check rejects literal code, diffs, commands, logs and tracker
//!   references;
//! - the structural check requires the four section headers (any order,
//!   case-insensitive).
//!
//! Each rule is a named predicate so the retry loop can report exactly which
//! one failed.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static COMMAND_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?mi)^\s*(?:\$\s*|git\s+\S+|go\s+(?:test|run|build|tool)\b|npm\s+\S+|npx\s+\S+|cargo\s+\S+|bash\b|sh\b)",
    )
    .expect("command line regex")
});
static DIFF_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:diff\s+--git|@@\s|\+\+\+\s|---\s)").expect("diff marker regex")
});
static STACK_TRACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*at\s+\S+\s+\(.+?:\d+").expect("stack trace regex"));
static COMPILER_OUTPUT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)[A-Za-z0-9_./-]+:\d+(?::\d+)?:\s").expect("compiler output regex")
});
static TRACKER_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|\s)(?:#\d+|(?:issue|issues|pr|pull request|pull requests)\s*#?\d+)\b")
        .expect("tracker reference regex")
});

static CONTEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*#{1,6}\s*context\b").expect("context regex"));
static OUTCOMES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*#{1,6}\s*(?:desired outcomes?|goals?)\b").expect("outcomes regex")
});
static CONSTRAINTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^\s*#{1,6}\s*(?:constraints?(?:\s+and\s+non-goals?)?|non-goals?|out of scope)\b",
    )
    .expect("constraints regex")
});
static ACCEPTANCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*#{1,6}\s*(?:acceptance criteria|validation|test expectations?)\b")
        .expect("acceptance regex")
});

/// A required section header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Context,
    DesiredOutcomes,
    Constraints,
    AcceptanceCriteria,
}

impl Section {
    pub const ALL: [Section; 4] = [
        Section::Context,
        Section::DesiredOutcomes,
        Section::Constraints,
        Section::AcceptanceCriteria,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Section::Context => "Context",
            Section::DesiredOutcomes => "Desired Outcomes",
            Section::Constraints => "Constraints and Non-Goals",
            Section::AcceptanceCriteria => "Acceptance Criteria",
        }
    }

    fn pattern(self) -> &'static Regex {
        match self {
            Section::Context => &CONTEXT_RE,
            Section::DesiredOutcomes => &OUTCOMES_RE,
            Section::Constraints => &CONSTRAINTS_RE,
            Section::AcceptanceCriteria => &ACCEPTANCE_RE,
        }
    }
}

/// The first rule a specification text broke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    Empty,
    TooLong { length: usize, max: usize },
    FencedCode,
    InlineCode,
    DiffMarkers,
    CommandLine,
    StackTrace,
    CompilerOutput,
    TrackerReference,
    HunkLikeLine,
    MissingSection(Section),
}

impl Violation {
    /// Missing headers are structural; everything else is a no-code violation.
    pub fn is_structural(&self) -> bool {
        matches!(self, Violation::MissingSection(_))
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Empty => write!(f, "candidatePrompt is empty"),
            Violation::TooLong { length, max } => {
                write!(f, "candidatePrompt exceeds max length ({length} > {max})")
            }
            Violation::FencedCode => write!(f, "candidatePrompt contains fenced code block"),
            Violation::InlineCode => write!(f, "candidatePrompt contains inline code marker"),
            Violation::DiffMarkers => write!(f, "candidatePrompt contains diff markers"),
            Violation::CommandLine => {
                write!(f, "candidatePrompt appears to include command lines")
            }
            Violation::StackTrace => {
                write!(f, "candidatePrompt appears to include stack trace lines")
            }
            Violation::CompilerOutput => {
                write!(f, "candidatePrompt appears to include compiler/log output")
            }
            Violation::TrackerReference => write!(
                f,
                "candidatePrompt includes issue/PR references (for example #123)"
            ),
            Violation::HunkLikeLine => write!(f, "candidatePrompt has code-like prefixed lines"),
            Violation::MissingSection(section) => write!(f, "missing # {} section", section.title()),
        }
    }
}

impl std::error::Error for Violation {}

pub fn has_fenced_code(text: &str) -> bool {
    text.contains("```")
}

pub fn has_inline_code(text: &str) -> bool {
    text.contains('`')
}

pub fn has_diff_markers(text: &str) -> bool {
    DIFF_MARKER_RE.is_match(text)
}

pub fn has_command_line(text: &str) -> bool {
    COMMAND_LINE_RE.is_match(text)
}

pub fn has_stack_trace(text: &str) -> bool {
    STACK_TRACE_RE.is_match(text)
}

pub fn has_compiler_output(text: &str) -> bool {
    COMPILER_OUTPUT_RE.is_match(text)
}

pub fn has_tracker_reference(text: &str) -> bool {
    TRACKER_REF_RE.is_match(text)
}

/// Remove tracker references (`#123`, `issue 9`, `PR 12`) along with their
/// leading whitespace.
pub fn strip_tracker_references(text: &str) -> String {
    TRACKER_REF_RE.replace_all(text, "").into_owned()
}

/// A trimmed line starting with `+`/`-` directly followed by a non-space.
pub fn has_hunk_like_line(text: &str) -> bool {
    text.lines().map(str::trim).any(|line| {
        let bytes = line.as_bytes();
        matches!(bytes.first(), Some(b'+' | b'-')) && bytes.len() > 1 && bytes[1] != b' '
    })
}

pub fn missing_section(text: &str) -> Option<Section> {
    Section::ALL
        .into_iter()
        .find(|section| !section.pattern().is_match(text))
}

pub fn has_all_required_sections(text: &str) -> bool {
    missing_section(text).is_none()
}

/// No-code check. `max_length == 0` disables the length cap.
pub fn validate_no_code(text: &str, max_length: usize) -> Result<(), Violation> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Violation::Empty);
    }
    if max_length > 0 && text.len() > max_length {
        return Err(Violation::TooLong {
            length: text.len(),
            max: max_length,
        });
    }

    let rules: [(fn(&str) -> bool, Violation); 8] = [
        (has_fenced_code, Violation::FencedCode),
        (has_inline_code, Violation::InlineCode),
        (has_diff_markers, Violation::DiffMarkers),
        (has_command_line, Violation::CommandLine),
        (has_stack_trace, Violation::StackTrace),
        (has_compiler_output, Violation::CompilerOutput),
        (has_tracker_reference, Violation::TrackerReference),
        (has_hunk_like_line, Violation::HunkLikeLine),
    ];
    for (predicate, violation) in rules {
        if predicate(text) {
            return Err(violation);
        }
    }
    Ok(())
}

/// Structural check: all four section headers present.
pub fn validate_structure(text: &str) -> Result<(), Violation> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Violation::Empty);
    }
    match missing_section(text) {
        Some(section) => Err(Violation::MissingSection(section)),
        None => Ok(()),
    }
}

/// Both checks; a draft is usable for execution only when this passes.
pub fn validate_prompt(text: &str, max_length: usize) -> Result<(), Violation> {
    validate_no_code(text, max_length)?;
    validate_structure(text)
}
