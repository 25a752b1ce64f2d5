//! Deterministic, lossy normalisation of generator output into the strict
//! flowchart grammar.
//!
//! The pass is a chain of small pure steps:
//! [`strip_fences`] → [`split_lines`] → [`classify_line`] →
//! [`sanitize_line`] → [`rejoin`]. Stray punctuation and over-long labels
//! are removed silently; only the total absence of structure is an error.

use crate::diagram::{
    Direction, Graph, GraphBuilder, MAX_EDGE_LABEL, MAX_NODE_LABEL, parse_statement,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, warn};

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)```").expect("valid fence regex")
});

static DIRECTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:flowchart|graph)\s+(TD|TB|LR)\s*;?$").expect("valid direction regex")
});

static ARROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-{2,}>|-\.+-+>|={2,}>").expect("valid arrow regex"));

static NODE_DECLARATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w+\s*[\[{(]").expect("valid node regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DiagramError {
    #[error("Generated flowchart is empty. Please try again.")]
    Empty,

    #[error("Generated flowchart is missing connections. Please try again.")]
    Disconnected,
}

impl DiagramError {
    /// Regenerating from the same prompt may succeed.
    pub fn is_retryable(&self) -> bool {
        true
    }
}

/// What to do when sanitization leaves no edges at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Always require at least one edge.
    #[default]
    Strict,
    /// Accept an edge-less diagram when the generator declared the direction
    /// itself and at least one node declaration survived.
    Lenient,
}

/// Output of [`sanitize`]: grammar-conforming text plus its parsed structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    pub text: String,
    pub graph: Graph,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Direction(Direction),
    Comment,
    Statement,
    NodeDeclaration,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    /// `[..]`
    Process,
    /// `{..}`
    Decision,
    /// `|..|`
    Edge,
}

impl LabelKind {
    fn max_len(self) -> usize {
        match self {
            LabelKind::Process | LabelKind::Decision => MAX_NODE_LABEL,
            LabelKind::Edge => MAX_EDGE_LABEL,
        }
    }

    fn allows(self, c: char) -> bool {
        if c.is_ascii_alphanumeric() || c == ' ' || c == '-' {
            return true;
        }
        match self {
            LabelKind::Process => matches!(c, '(' | ')' | '.'),
            LabelKind::Decision => matches!(c, '(' | ')' | '.' | '?'),
            LabelKind::Edge => false,
        }
    }
}

// ── Steps ───────────────────────────────────────────────────────

/// Return the body of the first fenced code block, or the trimmed text when
/// there is none. An opening fence without a closing one is dropped.
pub fn strip_fences(raw: &str) -> &str {
    if let Some(caps) = FENCED_BLOCK.captures(raw) {
        if let Some(body) = caps.get(1) {
            return body.as_str().trim();
        }
    }
    let trimmed = raw.trim();
    if trimmed.starts_with("```") {
        return match trimmed.split_once('\n') {
            Some((_, rest)) => rest.trim(),
            None => "",
        };
    }
    trimmed
}

/// Trimmed, non-blank lines.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect()
}

pub fn classify_line(line: &str) -> LineKind {
    if let Some(caps) = DIRECTION_LINE.captures(line) {
        let direction = match caps[1].to_ascii_uppercase().as_str() {
            "LR" => Direction::LeftRight,
            _ => Direction::TopDown,
        };
        return LineKind::Direction(direction);
    }
    if line.starts_with("%%") {
        return LineKind::Comment;
    }
    if ARROW.is_match(line) {
        return LineKind::Statement;
    }
    if NODE_DECLARATION.is_match(line) {
        return LineKind::NodeDeclaration;
    }
    LineKind::Other
}

/// Strip characters the label kind doesn't allow, collapse whitespace, and
/// truncate.
pub fn sanitize_label(content: &str, kind: LabelKind) -> String {
    let kept: String = content
        .chars()
        .filter(|c| !matches!(c, ':' | ';' | '"' | '\'' | '`'))
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|&c| kind.allows(c))
        .collect();
    let collapsed = kept.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated: String = collapsed.chars().take(kind.max_len()).collect();
    truncated.trim_end().to_string()
}

fn sanitize_id(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Shape(LabelKind, String),
    EdgeLabel(String),
    Arrow,
}

/// Length of an arrow token starting at `i`: `-->` with any number of
/// dashes, dotted `-.->` or thick `==>`. All of them become `-->`.
fn arrow_len(chars: &[char], i: usize) -> Option<usize> {
    let run = |from: usize, c: char| chars[from..].iter().take_while(|&&x| x == c).count();
    let body = match chars.get(i)? {
        '-' => {
            let dashes = run(i, '-');
            if dashes >= 2 {
                dashes
            } else {
                let dots = run(i + 1, '.');
                let tail = run(i + 1 + dots, '-');
                if dots == 0 || tail == 0 {
                    return None;
                }
                1 + dots + tail
            }
        }
        '=' => Some(run(i, '=')).filter(|&n| n >= 2)?,
        _ => return None,
    };
    (chars.get(i + body) == Some(&'>')).then_some(body + 1)
}

fn find_arrow(chars: &[char], from: usize) -> Option<(usize, usize)> {
    (from..chars.len()).find_map(|k| arrow_len(chars, k).map(|len| (k, len)))
}

fn find_char(chars: &[char], from: usize, target: char) -> Option<usize> {
    (from..chars.len()).find(|&k| chars[k] == target)
}

/// Matching `)` for a round shape, allowing `((double))` nesting.
fn find_round_close(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (k, &c) in chars.iter().enumerate().skip(open) {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(k);
                }
            }
            _ => {}
        }
    }
    None
}

/// Separate id-like tokens in a text segment; `B & C` has two.
fn id_tokens(text: &str) -> usize {
    text.split(|c: char| c.is_whitespace() || c == '&')
        .filter(|t| !sanitize_id(t).is_empty())
        .count()
}

fn ends_with_id(text: &str) -> bool {
    text.trim_end()
        .chars()
        .last()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn collect(chars: &[char]) -> String {
    chars.iter().collect()
}

fn segments(line: &str) -> Vec<Segment> {
    let chars: Vec<char> = line.chars().collect();
    let mut out = Vec::new();
    let mut text = String::new();
    let mut i = 0;

    // Whitespace-only text carries nothing and would split an arrow from
    // the `|label|` that follows it.
    let flush = |text: &mut String, out: &mut Vec<Segment>| {
        let taken = std::mem::take(text);
        if !taken.trim().is_empty() {
            out.push(Segment::Text(taken));
        }
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            '[' | '{' => {
                let (close, kind) = if c == '[' {
                    (']', LabelKind::Process)
                } else {
                    ('}', LabelKind::Decision)
                };
                flush(&mut text, &mut out);
                // An unclosed shape takes the rest of the line as its label.
                let end = find_char(&chars, i + 1, close).unwrap_or(chars.len());
                out.push(Segment::Shape(kind, collect(&chars[i + 1..end])));
                i = end + 1;
            }
            '(' if ends_with_id(&text) => {
                flush(&mut text, &mut out);
                let end = find_round_close(&chars, i).unwrap_or(chars.len());
                let inner = collect(&chars[i..end.min(chars.len())]);
                let label = inner.trim_start_matches('(').trim_end_matches(')');
                out.push(Segment::Shape(LabelKind::Process, label.to_string()));
                i = end + 1;
            }
            '|' => {
                flush(&mut text, &mut out);
                match find_char(&chars, i + 1, '|') {
                    Some(end) => {
                        out.push(Segment::EdgeLabel(collect(&chars[i + 1..end])));
                        i = end + 1;
                    }
                    None => i += 1,
                }
            }
            '-' => {
                if let Some(len) = arrow_len(&chars, i) {
                    flush(&mut text, &mut out);
                    out.push(Segment::Arrow);
                    i += len;
                } else if chars.get(i + 1) == Some(&'-') {
                    // `A -- label --> B` carries the edge label inline.
                    let mut open_end = i;
                    while chars.get(open_end) == Some(&'-') {
                        open_end += 1;
                    }
                    match find_arrow(&chars, open_end) {
                        Some((at, len)) => {
                            flush(&mut text, &mut out);
                            out.push(Segment::Arrow);
                            out.push(Segment::EdgeLabel(collect(&chars[open_end..at])));
                            i = at + len;
                        }
                        None => {
                            text.push(c);
                            i += 1;
                        }
                    }
                } else {
                    text.push(c);
                    i += 1;
                }
            }
            '=' => match arrow_len(&chars, i) {
                Some(len) => {
                    flush(&mut text, &mut out);
                    out.push(Segment::Arrow);
                    i += len;
                }
                None => {
                    text.push(c);
                    i += 1;
                }
            },
            _ => {
                text.push(c);
                i += 1;
            }
        }
    }
    flush(&mut text, &mut out);
    out
}

/// Rewrite one statement or node-declaration line in canonical form:
/// sanitized labels and ids, `A --> B` / `A -->|label| B` arrow spacing.
///
/// Returns an empty string when a node position holds several ids
/// (`A --> B & C`), since no single node can stand for them.
pub fn sanitize_line(line: &str) -> String {
    let line = line.trim().trim_end_matches(';');
    let segs = segments(line);
    let mut out = String::new();
    let mut iter = segs.into_iter().peekable();

    while let Some(seg) = iter.next() {
        match seg {
            Segment::Text(t) => {
                if id_tokens(&t) > 1 {
                    return String::new();
                }
                out.push_str(&sanitize_id(&t));
            }
            Segment::Shape(kind, content) => {
                let label = sanitize_label(&content, kind);
                if !label.is_empty() {
                    let (open, close) = match kind {
                        LabelKind::Decision => ('{', '}'),
                        _ => ('[', ']'),
                    };
                    out.push(open);
                    out.push_str(&label);
                    out.push(close);
                }
            }
            Segment::Arrow => {
                let kept = out.trim_end().len();
                out.truncate(kept);
                out.push_str(" -->");
                if let Some(Segment::EdgeLabel(content)) = iter.peek() {
                    let label = sanitize_label(content, LabelKind::Edge);
                    if !label.is_empty() {
                        out.push('|');
                        out.push_str(&label);
                        out.push('|');
                    }
                    iter.next();
                }
                out.push(' ');
            }
            // A pipe label that doesn't follow an arrow has nowhere to go.
            Segment::EdgeLabel(_) => {}
        }
    }
    out.trim().to_string()
}

pub fn rejoin(direction: Direction, lines: &[String]) -> String {
    let mut text = direction.declaration().to_string();
    for line in lines {
        text.push('\n');
        text.push_str(line);
    }
    text
}

// ── Pipeline ────────────────────────────────────────────────────

/// Normalise raw generator output into the strict grammar.
///
/// Fails with [`DiagramError::Empty`] when there is no text at all and with
/// [`DiagramError::Disconnected`] when no edge survives (subject to
/// `policy`).
pub fn sanitize(raw: &str, policy: FallbackPolicy) -> Result<Sanitized, DiagramError> {
    let lines = split_lines(strip_fences(raw));
    if lines.is_empty() {
        return Err(DiagramError::Empty);
    }

    let (direction, declared, body) = match classify_line(lines[0]) {
        LineKind::Direction(d) => (d, true, &lines[1..]),
        _ => (Direction::TopDown, false, &lines[..]),
    };

    let mut builder = GraphBuilder::default();
    let mut kept = Vec::new();
    for line in body {
        match classify_line(line) {
            LineKind::Statement | LineKind::NodeDeclaration => {
                let clean = sanitize_line(line);
                // Kept lines must classify the same way on a second pass.
                if !matches!(
                    classify_line(&clean),
                    LineKind::Statement | LineKind::NodeDeclaration
                ) {
                    debug!(line = %line, "Dropping line with no structure left");
                    continue;
                }
                match parse_statement(&clean) {
                    Ok(statement) => {
                        builder.add(statement);
                        kept.push(clean);
                    }
                    Err(reason) => debug!(line = %line, %reason, "Dropping unparseable line"),
                }
            }
            kind => debug!(line = %line, ?kind, "Dropping line outside the grammar"),
        }
    }

    let (nodes, edges) = builder.finish();
    if edges.is_empty() {
        let plausible = policy == FallbackPolicy::Lenient && declared && !nodes.is_empty();
        if !plausible {
            return Err(DiagramError::Disconnected);
        }
        warn!(
            nodes = nodes.len(),
            "Diagram has no edges; accepting under lenient fallback"
        );
    }

    Ok(Sanitized {
        text: rejoin(direction, &kept),
        graph: Graph {
            direction,
            nodes,
            edges,
        },
    })
}
