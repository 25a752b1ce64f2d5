use crate::sanitize::{self, DiagramError, FallbackPolicy};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Longest label allowed inside `[..]` or `{..}`.
pub const MAX_NODE_LABEL: usize = 40;
/// Longest label allowed inside `|..|`.
pub const MAX_EDGE_LABEL: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    #[serde(rename = "TD")]
    TopDown,
    #[serde(rename = "LR")]
    LeftRight,
}

impl Direction {
    /// The declaration line that opens every diagram.
    pub fn declaration(self) -> &'static str {
        match self {
            Direction::TopDown => "flowchart TD",
            Direction::LeftRight => "flowchart LR",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::TopDown => write!(f, "TD"),
            Direction::LeftRight => write!(f, "LR"),
        }
    }
}

/// Short structural node identifier (`A`, `B2`, `check_stock`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "label", rename_all = "snake_case")]
pub enum NodeShape {
    /// `ID[label]`
    Process(String),
    /// `ID{label}`
    Decision(String),
}

impl NodeShape {
    pub fn label(&self) -> &str {
        match self {
            NodeShape::Process(l) | NodeShape::Decision(l) => l,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<NodeShape>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

// ── Strict grammar ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrammarError {
    #[error("Diagram is empty")]
    Empty,

    #[error("First line must be 'flowchart TD' or 'flowchart LR', found '{0}'")]
    MissingDirection(String),

    #[error("Diagram has no statements")]
    NoStatements,

    #[error("Line {line}: {reason}")]
    Syntax { line: usize, reason: String },
}

/// One parsed statement: a chain `a --> b -->|x| c`, or a lone node
/// declaration when `links` is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub nodes: Vec<Node>,
    /// Edge label between `nodes[i]` and `nodes[i + 1]`.
    pub links: Vec<Option<String>>,
}

pub fn parse_direction(line: &str) -> Option<Direction> {
    match line {
        "flowchart TD" => Some(Direction::TopDown),
        "flowchart LR" => Some(Direction::LeftRight),
        _ => None,
    }
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '(' | ')' | '.' | '?')
}

struct Cursor<'a> {
    chars: &'a [char],
    pos: usize,
}

impl Cursor<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_spaces(&mut self) {
        while self.peek() == Some(' ') {
            self.pos += 1;
        }
    }

    fn eat(&mut self, token: &str) -> bool {
        let len = token.chars().count();
        let matches = self
            .chars
            .get(self.pos..self.pos + len)
            .is_some_and(|s| s.iter().copied().eq(token.chars()));
        if matches {
            self.pos += len;
        }
        matches
    }

    fn delimited(&mut self, close: char, max: usize, what: &str) -> Result<String, String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == close {
                let label: String = self.chars[start..self.pos].iter().collect();
                self.pos += 1;
                if label.is_empty() {
                    return Err(format!("empty {}", what));
                }
                if label.chars().count() > max {
                    return Err(format!("{} longer than {} characters", what, max));
                }
                if label.starts_with(' ') || label.ends_with(' ') {
                    return Err(format!("{} has surrounding spaces", what));
                }
                return Ok(label);
            }
            if !is_label_char(c) {
                return Err(format!("character '{}' not allowed in {}", c, what));
            }
            self.pos += 1;
        }
        Err(format!("unterminated {}", what))
    }

    fn node_ref(&mut self) -> Result<Node, String> {
        let start = self.pos;
        while self.peek().is_some_and(is_id_char) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(format!("expected node id at column {}", start + 1));
        }
        let id = NodeId(self.chars[start..self.pos].iter().collect());
        let shape = match self.peek() {
            Some('[') => {
                self.pos += 1;
                Some(NodeShape::Process(self.delimited(
                    ']',
                    MAX_NODE_LABEL,
                    "node label",
                )?))
            }
            Some('{') => {
                self.pos += 1;
                Some(NodeShape::Decision(self.delimited(
                    '}',
                    MAX_NODE_LABEL,
                    "decision label",
                )?))
            }
            _ => None,
        };
        Ok(Node { id, shape })
    }
}

/// Parse one statement line of the strict grammar.
pub fn parse_statement(line: &str) -> Result<Statement, String> {
    let chars: Vec<char> = line.chars().collect();
    let mut cursor = Cursor {
        chars: &chars,
        pos: 0,
    };

    let mut nodes = vec![cursor.node_ref()?];
    let mut links = Vec::new();

    loop {
        cursor.skip_spaces();
        if cursor.peek().is_none() {
            break;
        }
        if !cursor.eat("-->") {
            return Err(format!("expected '-->' at column {}", cursor.pos + 1));
        }
        cursor.skip_spaces();
        let label = if cursor.eat("|") {
            let label = cursor.delimited('|', MAX_EDGE_LABEL, "edge label")?;
            cursor.skip_spaces();
            Some(label)
        } else {
            None
        };
        links.push(label);
        nodes.push(cursor.node_ref()?);
    }

    if links.is_empty() && nodes[0].shape.is_none() {
        return Err("a node declaration needs a shape".to_string());
    }

    Ok(Statement { nodes, links })
}

/// Nodes and edges accumulated from statements. A node keeps the first
/// shape it was given; later bare references don't clear it.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    nodes: IndexMap<NodeId, Option<NodeShape>>,
    edges: Vec<Edge>,
}

impl GraphBuilder {
    pub fn add(&mut self, statement: Statement) {
        for node in &statement.nodes {
            let slot = self.nodes.entry(node.id.clone()).or_insert(None);
            if slot.is_none() {
                *slot = node.shape.clone();
            }
        }
        for (pair, label) in statement.nodes.windows(2).zip(statement.links) {
            self.edges.push(Edge {
                from: pair[0].id.clone(),
                to: pair[1].id.clone(),
                label,
            });
        }
    }

    pub fn finish(self) -> (Vec<Node>, Vec<Edge>) {
        let nodes = self
            .nodes
            .into_iter()
            .map(|(id, shape)| Node { id, shape })
            .collect();
        (nodes, self.edges)
    }
}

/// The structure of a diagram in the strict grammar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    pub direction: Direction,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Graph {
    /// Parse text that must already conform to the strict grammar.
    pub fn parse(text: &str) -> Result<Graph, GrammarError> {
        let mut lines = text.lines();
        let first = lines.next().ok_or(GrammarError::Empty)?;
        let direction = parse_direction(first)
            .ok_or_else(|| GrammarError::MissingDirection(first.to_string()))?;

        let mut builder = GraphBuilder::default();
        let mut statements = 0;
        for (i, line) in lines.enumerate() {
            let statement = parse_statement(line).map_err(|reason| GrammarError::Syntax {
                line: i + 2,
                reason,
            })?;
            builder.add(statement);
            statements += 1;
        }
        if statements == 0 {
            return Err(GrammarError::NoStatements);
        }

        let (nodes, edges) = builder.finish();
        Ok(Graph {
            direction,
            nodes,
            edges,
        })
    }
}

// ── Diagram ─────────────────────────────────────────────────────

/// The immutable result of one successful generation attempt.
///
/// `sanitized_text` always parses with [`Graph::parse`]; `raw_model_text`
/// is the untouched generator output, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagram {
    id: Uuid,
    raw_model_text: String,
    sanitized_text: String,
    direction: Direction,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    generated_at: DateTime<Utc>,
}

impl Diagram {
    /// Sanitize raw generator output into a diagram.
    pub fn from_model_text(
        raw: impl Into<String>,
        policy: FallbackPolicy,
    ) -> Result<Diagram, DiagramError> {
        let raw = raw.into();
        let sanitized = sanitize::sanitize(&raw, policy)?;
        Ok(Diagram {
            id: Uuid::new_v4(),
            raw_model_text: raw,
            sanitized_text: sanitized.text,
            direction: sanitized.graph.direction,
            nodes: sanitized.graph.nodes,
            edges: sanitized.graph.edges,
            generated_at: Utc::now(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn raw_model_text(&self) -> &str {
        &self.raw_model_text
    }

    pub fn sanitized_text(&self) -> &str {
        &self.sanitized_text
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id.as_str() == id)
    }

    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.from.as_str() == id)
    }
}

impl fmt::Display for Diagram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sanitized_text)
    }
}
