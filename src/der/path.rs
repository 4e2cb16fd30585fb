//! Addresses for locations inside nested BER structures.
//!
//! A path is written as `/`-separated nodes, e.g. `/SEQ/APP(4)/OCTSTR[1]`.
//! A node names a universal type by keyword, or a tag class plus number
//! (`APP(n)`, `CTX(n)`, `PRIVATE(n)`), and may carry a zero-based occurrence
//! index selecting the k-th sibling with that tag inside its container.

use crate::der::tag::{Tag, TagClass, UniversalType};
use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Universal(UniversalType),
    Application(u32),
    Context(u32),
    Private(u32),
}

impl NodeKind {
    pub fn from_tag(tag: Tag) -> Result<Self> {
        match tag.class() {
            TagClass::Universal => tag
                .universal_type()
                .map(NodeKind::Universal)
                .ok_or_else(|| Error::decode(format!("unknown universal tag {}", tag.number()))),
            TagClass::Application => Ok(NodeKind::Application(tag.number())),
            TagClass::Context => Ok(NodeKind::Context(tag.number())),
            TagClass::Private => Ok(NodeKind::Private(tag.number())),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Universal(t) => f.write_str(t.keyword()),
            NodeKind::Application(n) => write!(f, "APP({})", n),
            NodeKind::Context(n) => write!(f, "CTX({})", n),
            NodeKind::Private(n) => write!(f, "PRIVATE({})", n),
        }
    }
}

/// One path segment. `index: None` is the implicit form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathNode {
    kind: NodeKind,
    index: Option<usize>,
}

impl PathNode {
    pub fn new(kind: NodeKind) -> Self {
        Self { kind, index: None }
    }

    pub fn with_index(kind: NodeKind, index: usize) -> Self {
        Self {
            kind,
            index: Some(index),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// True when this (registered) node selects the concrete node `other`:
    /// kinds are equal and the index is either implicit or identical.
    pub fn selects(&self, other: &PathNode) -> bool {
        self.kind == other.kind
            && match self.index {
                None => true,
                Some(i) => other.index == Some(i),
            }
    }

    fn parse(segment: &str) -> Result<Self> {
        let (name, index) = match segment.find('[') {
            Some(open) => {
                let close = segment
                    .strip_suffix(']')
                    .ok_or_else(|| Error::Format(format!("unterminated index in '{}'", segment)))?;
                let idx: usize = close[open + 1..]
                    .parse()
                    .map_err(|_| Error::Format(format!("bad index in '{}'", segment)))?;
                (&segment[..open], Some(idx))
            }
            None => (segment, None),
        };
        let kind = if let Some(n) = numbered(name, "APP") {
            NodeKind::Application(n?)
        } else if let Some(n) = numbered(name, "CTX") {
            NodeKind::Context(n?)
        } else if let Some(n) = numbered(name, "PRIVATE") {
            NodeKind::Private(n?)
        } else {
            NodeKind::Universal(
                UniversalType::from_keyword(name)
                    .ok_or_else(|| Error::Format(format!("unknown path node '{}'", name)))?,
            )
        };
        Ok(PathNode { kind, index })
    }
}

fn numbered(name: &str, prefix: &str) -> Option<Result<u32>> {
    let rest = name.strip_prefix(prefix)?.strip_prefix('(')?;
    let digits = rest.strip_suffix(')')?;
    Some(
        digits
            .parse()
            .map_err(|_| Error::Format(format!("bad tag number in '{}'", name))),
    )
}

impl fmt::Display for PathNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(i) = self.index {
            write!(f, "[{}]", i)?;
        }
        Ok(())
    }
}

/// Ordered list of nodes from the outermost element inward.
///
/// Equality is exact: `/SEQ[0]/OCTSTR[1]` and `/SEQ/OCTSTR[1]` are different
/// paths even though the first is selected by the second.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Path {
    nodes: Vec<PathNode>,
}

impl Path {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[PathNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn push(&mut self, node: PathNode) -> &mut Self {
        self.nodes.push(node);
        self
    }

    pub fn pop(&mut self) -> Option<PathNode> {
        self.nodes.pop()
    }

    /// True when every node of `self` selects the node at the same depth of `concrete`.
    pub fn selects(&self, concrete: &Path) -> bool {
        self.nodes.len() == concrete.nodes.len()
            && self
                .nodes
                .iter()
                .zip(&concrete.nodes)
                .all(|(p, c)| p.selects(c))
    }
}

impl FromStr for Path {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix('/')
            .ok_or_else(|| Error::Format(format!("path must start with '/': {}", s)))?;
        let mut path = Path::new();
        if rest.is_empty() {
            return Ok(path);
        }
        for segment in rest.split('/') {
            if segment.is_empty() {
                return Err(Error::Format(format!("empty node in path {}", s)));
            }
            path.push(PathNode::parse(segment)?);
        }
        Ok(path)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nodes.is_empty() {
            return f.write_str("/");
        }
        for node in &self.nodes {
            write!(f, "/{}", node)?;
        }
        Ok(())
    }
}
