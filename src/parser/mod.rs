use std::fmt;

use crate::lexer::{Location, TokenKind};

pub mod parser;

pub use parser::{parse, parse_iterative, Parser};

/// Index of a node in its [`Tree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Root of the tree, `stray_close` is where a top level `]` stopped parsing
    Program { stray_close: Option<Location> },
    /// `close` is the matching `]`, `None` if the input ended first
    Loop { close: Option<Location> },

    Increment,
    Decrement,

    MoveRight,
    MoveLeft,

    Input,
    Output,
}

impl NodeKind {
    /// Node for a non-bracket instruction
    pub fn instruction(kind: TokenKind) -> Option<NodeKind> {
        match kind {
            TokenKind::MoveRight => Some(NodeKind::MoveRight),
            TokenKind::MoveLeft => Some(NodeKind::MoveLeft),
            TokenKind::Increment => Some(NodeKind::Increment),
            TokenKind::Decrement => Some(NodeKind::Decrement),
            TokenKind::Output => Some(NodeKind::Output),
            TokenKind::Input => Some(NodeKind::Input),
            TokenKind::LoopStart | TokenKind::LoopEnd => None,
        }
    }

    /// The instruction a leaf was parsed from
    pub fn token(&self) -> Option<TokenKind> {
        match self {
            NodeKind::MoveRight => Some(TokenKind::MoveRight),
            NodeKind::MoveLeft => Some(TokenKind::MoveLeft),
            NodeKind::Increment => Some(TokenKind::Increment),
            NodeKind::Decrement => Some(TokenKind::Decrement),
            NodeKind::Output => Some(TokenKind::Output),
            NodeKind::Input => Some(TokenKind::Input),
            NodeKind::Program { .. } | NodeKind::Loop { .. } => None,
        }
    }

    pub fn is_loop(&self) -> bool {
        matches!(self, NodeKind::Loop { .. })
    }

    /// A loop that ran into the end of input before its `]`
    pub fn is_unclosed_loop(&self) -> bool {
        matches!(self, NodeKind::Loop { close: None })
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Program { .. } => write!(f, "Program"),
            NodeKind::Loop { .. } => write!(f, "Loop"),
            leaf => match leaf.token() {
                Some(token) => write!(f, "{}", token),
                None => Ok(()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    /// First character of the node, the `[` for loops
    pub location: Location,
    /// Only used for looking up context, the tree owns every node
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// Nodes live in a flat arena in pre-order, the root is always the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub(crate) fn new() -> Tree {
        Tree {
            nodes: vec![Node {
                kind: NodeKind::Program { stray_close: None },
                location: Location::start(),
                parent: None,
                children: vec![],
            }],
        }
    }

    pub(crate) fn push(&mut self, parent: NodeId, kind: NodeKind, location: Location) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            location,
            parent: Some(parent),
            children: vec![],
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    pub(crate) fn close_loop(&mut self, id: NodeId, close: Location) {
        if let NodeKind::Loop { close: slot } = &mut self.nodes[id.0].kind {
            *slot = Some(close);
        }
    }

    pub(crate) fn set_stray_close(&mut self, location: Location) {
        if let NodeKind::Program { stray_close } = &mut self.nodes[0].kind {
            *stray_close = Some(location);
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.nodes[id.0].kind
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// Number of enclosing loops
    pub fn depth(&self, id: NodeId) -> usize {
        std::iter::successors(self.parent(id), |&p| self.parent(p))
            .filter(|&p| self.kind(p).is_loop())
            .count()
    }

    /// Total node count, including the root
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn has_unclosed_loop(&self) -> bool {
        self.nodes.iter().any(|node| node.kind.is_unclosed_loop())
    }

    /// Depth first, pre-order
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            tree: self,
            stack: vec![(self.root(), 0)],
        }
    }

    /// Renders a subtree back into instruction text
    pub fn unparse(&self, id: NodeId) -> String {
        enum Step {
            Enter(NodeId),
            Close,
        }

        let mut out = String::new();
        let mut stack = vec![Step::Enter(id)];
        while let Some(step) = stack.pop() {
            let node = match step {
                Step::Enter(id) => self.node(id),
                Step::Close => {
                    out.push(']');
                    continue;
                }
            };
            match node.kind {
                NodeKind::Loop { close } => {
                    out.push('[');
                    if close.is_some() {
                        stack.push(Step::Close);
                    }
                }
                NodeKind::Program { .. } => {}
                leaf => out.extend(leaf.token().map(TokenKind::as_char)),
            }
            stack.extend(node.children.iter().rev().map(|&child| Step::Enter(child)));
        }
        out
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, depth) in self.walk() {
            let node = self.node(id);
            writeln!(f, "{:indent$}{} @ {}", "", node.kind, node.location, indent = depth * 2)?;
        }
        Ok(())
    }
}

pub struct Walk<'a> {
    tree: &'a Tree,
    stack: Vec<(NodeId, usize)>,
}

impl Iterator for Walk<'_> {
    /// A node and how far below the root it sits
    type Item = (NodeId, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let (id, depth) = self.stack.pop()?;
        self.stack.extend(
            self.tree
                .children(id)
                .iter()
                .rev()
                .map(|&child| (child, depth + 1)),
        );
        Some((id, depth))
    }
}
