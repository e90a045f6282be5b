//! Static diagnostics over a parsed [`Tree`].
//!
//! Diagnostics are advisory: nothing here stops code generation, the caller
//! decides what to do with an error.

use std::fmt;

use bitflags::bitflags;
use log::debug;
use thiserror::Error;

use crate::dfa::{Dfa, Symbol};
use crate::lexer::{Location, TokenKind};
use crate::parser::{NodeId, NodeKind, Tree};

mod machines;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Issue {
    #[error("missing loop close")]
    MissingLoopClose,

    /// An empty loop never changes its guard cell
    #[error("loop either does nothing or runs forever")]
    EmptyLoop,

    /// The data pointer starts at cell 0
    #[error("pointer decrement before first advance")]
    LeadingDecrement,

    #[error("unmatched loop close")]
    UnmatchedLoopClose,
}

impl Issue {
    pub fn severity(self) -> Severity {
        match self {
            Issue::EmptyLoop => Severity::Warning,
            Issue::MissingLoopClose | Issue::LeadingDecrement | Issue::UnmatchedLoopClose => {
                Severity::Error
            }
        }
    }

    fn check(self) -> Checks {
        match self {
            Issue::MissingLoopClose => Checks::MISSING_LOOP_CLOSE,
            Issue::EmptyLoop => Checks::EMPTY_LOOP,
            Issue::LeadingDecrement => Checks::LEADING_DECREMENT,
            Issue::UnmatchedLoopClose => Checks::UNMATCHED_LOOP_CLOSE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub issue: Issue,
    /// The node this is about
    pub node: NodeId,
    pub location: Location,
}

impl Diagnostic {
    pub fn severity(&self) -> Severity {
        self.issue.severity()
    }

    pub fn message(&self) -> String {
        self.issue.to_string()
    }

    pub fn offset(&self) -> usize {
        self.location.offset
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} at {}", self.severity(), self.issue, self.location)
    }
}

bitflags! {
    /// Which checks an [`Analyzer`] runs
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Checks: u8 {
        const MISSING_LOOP_CLOSE   = 1 << 0;
        const EMPTY_LOOP           = 1 << 1;
        const LEADING_DECREMENT    = 1 << 2;
        const UNMATCHED_LOOP_CLOSE = 1 << 3;
    }
}

impl Default for Checks {
    fn default() -> Self {
        Checks::all()
    }
}

/// Machines threaded through one traversal, copied in and handed back out
/// so that nothing is shared between runs.
#[derive(Debug, Clone, Copy)]
struct Scan {
    leading_decrement: Dfa<4>,
    empty_loop: Dfa<3>,
}

impl Scan {
    fn new() -> Scan {
        Scan {
            leading_decrement: machines::leading_decrement(),
            empty_loop: machines::empty_loop(),
        }
    }
}

enum Visit {
    Enter(NodeId),
    Exit(NodeId),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Analyzer {
    checks: Checks,
}

impl Analyzer {
    pub fn new(checks: Checks) -> Analyzer {
        Analyzer { checks }
    }

    /// Diagnostics come out in pre-order of the nodes they concern
    pub fn analyze(&self, tree: &Tree) -> Vec<Diagnostic> {
        let mut diagnostics = vec![];
        let mut scan = Scan::new();
        let mut stack = vec![Visit::Enter(tree.root())];

        while let Some(visit) = stack.pop() {
            scan = match visit {
                Visit::Enter(id) => {
                    let next = self.enter(tree, id, scan, &mut diagnostics);
                    if tree.kind(id).is_loop() {
                        stack.push(Visit::Exit(id));
                    }
                    stack.extend(tree.children(id).iter().rev().map(|&c| Visit::Enter(c)));
                    next
                }
                Visit::Exit(id) => self.exit(tree, id, scan, &mut diagnostics),
            };
        }

        debug!("analysis found {} diagnostics", diagnostics.len());
        diagnostics
    }

    fn enter(&self, tree: &Tree, id: NodeId, mut scan: Scan, out: &mut Vec<Diagnostic>) -> Scan {
        let node = tree.node(id);
        match node.kind {
            NodeKind::Program { stray_close } => {
                if let Some(location) = stray_close {
                    self.report(out, Issue::UnmatchedLoopClose, id, location);
                }
            }
            NodeKind::Loop { close } => {
                if close.is_none() {
                    self.report(out, Issue::MissingLoopClose, id, node.location);
                }
                let symbol = Symbol::from(TokenKind::LoopStart);
                scan.leading_decrement.step(symbol);
                scan.empty_loop.step(symbol);
            }
            leaf => {
                if let Some(token) = leaf.token() {
                    if scan.leading_decrement.step(Symbol::from(token)) {
                        self.report(out, Issue::LeadingDecrement, id, node.location);
                    }
                    scan.empty_loop.step(Symbol::from(token));
                }
            }
        }
        scan
    }

    fn exit(&self, tree: &Tree, id: NodeId, mut scan: Scan, out: &mut Vec<Diagnostic>) -> Scan {
        let node = tree.node(id);
        // an unclosed loop never saw its `]`
        if let NodeKind::Loop { close: Some(_) } = node.kind {
            let symbol = Symbol::from(TokenKind::LoopEnd);
            scan.leading_decrement.step(symbol);
            if scan.empty_loop.step(symbol) {
                self.report(out, Issue::EmptyLoop, id, node.location);
            }
        }
        scan
    }

    fn report(&self, out: &mut Vec<Diagnostic>, issue: Issue, node: NodeId, location: Location) {
        if self.checks.contains(issue.check()) {
            out.push(Diagnostic {
                issue,
                node,
                location,
            });
        }
    }
}

pub fn analyze(tree: &Tree) -> Vec<Diagnostic> {
    Analyzer::default().analyze(tree)
}
