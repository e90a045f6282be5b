use std::iter::Peekable;

use log::debug;

use crate::lexer::{Token, TokenKind};

use super::{NodeId, NodeKind, Tree};

pub struct Parser<'a> {
    tokens: Peekable<std::slice::Iter<'a, Token>>,
    tree: Tree,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Parser<'a> {
        Parser {
            tokens: tokens.iter().peekable(),
            tree: Tree::new(),
        }
    }

    fn parse_block(&mut self, parent: NodeId) {
        while let Some(&&token) = self.tokens.peek() {
            match token.kind {
                // the loop has ended, whoever opened it consumes the `]`
                TokenKind::LoopEnd => break,
                TokenKind::LoopStart => {
                    self.tokens.next();
                    let id = self
                        .tree
                        .push(parent, NodeKind::Loop { close: None }, token.location);
                    self.parse_block(id);
                    if let Some(close) = self.tokens.next_if(|t| t.kind == TokenKind::LoopEnd) {
                        self.tree.close_loop(id, close.location);
                    }
                }
                kind => {
                    self.tokens.next();
                    if let Some(leaf) = NodeKind::instruction(kind) {
                        self.tree.push(parent, leaf, token.location);
                    }
                }
            }
        }
    }

    /// Recursive descent, recursion depth follows bracket nesting
    pub fn parse_program(mut self) -> Tree {
        let root = self.tree.root();
        self.parse_block(root);
        self.finish()
    }

    /// Same tree as [`Parser::parse_program`] but keeps open loops on the heap
    pub fn parse_program_iterative(mut self) -> Tree {
        let root = self.tree.root();
        let mut open: Vec<NodeId> = vec![];

        while let Some(&&token) = self.tokens.peek() {
            let parent = open.last().copied().unwrap_or(root);
            match token.kind {
                TokenKind::LoopEnd => match open.pop() {
                    Some(id) => {
                        self.tokens.next();
                        self.tree.close_loop(id, token.location);
                    }
                    // stray `]` at the top level
                    None => break,
                },
                TokenKind::LoopStart => {
                    self.tokens.next();
                    open.push(
                        self.tree
                            .push(parent, NodeKind::Loop { close: None }, token.location),
                    );
                }
                kind => {
                    self.tokens.next();
                    if let Some(leaf) = NodeKind::instruction(kind) {
                        self.tree.push(parent, leaf, token.location);
                    }
                }
            }
        }

        self.finish()
    }

    fn finish(mut self) -> Tree {
        // only a stray `]` can stop the top level early, everything after it is dropped
        if let Some(stray) = self.tokens.next() {
            debug!("unmatched `]` at {}, ignoring the rest of the program", stray.location);
            self.tree.set_stray_close(stray.location);
        }
        debug!("parsed {} nodes", self.tree.len());
        self.tree
    }
}

pub fn parse(tokens: &[Token]) -> Tree {
    Parser::new(tokens).parse_program()
}

pub fn parse_iterative(tokens: &[Token]) -> Tree {
    Parser::new(tokens).parse_program_iterative()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::lexer::{tokenize, Location};

    fn tree(source: &str) -> Tree {
        parse(&tokenize(source))
    }

    fn shape(tree: &Tree) -> String {
        tree.walk()
            .map(|(id, depth)| format!("{}{}", depth, tree.kind(id)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn empty_program() {
        let tree = tree("");
        assert!(tree.is_empty());
        assert_eq!(tree.kind(tree.root()), NodeKind::Program { stray_close: None });
    }

    #[test]
    fn nests_loops() {
        let tree = tree("+[>[-]<]");
        assert_eq!(shape(&tree), "0Program 1+ 1Loop 2> 2Loop 3- 2<");

        let outer = tree.children(tree.root())[1];
        let inner = tree.children(outer)[1];
        assert_eq!(tree.parent(inner), Some(outer));
        assert_eq!(tree.depth(outer), 0);
        assert_eq!(tree.depth(inner), 1);
        assert_eq!(tree.depth(tree.children(inner)[0]), 2);
        assert_eq!(tree.node(outer).location.offset, 1);
        assert_eq!(
            tree.kind(outer),
            NodeKind::Loop {
                close: Some(Location {
                    offset: 7,
                    line: 1,
                    column: 8
                })
            }
        );
    }

    #[test]
    fn unclosed_loop_is_truncated_by_end_of_input() {
        let tree = tree("+[-[+");
        assert_eq!(shape(&tree), "0Program 1+ 1Loop 2- 2Loop 3+");
        assert!(tree.has_unclosed_loop());
        assert!(tree
            .walk()
            .filter(|&(id, _)| tree.kind(id).is_loop())
            .all(|(id, _)| tree.kind(id).is_unclosed_loop()));
    }

    #[test]
    fn stray_close_ends_program_early() {
        let tree = tree("+]-");
        assert_eq!(shape(&tree), "0Program 1+");
        match tree.kind(tree.root()) {
            NodeKind::Program { stray_close: Some(location) } => assert_eq!(location.offset, 1),
            kind => panic!("unexpected root {:?}", kind),
        }
    }

    #[test]
    fn child_offsets_do_not_decrease() {
        let tree = tree("a+ [ > - ] b .");
        for (id, _) in tree.walk() {
            let offsets: Vec<usize> = tree
                .children(id)
                .iter()
                .map(|&c| tree.node(c).location.offset)
                .collect();
            assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[rstest]
    #[case("")]
    #[case("+-<>.,")]
    #[case("[[[]]]")]
    #[case("[-]>[<+>-]")]
    #[case("[[+")]
    #[case("+]]")]
    #[case("[]]+[")]
    fn iterative_matches_recursive(#[case] source: &str) {
        let tokens = tokenize(source);
        assert_eq!(parse(&tokens), parse_iterative(&tokens));
    }

    #[test]
    fn iterative_handles_deep_nesting() {
        let depth = 200_000;
        let source = format!("{}+{}", "[".repeat(depth), "]".repeat(depth));
        let tree = parse_iterative(&tokenize(&source));
        assert_eq!(tree.len(), depth + 2);
        assert!(!tree.has_unclosed_loop());
        assert_eq!(tree.unparse(tree.root()), source);
    }

    #[rstest]
    #[case("+[->+<]", "+[->+<]")]
    #[case("[[", "[[")]
    #[case("+]-", "+")]
    fn unparse_reconstructs_source(#[case] source: &str, #[case] expected: &str) {
        let tree = tree(source);
        assert_eq!(tree.unparse(tree.root()), expected);
    }

    #[test]
    fn displays_indented_tree() {
        let tree = tree("[-]");
        assert_eq!(tree.to_string(), "Program @ 1:1\n  Loop @ 1:1\n    - @ 1:2\n");
    }
}
