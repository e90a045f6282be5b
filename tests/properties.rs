//! Property-based tests for the compiler pipeline.
use std::io::Cursor;

use brainfc::{
    analyze, execute, generate, generate_iterative, lexer::join, parse, parse_iterative,
    parser::NodeKind, tokenize, Issue, IrEngine, Runtime, TreeInterpreter,
};
use proptest::prelude::*;

const INSTRUCTIONS: [char; 8] = ['>', '<', '+', '-', '.', ',', '[', ']'];

mod strategies {
    use super::*;

    /// Instructions mixed with comment text, brackets not necessarily balanced
    pub fn source() -> impl Strategy<Value = String> {
        prop::collection::vec(
            prop_oneof![
                4 => prop::sample::select(INSTRUCTIONS.to_vec()),
                1 => any::<char>(),
                1 => prop::sample::select(vec![' ', '\n', 'a', 'é']),
            ],
            0..200,
        )
        .prop_map(|chars| chars.into_iter().collect())
    }

    /// Programs whose brackets all match, with comments sprinkled in
    pub fn balanced() -> impl Strategy<Value = String> {
        let leaf = prop::collection::vec("[-+<>.,]|x| |\n", 0..6).prop_map(|parts| parts.concat());
        leaf.prop_recursive(6, 64, 4, |inner| {
            prop::collection::vec(
                prop_oneof![inner.clone(), inner.prop_map(|body| format!("[{body}]"))],
                0..4,
            )
            .prop_map(|parts| parts.concat())
        })
    }

    /// Loop free programs, so every one of them terminates
    pub fn straight_line() -> impl Strategy<Value = String> {
        "[-+<>.,]{0,64}"
    }
}

fn interpret(source: &str, input: &[u8]) -> Vec<u8> {
    use std::{cell::RefCell, io, rc::Rc};

    #[derive(Clone, Default)]
    struct Shared(Rc<RefCell<Vec<u8>>>);

    impl io::Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let out = Shared::default();
    let mut runtime =
        Runtime::with_default_tape(Box::new(Cursor::new(input.to_vec())), Box::new(out.clone()));
    TreeInterpreter::new()
        .interpret(&mut runtime, &parse(&tokenize(source)))
        .unwrap();
    let bytes = out.0.borrow().clone();
    bytes
}

proptest! {
    #[test]
    fn tokens_are_the_filtered_source(source in strategies::source()) {
        let tokens = tokenize(&source);
        let expected: String = source.chars().filter(|c| INSTRUCTIONS.contains(c)).collect();
        prop_assert_eq!(join(&tokens), expected);

        let chars: Vec<char> = source.chars().collect();
        for pair in tokens.windows(2) {
            prop_assert!(pair[0].location.offset < pair[1].location.offset);
        }
        for token in &tokens {
            prop_assert_eq!(chars[token.location.offset], token.as_char());
        }
    }

    #[test]
    fn tokenizing_is_idempotent(source in strategies::source()) {
        let once = join(&tokenize(&source));
        let twice = join(&tokenize(&once));
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn loops_unparse_to_their_source(source in strategies::balanced()) {
        let tree = parse(&tokenize(&source));
        let chars: Vec<char> = source.chars().collect();
        prop_assert!(analyze(&tree).iter().all(|d| d.issue != Issue::MissingLoopClose));

        for (id, _) in tree.walk() {
            let node = tree.node(id);
            if let NodeKind::Loop { close } = node.kind {
                let close = close.map(|location| location.offset);
                prop_assert!(close.is_some());
                let span: String = chars[node.location.offset..=close.unwrap_or_default()]
                    .iter()
                    .filter(|c| INSTRUCTIONS.contains(c))
                    .collect();
                prop_assert_eq!(tree.unparse(id), span);
            }
        }
        prop_assert_eq!(tree.unparse(tree.root()), join(&tokenize(&source)));
    }

    #[test]
    fn iterative_stages_match_recursive(source in strategies::source()) {
        let tokens = tokenize(&source);
        let tree = parse(&tokens);
        prop_assert_eq!(&tree, &parse_iterative(&tokens));
        prop_assert_eq!(generate(&tree), generate_iterative(&tree));
    }

    #[test]
    fn generation_is_deterministic(source in strategies::source()) {
        let tree = parse(&tokenize(&source));
        prop_assert_eq!(generate(&tree), generate(&tree));
        prop_assert_eq!(generate(&tree).to_string(), generate(&tree).to_string());
    }

    #[test]
    fn diagnostics_point_at_their_cause(source in strategies::source()) {
        let chars: Vec<char> = source.chars().collect();
        for diagnostic in analyze(&parse(&tokenize(&source))) {
            let expected = match diagnostic.issue {
                Issue::MissingLoopClose | Issue::EmptyLoop => '[',
                Issue::LeadingDecrement => '<',
                Issue::UnmatchedLoopClose => ']',
            };
            prop_assert_eq!(chars[diagnostic.offset()], expected);
        }
    }

    #[test]
    fn engine_matches_interpreter(
        source in strategies::straight_line(),
        input in prop::collection::vec(any::<u8>(), 0..16),
    ) {
        let module = generate(&parse(&tokenize(&source)));
        let mut engine = IrEngine::new(Cursor::new(input.clone()), Vec::new());
        prop_assert_eq!(execute(&mut engine, module).unwrap(), 0);
        prop_assert_eq!(engine.into_output(), interpret(&source, &input));
    }

    #[test]
    fn cells_wrap_modulo_256(count in 0usize..1024) {
        let source = format!("{}.", "+".repeat(count));
        let mut engine = IrEngine::new(std::io::empty(), Vec::new());
        execute(&mut engine, generate(&parse(&tokenize(&source)))).unwrap();
        prop_assert_eq!(engine.into_output(), vec![(count % 256) as u8]);
    }
}
