use log::debug;

use crate::dfa::{Dfa, State, Symbol, Table};

use super::{Location, Token, TokenKind};

// state 0 idles, state 1 has recognised one instruction and state 2 is the sink
// for a second character. Rejected characters drop back to idle.
static TABLE: Table<3> = [
    [1, 1, 1, 1, 1, 1, 1, 1, 0],
    [2, 2, 2, 2, 2, 2, 2, 2, 0],
    [2, 2, 2, 2, 2, 2, 2, 2, 2],
];
static ACCEPT: [State; 1] = [1];

pub fn lexer_dfa() -> Dfa<3> {
    Dfa::new(&TABLE, &ACCEPT)
}

#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    /** Human Readable positions in file */
    pub cur_line: usize,
    pub cur_col: usize,

    /** 'raw' format / offset within the file (in terms of 'codepoints') */
    pub codepoint_offset: usize,

    chars: std::iter::Peekable<std::str::Chars<'a>>,
    dfa: Dfa<3>,
}

impl<'a> Lexer<'a> {
    pub fn new(chars: &'a str) -> Lexer<'a> {
        Lexer {
            cur_col: 1,
            cur_line: 1,

            codepoint_offset: 0,

            chars: chars.chars().peekable(),
            dfa: lexer_dfa(),
        }
    }

    fn location(&self) -> Location {
        Location {
            offset: self.codepoint_offset,
            line: self.cur_line,
            column: self.cur_col,
        }
    }

    fn consume_char(&mut self) -> Option<char> {
        match self.chars.next() {
            Some(c) => {
                self.cur_col += 1;
                if c == '\n' {
                    self.cur_line += 1;
                    self.cur_col = 1;
                }
                self.codepoint_offset += 1;
                Some(c)
            }
            None => None,
        }
    }

    /// Consumes the longest run that keeps the recogniser accepting,
    /// returning the first character of the run.
    fn munch(&mut self) -> Option<char> {
        self.dfa.reset();
        let mut recognised = None;
        while let Some(&c) = self.chars.peek() {
            if !self.dfa.step(Symbol::classify(c)) {
                break;
            }
            self.consume_char();
            recognised.get_or_insert(c);
        }
        recognised
    }

    pub fn next_token(&mut self) -> Option<Token> {
        loop {
            let location = self.location();
            match self.munch().and_then(TokenKind::from_char) {
                Some(kind) => return Some(Token { kind, location }),
                // nothing accepted here, skip the character and retry
                None => {
                    self.consume_char()?;
                }
            }
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        self.next_token()
    }
}

pub fn tokenize(source: &str) -> Vec<Token> {
    let tokens: Vec<Token> = Lexer::new(source).collect();
    debug!("tokenized {} characters into {} tokens", source.chars().count(), tokens.len());
    tokens
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::dfa::is_closed;
    use crate::lexer::join;

    #[rstest]
    #[case("", "")]
    #[case("a+b", "+")]
    #[case(">+<", ">+<")]
    #[case(">>+<", ">>+<")]
    #[case(">>+<A", ">>+<")]
    #[case(">>+<A[]", ">>+<[]")]
    #[case("# comment\n+-", "+-")]
    #[case("héllo, wörld.", ",.")]
    fn filters_non_instructions(#[case] source: &str, #[case] expected: &str) {
        assert_eq!(join(&tokenize(source)), expected);
    }

    #[test]
    fn tokens_are_single_characters() {
        let tokens = tokenize("++[->+<]");
        assert_eq!(tokens.len(), 8);
        assert_eq!(tokens[2].kind, TokenKind::LoopStart);
        assert_eq!(tokens[7].kind, TokenKind::LoopEnd);
    }

    #[test]
    fn tracks_locations() {
        let tokens = tokenize("a\n +é-");
        assert_eq!(
            tokens[0].location,
            Location {
                offset: 3,
                line: 2,
                column: 2
            }
        );
        // offsets count codepoints, not bytes
        assert_eq!(tokens[1].location.offset, 5);
        assert_eq!(tokens[1].location.column, 4);
    }

    #[test]
    fn recogniser_rejects_a_second_character() {
        let mut dfa = lexer_dfa();
        assert!(dfa.step(Symbol::Instruction(TokenKind::Increment)));
        assert!(!dfa.step(Symbol::Instruction(TokenKind::Increment)));
        dfa.reset();
        assert!(!dfa.step(Symbol::Reject));
        assert_eq!(dfa.state(), 0);
        assert!(is_closed(dfa.table()));
    }
}
