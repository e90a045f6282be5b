use std::fmt;

pub mod lexer;

pub use lexer::{lexer_dfa, tokenize, Lexer};

/// The discriminant doubles as the symbol column in every transition table.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // `>`: Increment the `data pointer` by one
    MoveRight = 0,
    // `<`: Decrement the `data pointer` by one
    MoveLeft = 1,

    // `+`: Increment the byte at the `data pointer` by one
    Increment = 2,
    // `-`: Decrement the byte at the `data pointer` by one
    Decrement = 3,

    // `.`: Write the byte at the `data pointer` to the `output device`
    Output = 4,
    // `,`: Read the next byte from the `input device` and write it to the `data pointer`
    Input = 5,

    // `[`: If the byte at the `data pointer` is zero, then jump the `instruction pointer`
    // forward to the instruction after the matching `]`
    LoopStart = 6,
    // `]`: Jump the `instruction pointer` back to the matching `[`
    LoopEnd = 7,
}

impl TokenKind {
    pub fn from_char(c: char) -> Option<TokenKind> {
        match c {
            '>' => Some(TokenKind::MoveRight),
            '<' => Some(TokenKind::MoveLeft),
            '+' => Some(TokenKind::Increment),
            '-' => Some(TokenKind::Decrement),
            '.' => Some(TokenKind::Output),
            ',' => Some(TokenKind::Input),
            '[' => Some(TokenKind::LoopStart),
            ']' => Some(TokenKind::LoopEnd),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            TokenKind::MoveRight => '>',
            TokenKind::MoveLeft => '<',
            TokenKind::Increment => '+',
            TokenKind::Decrement => '-',
            TokenKind::Output => '.',
            TokenKind::Input => ',',
            TokenKind::LoopStart => '[',
            TokenKind::LoopEnd => ']',
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Where a character sits in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    /** 'raw' format / offset within the file (in terms of 'codepoints') */
    pub offset: usize,

    /** Human Readable positions in file */
    pub line: usize,
    pub column: usize,
}

impl Location {
    pub const fn start() -> Location {
        Location {
            offset: 0,
            line: 1,
            column: 1,
        }
    }
}

impl Default for Location {
    fn default() -> Self {
        Location::start()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub location: Location,
}

impl Token {
    pub fn as_char(&self) -> char {
        self.kind.as_char()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

/// Joins tokens back into instruction text
pub fn join(tokens: &[Token]) -> String {
    tokens.iter().map(Token::as_char).collect()
}
