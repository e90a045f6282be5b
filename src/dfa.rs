//! Table driven finite-state machines.
//!
//! Every machine in the compiler reads the same input alphabet: the eight
//! instructions plus a reject sentinel standing in for any other character.
//! Transition tables are plain `'static` arrays so a [`Dfa`] is just a pointer
//! to its table and a current state, and copying one gives a fully
//! independent machine.

use crate::lexer::TokenKind;

/// Eight instructions and the reject sentinel
pub const SYMBOL_COUNT: usize = 9;

pub type State = u8;

/// `table[state][symbol.index()]` is the next state
pub type Table<const N: usize> = [[State; SYMBOL_COUNT]; N];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    Instruction(TokenKind),
    /// Anything outside of the instruction alphabet
    Reject,
}

impl Symbol {
    pub const ALL: [Symbol; SYMBOL_COUNT] = [
        Symbol::Instruction(TokenKind::MoveRight),
        Symbol::Instruction(TokenKind::MoveLeft),
        Symbol::Instruction(TokenKind::Increment),
        Symbol::Instruction(TokenKind::Decrement),
        Symbol::Instruction(TokenKind::Output),
        Symbol::Instruction(TokenKind::Input),
        Symbol::Instruction(TokenKind::LoopStart),
        Symbol::Instruction(TokenKind::LoopEnd),
        Symbol::Reject,
    ];

    pub fn classify(c: char) -> Symbol {
        match TokenKind::from_char(c) {
            Some(kind) => Symbol::Instruction(kind),
            None => Symbol::Reject,
        }
    }

    /// Column of this symbol in a transition table
    pub fn index(self) -> usize {
        match self {
            Symbol::Instruction(kind) => kind as usize,
            Symbol::Reject => SYMBOL_COUNT - 1,
        }
    }
}

impl From<TokenKind> for Symbol {
    fn from(kind: TokenKind) -> Self {
        Symbol::Instruction(kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dfa<const N: usize> {
    table: &'static Table<N>,
    accept: &'static [State],
    state: State,
}

impl<const N: usize> Dfa<N> {
    /// Machines always start in state 0
    pub const fn new(table: &'static Table<N>, accept: &'static [State]) -> Self {
        Dfa {
            table,
            accept,
            state: 0,
        }
    }

    /// Feed one symbol, returns whether the machine is now in an accept state.
    pub fn step(&mut self, symbol: Symbol) -> bool {
        self.state = self.table[self.state as usize][symbol.index()];
        self.is_accepting()
    }

    pub fn is_accepting(&self) -> bool {
        self.accept.contains(&self.state)
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = 0;
    }

    pub fn table(&self) -> &'static Table<N> {
        self.table
    }
}

/// Every transition of `table` lands on a state that exists
pub fn is_closed<const N: usize>(table: &Table<N>) -> bool {
    table
        .iter()
        .flat_map(|row| row.iter())
        .all(|&next| (next as usize) < N)
}
