//! Transition tables for the analyses.
//!
//! Columns follow [`Symbol::index`](crate::dfa::Symbol::index):
//! `>  <  +  -  .  ,  [  ]  reject`.

use crate::dfa::{Dfa, State, Table};

// 0: nothing executed yet, 1: something other than `<` came first,
// 2: `<` came first (accept), 3: already reported
static LEADING_DECREMENT: Table<4> = [
    [1, 2, 1, 1, 1, 1, 0, 0, 0],
    [1, 1, 1, 1, 1, 1, 1, 1, 1],
    [3, 3, 3, 3, 3, 3, 3, 3, 3],
    [3, 3, 3, 3, 3, 3, 3, 3, 3],
];
static LEADING_DECREMENT_ACCEPT: [State; 1] = [2];

// 0: idle, 1: a `[` was just opened, 2: `]` straight after `[` (accept)
static EMPTY_LOOP: Table<3> = [
    [0, 0, 0, 0, 0, 0, 1, 0, 0],
    [0, 0, 0, 0, 0, 0, 1, 2, 0],
    [0, 0, 0, 0, 0, 0, 1, 0, 0],
];
static EMPTY_LOOP_ACCEPT: [State; 1] = [2];

pub fn leading_decrement() -> Dfa<4> {
    Dfa::new(&LEADING_DECREMENT, &LEADING_DECREMENT_ACCEPT)
}

pub fn empty_loop() -> Dfa<3> {
    Dfa::new(&EMPTY_LOOP, &EMPTY_LOOP_ACCEPT)
}
