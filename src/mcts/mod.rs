//! # MCTS for Formula Construction
//!
//! AlphaZero-style Monte Carlo Tree Search over the RPN grammar.
//!
//! ## Mapping
//!
//! | Go | Formula mining |
//! |----|----------------|
//! | Board position | partial formula |
//! | Legal moves | tokens that keep the formula completable |
//! | Policy head | prior per legal token |
//! | Value head | estimated terminal reward |
//! | Game outcome | IC net of pool redundancy |
//! | Move | append one token |
//!
//! ## Architecture
//!
//! - **MctsNode / MctsArena**: tree node statistics, index-linked arena
//! - **MctsSearcher**: PUCT selection, expansion, backpropagation, and the
//!   robust-child commit loop that produces one formula

mod node;
mod search;

pub use node::{MctsArena, MctsNode, NodeRef};
pub use search::{MctsSearcher, SearchOutcome};
