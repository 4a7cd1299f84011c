//! Formulaic alpha mining with Monte Carlo tree search.
//!
//! Formulas are RPN token sequences over market features. MCTS builds them
//! one token at a time under a policy prior, an alpha pool keeps the best
//! `K` by IC net of redundancy, and a risk-seeking optimizer trains the
//! policy on the upper tail of search rewards.

pub mod config;
pub mod data;
pub mod error;
pub mod evaluator;
pub mod formula;
pub mod mcts;
pub mod mdp;
pub mod optimizer;
pub mod policy;
pub mod pool;
pub mod stats;
pub mod token;
pub mod trainer;

pub use config::{Config, CONFIG};
pub use error::{EvaluationError, FormulaError, MinerError, PolicyContractError, SearchError};
pub use formula::Formula;
pub use pool::{AlphaEntry, AlphaPool};
pub use token::{TokenId, TokenRegistry};
pub use trainer::{Trainer, TrainingSummary};
