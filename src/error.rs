//! Error types for formula construction, evaluation and search.
//!
//! Severity follows where an error can come from:
//!
//! - [`FormulaError`] and [`EvaluationError`] are data conditions. They are
//!   fatal to one cycle at most and are scored as zero reward.
//! - [`PolicyContractError`] means the external policy provider broke its
//!   contract. It aborts the run.

use thiserror::Error;

/// A token sequence that is not a well-formed formula.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("empty formula")]
    Empty,
    #[error("unknown token `{0}`")]
    UnknownToken(String),
    #[error("token id {0} is not registered")]
    UnknownTokenId(usize),
    #[error("stack underflow at position {position}: `{token}` needs {needed} operand(s), found {found}")]
    StackUnderflow {
        position: usize,
        token: String,
        needed: usize,
        found: usize,
    },
    #[error("type mismatch at position {position}: `{token}` cannot take these operands")]
    TypeMismatch { position: usize, token: String },
    #[error("constant `{token}` at position {position} has no series to act on")]
    LeadingConstant { position: usize, token: String },
    #[error("formula leaves {0} values on the stack")]
    Unbalanced(usize),
    #[error("formula result is a scalar, not a series")]
    ScalarResult,
    #[error("separator token inside a formula at position {0}")]
    SeparatorInFormula(usize),
    #[error("unknown feature `{0}`")]
    UnknownFeature(String),
    #[error("`{token}` cannot extend the formula at position {position}")]
    IllegalExtension { position: usize, token: String },
}

/// Malformed time-series input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("index has {index} timestamps but {values} values were given")]
    LengthMismatch { index: usize, values: usize },
    #[error("timestamps must be strictly increasing (position {0})")]
    UnsortedIndex(usize),
}

/// Failure while replaying a formula against feature data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error(transparent)]
    Formula(#[from] FormulaError),
    #[error("`{0}` produced no finite values")]
    NonFinite(String),
    #[error("`{0}` operands share no timestamps")]
    Unaligned(String),
    #[error("`{op}` got window {window}, windows must be >= 1")]
    InvalidWindow { op: String, window: f64 },
}

/// The policy provider returned something the search cannot use.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyContractError {
    #[error("prior for token {0} is outside the legal action set")]
    IllegalAction(usize),
    #[error("missing prior for legal token {0}")]
    MissingAction(usize),
    #[error("duplicate prior for token {0}")]
    DuplicateAction(usize),
    #[error("prior {value} for token {token} is negative or not finite")]
    InvalidPrior { token: usize, value: f64 },
    #[error("priors sum to {0}, expected 1")]
    NotNormalized(f64),
    #[error("value estimate {0} is not finite")]
    InvalidValue(f64),
}

/// Failure of one MCTS-driven formula construction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("policy contract violated: {0}")]
    Policy(#[from] PolicyContractError),
    #[error(transparent)]
    Formula(#[from] FormulaError),
    #[error("no legal action from a non-terminal state of length {0}")]
    DeadEnd(usize),
    #[error("search cancelled")]
    Cancelled,
}

/// Top-level error for a training run.
#[derive(Error, Debug)]
pub enum MinerError {
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error(transparent)]
    Formula(#[from] FormulaError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("training data is empty: {0}")]
    EmptyData(String),
}
