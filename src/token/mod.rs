//! # Formula Vocabulary
//!
//! Tokens of the RPN grammar and the rules for combining them.
//!
//! ## Token kinds
//!
//! | Kind | Stack effect | Result |
//! |------|--------------|--------|
//! | Feature operand | push 1 | Series |
//! | Constant operand | push 1 | Scalar |
//! | Operator | pop arity, push 1 | Series |
//! | End | none, closes the episode | - |
//!
//! Tokens live in a [`TokenRegistry`] and are referred to everywhere else by
//! [`TokenId`]. A search tree or formula never owns a token.

mod registry;
mod validator;


pub use registry::{TokenRegistry, DEFAULT_CONSTANTS};
pub use validator::{PartialState, RpnValidator};

use serde::{Deserialize, Serialize};

/// Reference to a registered token (index into the registry).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenId(pub usize);

impl TokenId {
    /// Get the underlying index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Type of a value on the evaluation stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Scalar,
    Series,
}

/// A leaf of the formula.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    /// Named feature column, e.g. `close`.
    Feature(String),
    /// Numeric constant. Used as a window length or arithmetic operand.
    Constant(f64),
}

impl Operand {
    #[must_use]
    pub fn returns(&self) -> ValueType {
        match self {
            Operand::Feature(_) => ValueType::Series,
            Operand::Constant(_) => ValueType::Scalar,
        }
    }

    /// Canonical token text.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Operand::Feature(name) => name.clone(),
            Operand::Constant(value) => format_constant(*value),
        }
    }
}

fn format_constant(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Operand type signature of an operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signature {
    /// `(Series)`
    Unary,
    /// `(Series|Scalar, Series|Scalar)` with at least one Series.
    Arithmetic,
    /// `(Series, Scalar window)`
    Rolling,
    /// `(Series, Series, Scalar window)`
    PairRolling,
}

impl Signature {
    /// Check operand types, given in push order (deepest first).
    #[must_use]
    pub fn accepts(self, args: &[ValueType]) -> bool {
        use ValueType::{Scalar, Series};
        match (self, args) {
            (Signature::Unary, [Series]) => true,
            (Signature::Arithmetic, [a, b]) => *a == Series || *b == Series,
            (Signature::Rolling, [Series, Scalar]) => true,
            (Signature::PairRolling, [Series, Series, Scalar]) => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn arity(self) -> usize {
        match self {
            Signature::Unary => 1,
            Signature::Arithmetic | Signature::Rolling => 2,
            Signature::PairRolling => 3,
        }
    }
}

/// The closed operator set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Abs,
    Neg,
    Log,
    Sign,
    Add,
    Sub,
    Mul,
    Div,
    Greater,
    Less,
    Ref,
    TsMean,
    TsSum,
    TsStd,
    TsMax,
    TsMin,
    TsRank,
    TsDelta,
    TsCorr,
    TsCov,
}

impl Operator {
    /// Every operator, in default registration order.
    pub const ALL: [Operator; 20] = [
        Operator::Abs,
        Operator::Neg,
        Operator::Log,
        Operator::Sign,
        Operator::Add,
        Operator::Sub,
        Operator::Mul,
        Operator::Div,
        Operator::Greater,
        Operator::Less,
        Operator::Ref,
        Operator::TsMean,
        Operator::TsSum,
        Operator::TsStd,
        Operator::TsMax,
        Operator::TsMin,
        Operator::TsRank,
        Operator::TsDelta,
        Operator::TsCorr,
        Operator::TsCov,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Operator::Abs => "abs",
            Operator::Neg => "neg",
            Operator::Log => "log",
            Operator::Sign => "sign",
            Operator::Add => "add",
            Operator::Sub => "sub",
            Operator::Mul => "mul",
            Operator::Div => "div",
            Operator::Greater => "greater",
            Operator::Less => "less",
            Operator::Ref => "ref",
            Operator::TsMean => "ts_mean",
            Operator::TsSum => "ts_sum",
            Operator::TsStd => "ts_std",
            Operator::TsMax => "ts_max",
            Operator::TsMin => "ts_min",
            Operator::TsRank => "ts_rank",
            Operator::TsDelta => "ts_delta",
            Operator::TsCorr => "ts_corr",
            Operator::TsCov => "ts_cov",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.name() == name)
    }

    #[must_use]
    pub fn signature(self) -> Signature {
        match self {
            Operator::Abs | Operator::Neg | Operator::Log | Operator::Sign => Signature::Unary,
            Operator::Add
            | Operator::Sub
            | Operator::Mul
            | Operator::Div
            | Operator::Greater
            | Operator::Less => Signature::Arithmetic,
            Operator::Ref
            | Operator::TsMean
            | Operator::TsSum
            | Operator::TsStd
            | Operator::TsMax
            | Operator::TsMin
            | Operator::TsRank
            | Operator::TsDelta => Signature::Rolling,
            Operator::TsCorr | Operator::TsCov => Signature::PairRolling,
        }
    }

    #[must_use]
    pub fn arity(self) -> usize {
        self.signature().arity()
    }

    /// All operators produce a series.
    #[must_use]
    pub fn returns(self) -> ValueType {
        ValueType::Series
    }
}

/// A grammar token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Token {
    Operand(Operand),
    Operator(Operator),
    /// Closes a complete formula. Never part of a [`crate::formula::Formula`].
    End,
}

impl Token {
    /// Feature operand shorthand.
    #[must_use]
    pub fn feature(name: impl Into<String>) -> Self {
        Token::Operand(Operand::Feature(name.into()))
    }

    /// Constant operand shorthand.
    #[must_use]
    pub fn constant(value: f64) -> Self {
        Token::Operand(Operand::Constant(value))
    }

    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Token::Operand(operand) => operand.name(),
            Token::Operator(op) => op.name().to_string(),
            Token::End => "<end>".to_string(),
        }
    }

    #[must_use]
    pub fn arity(&self) -> usize {
        match self {
            Token::Operand(_) | Token::End => 0,
            Token::Operator(op) => op.arity(),
        }
    }

    /// Type pushed onto the stack, `None` for [`Token::End`].
    #[must_use]
    pub fn returns(&self) -> Option<ValueType> {
        match self {
            Token::Operand(operand) => Some(operand.returns()),
            Token::Operator(op) => Some(op.returns()),
            Token::End => None,
        }
    }
}
