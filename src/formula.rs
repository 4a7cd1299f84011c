//! Finished formulas.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::FormulaError;
use crate::token::{PartialState, RpnValidator, Token, TokenId, TokenRegistry};

/// A complete, valid RPN expression. Immutable once built.
///
/// Identity is the canonical key (space-joined token names), which is what
/// pool caches are keyed by.
#[derive(Clone, Debug)]
pub struct Formula {
    tokens: Vec<TokenId>,
    key: String,
}

impl Formula {
    /// Validate and build a formula.
    pub fn new(tokens: Vec<TokenId>, registry: &TokenRegistry) -> Result<Self, FormulaError> {
        RpnValidator::validate(registry, &tokens)?;
        Ok(Self::new_unchecked(tokens, registry))
    }

    /// Build from a sequence already known to be valid.
    pub(crate) fn new_unchecked(tokens: Vec<TokenId>, registry: &TokenRegistry) -> Self {
        let key = tokens
            .iter()
            .map(|&id| registry.name(id))
            .collect::<Vec<_>>()
            .join(" ");
        Self { tokens, key }
    }

    /// Finalize an MDP state.
    pub fn from_state(state: &PartialState, registry: &TokenRegistry) -> Result<Self, FormulaError> {
        Self::new(state.tokens().to_vec(), registry)
    }

    #[must_use]
    pub fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Function-call rendering, e.g. `ts_mean(close, 10)`.
    #[must_use]
    pub fn to_infix(&self, registry: &TokenRegistry) -> String {
        let mut stack: Vec<String> = Vec::new();
        for &id in &self.tokens {
            match registry.get(id) {
                Some(Token::Operator(op)) => {
                    let start = stack.len().saturating_sub(op.arity());
                    let args = stack.split_off(start);
                    stack.push(format!("{}({})", op.name(), args.join(", ")));
                }
                Some(token) => stack.push(token.name()),
                None => stack.push("?".to_string()),
            }
        }
        stack.join(" ")
    }
}

impl PartialEq for Formula {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Formula {}

impl Hash for Formula {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}
