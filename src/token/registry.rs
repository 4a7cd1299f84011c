//! Token registry: owns every token and hands out stable ids.

use std::collections::HashMap;

use super::{Operator, RpnValidator, Token, TokenId};
use crate::error::FormulaError;
use crate::formula::Formula;

/// Default window / arithmetic constants.
pub const DEFAULT_CONSTANTS: [f64; 5] = [1.0, 5.0, 10.0, 20.0, 40.0];

/// Arena of tokens, created once at startup and shared read-only.
///
/// Registration order is meaningful: legal actions are listed in it and
/// search ties are broken toward the earlier token. The End token is always
/// id 0, so ties prefer closing a formula.
#[derive(Clone, Debug)]
pub struct TokenRegistry {
    tokens: Vec<Token>,
    names: Vec<String>,
    by_name: HashMap<String, TokenId>,
}

impl TokenRegistry {
    /// Registry holding only the End token.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            tokens: Vec::new(),
            names: Vec::new(),
            by_name: HashMap::new(),
        };
        registry.register(Token::End);
        registry
    }

    /// Features, then [`DEFAULT_CONSTANTS`], then every operator.
    #[must_use]
    pub fn with_features<I, S>(features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_constants(features, &DEFAULT_CONSTANTS)
    }

    /// Features, then `constants`, then every operator.
    #[must_use]
    pub fn with_constants<I, S>(features: I, constants: &[f64]) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self::new();
        for name in features {
            registry.register(Token::feature(name));
        }
        for &value in constants {
            registry.register(Token::constant(value));
        }
        for op in Operator::ALL {
            registry.register(Token::Operator(op));
        }
        registry
    }

    /// Register a token, returning the existing id if the name is taken.
    pub fn register(&mut self, token: Token) -> TokenId {
        let name = token.name();
        if let Some(&id) = self.by_name.get(&name) {
            return id;
        }
        let id = TokenId(self.tokens.len());
        self.tokens.push(token);
        self.names.push(name.clone());
        self.by_name.insert(name, id);
        id
    }

    #[must_use]
    pub fn get(&self, id: TokenId) -> Option<&Token> {
        self.tokens.get(id.index())
    }

    /// Canonical text of a token; empty for unknown ids.
    #[must_use]
    pub fn name(&self, id: TokenId) -> &str {
        self.names.get(id.index()).map_or("", String::as_str)
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<TokenId> {
        self.by_name.get(name).copied()
    }

    /// The End token.
    #[must_use]
    pub fn end(&self) -> TokenId {
        TokenId(0)
    }

    /// Registered feature names, in registration order.
    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().filter_map(|token| match token {
            Token::Operand(super::Operand::Feature(name)) => Some(name.as_str()),
            _ => None,
        })
    }

    /// `(id, token)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (TokenId, &Token)> {
        self.tokens
            .iter()
            .enumerate()
            .map(|(idx, token)| (TokenId(idx), token))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Parse space-separated RPN text such as `close 10 ts_mean`.
    pub fn parse_formula(&self, text: &str) -> Result<Formula, FormulaError> {
        let tokens = text
            .split_whitespace()
            .map(|word| {
                self.lookup(word)
                    .ok_or_else(|| FormulaError::UnknownToken(word.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        RpnValidator::validate(self, &tokens)?;
        Ok(Formula::new_unchecked(tokens, self))
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}
