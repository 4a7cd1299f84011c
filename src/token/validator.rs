//! Incremental RPN validity checks.
//!
//! [`PartialState`] caches the typed operand stack, so deciding whether one
//! more token is legal costs O(arity) instead of a replay of the prefix.

use super::{Operand, Token, TokenId, TokenRegistry, ValueType};
use crate::error::FormulaError;

/// Tokens chosen so far plus the typed stack they leave behind.
///
/// Cloned, never shared, when a search branches.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PartialState {
    tokens: Vec<TokenId>,
    stack: Vec<ValueType>,
    closed: bool,
}

impl PartialState {
    /// Empty state at the start of an episode.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token sequence so far (never contains the End token).
    #[must_use]
    pub fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Current operand-stack depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Types of the top `n` stack entries in push order, if that many exist.
    #[must_use]
    pub fn top(&self, n: usize) -> Option<&[ValueType]> {
        self.stack.len().checked_sub(n).map(|start| &self.stack[start..])
    }

    /// Whether the End token has been applied.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Apply a token's stack effect.
    ///
    /// Callers check [`RpnValidator::is_extendable`] first; this only keeps
    /// the cached stack in sync.
    pub fn push(&mut self, id: TokenId, token: &Token) {
        match token {
            Token::End => {
                self.closed = true;
            }
            Token::Operand(operand) => {
                self.tokens.push(id);
                self.stack.push(operand.returns());
            }
            Token::Operator(op) => {
                self.tokens.push(id);
                let keep = self.stack.len().saturating_sub(op.arity());
                self.stack.truncate(keep);
                self.stack.push(op.returns());
            }
        }
    }

    /// Return a copy with one more token applied.
    #[must_use]
    pub fn with(&self, id: TokenId, token: &Token) -> Self {
        let mut next = self.clone();
        next.push(id, token);
        next
    }
}

/// Grammar rules for the formula search space.
#[derive(Clone, Copy, Debug)]
pub struct RpnValidator {
    /// Maximum number of tokens in a formula (End excluded).
    pub max_len: usize,
}

impl RpnValidator {
    #[must_use]
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    /// True iff appending `token` keeps the sequence completable.
    ///
    /// Rules:
    /// - operators need `arity` operands of matching type on the stack
    /// - a constant only goes on top of a series, so two constants are never
    ///   adjacent and a depth-1 stack always holds a series
    /// - the resulting stack must still reduce to depth 1 before `max_len`
    /// - End is legal exactly when [`is_terminal`](Self::is_terminal) holds
    #[must_use]
    pub fn is_extendable(&self, state: &PartialState, token: &Token) -> bool {
        if state.is_closed() {
            return false;
        }
        let next_depth = match token {
            Token::End => return self.is_terminal(state),
            Token::Operand(Operand::Feature(_)) => state.depth() + 1,
            Token::Operand(Operand::Constant(_)) => {
                if state.top(1) != Some(&[ValueType::Series][..]) {
                    return false;
                }
                state.depth() + 1
            }
            Token::Operator(op) => {
                let accepted = state
                    .top(op.arity())
                    .is_some_and(|args| op.signature().accepts(args));
                if !accepted {
                    return false;
                }
                state.depth() + 1 - op.arity()
            }
        };
        let next_len = state.len() + 1;
        if next_len > self.max_len {
            return false;
        }
        // Every binary arithmetic step removes one stack entry.
        next_depth.saturating_sub(1) <= self.max_len - next_len
    }

    /// True iff the sequence is non-empty and leaves exactly one value.
    #[must_use]
    pub fn is_terminal(&self, state: &PartialState) -> bool {
        !state.is_empty() && state.depth() == 1
    }

    /// Whether the state can take no more formula tokens.
    #[must_use]
    pub fn is_at_max_len(&self, state: &PartialState) -> bool {
        state.len() >= self.max_len
    }

    /// Legal next tokens in registration order.
    #[must_use]
    pub fn legal_actions(&self, registry: &TokenRegistry, state: &PartialState) -> Vec<TokenId> {
        registry
            .iter()
            .filter(|(_, token)| self.is_extendable(state, token))
            .map(|(id, _)| id)
            .collect()
    }

    /// Replay a full token sequence, reporting the first violation.
    ///
    /// Length limits are not checked here; a formula loaded from disk may
    /// come from a run with a different cap.
    pub fn validate(registry: &TokenRegistry, tokens: &[TokenId]) -> Result<(), FormulaError> {
        if tokens.is_empty() {
            return Err(FormulaError::Empty);
        }
        let mut stack: Vec<ValueType> = Vec::with_capacity(tokens.len());
        for (position, &id) in tokens.iter().enumerate() {
            let token = registry
                .get(id)
                .ok_or(FormulaError::UnknownTokenId(id.index()))?;
            match token {
                Token::End => return Err(FormulaError::SeparatorInFormula(position)),
                Token::Operand(Operand::Feature(_)) => stack.push(ValueType::Series),
                Token::Operand(Operand::Constant(_)) => {
                    if stack.last() != Some(&ValueType::Series) {
                        return Err(FormulaError::LeadingConstant {
                            position,
                            token: token.name(),
                        });
                    }
                    stack.push(ValueType::Scalar);
                }
                Token::Operator(op) => {
                    let arity = op.arity();
                    if stack.len() < arity {
                        return Err(FormulaError::StackUnderflow {
                            position,
                            token: token.name(),
                            needed: arity,
                            found: stack.len(),
                        });
                    }
                    let start = stack.len() - arity;
                    if !op.signature().accepts(&stack[start..]) {
                        return Err(FormulaError::TypeMismatch {
                            position,
                            token: token.name(),
                        });
                    }
                    stack.truncate(start);
                    stack.push(op.returns());
                }
            }
        }
        match stack.as_slice() {
            [ValueType::Series] => Ok(()),
            [ValueType::Scalar] => Err(FormulaError::ScalarResult),
            other => Err(FormulaError::Unbalanced(other.len())),
        }
    }
}
