//! # Formula Evaluator
//!
//! Replays an RPN formula as a stack machine over feature data.
//!
//! - feature operands push their column
//! - constants push a scalar
//! - operators pop their operands and push the computed series
//!
//! [`FormulaEvaluator::try_evaluate`] reports every failure.
//! [`FormulaEvaluator::evaluate`] is the scoring entry point: data conditions
//! (no overlap, nothing finite, bad window) become an all-undefined signal so
//! they score zero, and only malformed formulas are errors.

mod ops;

#[cfg(test)]
mod tests;

use log::debug;

use crate::data::{FeatureData, Series};
use crate::error::{EvaluationError, FormulaError};
use crate::formula::Formula;
use crate::token::{Operand, Token, TokenId, TokenRegistry, ValueType};

/// A value on the evaluation stack.
#[derive(Clone, Debug)]
pub(crate) enum Value {
    Scalar(f64),
    Series(Series),
}

impl Value {
    fn is_series(&self) -> bool {
        matches!(self, Value::Series(_))
    }
}

/// Stack-machine evaluator bound to a token registry.
#[derive(Clone, Copy)]
pub struct FormulaEvaluator<'a> {
    registry: &'a TokenRegistry,
}

impl<'a> FormulaEvaluator<'a> {
    #[must_use]
    pub fn new(registry: &'a TokenRegistry) -> Self {
        Self { registry }
    }

    /// Evaluate, mapping data conditions to an all-undefined signal.
    pub fn evaluate(&self, formula: &Formula, data: &FeatureData) -> Result<Series, FormulaError> {
        match self.try_evaluate(formula, data) {
            Ok(signal) => Ok(signal),
            Err(EvaluationError::Formula(err)) => Err(err),
            Err(err) => {
                debug!("formula `{}` evaluates to nothing: {}", formula, err);
                Ok(Series::undefined(data.index()))
            }
        }
    }

    /// Evaluate, reporting every failure.
    pub fn try_evaluate(&self, formula: &Formula, data: &FeatureData) -> Result<Series, EvaluationError> {
        self.run(formula.tokens(), data)
    }

    fn run(&self, tokens: &[TokenId], data: &FeatureData) -> Result<Series, EvaluationError> {
        if tokens.is_empty() {
            return Err(FormulaError::Empty.into());
        }
        let mut stack: Vec<Value> = Vec::with_capacity(tokens.len());

        for (position, &id) in tokens.iter().enumerate() {
            let token = self
                .registry
                .get(id)
                .ok_or(FormulaError::UnknownTokenId(id.index()))?;
            match token {
                Token::End => return Err(FormulaError::SeparatorInFormula(position).into()),
                Token::Operand(Operand::Feature(name)) => {
                    let column = data
                        .get(name)
                        .ok_or_else(|| FormulaError::UnknownFeature(name.clone()))?;
                    if !column.has_finite() {
                        return Err(EvaluationError::NonFinite(name.clone()));
                    }
                    stack.push(Value::Series(column.clone()));
                }
                Token::Operand(Operand::Constant(value)) => {
                    if !stack.last().is_some_and(Value::is_series) {
                        return Err(FormulaError::LeadingConstant {
                            position,
                            token: token.name(),
                        }
                        .into());
                    }
                    stack.push(Value::Scalar(*value));
                }
                Token::Operator(op) => {
                    let arity = op.arity();
                    if stack.len() < arity {
                        return Err(FormulaError::StackUnderflow {
                            position,
                            token: token.name(),
                            needed: arity,
                            found: stack.len(),
                        }
                        .into());
                    }
                    let args = stack.split_off(stack.len() - arity);
                    let types: Vec<_> = args
                        .iter()
                        .map(|v| match v {
                            Value::Scalar(_) => ValueType::Scalar,
                            Value::Series(_) => ValueType::Series,
                        })
                        .collect();
                    if !op.signature().accepts(&types) {
                        return Err(FormulaError::TypeMismatch {
                            position,
                            token: token.name(),
                        }
                        .into());
                    }
                    let result = ops::apply(*op, args)?;
                    if !result.has_finite() {
                        return Err(EvaluationError::NonFinite(op.name().to_string()));
                    }
                    stack.push(Value::Series(result));
                }
            }
        }

        match stack.len() {
            1 => match stack.pop() {
                Some(Value::Series(signal)) => Ok(signal),
                _ => Err(FormulaError::ScalarResult.into()),
            },
            n => Err(FormulaError::Unbalanced(n).into()),
        }
    }
}
