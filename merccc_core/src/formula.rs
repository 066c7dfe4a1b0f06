// Postfix score formula evaluation.
//
// The scoring formula is a fixed token list evaluated as reverse-Polish
// notation over a score's named field values. Tokens are classified once at
// startup (`Formula::compile`): numeric literal, operator, or known field
// key. Anything else fails initialization, before any socket is opened.
//
// Evaluation walks the tokens with an operand stack. Binary operators pop
// the right operand first, then the left (operands are pushed left-then-
// right). `SQRT` pops one. A field key absent from the score's values falls
// back to the per-field configured default rather than failing; partially
// filled scores are normal during a live run.
//
// Underflowing the stack or finishing with anything but exactly one operand
// is a programming fault in the compiled formula, not a runtime condition:
// `evaluate` panics. `compile` is the place where bad formulas are rejected.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::config::FieldSpec;

/// Formula compilation failures. Fatal at startup.
#[derive(Debug, Error, PartialEq)]
pub enum FormulaError {
    #[error("unknown token '{0}' in score formula")]
    UnknownToken(String),
    #[error("score formula is empty")]
    Empty,
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Literal(f64),
    Field(String),
    Op(Op),
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Sqrt,
}

/// A compiled postfix scoring formula.
#[derive(Clone, Debug)]
pub struct Formula {
    tokens: Vec<Token>,
    defaults: BTreeMap<String, f64>,
}

impl Formula {
    /// Classify every token against the configured field keys. Unknown
    /// tokens reject the whole formula.
    pub fn compile(tokens: &[String], fields: &[FieldSpec]) -> Result<Self, FormulaError> {
        if tokens.is_empty() {
            return Err(FormulaError::Empty);
        }
        let mut compiled = Vec::with_capacity(tokens.len());
        for token in tokens {
            let classified = match token.as_str() {
                "+" => Token::Op(Op::Add),
                "-" => Token::Op(Op::Sub),
                "*" => Token::Op(Op::Mul),
                "/" => Token::Op(Op::Div),
                "^" => Token::Op(Op::Pow),
                "SQRT" => Token::Op(Op::Sqrt),
                other => {
                    if let Ok(value) = other.parse::<f64>() {
                        Token::Literal(value)
                    } else if fields.iter().any(|f| f.key == *other) {
                        Token::Field(other.to_string())
                    } else {
                        return Err(FormulaError::UnknownToken(other.to_string()));
                    }
                }
            };
            compiled.push(classified);
        }
        let defaults = fields
            .iter()
            .map(|f| (f.key.clone(), f.default))
            .collect();
        Ok(Formula {
            tokens: compiled,
            defaults,
        })
    }

    /// Evaluate against a score's field values. Missing fields use their
    /// configured defaults.
    ///
    /// # Panics
    ///
    /// Panics if the compiled token sequence underflows the operand stack or
    /// leaves more than one operand, i.e. a malformed formula that `compile`
    /// should have rejected.
    pub fn evaluate(&self, values: &BTreeMap<String, f64>) -> f64 {
        let mut stack: Vec<f64> = Vec::with_capacity(self.tokens.len());
        for token in &self.tokens {
            match token {
                Token::Literal(value) => stack.push(*value),
                Token::Field(key) => {
                    let value = values
                        .get(key)
                        .or_else(|| self.defaults.get(key))
                        .copied()
                        .unwrap_or(0.0);
                    stack.push(value);
                }
                Token::Op(Op::Sqrt) => {
                    let operand = stack.pop().expect("formula stack underflow");
                    stack.push(operand.sqrt());
                }
                Token::Op(op) => {
                    let right = stack.pop().expect("formula stack underflow");
                    let left = stack.pop().expect("formula stack underflow");
                    let result = match op {
                        Op::Add => left + right,
                        Op::Sub => left - right,
                        Op::Mul => left * right,
                        Op::Div => left / right,
                        Op::Pow => left.powf(right),
                        Op::Sqrt => unreachable!(),
                    };
                    stack.push(result);
                }
            }
        }
        assert_eq!(stack.len(), 1, "formula left {} operands", stack.len());
        stack[0]
    }
}
