use super::predicate::Predicate;
use crate::config::QueryOptimizerType;

use std::sync::Arc;

/// Rewrites a predicate into the form the runner executes.
pub trait QueryOptimizer: Send + Sync {
    fn optimize(&self, predicate: Predicate) -> Predicate;
}

pub fn new_optimizer(kind: QueryOptimizerType) -> Arc<dyn QueryOptimizer> {
    match kind {
        QueryOptimizerType::Rules => Arc::new(RuleBasedOptimizer),
        QueryOptimizerType::None => Arc::new(EmptyOptimizer),
    }
}

/// Leaves the predicate untouched.
pub struct EmptyOptimizer;

impl QueryOptimizer for EmptyOptimizer {
    fn optimize(&self, predicate: Predicate) -> Predicate {
        predicate
    }
}

/// Constant folding and flattening.
///
/// - nested `And` / `Or` of the same kind are flattened
/// - `True` operands are dropped from `And`, `False` operands from `Or`
/// - a `False` operand collapses an `And`, a `True` operand collapses an `Or`
/// - single-operand `And` / `Or` are unwrapped, empty ones become their identity
/// - `Not(Not(p))` becomes `p`, `Not` of a constant is folded
pub struct RuleBasedOptimizer;

impl QueryOptimizer for RuleBasedOptimizer {
    fn optimize(&self, predicate: Predicate) -> Predicate {
        match predicate {
            Predicate::And(operands) => self.fold(operands, true),
            Predicate::Or(operands) => self.fold(operands, false),
            Predicate::Not(inner) => match self.optimize(*inner) {
                Predicate::Not(double) => *double,
                Predicate::True => Predicate::False,
                Predicate::False => Predicate::True,
                other => Predicate::Not(Box::new(other)),
            },
            other => other,
        }
    }
}

impl RuleBasedOptimizer {
    fn fold(&self, operands: Vec<Predicate>, conjunction: bool) -> Predicate {
        let mut flattened = Vec::with_capacity(operands.len());

        for operand in operands {
            match (self.optimize(operand), conjunction) {
                (Predicate::True, true) | (Predicate::False, false) => {}
                (Predicate::False, true) => return Predicate::False,
                (Predicate::True, false) => return Predicate::True,
                (Predicate::And(nested), true) | (Predicate::Or(nested), false) => {
                    flattened.extend(nested)
                }
                (other, _) => flattened.push(other),
            }
        }

        match flattened.len() {
            0 if conjunction => Predicate::True,
            0 => Predicate::False,
            1 => flattened.remove(0),
            _ if conjunction => Predicate::And(flattened),
            _ => Predicate::Or(flattened),
        }
    }
}
