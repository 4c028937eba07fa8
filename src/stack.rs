//! Two-stack evaluation of logical/relational statements.
//!
//! A statement is a flat run of operands joined by operators. Operands
//! stay unresolved until an operator consumes them, which keeps `&`/`|`
//! short-circuiting and spares dataset lookups on dead branches.

use crate::error::EngineError;
use crate::functions::FunctionRegistry;
use crate::ops::{self, Operator};
use crate::path;
use crate::scanner;
use serde_json::Value;
use std::collections::HashMap;

/// The dataset registry: a name mapped to `Some` resolved tree, or to
/// `None` when the name is known to be unresolvable in this merge.
pub(crate) type Datasets = HashMap<String, Option<Value>>;

/// Resolves a bare operand expression within some evaluation scope.
///
/// Two scopes exist: statements evaluated against the dataset registry,
/// and filter predicates evaluated against one array element.
pub(crate) trait OperandResolver {
    fn resolve(&mut self, expression: &str) -> Result<Option<Value>, EngineError>;
}

/// Registry-scoped resolution: literals, stored datasets (a poisoned
/// entry resolves to nothing rather than failing), `name.path` dataset
/// queries whose results are cached under the full query text, and
/// quoted-literal prefix queries. Anything else is an unresolved dataset.
pub(crate) struct DatasetResolver<'a> {
    datasets: &'a mut Datasets,
    functions: &'a FunctionRegistry,
}

impl<'a> DatasetResolver<'a> {
    pub(crate) fn new(datasets: &'a mut Datasets, functions: &'a FunctionRegistry) -> Self {
        Self { datasets, functions }
    }
}

impl OperandResolver for DatasetResolver<'_> {
    fn resolve(&mut self, expression: &str) -> Result<Option<Value>, EngineError> {
        if let Some(value) = scanner::parse_literal(expression) {
            return Ok(Some(value));
        }
        if let Some(stored) = self.datasets.get(expression) {
            return Ok(stored.clone());
        }
        if let Some(result) = path::literal_prefix_query(expression, self.functions) {
            return Ok(result);
        }
        if let Some((name, dataset_path)) = scanner::match_dataset_query(expression) {
            return match self.datasets.get(name) {
                Some(Some(node)) => {
                    let node = node.clone();
                    let result = path::navigate(&node, dataset_path, self.functions);
                    self.datasets.insert(expression.to_string(), result.clone());
                    Ok(result)
                }
                Some(None) => Ok(None),
                None => Err(EngineError::UnresolvedDataset(name.to_string())),
            };
        }
        Err(EngineError::UnresolvedDataset(expression.to_string()))
    }
}

/// Element-scoped resolution for filter predicates: literals, the `#`
/// index variable, and paths relative to the element. Misses resolve to
/// nothing; nothing here is an unresolved dataset.
pub(crate) struct ElementResolver<'a> {
    node: &'a Value,
    index: usize,
    functions: &'a FunctionRegistry,
}

impl<'a> ElementResolver<'a> {
    pub(crate) fn new(node: &'a Value, index: usize, functions: &'a FunctionRegistry) -> Self {
        Self { node, index, functions }
    }
}

impl OperandResolver for ElementResolver<'_> {
    fn resolve(&mut self, expression: &str) -> Result<Option<Value>, EngineError> {
        if let Some(value) = scanner::parse_literal(expression) {
            return Ok(Some(value));
        }
        if expression == "#" {
            return Ok(Some(Value::from(self.index)));
        }
        if let Some(result) = path::literal_prefix_query(expression, self.functions) {
            return Ok(result);
        }
        Ok(path::navigate(self.node, expression, self.functions))
    }
}

enum Operand {
    Pending(String),
    Done(Option<Value>),
}

/// The statement evaluator: an operand stack and an operator stack,
/// reduced whenever the incoming operator does not bind tighter than the
/// stacked one. Parenthesised operands recurse; `!` prefixes negate.
pub(crate) struct LogicalOpStack;

impl LogicalOpStack {
    pub(crate) fn evaluate(
        statement: &str,
        resolver: &mut dyn OperandResolver,
    ) -> Result<Option<Value>, EngineError> {
        let conditions = scanner::decompose_conditions(statement)?;
        let mut operands: Vec<Operand> = Vec::new();
        let mut operators: Vec<Operator> = Vec::new();
        for condition in conditions {
            let operator = Operator::from_symbol(&condition.symbol).ok_or_else(|| {
                EngineError::InvalidQuery(
                    statement.to_string(),
                    format!("unsupported operator '{}'", condition.symbol),
                )
            })?;
            while let Some(top) = operators.last() {
                if operator.precedence() <= top.precedence() {
                    Self::reduce(statement, &mut operands, &mut operators, resolver)?;
                } else {
                    break;
                }
            }
            if operator != Operator::Nop {
                operators.push(operator);
            }
            operands.push(Operand::Pending(condition.expression));
        }
        while !operators.is_empty() {
            Self::reduce(statement, &mut operands, &mut operators, resolver)?;
        }
        match (operands.pop(), operands.is_empty()) {
            (Some(operand), true) => Self::resolve_operand(operand, resolver),
            _ => Err(EngineError::InvalidQuery(
                statement.to_string(),
                "unbalanced expression".to_string(),
            )),
        }
    }

    fn reduce(
        statement: &str,
        operands: &mut Vec<Operand>,
        operators: &mut Vec<Operator>,
        resolver: &mut dyn OperandResolver,
    ) -> Result<(), EngineError> {
        let (Some(operator), Some(right), Some(left)) =
            (operators.pop(), operands.pop(), operands.pop())
        else {
            return Err(EngineError::InvalidQuery(
                statement.to_string(),
                "unbalanced expression".to_string(),
            ));
        };
        let result = match operator {
            Operator::And => {
                if !ops::as_bool(Self::resolve_operand(left, resolver)?.as_ref()) {
                    Some(Value::Bool(false))
                } else {
                    let right = Self::resolve_operand(right, resolver)?;
                    Some(Value::Bool(ops::as_bool(right.as_ref())))
                }
            }
            Operator::Or => {
                if ops::as_bool(Self::resolve_operand(left, resolver)?.as_ref()) {
                    Some(Value::Bool(true))
                } else {
                    let right = Self::resolve_operand(right, resolver)?;
                    Some(Value::Bool(ops::as_bool(right.as_ref())))
                }
            }
            operator if operator.is_relational() => {
                let left = Self::resolve_operand(left, resolver)?;
                let right = Self::resolve_operand(right, resolver)?;
                Some(Value::Bool(ops::relational_compare(
                    left.as_ref(),
                    operator,
                    right.as_ref(),
                )))
            }
            operator if operator.is_arithmetic() => {
                let left = Self::resolve_operand(left, resolver)?;
                let right = Self::resolve_operand(right, resolver)?;
                ops::arithmetic(left.as_ref(), operator, right.as_ref())
            }
            _ => {
                return Err(EngineError::InvalidQuery(
                    statement.to_string(),
                    "misplaced operator".to_string(),
                ));
            }
        };
        operands.push(Operand::Done(result));
        Ok(())
    }

    fn resolve_operand(
        operand: Operand,
        resolver: &mut dyn OperandResolver,
    ) -> Result<Option<Value>, EngineError> {
        match operand {
            Operand::Done(value) => Ok(value),
            Operand::Pending(expression) => Self::resolve_expression(&expression, resolver),
        }
    }

    fn resolve_expression(
        expression: &str,
        resolver: &mut dyn OperandResolver,
    ) -> Result<Option<Value>, EngineError> {
        let expression = expression.trim();
        if let Some(inner) = expression.strip_prefix('!') {
            let value = Self::resolve_expression(inner, resolver)?;
            return Ok(Some(Value::Bool(!ops::as_bool(value.as_ref()))));
        }
        if let Some(inner) = scanner::strip_parentheses(expression) {
            return Self::evaluate(inner, resolver);
        }
        resolver.resolve(expression)
    }
}
