//! Pure evaluation of relational, logical and arithmetic operators over
//! JSON values, plus the value coercions the query language is built on.

use serde_json::Value;

/// Binary operators of the statement language, in precedence groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operator {
    /// Placeholder operator carried by the first operand of a statement.
    Nop,
    Or,
    And,
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
}

impl Operator {
    pub(crate) fn from_symbol(symbol: &str) -> Option<Operator> {
        Some(match symbol {
            "" => Operator::Nop,
            "|" => Operator::Or,
            "&" => Operator::And,
            "=" => Operator::Eq,
            "!=" => Operator::Ne,
            ">" => Operator::Gt,
            ">=" => Operator::Gte,
            "<" => Operator::Lt,
            "<=" => Operator::Lte,
            "+" => Operator::Plus,
            "-" => Operator::Minus,
            "*" => Operator::Multiply,
            "/" => Operator::Divide,
            "%" => Operator::Modulo,
            _ => return None,
        })
    }

    /// Binding strength; a reduce happens whenever the incoming operator
    /// does not bind tighter than the one on top of the stack.
    pub(crate) fn precedence(self) -> u8 {
        match self {
            Operator::Nop => 0,
            Operator::Or => 1,
            Operator::And => 2,
            Operator::Eq | Operator::Ne | Operator::Gt | Operator::Gte | Operator::Lt
            | Operator::Lte => 3,
            Operator::Plus | Operator::Minus => 4,
            Operator::Multiply | Operator::Divide | Operator::Modulo => 5,
        }
    }

    pub(crate) fn is_relational(self) -> bool {
        self.precedence() == 3
    }

    pub(crate) fn is_arithmetic(self) -> bool {
        self.precedence() >= 4
    }

    /// Adjusts an ordering operator after its operands have been swapped.
    fn flip_sides(self) -> Operator {
        match self {
            Operator::Gt => Operator::Lt,
            Operator::Gte => Operator::Lte,
            Operator::Lt => Operator::Gt,
            Operator::Lte => Operator::Gte,
            other => other,
        }
    }
}

// --- Coercions ---

pub(crate) fn is_value_node(node: &Value) -> bool {
    !node.is_array() && !node.is_object()
}

/// Boolean interpretation: booleans themselves, non-zero numbers, and the
/// text `true` (ASCII case-insensitive). Everything else is false.
pub(crate) fn as_bool(node: Option<&Value>) -> bool {
    match node {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0) != 0.0,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Text form of a value node. Containers render empty; null renders as
/// the word `null`.
pub(crate) fn as_text(node: &Value) -> String {
    match node {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        _ => String::new(),
    }
}

pub(crate) fn to_double(node: &Value) -> Option<f64> {
    match node {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Wraps an arithmetic result, collapsing whole doubles back to integers.
fn number_value(value: f64) -> Option<Value> {
    if !value.is_finite() {
        return None;
    }
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        return Some(Value::from(value as i64));
    }
    Some(Value::from(value))
}

/// Applies `+ - * / %` after numeric coercion of both sides. A side that
/// cannot coerce, or a non-finite result, yields nothing.
pub(crate) fn arithmetic(
    left: Option<&Value>,
    operator: Operator,
    right: Option<&Value>,
) -> Option<Value> {
    let l = left.and_then(to_double)?;
    let r = right.and_then(to_double)?;
    let result = match operator {
        Operator::Plus => l + r,
        Operator::Minus => l - r,
        Operator::Multiply => l * r,
        Operator::Divide => l / r,
        Operator::Modulo => l % r,
        _ => return None,
    };
    number_value(result)
}

// --- Relational comparison ---

fn compare_ordering(ordering: std::cmp::Ordering, operator: Operator) -> bool {
    use std::cmp::Ordering::*;
    match operator {
        Operator::Eq => ordering == Equal,
        Operator::Ne => ordering != Equal,
        Operator::Gt => ordering == Greater,
        Operator::Gte => ordering != Less,
        Operator::Lt => ordering == Less,
        Operator::Lte => ordering != Greater,
        _ => false,
    }
}

/// Compares two resolved operands under a relational operator. Missing
/// operands count as null. Text against text compares lexicographically;
/// a lone text side coerces to number when parseable, otherwise only `!=`
/// holds; booleans participate in `=`/`!=` through their boolean
/// interpretation; containers compare only under `=`/`!=`.
pub(crate) fn relational_compare(
    left: Option<&Value>,
    operator: Operator,
    right: Option<&Value>,
) -> bool {
    let null = Value::Null;
    let mut left = left.unwrap_or(&null);
    let mut right = right.unwrap_or(&null);
    if !is_value_node(left) || !is_value_node(right) {
        return compare_containers(left, operator, right);
    }
    let mut operator = operator;
    if right.is_string() {
        if let (Some(l), Some(r)) = (left.as_str(), right.as_str()) {
            return compare_ordering(l.cmp(r), operator);
        }
        std::mem::swap(&mut left, &mut right);
        operator = operator.flip_sides();
    }
    if right.is_number() {
        let coerced = if left.is_number() {
            left.as_f64()
        } else {
            left.as_str().and_then(|s| s.trim().parse().ok())
        };
        return match coerced {
            Some(l) => {
                let r = right.as_f64().unwrap_or(f64::NAN);
                compare_ordering(l.partial_cmp(&r).unwrap_or(std::cmp::Ordering::Greater), operator)
            }
            // Unparseable text against a number: only inequality holds.
            None => operator == Operator::Ne,
        };
    }
    if let Value::Bool(r) = right {
        return match operator {
            Operator::Eq => as_bool(Some(left)) == *r,
            Operator::Ne => as_bool(Some(left)) != *r,
            _ => false,
        };
    }
    match operator {
        Operator::Eq => left.is_null() && right.is_null(),
        Operator::Ne => left.is_null() != right.is_null(),
        _ => false,
    }
}

/// Container comparison is defined only for `=`/`!=` between same-kind,
/// same-size containers: arrays compare as multisets of value-only
/// elements, objects compare key-wise recursively.
fn compare_containers(left: &Value, operator: Operator, right: &Value) -> bool {
    let not_equal = operator == Operator::Ne;
    if !matches!(operator, Operator::Eq | Operator::Ne) {
        return not_equal;
    }
    match (left, right) {
        (Value::Array(l), Value::Array(r)) => {
            if l.len() != r.len() {
                return not_equal;
            }
            let mut pool: Vec<&Value> = Vec::with_capacity(r.len());
            for element in r {
                if !is_value_node(element) {
                    return not_equal;
                }
                pool.push(element);
            }
            for element in l.iter().rev() {
                if !is_value_node(element) {
                    return false;
                }
                match pool
                    .iter()
                    .position(|candidate| {
                        relational_compare(Some(element), Operator::Eq, Some(candidate))
                    }) {
                    Some(at) => {
                        pool.remove(at);
                    }
                    None => return not_equal,
                }
            }
            operator == Operator::Eq
        }
        (Value::Object(l), Value::Object(r)) => {
            if l.len() != r.len() {
                return not_equal;
            }
            for (key, value) in l {
                if !relational_compare(Some(value), Operator::Eq, r.get(key)) {
                    return not_equal;
                }
            }
            operator == Operator::Eq
        }
        _ => not_equal,
    }
}
