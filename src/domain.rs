//! Search domain engine
//! --------------------
//! A domain is a sequence mixing prefix operators (`&`, `|`) and triple
//! filters `(field, op, value)`. An operator consumes the next two
//! sub-results; adjacent results without an operator are implicitly joined
//! by `&`. The typed [`Domain`] form is the public API; the heterogeneous
//! JSON list the store historically accepted is still parsed by
//! [`domain_from_json`].
//!
//! Evaluation reduces a processed sequence (every filter replaced by its
//! boolean) by repeatedly applying the first matching rewrite until a single
//! boolean remains. Validation runs the same reduction over a
//! fake-processed sequence with every filter mapped to `true`.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value as JsonValue;

use crate::error::{FsdbError, Result};
use crate::field::Field;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainOp {
    And,
    Or,
}

impl DomainOp {
    pub fn parse(token: &str) -> Option<DomainOp> {
        match token {
            "&" => Some(DomainOp::And),
            "|" => Some(DomainOp::Or),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DomainOp::And => "&",
            DomainOp::Or => "|",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    In,
    NotIn,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn parse(token: &str) -> Option<CompareOp> {
        match token {
            "=" => Some(CompareOp::Eq),
            "!=" => Some(CompareOp::Ne),
            "in" => Some(CompareOp::In),
            "not in" => Some(CompareOp::NotIn),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Ge),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Le),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::In => "in",
            CompareOp::NotIn => "not in",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `(field, op, value)` filter.
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: CompareOp,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub enum DomainItem {
    Op(DomainOp),
    Filter(Filter),
}

impl DomainItem {
    pub fn and() -> DomainItem {
        DomainItem::Op(DomainOp::And)
    }

    pub fn or() -> DomainItem {
        DomainItem::Op(DomainOp::Or)
    }

    pub fn filter<S: Into<String>, V: Into<Value>>(field: S, op: CompareOp, value: V) -> DomainItem {
        DomainItem::Filter(Filter { field: field.into(), op, value: value.into() })
    }
}

pub type Domain = Vec<DomainItem>;

/// A processed domain entry: operators survive, filters are replaced by the
/// boolean they evaluated to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainToken {
    Op(DomainOp),
    Bool(bool),
}

fn domain_err<T>(domain: &[DomainItem], detail: &str) -> Result<T> {
    Err(FsdbError::Domain(format!("{} {:?}", detail, domain)))
}

/// Parse the legacy wire shape: a JSON list mixing the strings `"&"`/`"|"`
/// with 3-element `[field, op, value]` arrays.
pub fn domain_from_json(raw: &JsonValue) -> Result<Domain> {
    let entries = match raw.as_array() {
        Some(entries) => entries,
        None => return Err(FsdbError::domain(format!("domain must be a list, got {}", raw))),
    };

    let mut domain = Domain::new();
    for entry in entries {
        if let Some(token) = entry.as_str() {
            match DomainOp::parse(token) {
                Some(op) => domain.push(DomainItem::Op(op)),
                None => return Err(FsdbError::domain(format!("unknown operator \"{}\"", token))),
            }
            continue;
        }

        let parts = match entry.as_array() {
            Some(parts) => parts,
            None => return Err(FsdbError::domain(format!("filter must be a list, got {}", entry))),
        };
        if parts.len() != 3 {
            return Err(FsdbError::domain(format!("filter must have 3 entries, got {}", entry)));
        }
        let field = match parts[0].as_str() {
            Some(field) => field.to_string(),
            None => return Err(FsdbError::domain(format!("filter field must be a string, got {}", parts[0]))),
        };
        let op = match parts[1].as_str().and_then(CompareOp::parse) {
            Some(op) => op,
            None => return Err(FsdbError::domain(format!("unknown comparison \"{}\"", parts[1]))),
        };
        let value = Value::from_json(&parts[2]);
        if matches!(op, CompareOp::In | CompareOp::NotIn) && !matches!(value, Value::List(_)) {
            return Err(FsdbError::domain(format!("\"{}\" requires a list value, got {}", op, parts[2])));
        }
        domain.push(DomainItem::Filter(Filter { field, op, value }));
    }
    Ok(domain)
}

/// Validate a domain against a table's field set: every referenced field
/// must exist, `in`/`not in` need list values, and the fake-processed form
/// (filters replaced by `true`) must reduce to a single boolean.
pub fn validate_domain(domain: &[DomainItem], fields: &BTreeMap<String, Field>) -> Result<()> {
    if domain.is_empty() {
        return Ok(());
    }

    for item in domain {
        if let DomainItem::Filter(filter) = item {
            if !fields.contains_key(&filter.field) {
                return domain_err(domain, &format!("unknown field \"{}\" in", filter.field));
            }
            if matches!(filter.op, CompareOp::In | CompareOp::NotIn)
                && !matches!(filter.value, Value::List(_) | Value::Tuple(_))
            {
                return domain_err(domain, &format!("\"{}\" requires a list value in", filter.op));
            }
        }
    }

    let fake: Vec<DomainToken> = domain
        .iter()
        .map(|item| match item {
            DomainItem::Op(op) => DomainToken::Op(*op),
            DomainItem::Filter(_) => DomainToken::Bool(true),
        })
        .collect();
    if reduce(fake).is_none() {
        return domain_err(domain, "unevaluable domain");
    }
    Ok(())
}

/// Evaluate a processed domain. The empty sequence is `true`.
pub fn evaluate_domain(tokens: &[DomainToken]) -> Result<bool> {
    match reduce(tokens.to_vec()) {
        Some(result) => Ok(result),
        None => Err(FsdbError::Domain(format!("unevaluable domain {:?}", tokens))),
    }
}

// The reduction applies, until fixpoint, the first of:
//   1. two leading booleans -> their conjunction;
//   2. three consecutive booleans -> keep the first, conjoin the other two;
//   3. op, bool, bool -> fold with the operator.
// Every rewrite shrinks the sequence, so termination is immediate. A
// sequence that settles on anything but a single boolean is malformed.
fn reduce(mut seq: Vec<DomainToken>) -> Option<bool> {
    use DomainToken::{Bool, Op};

    if seq.is_empty() {
        return Some(true);
    }

    loop {
        let mut changed = false;

        if seq.len() >= 2 {
            if let (Bool(a), Bool(b)) = (seq[0], seq[1]) {
                seq[0] = Bool(a && b);
                seq.remove(1);
                changed = true;
            }
        }

        if !changed {
            for i in 0..seq.len().saturating_sub(2) {
                if let (Bool(_), Bool(b), Bool(c)) = (seq[i], seq[i + 1], seq[i + 2]) {
                    seq[i + 1] = Bool(b && c);
                    seq.remove(i + 2);
                    changed = true;
                    break;
                }
            }
        }

        if !changed {
            for i in 0..seq.len().saturating_sub(2) {
                if let (Op(op), Bool(b), Bool(c)) = (seq[i], seq[i + 1], seq[i + 2]) {
                    seq[i] = Bool(match op {
                        DomainOp::And => b && c,
                        DomainOp::Or => b || c,
                    });
                    seq.remove(i + 2);
                    seq.remove(i + 1);
                    changed = true;
                    break;
                }
            }
        }

        if !changed {
            break;
        }
    }

    match seq.as_slice() {
        [Bool(result)] => Some(*result),
        _ => None,
    }
}

/// Apply a single filter to a field value.
pub(crate) fn filter_matches(filter: &Filter, field_value: &Value) -> Result<bool> {
    use std::cmp::Ordering;

    let ordered = |orderings: &[Ordering]| -> bool {
        match field_value.compare(&filter.value) {
            Some(ord) => orderings.contains(&ord),
            None => false,
        }
    };

    match filter.op {
        CompareOp::Eq => Ok(field_value.equals(&filter.value)),
        CompareOp::Ne => Ok(!field_value.equals(&filter.value)),
        CompareOp::In | CompareOp::NotIn => {
            let items = match &filter.value {
                Value::List(items) | Value::Tuple(items) => items,
                _ => {
                    return Err(FsdbError::domain(format!(
                        "\"{}\" requires a list value on field \"{}\"",
                        filter.op, filter.field
                    )));
                }
            };
            let found = items.iter().any(|item| field_value.equals(item));
            Ok(if filter.op == CompareOp::In { found } else { !found })
        }
        CompareOp::Gt => Ok(ordered(&[Ordering::Greater])),
        CompareOp::Ge => Ok(ordered(&[Ordering::Greater, Ordering::Equal])),
        CompareOp::Lt => Ok(ordered(&[Ordering::Less])),
        CompareOp::Le => Ok(ordered(&[Ordering::Less, Ordering::Equal])),
    }
}

/// One clause of an order specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    pub field: String,
    pub descending: bool,
}

/// Parse and validate an order string: comma-separated `field [asc|desc]`
/// clauses, exactly two space-separated tokens per clause, direction
/// case-insensitive.
pub fn validate_order(order: &str) -> Result<Vec<OrderKey>> {
    let mut keys = Vec::new();
    for clause in order.split(',') {
        let clause = clause.trim();
        if clause.is_empty() {
            return Err(FsdbError::order(format!("empty clause in \"{}\"", order)));
        }
        let tokens: Vec<&str> = clause.split(' ').collect();
        if tokens.len() != 2 {
            return Err(FsdbError::order(format!("clause \"{}\" must be \"field asc|desc\"", clause)));
        }
        let descending = match tokens[1].to_lowercase().as_str() {
            "asc" => false,
            "desc" => true,
            other => {
                return Err(FsdbError::order(format!("unknown direction \"{}\" in \"{}\"", other, clause)));
            }
        };
        keys.push(OrderKey { field: tokens[0].to_string(), descending });
    }
    Ok(keys)
}

#[cfg(test)]
#[path = "domain_tests.rs"]
mod domain_tests;
