use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::ops::Bound;

use regex::Regex;
use serde_json::Value;

use crate::document::{Document, DocumentId};
use crate::error::{Error, Result};
use crate::index::FieldIndex;
use crate::value::IndexKey;

/// A single comparison/set operator applied to one field's resolved value.
#[derive(Debug, Clone)]
pub enum QueryOp {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Regex(Regex),
    /// An operator key this evaluator doesn't recognize. Per the source
    /// behavior, unknown operators evaluate to false rather than erroring —
    /// callers see "no match", never a parse failure.
    Unknown,
}

#[derive(Debug, Clone)]
pub enum FieldCriterion {
    /// `c` was not an operator object: match by deep equality.
    Eq(Value),
    Ops(Vec<QueryOp>),
}

/// A parsed query object. Field order is preserved from the source JSON
/// object (this crate enables serde_json's `preserve_order` feature for
/// exactly this reason) since the planner's index choice depends on it.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub fields: Vec<(String, FieldCriterion)>,
}

pub fn parse_query(value: &Value) -> Result<Query> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::BadRequest("query must be a JSON object".into()))?;
    let mut fields = Vec::with_capacity(obj.len());
    for (key, criterion) in obj {
        fields.push((key.clone(), parse_criterion(criterion)?));
    }
    Ok(Query { fields })
}

fn parse_criterion(criterion: &Value) -> Result<FieldCriterion> {
    match criterion {
        Value::Object(map) if is_operator_object(map) => {
            let options = map.get("$options").and_then(|v| v.as_str()).unwrap_or("");
            let mut ops = Vec::with_capacity(map.len());
            for (op_key, operand) in map {
                if op_key == "$options" {
                    continue;
                }
                ops.push(parse_op(op_key, operand, options)?);
            }
            Ok(FieldCriterion::Ops(ops))
        }
        other => Ok(FieldCriterion::Eq(other.clone())),
    }
}

fn is_operator_object(map: &serde_json::Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().any(|k| k.starts_with('$'))
}

fn parse_op(op_key: &str, operand: &Value, regex_options: &str) -> Result<QueryOp> {
    Ok(match op_key {
        "$eq" => QueryOp::Eq(operand.clone()),
        "$ne" => QueryOp::Ne(operand.clone()),
        "$gt" => QueryOp::Gt(operand.clone()),
        "$gte" => QueryOp::Gte(operand.clone()),
        "$lt" => QueryOp::Lt(operand.clone()),
        "$lte" => QueryOp::Lte(operand.clone()),
        "$in" => QueryOp::In(as_array(operand)?),
        "$nin" => QueryOp::Nin(as_array(operand)?),
        "$exists" => QueryOp::Exists(operand.as_bool().unwrap_or(true)),
        "$regex" => {
            let pattern = operand
                .as_str()
                .ok_or_else(|| Error::BadRequest("$regex requires a string pattern".into()))?;
            let source = if regex_options.contains('i') {
                format!("(?i){pattern}")
            } else {
                pattern.to_string()
            };
            QueryOp::Regex(
                Regex::new(&source).map_err(|e| Error::BadRequest(format!("invalid regex: {e}")))?,
            )
        }
        _ => QueryOp::Unknown,
    })
}

fn as_array(v: &Value) -> Result<Vec<Value>> {
    v.as_array()
        .cloned()
        .ok_or_else(|| Error::BadRequest("expected a JSON array".into()))
}

/// The filter evaluator (`4.3`): a document matches a query iff every field
/// of the query matches.
pub fn matches_doc(query: &Query, doc: &Document) -> bool {
    matches_value(query, &doc.data)
}

/// Same evaluator, operating directly on a JSON value rather than a
/// `Document` — used by the `$match` aggregation stage, which has no
/// document identifier to carry.
pub fn matches_value(query: &Query, value: &Value) -> bool {
    query
        .fields
        .iter()
        .all(|(field, criterion)| matches_field(value, field, criterion))
}

fn matches_field(value: &Value, field: &str, criterion: &FieldCriterion) -> bool {
    let resolved = crate::value::resolve_path(value, field);
    match criterion {
        // Missing is distinct from null, so a missing field never matches —
        // even an explicit `null` criterion.
        FieldCriterion::Eq(expected) => resolved.is_some_and(|r| value_eq(r, expected)),
        FieldCriterion::Ops(ops) => ops.iter().all(|op| matches_op(resolved, op)),
    }
}

/// Deep equality per `4.3`, routed through the canonical value-key so
/// numbers compare by value rather than by `serde_json::Number`'s
/// representation-strict `PartialEq` (which treats `130` and `130.0` as
/// unequal).
fn value_eq(a: &Value, b: &Value) -> bool {
    IndexKey::from_json(a) == IndexKey::from_json(b)
}

fn matches_op(resolved: Option<&Value>, op: &QueryOp) -> bool {
    match op {
        QueryOp::Eq(v) => resolved.is_some_and(|r| value_eq(r, v)),
        QueryOp::Ne(v) => resolved.is_none_or(|r| !value_eq(r, v)),
        QueryOp::Gt(v) => ordered_cmp(resolved, v) == Some(Ordering::Greater),
        QueryOp::Gte(v) => matches!(ordered_cmp(resolved, v), Some(Ordering::Greater | Ordering::Equal)),
        QueryOp::Lt(v) => ordered_cmp(resolved, v) == Some(Ordering::Less),
        QueryOp::Lte(v) => matches!(ordered_cmp(resolved, v), Some(Ordering::Less | Ordering::Equal)),
        QueryOp::In(values) => resolved.is_some_and(|r| values.iter().any(|v| value_eq(v, r))),
        QueryOp::Nin(values) => resolved.is_none_or(|r| values.iter().all(|v| !value_eq(v, r))),
        QueryOp::Exists(want) => resolved.is_some() == *want,
        QueryOp::Regex(re) => resolved.and_then(|r| r.as_str()).is_some_and(|s| re.is_match(s)),
        QueryOp::Unknown => false,
    }
}

/// Ordered comparison is only meaningful for two numbers or two strings
/// (lexicographic); every other combination — including a missing field —
/// yields `None`, which evaluator callers treat as "no match".
fn ordered_cmp(resolved: Option<&Value>, operand: &Value) -> Option<Ordering> {
    let r = resolved?;
    match (r, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Query planner (`4.4`): pick the first query field (in object order) that
/// has an index, use it to narrow the candidate set, and leave the full
/// filter evaluator to apply the exact semantics over that candidate set.
pub fn plan_candidate_ids(
    query: &Query,
    indexes: &HashMap<String, FieldIndex>,
    all_ids: &[DocumentId],
) -> Vec<DocumentId> {
    if query.fields.is_empty() {
        return all_ids.to_vec();
    }
    let chosen = query.fields.iter().find(|(field, _)| indexes.contains_key(field));
    let Some((field, criterion)) = chosen else {
        return all_ids.to_vec();
    };
    let index = &indexes[field];
    match criterion {
        FieldCriterion::Eq(v) => index.find_eq(v),
        FieldCriterion::Ops(ops) => plan_ops(index, ops, all_ids),
    }
}

/// Union-then-intersect across the operators the planner supports
/// (`$eq`/`$ne`/`$gt`/`$gte`/`$lt`/`$lte`); operators outside that set leave
/// the accumulator unconstrained for that step.
fn plan_ops(index: &FieldIndex, ops: &[QueryOp], all_ids: &[DocumentId]) -> Vec<DocumentId> {
    let mut acc: Option<HashSet<DocumentId>> = None;
    for op in ops {
        let candidate: Option<Vec<DocumentId>> = match op {
            QueryOp::Eq(v) => Some(index.find_eq(v)),
            QueryOp::Ne(v) => Some(index.find_ne(v)),
            QueryOp::Gt(v) => Some(index.find_range(Bound::Excluded(v), Bound::Unbounded)),
            QueryOp::Gte(v) => Some(index.find_range(Bound::Included(v), Bound::Unbounded)),
            QueryOp::Lt(v) => Some(index.find_range(Bound::Unbounded, Bound::Excluded(v))),
            QueryOp::Lte(v) => Some(index.find_range(Bound::Unbounded, Bound::Included(v))),
            _ => None,
        };
        if let Some(ids) = candidate {
            let set: HashSet<DocumentId> = ids.into_iter().collect();
            acc = Some(match acc {
                Some(existing) => existing.intersection(&set).cloned().collect(),
                None => set,
            });
        }
    }
    match acc {
        Some(set) => set.into_iter().collect(),
        None => all_ids.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(data: Value) -> Document {
        Document::new("1".into(), data).unwrap()
    }

    #[test]
    fn bare_value_is_equality() {
        let q = parse_query(&json!({"status": "open"})).unwrap();
        assert!(matches_doc(&q, &doc(json!({"status": "open"}))));
        assert!(!matches_doc(&q, &doc(json!({"status": "closed"}))));
    }

    #[test]
    fn missing_field_never_equals_null_criterion() {
        let q = parse_query(&json!({"deletedAt": null})).unwrap();
        assert!(!matches_doc(&q, &doc(json!({}))));
        assert!(matches_doc(&q, &doc(json!({"deletedAt": null}))));
    }

    #[test]
    fn comparison_operators() {
        let q = parse_query(&json!({"total": {"$gte": 100, "$lt": 200}})).unwrap();
        assert!(matches_doc(&q, &doc(json!({"total": 150}))));
        assert!(!matches_doc(&q, &doc(json!({"total": 99}))));
        assert!(!matches_doc(&q, &doc(json!({"total": 200}))));
    }

    #[test]
    fn eq_ne_in_nin_cross_normalize_integer_and_float() {
        let eq = parse_query(&json!({"total": 130.0})).unwrap();
        assert!(matches_doc(&eq, &doc(json!({"total": 130}))));

        let ne = parse_query(&json!({"total": {"$ne": 130}})).unwrap();
        assert!(!matches_doc(&ne, &doc(json!({"total": 130.0}))));

        let in_q = parse_query(&json!({"total": {"$in": [130.0]}})).unwrap();
        assert!(matches_doc(&in_q, &doc(json!({"total": 130}))));

        let nin_q = parse_query(&json!({"total": {"$nin": [130.0]}})).unwrap();
        assert!(!matches_doc(&nin_q, &doc(json!({"total": 130}))));
    }

    #[test]
    fn comparison_on_mismatched_types_is_false() {
        let q = parse_query(&json!({"total": {"$gt": "100"}})).unwrap();
        assert!(!matches_doc(&q, &doc(json!({"total": 150}))));
    }

    #[test]
    fn in_and_nin() {
        let q = parse_query(&json!({"status": {"$in": ["open", "pending"]}})).unwrap();
        assert!(matches_doc(&q, &doc(json!({"status": "pending"}))));
        assert!(!matches_doc(&q, &doc(json!({"status": "closed"}))));
    }

    #[test]
    fn exists() {
        let q = parse_query(&json!({"note": {"$exists": true}})).unwrap();
        assert!(!matches_doc(&q, &doc(json!({}))));
        assert!(matches_doc(&q, &doc(json!({"note": "hi"}))));
    }

    #[test]
    fn regex_only_matches_strings() {
        let q = parse_query(&json!({"name": {"$regex": "^A"}})).unwrap();
        assert!(matches_doc(&q, &doc(json!({"name": "Alice"}))));
        assert!(!matches_doc(&q, &doc(json!({"name": "Bob"}))));
        assert!(!matches_doc(&q, &doc(json!({"name": 42}))));
    }

    #[test]
    fn regex_case_insensitive_option() {
        let q = parse_query(&json!({"name": {"$regex": "^a", "$options": "i"}})).unwrap();
        assert!(matches_doc(&q, &doc(json!({"name": "Alice"}))));
    }

    #[test]
    fn unknown_operator_is_no_match_not_error() {
        let q = parse_query(&json!({"status": {"$weird": 1}})).unwrap();
        assert!(!matches_doc(&q, &doc(json!({"status": "open"}))));
    }

    #[test]
    fn dot_path_field() {
        let q = parse_query(&json!({"user.city": "NYC"})).unwrap();
        assert!(matches_doc(&q, &doc(json!({"user": {"city": "NYC"}}))));
    }

    #[test]
    fn planner_picks_first_indexed_field() {
        let mut indexes = HashMap::new();
        let mut idx = FieldIndex::new("customerId", "now");
        idx.insert("1".into(), &json!("cust001"));
        idx.insert("2".into(), &json!("cust002"));
        indexes.insert("customerId".to_string(), idx);

        let q = parse_query(&json!({"total": 50, "customerId": "cust001"})).unwrap();
        let all_ids = vec!["1".to_string(), "2".to_string()];
        let candidates = plan_candidate_ids(&q, &indexes, &all_ids);
        assert_eq!(candidates, vec!["1".to_string()]);
    }

    #[test]
    fn planner_falls_back_to_all_ids_without_index() {
        let indexes = HashMap::new();
        let q = parse_query(&json!({"total": 50})).unwrap();
        let all_ids = vec!["1".to_string(), "2".to_string()];
        let mut candidates = plan_candidate_ids(&q, &indexes, &all_ids);
        candidates.sort();
        assert_eq!(candidates, all_ids);
    }

    #[test]
    fn planner_empty_query_returns_all_ids() {
        let indexes = HashMap::new();
        let q = parse_query(&json!({})).unwrap();
        let all_ids = vec!["1".to_string(), "2".to_string()];
        assert_eq!(plan_candidate_ids(&q, &indexes, &all_ids), all_ids);
    }
}
