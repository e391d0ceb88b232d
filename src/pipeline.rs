use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::query::{self, Query};
use crate::value::{resolve_path, set_path, IndexKey};

// ---------------------------------------------------------------------------
// Expression evaluator (`4.6`)
// ---------------------------------------------------------------------------

/// An aggregation expression, built once from its JSON form and evaluated
/// per document rather than re-interpreting the JSON on every call.
#[derive(Debug, Clone)]
pub enum Expression {
    Literal(Value),
    FieldRef(String),
    Add(Vec<Expression>),
    Subtract(Box<Expression>, Box<Expression>),
    Multiply(Vec<Expression>),
    Divide(Box<Expression>, Box<Expression>),
    Concat(Vec<Expression>),
    ToLower(Box<Expression>),
    ToUpper(Box<Expression>),
    Round(Box<Expression>, Box<Expression>),
    First(Box<Expression>),
    /// A JSON object that is not itself an operator application: each field
    /// is evaluated and the results assembled back into an object.
    Document(Vec<(String, Expression)>),
}

pub fn parse_expression(value: &Value) -> Result<Expression> {
    match value {
        Value::String(s) if s.starts_with('$') => Ok(Expression::FieldRef(s[1..].to_string())),
        Value::Object(map) if map.len() == 1 && map.keys().next().is_some_and(|k| k.starts_with('$')) => {
            let (op, operand) = map.iter().next().expect("len == 1");
            parse_operator(op, operand)
        }
        Value::Object(map) => {
            let mut fields = Vec::with_capacity(map.len());
            for (k, v) in map {
                fields.push((k.clone(), parse_expression(v)?));
            }
            Ok(Expression::Document(fields))
        }
        other => Ok(Expression::Literal(other.clone())),
    }
}

fn parse_operator(op: &str, operand: &Value) -> Result<Expression> {
    Ok(match op {
        "$add" => Expression::Add(parse_expr_array(operand)?),
        "$subtract" => {
            let (a, b) = parse_pair(operand, "$subtract")?;
            Expression::Subtract(Box::new(a), Box::new(b))
        }
        "$multiply" => Expression::Multiply(parse_expr_array(operand)?),
        "$divide" => {
            let (a, b) = parse_pair(operand, "$divide")?;
            Expression::Divide(Box::new(a), Box::new(b))
        }
        "$concat" => Expression::Concat(parse_expr_array(operand)?),
        "$toLower" => Expression::ToLower(Box::new(parse_expression(operand)?)),
        "$toUpper" => Expression::ToUpper(Box::new(parse_expression(operand)?)),
        "$literal" => Expression::Literal(operand.clone()),
        "$round" => {
            let (a, b) = parse_pair(operand, "$round")?;
            Expression::Round(Box::new(a), Box::new(b))
        }
        "$first" => Expression::First(Box::new(parse_expression(operand)?)),
        _ => return Err(Error::UnsupportedOperator(format!("unknown expression operator: {op}"))),
    })
}

fn parse_expr_array(operand: &Value) -> Result<Vec<Expression>> {
    operand
        .as_array()
        .ok_or_else(|| Error::BadRequest("expected an array of expressions".into()))?
        .iter()
        .map(parse_expression)
        .collect()
}

fn parse_pair(operand: &Value, op: &str) -> Result<(Expression, Expression)> {
    let arr = operand
        .as_array()
        .ok_or_else(|| Error::BadRequest(format!("{op} requires an array of exactly two expressions")))?;
    if arr.len() != 2 {
        return Err(Error::BadRequest(format!(
            "{op} requires exactly two arguments, got {}",
            arr.len()
        )));
    }
    Ok((parse_expression(&arr[0])?, parse_expression(&arr[1])?))
}

impl Expression {
    pub fn eval(&self, doc: &Value) -> Result<Value> {
        Ok(match self {
            Expression::Literal(v) => v.clone(),
            Expression::FieldRef(path) => resolve_path(doc, path).cloned().unwrap_or(Value::Null),
            Expression::Add(exprs) => {
                let mut sum = 0.0;
                let mut any_defined = false;
                for e in exprs {
                    let v = e.eval(doc)?;
                    if let Some(n) = v.as_f64() {
                        sum += n;
                        any_defined = true;
                    }
                }
                if any_defined { number_to_value(sum) } else { Value::Null }
            }
            Expression::Subtract(a, b) => {
                match (to_f64(&a.eval(doc)?), to_f64(&b.eval(doc)?)) {
                    (Some(x), Some(y)) => number_to_value(x - y),
                    _ => Value::Null,
                }
            }
            Expression::Multiply(exprs) => {
                let mut product = 1.0;
                let mut any_defined = false;
                for e in exprs {
                    let v = e.eval(doc)?;
                    if let Some(n) = v.as_f64() {
                        product *= n;
                        any_defined = true;
                    }
                }
                if any_defined { number_to_value(product) } else { Value::Null }
            }
            Expression::Divide(a, b) => match (to_f64(&a.eval(doc)?), to_f64(&b.eval(doc)?)) {
                (Some(_), Some(y)) if y == 0.0 => return Err(Error::DivisionByZero),
                (Some(x), Some(y)) => number_to_value(x / y),
                _ => Value::Null,
            },
            Expression::Concat(exprs) => {
                let mut out = String::new();
                for e in exprs {
                    out.push_str(&concat_piece(&e.eval(doc)?));
                }
                Value::String(out)
            }
            Expression::ToLower(e) => match e.eval(doc)? {
                Value::String(s) => Value::String(s.to_lowercase()),
                _ => Value::Null,
            },
            Expression::ToUpper(e) => match e.eval(doc)? {
                Value::String(s) => Value::String(s.to_uppercase()),
                _ => Value::Null,
            },
            Expression::Round(value_expr, places_expr) => {
                match to_f64(&value_expr.eval(doc)?) {
                    Some(n) => {
                        let places = places_expr.eval(doc)?.as_i64().unwrap_or(0).max(0) as u32;
                        let factor = 10f64.powi(places as i32);
                        number_to_value((n * factor).round() / factor)
                    }
                    None => Value::Null,
                }
            }
            Expression::First(e) => match e.eval(doc)? {
                Value::Array(arr) => arr.into_iter().next().unwrap_or(Value::Null),
                _ => Value::Null,
            },
            Expression::Document(fields) => {
                let mut map = Map::with_capacity(fields.len());
                for (k, expr) in fields {
                    map.insert(k.clone(), expr.eval(doc)?);
                }
                Value::Object(map)
            }
        })
    }
}

fn to_f64(v: &Value) -> Option<f64> {
    v.as_f64()
}

fn concat_piece(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn number_to_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::Number((n as i64).into())
    } else {
        serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// $group accumulators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Accumulator {
    Sum(Expression),
    Avg(Expression),
    Min(Expression),
    Max(Expression),
    First(Expression),
    Last(Expression),
    Push(Expression),
    AddToSet(Expression),
}

fn parse_accumulator(value: &Value) -> Result<Accumulator> {
    let map = value
        .as_object()
        .filter(|m| m.len() == 1)
        .ok_or_else(|| Error::BadRequest("accumulator must be an object of the form { $op: expr }".into()))?;
    let (op, operand) = map.iter().next().expect("len == 1");
    let expr = parse_expression(operand)?;
    Ok(match op.as_str() {
        "$sum" => Accumulator::Sum(expr),
        "$avg" => Accumulator::Avg(expr),
        "$min" => Accumulator::Min(expr),
        "$max" => Accumulator::Max(expr),
        "$first" => Accumulator::First(expr),
        "$last" => Accumulator::Last(expr),
        "$push" => Accumulator::Push(expr),
        "$addToSet" => Accumulator::AddToSet(expr),
        other => return Err(Error::UnsupportedOperator(format!("unknown accumulator: {other}"))),
    })
}

enum AccState {
    Sum(f64),
    Avg { sum: f64, count: u64 },
    Min(Option<Value>),
    Max(Option<Value>),
    First(Option<Value>),
    Last(Option<Value>),
    Push(Vec<Value>),
    AddToSet(Vec<Value>),
}

impl AccState {
    fn new(acc: &Accumulator) -> Self {
        match acc {
            Accumulator::Sum(_) => AccState::Sum(0.0),
            Accumulator::Avg(_) => AccState::Avg { sum: 0.0, count: 0 },
            Accumulator::Min(_) => AccState::Min(None),
            Accumulator::Max(_) => AccState::Max(None),
            Accumulator::First(_) => AccState::First(None),
            Accumulator::Last(_) => AccState::Last(None),
            Accumulator::Push(_) => AccState::Push(Vec::new()),
            Accumulator::AddToSet(_) => AccState::AddToSet(Vec::new()),
        }
    }

    fn update(&mut self, value: Value) {
        match self {
            AccState::Sum(sum) => *sum += value.as_f64().unwrap_or(0.0),
            AccState::Avg { sum, count } => {
                *sum += value.as_f64().unwrap_or(0.0);
                *count += 1;
            }
            AccState::Min(current) => {
                if value.is_null() {
                    return;
                }
                let candidate_key = IndexKey::from_json(&value);
                *current = Some(match current.take() {
                    Some(existing) if IndexKey::from_json(&existing) <= candidate_key => existing,
                    _ => value,
                });
            }
            AccState::Max(current) => {
                if value.is_null() {
                    return;
                }
                let candidate_key = IndexKey::from_json(&value);
                *current = Some(match current.take() {
                    Some(existing) if IndexKey::from_json(&existing) >= candidate_key => existing,
                    _ => value,
                });
            }
            AccState::First(current) => {
                if current.is_none() {
                    *current = Some(value);
                }
            }
            AccState::Last(current) => *current = Some(value),
            AccState::Push(items) => {
                if !value.is_null() {
                    items.push(value);
                }
            }
            AccState::AddToSet(items) => {
                if !value.is_null() {
                    let key = IndexKey::from_json(&value);
                    if !items.iter().any(|existing| IndexKey::from_json(existing) == key) {
                        items.push(value);
                    }
                }
            }
        }
    }

    fn finalize(self) -> Value {
        match self {
            AccState::Sum(sum) => number_to_value(sum),
            AccState::Avg { sum, count } => {
                if count == 0 {
                    Value::Null
                } else {
                    number_to_value(sum / count as f64)
                }
            }
            AccState::Min(v) | AccState::Max(v) | AccState::First(v) | AccState::Last(v) => {
                v.unwrap_or(Value::Null)
            }
            AccState::Push(items) | AccState::AddToSet(items) => Value::Array(items),
        }
    }
}

fn exec_group(docs: &[Value], key_expr: &Expression, accumulators: &[(String, Accumulator)]) -> Result<Vec<Value>> {
    let mut order: Vec<String> = Vec::new();
    let mut keys: HashMap<String, Value> = HashMap::new();
    let mut states: HashMap<String, Vec<AccState>> = HashMap::new();

    for doc in docs {
        let key_val = key_expr.eval(doc)?;
        let key_str = serde_json::to_string(&key_val)?;
        if !keys.contains_key(&key_str) {
            order.push(key_str.clone());
            keys.insert(key_str.clone(), key_val.clone());
            states.insert(
                key_str.clone(),
                accumulators.iter().map(|(_, acc)| AccState::new(acc)).collect(),
            );
        }
        let group_states = states.get_mut(&key_str).expect("just inserted");
        for (state, (_, acc)) in group_states.iter_mut().zip(accumulators.iter()) {
            let expr = match acc {
                Accumulator::Sum(e)
                | Accumulator::Avg(e)
                | Accumulator::Min(e)
                | Accumulator::Max(e)
                | Accumulator::First(e)
                | Accumulator::Last(e)
                | Accumulator::Push(e)
                | Accumulator::AddToSet(e) => e,
            };
            let value = expr.eval(doc)?;
            state.update(value);
        }
    }

    let mut out = Vec::with_capacity(order.len());
    for key_str in order {
        let key_val = keys.remove(&key_str).expect("present");
        let group_states = states.remove(&key_str).expect("present");
        let mut obj = Map::with_capacity(accumulators.len() + 1);
        obj.insert("_id".to_string(), key_val);
        for (state, (name, _)) in group_states.into_iter().zip(accumulators.iter()) {
            obj.insert(name.clone(), state.finalize());
        }
        out.push(Value::Object(obj));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// $project
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum ProjectionField {
    Include,
    Exclude,
    Compute(Expression),
}

fn parse_project(spec: &Value) -> Result<(bool, Vec<(String, ProjectionField)>)> {
    let obj = spec
        .as_object()
        .ok_or_else(|| Error::BadRequest("$project requires an object".into()))?;

    let mut has_include = false;
    let mut has_exclude = false;
    let mut fields = Vec::with_capacity(obj.len());

    for (path, value) in obj {
        let field = if is_one(value) {
            has_include = true;
            ProjectionField::Include
        } else if is_zero(value) {
            has_exclude = true;
            ProjectionField::Exclude
        } else {
            has_include = true;
            ProjectionField::Compute(parse_expression(value)?)
        };
        fields.push((path.clone(), field));
    }

    if has_include && has_exclude {
        return Err(Error::BadRequest(
            "$project cannot mix inclusion (1 or an expression) with exclusion (0)".into(),
        ));
    }

    Ok((!has_include && has_exclude, fields))
}

fn is_one(v: &Value) -> bool {
    matches!(v, Value::Bool(true)) || v.as_i64() == Some(1)
}

fn is_zero(v: &Value) -> bool {
    matches!(v, Value::Bool(false)) || v.as_i64() == Some(0)
}

fn exec_project(docs: Vec<Value>, exclusion: bool, fields: &[(String, ProjectionField)]) -> Result<Vec<Value>> {
    docs.into_iter()
        .map(|doc| {
            if exclusion {
                let mut out = doc.clone();
                for (path, field) in fields {
                    if matches!(field, ProjectionField::Exclude) {
                        crate::value::remove_path(&mut out, path);
                    }
                }
                Ok(out)
            } else {
                let mut out = Value::Object(Map::new());
                let id_excluded = fields
                    .iter()
                    .any(|(p, f)| p == "_id" && matches!(f, ProjectionField::Exclude));
                if !id_excluded {
                    if let Some(id) = resolve_path(&doc, "_id") {
                        set_path(&mut out, "_id", id.clone());
                    }
                }
                for (path, field) in fields {
                    match field {
                        ProjectionField::Include => {
                            if let Some(v) = resolve_path(&doc, path) {
                                set_path(&mut out, path, v.clone());
                            }
                        }
                        ProjectionField::Compute(expr) => {
                            let v = expr.eval(&doc)?;
                            set_path(&mut out, path, v);
                        }
                        ProjectionField::Exclude => {}
                    }
                }
                Ok(out)
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// $sort
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

fn parse_sort(spec: &Value) -> Result<Vec<(String, SortOrder)>> {
    let obj = spec
        .as_object()
        .ok_or_else(|| Error::BadRequest("$sort requires an object".into()))?;
    let mut keys = Vec::with_capacity(obj.len());
    for (path, dir) in obj {
        let order = match dir.as_i64() {
            Some(1) => SortOrder::Asc,
            Some(-1) => SortOrder::Desc,
            _ => return Err(Error::BadRequest(format!("$sort direction for '{path}' must be 1 or -1"))),
        };
        keys.push((path.clone(), order));
    }
    Ok(keys)
}

fn exec_sort(mut docs: Vec<Value>, keys: &[(String, SortOrder)]) -> Vec<Value> {
    docs.sort_by(|a, b| {
        for (path, order) in keys {
            let ka = resolve_path(a, path).map(IndexKey::from_json).unwrap_or(IndexKey::Null);
            let kb = resolve_path(b, path).map(IndexKey::from_json).unwrap_or(IndexKey::Null);
            let cmp = ka.cmp(&kb);
            let cmp = if *order == SortOrder::Desc { cmp.reverse() } else { cmp };
            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        Ordering::Equal
    });
    docs
}

// ---------------------------------------------------------------------------
// $unwind
// ---------------------------------------------------------------------------

fn parse_unwind(spec: &Value) -> Result<(String, bool, Option<String>)> {
    match spec {
        Value::String(s) => Ok((strip_dollar(s), false, None)),
        Value::Object(map) => {
            let path = map
                .get("path")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::BadRequest("$unwind requires a 'path'".into()))?;
            let preserve = map
                .get("preserveNullAndEmptyArrays")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let include_index = map
                .get("includeArrayIndex")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            Ok((strip_dollar(path), preserve, include_index))
        }
        _ => Err(Error::BadRequest("$unwind requires a string path or an object".into())),
    }
}

fn strip_dollar(s: &str) -> String {
    s.strip_prefix('$').unwrap_or(s).to_string()
}

fn exec_unwind(docs: Vec<Value>, path: &str, preserve_null_and_empty: bool, include_array_index: Option<&str>) -> Vec<Value> {
    let mut out = Vec::new();
    for doc in docs {
        let resolved = resolve_path(&doc, path).cloned();
        match resolved {
            None | Some(Value::Null) => {
                if preserve_null_and_empty {
                    let mut d = doc.clone();
                    set_path(&mut d, path, Value::Null);
                    if let Some(idx_path) = include_array_index {
                        set_path(&mut d, idx_path, Value::Null);
                    }
                    out.push(d);
                }
            }
            Some(Value::Array(arr)) if arr.is_empty() => {
                if preserve_null_and_empty {
                    let mut d = doc.clone();
                    set_path(&mut d, path, Value::Null);
                    if let Some(idx_path) = include_array_index {
                        set_path(&mut d, idx_path, Value::Null);
                    }
                    out.push(d);
                }
            }
            Some(Value::Array(arr)) => {
                for (i, el) in arr.into_iter().enumerate() {
                    let mut d = doc.clone();
                    set_path(&mut d, path, el);
                    if let Some(idx_path) = include_array_index {
                        set_path(&mut d, idx_path, Value::Number((i as u64).into()));
                    }
                    out.push(d);
                }
            }
            Some(_scalar) => {
                // Non-array scalar: drop the document entirely.
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// $lookup — deliberate stub
// ---------------------------------------------------------------------------

/// Hook for a real `$lookup` implementation. The default used by
/// `Pipeline::execute` always returns no matches, matching the contract in
/// `4.5`: `$lookup` attaches an empty array and nothing more.
pub trait LookupResolver {
    fn resolve(&self, from: &str, local_value: &Value, foreign_field: &str) -> Vec<Value>;
}

pub struct StubLookup;

impl LookupResolver for StubLookup {
    fn resolve(&self, _from: &str, _local_value: &Value, _foreign_field: &str) -> Vec<Value> {
        Vec::new()
    }
}

fn exec_lookup(
    docs: Vec<Value>,
    from: &str,
    local_field: &str,
    foreign_field: &str,
    as_field: &str,
    resolver: &dyn LookupResolver,
) -> Vec<Value> {
    docs.into_iter()
        .map(|mut doc| {
            let local_value = resolve_path(&doc, local_field).cloned().unwrap_or(Value::Null);
            let matches = resolver.resolve(from, &local_value, foreign_field);
            set_path(&mut doc, as_field, Value::Array(matches));
            doc
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Pipeline / stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Stage {
    Match(Query),
    Project { exclusion: bool, fields: Vec<(String, ProjectionField)> },
    Group { key: Expression, accumulators: Vec<(String, Accumulator)> },
    Sort(Vec<(String, SortOrder)>),
    Limit(u64),
    Skip(u64),
    Unwind {
        path: String,
        preserve_null_and_empty: bool,
        include_array_index: Option<String>,
    },
    Lookup {
        from: String,
        local_field: String,
        foreign_field: String,
        as_field: String,
    },
    Count(String),
}

fn parse_stage(name: &str, spec: &Value) -> Result<Stage> {
    Ok(match name {
        "$match" => Stage::Match(query::parse_query(spec)?),
        "$project" => {
            let (exclusion, fields) = parse_project(spec)?;
            Stage::Project { exclusion, fields }
        }
        "$group" => {
            let obj = spec
                .as_object()
                .ok_or_else(|| Error::BadRequest("$group requires an object".into()))?;
            let id_spec = obj
                .get("_id")
                .ok_or_else(|| Error::BadRequest("$group requires an '_id' key".into()))?;
            let key = parse_expression(id_spec)?;
            let mut accumulators = Vec::with_capacity(obj.len().saturating_sub(1));
            for (name, spec) in obj {
                if name == "_id" {
                    continue;
                }
                accumulators.push((name.clone(), parse_accumulator(spec)?));
            }
            Stage::Group { key, accumulators }
        }
        "$sort" => Stage::Sort(parse_sort(spec)?),
        "$limit" => Stage::Limit(non_negative_u64(spec, "$limit")?),
        "$skip" => Stage::Skip(non_negative_u64(spec, "$skip")?),
        "$unwind" => {
            let (path, preserve_null_and_empty, include_array_index) = parse_unwind(spec)?;
            Stage::Unwind { path, preserve_null_and_empty, include_array_index }
        }
        "$lookup" => {
            let obj = spec
                .as_object()
                .ok_or_else(|| Error::BadRequest("$lookup requires an object".into()))?;
            let field = |key: &str| -> Result<String> {
                obj.get(key)
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .ok_or_else(|| Error::BadRequest(format!("$lookup requires '{key}'")))
            };
            Stage::Lookup {
                from: field("from")?,
                local_field: field("localField")?,
                foreign_field: field("foreignField")?,
                as_field: field("as")?,
            }
        }
        "$count" => {
            let name = spec
                .as_str()
                .ok_or_else(|| Error::BadRequest("$count requires a string field name".into()))?;
            Stage::Count(name.to_string())
        }
        other => return Err(Error::UnsupportedStage(other.to_string())),
    })
}

fn non_negative_u64(spec: &Value, op: &str) -> Result<u64> {
    match spec.as_i64() {
        Some(n) if n >= 0 => Ok(n as u64),
        _ => Err(Error::BadRequest(format!("{op} requires a non-negative integer"))),
    }
}

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn parse(value: &Value) -> Result<Self> {
        let arr = value
            .as_array()
            .ok_or_else(|| Error::BadRequest("pipeline must be an array of stages".into()))?;
        let mut stages = Vec::with_capacity(arr.len());
        for stage_val in arr {
            let obj = stage_val
                .as_object()
                .ok_or_else(|| Error::BadRequest("each pipeline stage must be an object".into()))?;
            if obj.len() != 1 {
                return Err(Error::BadRequest(
                    "each pipeline stage must have exactly one operator key".into(),
                ));
            }
            let (name, spec) = obj.iter().next().expect("len == 1");
            stages.push(parse_stage(name, spec)?);
        }
        Ok(Self { stages })
    }

    /// If the first stage is `$match`, hand back its parsed query so a
    /// caller can pre-filter with the planner before running the rest of
    /// the pipeline over a smaller candidate set.
    pub fn leading_match(&self) -> Option<&Query> {
        match self.stages.first() {
            Some(Stage::Match(q)) => Some(q),
            _ => None,
        }
    }

    pub fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        self.execute_from(0, docs, &StubLookup)
    }

    pub fn execute_with_lookup(&self, docs: Vec<Value>, resolver: &dyn LookupResolver) -> Result<Vec<Value>> {
        self.execute_from(0, docs, resolver)
    }

    pub fn execute_from(&self, start: usize, docs: Vec<Value>, resolver: &dyn LookupResolver) -> Result<Vec<Value>> {
        let mut docs = docs;
        for stage in &self.stages[start.min(self.stages.len())..] {
            docs = match stage {
                Stage::Match(q) => docs.into_iter().filter(|d| query::matches_value(q, d)).collect(),
                Stage::Project { exclusion, fields } => exec_project(docs, *exclusion, fields)?,
                Stage::Group { key, accumulators } => exec_group(&docs, key, accumulators)?,
                Stage::Sort(keys) => exec_sort(docs, keys),
                Stage::Limit(n) => docs.into_iter().take(*n as usize).collect(),
                Stage::Skip(n) => docs.into_iter().skip(*n as usize).collect(),
                Stage::Unwind { path, preserve_null_and_empty, include_array_index } => {
                    exec_unwind(docs, path, *preserve_null_and_empty, include_array_index.as_deref())
                }
                Stage::Lookup { from, local_field, foreign_field, as_field } => {
                    exec_lookup(docs, from, local_field, foreign_field, as_field, resolver)
                }
                Stage::Count(name) => vec![Value::Object(
                    [(name.clone(), Value::Number(docs.len().into()))].into_iter().collect(),
                )],
            };
        }
        Ok(docs)
    }
}
