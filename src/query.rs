use serde_json::Value as JsonValue;

use crate::document::resolve_field_ref;
use crate::error::{Error, Result};
use crate::value::FieldValue;

/// Comparison applied to one field.
#[derive(Debug, Clone)]
pub enum QueryOp {
    Eq(FieldValue),
    Ne(FieldValue),
    Gt(FieldValue),
    Gte(FieldValue),
    Lt(FieldValue),
    Lte(FieldValue),
    In(Vec<FieldValue>),
    Nin(Vec<FieldValue>),
    Exists(bool),
}

impl QueryOp {
    /// Evaluate against the resolved field. `None` means the field path
    /// is absent, which only the negated operators accept; `$exists`
    /// tests presence itself, so an explicit null still counts.
    fn accepts(&self, found: Option<&JsonValue>) -> bool {
        if let QueryOp::Exists(expected) = self {
            return found.is_some() == *expected;
        }
        let Some(found) = found else {
            return matches!(self, QueryOp::Ne(_) | QueryOp::Nin(_));
        };
        let actual = FieldValue::from_json(found);
        match self {
            QueryOp::Eq(v) => actual == *v,
            QueryOp::Ne(v) => actual != *v,
            QueryOp::Gt(v) => actual > *v,
            QueryOp::Gte(v) => actual >= *v,
            QueryOp::Lt(v) => actual < *v,
            QueryOp::Lte(v) => actual <= *v,
            QueryOp::In(set) => set.contains(&actual),
            QueryOp::Nin(set) => !set.contains(&actual),
            QueryOp::Exists(_) => unreachable!(),
        }
    }
}

/// Parsed filter, evaluated per document.
#[derive(Debug, Clone)]
pub enum Query {
    /// Empty filter, matches every document.
    All,
    Field { field: String, op: QueryOp },
    And(Vec<Query>),
    Or(Vec<Query>),
}

impl Query {
    pub fn parse(filter: &JsonValue) -> Result<Self> {
        let entries = filter
            .as_object()
            .ok_or_else(|| Error::InvalidQuery("filter must be a JSON object".into()))?;

        let mut clauses = Vec::new();
        for (key, value) in entries {
            match key.as_str() {
                "$and" => clauses.push(Query::And(Self::parse_branch(key, value)?)),
                "$or" => clauses.push(Query::Or(Self::parse_branch(key, value)?)),
                field => Self::parse_field(field, value, &mut clauses)?,
            }
        }

        Ok(match clauses.len() {
            0 => Query::All,
            1 => clauses.remove(0),
            _ => Query::And(clauses),
        })
    }

    /// Sub-filters of an `$and`/`$or` combinator.
    fn parse_branch(key: &str, value: &JsonValue) -> Result<Vec<Query>> {
        value
            .as_array()
            .ok_or_else(|| Error::InvalidQuery(format!("{key} takes an array of filters")))?
            .iter()
            .map(Self::parse)
            .collect()
    }

    /// One `field: value` entry. An object whose keys start with `$` is a
    /// set of operators; anything else is shorthand for `$eq`.
    fn parse_field(field: &str, value: &JsonValue, clauses: &mut Vec<Query>) -> Result<()> {
        let operators = value
            .as_object()
            .filter(|obj| obj.keys().any(|k| k.starts_with('$')));

        match operators {
            Some(ops) => {
                for (name, operand) in ops {
                    clauses.push(Query::Field {
                        field: field.to_string(),
                        op: Self::parse_op(name, operand)?,
                    });
                }
            }
            None => clauses.push(Query::Field {
                field: field.to_string(),
                op: QueryOp::Eq(FieldValue::from_json(value)),
            }),
        }
        Ok(())
    }

    fn parse_op(name: &str, operand: &JsonValue) -> Result<QueryOp> {
        let scalar = || FieldValue::from_json(operand);
        let list = || -> Result<Vec<FieldValue>> {
            operand
                .as_array()
                .map(|arr| arr.iter().map(FieldValue::from_json).collect())
                .ok_or_else(|| Error::InvalidQuery(format!("{name} takes an array")))
        };

        Ok(match name {
            "$eq" => QueryOp::Eq(scalar()),
            "$ne" => QueryOp::Ne(scalar()),
            "$gt" => QueryOp::Gt(scalar()),
            "$gte" => QueryOp::Gte(scalar()),
            "$lt" => QueryOp::Lt(scalar()),
            "$lte" => QueryOp::Lte(scalar()),
            "$in" => QueryOp::In(list()?),
            "$nin" => QueryOp::Nin(list()?),
            "$exists" => QueryOp::Exists(operand.as_bool().ok_or_else(|| {
                Error::InvalidQuery("$exists takes a boolean".into())
            })?),
            unknown => return Err(Error::InvalidQuery(format!("unknown operator: {unknown}"))),
        })
    }

    pub fn matches(&self, doc: &JsonValue) -> bool {
        match self {
            Query::All => true,
            Query::Field { field, op } => op.accepts(resolve_field_ref(doc, field)),
            Query::And(subs) => subs.iter().all(|q| q.matches(doc)),
            Query::Or(subs) => subs.iter().any(|q| q.matches(doc)),
        }
    }
}

/// Parse and evaluate in one step, for callers holding a raw JSON filter.
pub fn matches_filter(filter: &JsonValue, doc: &JsonValue) -> Result<bool> {
    Ok(Query::parse(filter)?.matches(doc))
}
