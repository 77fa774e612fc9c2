use std::cmp::Ordering;

use serde_json::Value as JsonValue;

/// Scalar with a total order across types, used for filter comparisons.
/// The order is null < bool < number < datetime < string. Strings that
/// parse as dates are normalized to millisecond timestamps, so a range
/// filter treats an RFC 3339 string and an epoch integer consistently.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    DateTime(i64), // millis since epoch
    String(String),
}

impl FieldValue {
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => FieldValue::Null,
            JsonValue::Bool(b) => FieldValue::Boolean(*b),
            JsonValue::Number(n) => n
                .as_i64()
                .map(FieldValue::Integer)
                .or_else(|| n.as_f64().map(FieldValue::Float))
                .unwrap_or(FieldValue::Null),
            JsonValue::String(s) => match parse_date_millis(s) {
                Some(ms) => FieldValue::DateTime(ms),
                None => FieldValue::String(s.clone()),
            },
            // Arrays and objects compare by their JSON text.
            composite => FieldValue::String(composite.to_string()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            FieldValue::Null => 0,
            FieldValue::Boolean(_) => 1,
            FieldValue::Integer(_) | FieldValue::Float(_) => 2,
            FieldValue::DateTime(_) => 3,
            FieldValue::String(_) => 4,
        }
    }

    fn as_number(&self) -> f64 {
        match self {
            FieldValue::Integer(i) => *i as f64,
            FieldValue::Float(f) => *f,
            _ => f64::NAN,
        }
    }
}

impl Ord for FieldValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.rank().cmp(&other.rank()) {
            Ordering::Equal => match (self, other) {
                (FieldValue::Null, FieldValue::Null) => Ordering::Equal,
                (FieldValue::Boolean(a), FieldValue::Boolean(b)) => a.cmp(b),
                (FieldValue::Integer(a), FieldValue::Integer(b)) => a.cmp(b),
                (FieldValue::DateTime(a), FieldValue::DateTime(b)) => a.cmp(b),
                (FieldValue::String(a), FieldValue::String(b)) => a.cmp(b),
                // Mixed integer/float within the number rank.
                (a, b) => a.as_number().total_cmp(&b.as_number()),
            },
            unequal => unequal,
        }
    }
}

impl PartialOrd for FieldValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FieldValue {}

/// Millisecond timestamp for a date-looking string, `None` otherwise.
/// Accepted shapes: RFC 3339, `YYYY-MM-DDTHH:MM:SS`, and bare
/// `YYYY-MM-DD` (midnight UTC).
fn parse_date_millis(s: &str) -> Option<i64> {
    // Cheap gate before invoking the chrono parsers: a date starts with
    // four digits and a dash.
    let gate = s.len() >= 10
        && s.bytes().take(4).all(|b| b.is_ascii_digit())
        && s.as_bytes()[4] == b'-';
    if !gate {
        return None;
    }

    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.and_utc().timestamp_millis());
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}
