//! Lookup filters

use crate::record::{JsonObject, Record, Status};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Predicate over records
pub type RecordPredicate = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Selects records in lookups.
///
/// Unless out-of-service records are requested, or a JSON filter names
/// `status` itself, only `UP` records are considered.
#[derive(Clone)]
pub enum RecordFilter {
    /// Field/metadata filter, see [`Record::matches`]
    Json(JsonObject),
    /// Arbitrary predicate
    Predicate(RecordPredicate),
}

impl RecordFilter {
    /// Filter accepting every record
    pub fn all() -> Self {
        RecordFilter::Json(JsonObject::new())
    }

    /// Filter from a predicate
    pub fn predicate(predicate: impl Fn(&Record) -> bool + Send + Sync + 'static) -> Self {
        RecordFilter::Predicate(Arc::new(predicate))
    }

    /// Whether a JSON filter constrains `status` itself
    pub fn names_status(&self) -> bool {
        matches!(self, RecordFilter::Json(filter) if filter.contains_key("status"))
    }

    /// Apply the filter, including status widening rules
    pub fn accepts(&self, record: &Record, include_out_of_service: bool) -> bool {
        if !include_out_of_service && !self.names_status() && record.status != Status::Up {
            return false;
        }
        match self {
            RecordFilter::Json(filter) => record.matches(filter),
            RecordFilter::Predicate(predicate) => predicate(record),
        }
    }
}

impl Default for RecordFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Debug for RecordFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordFilter::Json(filter) => write!(f, "{}", Value::Object(filter.clone())),
            RecordFilter::Predicate(_) => f.write_str("<predicate>"),
        }
    }
}

impl From<JsonObject> for RecordFilter {
    fn from(filter: JsonObject) -> Self {
        RecordFilter::Json(filter)
    }
}

/// `null` selects everything; scalars and arrays select nothing.
impl From<Value> for RecordFilter {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(filter) => RecordFilter::Json(filter),
            Value::Null => RecordFilter::all(),
            _ => RecordFilter::predicate(|_| false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_only_up_by_default() {
        let up = Record::new("a", "t").with_status(Status::Up);
        let down = Record::new("a", "t").with_status(Status::Down);
        let filter = RecordFilter::from(json!({"name": "a"}));

        assert!(filter.accepts(&up, false));
        assert!(!filter.accepts(&down, false));
        assert!(filter.accepts(&down, true));
    }

    #[test]
    fn test_status_in_filter_widens() {
        let down = Record::new("a", "t").with_status(Status::Down);
        assert!(RecordFilter::from(json!({"status": "DOWN"})).accepts(&down, false));
        assert!(!RecordFilter::from(json!({"status": "UP"})).accepts(&down, false));
    }

    #[test]
    fn test_predicate_filter() {
        let record = Record::new("a", "t").with_status(Status::Up);
        assert!(RecordFilter::predicate(|r| r.name == "a").accepts(&record, false));
        assert!(!RecordFilter::predicate(|r| r.name == "b").accepts(&record, false));
        assert!(!RecordFilter::from(json!(42)).accepts(&record, true));
    }
}
