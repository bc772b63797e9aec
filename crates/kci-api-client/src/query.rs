//! Node query filters, matching the central API's `field__op=value` query
//! string convention (e.g. `timeout__lt=<iso8601>`, `data.platform=foo`).

use std::collections::BTreeMap;

use serde_json::Value;

/// A single field filter: a (dotted) field path, an optional operator
/// suffix, and the value to compare against.
#[derive(Debug, Clone)]
pub struct NodeFilter {
    fields: BTreeMap<String, Value>,
}

impl NodeFilter {
    pub fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }

    /// Exact match on `field`.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn lt(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(format!("{}__lt", field.into()), value.into());
        self
    }

    pub fn lte(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(format!("{}__lte", field.into()), value.into());
        self
    }

    pub fn gt(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(format!("{}__gt", field.into()), value.into());
        self
    }

    pub fn gte(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(format!("{}__gte", field.into()), value.into());
        self
    }

    pub fn ne(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(format!("{}__ne", field.into()), value.into());
        self
    }

    pub fn re(mut self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.fields
            .insert(format!("{}__re", field.into()), Value::String(pattern.into()));
        self
    }

    /// Encode as the query-string pairs sent to the central API, one per
    /// field. Values are stringified the way the Python client does
    /// (`isoformat()` for datetimes is the caller's responsibility before
    /// this point — values here are already primitives).
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), value_to_query_string(v)))
            .collect()
    }
}

impl Default for NodeFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn value_to_query_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operators_suffix_the_field_name() {
        let filter = NodeFilter::new()
            .lt("timeout", "2024-01-01T00:00:00")
            .eq("state", "available");
        let pairs = filter.to_query_pairs();
        assert!(pairs.contains(&("timeout__lt".to_string(), "2024-01-01T00:00:00".to_string())));
        assert!(pairs.contains(&("state".to_string(), "available".to_string())));
    }

    #[test]
    fn dotted_nested_keys_are_preserved() {
        let filter = NodeFilter::new().eq("data.platform", "qemu-arm64");
        let pairs = filter.to_query_pairs();
        assert!(pairs.contains(&("data.platform".to_string(), "qemu-arm64".to_string())));
    }
}
