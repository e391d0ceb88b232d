use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub type DocumentId = String;

#[derive(Debug, Clone)]
pub struct Document {
    pub id: DocumentId,
    pub data: Value,
}

impl Document {
    pub fn new(id: DocumentId, data: Value) -> Result<Self> {
        if !data.is_object() {
            return Err(Error::BadRequest("document must be a JSON object".into()));
        }
        Ok(Self { id, data })
    }

    /// Access a nested field using dot notation: "user.address.city".
    ///
    /// Any intermediate value that is missing, not an object, or `null`
    /// resolves the whole path to missing (`None`).
    pub fn get_field(&self, path: &str) -> Option<&Value> {
        crate::value::resolve_path(&self.data, path)
    }

    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        self.data.as_object()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_rejects_non_object() {
        let err = Document::new("1".into(), json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[test]
    fn get_field_dot_path() {
        let doc = Document::new("1".into(), json!({"user": {"address": {"city": "NYC"}}})).unwrap();
        assert_eq!(doc.get_field("user.address.city"), Some(&json!("NYC")));
        assert_eq!(doc.get_field("user.address.zip"), None);
        assert_eq!(doc.get_field("user.name.first"), None);
    }

    #[test]
    fn get_field_through_null_is_missing() {
        let doc = Document::new("1".into(), json!({"a": null})).unwrap();
        assert_eq!(doc.get_field("a.b"), None);
    }
}
