use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A record type a [`crate::Store`] can replicate.
///
/// Records travel as JSON: they are diffed and patched through their
/// `serde_json::Value` form, so any serde round-trippable type works.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The record's collection key.
    fn id(&self) -> String;

    /// The value a store shows for an id whose content has not been fetched
    /// yet (remote APPEND).
    fn placeholder(id: &str) -> Self;

    /// Returns the record re-keyed under `id`.
    fn with_id(self, id: &str) -> Self;
}

/// Untyped records keyed by their `"id"` member (string or number).
impl Record for Value {
    fn id(&self) -> String {
        match self.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => String::new(),
        }
    }

    fn placeholder(id: &str) -> Self {
        serde_json::json!({ "id": id })
    }

    fn with_id(mut self, id: &str) -> Self {
        match self.as_object_mut() {
            Some(map) => {
                map.insert("id".to_string(), Value::String(id.to_string()));
                self
            }
            None => Self::placeholder(id),
        }
    }
}
