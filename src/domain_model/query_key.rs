use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Structured cache key, e.g. `["auth", "user"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(pub Vec<Value>);

/// Canonical string form of a [`QueryKey`].
///
/// `serde_json` keeps object keys sorted, so two keys with the same content
/// always hash to the same string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryHash(pub String);

impl QueryKey {
    pub fn new<I, V>(parts: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        QueryKey(parts.into_iter().map(Into::into).collect())
    }

    pub fn hash(&self) -> QueryHash {
        QueryHash(Value::Array(self.0.clone()).to_string())
    }

    pub fn child(&self, part: impl Into<Value>) -> QueryKey {
        let mut parts = self.0.clone();
        parts.push(part.into());
        QueryKey(parts)
    }
}

impl fmt::Display for QueryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<const N: usize> From<[&str; N]> for QueryKey {
    fn from(parts: [&str; N]) -> Self {
        QueryKey::new(parts)
    }
}

/// Keys used by the auth layer.
pub mod auth_keys {
    use super::QueryKey;

    pub fn all() -> QueryKey {
        QueryKey::from(["auth"])
    }

    pub fn user() -> QueryKey {
        all().child("user")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_ignores_object_key_order() {
        let a = QueryKey(vec![json!("todos"), json!({"page": 1, "done": false})]);
        let b = QueryKey(vec![json!("todos"), json!({"done": false, "page": 1})]);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn user_key_shape() {
        assert_eq!(auth_keys::user().hash().0, r#"["auth","user"]"#);
        assert_eq!(auth_keys::user(), auth_keys::all().child("user"));
    }
}
