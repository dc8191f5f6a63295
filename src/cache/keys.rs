//! Cache key definitions.
//!
//! A [`QueryKey`] is `(namespace, tag, discriminator)`; equality of all
//! three components is cache identity.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::domain::endpoint::{EndpointAction, resolve};
use crate::domain::types::ResourceTag;

/// Distinguishes queries against the same resource tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Discriminator {
    /// The whole collection.
    All,
    /// A single entity.
    Id(String),
    /// Canonical JSON of a filter or pagination request.
    Query(String),
    /// A normalized slash-separated path (file store).
    Path(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    pub namespace: String,
    pub tag: ResourceTag,
    pub discriminator: Discriminator,
}

impl QueryKey {
    pub fn new(namespace: impl Into<String>, tag: ResourceTag, discriminator: Discriminator) -> Self {
        Self {
            namespace: namespace.into(),
            tag,
            discriminator,
        }
    }

    pub fn all(namespace: &str, tag: &ResourceTag) -> Self {
        Self::new(namespace, tag.clone(), Discriminator::All)
    }

    pub fn by_id(namespace: &str, tag: &ResourceTag, id: &str) -> Self {
        Self::new(namespace, tag.clone(), Discriminator::Id(id.to_string()))
    }

    /// Key for a filter; semantically identical filters share a key.
    pub fn by_query<F: Serialize + ?Sized>(
        namespace: &str,
        tag: &ResourceTag,
        filter: &F,
    ) -> Result<Self, serde_json::Error> {
        let canonical = canonical_json(&serde_json::to_value(filter)?);
        Ok(Self::new(namespace, tag.clone(), Discriminator::Query(canonical)))
    }

    pub fn by_path(namespace: &str, tag: &ResourceTag, path: &str) -> Self {
        Self::new(
            namespace,
            tag.clone(),
            Discriminator::Path(normalize_path(path)),
        )
    }

    /// Backend path this key is read from, without the query string.
    pub fn transport_path(&self) -> String {
        let tag = &self.tag;
        match &self.discriminator {
            Discriminator::All | Discriminator::Query(_) => resolve(tag, EndpointAction::Many),
            Discriminator::Id(id) => resolve(tag, EndpointAction::One(id)),
            Discriminator::Path(path) if path.is_empty() => resolve(tag, EndpointAction::Void),
            Discriminator::Path(path) => format!("{}/{path}", resolve(tag, EndpointAction::Void)),
        }
    }

    /// True when this key is a path key at or below `folder` for `tag`.
    pub fn is_under(&self, tag: &ResourceTag, folder: &str) -> bool {
        if &self.tag != tag {
            return false;
        }
        match &self.discriminator {
            Discriminator::Path(path) => path_is_under(path, &normalize_path(folder)),
            _ => false,
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let discriminator = match &self.discriminator {
            Discriminator::All => "all",
            Discriminator::Id(id) => id,
            Discriminator::Query(query) => query,
            Discriminator::Path(path) => path,
        };
        write!(f, "{}:{}:{}", self.namespace, self.tag, discriminator)
    }
}

/// Serialize a JSON value with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    sort_keys(value).to_string()
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key.clone(), sort_keys(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Normalize a slash-separated path: no query string, no empty segments,
/// no leading or trailing slash.
pub fn normalize_path(path: &str) -> String {
    let without_query = path.split(['?', '#']).next().unwrap_or_default();
    without_query
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Parent of a normalized path, `None` at the root.
pub fn parent_path(path: &str) -> Option<String> {
    let normalized = normalize_path(path);
    let (parent, _) = normalized.rsplit_once('/')?;
    Some(parent.to_string())
}

fn path_is_under(path: &str, folder: &str) -> bool {
    if folder.is_empty() {
        return true;
    }
    path == folder
        || path
            .strip_prefix(folder)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn equal_components_are_equal_keys() {
        let a = QueryKey::by_id("api", &ResourceTag::ACCESSORY, "7");
        let b = QueryKey::by_id("api", &ResourceTag::ACCESSORY, "7");
        assert_eq!(a, b);

        let other_tag = QueryKey::by_id("api", &ResourceTag::MAINTENANCE, "7");
        assert_ne!(a, other_tag);

        let other_namespace = QueryKey::by_id("admin", &ResourceTag::ACCESSORY, "7");
        assert_ne!(a, other_namespace);
    }

    #[test]
    fn filter_key_order_is_irrelevant() {
        let a = QueryKey::by_query(
            "api",
            &ResourceTag::ACCESSORY,
            &json!({ "equipment": "1", "active": true, "nested": { "b": 1, "a": 2 } }),
        )
        .expect("key");
        let b = QueryKey::by_query(
            "api",
            &ResourceTag::ACCESSORY,
            &json!({ "nested": { "a": 2, "b": 1 }, "active": true, "equipment": "1" }),
        )
        .expect("key");
        assert_eq!(a, b);
    }

    #[test]
    fn different_filters_produce_different_keys() {
        let a = QueryKey::by_query("api", &ResourceTag::ACCESSORY, &json!({ "equipment": "1" }))
            .expect("key");
        let b = QueryKey::by_query("api", &ResourceTag::ACCESSORY, &json!({ "equipment": "2" }))
            .expect("key");
        assert_ne!(a, b);
    }

    #[test]
    fn transport_path_follows_the_discriminator() {
        let filter = QueryKey::by_query("api", &ResourceTag::ACCESSORY, &json!({ "equipment": "1" }))
            .expect("key");
        assert_eq!(filter.transport_path(), "/biomedical/accessories");
        assert_eq!(
            QueryKey::by_id("api", &ResourceTag::CITY, "3").transport_path(),
            "/location/city/3"
        );
        assert_eq!(
            QueryKey::by_path("api", &ResourceTag::FILE, "/reports/a.pdf").transport_path(),
            "/file/reports/a.pdf"
        );
        assert_eq!(
            QueryKey::by_path("api", &ResourceTag::FILE, "").transport_path(),
            "/file"
        );
    }

    #[test]
    fn path_normalization() {
        assert_eq!(normalize_path("/files//reports/"), "files/reports");
        assert_eq!(normalize_path("files/a.pdf?download=1"), "files/a.pdf");
        assert_eq!(normalize_path("./a/./b"), "a/b");
        assert_eq!(parent_path("/files/reports/a.pdf").as_deref(), Some("files/reports"));
        assert_eq!(parent_path("a.pdf"), None);
    }

    #[test]
    fn folder_membership_respects_segment_boundaries() {
        let inside = QueryKey::by_path("api", &ResourceTag::FILE, "reports/2024/a.pdf");
        let sibling = QueryKey::by_path("api", &ResourceTag::FILE, "reports-old/a.pdf");

        assert!(inside.is_under(&ResourceTag::FILE, "/reports"));
        assert!(!sibling.is_under(&ResourceTag::FILE, "reports"));
        assert!(!inside.is_under(&ResourceTag::EQUIPMENT, "reports"));
    }

    #[test]
    fn display_includes_all_components() {
        let key = QueryKey::all("api", &ResourceTag::CITY);
        assert_eq!(key.to_string(), "api:city:all");
    }
}
