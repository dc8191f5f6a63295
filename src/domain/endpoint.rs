//! Mapping from resource tags to backend paths.
//!
//! ```text
//! Void      -> {base}/{tag}          create
//! Many      -> {base}/{plural(tag)}  list / search
//! One(id)   -> {base}/{tag}/{id}     get / update / delete
//! ```

use std::collections::HashMap;

use once_cell::sync::Lazy;

use super::types::ResourceTag;

const LOCATION_BASE: &str = "/location";
const BIOMEDICAL_BASE: &str = "/biomedical";
const MAINTENANCE_BASE: &str = "/maintenance";

static BASE_PATHS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut table = HashMap::new();
    for tag in ["country", "state", "city", "headquarter", "office", "service", "area"] {
        table.insert(tag, LOCATION_BASE);
    }
    for tag in ["equipment-record", "accessory", "inspection", "characteristic"] {
        table.insert(tag, BIOMEDICAL_BASE);
    }
    for tag in ["maintenance", "schedule", "calibration"] {
        table.insert(tag, MAINTENANCE_BASE);
    }
    table
});

/// Which shape of endpoint to build for a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointAction<'a> {
    One(&'a str),
    Many,
    Void,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub base_path: &'static str,
    pub collection_name: String,
}

pub fn descriptor(tag: &ResourceTag) -> EndpointDescriptor {
    EndpointDescriptor {
        base_path: base_path(tag),
        collection_name: pluralize(tag.as_str()),
    }
}

/// Base prefix for a tag; unknown tags live at the root.
pub fn base_path(tag: &ResourceTag) -> &'static str {
    BASE_PATHS.get(tag.as_str()).copied().unwrap_or("")
}

pub fn resolve(tag: &ResourceTag, action: EndpointAction<'_>) -> String {
    let base = base_path(tag);
    match action {
        EndpointAction::Void => format!("{base}/{tag}"),
        EndpointAction::Many => format!("{base}/{}", pluralize(tag.as_str())),
        EndpointAction::One(id) => format!("{base}/{tag}/{id}"),
    }
}

pub fn pluralize(word: &str) -> String {
    match word.strip_suffix('y') {
        Some(stem) => format!("{stem}ies"),
        None => format!("{word}s"),
    }
}

/// Tags whose endpoints contain `path`: the inverse of [`resolve`].
///
/// The collection segment is read after a known base prefix, or at the
/// root otherwise. Empty when no tag resolves to the path.
pub fn tags_for_path(path: &str) -> Vec<ResourceTag> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some(&first) = segments.first() else {
        return Vec::new();
    };
    let is_base = |segment: &str| {
        [LOCATION_BASE, BIOMEDICAL_BASE, MAINTENANCE_BASE]
            .iter()
            .any(|base| base.trim_start_matches('/') == segment)
    };
    let segment = match segments.get(1) {
        Some(&second) if is_base(first) => second,
        _ => first,
    };

    let mut candidates = vec![segment.to_string()];
    if let Some(stem) = segment.strip_suffix("ies") {
        candidates.push(format!("{stem}y"));
    }
    if let Some(stem) = segment.strip_suffix('s') {
        candidates.push(stem.to_string());
    }

    let joined = segments.join("/");
    candidates.dedup();
    candidates
        .into_iter()
        .map(ResourceTag::new)
        .filter(|tag| {
            [EndpointAction::Void, EndpointAction::Many]
                .into_iter()
                .any(|action| {
                    let endpoint = resolve(tag, action);
                    let endpoint = endpoint.trim_start_matches('/');
                    joined == endpoint
                        || joined
                            .strip_prefix(endpoint)
                            .is_some_and(|rest| rest.starts_with('/'))
                })
        })
        .collect()
}
