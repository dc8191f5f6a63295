//! Invalidation plan generation.
//!
//! Merges mutation events into the minimal set of removals to execute.

use std::collections::BTreeSet;
use std::fmt;

use super::config::CacheConfig;
use super::keys::{Discriminator, QueryKey, normalize_path, parent_path};
use crate::domain::endpoint::pluralize;
use crate::domain::types::{EntityId, ResourceTag};

/// Something that changed on the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationEvent {
    Created { tag: ResourceTag },
    Updated { tag: ResourceTag, id: EntityId },
    Deleted { tag: ResourceTag, id: EntityId },
    FileUploaded { path: String },
    FileDeleted { path: String },
    FolderDeleted { path: String },
    /// A raw transport path changed; used by the path-based entry point.
    PathTouched { path: String },
}

/// Removals to perform against the cache store.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InvalidationPlan {
    /// Exact keys to drop.
    pub keys: BTreeSet<QueryKey>,
    /// Tags whose "all" and filter keys are dropped.
    pub collection_views: BTreeSet<ResourceTag>,
    /// `(tag, folder)` pairs whose path keys are dropped recursively.
    pub folders: BTreeSet<(ResourceTag, String)>,
    /// Normalized transport paths whose entries are dropped.
    pub paths: BTreeSet<String>,
    /// Drop everything.
    pub clear_all: bool,
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InvalidationPlan {{ keys: {}, collection_views: {}, folders: {}, paths: {}, clear_all: {} }}",
            self.keys.len(),
            self.collection_views.len(),
            self.folders.len(),
            self.paths.len(),
            self.clear_all,
        )
    }
}

impl InvalidationPlan {
    pub fn from_events(events: Vec<MutationEvent>, config: &CacheConfig) -> Self {
        let mut plan = Self::default();
        let namespace = config.namespace.as_str();
        let file = ResourceTag::FILE;

        for event in events {
            match event {
                MutationEvent::Created { tag } => {
                    plan.collection_views.insert(tag);
                }
                MutationEvent::Updated { tag, id } | MutationEvent::Deleted { tag, id } => {
                    plan.keys.insert(QueryKey::by_id(namespace, &tag, &id));
                    plan.collection_views.insert(tag);
                }
                MutationEvent::FileUploaded { path } | MutationEvent::FileDeleted { path } => {
                    plan.keys.insert(QueryKey::by_path(namespace, &file, &path));
                    plan.keys
                        .insert(QueryKey::by_path(namespace, &file, &folder_of(&path)));
                    plan.keys.insert(QueryKey::all(namespace, &file));
                }
                MutationEvent::FolderDeleted { path } => {
                    plan.folders.insert((file.clone(), normalize_path(&path)));
                    plan.keys
                        .insert(QueryKey::by_path(namespace, &file, &folder_of(&path)));
                    plan.keys.insert(QueryKey::all(namespace, &file));
                }
                MutationEvent::PathTouched { path } => {
                    let normalized = normalize_path(&path);
                    if config.coarse_invalidation && is_volatile(&normalized, config) {
                        plan.clear_all = true;
                    }
                    if let Some(parent) = parent_path(&normalized) {
                        plan.paths.insert(pluralize_last_segment(&parent));
                        plan.paths.insert(parent);
                    }
                    plan.paths.insert(normalized);
                }
            }
        }

        plan
    }

    /// Whether `key` falls inside this plan, cached or not.
    pub fn targets(&self, key: &QueryKey) -> bool {
        if self.clear_all || self.keys.contains(key) {
            return true;
        }
        if self.collection_views.contains(&key.tag)
            && matches!(key.discriminator, Discriminator::All | Discriminator::Query(_))
        {
            return true;
        }
        if self
            .folders
            .iter()
            .any(|(tag, folder)| key.is_under(tag, folder))
        {
            return true;
        }
        !self.paths.is_empty() && self.paths.contains(&normalize_path(&key.transport_path()))
    }

    pub fn is_empty(&self) -> bool {
        !self.clear_all
            && self.keys.is_empty()
            && self.collection_views.is_empty()
            && self.folders.is_empty()
            && self.paths.is_empty()
    }
}

/// Nearest enclosing folder; files at the root live in the "" folder.
fn folder_of(path: &str) -> String {
    parent_path(path).unwrap_or_default()
}

fn is_volatile(normalized: &str, config: &CacheConfig) -> bool {
    let first = normalized.split('/').next().unwrap_or_default();
    config
        .volatile_prefixes
        .iter()
        .any(|prefix| normalize_path(prefix) == first)
}

fn pluralize_last_segment(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((head, last)) => format!("{head}/{}", pluralize(last)),
        None => pluralize(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CacheConfig {
        CacheConfig::default()
    }

    #[test]
    fn update_targets_entity_and_collection_views() {
        let plan = InvalidationPlan::from_events(
            vec![MutationEvent::Updated {
                tag: ResourceTag::ACCESSORY,
                id: "7".into(),
            }],
            &config(),
        );

        assert_eq!(plan.keys.len(), 1);
        assert!(
            plan.keys
                .contains(&QueryKey::by_id("api", &ResourceTag::ACCESSORY, "7"))
        );
        assert_eq!(
            plan.collection_views.iter().collect::<Vec<_>>(),
            vec![&ResourceTag::ACCESSORY]
        );
        assert!(plan.folders.is_empty());
        assert!(!plan.clear_all);
    }

    #[test]
    fn duplicate_events_merge() {
        let event = MutationEvent::Deleted {
            tag: ResourceTag::MAINTENANCE,
            id: "1".into(),
        };
        let plan = InvalidationPlan::from_events(vec![event.clone(), event], &config());
        assert_eq!(plan.keys.len(), 1);
        assert_eq!(plan.collection_views.len(), 1);
    }

    #[test]
    fn file_upload_targets_nearest_folder() {
        let plan = InvalidationPlan::from_events(
            vec![MutationEvent::FileUploaded {
                path: "/reports/2024/a.pdf".into(),
            }],
            &config(),
        );
        let file = ResourceTag::FILE;
        assert!(plan.keys.contains(&QueryKey::by_path("api", &file, "reports/2024/a.pdf")));
        assert!(plan.keys.contains(&QueryKey::by_path("api", &file, "reports/2024")));
        assert!(!plan.keys.contains(&QueryKey::by_path("api", &file, "reports")));
        assert!(plan.keys.contains(&QueryKey::all("api", &file)));
    }

    #[test]
    fn folder_delete_is_recursive() {
        let plan = InvalidationPlan::from_events(
            vec![MutationEvent::FolderDeleted {
                path: "reports/2024/".into(),
            }],
            &config(),
        );
        assert!(
            plan.folders
                .contains(&(ResourceTag::FILE, "reports/2024".to_string()))
        );
        assert!(
            plan.keys
                .contains(&QueryKey::by_path("api", &ResourceTag::FILE, "reports"))
        );
    }

    #[test]
    fn touched_path_covers_parent_collection() {
        let plan = InvalidationPlan::from_events(
            vec![MutationEvent::PathTouched {
                path: "/biomedical/accessory/9".into(),
            }],
            &config(),
        );
        let paths: Vec<_> = plan.paths.iter().map(String::as_str).collect();
        assert_eq!(
            paths,
            vec![
                "biomedical/accessories",
                "biomedical/accessory",
                "biomedical/accessory/9"
            ]
        );
        assert!(!plan.clear_all);
    }

    #[test]
    fn volatile_prefix_falls_back_to_clear_all() {
        let event = MutationEvent::PathTouched {
            path: "/location/city/3".into(),
        };
        let plan = InvalidationPlan::from_events(vec![event.clone()], &config());
        assert!(plan.clear_all);

        let precise = CacheConfig {
            coarse_invalidation: false,
            ..CacheConfig::default()
        };
        let plan = InvalidationPlan::from_events(vec![event], &precise);
        assert!(!plan.clear_all);
        assert!(plan.paths.contains("location/cities"));
    }

    #[test]
    fn targets_matches_keys_that_are_not_cached() {
        let plan = InvalidationPlan::from_events(
            vec![
                MutationEvent::Updated {
                    tag: ResourceTag::USER,
                    id: "u1".into(),
                },
                MutationEvent::FolderDeleted {
                    path: "reports".into(),
                },
                MutationEvent::PathTouched {
                    path: "/biomedical/accessory/9".into(),
                },
            ],
            &config(),
        );

        assert!(plan.targets(&QueryKey::all("api", &ResourceTag::USER)));
        assert!(plan.targets(&QueryKey::by_id("api", &ResourceTag::USER, "u1")));
        assert!(!plan.targets(&QueryKey::by_id("api", &ResourceTag::USER, "u2")));
        assert!(plan.targets(&QueryKey::by_path("api", &ResourceTag::FILE, "reports/a.pdf")));
        assert!(!plan.targets(&QueryKey::by_path("api", &ResourceTag::FILE, "invoices")));
        assert!(plan.targets(&QueryKey::all("api", &ResourceTag::ACCESSORY)));
        assert!(plan.targets(&QueryKey::by_id("api", &ResourceTag::ACCESSORY, "9")));
        assert!(!plan.targets(&QueryKey::by_id("api", &ResourceTag::ACCESSORY, "10")));
    }

    #[test]
    fn empty_plan() {
        assert!(InvalidationPlan::from_events(Vec::new(), &config()).is_empty());
    }
}
