//! Resource identity shared by endpoints, cache keys and bulk operations.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Backend identifier of a single entity.
pub type EntityId = String;

/// Opaque name of an entity kind.
///
/// Tags are flat: `"location"` and `"location-city"` are unrelated kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceTag(Cow<'static, str>);

impl ResourceTag {
    pub const EQUIPMENT: ResourceTag = ResourceTag(Cow::Borrowed("equipment-record"));
    pub const ACCESSORY: ResourceTag = ResourceTag(Cow::Borrowed("accessory"));
    pub const MAINTENANCE: ResourceTag = ResourceTag(Cow::Borrowed("maintenance"));
    pub const SCHEDULE: ResourceTag = ResourceTag(Cow::Borrowed("schedule"));
    pub const INSPECTION: ResourceTag = ResourceTag(Cow::Borrowed("inspection"));
    pub const CITY: ResourceTag = ResourceTag(Cow::Borrowed("city"));
    pub const HEADQUARTER: ResourceTag = ResourceTag(Cow::Borrowed("headquarter"));
    pub const OFFICE: ResourceTag = ResourceTag(Cow::Borrowed("office"));
    pub const SERVICE: ResourceTag = ResourceTag(Cow::Borrowed("service"));
    pub const CLIENT: ResourceTag = ResourceTag(Cow::Borrowed("client"));
    pub const USER: ResourceTag = ResourceTag(Cow::Borrowed("user"));
    pub const FILE: ResourceTag = ResourceTag(Cow::Borrowed("file"));

    pub fn new(tag: impl Into<String>) -> Self {
        Self(Cow::Owned(tag.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceTag {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Kinds of bulk work that may run at most once per [`OperationFlags`] owner.
///
/// [`OperationFlags`]: crate::application::guard::OperationFlags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOperation {
    Export,
    MassSign,
}

impl BulkOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            BulkOperation::Export => "export",
            BulkOperation::MassSign => "mass_sign",
        }
    }
}
