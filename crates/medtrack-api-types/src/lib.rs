//! Wire types shared by the medtrack client and its tooling.
//!
//! The backend stores documents with Mongo-style `_id` keys and camelCase
//! fields; every record here accepts both `_id` and `id`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Equipment "curriculum": the master record of one biomedical device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentRecord {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub inventory: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    /// Fields the client does not interpret but must carry into documents.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Accessory attached to an equipment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accessory {
    #[serde(alias = "_id")]
    pub id: String,
    /// Owning equipment record id.
    #[serde(alias = "curriculum")]
    pub equipment: String,
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// One maintenance log entry for an equipment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceRecord {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(alias = "curriculum")]
    pub equipment: String,
    #[serde(default, rename = "typeMaintenance", alias = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub observations: Option<String>,
}

/// Entry returned by folder listings of the file store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub path: String,
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Paginated search response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResponse<T> {
    #[serde(alias = "data")]
    pub items: Vec<T>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub per_page: u32,
}

impl<T> PaginatedResponse<T> {
    pub fn is_last_page(&self) -> bool {
        if self.per_page == 0 {
            return true;
        }
        u64::from(self.page) * u64::from(self.per_page) >= self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equipment_accepts_mongo_ids_and_keeps_unknown_fields() {
        let record: EquipmentRecord = serde_json::from_value(json!({
            "_id": "eq-1",
            "name": "Infusion pump",
            "serial": "SN-9",
            "riskClass": "IIb"
        }))
        .expect("decode equipment");

        assert_eq!(record.id, "eq-1");
        assert_eq!(record.serial.as_deref(), Some("SN-9"));
        assert_eq!(record.extra.get("riskClass"), Some(&json!("IIb")));
    }

    #[test]
    fn accessory_reads_curriculum_alias() {
        let accessory: Accessory = serde_json::from_value(json!({
            "id": "acc-1",
            "curriculum": "eq-1",
            "name": "Power cable",
            "type": "cable"
        }))
        .expect("decode accessory");

        assert_eq!(accessory.equipment, "eq-1");
        assert_eq!(accessory.kind.as_deref(), Some("cable"));
    }

    #[test]
    fn paginated_response_reads_data_alias() {
        let page: PaginatedResponse<FileEntry> = serde_json::from_value(json!({
            "data": [{ "path": "a/b.pdf", "name": "b.pdf" }],
            "total": 1,
            "page": 1,
            "perPage": 10
        }))
        .expect("decode page");

        assert_eq!(page.items.len(), 1);
        assert!(page.is_last_page());
    }
}
