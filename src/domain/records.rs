//! How entity records present themselves to the export pipeline.

use medtrack_api_types::{Accessory, EquipmentRecord, MaintenanceRecord};
use serde::Serialize;
use time::{Date, macros::format_description};

/// A record that can be rendered into a named document.
pub trait ExportRecord: Serialize + Send + Sync {
    fn record_id(&self) -> &str;

    /// Human label used for folder and file names before slugging.
    fn export_label(&self) -> String;

    /// Stable date used to tell documents of the same label apart.
    fn export_date(&self) -> Option<Date>;
}

/// Parse the leading `YYYY-MM-DD` of an ISO-8601 date or timestamp.
pub fn parse_iso_date(value: &str) -> Option<Date> {
    let prefix = value.get(..10)?;
    Date::parse(prefix, format_description!("[year]-[month]-[day]")).ok()
}

impl ExportRecord for EquipmentRecord {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn export_label(&self) -> String {
        match self.serial.as_deref() {
            Some(serial) if !serial.trim().is_empty() => format!("{} {}", self.name, serial),
            _ => self.name.clone(),
        }
    }

    fn export_date(&self) -> Option<Date> {
        self.created_at.as_deref().and_then(parse_iso_date)
    }
}

impl ExportRecord for Accessory {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn export_label(&self) -> String {
        match self.kind.as_deref() {
            Some(kind) if !kind.trim().is_empty() => format!("{kind} {}", self.name),
            _ => self.name.clone(),
        }
    }

    fn export_date(&self) -> Option<Date> {
        self.created_at.as_deref().and_then(parse_iso_date)
    }
}

impl ExportRecord for MaintenanceRecord {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn export_label(&self) -> String {
        self.kind
            .clone()
            .unwrap_or_else(|| "maintenance".to_string())
    }

    fn export_date(&self) -> Option<Date> {
        self.date.as_deref().and_then(parse_iso_date)
    }
}
