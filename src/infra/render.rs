//! Stand-in document renderer: pretty-printed JSON with a small envelope.

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::application::export::{DocumentRenderer, RenderError};
use crate::domain::types::ResourceTag;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a> {
    kind: &'a str,
    generated_at: String,
    document: &'a Value,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer;

impl DocumentRenderer for JsonRenderer {
    fn render(&self, kind: &ResourceTag, props: &Value) -> Result<Bytes, RenderError> {
        if !props.is_object() {
            return Err(RenderError::Unsupported {
                kind: kind.to_string(),
            });
        }
        let generated_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|err| RenderError::Document {
                message: err.to_string(),
            })?;
        let envelope = Envelope {
            kind: kind.as_str(),
            generated_at,
            document: props,
        };
        serde_json::to_vec_pretty(&envelope)
            .map(Bytes::from)
            .map_err(|err| RenderError::Document {
                message: err.to_string(),
            })
    }

    fn extension(&self) -> &'static str {
        "json"
    }
}
