//! Write facade.
//!
//! Writes are never cached. A successful write invalidates the keys it
//! affects before returning; a failed write invalidates nothing.

use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::info;

use crate::application::error::AppError;
use crate::application::transport::{HttpMethod, RequestBody, Transport, TransportRequest};
use crate::cache::{Invalidator, MutationEvent, QueryKey, normalize_path};
use crate::domain::endpoint::{EndpointAction, resolve};
use crate::domain::types::ResourceTag;

const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Clone)]
pub struct FileUpload {
    /// Destination folder; empty for the root.
    pub folder: String,
    pub file_name: String,
    pub bytes: Bytes,
    /// Guessed from the file name when absent.
    pub content_type: Option<String>,
}

#[derive(Clone)]
pub struct MutationService {
    transport: Arc<dyn Transport>,
    invalidator: Arc<Invalidator>,
}

impl MutationService {
    pub fn new(transport: Arc<dyn Transport>, invalidator: Arc<Invalidator>) -> Self {
        Self {
            transport,
            invalidator,
        }
    }

    pub async fn create<T: DeserializeOwned>(
        &self,
        tag: &ResourceTag,
        data: Value,
    ) -> Result<T, AppError> {
        validate_payload(&data)?;
        let request = TransportRequest::post_json(resolve(tag, EndpointAction::Void), data);
        let created = self.transport.send(request).await?.decode()?;

        self.invalidate(MutationEvent::Created { tag: tag.clone() });
        info!(tag = %tag, "record created");
        Ok(created)
    }

    pub async fn update<T: DeserializeOwned>(
        &self,
        tag: &ResourceTag,
        id: &str,
        data: Value,
    ) -> Result<T, AppError> {
        validate_id(tag, id)?;
        validate_payload(&data)?;
        let request = TransportRequest::put_json(resolve(tag, EndpointAction::One(id)), data);
        let updated = self.transport.send(request).await?.decode()?;

        self.invalidate(MutationEvent::Updated {
            tag: tag.clone(),
            id: id.to_string(),
        });
        info!(tag = %tag, id, "record updated");
        Ok(updated)
    }

    pub async fn delete(&self, tag: &ResourceTag, id: &str) -> Result<(), AppError> {
        validate_id(tag, id)?;
        let request = TransportRequest::delete(resolve(tag, EndpointAction::One(id)));
        self.transport.send(request).await?;

        self.invalidate(MutationEvent::Deleted {
            tag: tag.clone(),
            id: id.to_string(),
        });
        info!(tag = %tag, id, "record deleted");
        Ok(())
    }

    pub async fn upload_file<T: DeserializeOwned>(&self, upload: FileUpload) -> Result<T, AppError> {
        let folder = normalize_path(&upload.folder);
        if !folder.is_empty() {
            validate_path(&folder)?;
        }
        let file_name = upload.file_name.trim();
        if file_name.is_empty() || file_name.contains('/') {
            return Err(AppError::validation("upload needs a plain file name"));
        }
        if upload.bytes.is_empty() {
            return Err(AppError::validation(format!("{file_name} is empty")));
        }

        let content_type = upload.content_type.clone().unwrap_or_else(|| {
            mime_guess::from_path(file_name)
                .first_or_octet_stream()
                .to_string()
        });
        let body = RequestBody::Multipart {
            field: UPLOAD_FIELD.to_string(),
            file_name: file_name.to_string(),
            content_type,
            bytes: upload.bytes,
        };
        let request = TransportRequest::new(HttpMethod::Post, file_path(&folder)).with_body(body);
        let stored = self.transport.send(request).await?.decode()?;

        let path = if folder.is_empty() {
            file_name.to_string()
        } else {
            format!("{folder}/{file_name}")
        };
        info!(path = %path, "file uploaded");
        self.invalidate(MutationEvent::FileUploaded { path });
        Ok(stored)
    }

    pub async fn delete_file(&self, path: &str) -> Result<(), AppError> {
        let path = normalize_path(path);
        validate_path(&path)?;
        self.transport
            .send(TransportRequest::delete(file_path(&path)))
            .await?;

        info!(path = %path, "file deleted");
        self.invalidate(MutationEvent::FileDeleted { path });
        Ok(())
    }

    /// Delete a folder and everything below it.
    pub async fn delete_folder(&self, path: &str) -> Result<(), AppError> {
        let path = normalize_path(path);
        validate_path(&path)?;
        let request =
            TransportRequest::delete(file_path(&path)).with_query([("recursive", "true")]);
        self.transport.send(request).await?;

        info!(path = %path, "folder deleted");
        self.invalidate(MutationEvent::FolderDeleted { path });
        Ok(())
    }

    fn invalidate(&self, event: MutationEvent) -> Vec<QueryKey> {
        self.invalidator.trigger(vec![event])
    }
}

fn file_path(path: &str) -> String {
    let base = resolve(&ResourceTag::FILE, EndpointAction::Void);
    if path.is_empty() {
        base
    } else {
        format!("{base}/{path}")
    }
}

fn validate_id(tag: &ResourceTag, id: &str) -> Result<(), AppError> {
    if id.trim().is_empty() {
        return Err(AppError::validation(format!("empty id for {tag}")));
    }
    Ok(())
}

fn validate_payload(data: &Value) -> Result<(), AppError> {
    if !data.is_object() {
        return Err(AppError::validation("payload must be a JSON object"));
    }
    Ok(())
}

/// Expects a normalized path.
fn validate_path(path: &str) -> Result<(), AppError> {
    if path.is_empty() {
        return Err(AppError::validation("path must not be empty"));
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(AppError::validation(format!("path escapes its root: {path}")));
    }
    Ok(())
}
