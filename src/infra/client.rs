//! Reqwest-backed [`Transport`] and bearer token storage.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use tracing::{debug, warn};

use crate::application::error::AppError;
use crate::application::transport::{
    HttpMethod, RequestBody, Transport, TransportRequest, TransportResponse,
};
use crate::config::ApiSettings;
use crate::infra::error::InfraError;

/// Header the backend sets when a resource is about to change.
pub const STALE_SOON_HEADER: &str = "x-stale-soon";

/// Holds the session token; the file is the persisted copy.
#[derive(Debug, Clone, Default)]
pub struct TokenStore {
    path: Option<PathBuf>,
    token: Arc<RwLock<Option<String>>>,
}

impl TokenStore {
    pub fn in_memory(token: Option<String>) -> Self {
        Self {
            path: None,
            token: Arc::new(RwLock::new(token)),
        }
    }

    /// Read the token file; a missing file means "not signed in".
    pub fn from_file(path: &Path) -> Result<Self, InfraError> {
        let token = match fs::read_to_string(path) {
            Ok(raw) => Some(raw.trim().to_string()).filter(|token| !token.is_empty()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(InfraError::Io(err)),
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            token: Arc::new(RwLock::new(token)),
        })
    }

    pub fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replace the token and persist it when backed by a file.
    pub fn store(&self, token: String) -> Result<(), InfraError> {
        if let Some(path) = &self.path {
            fs::write(path, &token)?;
        }
        *self
            .token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(token);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base: Url,
    tokens: TokenStore,
}

impl HttpTransport {
    pub fn new(base_url: &str, tokens: TokenStore, timeout: Duration) -> Result<Self, InfraError> {
        let mut base = Url::parse(base_url)
            .map_err(|err| InfraError::configuration(format!("invalid api.base_url: {err}")))?;
        // Relative joins keep the base path only when it ends with a slash.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;
        Ok(Self {
            client,
            base,
            tokens,
        })
    }

    pub fn from_settings(settings: &ApiSettings) -> Result<Self, InfraError> {
        let base_url = settings
            .base_url
            .as_deref()
            .ok_or_else(|| InfraError::configuration("api.base_url is required"))?;
        let tokens = match &settings.token_file {
            Some(path) => TokenStore::from_file(path)?,
            None => TokenStore::in_memory(None),
        };
        Self::new(base_url, tokens, settings.timeout)
    }

    pub fn user_agent() -> &'static str {
        concat!("medtrack/", env!("CARGO_PKG_VERSION"))
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    fn url(&self, request: &TransportRequest) -> Result<Url, AppError> {
        let relative = request.path.trim_start_matches('/');
        let mut url = self
            .base
            .join(relative)
            .map_err(|err| AppError::validation(format!("invalid request path: {err}")))?;
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn build_body(
        builder: reqwest::RequestBuilder,
        body: RequestBody,
    ) -> Result<reqwest::RequestBuilder, AppError> {
        Ok(match body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Multipart {
                field,
                file_name,
                content_type,
                bytes,
            } => {
                let part = reqwest::multipart::Part::bytes(bytes.to_vec())
                    .file_name(file_name)
                    .mime_str(&content_type)
                    .map_err(|err| AppError::validation(format!("invalid content type: {err}")))?;
                builder.multipart(reqwest::multipart::Form::new().part(field, part))
            }
        })
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, AppError> {
        let url = self.url(&request)?;
        let path = request.path.clone();
        debug!(method = request.method.as_str(), %url, "sending request");

        let mut builder = self.client.request(method(request.method), url);
        if let Some(token) = self.tokens.token() {
            builder = builder.bearer_auth(token);
        }
        let builder = Self::build_body(builder, request.body)?;

        let response = builder.send().await.map_err(|err| {
            let reason = if err.is_timeout() { "timed out" } else { "request failed" };
            warn!(path = %path, error = %err, reason, "transport error");
            AppError::transport(None, format!("{reason}: {err}"))
        })?;

        let status = response.status();
        let stale_soon = response.headers().contains_key(STALE_SOON_HEADER);
        let body = response
            .bytes()
            .await
            .map_err(|err| AppError::transport(Some(status.as_u16()), err.to_string()))?;

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::not_found(path));
        }
        if !status.is_success() {
            let text = String::from_utf8_lossy(&body).into_owned();
            return Err(AppError::transport(
                Some(status.as_u16()),
                format!("{path}: {text}"),
            ));
        }

        Ok(TransportResponse {
            status: status.as_u16(),
            stale_soon,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn token_file_is_trimmed() {
        let file = NamedTempFile::new().expect("tmp file");
        fs::write(file.path(), "secret-token\n").expect("write token");

        let store = TokenStore::from_file(file.path()).expect("token store");
        assert_eq!(store.token().as_deref(), Some("secret-token"));
    }

    #[test]
    fn missing_token_file_means_anonymous() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let store = TokenStore::from_file(&dir.path().join("absent")).expect("token store");
        assert_eq!(store.token(), None);

        store.store("fresh".into()).expect("persist token");
        assert_eq!(
            fs::read_to_string(dir.path().join("absent")).expect("read back"),
            "fresh"
        );
    }

    #[test]
    fn invalid_base_url_is_a_configuration_error() {
        let err = HttpTransport::new("not a url", TokenStore::default(), Duration::from_secs(1))
            .expect_err("invalid url");
        assert!(matches!(err, InfraError::Configuration { .. }));
    }

    #[test]
    fn request_url_joins_path_and_query() {
        let transport = HttpTransport::new(
            "https://api.example.com/v2",
            TokenStore::default(),
            Duration::from_secs(1),
        )
        .expect("transport");
        let request =
            TransportRequest::get("/biomedical/accessories").with_query([("equipment", "7")]);
        let url = transport.url(&request).expect("url");
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v2/biomedical/accessories?equipment=7"
        );
    }
}
