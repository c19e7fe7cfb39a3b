//! Management API client.

use reqwest::{header, Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use cmsbridge_common::{BearerToken, Error, Result, SpaceId};

use crate::model::{decode_body, Asset, Collection, ContentType, Fields, Space};

/// Management API base URL.
const DEFAULT_API_BASE: &str = "https://api.contentful.com";
/// Upload API base URL.
const DEFAULT_UPLOAD_BASE: &str = "https://upload.contentful.com";
/// Media type every management request carries.
const MANAGEMENT_MEDIA_TYPE: &str = "application/vnd.contentful.management.v1+json";

/// Header carrying the version a write is based on.
pub const VERSION_HEADER: &str = "X-Contentful-Version";
/// Header naming the content type of an entry write.
pub const CONTENT_TYPE_HEADER: &str = "X-Contentful-Content-Type";

/// Endpoints and identification used by [`RemoteClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the management API.
    pub api_base_url: String,
    /// Base URL of the binary upload API.
    pub upload_base_url: String,
    /// User agent sent with every request.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE.to_string(),
            upload_base_url: DEFAULT_UPLOAD_BASE.to_string(),
            user_agent: format!("cmsbridge/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    /// Point both APIs at one base URL (used against mock servers).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            api_base_url: base_url.clone(),
            upload_base_url: base_url,
            ..Self::default()
        }
    }
}

/// Thin authenticated JSON request wrapper over the management API.
///
/// Transport failures become errors. Remote application errors are returned
/// as decoded bodies so callers can inspect partial success themselves.
pub struct RemoteClient {
    http: Client,
    config: ClientConfig,
    token: Option<BearerToken>,
}

impl RemoteClient {
    /// Create a new client.
    ///
    /// A missing token is accepted here; every request then fails with
    /// `Error::Auth`.
    pub fn new(token: Option<BearerToken>, config: ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config,
            token,
        })
    }

    /// Whether a bearer token is configured.
    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Get authorization header.
    fn auth_header(&self) -> Result<String> {
        let token = self.token.as_ref().ok_or_else(|| {
            Error::Auth(
                "Cannot make the API request because there is no access token specified"
                    .to_string(),
            )
        })?;
        Ok(format!("Bearer {}", token.secret()))
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.config.api_base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    /// Make a request and return the decoded JSON body.
    ///
    /// # Errors
    /// - `Auth` if no token is configured
    /// - `Transport` on connection/TLS failure or an undecodable body
    ///
    /// A 4xx/5xx answer with a JSON body is returned as `Ok`; inspect it with
    /// `RemoteError::from_body`.
    pub async fn request(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<&Value>,
        extra_headers: &[(&str, String)],
    ) -> Result<Value> {
        let auth = self.auth_header()?;
        let url = self.url(endpoint);

        debug!("{} {}", method, url);

        let mut request = self
            .http
            .request(method.clone(), &url)
            .header(header::AUTHORIZATION, auth)
            .header(header::CONTENT_TYPE, MANAGEMENT_MEDIA_TYPE);

        for (name, value) in extra_headers {
            request = request.header(*name, value.as_str());
        }

        if let Some(body) = body {
            request = request.body(serde_json::to_vec(body)?);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{} {} failed: {}", method, url, e)))?;

        Self::read_json(response).await
    }

    /// Read a response body as JSON; an empty body decodes to `Null`.
    async fn read_json(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("Failed to read response: {}", e)))?;

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text).map_err(|e| {
            Error::Transport(format!("Undecodable response body ({}): {}", status, e))
        })
    }

    /// List the spaces the token can access.
    pub async fn spaces(&self) -> Result<Collection<Space>> {
        decode_body(self.request("spaces", Method::GET, None, &[]).await?)
    }

    /// List the content types of a space.
    pub async fn content_types(&self, space: &SpaceId) -> Result<Collection<ContentType>> {
        let endpoint = format!("spaces/{}/content_types", space);
        decode_body(self.request(&endpoint, Method::GET, None, &[]).await?)
    }

    /// Fetch one page of entries. The body is returned undecoded.
    pub async fn entries_page(&self, space: &SpaceId, skip: u64, limit: u64) -> Result<Value> {
        let endpoint = format!("spaces/{}/entries?skip={}&limit={}", space, skip, limit);
        self.request(&endpoint, Method::GET, None, &[]).await
    }

    /// Fetch one entry. The body is returned undecoded.
    pub async fn entry(&self, space: &SpaceId, entry_id: &str) -> Result<Value> {
        let endpoint = format!("spaces/{}/entries/{}", space, entry_id);
        self.request(&endpoint, Method::GET, None, &[]).await
    }

    /// Create an entry of `content_type_id`.
    pub async fn create_entry(
        &self,
        space: &SpaceId,
        content_type_id: &str,
        fields: Fields,
    ) -> Result<Value> {
        let endpoint = format!("spaces/{}/entries", space);
        let body = json!({ "fields": fields });
        self.request(
            &endpoint,
            Method::POST,
            Some(&body),
            &[(CONTENT_TYPE_HEADER, content_type_id.to_string())],
        )
        .await
    }

    /// Update an entry, basing the write on `version`.
    pub async fn update_entry(
        &self,
        space: &SpaceId,
        entry_id: &str,
        content_type_id: &str,
        version: u64,
        fields: Fields,
    ) -> Result<Value> {
        let endpoint = format!("spaces/{}/entries/{}", space, entry_id);
        let body = json!({ "fields": fields });
        self.request(
            &endpoint,
            Method::PUT,
            Some(&body),
            &[
                (CONTENT_TYPE_HEADER, content_type_id.to_string()),
                (VERSION_HEADER, version.to_string()),
            ],
        )
        .await
    }

    /// Publish an entry at `version`.
    pub async fn publish_entry(&self, space: &SpaceId, entry_id: &str, version: u64) -> Result<Value> {
        let endpoint = format!("spaces/{}/entries/{}/published", space, entry_id);
        self.request(
            &endpoint,
            Method::PUT,
            None,
            &[(VERSION_HEADER, version.to_string())],
        )
        .await
    }

    /// Fetch one asset.
    pub async fn asset(&self, space: &SpaceId, asset_id: &str) -> Result<Asset> {
        let endpoint = format!("spaces/{}/assets/{}", space, asset_id);
        decode_body(self.request(&endpoint, Method::GET, None, &[]).await?)
    }

    /// Create an asset from its `fields` payload.
    pub async fn create_asset(&self, space: &SpaceId, fields: Value) -> Result<Value> {
        let endpoint = format!("spaces/{}/assets", space);
        let body = json!({ "fields": fields });
        self.request(&endpoint, Method::POST, Some(&body), &[]).await
    }

    /// Ask the remote to fetch and transform the file of `locale`.
    pub async fn process_asset(
        &self,
        space: &SpaceId,
        asset_id: &str,
        locale: &str,
        version: u64,
    ) -> Result<Value> {
        let endpoint = format!("spaces/{}/assets/{}/files/{}/process", space, asset_id, locale);
        self.request(
            &endpoint,
            Method::PUT,
            None,
            &[(VERSION_HEADER, version.to_string())],
        )
        .await
    }

    /// Publish an asset at `version`.
    pub async fn publish_asset(&self, space: &SpaceId, asset_id: &str, version: u64) -> Result<Value> {
        let endpoint = format!("spaces/{}/assets/{}/published", space, asset_id);
        self.request(
            &endpoint,
            Method::PUT,
            None,
            &[(VERSION_HEADER, version.to_string())],
        )
        .await
    }

    /// Send raw bytes to the upload API. The body is returned undecoded.
    pub async fn upload(&self, space: &SpaceId, data: Vec<u8>) -> Result<Value> {
        let auth = self.auth_header()?;
        let url = format!(
            "{}/spaces/{}/uploads",
            self.config.upload_base_url.trim_end_matches('/'),
            space
        );

        debug!("POST {} ({} bytes)", url, data.len());

        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, auth)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Failed to upload file: {}", e)))?;

        Self::read_json(response).await
    }

    /// Download a published file. No credentials are sent.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        debug!("GET {}", url);

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Failed to download file: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::Transport(format!(
                "Download of {} failed: {}",
                url, status
            )));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| Error::Transport(format!("Failed to read download response: {}", e)))
    }
}
