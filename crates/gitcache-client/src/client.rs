use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, ClientBuilder, StatusCode};
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::RetryTransientMiddleware;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use url::Url;

use gitcache_urls::PackageId;

use crate::auth::{AuthError, AuthManager};
use crate::error::Error;

/// The hosted registry.
pub const DEFAULT_API_URL: &str = "https://api.grata-labs.com";

/// Statuses the registry uses to signal an exhausted quota. Uploads that
/// hit one succeed without confirmation; the cache simply stays
/// registry-cold.
fn is_quota_exceeded(status: StatusCode) -> bool {
    status == StatusCode::PAYLOAD_TOO_LARGE || status == StatusCode::TOO_MANY_REQUESTS
}

/// A builder for a [`RegistryClient`].
#[derive(Debug, Clone)]
pub struct RegistryClientBuilder {
    base_url: Url,
    timeout: Duration,
    retries: u32,
    background_uploads: bool,
    verbose: bool,
    token_override: Option<String>,
    auth: Option<Arc<AuthManager>>,
}

impl Default for RegistryClientBuilder {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_API_URL).unwrap(),
            timeout: Duration::from_secs(5),
            retries: 2,
            background_uploads: true,
            verbose: false,
            token_override: None,
            auth: None,
        }
    }
}

impl RegistryClientBuilder {
    /// Honor `GITCACHE_API_URL` and `GITCACHE_TOKEN`.
    pub fn from_env() -> Self {
        let mut builder = Self::default();
        if let Ok(base_url) = std::env::var(crate::env::GITCACHE_API_URL) {
            if let Ok(url) = Url::parse(&base_url) {
                builder.base_url = url;
            } else {
                warn!("Ignoring unparseable {}: {base_url}", crate::env::GITCACHE_API_URL);
            }
        }
        if let Ok(token) = std::env::var(crate::env::GITCACHE_TOKEN) {
            if !token.is_empty() {
                builder.token_override = Some(token);
            }
        }
        builder
    }

    #[must_use]
    pub fn base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    #[must_use]
    pub fn background_uploads(mut self, background_uploads: bool) -> Self {
        self.background_uploads = background_uploads;
        self
    }

    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token_override = Some(token.into());
        self
    }

    #[must_use]
    pub fn auth(mut self, auth: Arc<AuthManager>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn build(self) -> RegistryClient {
        let client_raw = ClientBuilder::new()
            .user_agent(concat!("gitcache/", env!("CARGO_PKG_VERSION")))
            .timeout(self.timeout)
            .build()
            .expect("failed to build HTTP client");

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(self.retries);
        let client = reqwest_middleware::ClientBuilder::new(client_raw.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        RegistryClient {
            base_url: self.base_url,
            background_uploads: self.background_uploads,
            verbose: self.verbose,
            token_override: self.token_override,
            auth: self.auth,
            client,
            client_raw,
        }
    }
}

/// Outcome of validating a CI token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenValidation {
    /// The token is valid and bound to this organization.
    Valid { organization: String },
    Invalid,
    AccessDenied,
    Http(u16),
    Network,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    #[serde(default, rename = "isDefault")]
    pub is_default: bool,
}

/// Registry-side artifact metadata returned by the lookup probe.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInfo {
    /// The registry's internal artifact id, used for download/upload.
    #[serde(alias = "artifactId")]
    pub id: String,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateUploadRequest<'a> {
    file_name: &'a str,
    content_type: &'a str,
    size: u64,
    hash: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateUploadResponse {
    /// Empty when the registry already holds this artifact.
    #[serde(default)]
    upload_url: String,
    artifact_id: String,
}

#[derive(Debug, Deserialize)]
struct DownloadUrlResponse {
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    token: String,
}

/// A typed client for the artifact registry.
///
/// Every request carries a bearer token and an abort timer; transient
/// failures retry with exponential backoff.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: Url,
    background_uploads: bool,
    verbose: bool,
    token_override: Option<String>,
    auth: Option<Arc<AuthManager>>,
    client: ClientWithMiddleware,
    /// Direct-storage requests (signed URLs) go out without the bearer
    /// header or retry stack.
    client_raw: Client,
}

impl RegistryClient {
    pub fn builder() -> RegistryClientBuilder {
        RegistryClientBuilder::default()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Whether a request could currently be authenticated.
    pub fn is_authenticated(&self) -> bool {
        self.token_override.is_some()
            || self
                .auth
                .as_ref()
                .is_some_and(|auth| auth.is_authenticated())
    }

    /// The bearer for the next request, refreshing a near-expiry user
    /// token first. An environment token bypasses the stored session.
    async fn bearer(&self) -> Result<Option<String>, Error> {
        if let Some(token) = &self.token_override {
            return Ok(Some(token.clone()));
        }
        let Some(auth) = &self.auth else {
            return Ok(None);
        };
        let token = auth
            .refresh_if_needed(|old| self.exchange_token(old))
            .await?;
        Ok(token)
    }

    /// The refresh exchange: trade an expiring user token for a new one.
    async fn exchange_token(&self, token: String) -> Result<String, AuthError> {
        let url = self.endpoint(&["api", "auth", "refresh"]);
        let response = self
            .client
            .post(url)
            .bearer_auth(&token)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await
            .map_err(|err| AuthError::Refresh(err.to_string()))?;
        if !response.status().is_success() {
            return Err(AuthError::Refresh(format!("HTTP {}", response.status())));
        }
        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|err| AuthError::Refresh(err.to_string()))?;
        Ok(body.token)
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .expect("registry base URL cannot be a base")
            .pop_if_empty()
            .extend(segments);
        url
    }

    /// Validate a CI token without an existing session.
    pub async fn validate_ci_token(&self, token: &str) -> TokenValidation {
        let url = self.endpoint(&["api", "auth", "validate-token"]);
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                debug!("Token validation did not reach the registry: {err}");
                return TokenValidation::Network;
            }
        };

        match response.status() {
            StatusCode::OK => {
                #[derive(Deserialize)]
                struct Validated {
                    organization: String,
                }
                match response.json::<Validated>().await {
                    Ok(body) => TokenValidation::Valid {
                        organization: body.organization,
                    },
                    Err(_) => TokenValidation::Network,
                }
            }
            StatusCode::UNAUTHORIZED => TokenValidation::Invalid,
            StatusCode::FORBIDDEN => TokenValidation::AccessDenied,
            status => TokenValidation::Http(status.as_u16()),
        }
    }

    /// List the organizations the session can publish to.
    pub async fn organizations(&self) -> Result<Vec<Organization>, Error> {
        let token = self.bearer().await?.ok_or(Error::Unauthenticated)?;
        let url = self.endpoint(&["api", "organizations"]);
        let response = self
            .client
            .get(url.clone())
            .bearer_auth(token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Http {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        #[derive(Deserialize)]
        struct Organizations {
            organizations: Vec<Organization>,
        }
        let body: Organizations = response.json().await?;
        Ok(body.organizations)
    }

    /// Existence probe. Returns the registry's metadata on a hit.
    pub async fn lookup(&self, package_id: &PackageId) -> Result<Option<ArtifactInfo>, Error> {
        let token = self.bearer().await?.ok_or(Error::Unauthenticated)?;
        let url = self.endpoint(&["artifacts", "lookup", package_id.as_str()]);
        let response = self
            .client
            .get(url.clone())
            .bearer_auth(token)
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(Error::Http {
                status: status.as_u16(),
                url: url.to_string(),
            }),
        }
    }

    /// `false` when unauthenticated, and when the probe itself fails: a
    /// broken registry must never break an install.
    pub async fn has(&self, package_id: &PackageId) -> bool {
        if !self.is_authenticated() {
            return false;
        }
        match self.lookup(package_id).await {
            Ok(found) => found.is_some(),
            Err(err) => {
                if self.verbose {
                    warn!("Registry probe for {package_id} failed: {err}");
                }
                false
            }
        }
    }

    /// Download the artifact bytes via a time-bound direct-storage URL.
    pub async fn get(&self, package_id: &PackageId) -> Result<Vec<u8>, Error> {
        let info = self
            .lookup(package_id)
            .await?
            .ok_or_else(|| Error::ArtifactNotFound(package_id.to_string()))?;

        let token = self.bearer().await?.ok_or(Error::Unauthenticated)?;
        let url = self.endpoint(&["artifacts", &info.id, "download"]);
        let response = self
            .client
            .post(url.clone())
            .bearer_auth(token)
            .send()
            .await?;
        if !response.status().is_success() {
            // The artifact exists but no signed URL could be issued;
            // callers fall through to the Git tier.
            return Err(Error::DownloadUnavailable(package_id.to_string()));
        }
        let body: DownloadUrlResponse = response.json().await?;
        if body.url.is_empty() {
            return Err(Error::DownloadUnavailable(package_id.to_string()));
        }

        // The signed URL embeds its own authorization.
        let bytes = self
            .client_raw
            .get(&body.url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }

    /// Upload artifact bytes, confirming on success.
    ///
    /// A 413/429 at any step means the organization's quota is exhausted;
    /// that is deliberately not an error.
    pub async fn upload(
        &self,
        package_id: &PackageId,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<(), Error> {
        let token = self.bearer().await?.ok_or(Error::Unauthenticated)?;

        let url = self.endpoint(&["artifacts"]);
        let hash = hex::encode(Sha256::digest(bytes));
        let request = CreateUploadRequest {
            file_name,
            content_type: "application/gzip",
            size: bytes.len() as u64,
            hash: &hash,
        };
        let response = self
            .client
            .post(url.clone())
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await?;
        if is_quota_exceeded(response.status()) {
            info!("Registry quota exceeded; keeping {package_id} local");
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(Error::Http {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        let created: CreateUploadResponse = response.json().await?;

        if created.upload_url.is_empty() {
            debug!("Registry already holds {package_id}");
            return Ok(());
        }

        let put = self
            .client_raw
            .put(&created.upload_url)
            .header("content-type", "application/gzip")
            .body(bytes.to_vec())
            .send()
            .await?;
        if is_quota_exceeded(put.status()) {
            info!("Registry quota exceeded during upload of {package_id}");
            return Ok(());
        }
        put.error_for_status_ref()?;

        let confirm_url = self.endpoint(&["artifacts", &created.artifact_id, "complete"]);
        let confirm = self
            .client
            .post(confirm_url.clone())
            .bearer_auth(&token)
            .send()
            .await?;
        if is_quota_exceeded(confirm.status()) {
            info!("Registry quota exceeded while confirming {package_id}");
            return Ok(());
        }
        if !confirm.status().is_success() {
            return Err(Error::Http {
                status: confirm.status().as_u16(),
                url: confirm_url.to_string(),
            });
        }
        debug!("Uploaded {package_id} to the registry");
        Ok(())
    }

    /// Fire-and-forget upload. Failures are logged, never surfaced; the
    /// pipeline does not wait for uploads.
    pub fn upload_async(&self, package_id: PackageId, file_name: String, bytes: Vec<u8>) {
        if !self.background_uploads || !self.is_authenticated() {
            return;
        }
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(err) = client.upload(&package_id, &file_name, &bytes).await {
                warn!("Background upload of {package_id} failed: {err}");
            }
        });
    }
}
