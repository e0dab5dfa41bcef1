use thiserror::Error;

use crate::auth::AuthError;

#[derive(Debug, Error)]
pub enum Error {
    /// An invalid URL was provided or produced.
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),

    #[error("not authenticated with the registry")]
    Unauthenticated,

    /// The artifact was not found in the registry.
    #[error("artifact `{0}` was not found in the registry")]
    ArtifactNotFound(String),

    /// The registry acknowledged the artifact but could not issue a
    /// download URL. Callers treat this like a miss.
    #[error("registry could not provide a download URL for `{0}`")]
    DownloadUnavailable(String),

    #[error("registry returned HTTP {status} for {url}")]
    Http { status: u16, url: String },

    /// A transport-level request error.
    #[error(transparent)]
    Request(#[from] reqwest::Error),

    /// A request error raised by the middleware stack.
    #[error(transparent)]
    RequestMiddleware(#[from] reqwest_middleware::Error),

    #[error("received unexpected JSON from {url}")]
    BadJson {
        source: serde_json::Error,
        url: String,
    },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
