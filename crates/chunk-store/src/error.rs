use reqwest::StatusCode;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The prefix matched zero objects. Distinct from transport failures so
    /// callers can treat an absent stream differently from a broken store.
    #[error("no objects found under prefix `{prefix}`")]
    NotFound { prefix: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("malformed store response: {reason}")]
    InvalidResponse { reason: String },

    #[error("upload rejected: {reason}")]
    Upload { reason: String },

    #[error("store configuration error: {reason}")]
    Configuration { reason: String },
}

impl StoreError {
    pub fn not_found(prefix: impl Into<String>) -> Self {
        Self::NotFound {
            prefix: prefix.into(),
        }
    }

    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Whether a retry could plausibly succeed. Listing and fetching retry
    /// on these; uploads never retry internally.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { source } => source.is_timeout() || source.is_connect(),
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}
