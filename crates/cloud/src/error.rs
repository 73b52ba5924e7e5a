//! Error types for catalog access and remote backends.

use thiserror::Error;

/// Errors produced by layer backends and the HTTP layer.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} fetching {url}")]
    Status { status: u16, url: String },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("core error: {0}")]
    Core(#[from] zonestats_core::Error),
}

impl CloudError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            CloudError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            CloudError::Status { status, .. } => *status == 429 || *status >= 500,
            CloudError::Network(_) => true,
            _ => false,
        }
    }
}

impl From<CloudError> for zonestats_core::Error {
    fn from(err: CloudError) -> Self {
        match err {
            CloudError::NotFound { .. } => zonestats_core::Error::DataGap {
                dataset: String::new(),
                period: String::new(),
            },
            CloudError::Core(e) => e,
            other => zonestats_core::Error::RemoteService(other.to_string()),
        }
    }
}

/// Result alias for cloud operations.
pub type Result<T> = std::result::Result<T, CloudError>;

#[cfg(test)]
mod tests {
    use super::*;
    use zonestats_core::ErrorKind;

    #[test]
    fn test_conversion_to_taxonomy() {
        let gap: zonestats_core::Error = CloudError::NotFound {
            what: "tile N00E020".into(),
        }
        .into();
        assert_eq!(gap.kind(), ErrorKind::DataGap);

        let remote: zonestats_core::Error = CloudError::Status {
            status: 503,
            url: "https://example.org/t.tif".into(),
        }
        .into();
        assert_eq!(remote.kind(), ErrorKind::RemoteService);

        let core: zonestats_core::Error =
            CloudError::Core(zonestats_core::Error::Geometry("x".into())).into();
        assert_eq!(core.kind(), ErrorKind::Geometry);
    }

    #[test]
    fn test_transient_statuses() {
        let status = |s| CloudError::Status {
            status: s,
            url: String::new(),
        };
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(403).is_transient());
        assert!(!CloudError::NotFound { what: "x".into() }.is_transient());
    }
}
