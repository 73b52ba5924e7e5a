//! Authentication for remote layer archives.

mod bearer;
mod none;

pub use bearer::BearerToken;
pub use none::NoAuth;

use crate::error::Result;

/// Trait for signing HTTP requests to remote archives.
///
/// Implementations add authentication headers (e.g. Bearer tokens)
/// to outgoing requests before they are sent.
pub trait CloudAuth: Send + Sync {
    /// Sign a request by adding authentication headers.
    ///
    /// `url` is the full request URL, `headers` is a mutable list where
    /// auth headers should be inserted.
    fn sign_request(
        &self,
        url: &str,
        method: &str,
        headers: &mut Vec<(String, String)>,
    ) -> Result<()>;
}
