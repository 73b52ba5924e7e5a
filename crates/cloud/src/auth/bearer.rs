//! Bearer token authentication.
//!
//! The token is read from an environment variable so credentials never end
//! up in configuration files.

use crate::auth::CloudAuth;
use crate::error::{CloudError, Result};

/// Environment variable read by [`BearerToken::from_env`] when none is given.
pub const DEFAULT_TOKEN_VAR: &str = "ZONESTATS_TOKEN";

/// Adds `Authorization: Bearer <token>` to every request.
#[derive(Clone)]
pub struct BearerToken {
    token: String,
}

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Load the token from `var`.
    pub fn from_env(var: &str) -> Result<Self> {
        let token = std::env::var(var).map_err(|_| CloudError::Auth(format!("{} not set", var)))?;
        if token.trim().is_empty() {
            return Err(CloudError::Auth(format!("{} is empty", var)));
        }
        Ok(Self::new(token.trim()))
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerToken").field("token", &"***").finish()
    }
}

impl CloudAuth for BearerToken {
    fn sign_request(
        &self,
        _url: &str,
        _method: &str,
        headers: &mut Vec<(String, String)>,
    ) -> Result<()> {
        headers.push(("Authorization".to_string(), format!("Bearer {}", self.token)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adds_header() {
        let auth = BearerToken::new("abc");
        let mut headers = Vec::new();
        auth.sign_request("https://x", "GET", &mut headers).unwrap();
        assert_eq!(headers, vec![("Authorization".to_string(), "Bearer abc".to_string())]);
    }

    #[test]
    fn test_missing_env_var() {
        let err = BearerToken::from_env("ZONESTATS_TEST_TOKEN_THAT_IS_NOT_SET").unwrap_err();
        assert!(matches!(err, CloudError::Auth(_)));
    }

    #[test]
    fn test_debug_hides_token() {
        let auth = BearerToken::new("secret");
        assert!(!format!("{:?}", auth).contains("secret"));
    }
}
