//! HTTP client wrapper for downloading archive files.

use crate::auth::CloudAuth;
use crate::error::{CloudError, Result};
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// HTTP client for whole-file downloads.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client; `connect_timeout` bounds connection setup.
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Download a file.
    ///
    /// A 404 is reported as [`CloudError::NotFound`]; other non-success
    /// statuses as [`CloudError::Status`].
    pub async fn get(&self, url: &str, auth: &dyn CloudAuth, timeout: Duration) -> Result<Vec<u8>> {
        let mut auth_headers = Vec::new();
        auth.sign_request(url, "GET", &mut auth_headers)?;

        let mut req = self.client.get(url).timeout(timeout);
        for (key, value) in &auth_headers {
            req = req.header(key.as_str(), value.as_str());
        }

        let resp = req.send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CloudError::NotFound {
                what: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(CloudError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = resp.bytes().await?;
        Ok(bytes.to_vec())
    }

    /// Download several files concurrently, keeping input order.
    pub async fn get_many(
        &self,
        urls: &[String],
        auth: &dyn CloudAuth,
        timeout: Duration,
    ) -> Vec<Result<Vec<u8>>> {
        use futures::stream::{FuturesOrdered, StreamExt};

        let mut futs = FuturesOrdered::new();
        for url in urls {
            futs.push_back(self.get(url, auth, timeout));
        }
        futs.collect().await
    }
}
