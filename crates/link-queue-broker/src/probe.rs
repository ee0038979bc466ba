use async_trait::async_trait;
use reqwest::{Client, Method};
use std::time::Duration;
use tracing::debug;

/// Answers whether the external linking worker looks reachable right now.
///
/// Advisory only: a `true` does not guarantee the next attempt succeeds.
#[async_trait]
pub trait AvailabilityProbe: Send + Sync {
    async fn is_available(&self) -> bool;
}

/// Probe that sends one HTTP request and treats any 2xx as available
pub struct HttpProbe {
    client: Client,
    method: Method,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, method: Method, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(HttpProbe {
            client,
            method,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AvailabilityProbe for HttpProbe {
    async fn is_available(&self) -> bool {
        match self.client.request(self.method.clone(), &self.url).send().await {
            Ok(response) => {
                let status = response.status();
                debug!(url = %self.url, %status, "Availability probe answered");
                status.is_success()
            }
            Err(e) => {
                debug!(url = %self.url, "Availability probe failed: {}", e);
                false
            }
        }
    }
}
