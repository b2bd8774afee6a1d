//! Authenticated POST to an upstream, shared by every adapter.

use std::time::Duration;

use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};

use crate::credentials::ProviderCredentials;
use crate::error::{Error, Result};
use crate::proxy::types::UpstreamPayload;

pub const REFERER_HEADER: &str = "HTTP-Referer";
pub const TITLE_HEADER: &str = "X-Title";

/// One upstream endpoint plus the client used to reach it.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    url: String,
    first_byte_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(client: reqwest::Client, url: String, first_byte_timeout: Duration) -> Self {
        Self {
            client,
            url,
            first_byte_timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send `payload` and wait for response headers.
    ///
    /// The wait, including reading an error body, is bounded by the
    /// first-byte timeout. The body of a successful response is left unread.
    pub async fn send(
        &self,
        payload: &UpstreamPayload,
        credentials: &ProviderCredentials,
        accept: Option<&'static str>,
    ) -> Result<reqwest::Response> {
        let request = self.build_request(payload, credentials, accept)?;
        let provider = credentials.provider.as_str();

        let exchange = async {
            let response = request.send().await.map_err(|e| {
                tracing::error!(provider = %provider, error = %e, "Failed to reach provider");
                Error::from(e)
            })?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(
                        provider = %provider,
                        status = %status,
                        error = %e,
                        "Failed to read rejection body from provider"
                    );
                    String::new()
                }
            };
            tracing::warn!(
                provider = %provider,
                status = %status,
                body = %body,
                "Provider rejected request"
            );
            Err(Error::UpstreamRejected {
                status: status.as_u16(),
                body,
            })
        };

        tokio::time::timeout(self.first_byte_timeout, exchange)
            .await
            .map_err(|_| {
                tracing::error!(
                    provider = %provider,
                    timeout_secs = self.first_byte_timeout.as_secs(),
                    "Provider did not respond in time"
                );
                Error::Network(format!(
                    "no response from provider '{}' within {}s",
                    provider,
                    self.first_byte_timeout.as_secs()
                ))
            })?
    }

    fn build_request(
        &self,
        payload: &UpstreamPayload,
        credentials: &ProviderCredentials,
        accept: Option<&'static str>,
    ) -> Result<reqwest::RequestBuilder> {
        let mut auth =
            HeaderValue::from_str(&format!("Bearer {}", credentials.api_key.expose_secret()))
                .map_err(|_| {
                    Error::Configuration(format!(
                        "API key for provider '{}' is not a valid header value.",
                        credentials.provider
                    ))
                })?;
        auth.set_sensitive(true);

        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, auth)
            .json(payload);

        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        if let Some(referer) = &credentials.referer {
            request = request.header(REFERER_HEADER, referer.as_str());
        }
        if let Some(title) = &credentials.title {
            request = request.header(TITLE_HEADER, title.as_str());
        }

        Ok(request)
    }
}
