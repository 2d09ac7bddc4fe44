//! # HTTP Backend Client
//!
//! reqwest implementation of [`BackendClient`]. Every request carries the credential
//! both as an `apikey` header and as a bearer token.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Url};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{
    BackendClient, ChannelId, ChannelSpec, ClientFactory, ProbeMethod, ProbeRequest,
    ProbeResponse, RealtimeChannel, RealtimeTransport,
};
use crate::error::ClientError;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CONNECTIVITY_PATH: &str = "/rest/v1/";

/// Builds [`HttpBackendClient`]s
#[derive(Clone)]
pub struct HttpClientFactory {
    request_timeout: Duration,
    connectivity_path: String,
    realtime: Option<Arc<dyn RealtimeTransport>>,
}

impl std::fmt::Debug for HttpClientFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClientFactory")
            .field("request_timeout", &self.request_timeout)
            .field("connectivity_path", &self.connectivity_path)
            .field("realtime", &self.realtime.is_some())
            .finish()
    }
}

impl Default for HttpClientFactory {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connectivity_path: DEFAULT_CONNECTIVITY_PATH.to_string(),
            realtime: None,
        }
    }
}

impl HttpClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_connectivity_path(mut self, path: impl Into<String>) -> Self {
        self.connectivity_path = path.into();
        self
    }

    pub fn with_realtime(mut self, transport: Arc<dyn RealtimeTransport>) -> Self {
        self.realtime = Some(transport);
        self
    }
}

impl ClientFactory for HttpClientFactory {
    fn construct(
        &self,
        endpoint: &str,
        credential: &str,
    ) -> Result<Arc<dyn BackendClient>, ClientError> {
        let client = HttpBackendClient::new(
            endpoint,
            credential,
            self.request_timeout,
            self.connectivity_path.clone(),
            self.realtime.clone(),
        )?;
        Ok(Arc::new(client))
    }
}

/// HTTP client bound to one endpoint and credential
pub struct HttpBackendClient {
    client: Client,
    endpoint: String,
    base_url: Url,
    credential: String,
    connectivity_path: String,
    realtime: Option<Arc<dyn RealtimeTransport>>,
}

impl std::fmt::Debug for HttpBackendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackendClient")
            .field("base_url", &self.base_url.as_str())
            .field("realtime", &self.realtime.is_some())
            .finish()
    }
}

impl HttpBackendClient {
    pub fn new(
        endpoint: &str,
        credential: &str,
        request_timeout: Duration,
        connectivity_path: String,
        realtime: Option<Arc<dyn RealtimeTransport>>,
    ) -> Result<Self, ClientError> {
        let base_url = Url::parse(endpoint)
            .map_err(|e| ClientError::Construction(format!("Invalid endpoint URL: {e}")))?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            HeaderName::from_static("apikey"),
            HeaderValue::from_str(credential)
                .map_err(|e| ClientError::Construction(format!("Invalid credential: {e}")))?,
        );
        default_headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {credential}"))
                .map_err(|e| ClientError::Construction(format!("Invalid credential: {e}")))?,
        );

        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(format!("backend-resilience/{}", env!("CARGO_PKG_VERSION")))
            .default_headers(default_headers)
            .build()
            .map_err(|e| ClientError::Construction(format!("Failed to create HTTP client: {e}")))?;

        info!(
            base_url = %base_url,
            timeout_ms = request_timeout.as_millis() as u64,
            realtime = realtime.is_some(),
            "Created backend HTTP client"
        );

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            base_url,
            credential: credential.to_string(),
            connectivity_path,
            realtime,
        })
    }

    fn url_for(&self, path: &str) -> Result<Url, ClientError> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|e| ClientError::Construction(format!("Invalid path {path}: {e}")))
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn credential(&self) -> &str {
        &self.credential
    }

    async fn probe(&self, request: ProbeRequest) -> Result<ProbeResponse, ClientError> {
        let url = self.url_for(&request.path)?;
        let method = match request.method {
            ProbeMethod::Head => Method::HEAD,
            ProbeMethod::Get => Method::GET,
        };

        let mut builder = self.client.request(method, url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        debug!(url = %url, "Probing backend");
        let response = builder
            .send()
            .await
            .map_err(ClientError::from)?;

        Ok(ProbeResponse {
            status: response.status().as_u16(),
        })
    }

    async fn check_connectivity(&self) -> Result<(), ClientError> {
        let url = self.url_for(&self.connectivity_path)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(ClientError::from)?;

        let status = response.status();
        if status.is_success() || status.as_u16() == 404 {
            Ok(())
        } else {
            Err(ClientError::Http {
                status: status.as_u16(),
            })
        }
    }

    async fn open_channel(&self, spec: ChannelSpec) -> Result<RealtimeChannel, ClientError> {
        match &self.realtime {
            Some(transport) => transport.open(&self.endpoint, &self.credential, spec).await,
            None => Err(ClientError::RealtimeUnavailable),
        }
    }

    async fn close_channel(&self, id: ChannelId) {
        if let Some(transport) = &self.realtime {
            transport.close(id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChangeType;

    #[test]
    fn test_invalid_endpoint_rejected() {
        let result = HttpClientFactory::new().construct("not a url", "key");
        assert!(matches!(result, Err(ClientError::Construction(_))));
    }

    #[test]
    fn test_invalid_credential_rejected() {
        let result = HttpClientFactory::new().construct("https://abcd.io", "bad\nkey");
        assert!(matches!(result, Err(ClientError::Construction(_))));
    }

    #[test]
    fn test_url_joining() {
        let client = HttpBackendClient::new(
            "https://abcd.io/",
            "key",
            DEFAULT_REQUEST_TIMEOUT,
            DEFAULT_CONNECTIVITY_PATH.to_string(),
            None,
        )
        .unwrap();
        assert_eq!(
            client.url_for("/rest/v1/").unwrap().as_str(),
            "https://abcd.io/rest/v1/"
        );
    }

    #[tokio::test]
    async fn test_realtime_unavailable_without_transport() {
        let client = HttpClientFactory::new()
            .construct("https://abcd.io", "key")
            .unwrap();
        let result = client
            .open_channel(ChannelSpec {
                name: "tasks:all".to_string(),
                topic: "tasks".to_string(),
                filter: None,
                events: ChangeType::All,
                buffer_size: 16,
            })
            .await;
        assert!(matches!(result, Err(ClientError::RealtimeUnavailable)));
    }
}
