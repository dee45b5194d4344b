//! HTTP source retrieval.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use dataflow_shared::{DataflowError, Fetcher, Result};

/// User-Agent string for source requests.
const USER_AGENT: &str = concat!("dataflow/", env!("CARGO_PKG_VERSION"));

/// Fetches `<base_url>/<source id>` over HTTP(S).
pub struct HttpFetcher {
    client: Client,
    base_url: Url,
}

impl HttpFetcher {
    /// Create a fetcher rooted at `base_url`.
    ///
    /// A trailing slash is added to the base if missing so that source ids
    /// resolve beneath it instead of replacing its last path segment.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| DataflowError::config(format!("invalid base URL '{base_url}': {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()
            .map_err(|e| DataflowError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    fn resolve(&self, source_id: &str) -> Result<Url> {
        self.base_url
            .join(source_id)
            .map_err(|e| DataflowError::retrieval(source_id, format!("invalid source id: {e}")))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self))]
    async fn get(&self, source_id: &str) -> Result<Vec<u8>> {
        let url = self.resolve(source_id)?;
        debug!(%url, "downloading");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| DataflowError::retrieval(source_id, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DataflowError::retrieval(source_id, format!("HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DataflowError::retrieval(source_id, format!("body read failed: {e}")))?;

        debug!(%url, bytes = body.len(), "finished downloading");
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_without_trailing_slash_keeps_last_segment() {
        let f = HttpFetcher::new("https://bucket.example.com/data", Duration::from_secs(5)).unwrap();
        let url = f.resolve("products-1.jsonl").unwrap();
        assert_eq!(url.as_str(), "https://bucket.example.com/data/products-1.jsonl");
    }

    #[test]
    fn invalid_base_url_is_config_error() {
        let err = HttpFetcher::new("not a url", Duration::from_secs(5))
            .err()
            .expect("should fail");
        assert!(matches!(err, DataflowError::Config { .. }));
    }

    #[tokio::test]
    async fn fetches_body_from_mock_server() {
        let server = wiremock::MockServer::start().await;
        let body = "{\"id\":1}\n{\"id\":2}\n";

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/data/products-1.jsonl"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let fetcher =
            HttpFetcher::new(&format!("{}/data", server.uri()), Duration::from_secs(5)).unwrap();
        let bytes = fetcher.get("products-1.jsonl").await.unwrap();
        assert_eq!(bytes, body.as_bytes());
    }

    #[tokio::test]
    async fn non_success_status_is_retrieval_error() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::path("/missing.jsonl"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let err = fetcher.get("missing.jsonl").await.unwrap_err();
        match err {
            DataflowError::Retrieval { source_id, message } => {
                assert_eq!(source_id, "missing.jsonl");
                assert!(message.contains("404"));
            }
            other => panic!("expected retrieval error, got {other:?}"),
        }
    }
}
