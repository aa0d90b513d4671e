//! Google Programmable Search (Custom Search JSON API) adapter

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::{SearchHit, SearchProvider, UpstreamError};
use crate::{Error, Result};

const CUSTOM_SEARCH_URL: &str = "https://www.googleapis.com/customsearch/v1";

/// Results per call; the API caps `num` at 10
const MAX_RESULTS: usize = 10;

pub struct GoogleSearchClient {
    client: Client,
    api_key: String,
    engine_id: String,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    title: String,
    link: String,
    #[serde(default)]
    snippet: String,
}

impl GoogleSearchClient {
    pub fn new(api_key: &str, engine_id: &str, timeout: Duration) -> Result<Self> {
        if api_key.trim().is_empty() || engine_id.trim().is_empty() {
            return Err(Error::Config(
                "Google search requires both an API key and an engine id".to_string(),
            ));
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key: api_key.trim().to_string(),
            engine_id: engine_id.trim().to_string(),
            endpoint: CUSTOM_SEARCH_URL.to_string(),
        })
    }

    /// Point at a different endpoint (local stubs)
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    fn query_params<'a>(&'a self, query: &'a str, domain_filter: Option<&'a str>) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("key", self.api_key.clone()),
            ("cx", self.engine_id.clone()),
            ("q", query.to_string()),
            ("num", MAX_RESULTS.to_string()),
        ];
        if let Some(site) = domain_filter.filter(|d| !d.is_empty()) {
            params.push(("siteSearch", site.to_string()));
            params.push(("siteSearchFilter", "i".to_string()));
        }
        params
    }
}

#[async_trait]
impl SearchProvider for GoogleSearchClient {
    async fn search(
        &self,
        query: &str,
        domain_filter: Option<&str>,
    ) -> std::result::Result<Vec<SearchHit>, UpstreamError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&self.query_params(query, domain_filter))
            .send()
            .await
            .map_err(UpstreamError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(status.as_u16(), &body));
        }

        let data: SearchResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Malformed(format!("search response: {}", e)))?;

        Ok(data
            .items
            .into_iter()
            .map(|item| SearchHit {
                title: item.title,
                url: item.link,
                content: item.snippet,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_credentials() {
        assert!(GoogleSearchClient::new("", "cx", Duration::from_secs(1)).is_err());
        assert!(GoogleSearchClient::new("key", " ", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_site_restriction_params() {
        let client = GoogleSearchClient::new("key", "cx", Duration::from_secs(1)).unwrap();

        let params = client.query_params("rates", Some("cnyes.com"));
        assert!(params.contains(&("siteSearch", "cnyes.com".to_string())));

        let params = client.query_params("rates", None);
        assert!(params.iter().all(|(k, _)| *k != "siteSearch"));
    }

    #[test]
    fn test_response_without_items() {
        let data: SearchResponse =
            serde_json::from_str(r#"{"kind":"customsearch#search","searchInformation":{"totalResults":"0"}}"#)
                .unwrap();
        assert!(data.items.is_empty());
    }
}
