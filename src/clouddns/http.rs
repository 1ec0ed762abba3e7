//! REST client for the Cloud DNS v1 API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;

use crate::clouddns::api::{
    ApiError, ManagedZone, ManagedZoneLookup, RecordSetLister, RecordSetPage, Result,
};

pub const DEFAULT_ENDPOINT: &str = "https://dns.googleapis.com/dns/v1/";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

/// API client authorized by an already acquired bearer token
pub struct CloudDnsHttpClient {
    endpoint: Url,
    token: String,
    client: reqwest::Client,
}

impl CloudDnsHttpClient {
    pub fn new(token: &str) -> Result<CloudDnsHttpClient> {
        CloudDnsHttpClient::with_endpoint(DEFAULT_ENDPOINT, token)
    }

    pub fn with_endpoint(endpoint: &str, token: &str) -> Result<CloudDnsHttpClient> {
        let endpoint = Url::parse(endpoint).map_err(|e| ApiError::Transport(e.to_string()))?;
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(CloudDnsHttpClient {
            endpoint,
            token: token.to_string(),
            client,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Transport(format!("invalid endpoint {}", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, query: &[(&str, &str)]) -> Result<T> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                code: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl ManagedZoneLookup for CloudDnsHttpClient {
    async fn get_managed_zone(&self, project: &str, managed_zone: &str) -> Result<ManagedZone> {
        let url = self.url(&["projects", project, "managedZones", managed_zone])?;

        match self.get_json(url, &[]).await {
            Err(ApiError::Status { code, .. }) if code == StatusCode::NOT_FOUND.as_u16() => {
                Err(ApiError::NotFound {
                    project: project.to_string(),
                    managed_zone: managed_zone.to_string(),
                })
            }
            other => other,
        }
    }
}

#[async_trait]
impl RecordSetLister for CloudDnsHttpClient {
    async fn list_record_sets(
        &self,
        project: &str,
        managed_zone: &str,
        page_token: Option<&str>,
    ) -> Result<RecordSetPage> {
        let url = self.url(&["projects", project, "managedZones", managed_zone, "rrsets"])?;

        match page_token {
            Some(token) => self.get_json(url, &[("pageToken", token)]).await,
            None => self.get_json(url, &[]).await,
        }
    }
}
