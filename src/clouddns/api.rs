//! contract with the remote zone management service
//!
//! The synchronizer only ever sees these two traits. `http::CloudDnsHttpClient`
//! implements both against the provider's REST API; tests provide in-memory
//! implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The request did not reach the service or the connection failed
    Transport(String),
    /// The service answered with a non-success status
    Status { code: u16, message: String },
    /// The response body could not be decoded
    Decode(String),
    /// The managed zone does not exist in the given project
    NotFound { project: String, managed_zone: String },
    /// The call was abandoned because the owning task was cancelled
    Cancelled,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Transport(e) => write!(f, "transport error: {}", e),
            ApiError::Status { code, message } => write!(f, "status {}: {}", code, message),
            ApiError::Decode(e) => write!(f, "invalid response: {}", e),
            ApiError::NotFound {
                project,
                managed_zone,
            } => write!(f, "managed zone {} not found in {}", managed_zone, project),
            ApiError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for ApiError {}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Managed zone descriptor, only the fields in use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedZone {
    pub name: String,
    pub dns_name: String,
}

/// One resource record set as listed by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecordSet {
    pub name: String,
    #[serde(rename = "type")]
    pub rtype: String,
    #[serde(default)]
    pub ttl: u32,
    #[serde(default)]
    pub rrdatas: Vec<String>,
}

impl ResourceRecordSet {
    pub fn new(name: &str, rtype: &str, ttl: u32, rrdatas: &[&str]) -> ResourceRecordSet {
        ResourceRecordSet {
            name: name.to_string(),
            rtype: rtype.to_string(),
            ttl,
            rrdatas: rrdatas.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// One page of a record set listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSetPage {
    #[serde(default)]
    pub rrsets: Vec<ResourceRecordSet>,
    /// Continuation token; absent or empty on the last page
    #[serde(default)]
    pub next_page_token: Option<String>,
}

impl RecordSetPage {
    pub fn next_token(&self) -> Option<&str> {
        self.next_page_token
            .as_deref()
            .filter(|token| !token.is_empty())
    }
}

#[async_trait]
pub trait ManagedZoneLookup: Send + Sync {
    async fn get_managed_zone(&self, project: &str, managed_zone: &str) -> Result<ManagedZone>;
}

#[async_trait]
pub trait RecordSetLister: Send + Sync {
    /// Fetch one page of record sets, starting at `page_token` when given
    async fn list_record_sets(
        &self,
        project: &str,
        managed_zone: &str,
        page_token: Option<&str>,
    ) -> Result<RecordSetPage>;
}
