//! upstream resolution used to complete answers whose CNAME chain leaves the
//! locally held zone data

use async_trait::async_trait;

use crate::dns::protocol::{DnsRecord, QueryType, ResultCode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// No upstream server answered in time
    Timeout,
    /// The upstream server answered with an error code
    Failed(ResultCode),
    /// Transport level failure
    Io(String),
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamError::Timeout => write!(f, "Upstream query timed out"),
            UpstreamError::Failed(code) => write!(f, "Upstream answered {:?}", code),
            UpstreamError::Io(e) => write!(f, "Upstream IO error: {}", e),
        }
    }
}

impl std::error::Error for UpstreamError {}

/// Resolver consulted for names outside of the authoritative data
///
/// The transport behind it belongs to the host; the zone engine only hands
/// over the name it could not complete locally.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Resolve `qname` and return the answer section
    async fn resolve(&self, qname: &str, qtype: QueryType) -> Result<Vec<DnsRecord>, UpstreamError>;
}
