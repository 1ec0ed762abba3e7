//! Authoritative answers for zones mirrored from a Cloud DNS service
//!
//! `CloudDns` wires the pieces together:
//!
//! * `store` - the published snapshot of every managed zone, grouped by apex
//! * `sync` - the refresh cycle rebuilding those snapshots from the remote API
//! * `handler` - the query handler reading them
//! * `importer` - record set to zone record conversion used by the refresh
//! * `api` / `http` - the remote service contract and its REST client
//! * `config` - the zone bindings and serving options

/// Remote zone management API contract
pub mod api;

/// Configuration of the mirrored zones
pub mod config;

/// Query handling
pub mod handler;

/// REST client for the remote API
pub mod http;

/// Record set import
pub mod importer;

/// Published zone snapshots
pub mod store;

/// Periodic refresh
pub mod sync;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use derive_more::{Display, Error, From};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Span};

use crate::clouddns::api::{ApiError, ManagedZoneLookup, RecordSetLister};
use crate::clouddns::config::{CloudDnsConfig, ConfigError};
use crate::clouddns::handler::{DnsHandler, HandlerError, QueryServer, ResponseWriter};
use crate::clouddns::store::{ManagedZoneRef, ZoneApexGroup, ZoneStore};
use crate::clouddns::sync::{SyncError, ZoneSynchronizer};
use crate::dns::logging::component_span;
use crate::dns::names::normalize_name;
use crate::dns::protocol::{DnsPacket, ResultCode};
use crate::dns::resolve::Upstream;

#[derive(Debug, Display, From, Error)]
pub enum SetupError {
    Config(ConfigError),
    Api(ApiError),
    Sync(SyncError),
}

type Result<T> = std::result::Result<T, SetupError>;

pub struct CloudDns {
    store: Arc<ZoneStore>,
    synchronizer: Arc<ZoneSynchronizer>,
    server: QueryServer,
    span: Span,
}

impl CloudDns {
    /// Validate `config` and resolve the apex of every configured zone
    ///
    /// `upstream` is the resolver built by the host from
    /// `CloudDnsConfig::upstream_addrs`; it is required when the
    /// configuration lists upstream addresses. Every matched query gets
    /// SERVFAIL until `start` has populated the zones.
    pub async fn new(
        config: &CloudDnsConfig,
        lookup: Arc<dyn ManagedZoneLookup>,
        lister: Arc<dyn RecordSetLister>,
        upstream: Option<Arc<dyn Upstream>>,
    ) -> Result<CloudDns> {
        CloudDns::with_parts(config, lookup, lister, upstream, component_span("clouddns")).await
    }

    /// Like `new`, with events emitted under `span`
    pub async fn with_parts(
        config: &CloudDnsConfig,
        lookup: Arc<dyn ManagedZoneLookup>,
        lister: Arc<dyn RecordSetLister>,
        upstream: Option<Arc<dyn Upstream>>,
        span: Span,
    ) -> Result<CloudDns> {
        config.validate()?;
        if upstream.is_none() && !config.upstream.is_empty() {
            return Err(ConfigError::MissingUpstream.into());
        }

        let mut bindings = Vec::with_capacity(config.zones.len());
        for binding in &config.zones {
            let managed = lookup
                .get_managed_zone(&binding.project, &binding.managed_zone)
                .await
                .map_err(|e| {
                    error!(
                        parent: &span,
                        project = %binding.project,
                        managed_zone = %binding.managed_zone,
                        "Failed to look up managed zone: {}", e
                    );
                    e
                })?;

            let apex = normalize_name(&managed.dns_name);
            if let Some(ref hint) = binding.apex {
                if normalize_name(hint) != apex {
                    warn!(
                        parent: &span,
                        managed_zone = %binding.managed_zone,
                        configured = %hint,
                        reported = %managed.dns_name,
                        "Configured apex differs from the managed zone, using the reported one"
                    );
                }
            }

            bindings.push((
                apex,
                ManagedZoneRef::new(&binding.project, &binding.managed_zone),
            ));
        }

        let groups = ZoneApexGroup::group_by_apex(bindings);
        let store = Arc::new(ZoneStore::new(groups, upstream.clone()));

        let synchronizer = ZoneSynchronizer::new(store.clone(), lister, span.clone())
            .with_interval(Duration::from_secs(config.refresh_interval_secs))
            .with_upstream(upstream);

        let server =
            QueryServer::new(store.clone(), span.clone()).with_fallthrough(config.fallthrough());

        info!(
            parent: &span,
            zones = ?store.apexes(),
            managed_zones = config.zones.len(),
            upstream = ?config.upstream,
            "Cloud DNS zones configured"
        );

        Ok(CloudDns {
            store,
            synchronizer: Arc::new(synchronizer),
            server,
            span,
        })
    }

    /// Handler receiving the queries this one declines or falls through on
    pub fn with_next(mut self, next: Option<Arc<dyn DnsHandler>>) -> CloudDns {
        self.server = self.server.with_next(next);
        self
    }

    pub fn store(&self) -> &Arc<ZoneStore> {
        &self.store
    }

    pub fn synchronizer(&self) -> &Arc<ZoneSynchronizer> {
        &self.synchronizer
    }

    pub fn server(&self) -> &QueryServer {
        &self.server
    }

    /// Populate every zone, then keep refreshing in the background
    ///
    /// Any failure of the initial population is returned and nothing is
    /// spawned. The refresh loop ends when `cancel` fires.
    pub async fn start(&self, cancel: CancellationToken) -> Result<JoinHandle<()>> {
        self.synchronizer.sync_once(&cancel).await?;

        info!(parent: &self.span, "Initial zone population complete");

        let synchronizer = self.synchronizer.clone();
        Ok(tokio::spawn(synchronizer.run_forever(cancel)))
    }
}

#[async_trait]
impl DnsHandler for CloudDns {
    async fn serve_dns(
        &self,
        writer: &mut dyn ResponseWriter,
        request: &DnsPacket,
    ) -> std::result::Result<ResultCode, HandlerError> {
        self.server.handle(writer, request).await
    }
}
