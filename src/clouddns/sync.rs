//! periodic refresh of the published snapshots
//!
//! Every cycle spawns one task per apex group. A task drains the record set
//! listing of each managed zone in its group, imports it into a fresh
//! snapshot and publishes that snapshot before moving to the next shard. A
//! failing group keeps whatever it published before; the cycle reports every
//! failed group once all tasks are done.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use derive_more::{Display, Error, From};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Span};

use crate::clouddns::api::{ApiError, RecordSetLister, ResourceRecordSet};
use crate::clouddns::config::DEFAULT_REFRESH_INTERVAL_SECS;
use crate::clouddns::importer::RecordSetImporter;
use crate::clouddns::store::{ManagedZoneRef, ZoneApexGroup, ZoneStore};
use crate::dns::resolve::Upstream;
use crate::dns::zone::Zone;

#[derive(Debug, Display, From, Error)]
pub enum RefreshError {
    Api(ApiError),
    Task(tokio::task::JoinError),
}

/// Failure of one apex group during a cycle
#[derive(Debug)]
pub struct GroupFailure {
    pub apex: String,
    /// The managed zone being refreshed, unknown if the task itself died
    pub zone_ref: Option<ManagedZoneRef>,
    pub source: RefreshError,
}

impl GroupFailure {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, RefreshError::Api(ApiError::Cancelled))
    }
}

impl fmt::Display for GroupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.zone_ref {
            Some(ref zone_ref) => write!(f, "{} ({}): {}", self.apex, zone_ref, self.source),
            None => write!(f, "{}: {}", self.apex, self.source),
        }
    }
}

/// Every group failure of one cycle
#[derive(Debug)]
pub struct SyncError {
    pub failures: Vec<GroupFailure>,
}

impl SyncError {
    pub fn is_cancelled(&self) -> bool {
        self.failures.iter().any(|failure| failure.is_cancelled())
    }

    pub fn failed_apexes(&self) -> Vec<&str> {
        self.failures.iter().map(|failure| failure.apex.as_str()).collect()
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "errors updating zones: ")?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for SyncError {}

/// Fetch every page of the listing for `zone_ref`
pub async fn drain_record_sets(
    lister: &dyn RecordSetLister,
    zone_ref: &ManagedZoneRef,
) -> Result<Vec<ResourceRecordSet>, ApiError> {
    let mut rrsets = Vec::new();
    let mut token: Option<String> = None;

    loop {
        let page = lister
            .list_record_sets(&zone_ref.project, &zone_ref.managed_zone, token.as_deref())
            .await?;
        rrsets.extend(page.rrsets.iter().cloned());

        match page.next_token() {
            Some(next) if token.as_deref() == Some(next) => {
                return Err(ApiError::Decode(format!(
                    "page token {} repeated for {}",
                    next, zone_ref
                )));
            }
            Some(next) => token = Some(next.to_string()),
            None => break,
        }
    }

    Ok(rrsets)
}

/// State shared with the per-group refresh tasks
#[derive(Clone)]
struct GroupRefresher {
    store: Arc<ZoneStore>,
    lister: Arc<dyn RecordSetLister>,
    importer: Arc<RecordSetImporter>,
    upstream: Option<Arc<dyn Upstream>>,
    span: Span,
}

impl GroupRefresher {
    async fn refresh(
        self,
        group: ZoneApexGroup,
        cancel: CancellationToken,
    ) -> Result<usize, GroupFailure> {
        let mut records = 0;

        for (index, zone_ref) in group.refs.iter().enumerate() {
            let listed = tokio::select! {
                _ = cancel.cancelled() => Err(ApiError::Cancelled),
                listed = drain_record_sets(self.lister.as_ref(), zone_ref) => listed,
            };

            let rrsets = listed.map_err(|e| GroupFailure {
                apex: group.apex.clone(),
                zone_ref: Some(zone_ref.clone()),
                source: RefreshError::Api(e),
            })?;

            let mut snapshot = Zone::new(&group.apex).with_upstream(self.upstream.clone());
            let summary = self.importer.import(&rrsets, &mut snapshot);
            records += summary.records;

            self.store.publish(&group.apex, index, snapshot);
            debug!(
                parent: &self.span,
                zone = %group.apex,
                managed_zone = %zone_ref,
                records = summary.records,
                skipped = summary.skipped,
                "Published zone snapshot"
            );
        }

        Ok(records)
    }
}

pub struct ZoneSynchronizer {
    refresher: GroupRefresher,
    interval: Duration,
    cycle: Mutex<()>,
}

impl ZoneSynchronizer {
    pub fn new(store: Arc<ZoneStore>, lister: Arc<dyn RecordSetLister>, span: Span) -> ZoneSynchronizer {
        ZoneSynchronizer {
            refresher: GroupRefresher {
                store,
                lister,
                importer: Arc::new(RecordSetImporter::new(span.clone())),
                upstream: None,
                span,
            },
            interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
            cycle: Mutex::new(()),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> ZoneSynchronizer {
        self.interval = interval;
        self
    }

    /// Upstream handed to every snapshot built from now on
    pub fn with_upstream(mut self, upstream: Option<Arc<dyn Upstream>>) -> ZoneSynchronizer {
        self.refresher.upstream = upstream;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn store(&self) -> &Arc<ZoneStore> {
        &self.refresher.store
    }

    /// Run one refresh cycle over all groups
    ///
    /// Cycles never overlap: a call made while another cycle runs waits for
    /// it to finish first. Dropping the returned future aborts the refresh
    /// tasks it spawned.
    pub async fn sync_once(&self, cancel: &CancellationToken) -> Result<(), SyncError> {
        let _cycle = self.cycle.lock().await;
        let span = &self.refresher.span;

        let mut tasks = JoinSet::new();
        let mut spawned = HashMap::new();
        for (index, group) in self.refresher.store.groups().cloned().enumerate() {
            let apex = group.apex.clone();
            let handle = tasks.spawn(
                self.refresher
                    .clone()
                    .refresh(group, cancel.child_token()),
            );
            spawned.insert(handle.id(), (index, apex));
        }

        let mut failures = Vec::new();
        let mut records = 0;
        while let Some(outcome) = tasks.join_next_with_id().await {
            let (id, failure) = match outcome {
                Ok((_, Ok(count))) => {
                    records += count;
                    continue;
                }
                Ok((id, Err(failure))) => (id, failure),
                Err(e) => {
                    let id = e.id();
                    let apex = spawned
                        .get(&id)
                        .map(|(_, apex)| apex.clone())
                        .unwrap_or_default();
                    let failure = GroupFailure {
                        apex,
                        zone_ref: None,
                        source: RefreshError::Task(e),
                    };
                    (id, failure)
                }
            };
            let index = spawned.get(&id).map(|(index, _)| *index).unwrap_or(usize::MAX);
            failures.push((index, failure));
        }

        // report in configuration order, not completion order
        failures.sort_by_key(|(index, _)| *index);
        let failures: Vec<GroupFailure> = failures.into_iter().map(|(_, failure)| failure).collect();

        info!(
            parent: span,
            groups = self.refresher.store.apexes().len(),
            failed = failures.len(),
            records,
            "Zone refresh cycle finished"
        );

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SyncError { failures })
        }
    }

    /// Refresh on every interval tick until `cancel` fires
    ///
    /// The first tick is one interval away; the initial population is the
    /// caller's job. Failed cycles are logged and the loop carries on.
    pub async fn run_forever(self: Arc<Self>, cancel: CancellationToken) {
        let span = self.refresher.span.clone();
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            parent: &span,
            interval_secs = self.interval.as_secs(),
            "Starting zone refresh loop"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(parent: &span, "Zone refresh loop stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sync_once(&cancel).await {
                        if cancel.is_cancelled() || e.is_cancelled() {
                            debug!(parent: &span, "Zone refresh interrupted: {}", e);
                        } else {
                            error!(parent: &span, failed = ?e.failed_apexes(), "{}", e);
                        }
                    }
                }
            }
        }
    }
}
