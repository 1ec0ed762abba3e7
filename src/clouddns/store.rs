//! published zone snapshots, grouped by apex
//!
//! The set of apex groups is fixed when the store is built. Each group owns
//! its shard table behind its own lock: readers hold the shared lock for one
//! lookup, the synchronizer takes the exclusive lock only to replace a single
//! `Arc<ZoneSnapshot>`. Snapshots are never modified after publication.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::dns::names::normalize_name;
use crate::dns::protocol::QueryType;
use crate::dns::resolve::Upstream;
use crate::dns::zone::{LookupResult, Zone};

/// Queryable record data of one managed zone at one point in time
pub type ZoneSnapshot = Zone;

/// Identifies a managed zone in the remote service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManagedZoneRef {
    pub project: String,
    pub managed_zone: String,
}

impl ManagedZoneRef {
    pub fn new(project: &str, managed_zone: &str) -> ManagedZoneRef {
        ManagedZoneRef {
            project: project.to_string(),
            managed_zone: managed_zone.to_string(),
        }
    }
}

impl fmt::Display for ManagedZoneRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project, self.managed_zone)
    }
}

/// Managed zones sharing one apex, in answer precedence order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneApexGroup {
    pub apex: String,
    pub refs: Vec<ManagedZoneRef>,
}

impl ZoneApexGroup {
    /// Groups `(apex, ref)` pairs by apex, keeping first appearance order
    /// for both the groups and the refs inside each group.
    pub fn group_by_apex<I>(bindings: I) -> Vec<ZoneApexGroup>
    where
        I: IntoIterator<Item = (String, ManagedZoneRef)>,
    {
        let mut groups: Vec<ZoneApexGroup> = Vec::new();

        for (apex, zone_ref) in bindings {
            let apex = normalize_name(&apex);
            match groups.iter_mut().find(|group| group.apex == apex) {
                Some(group) => {
                    if !group.refs.contains(&zone_ref) {
                        group.refs.push(zone_ref);
                    }
                }
                None => groups.push(ZoneApexGroup {
                    apex,
                    refs: vec![zone_ref],
                }),
            }
        }

        groups
    }
}

/// Result of a group lookup along with the upstream of the answering shard
pub struct GroupAnswer {
    pub result: LookupResult,
    pub upstream: Option<Arc<dyn Upstream>>,
}

#[derive(Clone)]
struct Shard {
    snapshot: Arc<ZoneSnapshot>,
    refreshed_at: Option<SystemTime>,
}

struct GroupEntry {
    group: ZoneApexGroup,
    shards: RwLock<Vec<Shard>>,
}

pub struct ZoneStore {
    entries: BTreeMap<String, GroupEntry>,
    apexes: Vec<String>,
}

impl ZoneStore {
    /// Builds a store with an empty snapshot for every managed zone
    pub fn new(groups: Vec<ZoneApexGroup>, upstream: Option<Arc<dyn Upstream>>) -> ZoneStore {
        let mut entries = BTreeMap::new();
        let mut apexes = Vec::new();

        for group in groups {
            let shards = group
                .refs
                .iter()
                .map(|_| Shard {
                    snapshot: Arc::new(Zone::new(&group.apex).with_upstream(upstream.clone())),
                    refreshed_at: None,
                })
                .collect();

            apexes.push(group.apex.clone());
            entries.insert(
                group.apex.clone(),
                GroupEntry {
                    group,
                    shards: RwLock::new(shards),
                },
            );
        }

        ZoneStore { entries, apexes }
    }

    /// Apex names in configuration order
    pub fn apexes(&self) -> &[String] {
        &self.apexes
    }

    pub fn groups(&self) -> impl Iterator<Item = &ZoneApexGroup> {
        self.apexes
            .iter()
            .filter_map(move |apex| self.entries.get(apex))
            .map(|entry| &entry.group)
    }

    pub fn group(&self, apex: &str) -> Option<&ZoneApexGroup> {
        self.entries
            .get(&normalize_name(apex))
            .map(|entry| &entry.group)
    }

    /// Look up `qname` in the group for `apex`
    ///
    /// Shards are tried in order and the first non-empty answer wins. When
    /// every answer is empty the last shard's result is returned. `None`
    /// means the store holds nothing for `apex`.
    pub fn lookup(&self, apex: &str, qname: &str, qtype: QueryType) -> Option<GroupAnswer> {
        let entry = self.entries.get(&normalize_name(apex))?;
        let shards = entry.shards.read();

        let mut last = None;
        for shard in shards.iter() {
            let result = shard.snapshot.lookup(qname, qtype);
            let answer = GroupAnswer {
                result,
                upstream: shard.snapshot.upstream().cloned(),
            };

            if !answer.result.answer.is_empty() {
                return Some(answer);
            }
            last = Some(answer);
        }

        last
    }

    /// Replace the snapshot of shard `index` in the group for `apex`
    ///
    /// Returns false if there is no such shard.
    pub fn publish(&self, apex: &str, index: usize, snapshot: ZoneSnapshot) -> bool {
        let entry = match self.entries.get(&normalize_name(apex)) {
            Some(entry) => entry,
            None => return false,
        };

        let snapshot = Arc::new(snapshot);
        let mut shards = entry.shards.write();
        match shards.get_mut(index) {
            Some(shard) => {
                shard.snapshot = snapshot;
                shard.refreshed_at = Some(SystemTime::now());
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self, apex: &str, index: usize) -> Option<Arc<ZoneSnapshot>> {
        let entry = self.entries.get(&normalize_name(apex))?;
        let shards = entry.shards.read();
        shards.get(index).map(|shard| shard.snapshot.clone())
    }

    /// Total number of records published for `apex` across its shards
    pub fn record_count(&self, apex: &str) -> Option<usize> {
        let entry = self.entries.get(&normalize_name(apex))?;
        let shards = entry.shards.read();
        Some(shards.iter().map(|shard| shard.snapshot.len()).sum())
    }

    /// When shard `index` of `apex` was last replaced, `None` if never
    pub fn last_refresh(&self, apex: &str, index: usize) -> Option<SystemTime> {
        let entry = self.entries.get(&normalize_name(apex))?;
        let shards = entry.shards.read();
        shards.get(index).and_then(|shard| shard.refreshed_at)
    }
}
