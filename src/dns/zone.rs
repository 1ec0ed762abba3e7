//! In-memory zone data and the lookup engine answering from it
//!
//! A `Zone` is filled once through `insert` and then only read. Lookups follow
//! the usual authoritative algorithm:
//!
//! 1. A name below a delegation point (an NS set strictly below the apex)
//!    yields a referral.
//! 2. An exact match returns the requested set, or the CNAME found at the name
//!    which is then chased through the zone.
//! 3. A name that exists without the requested type (including empty
//!    non-terminals) is a NODATA answer.
//! 4. Otherwise a wildcard at the closest encloser is tried before the name is
//!    declared non-existent.
//!
//! Negative answers carry the apex SOA in the authority section. A zone without
//! an apex SOA answers nothing and reports a server failure.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::dns::names::{is_subdomain, normalize_name, parent};
use crate::dns::protocol::{DnsRecord, QueryType};
use crate::dns::resolve::Upstream;

/// Maximum number of CNAME links followed inside one zone
const MAX_CNAME_CHAIN: usize = 8;

/// Classification of a lookup outcome
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LookupKind {
    Success,
    NoData,
    NameError,
    Delegation,
    ServerFailure,
}

/// Sections produced by a zone lookup
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LookupResult {
    pub answer: Vec<DnsRecord>,
    pub authority: Vec<DnsRecord>,
    pub additional: Vec<DnsRecord>,
    pub kind: LookupKind,
    /// Final CNAME target when the chain leaves the zone
    pub external_target: Option<String>,
}

impl LookupResult {
    fn new(kind: LookupKind) -> LookupResult {
        LookupResult {
            answer: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
            kind,
            external_target: None,
        }
    }
}

#[derive(Clone, Default)]
pub struct Zone {
    apex: String,
    nodes: BTreeMap<String, Vec<DnsRecord>>,
    /// Every name at or above an owner name, down from the apex
    existing: HashSet<String>,
    record_count: usize,
    upstream: Option<Arc<dyn Upstream>>,
}

impl fmt::Debug for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Zone")
            .field("apex", &self.apex)
            .field("records", &self.record_count)
            .field("upstream", &self.upstream.is_some())
            .finish()
    }
}

impl Zone {
    pub fn new(apex: &str) -> Zone {
        Zone {
            apex: normalize_name(apex),
            ..Zone::default()
        }
    }

    pub fn with_upstream(mut self, upstream: Option<Arc<dyn Upstream>>) -> Zone {
        self.upstream = upstream;
        self
    }

    pub fn apex(&self) -> &str {
        &self.apex
    }

    pub fn upstream(&self) -> Option<&Arc<dyn Upstream>> {
        self.upstream.as_ref()
    }

    pub fn len(&self) -> usize {
        self.record_count
    }

    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    pub fn records(&self) -> impl Iterator<Item = &DnsRecord> {
        self.nodes.values().flatten()
    }

    /// Add a record, ignoring exact duplicates. Returns false for duplicates.
    pub fn insert(&mut self, record: DnsRecord) -> bool {
        let owner = record.get_domain().to_string();

        let node = self.nodes.entry(owner.clone()).or_default();
        if node.contains(&record) {
            return false;
        }
        node.push(record);
        self.record_count += 1;

        let mut name = owner.as_str();
        loop {
            if !self.existing.insert(name.to_string()) {
                break;
            }
            if name == self.apex || !is_subdomain(name, &self.apex) {
                break;
            }
            match parent(name) {
                Some(up) => name = up,
                None => break,
            }
        }

        true
    }

    /// The SOA record at the apex, if the zone has one
    pub fn soa(&self) -> Option<&DnsRecord> {
        self.rrset(&self.apex, QueryType::Soa).next()
    }

    fn rrset<'a>(&'a self, name: &str, qtype: QueryType) -> impl Iterator<Item = &'a DnsRecord> {
        self.nodes
            .get(name)
            .into_iter()
            .flatten()
            .filter(move |rec| qtype == QueryType::Any || rec.get_querytype() == qtype)
    }

    fn exists(&self, name: &str) -> bool {
        self.nodes.contains_key(name) || self.existing.contains(name)
    }

    /// Answer `qname`/`qtype` from this zone's data
    pub fn lookup(&self, qname: &str, qtype: QueryType) -> LookupResult {
        let qname = normalize_name(qname);

        if !is_subdomain(&qname, &self.apex) {
            return LookupResult::new(LookupKind::ServerFailure);
        }

        // zone data without an SOA is unusable, including an unpopulated zone
        if self.soa().is_none() {
            return LookupResult::new(LookupKind::ServerFailure);
        }

        if let Some(referral) = self.delegation(&qname) {
            return referral;
        }

        let mut result = LookupResult::new(LookupKind::Success);
        let mut visited = HashSet::new();
        result.kind = self.answer_name(&qname, qtype, &mut result, &mut visited);

        match result.kind {
            LookupKind::Success => {
                result.authority.extend(self.rrset(&self.apex, QueryType::Ns).cloned());
                let targets: Vec<String> = result
                    .answer
                    .iter()
                    .filter(|rec| {
                        matches!(
                            rec.get_querytype(),
                            QueryType::Ns | QueryType::Mx | QueryType::Srv
                        )
                    })
                    .chain(result.authority.iter())
                    .filter_map(|rec| rec.get_target().map(|t| t.to_string()))
                    .collect();
                result.additional = self.glue(targets.iter().map(|t| t.as_str()));
            }
            LookupKind::NoData | LookupKind::NameError => {
                result.authority.extend(self.soa().cloned());
            }
            LookupKind::Delegation | LookupKind::ServerFailure => {}
        }

        result
    }

    /// Finds the topmost zone cut between the apex and `qname`
    fn delegation(&self, qname: &str) -> Option<LookupResult> {
        let mut path = Vec::new();
        let mut name = qname;
        while name != self.apex {
            path.push(name);
            name = parent(name)?;
        }

        for cut in path.iter().rev() {
            let ns: Vec<DnsRecord> = self.rrset(cut, QueryType::Ns).cloned().collect();
            if ns.is_empty() {
                continue;
            }

            let mut result = LookupResult::new(LookupKind::Delegation);
            result.additional = self.glue(ns.iter().filter_map(|rec| rec.get_target()));
            result.authority = ns;
            return Some(result);
        }

        None
    }

    /// Address records for in-zone target names
    fn glue<'a, I>(&self, targets: I) -> Vec<DnsRecord>
    where
        I: Iterator<Item = &'a str>,
    {
        let mut glue: Vec<DnsRecord> = Vec::new();
        for target in targets {
            if !is_subdomain(target, &self.apex) {
                continue;
            }
            for rec in self
                .rrset(target, QueryType::A)
                .chain(self.rrset(target, QueryType::Aaaa))
            {
                if !glue.contains(rec) {
                    glue.push(rec.clone());
                }
            }
        }
        glue
    }

    fn answer_name(
        &self,
        qname: &str,
        qtype: QueryType,
        result: &mut LookupResult,
        visited: &mut HashSet<String>,
    ) -> LookupKind {
        visited.insert(qname.to_string());

        if self.nodes.contains_key(qname) {
            return self.answer_node(qname, qname, qtype, result, visited);
        }

        if self.exists(qname) {
            return LookupKind::NoData;
        }

        // closest encloser, then its wildcard
        let mut encloser = parent(qname);
        while let Some(name) = encloser {
            if self.exists(name) || name == self.apex {
                break;
            }
            encloser = parent(name);
        }

        if let Some(encloser) = encloser {
            let wildcard = if encloser.is_empty() {
                "*".to_string()
            } else {
                format!("*.{}", encloser)
            };
            if self.nodes.contains_key(&wildcard) {
                return self.answer_node(&wildcard, qname, qtype, result, visited);
            }
        }

        LookupKind::NameError
    }

    /// Answer from the records at `node`, owned by `owner` in the reply
    fn answer_node(
        &self,
        node: &str,
        owner: &str,
        qtype: QueryType,
        result: &mut LookupResult,
        visited: &mut HashSet<String>,
    ) -> LookupKind {
        let synthesize = |rec: &DnsRecord| {
            if node == owner {
                rec.clone()
            } else {
                rec.with_domain(owner)
            }
        };

        let matching: Vec<DnsRecord> = self.rrset(node, qtype).map(synthesize).collect();
        if !matching.is_empty() {
            result.answer.extend(matching);
            return LookupKind::Success;
        }

        if qtype == QueryType::Cname {
            return LookupKind::NoData;
        }

        let cname = match self.rrset(node, QueryType::Cname).next() {
            Some(cname) => synthesize(cname),
            None => return LookupKind::NoData,
        };

        let target = cname.get_target().map(|t| t.to_string()).unwrap_or_default();
        result.answer.push(cname);

        if visited.contains(&target) || visited.len() > MAX_CNAME_CHAIN {
            return LookupKind::Success;
        }

        if !is_subdomain(&target, &self.apex) {
            result.external_target = Some(target);
            return LookupKind::Success;
        }

        // the CNAME alone is a complete answer even if the target is missing
        self.answer_name(&target, qtype, result, visited);
        LookupKind::Success
    }
}
