//! In-memory stand-in for the remote zone management service

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use zonemirror::clouddns::api::{
    ApiError, ManagedZone, ManagedZoneLookup, RecordSetLister, RecordSetPage, ResourceRecordSet,
};

/// Managed zone whose listing never completes
pub const SLOW_ZONE: &str = "slowzone";

pub struct MockCloudDns {
    dns_names: Mutex<HashMap<String, String>>,
    pages: Mutex<HashMap<String, Vec<RecordSetPage>>>,
    failing: Mutex<HashSet<String>>,
    list_calls: AtomicUsize,
}

fn rrset(rtype: &str, name: &str, value: &str) -> ResourceRecordSet {
    ResourceRecordSet::new(name, rtype, 300, &[value])
}

impl MockCloudDns {
    /// Empty service; every managed zone reports the apex `org.`
    pub fn new() -> MockCloudDns {
        let mock = MockCloudDns {
            dns_names: Mutex::new(HashMap::new()),
            pages: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            list_calls: AtomicUsize::new(0),
        };
        mock.fail("badzone", true);
        mock
    }

    /// Service holding the `testzone` and `differentzone` managed zones, both
    /// under `org.`
    pub fn with_test_zones() -> MockCloudDns {
        let mock = MockCloudDns::new();

        mock.set_records(
            "testzone",
            vec![
                rrset("A", "example.org.", "1.2.3.4"),
                rrset("AAAA", "example.org.", "2001:db8:85a3::8a2e:370:7334"),
                rrset("CNAME", "sample.example.org.", "example.org"),
                rrset("PTR", "example.org.", "ptr.example.org."),
                rrset(
                    "SOA",
                    "org.",
                    "ns-1536.awsdns-00.co.uk. awsdns-hostmaster.amazon.com. 1 7200 900 1209600 86400",
                ),
                rrset("NS", "com.", "ns-1536.awsdns-00.co.uk."),
                rrset("YOLO", "swag.", "foobar"),
            ],
        );
        mock.set_records(
            "differentzone",
            vec![
                rrset("A", "other-example.org.", "3.5.7.9"),
                rrset(
                    "SOA",
                    "org.",
                    "ns-15.awsdns-00.co.uk. awsdns-hostmaster.amazon.com. 1 7200 900 1209600 86400",
                ),
            ],
        );

        mock
    }

    pub fn set_dns_name(&self, managed_zone: &str, dns_name: &str) {
        self.dns_names
            .lock()
            .insert(managed_zone.to_string(), dns_name.to_string());
    }

    /// Serve `rrsets` as a single page
    pub fn set_records(&self, managed_zone: &str, rrsets: Vec<ResourceRecordSet>) {
        self.set_pages(managed_zone, vec![rrsets]);
    }

    /// Serve each entry of `pages` as one page, linked by page tokens
    pub fn set_pages(&self, managed_zone: &str, pages: Vec<Vec<ResourceRecordSet>>) {
        let count = pages.len();
        let pages = pages
            .into_iter()
            .enumerate()
            .map(|(i, rrsets)| RecordSetPage {
                rrsets,
                next_page_token: if i + 1 < count {
                    Some(format!("page-{}", i + 1))
                } else {
                    None
                },
            })
            .collect();

        self.pages.lock().insert(managed_zone.to_string(), pages);
    }

    pub fn fail(&self, managed_zone: &str, failing: bool) {
        let mut zones = self.failing.lock();
        if failing {
            zones.insert(managed_zone.to_string());
        } else {
            zones.remove(managed_zone);
        }
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ManagedZoneLookup for MockCloudDns {
    async fn get_managed_zone(&self, project: &str, managed_zone: &str) -> Result<ManagedZone, ApiError> {
        if managed_zone == "unknownzone" {
            return Err(ApiError::NotFound {
                project: project.to_string(),
                managed_zone: managed_zone.to_string(),
            });
        }

        let dns_name = self
            .dns_names
            .lock()
            .get(managed_zone)
            .cloned()
            .unwrap_or_else(|| "org.".to_string());

        Ok(ManagedZone {
            name: managed_zone.to_string(),
            dns_name,
        })
    }
}

#[async_trait]
impl RecordSetLister for MockCloudDns {
    async fn list_record_sets(
        &self,
        _project: &str,
        managed_zone: &str,
        page_token: Option<&str>,
    ) -> Result<RecordSetPage, ApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        if managed_zone == SLOW_ZONE {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        if self.failing.lock().contains(managed_zone) {
            return Err(ApiError::Transport("bad. zone is bad".to_string()));
        }

        let index = match page_token {
            None => 0,
            Some(token) => token
                .trim_start_matches("page-")
                .parse::<usize>()
                .map_err(|e| ApiError::Decode(e.to_string()))?,
        };

        let pages = self.pages.lock();
        match pages.get(managed_zone) {
            Some(pages) => pages.get(index).cloned().ok_or_else(|| ApiError::Status {
                code: 400,
                message: format!("no page {}", index),
            }),
            None => Ok(RecordSetPage::default()),
        }
    }
}
