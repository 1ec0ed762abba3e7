//! Refresh cycle behavior against an in-memory service

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use common::{MockCloudDns, SLOW_ZONE};
use zonemirror::clouddns::api::{ApiError, RecordSetLister, RecordSetPage, ResourceRecordSet};
use zonemirror::clouddns::store::{ManagedZoneRef, ZoneApexGroup, ZoneStore};
use zonemirror::clouddns::sync::{RefreshError, ZoneSynchronizer};
use zonemirror::dns::protocol::QueryType;
use zonemirror::dns::zone::LookupKind;

fn a(name: &str, addr: &str) -> ResourceRecordSet {
    ResourceRecordSet::new(name, "A", 300, &[addr])
}

fn soa(apex: &str) -> ResourceRecordSet {
    ResourceRecordSet::new(
        apex,
        "SOA",
        300,
        &["ns.example.net. hostmaster.example.net. 1 7200 900 1209600 86400"],
    )
}

fn build(mock: &Arc<dyn RecordSetLister>, bindings: &[(&str, &str)]) -> Arc<ZoneSynchronizer> {
    let groups = ZoneApexGroup::group_by_apex(
        bindings
            .iter()
            .map(|(apex, zone)| (apex.to_string(), ManagedZoneRef::new("testproject", zone))),
    );
    let store = Arc::new(ZoneStore::new(groups, None));

    Arc::new(ZoneSynchronizer::new(store, mock.clone(), Span::none()).with_interval(Duration::from_secs(60)))
}

fn lister(mock: &Arc<MockCloudDns>) -> Arc<dyn RecordSetLister> {
    mock.clone()
}

/// Listing that takes `delay` to answer and tracks how many run at once
struct SlowLister {
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl SlowLister {
    fn new(delay: Duration) -> Arc<SlowLister> {
        Arc::new(SlowLister {
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl RecordSetLister for SlowLister {
    async fn list_record_sets(
        &self,
        _project: &str,
        _managed_zone: &str,
        _page_token: Option<&str>,
    ) -> Result<RecordSetPage, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(RecordSetPage {
            rrsets: vec![soa("org."), a("www.org.", "10.0.0.1")],
            next_page_token: None,
        })
    }
}

#[tokio::test]
async fn test_pagination_is_drained() {
    let mock = Arc::new(MockCloudDns::new());
    mock.set_pages(
        "pagedzone",
        vec![
            vec![
                soa("example.org."),
                a("a.example.org.", "10.0.0.1"),
                a("b.example.org.", "10.0.0.2"),
            ],
            vec![a("c.example.org.", "10.0.0.3")],
            vec![a("d.example.org.", "10.0.0.4"), a("e.example.org.", "10.0.0.5")],
        ],
    );

    let sync = build(&lister(&mock), &[("example.org.", "pagedzone")]);
    sync.sync_once(&CancellationToken::new()).await.unwrap();

    assert_eq!(mock.list_calls(), 3);
    assert_eq!(sync.store().record_count("example.org"), Some(6));

    for name in &["a", "c", "e"] {
        let found = sync
            .store()
            .lookup("example.org", &format!("{}.example.org.", name), QueryType::A)
            .unwrap();
        assert_eq!(found.result.kind, LookupKind::Success);
    }
}

#[tokio::test]
async fn test_stale_on_failure() {
    let mock = Arc::new(MockCloudDns::new());
    mock.set_records("goodzone", vec![soa("example.org."), a("www.example.org.", "10.0.0.1")]);
    mock.set_records("flakyzone", vec![soa("example.net."), a("www.example.net.", "10.0.1.1")]);
    mock.set_dns_name("goodzone", "example.org.");
    mock.set_dns_name("flakyzone", "example.net.");

    let sync = build(
        &lister(&mock),
        &[("example.org.", "goodzone"), ("example.net.", "flakyzone")],
    );
    let cancel = CancellationToken::new();
    sync.sync_once(&cancel).await.unwrap();

    // next cycle: new data everywhere, but one listing fails
    mock.set_records("goodzone", vec![soa("example.org."), a("www.example.org.", "10.0.0.2")]);
    mock.set_records("flakyzone", vec![soa("example.net."), a("www.example.net.", "10.0.1.2")]);
    mock.fail("flakyzone", true);

    let err = sync.sync_once(&cancel).await.unwrap_err();
    assert_eq!(err.failed_apexes(), vec!["example.net"]);
    assert_eq!(
        err.failures[0].zone_ref,
        Some(ManagedZoneRef::new("testproject", "flakyzone"))
    );
    assert!(!err.is_cancelled());

    // the failed group still serves the previous cycle's data
    let stale = sync
        .store()
        .lookup("example.net", "www.example.net.", QueryType::A)
        .unwrap();
    assert_eq!(stale.result.answer[0].to_string(), "www.example.net.\t300\tIN\tA\t10.0.1.1");

    // the healthy group moved on
    let fresh = sync
        .store()
        .lookup("example.org", "www.example.org.", QueryType::A)
        .unwrap();
    assert_eq!(fresh.result.answer[0].to_string(), "www.example.org.\t300\tIN\tA\t10.0.0.2");

    mock.fail("flakyzone", false);
    sync.sync_once(&cancel).await.unwrap();
    let recovered = sync
        .store()
        .lookup("example.net", "www.example.net.", QueryType::A)
        .unwrap();
    assert_eq!(recovered.result.answer[0].to_string(), "www.example.net.\t300\tIN\tA\t10.0.1.2");
}

#[tokio::test]
async fn test_failing_shard_keeps_earlier_shards() {
    let mock = Arc::new(MockCloudDns::new());
    mock.set_records("first", vec![a("one.org.", "10.0.0.1")]);

    let sync = build(&lister(&mock), &[("org.", "first"), ("org.", "badzone")]);
    let err = sync.sync_once(&CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.failures.len(), 1);
    assert!(sync.store().last_refresh("org", 0).is_some());
    assert!(sync.store().last_refresh("org", 1).is_none());
    assert_eq!(sync.store().record_count("org"), Some(1));
}

#[tokio::test]
async fn test_repeated_sync_is_idempotent() {
    let mock = Arc::new(MockCloudDns::with_test_zones());
    let sync = build(&lister(&mock), &[("org.", "differentzone"), ("org.", "testzone")]);
    let cancel = CancellationToken::new();

    sync.sync_once(&cancel).await.unwrap();
    let before = sync.store().record_count("org");
    let first = sync.store().lookup("org", "sample.example.org.", QueryType::A).unwrap();

    sync.sync_once(&cancel).await.unwrap();
    let second = sync.store().lookup("org", "sample.example.org.", QueryType::A).unwrap();

    assert_eq!(sync.store().record_count("org"), before);
    assert_eq!(first.result, second.result);
}

#[tokio::test]
async fn test_cancel_interrupts_listing() {
    let mock = Arc::new(MockCloudDns::new());
    mock.set_records("quickzone", vec![a("www.example.org.", "10.0.0.1")]);
    mock.set_dns_name("quickzone", "example.org.");

    let sync = build(&lister(&mock), &[("example.org.", "quickzone"), ("org.", SLOW_ZONE)]);
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let err = tokio::time::timeout(Duration::from_secs(10), sync.sync_once(&cancel))
        .await
        .expect("cancellation should end the cycle")
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(err.failed_apexes(), vec!["org"]);
    assert!(matches!(
        err.failures[0].source,
        RefreshError::Api(ApiError::Cancelled)
    ));
    assert_eq!(sync.store().record_count("example.org"), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_run_forever_refreshes_until_cancelled() {
    let mock = Arc::new(MockCloudDns::new());
    mock.set_records("zone", vec![soa("org."), a("www.org.", "10.0.0.1")]);

    let sync = build(&lister(&mock), &[("org.", "zone")]);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(sync.clone().run_forever(cancel.clone()));

    // the loop waits a full interval before its first cycle
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(mock.list_calls(), 0);

    mock.set_records("zone", vec![soa("org."), a("www.org.", "10.0.0.2")]);
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(mock.list_calls(), 1);

    let found = sync.store().lookup("org", "www.org.", QueryType::A).unwrap();
    assert_eq!(found.result.answer[0].to_string(), "www.org.\t300\tIN\tA\t10.0.0.2");

    // failures are logged and the loop keeps going
    mock.fail("zone", true);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(mock.list_calls(), 2);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(mock.list_calls(), 3);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("loop should stop on cancellation")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_cycles_are_serialized() {
    let slow = SlowLister::new(Duration::from_secs(5));
    let listing: Arc<dyn RecordSetLister> = slow.clone();
    let sync = build(&listing, &[("org.", "zone")]);
    let cancel = CancellationToken::new();

    let (first, second) = tokio::join!(sync.sync_once(&cancel), sync.sync_once(&cancel));
    first.unwrap();
    second.unwrap();

    assert_eq!(slow.calls.load(Ordering::SeqCst), 2);
    // the second cycle only listed once the first was done
    assert_eq!(slow.peak.load(Ordering::SeqCst), 1);
    assert_eq!(sync.store().record_count("org"), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_cycle_stops_its_tasks() {
    let slow = SlowLister::new(Duration::from_secs(10));
    let listing: Arc<dyn RecordSetLister> = slow.clone();
    let sync = build(&listing, &[("org.", "zone")]);
    let cancel = CancellationToken::new();

    let elapsed = tokio::time::timeout(Duration::from_secs(1), sync.sync_once(&cancel)).await;
    assert!(elapsed.is_err());
    assert_eq!(slow.calls.load(Ordering::SeqCst), 1);

    // the abandoned listing never gets to publish
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(sync.store().last_refresh("org", 0).is_none());
    assert_eq!(slow.in_flight.load(Ordering::SeqCst), 1);

    // and the next cycle is not blocked by it
    sync.sync_once(&cancel).await.unwrap();
    assert!(sync.store().last_refresh("org", 0).is_some());
}
