//! Full sync cycles against in-memory providers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use synk_core::credentials::{
    BearerToken, Credential, CredentialStore, MemoryBackend, OAuthRefresher, RefreshedToken, TokenRefresher,
};
use synk_core::error::{CredentialError, ErrorCategory, ProviderError, SyncError};
use synk_core::events::{Event, EventBus};
use synk_core::model::{ItemPatch, ItemStatus, Provider, SyncCursor, SyncItem};
use synk_core::providers::{ChangeListing, ProviderAdapter};
use synk_core::storage::{OAuthConfig, StateDb, SyncSettings};
use synk_core::sync::{
    AccountGate, AdapterSet, CyclePhase, CycleResult, StaticGate, SyncOrchestrator,
};
use tokio::sync::Notify;

struct FakeProvider {
    provider: Provider,
    items: Mutex<BTreeMap<String, SyncItem>>,
    created: AtomicUsize,
    listings: AtomicUsize,
    cursors_seen: Mutex<Vec<Option<String>>>,
    fail_listing: Mutex<Option<ProviderError>>,
    reject_cursor: AtomicBool,
    /// Successful writes left before every write fails; `None` is unlimited.
    write_budget: Mutex<Option<usize>>,
    list_delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    /// First create signals `.0` and waits for `.1`.
    create_gate: Option<(Arc<Notify>, Arc<Notify>)>,
    gate_armed: AtomicBool,
    /// Stored items lose the counterpart id the way a remote without a
    /// back-reference field would.
    drop_back_reference: bool,
}

impl FakeProvider {
    fn new(provider: Provider) -> Self {
        Self {
            provider,
            items: Mutex::new(BTreeMap::new()),
            created: AtomicUsize::new(0),
            listings: AtomicUsize::new(0),
            cursors_seen: Mutex::new(Vec::new()),
            fail_listing: Mutex::new(None),
            reject_cursor: AtomicBool::new(false),
            write_budget: Mutex::new(None),
            list_delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            create_gate: None,
            gate_armed: AtomicBool::new(true),
            drop_back_reference: false,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.list_delay = delay;
        self
    }

    fn with_create_gate(mut self, started: Arc<Notify>, release: Arc<Notify>) -> Self {
        self.create_gate = Some((started, release));
        self
    }

    fn without_back_reference(mut self) -> Self {
        self.drop_back_reference = true;
        self
    }

    fn put(&self, item: SyncItem) {
        let id = item.id_for(self.provider).unwrap().to_string();
        self.items.lock().unwrap().insert(id, item);
    }

    fn remove(&self, id: &str) {
        self.items.lock().unwrap().remove(id);
    }

    fn get(&self, id: &str) -> Option<SyncItem> {
        self.items.lock().unwrap().get(id).cloned()
    }

    fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    fn titles(&self) -> Vec<String> {
        let mut titles: Vec<String> = self
            .items
            .lock()
            .unwrap()
            .values()
            .map(|i| i.title.clone())
            .collect();
        titles.sort();
        titles
    }

    fn consume_write(&self) -> Result<(), ProviderError> {
        let mut budget = self.write_budget.lock().unwrap();
        match *budget {
            Some(0) => Err(ProviderError::Api {
                provider: self.provider,
                status: 503,
                message: "backend unavailable".into(),
            }),
            Some(ref mut left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn prefix(&self) -> &'static str {
        self.provider.as_str()
    }
}

#[async_trait]
impl ProviderAdapter for FakeProvider {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn list_changes(
        &self,
        _token: &BearerToken,
        cursor: Option<&SyncCursor>,
    ) -> Result<ChangeListing, ProviderError> {
        self.cursors_seen
            .lock()
            .unwrap()
            .push(cursor.and_then(|c| c.token.clone()));
        let failure = self.fail_listing.lock().unwrap().clone();
        if let Some(err) = failure {
            return Err(err);
        }
        if cursor.is_some() && self.reject_cursor.swap(false, Ordering::SeqCst) {
            return Err(ProviderError::CursorInvalidated {
                provider: self.provider,
            });
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.list_delay.is_zero() {
            tokio::time::sleep(self.list_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let n = self.listings.fetch_add(1, Ordering::SeqCst) + 1;
        let items = self.items.lock().unwrap().values().cloned().collect();
        Ok(ChangeListing {
            items,
            removed: Vec::new(),
            cursor: Some(format!("{}-tok-{n}", self.prefix())),
            full_scan: true,
        })
    }

    async fn create_item(&self, _token: &BearerToken, item: &SyncItem) -> Result<String, ProviderError> {
        if let Some((started, release)) = &self.create_gate {
            if self.gate_armed.swap(false, Ordering::SeqCst) {
                started.notify_one();
                release.notified().await;
            }
        }
        self.consume_write()?;
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{}-{n}", self.prefix());
        let mut stored = item.clone();
        stored.set_id(self.provider, Some(id.clone()));
        if self.drop_back_reference {
            stored.set_id(self.provider.other(), None);
        }
        self.put(stored);
        Ok(id)
    }

    async fn update_item(&self, _token: &BearerToken, id: &str, patch: &ItemPatch) -> Result<(), ProviderError> {
        self.consume_write()?;
        let mut items = self.items.lock().unwrap();
        let item = items.get_mut(id).ok_or_else(|| ProviderError::NotFound {
            provider: self.provider,
            id: id.to_string(),
        })?;
        patch.apply_to(item);
        Ok(())
    }

    async fn delete_item(&self, _token: &BearerToken, id: &str) -> Result<(), ProviderError> {
        self.consume_write()?;
        self.remove(id);
        Ok(())
    }
}

struct Harness {
    orchestrator: Arc<SyncOrchestrator>,
    credentials: Arc<CredentialStore>,
    state: Arc<StateDb>,
    events: EventBus,
    notion: Arc<FakeProvider>,
    google: Arc<FakeProvider>,
}

const USER: &str = "u1";

fn settings() -> SyncSettings {
    SyncSettings {
        interval_secs: 300,
        apply_max_retries: 3,
        apply_retry_base_ms: 1,
    }
}

fn task(provider: Provider, id: &str, title: &str) -> SyncItem {
    let start = Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap();
    let edited = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    SyncItem::new(
        provider,
        id,
        title,
        start,
        Some(start + chrono::Duration::minutes(30)),
        ItemStatus::Active,
        edited,
    )
}

/// Token endpoint that rejects every refresh.
#[derive(Default)]
struct RejectingRefresher {
    calls: AtomicUsize,
}

#[async_trait]
impl TokenRefresher for RejectingRefresher {
    async fn refresh(&self, provider: Provider, _refresh_token: &str) -> Result<RefreshedToken, CredentialError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CredentialError::RefreshFailed {
            provider,
            reason: "invalid_grant".into(),
        })
    }
}

async fn harness_with(
    notion: FakeProvider,
    google: FakeProvider,
    gate: Arc<dyn AccountGate>,
) -> Harness {
    let refresher = OAuthRefresher::new(OAuthConfig::default(), Duration::from_secs(5)).unwrap();
    harness_with_refresher(notion, google, gate, Arc::new(refresher)).await
}

async fn harness_with_refresher(
    notion: FakeProvider,
    google: FakeProvider,
    gate: Arc<dyn AccountGate>,
    refresher: Arc<dyn TokenRefresher>,
) -> Harness {
    let events = EventBus::new();
    let credentials = Arc::new(CredentialStore::new(
        Arc::new(MemoryBackend::new()),
        refresher,
        events.clone(),
    ));
    let state = Arc::new(StateDb::open_in_memory().unwrap());
    let orchestrator = Arc::new(SyncOrchestrator::new(
        credentials.clone(),
        state.clone(),
        gate,
        events.clone(),
        settings(),
    ));
    let harness = Harness {
        orchestrator,
        credentials,
        state,
        events,
        notion: Arc::new(notion),
        google: Arc::new(google),
    };
    harness.add_user(USER).await;
    harness
}

async fn harness() -> Harness {
    harness_with(
        FakeProvider::new(Provider::Notion),
        FakeProvider::new(Provider::Google),
        Arc::new(StaticGate::new(true)),
    )
    .await
}

impl Harness {
    async fn add_user(&self, user: &str) {
        for provider in Provider::ALL {
            self.credentials
                .put(user, provider, Credential::new(format!("{user}-token"), None, None, vec![]))
                .await
                .unwrap();
        }
        let adapters = AdapterSet::new(self.notion.clone(), self.google.clone());
        self.orchestrator.register(user, adapters).unwrap();
    }
}

#[tokio::test]
async fn new_items_are_created_linked_and_then_settle() {
    let h = harness().await;
    h.notion.put(task(Provider::Notion, "n1", "Buy milk"));
    h.google.put(task(Provider::Google, "g1", "Dentist"));

    let first = h.orchestrator.trigger_sync(USER).await.unwrap();
    assert_eq!(first.result, CycleResult::Converged);
    assert_eq!(first.planned, 4);
    assert_eq!(first.applied, 4);
    assert_eq!(h.google.titles(), vec!["Buy milk", "Dentist"]);
    assert_eq!(h.notion.titles(), vec!["Buy milk", "Dentist"]);

    let links = h.state.load_links(USER).unwrap();
    assert_eq!(links.len(), 2);
    let milk = links.iter().find(|l| l.notion_id == "n1").unwrap();
    assert_eq!(milk.google_id, "google-1");
    assert_eq!(h.google.get("google-1").unwrap().id_for(Provider::Notion), Some("n1"));

    let second = h.orchestrator.trigger_sync(USER).await.unwrap();
    assert_eq!(second.planned, 0);
    assert_eq!(second.result, CycleResult::Converged);

    let status = h.orchestrator.get_status(USER).unwrap();
    assert_eq!(status.phase, CyclePhase::Idle);
    assert_eq!(status.last_result, Some(CycleResult::Converged));
    assert!(status.last_run_at.is_some());
}

#[tokio::test]
async fn google_deletion_removes_notion_item_and_link() {
    let h = harness().await;
    h.notion.put(task(Provider::Notion, "n1", "Buy milk"));
    h.orchestrator.trigger_sync(USER).await.unwrap();
    assert_eq!(h.state.load_links(USER).unwrap().len(), 1);

    h.google.remove("google-1");
    let report = h.orchestrator.trigger_sync(USER).await.unwrap();
    assert_eq!(report.planned, 1);
    assert_eq!(report.applied, 1);
    assert!(h.notion.get("n1").is_none());
    assert!(h.state.load_links(USER).unwrap().is_empty());

    let settled = h.orchestrator.trigger_sync(USER).await.unwrap();
    assert_eq!(settled.planned, 0);
}

#[tokio::test]
async fn failed_operations_are_retried_by_the_next_cycle() {
    let h = harness().await;
    for i in 1..=5 {
        h.notion.put(task(Provider::Notion, &format!("n{i}"), &format!("Task {i}")));
    }
    h.orchestrator.trigger_sync(USER).await.unwrap();
    assert_eq!(h.state.load_links(USER).unwrap().len(), 5);

    for i in 1..=5 {
        h.notion.put(task(Provider::Notion, &format!("n{i}"), &format!("Task {i} (edited)")));
    }
    *h.google.write_budget.lock().unwrap() = Some(2);

    let partial = h.orchestrator.trigger_sync(USER).await.unwrap();
    assert_eq!(partial.planned, 5);
    assert_eq!(partial.applied, 2);
    assert_eq!(partial.failed, 3);
    assert_eq!(partial.result, CycleResult::Partial);
    assert_eq!(partial.error_category, Some(ErrorCategory::OperationApplyFailed));
    // One initial attempt plus three retries.
    assert!(partial
        .outcomes
        .iter()
        .filter(|o| o.error.is_some())
        .all(|o| o.attempts == 4));

    *h.google.write_budget.lock().unwrap() = None;
    let resumed = h.orchestrator.trigger_sync(USER).await.unwrap();
    assert_eq!(resumed.planned, 3);
    assert_eq!(resumed.applied, 3);
    assert_eq!(resumed.result, CycleResult::Converged);

    let settled = h.orchestrator.trigger_sync(USER).await.unwrap();
    assert_eq!(settled.planned, 0);
    assert!(h.google.titles().iter().all(|t| t.ends_with("(edited)")));
}

#[tokio::test]
async fn invalidated_google_cursor_only_rebuilds_google() {
    let h = harness().await;
    h.notion.put(task(Provider::Notion, "n1", "Buy milk"));
    h.orchestrator.trigger_sync(USER).await.unwrap();
    let links_before = h.state.load_links(USER).unwrap();

    h.google.reject_cursor.store(true, Ordering::SeqCst);
    let report = h.orchestrator.trigger_sync(USER).await.unwrap();
    assert_eq!(report.full_resync, vec![Provider::Google]);
    assert!(report.degraded.is_empty());
    assert_eq!(report.planned, 0);

    assert_eq!(
        *h.google.cursors_seen.lock().unwrap(),
        vec![None, Some("google-tok-1".to_string()), None]
    );
    assert_eq!(
        *h.notion.cursors_seen.lock().unwrap(),
        vec![None, Some("notion-tok-1".to_string())]
    );
    assert_eq!(h.state.load_links(USER).unwrap(), links_before);
    let google_cursor = h.state.load_cursor(USER, Provider::Google).unwrap().unwrap();
    assert_eq!(google_cursor.token.as_deref(), Some("google-tok-2"));
}

#[tokio::test]
async fn one_failing_provider_degrades_without_touching_its_cursor() {
    let h = harness().await;
    let mut rx = h.events.subscribe();
    h.notion.put(task(Provider::Notion, "n1", "Buy milk"));
    *h.google.fail_listing.lock().unwrap() = Some(ProviderError::RateLimited {
        provider: Provider::Google,
        attempts: 5,
    });

    let report = h.orchestrator.trigger_sync(USER).await.unwrap();
    assert_eq!(report.degraded, vec![Provider::Google]);
    assert_eq!(report.result, CycleResult::Partial);
    assert_eq!(report.planned, 0);
    assert_eq!(h.google.len(), 0);
    assert!(h.state.load_cursor(USER, Provider::Google).unwrap().is_none());
    assert!(h.state.load_cursor(USER, Provider::Notion).unwrap().is_some());

    let status = h.orchestrator.get_status(USER).unwrap();
    assert_eq!(status.last_error, Some(ErrorCategory::RateLimited));

    let mut degraded = false;
    while let Ok(event) = rx.try_recv() {
        if let Event::ProviderDegraded { provider, category, .. } = event {
            assert_eq!(provider, Provider::Google);
            assert_eq!(category, ErrorCategory::RateLimited);
            degraded = true;
        }
    }
    assert!(degraded);

    *h.google.fail_listing.lock().unwrap() = None;
    let recovered = h.orchestrator.trigger_sync(USER).await.unwrap();
    assert_eq!(recovered.applied, 2);
    assert_eq!(h.google.titles(), vec!["Buy milk"]);
}

#[tokio::test]
async fn failed_token_refresh_degrades_only_that_provider() {
    let refresher = Arc::new(RejectingRefresher::default());
    let h = harness_with_refresher(
        FakeProvider::new(Provider::Notion),
        FakeProvider::new(Provider::Google),
        Arc::new(StaticGate::new(true)),
        refresher.clone(),
    )
    .await;
    let expired = Credential::new(
        "stale-token".to_string(),
        Some("refresh-1".to_string()),
        Some(Utc::now() - chrono::Duration::minutes(5)),
        vec![],
    );
    h.credentials.put(USER, Provider::Google, expired).await.unwrap();
    h.notion.put(task(Provider::Notion, "n1", "Buy milk"));

    let report = h.orchestrator.trigger_sync(USER).await.unwrap();
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.result, CycleResult::Partial);
    assert_eq!(report.degraded, vec![Provider::Google]);
    assert_eq!(report.error_category, Some(ErrorCategory::RefreshFailed));
    assert_eq!(report.planned, 0);
    assert_eq!(h.google.listings.load(Ordering::SeqCst), 0);
    assert_eq!(h.google.len(), 0);

    let notion_cursor = h.state.load_cursor(USER, Provider::Notion).unwrap().unwrap();
    assert_eq!(notion_cursor.token.as_deref(), Some("notion-tok-1"));
    assert!(h.state.load_cursor(USER, Provider::Google).unwrap().is_none());
    assert!(h.state.load_links(USER).unwrap().is_empty());
}

#[tokio::test]
async fn both_providers_down_fails_the_cycle_and_commits_nothing() {
    let h = harness().await;
    h.notion.put(task(Provider::Notion, "n1", "Buy milk"));
    for fake in [&h.notion, &h.google] {
        *fake.fail_listing.lock().unwrap() = Some(ProviderError::TransientNetwork {
            provider: fake.provider,
            message: "connection refused".into(),
        });
    }

    let err = h.orchestrator.trigger_sync(USER).await.unwrap_err();
    assert!(matches!(err, SyncError::ProvidersUnavailable { .. }));
    assert!(h.state.load_cursor(USER, Provider::Notion).unwrap().is_none());
    assert!(h.state.load_cursor(USER, Provider::Google).unwrap().is_none());

    let status = h.orchestrator.get_status(USER).unwrap();
    assert_eq!(status.phase, CyclePhase::Failed);
    assert_eq!(status.last_result, Some(CycleResult::Failed));
    assert_eq!(status.last_error, Some(ErrorCategory::TransientNetworkError));
}

#[tokio::test]
async fn cancelled_cycle_stops_between_operations_and_resumes_cleanly() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let h = harness_with(
        FakeProvider::new(Provider::Notion),
        FakeProvider::new(Provider::Google).with_create_gate(started.clone(), release.clone()),
        Arc::new(StaticGate::new(true)),
    )
    .await;
    for i in 1..=3 {
        h.notion.put(task(Provider::Notion, &format!("n{i}"), &format!("Task {i}")));
    }

    let orchestrator = h.orchestrator.clone();
    let cycle = tokio::spawn(async move { orchestrator.trigger_sync(USER).await });
    started.notified().await;
    assert!(h.orchestrator.cancel(USER));
    release.notify_one();

    let report = cycle.await.unwrap().unwrap();
    assert_eq!(report.result, CycleResult::Cancelled);
    // The in-flight create finishes together with its link.
    assert_eq!(report.applied, 2);
    assert_eq!(report.skipped, 4);
    assert_eq!(h.google.len(), 1);
    assert_eq!(h.state.load_links(USER).unwrap().len(), 1);
    assert!(!h.orchestrator.cancel(USER));

    let resumed = h.orchestrator.trigger_sync(USER).await.unwrap();
    assert_eq!(resumed.result, CycleResult::Converged);
    assert_eq!(resumed.planned, 4);
    assert_eq!(h.google.len(), 3);
    assert_eq!(h.state.load_links(USER).unwrap().len(), 3);
}

#[tokio::test]
async fn cancel_during_create_still_links_item_without_back_reference() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let h = harness_with(
        FakeProvider::new(Provider::Notion)
            .with_create_gate(started.clone(), release.clone())
            .without_back_reference(),
        FakeProvider::new(Provider::Google),
        Arc::new(StaticGate::new(true)),
    )
    .await;
    h.google.put(task(Provider::Google, "g1", "Dentist"));

    let orchestrator = h.orchestrator.clone();
    let cycle = tokio::spawn(async move { orchestrator.trigger_sync(USER).await });
    started.notified().await;
    assert!(h.orchestrator.cancel(USER));
    release.notify_one();

    let report = cycle.await.unwrap().unwrap();
    assert_eq!(report.result, CycleResult::Cancelled);
    assert_eq!(report.applied, 2);
    let links = h.state.load_links(USER).unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].notion_id, "notion-1");
    assert_eq!(links[0].google_id, "g1");
    assert!(h.notion.get("notion-1").unwrap().external_id_google.is_none());

    // Nothing on the Notion page points back at g1; only the link prevents a second copy.
    let next = h.orchestrator.trigger_sync(USER).await.unwrap();
    assert_eq!(next.result, CycleResult::Converged);
    assert_eq!(next.planned, 0);
    assert_eq!(h.notion.len(), 1);
    assert_eq!(h.google.len(), 1);
}

#[tokio::test]
async fn cycles_for_one_user_never_overlap() {
    let h = harness_with(
        FakeProvider::new(Provider::Notion),
        FakeProvider::new(Provider::Google).with_delay(Duration::from_millis(30)),
        Arc::new(StaticGate::new(true)),
    )
    .await;

    let (a, b) = tokio::join!(
        h.orchestrator.trigger_sync(USER),
        h.orchestrator.trigger_sync(USER)
    );
    a.unwrap();
    b.unwrap();
    assert_eq!(h.google.max_in_flight.load(Ordering::SeqCst), 1);

    h.add_user("u2").await;
    let (a, b) = tokio::join!(
        h.orchestrator.trigger_sync(USER),
        h.orchestrator.trigger_sync("u2")
    );
    a.unwrap();
    b.unwrap();
    assert_eq!(h.google.max_in_flight.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn account_gate_blocks_sync() {
    let h = harness_with(
        FakeProvider::new(Provider::Notion),
        FakeProvider::new(Provider::Google),
        Arc::new(StaticGate::new(false)),
    )
    .await;

    let err = h.orchestrator.trigger_sync(USER).await.unwrap_err();
    assert!(matches!(err, SyncError::SyncNotPermitted(_)));
    assert_eq!(h.notion.listings.load(Ordering::SeqCst), 0);
    let status = h.orchestrator.get_status(USER).unwrap();
    assert_eq!(status.last_error, Some(ErrorCategory::NotPermitted));
}

#[tokio::test]
async fn disconnect_clears_links_and_credential() {
    let h = harness().await;
    h.notion.put(task(Provider::Notion, "n1", "Buy milk"));
    h.orchestrator.trigger_sync(USER).await.unwrap();

    h.orchestrator
        .disconnect_provider(USER, Provider::Google)
        .await
        .unwrap();
    assert!(h.state.load_links(USER).unwrap().is_empty());
    assert!(h.state.load_cursor(USER, Provider::Google).unwrap().is_none());
    assert!(h.credentials.info(USER, Provider::Google).unwrap().is_none());

    let report = h.orchestrator.trigger_sync(USER).await.unwrap();
    assert_eq!(report.degraded, vec![Provider::Google]);
    assert_eq!(report.error_category, Some(ErrorCategory::CredentialMissing));
}

#[tokio::test(start_paused = true)]
async fn periodic_runner_accepts_zero_interval() {
    let h = harness().await;
    h.notion.put(task(Provider::Notion, "n1", "Buy milk"));

    let runner = h.orchestrator.clone();
    let periodic = tokio::spawn(runner.run_periodic(
        Duration::ZERO,
        tokio::time::sleep(Duration::from_millis(2500)),
    ));
    tokio::time::timeout(Duration::from_secs(10), periodic)
        .await
        .expect("periodic runner did not stop")
        .unwrap();

    // Clamped to one tick per second: immediately, then at 1s and 2s.
    assert_eq!(h.notion.listings.load(Ordering::SeqCst), 3);
    assert_eq!(h.google.len(), 1);
    assert!(h.orchestrator.get_status(USER).unwrap().next_scheduled_at.is_none());
}

#[tokio::test]
async fn unknown_users_are_rejected() {
    let h = harness().await;
    let err = h.orchestrator.trigger_sync("nobody").await.unwrap_err();
    assert!(matches!(err, SyncError::UserNotRegistered(_)));
    assert_eq!(h.orchestrator.get_status("nobody").unwrap().last_result, None);
    assert!(!h.orchestrator.cancel("nobody"));
}
