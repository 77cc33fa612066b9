//! Per-user sync cycles.
//!
//! A cycle walks `Idle -> Fetching -> Reconciling -> Applying -> Committing`
//! and ends back in `Idle`, or in `Failed` from any phase. Cycles for one user
//! are serialized by a mutex; different users run independently.
//!
//! Nothing is persisted until `Committing`, and then only the outcome of
//! operations that succeeded. Everything else is rediscovered by the next
//! cycle, because detection compares live provider data with the link table.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::detector::{detect, ProviderDelta};
use super::reconciler::reconcile;
use crate::credentials::{BearerToken, CredentialStore};
use crate::error::{ErrorCategory, ProviderError, SyncError};
use crate::events::{Event, EventBus};
use crate::model::{LinkChange, LinkRecord, OperationKind, Provider, SyncCursor, SyncOperation};
use crate::providers::{BackoffPolicy, ProviderAdapter};
use crate::storage::{AccountConfig, CycleCommit, StateDb, SyncSettings};

/// Shortest accepted period for `run_periodic`.
const MIN_PERIODIC_INTERVAL: Duration = Duration::from_secs(1);

/// Decides whether a user's account may sync at all.
pub trait AccountGate: Send + Sync {
    fn can_sync(&self, user: &str) -> bool;
}

/// Gate backed by a fixed flag, normally `[account] can_sync`.
#[derive(Debug, Clone, Copy)]
pub struct StaticGate {
    allowed: bool,
}

impl StaticGate {
    pub fn new(allowed: bool) -> Self {
        Self { allowed }
    }

    pub fn from_config(account: &AccountConfig) -> Self {
        Self::new(account.can_sync)
    }
}

impl AccountGate for StaticGate {
    fn can_sync(&self, _user: &str) -> bool {
        self.allowed
    }
}

/// The two adapters a user syncs between.
#[derive(Clone)]
pub struct AdapterSet {
    pub notion: Arc<dyn ProviderAdapter>,
    pub google: Arc<dyn ProviderAdapter>,
}

impl AdapterSet {
    pub fn new(notion: Arc<dyn ProviderAdapter>, google: Arc<dyn ProviderAdapter>) -> Self {
        Self { notion, google }
    }

    pub fn get(&self, provider: Provider) -> &Arc<dyn ProviderAdapter> {
        match provider {
            Provider::Notion => &self.notion,
            Provider::Google => &self.google,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    #[default]
    Idle,
    Fetching,
    Reconciling,
    Applying,
    Committing,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleResult {
    /// Every planned operation was applied.
    Converged,
    /// Some operations failed or a provider was degraded.
    Partial,
    Cancelled,
    Failed,
}

impl CycleResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleResult::Converged => "converged",
            CycleResult::Partial => "partial",
            CycleResult::Cancelled => "cancelled",
            CycleResult::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeState {
    Applied,
    Failed,
    Skipped,
}

/// What happened to one planned operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub index: usize,
    pub kind: OperationKind,
    pub description: String,
    pub state: OutcomeState,
    pub attempts: u32,
    pub error: Option<String>,
}

/// Result of a completed (possibly partial) cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub cycle_id: String,
    pub user: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub result: CycleResult,
    /// Providers whose cursor was rejected and whose snapshot was rebuilt.
    pub full_resync: Vec<Provider>,
    /// Providers skipped this cycle after a fetch failure.
    pub degraded: Vec<Provider>,
    pub planned: usize,
    pub applied: usize,
    pub failed: usize,
    pub skipped: usize,
    pub outcomes: Vec<OperationOutcome>,
    pub error_category: Option<ErrorCategory>,
    pub errors: Vec<String>,
}

impl SyncReport {
    fn new(cycle_id: &str, user: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            cycle_id: cycle_id.to_string(),
            user: user.to_string(),
            started_at,
            finished_at: started_at,
            result: CycleResult::Converged,
            full_resync: Vec::new(),
            degraded: Vec::new(),
            planned: 0,
            applied: 0,
            failed: 0,
            skipped: 0,
            outcomes: Vec::new(),
            error_category: None,
            errors: Vec::new(),
        }
    }

    fn note_error(&mut self, category: ErrorCategory, message: String) {
        self.error_category.get_or_insert(category);
        self.errors.push(message);
    }

    fn record(&mut self, outcome: OperationOutcome) {
        match outcome.state {
            OutcomeState::Applied => self.applied += 1,
            OutcomeState::Failed => self.failed += 1,
            OutcomeState::Skipped => self.skipped += 1,
        }
        self.outcomes.push(outcome);
    }

    fn finish(&mut self, cancelled: bool) {
        self.finished_at = Utc::now();
        self.result = if cancelled {
            CycleResult::Cancelled
        } else if self.failed > 0 || self.skipped > 0 || !self.degraded.is_empty() {
            CycleResult::Partial
        } else {
            CycleResult::Converged
        };
    }

    pub fn summary(&self) -> String {
        let mut text = format!("{} of {} operations applied", self.applied, self.planned);
        if self.failed > 0 {
            text.push_str(&format!(", {} failed", self.failed));
        }
        if self.skipped > 0 {
            text.push_str(&format!(", {} skipped", self.skipped));
        }
        if !self.degraded.is_empty() {
            let names: Vec<&str> = self.degraded.iter().map(|p| p.as_str()).collect();
            text.push_str(&format!("; degraded: {}", names.join(", ")));
        }
        if self.result == CycleResult::Cancelled {
            text.push_str("; cancelled");
        }
        text
    }
}

/// What `get_status` reports for a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub phase: CyclePhase,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_result: Option<CycleResult>,
    pub last_error: Option<ErrorCategory>,
    pub summary: Option<String>,
    pub next_scheduled_at: Option<DateTime<Utc>>,
}

struct UserSlot {
    adapters: AdapterSet,
    cycle: tokio::sync::Mutex<()>,
    running: AtomicBool,
    cancel: AtomicBool,
    status: Mutex<SyncStatus>,
}

impl UserSlot {
    fn new(adapters: AdapterSet, mut status: SyncStatus) -> Self {
        status.phase = match status.phase {
            CyclePhase::Failed => CyclePhase::Failed,
            _ => CyclePhase::Idle,
        };
        Self {
            adapters,
            cycle: tokio::sync::Mutex::new(()),
            running: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
            status: Mutex::new(status),
        }
    }

    fn update(&self, f: impl FnOnce(&mut SyncStatus)) {
        let mut status = self.status.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut status);
    }

    fn set_phase(&self, phase: CyclePhase) {
        self.update(|s| s.phase = phase);
    }

    fn status(&self) -> SyncStatus {
        self.status.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

/// One provider after a successful fetch.
struct Fetched {
    provider: Provider,
    token: BearerToken,
    delta: ProviderDelta,
    cursor: SyncCursor,
    full_resync: bool,
}

/// Link-table edits accumulated while applying.
#[derive(Default)]
struct LinkEdits {
    upserts: BTreeMap<String, LinkRecord>,
    removals: BTreeSet<String>,
}

impl LinkEdits {
    fn upsert(&mut self, link: LinkRecord) {
        self.removals.remove(&link.link_id);
        self.upserts.insert(link.link_id.clone(), link);
    }

    fn remove(&mut self, link_id: &str) {
        self.upserts.remove(link_id);
        self.removals.insert(link_id.to_string());
    }
}

enum Step {
    Applied(u32),
    Failed(ProviderError, u32),
    Skipped(&'static str),
}

/// Drives sync cycles for every registered user.
pub struct SyncOrchestrator {
    credentials: Arc<CredentialStore>,
    state: Arc<StateDb>,
    gate: Arc<dyn AccountGate>,
    events: EventBus,
    settings: SyncSettings,
    users: RwLock<HashMap<String, Arc<UserSlot>>>,
}

impl SyncOrchestrator {
    pub fn new(
        credentials: Arc<CredentialStore>,
        state: Arc<StateDb>,
        gate: Arc<dyn AccountGate>,
        events: EventBus,
        settings: SyncSettings,
    ) -> Self {
        Self {
            credentials,
            state,
            gate,
            events,
            settings,
            users: RwLock::new(HashMap::new()),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Make `user` syncable with the given adapters. Re-registering
    /// replaces the adapters and keeps the persisted status.
    pub fn register(&self, user: &str, adapters: AdapterSet) -> Result<(), SyncError> {
        let persisted = match self.state.load_status::<SyncStatus>(user) {
            Ok(status) => status.unwrap_or_default(),
            Err(err) => {
                warn!(user, error = %err, "could not load persisted sync status");
                SyncStatus::default()
            }
        };
        let slot = Arc::new(UserSlot::new(adapters, persisted));
        self.users
            .write()
            .map_err(|_| poisoned())?
            .insert(user.to_string(), slot);
        info!(user, "registered for sync");
        Ok(())
    }

    pub fn registered_users(&self) -> Vec<String> {
        let users = self.users.read().unwrap_or_else(|p| p.into_inner());
        let mut names: Vec<String> = users.keys().cloned().collect();
        names.sort();
        names
    }

    fn slot(&self, user: &str) -> Result<Arc<UserSlot>, SyncError> {
        self.users
            .read()
            .map_err(|_| poisoned())?
            .get(user)
            .cloned()
            .ok_or_else(|| SyncError::UserNotRegistered(user.to_string()))
    }

    /// Live status for registered users, the persisted one otherwise.
    pub fn get_status(&self, user: &str) -> Result<SyncStatus, SyncError> {
        match self.slot(user) {
            Ok(slot) => Ok(slot.status()),
            Err(SyncError::UserNotRegistered(_)) => {
                Ok(self.state.load_status(user)?.unwrap_or_default())
            }
            Err(err) => Err(err),
        }
    }

    /// Ask an in-flight cycle to stop before its next operation.
    /// Returns `false` when no cycle is running for `user`.
    pub fn cancel(&self, user: &str) -> bool {
        let Ok(slot) = self.slot(user) else {
            return false;
        };
        if !slot.running.load(Ordering::SeqCst) {
            return false;
        }
        slot.cancel.store(true, Ordering::SeqCst);
        info!(user, "cancellation requested");
        true
    }

    /// Forget the provider's credential and every link, cursor and snapshot
    /// that depends on it. The next cycle starts from a full listing.
    pub async fn disconnect_provider(&self, user: &str, provider: Provider) -> Result<(), SyncError> {
        let slot = self.slot(user).ok();
        let _cycle = match &slot {
            Some(slot) => Some(slot.cycle.lock().await),
            None => None,
        };
        self.credentials.invalidate(user, provider).await?;
        self.state.clear_provider(user, provider)?;
        info!(user, provider = provider.as_str(), "provider disconnected");
        Ok(())
    }

    /// Run one cycle for `user`, waiting for any cycle already in flight.
    pub async fn trigger_sync(&self, user: &str) -> Result<SyncReport, SyncError> {
        let slot = self.slot(user)?;
        if !self.gate.can_sync(user) {
            let err = SyncError::SyncNotPermitted(user.to_string());
            warn!(user, "account is not permitted to sync");
            slot.update(|s| {
                s.last_error = Some(err.category());
                s.summary = Some(err.to_string());
            });
            return Err(err);
        }

        let _cycle = slot.cycle.lock().await;
        slot.cancel.store(false, Ordering::SeqCst);
        slot.running.store(true, Ordering::SeqCst);

        let cycle_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!(user, cycle_id = %cycle_id, "sync cycle started");
        self.events.publish(Event::CycleStarted {
            user: user.to_string(),
            cycle_id: cycle_id.clone(),
            at: started_at,
        });

        let outcome = self.run_cycle(user, &slot, &cycle_id, started_at).await;
        slot.running.store(false, Ordering::SeqCst);

        match outcome {
            Ok(report) => {
                self.finish(user, &slot, &report);
                Ok(report)
            }
            Err(err) => {
                self.fail(user, &slot, &cycle_id, &err);
                Err(err)
            }
        }
    }

    async fn run_cycle(
        &self,
        user: &str,
        slot: &UserSlot,
        cycle_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::new(cycle_id, user, started_at);

        slot.set_phase(CyclePhase::Fetching);
        let links = self.state.load_links(user)?;
        let (notion, google) = tokio::join!(
            self.fetch(user, slot.adapters.notion.as_ref(), &links),
            self.fetch(user, slot.adapters.google.as_ref(), &links),
        );

        let (notion, google) = match (notion, google) {
            (Ok(notion), Ok(google)) => (notion, google),
            (Err(notion), Err(google)) => {
                return Err(SyncError::ProvidersUnavailable {
                    notion: Box::new(notion),
                    google: Box::new(google),
                });
            }
            (Ok(healthy), Err(err)) | (Err(err), Ok(healthy)) => {
                let degraded = healthy.provider.other();
                self.degrade(user, degraded, &err);
                report.degraded.push(degraded);
                report.note_error(err.category(), format!("{}: {err}", degraded.as_str()));
                if healthy.full_resync {
                    report.full_resync.push(healthy.provider);
                }

                // Reconciling needs both sides; only the healthy fetch is kept.
                slot.set_phase(CyclePhase::Committing);
                let commit = CycleCommit {
                    providers: vec![(healthy.cursor, healthy.delta.view)],
                    ..Default::default()
                };
                self.state.commit(user, &commit)?;
                report.finish(false);
                return Ok(report);
            }
        };
        for fetched in [&notion, &google] {
            if fetched.full_resync {
                report.full_resync.push(fetched.provider);
            }
        }

        slot.set_phase(CyclePhase::Reconciling);
        let ops = reconcile(&notion.delta, &google.delta, &links)?;
        report.planned = ops.len();
        debug!(user, planned = ops.len(), "reconciled");

        slot.set_phase(CyclePhase::Applying);
        let mut edits = LinkEdits::default();
        let cancelled = self
            .apply(user, slot, &ops, &notion.token, &google.token, &mut report, &mut edits)
            .await;

        slot.set_phase(CyclePhase::Committing);
        let commit = CycleCommit {
            upsert_links: edits.upserts.into_values().collect(),
            remove_links: edits.removals.into_iter().collect(),
            providers: vec![
                (notion.cursor, notion.delta.view),
                (google.cursor, google.delta.view),
            ],
        };
        self.state.commit(user, &commit)?;

        report.finish(cancelled);
        Ok(report)
    }

    async fn fetch(
        &self,
        user: &str,
        adapter: &dyn ProviderAdapter,
        links: &[LinkRecord],
    ) -> Result<Fetched, SyncError> {
        let provider = adapter.provider();
        let token = self.credentials.get_valid_token(user, provider).await?;
        let previous = self.state.load_snapshot(user, provider)?;
        let cursor = self.state.load_cursor(user, provider)?;

        let (listing, full_resync) = match adapter.list_changes(&token, cursor.as_ref()).await {
            Ok(listing) => (listing, false),
            Err(ProviderError::CursorInvalidated { .. }) if cursor.is_some() => {
                warn!(
                    user,
                    provider = provider.as_str(),
                    "change cursor invalidated, rebuilding snapshot"
                );
                (adapter.list_changes(&token, None).await?, true)
            }
            Err(err) => return Err(err.into()),
        };

        let delta = detect(provider, &previous, &listing, links);
        debug!(
            user,
            provider = provider.as_str(),
            changes = delta.changes.len(),
            items = delta.view.len(),
            full_scan = listing.full_scan,
            "provider fetched"
        );
        Ok(Fetched {
            provider,
            token,
            delta,
            cursor: SyncCursor::new(provider, listing.cursor, Utc::now()),
            full_resync,
        })
    }

    fn degrade(&self, user: &str, provider: Provider, err: &SyncError) {
        warn!(
            user,
            provider = provider.as_str(),
            category = %err.category(),
            error = %err,
            "provider degraded for this cycle"
        );
        self.events.publish(Event::ProviderDegraded {
            user: user.to_string(),
            provider,
            category: err.category(),
            at: Utc::now(),
        });
    }

    /// Apply `ops` in order. Returns `true` when the cycle was cancelled.
    #[allow(clippy::too_many_arguments)]
    async fn apply(
        &self,
        user: &str,
        slot: &UserSlot,
        ops: &[SyncOperation],
        notion_token: &BearerToken,
        google_token: &BearerToken,
        report: &mut SyncReport,
        edits: &mut LinkEdits,
    ) -> bool {
        let policy = BackoffPolicy::for_apply(&self.settings);
        let token_for = |provider: Provider| match provider {
            Provider::Notion => notion_token,
            Provider::Google => google_token,
        };
        let mut created: HashMap<usize, String> = HashMap::new();
        let mut cancelled = false;

        for (index, op) in ops.iter().enumerate() {
            if !cancelled && slot.cancel.load(Ordering::SeqCst) {
                info!(user, remaining = ops.len() - index, "cycle cancelled");
                cancelled = true;
            }
            // A created item stays linked even when the cycle stops right after it.
            if cancelled && !links_applied_create(op, &created) {
                report.record(outcome(index, op, Step::Skipped("cycle cancelled")));
                continue;
            }

            let step = match op {
                SyncOperation::Create { provider, item } => {
                    let adapter = slot.adapters.get(*provider);
                    let token = token_for(*provider);
                    match with_retry(&policy, move || adapter.create_item(token, item)).await {
                        (Ok(id), attempts) => {
                            debug!(user, op = %op.describe(), id = %id, "created");
                            created.insert(index, id);
                            Step::Applied(attempts)
                        }
                        (Err(err), attempts) => Step::Failed(err, attempts),
                    }
                }
                SyncOperation::Update {
                    provider,
                    id,
                    patch,
                    link,
                } => {
                    let adapter = slot.adapters.get(*provider);
                    let token = token_for(*provider);
                    match with_retry(&policy, move || adapter.update_item(token, id, patch)).await {
                        (Ok(()), attempts) => {
                            if let Some(record) = link.resolve(&created, Utc::now()) {
                                edits.upsert(record);
                            }
                            Step::Applied(attempts)
                        }
                        (Err(err), attempts) => Step::Failed(err, attempts),
                    }
                }
                SyncOperation::Delete {
                    provider,
                    id,
                    link_id,
                } => {
                    let adapter = slot.adapters.get(*provider);
                    let token = token_for(*provider);
                    match with_retry(&policy, move || adapter.delete_item(token, id)).await {
                        (Ok(()), attempts) => {
                            edits.remove(link_id);
                            Step::Applied(attempts)
                        }
                        (Err(err), attempts) => Step::Failed(err, attempts),
                    }
                }
                SyncOperation::LinkOnly(LinkChange::Establish(pending)) => {
                    match pending.resolve(&created, Utc::now()) {
                        Some(record) => {
                            edits.upsert(record);
                            Step::Applied(0)
                        }
                        None => Step::Skipped("create did not succeed"),
                    }
                }
                SyncOperation::LinkOnly(LinkChange::Dissolve { link_id }) => {
                    edits.remove(link_id);
                    Step::Applied(0)
                }
            };

            if let Step::Failed(err, attempts) = &step {
                let failure = SyncError::OperationApplyFailed {
                    operation: op.describe(),
                    source: err.clone(),
                };
                warn!(user, op = %op.describe(), attempts, error = %err, "operation failed, skipping");
                report.note_error(failure.category(), failure.to_string());
                self.events.publish(Event::OperationFailed {
                    user: user.to_string(),
                    operation: op.describe(),
                    attempts: *attempts,
                    category: failure.category(),
                    at: Utc::now(),
                });
            }
            report.record(outcome(index, op, step));
        }
        cancelled
    }

    fn finish(&self, user: &str, slot: &UserSlot, report: &SyncReport) {
        info!(
            user,
            cycle_id = %report.cycle_id,
            result = report.result.as_str(),
            applied = report.applied,
            failed = report.failed,
            skipped = report.skipped,
            "sync cycle finished"
        );
        slot.update(|s| {
            s.phase = CyclePhase::Idle;
            s.last_run_at = Some(report.finished_at);
            s.last_result = Some(report.result);
            s.last_error = report.error_category;
            s.summary = Some(report.summary());
        });
        self.persist_status(user, slot);
        self.events.publish(Event::CycleCompleted {
            user: user.to_string(),
            cycle_id: report.cycle_id.clone(),
            applied: report.applied,
            failed: report.failed,
            at: report.finished_at,
        });
    }

    fn fail(&self, user: &str, slot: &UserSlot, cycle_id: &str, err: &SyncError) {
        match err {
            SyncError::InvariantViolation(_) => {
                error!(user, cycle_id, error = %err, "sync cycle aborted")
            }
            _ => warn!(user, cycle_id, category = %err.category(), error = %err, "sync cycle failed"),
        }
        slot.update(|s| {
            s.phase = CyclePhase::Failed;
            s.last_run_at = Some(Utc::now());
            s.last_result = Some(CycleResult::Failed);
            s.last_error = Some(err.category());
            s.summary = Some(err.to_string());
        });
        self.persist_status(user, slot);
        self.events.publish(Event::CycleFailed {
            user: user.to_string(),
            cycle_id: cycle_id.to_string(),
            category: err.category(),
            at: Utc::now(),
        });
    }

    fn persist_status(&self, user: &str, slot: &UserSlot) {
        if let Err(err) = self.state.save_status(user, &slot.status()) {
            warn!(user, error = %err, "could not persist sync status");
        }
    }

    fn set_next_scheduled(&self, at: Option<DateTime<Utc>>) {
        let users = self.users.read().unwrap_or_else(|p| p.into_inner());
        for slot in users.values() {
            slot.update(|s| s.next_scheduled_at = at);
        }
    }

    /// Trigger a cycle for every registered user each `interval` until
    /// `shutdown` resolves. In-flight cycles are cancelled on shutdown.
    pub async fn run_periodic(self: Arc<Self>, interval: Duration, shutdown: impl Future<Output = ()>) {
        if interval < MIN_PERIODIC_INTERVAL {
            warn!(
                requested_ms = interval.as_millis() as u64,
                "periodic interval too short, using the minimum"
            );
        }
        let interval = interval.max(MIN_PERIODIC_INTERVAL);
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let step = chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::zero());
        info!(interval_secs = interval.as_secs(), "periodic sync started");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.set_next_scheduled(Some(Utc::now() + step));
                    let round = Arc::clone(&self).run_round();
                    tokio::pin!(round);
                    tokio::select! {
                        _ = &mut round => {}
                        _ = &mut shutdown => {
                            for user in self.registered_users() {
                                self.cancel(&user);
                            }
                            round.await;
                            break;
                        }
                    }
                }
            }
        }

        self.set_next_scheduled(None);
        info!("periodic sync stopped");
    }

    /// One cycle per registered user, run concurrently.
    async fn run_round(self: Arc<Self>) {
        let mut handles = Vec::new();
        for user in self.registered_users() {
            let orchestrator = Arc::clone(&self);
            handles.push(tokio::spawn(async move {
                let result = orchestrator.trigger_sync(&user).await;
                (user, result)
            }));
        }
        for handle in handles {
            match handle.await {
                Ok((user, Ok(report))) => {
                    debug!(user, summary = %report.summary(), "scheduled cycle done")
                }
                Ok((user, Err(err))) => debug!(user, error = %err, "scheduled cycle failed"),
                Err(err) => warn!(error = %err, "scheduled cycle task panicked"),
            }
        }
    }
}

fn poisoned() -> SyncError {
    SyncError::InvariantViolation("orchestrator user table poisoned".into())
}

fn outcome(index: usize, op: &SyncOperation, step: Step) -> OperationOutcome {
    let (state, attempts, error) = match step {
        Step::Applied(attempts) => (OutcomeState::Applied, attempts, None),
        Step::Failed(err, attempts) => (OutcomeState::Failed, attempts, Some(err.to_string())),
        Step::Skipped(reason) => (OutcomeState::Skipped, 0, Some(reason.to_string())),
    };
    OperationOutcome {
        index,
        kind: op.kind(),
        description: op.describe(),
        state,
        attempts,
        error,
    }
}

fn links_applied_create(op: &SyncOperation, created: &HashMap<usize, String>) -> bool {
    match op {
        SyncOperation::LinkOnly(LinkChange::Establish(pending)) => pending
            .depends_on()
            .is_some_and(|index| created.contains_key(&index)),
        _ => false,
    }
}

/// Re-run `call` while the error is retryable and attempts remain.
/// Returns the final result with the number of attempts made.
async fn with_retry<T, F, Fut>(policy: &BackoffPolicy, mut call: F) -> (Result<T, ProviderError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match call().await {
            Ok(value) => return (Ok(value), attempts),
            Err(err) if err.is_retryable() && policy.has_attempts_left(attempts) => {
                let delay = policy.delay_for(attempts, None);
                debug!(attempt = attempts, error = %err, delay_ms = delay.as_millis() as u64, "retrying operation");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return (Err(err), attempts),
        }
    }
}
