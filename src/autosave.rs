use crate::datasource::SourceFuture;
use crate::errors::{AppError, AppResult};
use crate::layout::normalize_widget;
use crate::models::{Dashboard, DashboardSettings, SaveStatus};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Durable document persistence. `merge = true` deep-merges `partial` into
/// the stored document, creating it when absent.
pub trait DocumentStore: Send + Sync {
    fn save<'a>(&'a self, path: &'a str, partial: Value, merge: bool) -> SourceFuture<'a, ()>;
    fn load<'a>(&'a self, path: &'a str) -> SourceFuture<'a, Option<Value>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    Idle,
    Pending,
    Saving,
}

struct AutosaveState {
    document_id: Option<String>,
    created_at: Option<DateTime<Utc>>,
    initial_load_done: bool,
    phase: TimerPhase,
    generation: u64,
    pending: Option<JoinHandle<()>>,
    latest: Option<Dashboard>,
    status_epoch: u64,
}

/// Debounced create-or-update persistence for one dashboard instance. At
/// most one timer is pending; a new edit replaces it.
#[derive(Clone)]
pub struct AutosaveCoordinator {
    store: Arc<dyn DocumentStore>,
    settings: DashboardSettings,
    state: Arc<Mutex<AutosaveState>>,
    status: Arc<watch::Sender<SaveStatus>>,
    save_lock: Arc<Mutex<()>>,
}

impl AutosaveCoordinator {
    pub fn new(store: Arc<dyn DocumentStore>, settings: DashboardSettings) -> Self {
        let (status, _) = watch::channel(SaveStatus::Idle);
        Self {
            store,
            settings,
            state: Arc::new(Mutex::new(AutosaveState {
                document_id: None,
                created_at: None,
                initial_load_done: false,
                phase: TimerPhase::Idle,
                generation: 0,
                pending: None,
                latest: None,
                status_epoch: 0,
            })),
            status: Arc::new(status),
            save_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SaveStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> SaveStatus {
        *self.status.borrow()
    }

    pub async fn phase(&self) -> TimerPhase {
        self.state.lock().await.phase
    }

    pub async fn document_id(&self) -> Option<String> {
        self.state.lock().await.document_id.clone()
    }

    fn path_for(&self, id: &str) -> String {
        format!("{}/{}", self.settings.collection, id)
    }

    /// Opens an existing document. Runtime minimums are re-derived and legacy
    /// coordinates rescaled before the dashboard is handed back.
    pub async fn load(&self, id: &str) -> AppResult<Option<Dashboard>> {
        let path = self.path_for(id);
        let Some(raw) = self.store.load(&path).await? else {
            self.mark_loaded().await;
            return Ok(None);
        };
        let mut dashboard: Dashboard = serde_json::from_value(raw)?;
        dashboard.id = id.to_string();
        for widget in &mut dashboard.widgets {
            normalize_widget(widget, self.settings.grid_cols);
        }

        let mut state = self.state.lock().await;
        state.document_id = Some(id.to_string());
        state.created_at = dashboard.created_at;
        state.initial_load_done = true;
        info!(dashboard_id = %id, widgets = dashboard.widgets.len(), "dashboard loaded");
        Ok(Some(dashboard))
    }

    /// Enables autosave for a dashboard that was not loaded from the store.
    pub async fn mark_loaded(&self) {
        self.state.lock().await.initial_load_done = true;
    }

    /// Schedules a debounced save of `dashboard`. Returns `false` when the
    /// edit was ignored (initial load pending or no widgets).
    pub async fn notify_edit(&self, dashboard: Dashboard) -> bool {
        let mut state = self.state.lock().await;
        if !state.initial_load_done {
            return false;
        }
        if dashboard.widgets.is_empty() {
            debug!("skipping autosave of an empty dashboard");
            return false;
        }

        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
        state.generation += 1;
        state.latest = Some(dashboard);
        if state.phase == TimerPhase::Idle {
            state.phase = TimerPhase::Pending;
        }

        let generation = state.generation;
        let delay = Duration::from_millis(self.settings.autosave_debounce_ms);
        let coordinator = self.clone();
        state.pending = Some(tokio::spawn(async move {
            sleep(delay).await;
            coordinator.flush(generation).await;
        }));
        true
    }

    /// Saves immediately, cancelling any pending debounced save.
    pub async fn save_now(&self, dashboard: Dashboard) -> AppResult<Option<String>> {
        {
            let mut state = self.state.lock().await;
            if let Some(pending) = state.pending.take() {
                pending.abort();
            }
            state.generation += 1;
            state.latest = None;
        }
        if dashboard.widgets.is_empty() {
            debug!("skipping save of an empty dashboard");
            return Ok(None);
        }
        self.persist(dashboard).await.map(Some)
    }

    async fn flush(&self, generation: u64) {
        let dashboard = {
            let mut state = self.state.lock().await;
            if state.generation != generation {
                return;
            }
            state.pending = None;
            state.latest.take()
        };
        if let Some(dashboard) = dashboard {
            // Failures are already logged and reflected in the status.
            let _ = self.persist(dashboard).await;
        }
    }

    async fn persist(&self, dashboard: Dashboard) -> AppResult<String> {
        let _guard = self.save_lock.lock().await;
        let (document_id, created_at) = {
            let mut state = self.state.lock().await;
            state.phase = TimerPhase::Saving;
            (state.document_id.clone(), state.created_at)
        };
        self.set_status(SaveStatus::Saving).await;

        let now = Utc::now();
        let result = match document_id {
            Some(id) => self.update(&id, &dashboard, now).await.map(|()| (id, created_at)),
            None => {
                let id = Uuid::new_v4().to_string();
                self.create(&id, &dashboard, now).await.map(|()| (id, Some(now)))
            }
        };

        let outcome = {
            let mut state = self.state.lock().await;
            state.phase = if state.pending.is_some() {
                TimerPhase::Pending
            } else {
                TimerPhase::Idle
            };
            match result {
                Ok((id, created_at)) => {
                    if state.document_id.is_none() {
                        state.document_id = Some(id.clone());
                        state.created_at = created_at;
                    }
                    Ok(id)
                }
                Err(error) => Err(error),
            }
        };

        match &outcome {
            Ok(id) => {
                debug!(dashboard_id = %id, widgets = dashboard.widgets.len(), "dashboard saved");
                self.set_status(SaveStatus::Saved).await;
            }
            Err(error) => {
                warn!(error = %error, "dashboard save failed");
                self.set_status(SaveStatus::Error).await;
            }
        }
        outcome
    }

    async fn create(&self, id: &str, dashboard: &Dashboard, now: DateTime<Utc>) -> AppResult<()> {
        let mut body = document_body(dashboard)?;
        body.insert("createdAt".to_string(), serde_json::to_value(now)?);
        body.insert("updatedAt".to_string(), serde_json::to_value(now)?);
        self.store.save(&self.path_for(id), Value::Object(body), true).await
    }

    async fn update(&self, id: &str, dashboard: &Dashboard, now: DateTime<Utc>) -> AppResult<()> {
        let mut body = document_body(dashboard)?;
        body.remove("createdAt");
        body.insert("updatedAt".to_string(), serde_json::to_value(now)?);
        self.store.save(&self.path_for(id), Value::Object(body), true).await
    }

    // Saved/Error revert to Idle after the reset delay unless a newer status
    // was published in the meantime.
    async fn set_status(&self, status: SaveStatus) {
        let epoch = {
            let mut state = self.state.lock().await;
            state.status_epoch += 1;
            state.status_epoch
        };
        self.status.send_replace(status);
        debug!(status = status.as_str(), epoch, "save status changed");
        if matches!(status, SaveStatus::Saved | SaveStatus::Error) {
            let coordinator = self.clone();
            let delay = Duration::from_millis(self.settings.status_reset_ms);
            tokio::spawn(async move {
                sleep(delay).await;
                let state = coordinator.state.lock().await;
                if state.status_epoch == epoch {
                    coordinator.status.send_replace(SaveStatus::Idle);
                }
            });
        }
    }
}

fn document_body(dashboard: &Dashboard) -> AppResult<serde_json::Map<String, Value>> {
    match serde_json::to_value(dashboard)? {
        Value::Object(body) => Ok(body),
        _ => Err(AppError::Internal("Dashboard did not serialize to an object".to_string())),
    }
}
