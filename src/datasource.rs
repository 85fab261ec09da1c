use crate::errors::{AppError, AppResult};
use crate::models::{ColumnConfig, Row, Widget};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = AppResult<T>> + Send + 'a>>;

/// Flat, already denormalized records for a table id.
pub trait RowSource: Send + Sync {
    fn fetch_rows<'a>(&'a self, table_id: &'a str) -> SourceFuture<'a, Vec<Row>>;
}

/// Ordered column descriptors for a table id.
pub trait ColumnSource: Send + Sync {
    fn fetch_columns<'a>(&'a self, table_id: &'a str) -> SourceFuture<'a, Vec<ColumnConfig>>;
}

/// Query-style tables carry their rows inline; everything else goes to the
/// remote source.
pub struct LayeredRowSource {
    embedded: HashMap<String, Arc<Vec<Row>>>,
    remote: Arc<dyn RowSource>,
}

impl LayeredRowSource {
    pub fn new(remote: Arc<dyn RowSource>) -> Self {
        Self {
            embedded: HashMap::new(),
            remote,
        }
    }

    pub fn with_query_rows(mut self, table_id: &str, rows: Vec<Row>) -> Self {
        self.embedded.insert(table_id.to_string(), Arc::new(rows));
        self
    }
}

impl RowSource for LayeredRowSource {
    fn fetch_rows<'a>(&'a self, table_id: &'a str) -> SourceFuture<'a, Vec<Row>> {
        if let Some(rows) = self.embedded.get(table_id) {
            let rows = rows.as_ref().clone();
            return Box::pin(async move { Ok(rows) });
        }
        self.remote.fetch_rows(table_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedState {
    Loading,
    Ready {
        rows: Arc<Vec<Row>>,
        columns: Arc<Vec<ColumnConfig>>,
    },
    Failed {
        message: String,
    },
}

impl FeedState {
    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            Self::Ready { rows, .. } => Some(rows.as_slice()),
            Self::Loading | Self::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
struct FeedEntry {
    generation: u64,
    table_id: String,
    state: FeedState,
}

/// Per-widget fetch state. A newer request for the same widget always wins:
/// results of older requests are dropped after every await point.
#[derive(Clone)]
pub struct WidgetFeed {
    rows: Arc<dyn RowSource>,
    columns: Arc<dyn ColumnSource>,
    entries: Arc<Mutex<HashMap<String, FeedEntry>>>,
}

impl WidgetFeed {
    pub fn new(rows: Arc<dyn RowSource>, columns: Arc<dyn ColumnSource>) -> Self {
        Self {
            rows,
            columns,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn state(&self, widget_id: &str) -> Option<FeedState> {
        let entries = self.entries.lock().await;
        entries.get(widget_id).map(|entry| entry.state.clone())
    }

    pub async fn table_id(&self, widget_id: &str) -> Option<String> {
        let entries = self.entries.lock().await;
        entries.get(widget_id).map(|entry| entry.table_id.clone())
    }

    /// Fetches rows and columns for `table_id` on behalf of `widget_id`.
    /// Returns `None` when a newer request superseded this one.
    pub async fn load(&self, widget_id: &str, table_id: &str) -> Option<FeedState> {
        let generation = {
            let mut entries = self.entries.lock().await;
            begin(&mut entries, widget_id, table_id)
        };
        self.fetch(widget_id, table_id, generation).await
    }

    /// Re-runs the last request for a widget.
    pub async fn retry(&self, widget_id: &str) -> AppResult<Option<FeedState>> {
        let Some(table_id) = self.table_id(widget_id).await else {
            return Err(AppError::NotFound(format!("No feed for widget {}", widget_id)));
        };
        Ok(self.load(widget_id, &table_id).await)
    }

    /// Marks every data-bound widget whose table binding changed as loading,
    /// drops feeds of widgets that are gone, and starts the fetches in the
    /// background. Returns without waiting; the handles may be awaited.
    pub async fn sync(&self, widgets: &[Widget]) -> Vec<JoinHandle<()>> {
        let mut started = Vec::new();
        {
            let mut entries = self.entries.lock().await;
            entries.retain(|widget_id, _| widgets.iter().any(|widget| &widget.id == widget_id));
            for widget in widgets {
                let Some(table_id) = widget.kind.table_id().filter(|table_id| !table_id.is_empty()) else {
                    continue;
                };
                let unchanged = entries
                    .get(&widget.id)
                    .is_some_and(|entry| entry.table_id == table_id);
                if !unchanged {
                    let generation = begin(&mut entries, &widget.id, table_id);
                    started.push((widget.id.clone(), table_id.to_string(), generation));
                }
            }
        }

        started
            .into_iter()
            .map(|(widget_id, table_id, generation)| {
                let feed = self.clone();
                tokio::spawn(async move {
                    feed.fetch(&widget_id, &table_id, generation).await;
                })
            })
            .collect()
    }

    async fn fetch(&self, widget_id: &str, table_id: &str, generation: u64) -> Option<FeedState> {
        let rows = self.rows.fetch_rows(table_id).await;
        if !self.is_current(widget_id, generation).await {
            debug!(widget_id, table_id, "dropping stale row fetch");
            return None;
        }

        let state = match rows {
            Ok(rows) => match self.columns.fetch_columns(table_id).await {
                Ok(columns) => FeedState::Ready {
                    rows: Arc::new(rows),
                    columns: Arc::new(columns),
                },
                Err(error) => failed(widget_id, table_id, error),
            },
            Err(error) => failed(widget_id, table_id, error),
        };

        let mut entries = self.entries.lock().await;
        match entries.get_mut(widget_id) {
            Some(entry) if entry.generation == generation => {
                entry.state = state.clone();
                Some(state)
            }
            _ => {
                debug!(widget_id, table_id, "dropping stale column fetch");
                None
            }
        }
    }

    async fn is_current(&self, widget_id: &str, generation: u64) -> bool {
        let entries = self.entries.lock().await;
        entries
            .get(widget_id)
            .is_some_and(|entry| entry.generation == generation)
    }
}

// Starts a new request generation for the widget and resets it to loading.
fn begin(entries: &mut HashMap<String, FeedEntry>, widget_id: &str, table_id: &str) -> u64 {
    let generation = entries.get(widget_id).map(|entry| entry.generation + 1).unwrap_or(1);
    entries.insert(
        widget_id.to_string(),
        FeedEntry {
            generation,
            table_id: table_id.to_string(),
            state: FeedState::Loading,
        },
    );
    generation
}

fn failed(widget_id: &str, table_id: &str, error: AppError) -> FeedState {
    warn!(widget_id, table_id, error = %error, "widget fetch failed");
    FeedState::Failed {
        message: error.to_string(),
    }
}
