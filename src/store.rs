use crate::columns::{custom_id_from_key, custom_key};
use crate::errors::{AppError, AppResult};
use crate::layout::{bottom_edge, clamp_to_grid, default_size, normalize_widget, reflow, type_minimum};
use crate::models::{
    ChartConfig, CustomColumn, Dashboard, GridRect, MetricConfig, TableWidget, Widget, WidgetFilter, WidgetKind,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Position reported by the canvas after a drag or resize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutItem {
    pub id: String,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Every edit the canvas can make to the widget list or dashboard name.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    AddWidget { id: String, kind: WidgetKind },
    RemoveWidget { id: String },
    DuplicateWidget { source_id: String, new_id: String },
    Rename { name: String },
    UpdateContent { id: String, content: String },
    SetFilters { id: String, filters: Vec<WidgetFilter> },
    SetMetricConfig { id: String, config: MetricConfig },
    SetChartConfig { id: String, config: ChartConfig },
    SetTableDisplayName { id: String, display_name: String },
    RenameColumn { id: String, key: String, alias: String },
    ToggleColumnHidden { id: String, key: String },
    ReorderColumns { id: String, order: Vec<String> },
    AddCustomColumn { id: String, column: CustomColumn },
    UpdateCustomColumn { id: String, column: CustomColumn },
    RemoveCustomColumn { id: String, custom_id: String },
    ApplyGridLayout { items: Vec<LayoutItem> },
    Reflow,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddWidget { .. } => "add_widget",
            Self::RemoveWidget { .. } => "remove_widget",
            Self::DuplicateWidget { .. } => "duplicate_widget",
            Self::Rename { .. } => "rename",
            Self::UpdateContent { .. } => "update_content",
            Self::SetFilters { .. } => "set_filters",
            Self::SetMetricConfig { .. } => "set_metric_config",
            Self::SetChartConfig { .. } => "set_chart_config",
            Self::SetTableDisplayName { .. } => "set_table_display_name",
            Self::RenameColumn { .. } => "rename_column",
            Self::ToggleColumnHidden { .. } => "toggle_column_hidden",
            Self::ReorderColumns { .. } => "reorder_columns",
            Self::AddCustomColumn { .. } => "add_custom_column",
            Self::UpdateCustomColumn { .. } => "update_custom_column",
            Self::RemoveCustomColumn { .. } => "remove_custom_column",
            Self::ApplyGridLayout { .. } => "apply_grid_layout",
            Self::Reflow => "reflow",
        }
    }
}

/// Pure transition: returns the next dashboard, leaving `state` untouched.
/// Unknown widget ids and actions that do not fit the widget's type are
/// rejected with `INVALID_INPUT`/`NOT_FOUND`.
pub fn reduce(state: &Dashboard, action: Action, cols: u32) -> AppResult<Dashboard> {
    let mut next = state.clone();
    match action {
        Action::AddWidget { id, kind } => {
            ensure_free_id(&next, &id)?;
            let (w, h) = default_size(kind.widget_type(), cols);
            let (min_w, min_h) = type_minimum(kind.widget_type());
            let y = bottom_edge(&next.widgets);
            next.widgets.push(Widget {
                id,
                x: 0,
                y,
                w,
                h,
                min_w,
                min_h,
                kind,
            });
        }
        Action::RemoveWidget { id } => {
            let index = position(&next, &id)?;
            next.widgets.remove(index);
        }
        Action::DuplicateWidget { source_id, new_id } => {
            let index = position(&next, &source_id)?;
            ensure_free_id(&next, &new_id)?;
            let source = &next.widgets[index];
            let mut copy = source.clone();
            copy.id = new_id;
            copy.y = source.rect().bottom();
            if let WidgetKind::Table(table) = &mut copy.kind {
                regenerate_custom_ids(table);
            }
            next.widgets.insert(index + 1, copy);
        }
        Action::Rename { name } => next.name = name.trim().to_string(),
        Action::UpdateContent { id, content } => match &mut widget_mut(&mut next, &id)?.kind {
            WidgetKind::Heading(block) | WidgetKind::Text(block) => block.content = content,
            _ => return Err(mismatch(&id, "text content")),
        },
        Action::SetFilters { id, filters } => {
            let widget = widget_mut(&mut next, &id)?;
            let Some(slot) = widget.kind.filters_mut() else {
                return Err(mismatch(&id, "filters"));
            };
            *slot = filters;
        }
        Action::SetMetricConfig { id, config } => match &mut widget_mut(&mut next, &id)?.kind {
            WidgetKind::Metric(metric) => metric.metric_config = config,
            _ => return Err(mismatch(&id, "a metric config")),
        },
        Action::SetChartConfig { id, config } => match &mut widget_mut(&mut next, &id)?.kind {
            WidgetKind::Chart(chart) => chart.chart_config = config,
            _ => return Err(mismatch(&id, "a chart config")),
        },
        Action::SetTableDisplayName { id, display_name } => {
            let table = table_mut(&mut next, &id)?;
            let trimmed = display_name.trim();
            table.display_name = (!trimmed.is_empty()).then(|| trimmed.to_string());
        }
        Action::RenameColumn { id, key, alias } => {
            let table = table_mut(&mut next, &id)?;
            let alias = alias.trim();
            if alias.is_empty() {
                table.column_aliases.remove(&key);
            } else {
                table.column_aliases.insert(key, alias.to_string());
            }
        }
        Action::ToggleColumnHidden { id, key } => {
            let table = table_mut(&mut next, &id)?;
            match table.hidden_columns.iter().position(|hidden| *hidden == key) {
                Some(index) => {
                    table.hidden_columns.remove(index);
                }
                None => table.hidden_columns.push(key),
            }
        }
        Action::ReorderColumns { id, order } => {
            let table = table_mut(&mut next, &id)?;
            let mut deduped: Vec<String> = Vec::with_capacity(order.len());
            for key in order {
                if !deduped.contains(&key) {
                    deduped.push(key);
                }
            }
            table.column_order = Some(deduped);
        }
        Action::AddCustomColumn { id, column } => {
            validate_custom_column(&column)?;
            let table = table_mut(&mut next, &id)?;
            if table.custom_columns.iter().any(|existing| existing.id == column.id) {
                return Err(AppError::Invalid(format!(
                    "Custom column {} already exists on widget {}",
                    column.id, id
                )));
            }
            table.custom_columns.push(column);
        }
        Action::UpdateCustomColumn { id, column } => {
            validate_custom_column(&column)?;
            let table = table_mut(&mut next, &id)?;
            let Some(existing) = table.custom_columns.iter_mut().find(|existing| existing.id == column.id) else {
                return Err(AppError::NotFound(format!(
                    "Custom column {} not found on widget {}",
                    column.id, id
                )));
            };
            *existing = column;
        }
        Action::RemoveCustomColumn { id, custom_id } => {
            let table = table_mut(&mut next, &id)?;
            let before = table.custom_columns.len();
            table.custom_columns.retain(|column| column.id != custom_id);
            if table.custom_columns.len() == before {
                return Err(AppError::NotFound(format!(
                    "Custom column {} not found on widget {}",
                    custom_id, id
                )));
            }
            purge_column_key(table, &custom_key(&custom_id));
        }
        Action::ApplyGridLayout { items } => {
            for item in items {
                let Some(widget) = next.widgets.iter_mut().find(|widget| widget.id == item.id) else {
                    debug!(widget_id = %item.id, "ignoring layout for unknown widget");
                    continue;
                };
                let (min_w, min_h) = type_minimum(widget.widget_type());
                let rect = GridRect {
                    x: item.x,
                    y: item.y,
                    w: item.w,
                    h: item.h,
                };
                widget.set_rect(clamp_to_grid(rect, min_w, min_h, cols));
            }
        }
        Action::Reflow => reflow(&mut next.widgets, cols),
    }
    Ok(next)
}

fn position(state: &Dashboard, id: &str) -> AppResult<usize> {
    state
        .widgets
        .iter()
        .position(|widget| widget.id == id)
        .ok_or_else(|| AppError::NotFound(format!("Widget {} not found", id)))
}

fn ensure_free_id(state: &Dashboard, id: &str) -> AppResult<()> {
    if state.widgets.iter().any(|widget| widget.id == id) {
        return Err(AppError::Invalid(format!("Widget id {} already exists", id)));
    }
    Ok(())
}

fn widget_mut<'a>(state: &'a mut Dashboard, id: &str) -> AppResult<&'a mut Widget> {
    let index = position(state, id)?;
    Ok(&mut state.widgets[index])
}

fn table_mut<'a>(state: &'a mut Dashboard, id: &str) -> AppResult<&'a mut TableWidget> {
    match &mut widget_mut(state, id)?.kind {
        WidgetKind::Table(table) => Ok(table),
        _ => Err(mismatch(id, "table columns")),
    }
}

fn mismatch(id: &str, what: &str) -> AppError {
    AppError::Invalid(format!("Widget {} does not support {}", id, what))
}

fn validate_custom_column(column: &CustomColumn) -> AppResult<()> {
    if column.id.trim().is_empty() {
        return Err(AppError::Invalid("Custom column id must not be empty".to_string()));
    }
    if column.name.trim().is_empty() {
        return Err(AppError::Invalid("Custom column name must not be empty".to_string()));
    }
    Ok(())
}

fn purge_column_key(table: &mut TableWidget, key: &str) {
    table.column_aliases.remove(key);
    table.hidden_columns.retain(|hidden| hidden != key);
    if let Some(order) = table.column_order.as_mut() {
        order.retain(|entry| entry != key);
    }
}

// Fresh custom column ids, with every reference to the old keys rewritten.
fn regenerate_custom_ids(table: &mut TableWidget) {
    for column in &mut table.custom_columns {
        let old_key = custom_key(&column.id);
        column.id = Uuid::new_v4().to_string();
        let new_key = custom_key(&column.id);

        if let Some(alias) = table.column_aliases.remove(&old_key) {
            table.column_aliases.insert(new_key.clone(), alias);
        }
        for hidden in &mut table.hidden_columns {
            if *hidden == old_key {
                hidden.clone_from(&new_key);
            }
        }
        if let Some(order) = table.column_order.as_mut() {
            for entry in order.iter_mut().filter(|entry| **entry == old_key) {
                entry.clone_from(&new_key);
            }
        }
        for filter in &mut table.filters {
            if filter.column == old_key {
                filter.column.clone_from(&new_key);
            }
        }
    }
}

/// Owns the canonical dashboard and a revision that moves on every accepted
/// edit.
#[derive(Debug, Clone)]
pub struct DashboardStore {
    dashboard: Dashboard,
    revision: u64,
    cols: u32,
}

impl DashboardStore {
    pub fn new(name: &str, cols: u32) -> Self {
        Self {
            dashboard: Dashboard {
                id: String::new(),
                name: name.to_string(),
                widgets: Vec::new(),
                created_at: None,
                updated_at: None,
            },
            revision: 0,
            cols,
        }
    }

    /// Adopts a loaded document; runtime minimums are re-derived.
    pub fn from_dashboard(mut dashboard: Dashboard, cols: u32) -> Self {
        for widget in &mut dashboard.widgets {
            normalize_widget(widget, cols);
        }
        Self {
            dashboard,
            revision: 0,
            cols,
        }
    }

    pub fn dashboard(&self) -> &Dashboard {
        &self.dashboard
    }

    pub fn widgets(&self) -> &[Widget] {
        &self.dashboard.widgets
    }

    pub fn widget(&self, id: &str) -> Option<&Widget> {
        self.dashboard.widgets.iter().find(|widget| widget.id == id)
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    /// Records the id assigned by the first successful save.
    pub fn set_document_id(&mut self, id: &str) {
        if self.dashboard.id.is_empty() {
            self.dashboard.id = id.to_string();
        }
    }

    pub fn dispatch(&mut self, action: Action) -> AppResult<u64> {
        let name = action.name();
        let next = reduce(&self.dashboard, action, self.cols)?;
        self.dashboard = next;
        self.revision += 1;
        debug!(action = name, revision = self.revision, "dashboard updated");
        Ok(self.revision)
    }

    pub fn add_widget(&mut self, kind: WidgetKind) -> AppResult<String> {
        let id = Uuid::new_v4().to_string();
        self.dispatch(Action::AddWidget { id: id.clone(), kind })?;
        Ok(id)
    }

    pub fn duplicate_widget(&mut self, source_id: &str) -> AppResult<String> {
        let new_id = Uuid::new_v4().to_string();
        self.dispatch(Action::DuplicateWidget {
            source_id: source_id.to_string(),
            new_id: new_id.clone(),
        })?;
        Ok(new_id)
    }

    pub fn remove_widget(&mut self, id: &str) -> AppResult<u64> {
        self.dispatch(Action::RemoveWidget { id: id.to_string() })
    }

    pub fn rename(&mut self, name: &str) -> AppResult<u64> {
        self.dispatch(Action::Rename { name: name.to_string() })
    }

    pub fn reflow(&mut self) -> AppResult<u64> {
        self.dispatch(Action::Reflow)
    }

    /// The custom column behind a `custom:<id>` key on a table widget.
    pub fn custom_column(&self, widget_id: &str, key: &str) -> Option<&CustomColumn> {
        let custom_id = custom_id_from_key(key)?;
        match &self.widget(widget_id)?.kind {
            WidgetKind::Table(table) => table.custom_columns.iter().find(|column| column.id == custom_id),
            _ => None,
        }
    }
}
