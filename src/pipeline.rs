use crate::aggregate::{compute_metric, format_metric};
use crate::chart::{compute_chart, ChartPoint};
use crate::columns::{custom_key, resolve_columns, ResolvedColumn};
use crate::filter::filter_rows;
use crate::formula;
use crate::models::{
    ChartWidget, ColumnConfig, DashboardSettings, MetricWidget, Row, TableWidget, Widget, WidgetFilter, WidgetKind,
    PLACEHOLDER,
};
use crate::sort::{sort_rows, SortState};
use crate::values::{format_with_affixes, stringify};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Number, Value};
use std::collections::{BTreeMap, BTreeSet};

/// A source row plus its computed custom cells. Custom cells hold the raw
/// numeric value (or `null` when the formula did not resolve) under
/// `custom:<id>`; `formatted` carries their display text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRow {
    pub cells: Row,
    pub formatted: BTreeMap<String, String>,
}

impl TableRow {
    pub fn display(&self, key: &str) -> String {
        if let Some(text) = self.formatted.get(key) {
            return text.clone();
        }
        self.cells.get(key).map(stringify).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableView {
    pub columns: Vec<ResolvedColumn>,
    pub rows: Vec<TableRow>,
    pub total_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricView {
    pub label: String,
    pub value: Option<f64>,
    pub display: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WidgetView {
    Table(TableView),
    Metric(MetricView),
    Chart { points: Vec<ChartPoint> },
    Static,
}

/// Inputs shared by every data-bound widget on one refresh.
#[derive(Debug, Clone, Copy)]
pub struct ViewContext<'a> {
    pub rows: &'a [Row],
    pub columns: &'a [ColumnConfig],
    pub settings: &'a DashboardSettings,
    pub now: DateTime<Utc>,
}

impl<'a> ViewContext<'a> {
    // An empty column list means the schema is unknown and filters are not
    // checked against it.
    fn known_columns(&self) -> Option<BTreeSet<String>> {
        if self.columns.is_empty() {
            return None;
        }
        Some(self.columns.iter().map(|column| column.source_path.clone()).collect())
    }
}

pub fn compute_view(widget: &Widget, context: &ViewContext<'_>, sort: Option<&SortState>) -> WidgetView {
    match &widget.kind {
        WidgetKind::Table(table) => WidgetView::Table(table_view(table, context, sort)),
        WidgetKind::Metric(metric) => WidgetView::Metric(metric_view(metric, context)),
        WidgetKind::Chart(chart) => WidgetView::Chart {
            points: chart_view(chart, context),
        },
        WidgetKind::Heading(_) | WidgetKind::Text(_) | WidgetKind::Divider => WidgetView::Static,
    }
}

/// Custom columns are evaluated first so filters and sorting can target them.
pub fn table_view(table: &TableWidget, context: &ViewContext<'_>, sort: Option<&SortState>) -> TableView {
    let columns = resolve_columns(context.columns, table);
    let augmented = context
        .rows
        .iter()
        .map(|row| with_custom_values(row, table))
        .collect::<Vec<_>>();

    let known = context.known_columns().map(|mut known| {
        known.extend(table.custom_columns.iter().map(|custom| custom_key(&custom.id)));
        known
    });
    let kept = filter_rows(&augmented, &table.filters, known.as_ref());
    let rows = sort_rows(&kept, sort)
        .into_iter()
        .map(|cells| TableRow {
            formatted: format_custom_cells(cells, table),
            cells: cells.clone(),
        })
        .collect();

    TableView {
        columns,
        total_rows: context.rows.len(),
        rows,
    }
}

fn with_custom_values(row: &Row, table: &TableWidget) -> Row {
    let mut cells = row.clone();
    for custom in &table.custom_columns {
        let cell = formula::evaluate_value(&custom.formula, row)
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null);
        cells.insert(custom_key(&custom.id), cell);
    }
    cells
}

fn format_custom_cells(cells: &Row, table: &TableWidget) -> BTreeMap<String, String> {
    table
        .custom_columns
        .iter()
        .map(|custom| {
            let key = custom_key(&custom.id);
            let text = match cells.get(&key).and_then(Value::as_f64) {
                Some(value) => format_with_affixes(
                    value,
                    custom.format_prefix.as_deref(),
                    custom.format_suffix.as_deref(),
                ),
                None => PLACEHOLDER.to_string(),
            };
            (key, text)
        })
        .collect()
}

pub fn metric_view(metric: &MetricWidget, context: &ViewContext<'_>) -> MetricView {
    let known = context.known_columns();
    let rows = filtered_owned(context.rows, &metric.filters, known.as_ref());
    let value = compute_metric(&rows, &metric.metric_config, context.now);
    MetricView {
        label: metric.metric_config.label.clone(),
        display: format_metric(value, &metric.metric_config),
        value,
    }
}

pub fn chart_view(chart: &ChartWidget, context: &ViewContext<'_>) -> Vec<ChartPoint> {
    let known = context.known_columns();
    let rows = filtered_owned(context.rows, &chart.filters, known.as_ref());
    compute_chart(&rows, &chart.chart_config, context.now, context.settings.max_chart_bars)
}

fn filtered_owned(
    rows: &[Row],
    filters: &[WidgetFilter],
    known: Option<&BTreeSet<String>>,
) -> Vec<Row> {
    if filters.is_empty() {
        return rows.to_vec();
    }
    filter_rows(rows, filters, known).into_iter().cloned().collect()
}
