use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// A flat, already denormalized record as delivered by a row source.
pub type Row = serde_json::Map<String, serde_json::Value>;

pub const PLACEHOLDER: &str = "—";

// ─── Column model ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ColumnConfig {
    pub id: String,
    pub source_path: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub data_type: String,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CustomColumn {
    pub id: String,
    pub name: String,
    pub formula: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_suffix: Option<String>,
}

// ─── Filters ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    IsEmpty,
    IsNotEmpty,
}

impl FilterOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::StartsWith => "starts_with",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::IsEmpty => "is_empty",
            Self::IsNotEmpty => "is_not_empty",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let operator = match raw.trim() {
            "equals" => Self::Equals,
            "not_equals" => Self::NotEquals,
            "contains" => Self::Contains,
            "not_contains" => Self::NotContains,
            "starts_with" => Self::StartsWith,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "is_empty" => Self::IsEmpty,
            "is_not_empty" => Self::IsNotEmpty,
            _ => return None,
        };
        Some(operator)
    }
}

/// A half-configured filter (empty column or unknown operator) is kept in the
/// document but evaluates as a no-op, so the operator is optional here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WidgetFilter {
    pub id: String,
    #[serde(default)]
    pub column: String,
    #[serde(
        default,
        serialize_with = "serialize_operator",
        deserialize_with = "deserialize_operator"
    )]
    pub operator: Option<FilterOperator>,
    #[serde(default)]
    pub value: String,
}

fn serialize_operator<S: Serializer>(
    operator: &Option<FilterOperator>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(operator.map(FilterOperator::as_str).unwrap_or(""))
}

fn deserialize_operator<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<FilterOperator>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(FilterOperator::parse))
}

// ─── Aggregation configs ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Count,
    Sum,
    Average,
    Min,
    Max,
    CountDistinct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Timeframe {
    #[default]
    #[serde(rename = "all")]
    All,
    #[serde(rename = "7d")]
    Last7Days,
    #[serde(rename = "30d")]
    Last30Days,
    #[serde(rename = "90d")]
    Last90Days,
    #[serde(rename = "this_month")]
    ThisMonth,
    #[serde(rename = "this_year")]
    ThisYear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DateTruncate {
    #[default]
    None,
    Day,
    Week,
    Month,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    #[default]
    Bar,
    Line,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChartSortBy {
    Value,
    #[default]
    Category,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricConfig {
    pub table_id: String,
    pub aggregation: Aggregation,
    #[serde(default)]
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<Timeframe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_label: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colour: Option<String>,
}

impl MetricConfig {
    pub fn new(table_id: &str, aggregation: Aggregation, column: &str) -> Self {
        Self {
            table_id: table_id.to_string(),
            aggregation,
            column: column.to_string(),
            date_column: None,
            timeframe: None,
            prefix: None,
            suffix: None,
            label: String::new(),
            layout: None,
            title_size: None,
            value_size: None,
            show_label: None,
            colour: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    #[serde(default)]
    pub chart_type: ChartType,
    pub table_id: String,
    pub category_column: String,
    #[serde(default)]
    pub value_column: String,
    pub aggregation: Aggregation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<Timeframe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_truncate: Option<DateTruncate>,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bars: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<ChartSortBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colour: Option<String>,
}

impl ChartConfig {
    pub fn new(table_id: &str, category_column: &str, aggregation: Aggregation) -> Self {
        Self {
            chart_type: ChartType::Bar,
            table_id: table_id.to_string(),
            category_column: category_column.to_string(),
            value_column: String::new(),
            aggregation,
            date_column: None,
            timeframe: None,
            date_truncate: None,
            label: String::new(),
            max_bars: None,
            sort_by: None,
            colour: None,
        }
    }
}

// ─── Widgets ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TableWidget {
    pub table_id: String,
    #[serde(default)]
    pub table_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub column_aliases: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hidden_columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_columns: Vec<CustomColumn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_order: Option<Vec<String>>,
    #[serde(default)]
    pub filters: Vec<WidgetFilter>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TextBlock {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricWidget {
    pub metric_config: MetricConfig,
    #[serde(default)]
    pub filters: Vec<WidgetFilter>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartWidget {
    pub chart_config: ChartConfig,
    #[serde(default)]
    pub filters: Vec<WidgetFilter>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WidgetKind {
    Table(TableWidget),
    Heading(TextBlock),
    Text(TextBlock),
    Divider,
    Metric(MetricWidget),
    Chart(ChartWidget),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetType {
    Table,
    Heading,
    Text,
    Divider,
    Metric,
    Chart,
}

impl WidgetType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Heading => "heading",
            Self::Text => "text",
            Self::Divider => "divider",
            Self::Metric => "metric",
            Self::Chart => "chart",
        }
    }
}

impl WidgetKind {
    pub fn widget_type(&self) -> WidgetType {
        match self {
            Self::Table(_) => WidgetType::Table,
            Self::Heading(_) => WidgetType::Heading,
            Self::Text(_) => WidgetType::Text,
            Self::Divider => WidgetType::Divider,
            Self::Metric(_) => WidgetType::Metric,
            Self::Chart(_) => WidgetType::Chart,
        }
    }

    pub fn filters(&self) -> &[WidgetFilter] {
        match self {
            Self::Table(table) => &table.filters,
            Self::Metric(metric) => &metric.filters,
            Self::Chart(chart) => &chart.filters,
            Self::Heading(_) | Self::Text(_) | Self::Divider => &[],
        }
    }

    pub fn filters_mut(&mut self) -> Option<&mut Vec<WidgetFilter>> {
        match self {
            Self::Table(table) => Some(&mut table.filters),
            Self::Metric(metric) => Some(&mut metric.filters),
            Self::Chart(chart) => Some(&mut chart.filters),
            Self::Heading(_) | Self::Text(_) | Self::Divider => None,
        }
    }

    /// The upstream table a data-bound widget reads from.
    pub fn table_id(&self) -> Option<&str> {
        match self {
            Self::Table(table) => Some(table.table_id.as_str()),
            Self::Metric(metric) => Some(metric.metric_config.table_id.as_str()),
            Self::Chart(chart) => Some(chart.chart_config.table_id.as_str()),
            Self::Heading(_) | Self::Text(_) | Self::Divider => None,
        }
    }
}

/// One positioned element on the canvas. `min_w`/`min_h` are runtime-only and
/// re-derived from the widget type whenever a document is loaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Widget {
    pub id: String,
    #[serde(default)]
    pub x: u32,
    #[serde(default)]
    pub y: u32,
    #[serde(default)]
    pub w: u32,
    #[serde(default)]
    pub h: u32,
    #[serde(skip)]
    pub min_w: u32,
    #[serde(skip)]
    pub min_h: u32,
    #[serde(flatten)]
    pub kind: WidgetKind,
}

impl Widget {
    pub fn widget_type(&self) -> WidgetType {
        self.kind.widget_type()
    }

    pub fn rect(&self) -> GridRect {
        GridRect {
            x: self.x,
            y: self.y,
            w: self.w,
            h: self.h,
        }
    }

    pub fn set_rect(&mut self, rect: GridRect) {
        self.x = rect.x;
        self.y = rect.y;
        self.w = rect.w;
        self.h = rect.h;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl GridRect {
    pub fn bottom(&self) -> u32 {
        self.y + self.h
    }

    pub fn right(&self) -> u32 {
        self.x + self.w
    }

    pub fn overlaps(&self, other: &GridRect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

// ─── Dashboard document ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    #[serde(default, skip_serializing)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub widgets: Vec<Widget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub id: String,
    pub name: String,
    pub widget_count: usize,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SaveStatus {
    Idle,
    Saving,
    Saved,
    Error,
}

impl SaveStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Saving => "saving",
            Self::Saved => "saved",
            Self::Error => "error",
        }
    }
}

// ─── Settings ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardSettings {
    pub grid_cols: u32,
    pub autosave_debounce_ms: u64,
    pub status_reset_ms: u64,
    pub collection: String,
    pub max_chart_bars: usize,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            grid_cols: 12,
            autosave_debounce_ms: 1_500,
            status_reset_ms: 2_000,
            collection: "dashboards".to_string(),
            max_chart_bars: 20,
        }
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn widget_round_trips_through_persisted_shape() {
        let raw = json!({
            "id": "w1",
            "type": "metric",
            "x": 0, "y": 2, "w": 3, "h": 4,
            "metricConfig": {
                "tableId": "orders",
                "aggregation": "count_distinct",
                "column": "customer",
                "timeframe": "30d",
                "label": "Customers"
            },
            "filters": [{ "id": "f1", "column": "status", "operator": "equals", "value": "paid" }]
        });
        let widget: Widget = serde_json::from_value(raw).expect("parse widget");
        assert_eq!(widget.widget_type(), WidgetType::Metric);
        assert_eq!(widget.kind.filters().len(), 1);
        assert_eq!(widget.kind.table_id(), Some("orders"));

        let back = serde_json::to_value(&widget).expect("serialize");
        assert_eq!(back["type"], "metric");
        assert_eq!(back["metricConfig"]["timeframe"], "30d");
        assert!(back.get("minW").is_none());
    }

    #[test]
    fn unknown_filter_operator_is_kept_as_unset() {
        let filter: WidgetFilter = serde_json::from_value(json!({
            "id": "f", "column": "a", "operator": "", "value": "x"
        }))
        .expect("parse filter");
        assert_eq!(filter.operator, None);
        let back = serde_json::to_value(&filter).expect("serialize");
        assert_eq!(back["operator"], "");
    }

    #[test]
    fn divider_has_no_payload() {
        let widget: Widget =
            serde_json::from_value(json!({ "id": "d", "type": "divider", "x": 0, "y": 0, "w": 12, "h": 1 }))
                .expect("parse divider");
        assert_eq!(widget.kind, WidgetKind::Divider);
        assert!(widget.kind.filters().is_empty());
    }

    #[test]
    fn rect_overlap_is_exclusive_on_edges() {
        let a = GridRect { x: 0, y: 0, w: 6, h: 2 };
        let b = GridRect { x: 6, y: 0, w: 6, h: 2 };
        let c = GridRect { x: 5, y: 1, w: 2, h: 2 };
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
    }
}
