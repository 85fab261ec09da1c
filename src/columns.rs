use crate::models::{ColumnConfig, CustomColumn, TableWidget};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const CUSTOM_KEY_PREFIX: &str = "custom:";

pub fn custom_key(custom_id: &str) -> String {
    format!("{CUSTOM_KEY_PREFIX}{custom_id}")
}

pub fn custom_id_from_key(key: &str) -> Option<&str> {
    key.strip_prefix(CUSTOM_KEY_PREFIX)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnSourceKind {
    Source { data_type: String },
    Custom { custom_id: String },
}

/// One column as a table widget shows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedColumn {
    pub key: String,
    pub label: String,
    pub hidden: bool,
    #[serde(flatten)]
    pub kind: ColumnSourceKind,
}

/// Effective column list for a table widget. Upstream-invisible columns are
/// dropped; `columnOrder` only reorders the keys it names, everything else
/// keeps its default position after them.
pub fn resolve_columns(source: &[ColumnConfig], table: &TableWidget) -> Vec<ResolvedColumn> {
    let hidden = table.hidden_columns.iter().map(String::as_str).collect::<HashSet<_>>();

    let mut upstream = source.iter().filter(|column| column.visible).collect::<Vec<_>>();
    upstream.sort_by_key(|column| column.order);

    let mut columns = upstream
        .into_iter()
        .map(|column| ResolvedColumn {
            key: column.source_path.clone(),
            label: source_label(column, table),
            hidden: hidden.contains(column.source_path.as_str()),
            kind: ColumnSourceKind::Source {
                data_type: column.data_type.clone(),
            },
        })
        .collect::<Vec<_>>();

    columns.extend(table.custom_columns.iter().map(|custom| custom_column(custom, table, &hidden)));

    match &table.column_order {
        Some(order) => apply_partial_order(columns, order),
        None => columns,
    }
}

fn source_label(column: &ColumnConfig, table: &TableWidget) -> String {
    if let Some(alias) = table
        .column_aliases
        .get(&column.source_path)
        .filter(|alias| !alias.trim().is_empty())
    {
        return alias.clone();
    }
    if !column.alias.trim().is_empty() {
        return column.alias.clone();
    }
    column.source_path.clone()
}

fn custom_column(custom: &CustomColumn, table: &TableWidget, hidden: &HashSet<&str>) -> ResolvedColumn {
    let key = custom_key(&custom.id);
    let label = table
        .column_aliases
        .get(&key)
        .filter(|alias| !alias.trim().is_empty())
        .cloned()
        .unwrap_or_else(|| custom.name.clone());
    ResolvedColumn {
        hidden: hidden.contains(key.as_str()),
        label,
        key,
        kind: ColumnSourceKind::Custom {
            custom_id: custom.id.clone(),
        },
    }
}

fn apply_partial_order(columns: Vec<ResolvedColumn>, order: &[String]) -> Vec<ResolvedColumn> {
    let mut remaining = columns.into_iter().map(Some).collect::<Vec<_>>();
    let mut ordered = Vec::with_capacity(remaining.len());

    for key in order {
        if let Some(slot) = remaining
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|column| &column.key == key))
        {
            ordered.extend(slot.take());
        }
    }
    ordered.extend(remaining.into_iter().flatten());
    ordered
}
