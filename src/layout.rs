use crate::models::{GridRect, Widget, WidgetType};

pub const DEFAULT_GRID_COLS: u32 = 12;
/// Rows left between consecutive layout groups.
pub const GROUP_GAP: u32 = 1;
pub const METRIC_CARD_MIN_W: u32 = 3;

const HEADING_H: u32 = 1;
const TEXT_H: u32 = 2;
const METRIC_H: u32 = 2;
const DIVIDER_H: u32 = 1;
const CHART_H: u32 = 4;
const TABLE_H: u32 = 6;

/// Runtime minimum `(minW, minH)` per widget type.
pub fn type_minimum(widget_type: WidgetType) -> (u32, u32) {
    match widget_type {
        WidgetType::Table => (4, 3),
        WidgetType::Heading => (2, 1),
        WidgetType::Text => (2, 1),
        WidgetType::Divider => (2, 1),
        WidgetType::Metric => (2, 2),
        WidgetType::Chart => (4, 3),
    }
}

/// Size a freshly added widget gets before anyone drags it.
pub fn default_size(widget_type: WidgetType, cols: u32) -> (u32, u32) {
    let cols = cols.max(1);
    let (w, h) = match widget_type {
        WidgetType::Table => (cols, TABLE_H),
        WidgetType::Heading => (cols, HEADING_H),
        WidgetType::Text => (cols / 2, TEXT_H + 1),
        WidgetType::Divider => (cols, DIVIDER_H),
        WidgetType::Metric => (METRIC_CARD_MIN_W, METRIC_H + 1),
        WidgetType::Chart => (cols / 2, CHART_H),
    };
    let (min_w, min_h) = type_minimum(widget_type);
    (w.max(min_w).min(cols), h.max(min_h))
}

/// Re-derives the runtime-only minimums from the widget type.
pub fn apply_type_defaults(widget: &mut Widget) {
    let (min_w, min_h) = type_minimum(widget.widget_type());
    widget.min_w = min_w;
    widget.min_h = min_h;
}

/// Documents written under a wider grid are detected by `x >= cols` or
/// `w > cols` and halved. Returns whether the widget was rescaled.
pub fn migrate_legacy_coordinates(widget: &mut Widget, cols: u32) -> bool {
    if widget.x < cols && widget.w <= cols {
        return false;
    }
    let (min_w, _) = type_minimum(widget.widget_type());
    widget.x /= 2;
    widget.w = (widget.w / 2).max(min_w);
    true
}

/// Forces a rectangle back inside the grid and above its minimums.
pub fn clamp_to_grid(rect: GridRect, min_w: u32, min_h: u32, cols: u32) -> GridRect {
    let cols = cols.max(1);
    let w = rect.w.max(min_w).clamp(1, cols);
    let h = rect.h.max(min_h).max(1);
    let x = rect.x.min(cols - w);
    GridRect { x, y: rect.y, w, h }
}

/// Load-time normalisation: minimums, legacy rescale, then clamping.
pub fn normalize_widget(widget: &mut Widget, cols: u32) {
    apply_type_defaults(widget);
    migrate_legacy_coordinates(widget, cols);
    let rect = clamp_to_grid(widget.rect(), widget.min_w, widget.min_h, cols);
    widget.set_rect(rect);
}

/// Lowest occupied row; new widgets are dropped here.
pub fn bottom_edge(widgets: &[Widget]) -> u32 {
    widgets.iter().map(|widget| widget.rect().bottom()).max().unwrap_or(0)
}

/// Pairs of widget ids whose rectangles intersect.
pub fn find_overlaps(widgets: &[Widget]) -> Vec<(String, String)> {
    let mut overlaps = Vec::new();
    for (index, left) in widgets.iter().enumerate() {
        for right in &widgets[index + 1..] {
            if left.rect().overlaps(&right.rect()) {
                overlaps.push((left.id.clone(), right.id.clone()));
            }
        }
    }
    overlaps
}

/// Computes a fresh rectangle for every widget from its type alone, in input
/// order. Existing positions are ignored.
pub fn auto_layout(widgets: &[Widget], cols: u32) -> Vec<GridRect> {
    let cols = cols.max(1);
    let mut rects: Vec<Option<GridRect>> = vec![None; widgets.len()];
    let of_type = |kind: WidgetType| {
        widgets
            .iter()
            .enumerate()
            .filter(|(_, widget)| widget.widget_type() == kind)
            .map(|(index, _)| index)
            .collect::<Vec<_>>()
    };

    let headings = of_type(WidgetType::Heading);
    let texts = of_type(WidgetType::Text);
    let metrics = of_type(WidgetType::Metric);
    let dividers = of_type(WidgetType::Divider);
    let charts = of_type(WidgetType::Chart);
    let tables = of_type(WidgetType::Table);

    let mut cursor_y = 0;
    cursor_y = stack_full_width(&headings, HEADING_H, cols, cursor_y, &mut rects);
    cursor_y = stack_full_width(&texts, TEXT_H, cols, cursor_y, &mut rects);

    let metric_cols = (cols / METRIC_CARD_MIN_W).max(1) as usize;
    cursor_y = pack_rows(&metrics, metric_cols, METRIC_H, cols, cursor_y, &mut rects);

    let (first_divider, extra_dividers) = match dividers.split_first() {
        Some((first, rest)) => (vec![*first], rest.to_vec()),
        None => (Vec::new(), Vec::new()),
    };
    cursor_y = stack_full_width(&first_divider, DIVIDER_H, cols, cursor_y, &mut rects);

    let chart_cols = if charts.len() == 1 { 1 } else { 2 };
    cursor_y = pack_rows(&charts, chart_cols, CHART_H, cols, cursor_y, &mut rects);
    cursor_y = stack_full_width(&tables, TABLE_H, cols, cursor_y, &mut rects);
    stack_full_width(&extra_dividers, DIVIDER_H, cols, cursor_y, &mut rects);

    rects
        .into_iter()
        .zip(widgets)
        .map(|(rect, widget)| rect.unwrap_or_else(|| widget.rect()))
        .collect()
}

/// Applies [`auto_layout`] in place.
pub fn reflow(widgets: &mut [Widget], cols: u32) {
    let rects = auto_layout(widgets, cols);
    for (widget, rect) in widgets.iter_mut().zip(rects) {
        widget.set_rect(rect);
    }
}

fn stack_full_width(
    indices: &[usize],
    height: u32,
    cols: u32,
    mut cursor_y: u32,
    rects: &mut [Option<GridRect>],
) -> u32 {
    if indices.is_empty() {
        return cursor_y;
    }
    for &index in indices {
        rects[index] = Some(GridRect {
            x: 0,
            y: cursor_y,
            w: cols,
            h: height,
        });
        cursor_y += height;
    }
    cursor_y + GROUP_GAP
}

// Equal-width cells, `per_row` at most; the last cell of a row takes the
// remaining width.
fn pack_rows(
    indices: &[usize],
    per_row: usize,
    height: u32,
    cols: u32,
    mut cursor_y: u32,
    rects: &mut [Option<GridRect>],
) -> u32 {
    if indices.is_empty() {
        return cursor_y;
    }
    let per_row = per_row.clamp(1, cols as usize);
    for row in indices.chunks(per_row) {
        let cell_w = (cols / row.len() as u32).max(1);
        let mut x = 0;
        for (position, &index) in row.iter().enumerate() {
            let w = if position + 1 == row.len() { cols - x } else { cell_w };
            rects[index] = Some(GridRect { x, y: cursor_y, w, h: height });
            x += w;
        }
        cursor_y += height;
    }
    cursor_y + GROUP_GAP
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Aggregation, ChartConfig, ChartWidget, MetricConfig, MetricWidget, TableWidget, TextBlock, WidgetKind,
    };
    use proptest::prelude::*;

    fn widget(id: &str, kind: WidgetKind) -> Widget {
        Widget {
            id: id.to_string(),
            x: 0,
            y: 0,
            w: 1,
            h: 1,
            min_w: 0,
            min_h: 0,
            kind,
        }
    }

    fn kind_for(widget_type: WidgetType) -> WidgetKind {
        match widget_type {
            WidgetType::Table => WidgetKind::Table(TableWidget {
                table_id: "t".to_string(),
                ..TableWidget::default()
            }),
            WidgetType::Heading => WidgetKind::Heading(TextBlock::default()),
            WidgetType::Text => WidgetKind::Text(TextBlock::default()),
            WidgetType::Divider => WidgetKind::Divider,
            WidgetType::Metric => WidgetKind::Metric(MetricWidget {
                metric_config: MetricConfig::new("t", Aggregation::Count, ""),
                filters: Vec::new(),
            }),
            WidgetType::Chart => WidgetKind::Chart(ChartWidget {
                chart_config: ChartConfig::new("t", "c", Aggregation::Count),
                filters: Vec::new(),
            }),
        }
    }

    fn widgets_of(types: &[WidgetType]) -> Vec<Widget> {
        types
            .iter()
            .enumerate()
            .map(|(index, kind)| widget(&format!("w{index}"), kind_for(*kind)))
            .collect()
    }

    #[test]
    fn heading_metrics_table_scenario() {
        let mut widgets = widgets_of(&[
            WidgetType::Heading,
            WidgetType::Metric,
            WidgetType::Metric,
            WidgetType::Metric,
            WidgetType::Table,
        ]);
        reflow(&mut widgets, DEFAULT_GRID_COLS);

        let heading = widgets[0].rect();
        assert_eq!((heading.x, heading.y, heading.w), (0, 0, 12));

        let metric_row = widgets[1].y;
        assert!(metric_row >= heading.bottom());
        for metric in &widgets[1..4] {
            assert_eq!(metric.y, metric_row);
        }
        assert_eq!(widgets[1..4].iter().map(|metric| metric.w).sum::<u32>(), 12);

        let table = widgets[4].rect();
        assert_eq!((table.x, table.w), (0, 12));
        assert!(table.y >= widgets[1].rect().bottom());
        assert!(find_overlaps(&widgets).is_empty());
    }

    #[test]
    fn last_metric_in_a_row_stretches() {
        let mut widgets = widgets_of(&[WidgetType::Metric; 5]);
        reflow(&mut widgets, DEFAULT_GRID_COLS);
        let widths = widgets.iter().map(|metric| metric.w).collect::<Vec<_>>();
        assert_eq!(widths, vec![3, 3, 3, 3, 12]);
        assert_eq!(widgets[4].x, 0);
        assert!(widgets[4].y > widgets[0].y);
    }

    #[test]
    fn single_chart_is_full_width_and_pairs_split() {
        let mut one = widgets_of(&[WidgetType::Chart]);
        reflow(&mut one, DEFAULT_GRID_COLS);
        assert_eq!(one[0].w, 12);

        let mut three = widgets_of(&[WidgetType::Chart; 3]);
        reflow(&mut three, DEFAULT_GRID_COLS);
        let widths = three.iter().map(|chart| chart.w).collect::<Vec<_>>();
        assert_eq!(widths, vec![6, 6, 12]);
    }

    #[test]
    fn extra_dividers_go_to_the_end() {
        let mut widgets = widgets_of(&[
            WidgetType::Divider,
            WidgetType::Table,
            WidgetType::Divider,
            WidgetType::Metric,
        ]);
        reflow(&mut widgets, DEFAULT_GRID_COLS);
        let first_divider = widgets[0].y;
        let table = widgets[1].y;
        let last_divider = widgets[2].y;
        assert!(widgets[3].y < first_divider);
        assert!(first_divider < table);
        assert!(table < last_divider);
    }

    #[test]
    fn legacy_coordinates_are_halved() {
        let mut legacy = widget("m", kind_for(WidgetType::Metric));
        legacy.x = 14;
        legacy.w = 3;
        assert!(migrate_legacy_coordinates(&mut legacy, 12));
        assert_eq!((legacy.x, legacy.w), (7, 2));

        let mut wide = widget("t", kind_for(WidgetType::Table));
        wide.x = 0;
        wide.w = 24;
        normalize_widget(&mut wide, 12);
        assert_eq!((wide.x, wide.w, wide.min_w, wide.min_h), (0, 12, 4, 3));

        let mut current = widget("h", kind_for(WidgetType::Heading));
        current.x = 2;
        current.w = 6;
        assert!(!migrate_legacy_coordinates(&mut current, 12));
    }

    #[test]
    fn clamping_keeps_rect_inside_grid() {
        let rect = clamp_to_grid(GridRect { x: 10, y: 3, w: 5, h: 0 }, 2, 1, 12);
        assert_eq!(rect, GridRect { x: 7, y: 3, w: 5, h: 1 });
    }

    fn arb_type() -> impl Strategy<Value = WidgetType> {
        prop_oneof![
            Just(WidgetType::Table),
            Just(WidgetType::Heading),
            Just(WidgetType::Text),
            Just(WidgetType::Divider),
            Just(WidgetType::Metric),
            Just(WidgetType::Chart),
        ]
    }

    proptest! {
        #[test]
        fn auto_layout_never_overlaps(
            types in prop::collection::vec(arb_type(), 0..24),
            cols in 1u32..25,
        ) {
            let widgets = widgets_of(&types);
            let rects = auto_layout(&widgets, cols);
            prop_assert_eq!(rects.len(), widgets.len());
            for (index, rect) in rects.iter().enumerate() {
                prop_assert!(rect.right() <= cols);
                prop_assert!(rect.w >= 1);
                for other in &rects[index + 1..] {
                    prop_assert!(!rect.overlaps(other));
                }
            }
        }
    }
}
