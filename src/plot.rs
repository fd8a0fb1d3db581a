//! Chart metadata handed to the renderer alongside a series.

use serde::Serialize;

use crate::registry::{MetricDescriptor, PlotKind};
use crate::series::{group_display, MetricSeries};

/// Order of the groups in a chart legend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LegendOrder {
    /// Largest latest value first.
    #[default]
    Totals,
    Alphabetical,
}

/// Chart drawn next to the time series for the latest date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotChart {
    Bar,
    Donut,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotSpec {
    pub line_title: String,
    pub snapshot_title: String,
    pub snapshot_chart: SnapshotChart,
    /// d3-style tick format of the value axis.
    pub axis_format: Option<String>,
    pub hover_fields: Vec<String>,
    pub legend_order: LegendOrder,
    /// Group display values in legend order.
    pub legend: Vec<String>,
}

impl PlotSpec {
    pub fn new(metric: &MetricDescriptor, series: &MetricSeries, rolling_window_days: u32) -> Self {
        Self::ordered(metric, series, rolling_window_days, LegendOrder::default())
    }

    pub fn ordered(
        metric: &MetricDescriptor,
        series: &MetricSeries,
        rolling_window_days: u32,
        legend_order: LegendOrder,
    ) -> Self {
        let latest = series.latest_snapshot();
        let legend = match legend_order {
            LegendOrder::Totals => latest
                .iter()
                .map(|r| group_display(&r.group).to_string())
                .collect(),
            LegendOrder::Alphabetical => {
                let mut groups: Vec<String> = latest
                    .iter()
                    .map(|r| group_display(&r.group).to_string())
                    .collect();
                groups.sort();
                groups
            }
        };
        let axis_format = match metric.plot {
            PlotKind::Rate { decimals } => Some(format!(".{decimals}%")),
            PlotKind::Average => {
                let max = latest
                    .iter()
                    .filter_map(|r| r.value)
                    .fold(f64::NEG_INFINITY, f64::max);
                Some(format!(".{}", average_decimals(max)))
            }
            PlotKind::Currency => Some("$,.0f".to_string()),
            PlotKind::Totals => None,
        };

        Self {
            line_title: format!(
                "{} by {} ({rolling_window_days}d rolling window)",
                series.metric_label, series.group_label
            ),
            snapshot_title: format!(
                "{} by {} (last {rolling_window_days}d)",
                series.metric_label, series.group_label
            ),
            snapshot_chart: match metric.plot {
                PlotKind::Totals => SnapshotChart::Donut,
                _ => SnapshotChart::Bar,
            },
            axis_format,
            hover_fields: series
                .extra_labels()
                .into_iter()
                .map(str::to_string)
                .chain(series.support_label.iter().cloned())
                .collect(),
            legend_order,
            legend,
        }
    }
}

fn average_decimals(max: f64) -> u8 {
    if max > 1.0 {
        1
    } else if max > 0.1 {
        2
    } else {
        3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MetricRegistry;
    use crate::series::row;

    fn series(label: &str, support: Option<&str>, values: &[(&str, f64)]) -> MetricSeries {
        MetricSeries::new(
            label,
            "Niche",
            support.map(str::to_string),
            values
                .iter()
                .map(|(group, v)| row("2025-01-01", group, Some(*v), Some(1.0)))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_rate_titles_and_format() {
        let registry = MetricRegistry::standard().unwrap();
        let metric = registry.get("retention_30d").unwrap();
        let data = series(
            "Retention 30d",
            Some("Count Customers Retained 30d"),
            &[("b", 0.2), ("a", 0.4)],
        );

        let spec = PlotSpec::new(metric, &data, 7);
        assert_eq!(spec.line_title, "Retention 30d by Niche (7d rolling window)");
        assert_eq!(spec.snapshot_title, "Retention 30d by Niche (last 7d)");
        assert_eq!(spec.axis_format.as_deref(), Some(".1%"));
        assert_eq!(spec.snapshot_chart, SnapshotChart::Bar);
        assert_eq!(spec.hover_fields, vec!["Count Customers Retained 30d"]);
        assert_eq!(spec.legend, vec!["a", "b"]);
    }

    #[test]
    fn test_average_decimals_follow_magnitude() {
        let registry = MetricRegistry::standard().unwrap();
        let metric = registry.get("avg_gmv_per_user").unwrap();
        for (value, format) in [(12.0, ".1"), (0.5, ".2"), (0.05, ".3")] {
            let data = series("Avg Gmv Per User", None, &[("a", value)]);
            assert_eq!(
                PlotSpec::new(metric, &data, 30).axis_format.as_deref(),
                Some(format)
            );
        }
    }

    #[test]
    fn test_totals_use_donut_and_legend_orders() {
        let registry = MetricRegistry::standard().unwrap();
        let metric = registry.get("new_trials").unwrap();
        let data = series("New Trials", None, &[("b", 5.0), ("c", 9.0), ("a", 1.0)]);

        let by_totals = PlotSpec::new(metric, &data, 30);
        assert_eq!(by_totals.snapshot_chart, SnapshotChart::Donut);
        assert!(by_totals.axis_format.is_none());
        assert_eq!(by_totals.legend, vec!["c", "b", "a"]);

        let alphabetical = PlotSpec::ordered(metric, &data, 30, LegendOrder::Alphabetical);
        assert_eq!(alphabetical.legend, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_currency_format() {
        let registry = MetricRegistry::standard().unwrap();
        let metric = registry.get("ltv_360d").unwrap();
        let data = series("LTV 360d", None, &[("a", 120.0)]);
        assert_eq!(
            PlotSpec::new(metric, &data, 30).axis_format.as_deref(),
            Some("$,.0f")
        );
    }
}
