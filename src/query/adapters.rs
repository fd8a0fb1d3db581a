//! One adapter per metric family. Each turns a [`SeriesRequest`] into a
//! template execution and normalizes the raw table into a [`MetricSeries`].

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use super::{QueryExecutor, QueryParams, Table, Template};
use crate::error::{Error, Result};
use crate::filters::{self, FilterSet};
use crate::registry::{self, MetricDescriptor, MetricFamily, FILTER_DIMENSIONS, GROUP_BY_DIMENSIONS};
use crate::series::{MetricRow, MetricSeries};

/// Alias of `dim_users` in every metric template.
const USER_ALIAS: &str = "du";

/// Parameters shared by every metric query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SeriesRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub rolling_window_days: u32,
    /// Raw grouping dimension, e.g. `niche`.
    pub group_by: String,
    pub filters: FilterSet,
}

impl SeriesRequest {
    /// Template parameters of the request. `group_by` is spliced into the SQL
    /// as a column name, so it must be a known grouping dimension.
    fn params(&self) -> Result<QueryParams> {
        if !GROUP_BY_DIMENSIONS.contains(&self.group_by.as_str()) {
            return Err(Error::UnsupportedDimension(self.group_by.clone()));
        }
        Ok(QueryParams::new()
            .set("start_date", self.start_date.format("%Y-%m-%d"))
            .set("end_date", self.end_date.format("%Y-%m-%d"))
            .set("rolling_window_days", self.rolling_window_days)
            .set("group_by", &self.group_by)
            .set("filters", filters::compile(&self.filters, USER_ALIAS)?))
    }
}

/// Where the columns of a raw result go in the normalized series.
struct ColumnSpec<'a> {
    group_by: &'a str,
    group_label: &'a str,
    metric_column: &'a str,
    metric_label: &'a str,
    support: Option<(&'a str, &'a str)>,
}

/// Fetch the series of a metric through the adapter of its family.
///
/// LTV metrics are assembled from several retention queries and have no
/// single adapter; see [`crate::metrics::ltv`].
pub async fn fetch<E: QueryExecutor>(
    executor: &E,
    metric: &MetricDescriptor,
    request: &SeriesRequest,
    group_label: &str,
) -> Result<MetricSeries> {
    let params = request.params()?;
    let (template, params) = match metric.family {
        MetricFamily::Retention { window_days } => {
            (Template::Retention, params.set("window_days", window_days))
        }
        MetricFamily::TrialActivation => (Template::TrialActivation, params),
        MetricFamily::CustomerSuccess { first_n_days } => (
            Template::CustomerSuccess,
            params.set("first_n_days", first_n_days),
        ),
        MetricFamily::Acquisition => (Template::Acquisition, params),
        MetricFamily::User => (Template::UserMetrics, params),
        MetricFamily::ActiveCustomerRate => (Template::ActiveCustomerRate, params),
        MetricFamily::Ltv { .. } => {
            return Err(Error::UnsupportedMetric(format!(
                "{} is aggregated from retention windows",
                metric.id
            )))
        }
    };

    log::info!(
        "fetching {} by {} ({}d rolling window)",
        metric.id,
        request.group_by,
        request.rolling_window_days
    );
    let table = executor.execute(template, &params).await?;
    normalize(
        &table,
        template,
        &ColumnSpec {
            group_by: &request.group_by,
            group_label,
            metric_column: &metric.raw_column,
            metric_label: &metric.label,
            support: metric
                .support
                .as_ref()
                .map(|s| (s.column.as_str(), s.label.as_str())),
        },
    )
}

/// Retention series for one window length, as used by the LTV aggregation.
pub async fn fetch_retention<E: QueryExecutor>(
    executor: &E,
    window_days: u32,
    request: &SeriesRequest,
    group_label: &str,
) -> Result<MetricSeries> {
    fetch(executor, &registry::retention(window_days), request, group_label).await
}

fn normalize(table: &Table, template: Template, spec: &ColumnSpec<'_>) -> Result<MetricSeries> {
    let date_idx = table.require_column(template, "date")?;
    let group_idx = table.require_column(template, spec.group_by)?;
    let metric_idx = table.require_column(template, spec.metric_column)?;
    let support_idx = spec
        .support
        .map(|(column, _)| table.require_column(template, column))
        .transpose()?;

    let mut rows = Vec::with_capacity(table.len());
    for raw in table.rows() {
        let date_text = raw[date_idx].as_text().ok_or_else(|| Error::InvalidValue {
            column: "date".to_string(),
            message: "null date".to_string(),
        })?;
        let date = NaiveDate::parse_from_str(&date_text, "%Y-%m-%d").map_err(|e| {
            Error::InvalidValue {
                column: "date".to_string(),
                message: format!("{date_text}: {e}"),
            }
        })?;
        rows.push(MetricRow {
            date,
            group: raw[group_idx].as_text(),
            value: raw[metric_idx].as_f64(),
            support: support_idx.and_then(|i| raw[i].as_f64()),
            extra: BTreeMap::new(),
        });
    }

    MetricSeries::new(
        spec.metric_label,
        spec.group_label,
        spec.support.map(|(_, label)| label.to_string()),
        rows,
    )
}

/// Available values of one filter dimension with their user counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterOptions {
    pub dimension: String,
    /// Non-null values, most users first.
    pub values: Vec<(String, u64)>,
}

/// Values offered by each filter dimension, counted over all users.
pub async fn filter_options<E: QueryExecutor>(
    executor: &E,
    dimensions: &[&str],
) -> Result<Vec<FilterOptions>> {
    if let Some(unknown) = dimensions.iter().find(|d| !FILTER_DIMENSIONS.contains(*d)) {
        return Err(Error::UnsupportedDimension(unknown.to_string()));
    }
    if dimensions.is_empty() {
        return Ok(Vec::new());
    }
    let select_columns: Vec<String> = dimensions
        .iter()
        .map(|d| format!("{USER_ALIAS}.{d} AS {d}"))
        .collect();
    let group_columns: Vec<String> = dimensions
        .iter()
        .map(|d| format!("{USER_ALIAS}.{d}"))
        .collect();
    let params = QueryParams::new()
        .set("select_columns", select_columns.join(", "))
        .set("group_columns", group_columns.join(", "));

    let table = executor.execute(Template::FilterOptions, &params).await?;
    let count_idx = table.require_column(Template::FilterOptions, "count_users")?;

    let mut options = Vec::with_capacity(dimensions.len());
    for dimension in dimensions {
        let idx = table.require_column(Template::FilterOptions, dimension)?;
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for row in table.rows() {
            let Some(value) = row[idx].as_text() else {
                continue;
            };
            let count = row[count_idx].as_f64().unwrap_or(0.0) as u64;
            *counts.entry(value).or_insert(0) += count;
        }
        let mut values: Vec<(String, u64)> = counts.into_iter().collect();
        values.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        options.push(FilterOptions {
            dimension: dimension.to_string(),
            values,
        });
    }
    Ok(options)
}
