//! Lifetime value accumulated across staggered 30-day retention windows.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::registry::ltv_label;
use crate::series::{GroupKey, MetricRow, MetricSeries};

/// Step between consecutive cohort windows, in days.
pub const WINDOW_STEP_DAYS: u32 = 30;

/// Retention series keyed by window length in days.
pub type CohortWindowSet = BTreeMap<u32, MetricSeries>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LtvRow {
    pub date: NaiveDate,
    pub group: GroupKey,
    pub ltv: f64,
    /// Retention rate of the target window.
    pub retention: f64,
    /// Customers retained through the target window.
    pub retained_count: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LtvSeries {
    pub label: String,
    pub group_label: String,
    pub window_days: u32,
    pub rows: Vec<LtvRow>,
}

impl LtvSeries {
    pub fn retained_label(&self) -> String {
        format!("Count Customers Retained {}d", self.window_days)
    }

    pub fn retention_label(&self) -> String {
        format!("Retention {}d", self.window_days)
    }

    /// LTV as a plain metric series, with the retained count as support and
    /// the target-window retention as an extra value.
    pub fn to_metric_series(&self) -> Result<MetricSeries> {
        let retention_label = self.retention_label();
        let rows = self
            .rows
            .iter()
            .map(|r| MetricRow {
                date: r.date,
                group: r.group.clone(),
                value: Some(r.ltv),
                support: r.retained_count,
                extra: BTreeMap::from([(retention_label.clone(), r.retention)]),
            })
            .collect();
        MetricSeries::new(
            self.label.clone(),
            self.group_label.clone(),
            Some(self.retained_label()),
            rows,
        )
    }
}

/// Window lengths feeding an LTV over `max_window_days`: 30, 60, ..., max.
pub fn cohort_windows(max_window_days: u32) -> Result<Vec<u32>> {
    if max_window_days == 0 || max_window_days % WINDOW_STEP_DAYS != 0 {
        return Err(Error::InvalidWindow(format!(
            "{max_window_days}d is not a positive multiple of {WINDOW_STEP_DAYS}d"
        )));
    }
    Ok((WINDOW_STEP_DAYS..=max_window_days)
        .step_by(WINDOW_STEP_DAYS as usize)
        .collect())
}

/// Combine retention windows into an LTV estimate per `(date, group)`.
///
/// Rows come from the 30-day series; every longer window is matched on
/// `(date, group)`. A row whose cohort has not yet reached the target window
/// is dropped. The estimate is `(1 + Σ retention) * unit_value`, rounded half
/// to even.
pub fn compute_ltv(
    windows: &CohortWindowSet,
    max_window_days: u32,
    unit_value: f64,
) -> Result<LtvSeries> {
    let needed = cohort_windows(max_window_days)?;
    if !unit_value.is_finite() {
        return Err(Error::InvalidValue {
            column: "unit_value".to_string(),
            message: format!("{unit_value} is not a price"),
        });
    }

    let mut lookups = Vec::with_capacity(needed.len());
    for days in &needed {
        let series = windows.get(days).ok_or(Error::MissingWindow(*days))?;
        let index: BTreeMap<(NaiveDate, &GroupKey), &MetricRow> = series
            .rows()
            .iter()
            .map(|r| ((r.date, &r.group), r))
            .collect();
        lookups.push(index);
    }
    let anchor = &windows[&WINDOW_STEP_DAYS];

    let mut rows = Vec::with_capacity(anchor.len());
    let mut immature = 0usize;
    for row in anchor.rows() {
        let key = (row.date, &row.group);
        let matched: Vec<&MetricRow> = lookups
            .iter()
            .filter_map(|index| index.get(&key).copied())
            .collect();
        let target = lookups
            .last()
            .and_then(|index| index.get(&key))
            .and_then(|r| r.value.map(|v| (v, r.support)));
        let Some((retention, retained_count)) = target else {
            immature += 1;
            continue;
        };
        let retention_sum: f64 = matched.iter().filter_map(|r| r.value).sum();
        rows.push(LtvRow {
            date: row.date,
            group: row.group.clone(),
            ltv: ((1.0 + retention_sum) * unit_value).round_ties_even(),
            retention,
            retained_count,
        });
    }
    if immature > 0 {
        log::debug!("dropped {immature} cohorts younger than {max_window_days}d");
    }

    Ok(LtvSeries {
        label: ltv_label(&format!("ltv_{max_window_days}d")),
        group_label: anchor.group_label.clone(),
        window_days: max_window_days,
        rows,
    })
}
