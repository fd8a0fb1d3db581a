use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::{Error, Result};

/// Grouping value of a row. `None` is the null category.
pub type GroupKey = Option<String>;

pub fn group_display(group: &GroupKey) -> &str {
    group.as_deref().unwrap_or("null")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRow {
    pub date: NaiveDate,
    pub group: GroupKey,
    pub value: Option<f64>,
    /// Count backing the value, e.g. the number of trials behind a rate.
    pub support: Option<f64>,
    /// Further labelled values shown alongside the row.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, f64>,
}

/// A per-group metric time series, one row per `(date, group)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSeries {
    pub metric_label: String,
    pub group_label: String,
    pub support_label: Option<String>,
    rows: Vec<MetricRow>,
}

impl MetricSeries {
    /// Sort rows by `(date, group)` and reject duplicate keys.
    pub fn new(
        metric_label: impl Into<String>,
        group_label: impl Into<String>,
        support_label: Option<String>,
        mut rows: Vec<MetricRow>,
    ) -> Result<Self> {
        rows.sort_by(|a, b| (a.date, &a.group).cmp(&(b.date, &b.group)));
        for pair in rows.windows(2) {
            if pair[0].date == pair[1].date && pair[0].group == pair[1].group {
                return Err(Error::DuplicateRow {
                    date: pair[0].date.to_string(),
                    group: group_display(&pair[0].group).to_string(),
                });
            }
        }
        Ok(Self {
            metric_label: metric_label.into(),
            group_label: group_label.into(),
            support_label,
            rows,
        })
    }

    pub fn rows(&self) -> &[MetricRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Labels of the extra values carried by any row.
    pub fn extra_labels(&self) -> BTreeSet<&str> {
        self.rows
            .iter()
            .flat_map(|r| r.extra.keys().map(String::as_str))
            .collect()
    }

    pub fn groups(&self) -> BTreeSet<&GroupKey> {
        self.rows.iter().map(|r| &r.group).collect()
    }

    /// Rows at one date, keyed by group.
    pub fn snapshot(&self, date: NaiveDate) -> BTreeMap<&GroupKey, &MetricRow> {
        self.rows
            .iter()
            .filter(|r| r.date == date)
            .map(|r| (&r.group, r))
            .collect()
    }

    /// Latest date at which any group has a value.
    pub fn latest_date_with_value(&self) -> Option<NaiveDate> {
        self.rows
            .iter()
            .filter(|r| r.value.is_some())
            .map(|r| r.date)
            .max()
    }

    /// Rows with a value at the latest such date, largest value first.
    pub fn latest_snapshot(&self) -> Vec<&MetricRow> {
        let Some(latest) = self.latest_date_with_value() else {
            return Vec::new();
        };
        let mut rows: Vec<&MetricRow> = self
            .rows
            .iter()
            .filter(|r| r.date == latest && r.value.is_some())
            .collect();
        rows.sort_by(|a, b| {
            b.value
                .partial_cmp(&a.value)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.group.cmp(&b.group))
        });
        rows
    }

    /// Each value divided by the total of its date, for composition charts.
    /// Dates whose total is zero keep no value.
    pub fn share_of_date_total(&self) -> MetricSeries {
        let mut totals: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for row in &self.rows {
            if let Some(v) = row.value {
                *totals.entry(row.date).or_insert(0.0) += v;
            }
        }
        let rows = self
            .rows
            .iter()
            .map(|row| MetricRow {
                value: match (row.value, totals.get(&row.date)) {
                    (Some(v), Some(&total)) if total != 0.0 => Some(v / total),
                    _ => None,
                },
                ..row.clone()
            })
            .collect();
        MetricSeries {
            metric_label: format!("{} (%)", self.metric_label),
            group_label: self.group_label.clone(),
            support_label: self.support_label.clone(),
            rows,
        }
    }
}

#[cfg(test)]
pub(crate) fn row(date: &str, group: &str, value: Option<f64>, support: Option<f64>) -> MetricRow {
    MetricRow {
        date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
        group: Some(group.to_string()),
        value,
        support,
        extra: BTreeMap::new(),
    }
}
