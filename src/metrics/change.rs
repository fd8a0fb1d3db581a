//! Period-over-period change attribution.
//!
//! Given a grouped series and two dates, decompose the change of the
//! aggregate metric into per-group contributions. Groups are joined on their
//! key; a group missing a value at either date takes no part.

use std::cmp::Ordering;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::series::{group_display, GroupKey, MetricSeries};

/// How groups are weighted when attributing a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Weighting {
    /// Contributions are shares of the summed absolute change.
    None,
    /// Groups weigh in proportion to their average support across both dates.
    BySupport,
}

/// Change of one group between the two dates.
///
/// Quantities that would divide by zero are `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupChange {
    pub group: GroupKey,
    pub start_value: f64,
    pub end_value: f64,
    pub absolute_change: f64,
    pub relative_change: Option<f64>,
    pub weight: Option<f64>,
    pub weighted_relative_change: Option<f64>,
    pub weighted_absolute_change: Option<f64>,
    pub pct_of_weighted_absolute_change: Option<f64>,
    pub pct_of_absolute_change: Option<f64>,
    pub pct_of_metric_at_start: Option<f64>,
    pub pct_of_metric_at_end: Option<f64>,
}

impl GroupChange {
    /// Percentage of the aggregate change attributed to this group, under
    /// whichever weighting produced the report.
    pub fn contribution(&self) -> Option<f64> {
        self.pct_of_weighted_absolute_change
            .or(self.pct_of_absolute_change)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeSummary {
    pub start_value: Option<f64>,
    pub end_value: Option<f64>,
    pub absolute_change: Option<f64>,
    pub relative_change: Option<f64>,
    /// Sum of the groups' weighted absolute changes. Its gap to
    /// `absolute_change` is the shift in group mix.
    pub total_weighted_absolute_change: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeReport {
    pub metric_label: String,
    pub group_label: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub weighting: Weighting,
    /// Largest contribution first; groups without one come last.
    pub groups: Vec<GroupChange>,
    pub summary: ChangeSummary,
}

struct Joined {
    group: GroupKey,
    start_value: f64,
    end_value: f64,
    start_support: Option<f64>,
    end_support: Option<f64>,
}

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    (denominator != 0.0).then(|| numerator / denominator)
}

/// Attribute the change of `series` between `start_date` and `end_date` to
/// its groups.
pub fn compute_change(
    series: &MetricSeries,
    start_date: NaiveDate,
    end_date: NaiveDate,
    weighting: Weighting,
) -> Result<ChangeReport> {
    if start_date > end_date {
        return Err(Error::InvalidValue {
            column: "date".to_string(),
            message: format!("start {start_date} is after end {end_date}"),
        });
    }
    let support_label = match (weighting, &series.support_label) {
        (Weighting::BySupport, None) => {
            return Err(Error::MissingColumn {
                template: series.metric_label.clone(),
                column: "support".to_string(),
            })
        }
        (_, label) => label.as_deref().unwrap_or("support"),
    };

    let start = series.snapshot(start_date);
    let end = series.snapshot(end_date);
    let mut joined = Vec::with_capacity(start.len());
    for (&group, &start_row) in &start {
        let end_row = end.get(group);
        match (start_row.value, end_row.and_then(|r| r.value)) {
            (Some(start_value), Some(end_value)) => joined.push(Joined {
                group: group.clone(),
                start_value,
                end_value,
                start_support: start_row.support,
                end_support: end_row.and_then(|r| r.support),
            }),
            _ => log::debug!(
                "{}: no value for {} at both {start_date} and {end_date}",
                series.metric_label,
                group_display(group)
            ),
        }
    }

    let mut groups: Vec<GroupChange> = joined
        .iter()
        .map(|j| {
            let absolute_change = j.end_value - j.start_value;
            GroupChange {
                group: j.group.clone(),
                start_value: j.start_value,
                end_value: j.end_value,
                absolute_change,
                relative_change: ratio(absolute_change, j.start_value),
                weight: None,
                weighted_relative_change: None,
                weighted_absolute_change: None,
                pct_of_weighted_absolute_change: None,
                pct_of_absolute_change: None,
                pct_of_metric_at_start: None,
                pct_of_metric_at_end: None,
            }
        })
        .collect();

    let summary = match weighting {
        Weighting::BySupport => attribute_weighted(&joined, &mut groups, support_label)?,
        Weighting::None => attribute_unweighted(&mut groups),
    };

    groups.sort_by(|a, b| {
        match (a.contribution(), b.contribution()) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then_with(|| a.group.cmp(&b.group))
    });

    Ok(ChangeReport {
        metric_label: series.metric_label.clone(),
        group_label: series.group_label.clone(),
        start_date,
        end_date,
        weighting,
        groups,
        summary,
    })
}

fn attribute_weighted(
    joined: &[Joined],
    groups: &mut [GroupChange],
    support_label: &str,
) -> Result<ChangeSummary> {
    let mut supports = Vec::with_capacity(joined.len());
    for j in joined {
        match (j.start_support, j.end_support) {
            (Some(start), Some(end)) => supports.push((start, end)),
            _ => {
                return Err(Error::InvalidValue {
                    column: support_label.to_string(),
                    message: format!("group {} has no support count", group_display(&j.group)),
                })
            }
        }
    }

    let total_average: f64 = supports.iter().map(|(s, e)| (s + e) / 2.0).sum();
    for (group, (s, e)) in groups.iter_mut().zip(&supports) {
        group.weight = ratio((s + e) / 2.0, total_average);
        group.weighted_absolute_change = group.weight.map(|w| w * group.absolute_change);
        group.weighted_relative_change = group
            .weight
            .zip(group.relative_change)
            .map(|(w, r)| w * r);
    }

    // Groups with an undefined relative change stay out of the normalization.
    let normalizer: f64 = groups
        .iter()
        .filter(|g| g.relative_change.is_some())
        .filter_map(|g| g.weighted_absolute_change)
        .sum();
    for group in groups.iter_mut() {
        if group.relative_change.is_some() {
            group.pct_of_weighted_absolute_change = group
                .weighted_absolute_change
                .and_then(|wac| ratio(100.0 * wac, normalizer));
        }
    }

    let weighted_average = |value: fn(&Joined) -> f64, support: fn(&(f64, f64)) -> f64| {
        let numerator: f64 = joined
            .iter()
            .zip(&supports)
            .map(|(j, s)| value(j) * support(s))
            .sum();
        ratio(numerator, supports.iter().map(support).sum())
    };
    let start_value = weighted_average(|j| j.start_value, |s| s.0);
    let end_value = weighted_average(|j| j.end_value, |s| s.1);
    let total_weighted_absolute_change: Option<f64> = (total_average != 0.0).then(|| {
        groups
            .iter()
            .filter_map(|g| g.weighted_absolute_change)
            .sum()
    });

    Ok(summarize(start_value, end_value, total_weighted_absolute_change))
}

fn attribute_unweighted(groups: &mut [GroupChange]) -> ChangeSummary {
    let normalizer: f64 = groups
        .iter()
        .filter(|g| g.relative_change.is_some())
        .map(|g| g.absolute_change)
        .sum();
    let start_total: f64 = groups.iter().map(|g| g.start_value).sum();
    let end_total: f64 = groups.iter().map(|g| g.end_value).sum();

    for group in groups.iter_mut() {
        if group.relative_change.is_some() {
            group.pct_of_absolute_change = ratio(100.0 * group.absolute_change, normalizer);
        }
        group.pct_of_metric_at_start = ratio(100.0 * group.start_value, start_total);
        group.pct_of_metric_at_end = ratio(100.0 * group.end_value, end_total);
    }

    if groups.is_empty() {
        return summarize(None, None, None);
    }
    summarize(Some(start_total), Some(end_total), None)
}

fn summarize(
    start_value: Option<f64>,
    end_value: Option<f64>,
    total_weighted_absolute_change: Option<f64>,
) -> ChangeSummary {
    let absolute_change = start_value.zip(end_value).map(|(s, e)| e - s);
    ChangeSummary {
        start_value,
        end_value,
        absolute_change,
        relative_change: start_value
            .zip(absolute_change)
            .and_then(|(s, a)| ratio(a, s)),
        total_weighted_absolute_change,
    }
}

/// Default comparison dates: the latest date with a value, and the date
/// `lookback_days` before it.
pub fn default_change_dates(
    series: &MetricSeries,
    lookback_days: u32,
) -> Option<(NaiveDate, NaiveDate)> {
    let end = series.latest_date_with_value()?;
    Some((end - Duration::days(i64::from(lookback_days)), end))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::series::row;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn approx(actual: Option<f64>, expected: f64) {
        let actual = actual.expect("value should be defined");
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    fn trials(rows: Vec<crate::series::MetricRow>) -> MetricSeries {
        MetricSeries::new(
            "Trial To Live Rate 7d",
            "Niche",
            Some("Count Trials".to_string()),
            rows,
        )
        .unwrap()
    }

    fn two_groups() -> MetricSeries {
        trials(vec![
            row("2025-01-01", "A", Some(100.0), Some(10.0)),
            row("2025-01-01", "B", Some(50.0), Some(10.0)),
            row("2025-01-31", "A", Some(150.0), Some(10.0)),
            row("2025-01-31", "B", Some(40.0), Some(10.0)),
        ])
    }

    #[test]
    fn test_weighted_contributions() {
        let report = compute_change(
            &two_groups(),
            date("2025-01-01"),
            date("2025-01-31"),
            Weighting::BySupport,
        )
        .unwrap();

        let a = &report.groups[0];
        let b = &report.groups[1];
        assert_eq!(a.group.as_deref(), Some("A"));
        assert_eq!(a.absolute_change, 50.0);
        assert_eq!(b.absolute_change, -10.0);
        approx(a.relative_change, 0.5);
        approx(b.relative_change, -0.2);
        approx(a.weight, 0.5);
        approx(b.weight, 0.5);
        approx(a.weighted_absolute_change, 25.0);
        approx(b.weighted_absolute_change, -5.0);
        approx(a.weighted_relative_change, 0.25);
        approx(a.pct_of_weighted_absolute_change, 125.0);
        approx(b.pct_of_weighted_absolute_change, -25.0);
        assert!(a.pct_of_absolute_change.is_none());

        approx(report.summary.start_value, 75.0);
        approx(report.summary.end_value, 95.0);
        approx(report.summary.absolute_change, 20.0);
        approx(report.summary.total_weighted_absolute_change, 20.0);
    }

    #[test]
    fn test_weighted_percentages_sum_to_hundred() {
        let series = trials(vec![
            row("2025-01-01", "a", Some(0.30), Some(120.0)),
            row("2025-01-01", "b", Some(0.10), Some(40.0)),
            row("2025-01-01", "c", Some(0.25), Some(75.0)),
            row("2025-01-31", "a", Some(0.34), Some(100.0)),
            row("2025-01-31", "b", Some(0.05), Some(60.0)),
            row("2025-01-31", "c", Some(0.40), Some(80.0)),
        ]);
        let report = compute_change(
            &series,
            date("2025-01-01"),
            date("2025-01-31"),
            Weighting::BySupport,
        )
        .unwrap();

        let total: f64 = report.groups.iter().filter_map(|g| g.contribution()).sum();
        assert!((total - 100.0).abs() < 1e-9);
        let weights: f64 = report.groups.iter().filter_map(|g| g.weight).sum();
        assert!((weights - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_start_is_undefined_and_excluded() {
        let series = MetricSeries::new(
            "New Trials",
            "Niche",
            None,
            vec![
                row("2025-01-01", "A", Some(0.0), None),
                row("2025-01-01", "B", Some(10.0), None),
                row("2025-01-31", "A", Some(10.0), None),
                row("2025-01-31", "B", Some(20.0), None),
            ],
        )
        .unwrap();
        let report =
            compute_change(&series, date("2025-01-01"), date("2025-01-31"), Weighting::None)
                .unwrap();

        let b = &report.groups[0];
        let a = &report.groups[1];
        assert_eq!(a.group.as_deref(), Some("A"));
        assert!(a.relative_change.is_none());
        assert!(a.contribution().is_none());
        approx(b.pct_of_absolute_change, 100.0);
        approx(a.pct_of_metric_at_start, 0.0);
        approx(b.pct_of_metric_at_start, 100.0);
        approx(a.pct_of_metric_at_end, 10.0 / 30.0 * 100.0);

        approx(report.summary.start_value, 10.0);
        approx(report.summary.end_value, 30.0);
        approx(report.summary.relative_change, 2.0);
        assert!(report.summary.total_weighted_absolute_change.is_none());
    }

    #[test]
    fn test_weighted_zero_start_is_excluded_from_normalization() {
        let series = trials(vec![
            row("2025-01-01", "a", Some(0.0), Some(10.0)),
            row("2025-01-01", "b", Some(0.1), Some(20.0)),
            row("2025-01-01", "c", Some(0.4), Some(40.0)),
            row("2025-01-31", "a", Some(0.2), Some(30.0)),
            row("2025-01-31", "b", Some(0.3), Some(20.0)),
            row("2025-01-31", "c", Some(0.5), Some(40.0)),
        ]);
        let report = compute_change(
            &series,
            date("2025-01-01"),
            date("2025-01-31"),
            Weighting::BySupport,
        )
        .unwrap();

        let a = report.groups.last().unwrap();
        assert_eq!(a.group.as_deref(), Some("a"));
        assert!(a.relative_change.is_none());
        assert!(a.weighted_relative_change.is_none());
        assert!(a.contribution().is_none());
        approx(a.weight, 0.25);
        approx(a.weighted_absolute_change, 0.05);

        let find = |key: &str| {
            report
                .groups
                .iter()
                .find(|g| g.group.as_deref() == Some(key))
                .unwrap()
        };
        approx(find("b").pct_of_weighted_absolute_change, 50.0);
        approx(find("c").pct_of_weighted_absolute_change, 50.0);
        let total: f64 = report.groups.iter().filter_map(|g| g.contribution()).sum();
        assert!((total - 100.0).abs() < 1e-9);

        // The mix-shift total still counts the zero-start group.
        approx(report.summary.total_weighted_absolute_change, 0.15);
    }

    #[test]
    fn test_zero_normalizer_leaves_percentages_undefined() {
        let series = trials(vec![
            row("2025-01-01", "a", Some(1.0), Some(5.0)),
            row("2025-01-01", "b", Some(2.0), Some(5.0)),
            row("2025-01-31", "a", Some(2.0), Some(5.0)),
            row("2025-01-31", "b", Some(1.0), Some(5.0)),
        ]);
        let report =
            compute_change(&series, date("2025-01-01"), date("2025-01-31"), Weighting::None)
                .unwrap();
        assert!(report.groups.iter().all(|g| g.contribution().is_none()));
    }

    #[test]
    fn test_partial_groups_are_dropped() {
        let series = trials(vec![
            row("2025-01-01", "a", Some(0.2), Some(5.0)),
            row("2025-01-01", "gone", Some(0.9), Some(5.0)),
            row("2025-01-31", "a", Some(0.3), Some(5.0)),
            row("2025-01-31", "new", Some(0.1), Some(5.0)),
            row("2025-01-31", "gone", None, Some(5.0)),
        ]);
        let report = compute_change(
            &series,
            date("2025-01-01"),
            date("2025-01-31"),
            Weighting::BySupport,
        )
        .unwrap();
        assert_eq!(report.groups.len(), 1);
        approx(report.groups[0].pct_of_weighted_absolute_change, 100.0);
    }

    #[test]
    fn test_relabeling_permutes_rows() {
        let original = two_groups();
        let relabeled = trials(
            original
                .rows()
                .iter()
                .map(|r| {
                    let mut r = r.clone();
                    r.group = r.group.map(|g| if g == "A" { "Z".into() } else { "Y".into() });
                    r
                })
                .collect(),
        );

        let by_group = |series: &MetricSeries| -> BTreeMap<String, GroupChange> {
            compute_change(
                series,
                date("2025-01-01"),
                date("2025-01-31"),
                Weighting::BySupport,
            )
            .unwrap()
            .groups
            .into_iter()
            .map(|g| (g.group.clone().unwrap(), g))
            .collect()
        };
        let before = by_group(&original);
        let after = by_group(&relabeled);

        for (old, new) in [("A", "Z"), ("B", "Y")] {
            let mut moved = after[new].clone();
            moved.group = Some(old.to_string());
            assert_eq!(moved, before[old]);
        }
    }

    #[test]
    fn test_weighting_needs_support() {
        let unsupported = MetricSeries::new(
            "New Trials",
            "Niche",
            None,
            vec![row("2025-01-01", "a", Some(1.0), None)],
        )
        .unwrap();
        let err = compute_change(
            &unsupported,
            date("2025-01-01"),
            date("2025-01-31"),
            Weighting::BySupport,
        )
        .unwrap_err();
        assert!(matches!(err, Error::MissingColumn { .. }));

        let missing_count = trials(vec![
            row("2025-01-01", "a", Some(1.0), None),
            row("2025-01-31", "a", Some(2.0), Some(3.0)),
        ]);
        let err = compute_change(
            &missing_count,
            date("2025-01-01"),
            date("2025-01-31"),
            Weighting::BySupport,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidValue { .. }));
    }

    #[test]
    fn test_reversed_dates_rejected() {
        let err = compute_change(
            &two_groups(),
            date("2025-01-31"),
            date("2025-01-01"),
            Weighting::None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidValue { .. }));
    }

    #[test]
    fn test_default_change_dates() {
        let series = trials(vec![
            row("2025-03-01", "a", Some(1.0), Some(1.0)),
            row("2025-03-31", "a", Some(1.0), Some(1.0)),
            row("2025-04-01", "a", None, Some(1.0)),
        ]);
        assert_eq!(
            default_change_dates(&series, 30),
            Some((date("2025-03-01"), date("2025-03-31")))
        );
        assert_eq!(default_change_dates(&trials(vec![]), 30), None);
    }
}
