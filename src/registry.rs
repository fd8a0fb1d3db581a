use serde::Serialize;

use crate::error::{Error, Result};
use crate::labels::{display_label, LabelMap};
use crate::metrics::change::Weighting;

/// Dimensions a metric can be grouped by. These are columns on `dim_users`.
pub const GROUP_BY_DIMENSIONS: &[&str] = &[
    "all_users",
    "niche",
    "attribution",
    "total_gmv_in_first_30d_binned",
    "count_unique_store_visits_in_first_30d_binned",
    "ideal_user_status",
    "stan_goal_multiple_choice",
    "country",
];

/// Dimensions offered as user filters.
pub const FILTER_DIMENSIONS: &[&str] = &[
    "ideal_user_status",
    "stan_customer_status",
    "niche",
    "country",
    "attribution",
];

const CUSTOMER_SUCCESS_DAYS: &[u32] = &[30, 60, 180];

/// Whether `name` is a column of `dim_users` that may appear in a predicate.
pub fn is_user_dimension(name: &str) -> bool {
    GROUP_BY_DIMENSIONS.contains(&name) || FILTER_DIMENSIONS.contains(&name)
}

/// Which query family produces a metric, and with which extra parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "family")]
pub enum MetricFamily {
    Retention { window_days: u32 },
    TrialActivation,
    CustomerSuccess { first_n_days: u32 },
    Acquisition,
    User,
    Ltv { window_days: u32 },
    ActiveCustomerRate,
}

/// How a metric is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlotKind {
    /// Fractions drawn as percentages with the given number of decimals.
    Rate { decimals: u8 },
    /// Counts and sums, drawn as lines plus a share-of-total donut.
    Totals,
    /// Per-user averages.
    Average,
    /// Dollar amounts.
    Currency,
}

/// Raw support column of a metric together with its display label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupportColumn {
    pub column: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricDescriptor {
    pub id: String,
    pub label: String,
    pub family: MetricFamily,
    /// Column holding the metric in the raw query result.
    pub raw_column: String,
    pub support: Option<SupportColumn>,
    pub plot: PlotKind,
    /// Set when the dashboard offers a change breakdown for this metric.
    pub change: Option<Weighting>,
}

/// Lookup table from metric identifier to descriptor.
#[derive(Debug, Clone)]
pub struct MetricRegistry {
    metrics: Vec<MetricDescriptor>,
    metric_labels: LabelMap,
    dimension_labels: LabelMap,
}

impl MetricRegistry {
    /// The dashboard's fixed metric vocabulary.
    pub fn standard() -> Result<Self> {
        let mut metrics = Vec::new();

        for days in [30, 60, 180, 360] {
            metrics.push(retention(days));
        }

        for id in [
            "trial_to_customer_rate_30d",
            "trial_to_live_rate_1d",
            "trial_to_live_rate_7d",
        ] {
            metrics.push(draft(
                id,
                MetricFamily::TrialActivation,
                Some(("count_trials_last_n_days_totals", "Count Trials")),
                PlotKind::Rate { decimals: 1 },
                Some(Weighting::BySupport),
            ));
        }

        for &days in CUSTOMER_SUCCESS_DAYS {
            for id in [
                format!("customer_to_at_least_100_gmv_rate_in_{days}d"),
                format!("customer_to_at_least_1_lead_rate_in_{days}d"),
            ] {
                metrics.push(draft(
                    &id,
                    MetricFamily::CustomerSuccess { first_n_days: days },
                    Some((
                        "count_customers_in_first_n_days_last_n_days_totals",
                        "Count Customers",
                    )),
                    PlotKind::Rate { decimals: 1 },
                    None,
                ));
            }
        }

        for id in ["new_trials", "new_customers"] {
            metrics.push(draft(
                id,
                MetricFamily::Acquisition,
                None,
                PlotKind::Totals,
                Some(Weighting::None),
            ));
        }

        let users = Some(("count_unique_users_last_n_days_totals", "Count Users"));
        for id in ["avg_referrals_per_user", "avg_gmv_per_user", "avg_leads_per_user"] {
            metrics.push(draft(id, MetricFamily::User, users, PlotKind::Average, None));
        }
        for id in ["store_visits", "leads", "gmv", "referrals"] {
            metrics.push(draft(id, MetricFamily::User, users, PlotKind::Totals, None));
        }
        metrics.push(draft(
            "store_visits_to_referrals",
            MetricFamily::User,
            users,
            PlotKind::Rate { decimals: 2 },
            None,
        ));

        for days in [180, 360] {
            metrics.push(draft(
                &format!("ltv_{days}d"),
                MetricFamily::Ltv { window_days: days },
                Some((
                    &format!("count_retained_customers_for_{days}d_last_n_days_totals"),
                    &format!("Count Customers Retained {days}d"),
                )),
                PlotKind::Currency,
                None,
            ));
        }

        let mut churn = draft(
            "churn_rate",
            MetricFamily::ActiveCustomerRate,
            Some(("count_active_customers_last_30d_start", "Count Active Customers")),
            PlotKind::Rate { decimals: 1 },
            None,
        );
        churn.raw_column = "customer_churn_rate_last_30d".to_string();
        metrics.push(churn);

        Self::new(metrics)
    }

    /// Build a registry from descriptors. Display labels are derived from
    /// the identifiers except for LTV metrics, which keep the `LTV ` prefix.
    pub fn new(mut metrics: Vec<MetricDescriptor>) -> Result<Self> {
        for metric in &mut metrics {
            metric.label = match metric.family {
                MetricFamily::Ltv { .. } => ltv_label(&metric.id),
                _ => display_label(&metric.id),
            };
        }
        let metric_labels = LabelMap::with_labels(
            metrics.iter().map(|m| (m.id.clone(), m.label.clone())),
        )?;
        let dimension_labels = LabelMap::new(
            GROUP_BY_DIMENSIONS
                .iter()
                .chain(FILTER_DIMENSIONS.iter())
                .copied(),
        )?;
        Ok(Self {
            metrics,
            metric_labels,
            dimension_labels,
        })
    }

    /// Look a metric up by its exact identifier or its exact display label.
    pub fn get(&self, key: &str) -> Result<&MetricDescriptor> {
        let id = self.metric_labels.clean_to_raw(key).unwrap_or(key);
        self.metrics
            .iter()
            .find(|m| m.id == id || m.label == key)
            .ok_or_else(|| Error::UnsupportedMetric(key.to_string()))
    }

    pub fn metrics(&self) -> &[MetricDescriptor] {
        &self.metrics
    }

    /// Resolve a grouping dimension given as identifier or display label.
    pub fn group_by(&self, key: &str) -> Result<&'static str> {
        let raw = self.dimension_labels.clean_to_raw(key).unwrap_or(key);
        GROUP_BY_DIMENSIONS
            .iter()
            .copied()
            .find(|d| *d == raw)
            .ok_or_else(|| Error::UnsupportedDimension(key.to_string()))
    }

    pub fn dimension_label<'a>(&'a self, dimension: &'a str) -> &'a str {
        self.dimension_labels
            .raw_to_clean(dimension)
            .unwrap_or(dimension)
    }

    pub fn metric_labels(&self) -> &LabelMap {
        &self.metric_labels
    }

    pub fn dimension_labels(&self) -> &LabelMap {
        &self.dimension_labels
    }
}

/// `ltv_180d` → `LTV 180d`
pub fn ltv_label(id: &str) -> String {
    id.replacen("ltv_", "LTV ", 1)
}

/// Descriptor of the retention metric for a window, also used for each
/// window series feeding the LTV aggregation.
pub fn retention(window_days: u32) -> MetricDescriptor {
    draft(
        &format!("retention_{window_days}d"),
        MetricFamily::Retention { window_days },
        Some((
            &format!("count_retained_customers_for_{window_days}d_last_n_days_totals"),
            &format!("Count Customers Retained {window_days}d"),
        )),
        PlotKind::Rate { decimals: 1 },
        None,
    )
}

fn draft(
    id: &str,
    family: MetricFamily,
    support: Option<(&str, &str)>,
    plot: PlotKind,
    change: Option<Weighting>,
) -> MetricDescriptor {
    MetricDescriptor {
        id: id.to_string(),
        label: display_label(id),
        family,
        raw_column: id.to_string(),
        support: support.map(|(column, label)| SupportColumn {
            column: column.to_string(),
            label: label.to_string(),
        }),
        plot,
        change,
    }
}
