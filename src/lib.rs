pub mod config;
pub mod date_util;
pub mod error;
pub mod filters;
pub mod labels;
pub mod metrics;
pub mod plot;
pub mod query;
pub mod registry;
pub mod series;
pub mod storage;

pub use config::{Config, LtvPricing};
pub use error::{Error, Result};
pub use filters::{FilterSet, Selection, SELECT_ALL};
pub use metrics::{ChangeReport, GroupChange, LtvSeries, Weighting};
pub use plot::{LegendOrder, PlotSpec};
pub use query::adapters::{FilterOptions, SeriesRequest};
pub use query::cache::CachedExecutor;
pub use query::{QueryExecutor, Table, Template};
pub use registry::{MetricDescriptor, MetricFamily, MetricRegistry};
pub use series::{MetricRow, MetricSeries};
pub use storage::warehouse::Warehouse;
pub use storage::Database;

use chrono::NaiveDate;

use metrics::ltv::{self, CohortWindowSet};
use query::adapters;
use registry::FILTER_DIMENSIONS;

/// Main entry point: metric series, LTV and change breakdowns over a
/// warehouse, with every query result memoized for the life of the value.
pub struct MetricVizer<E> {
    executor: CachedExecutor<E>,
    registry: MetricRegistry,
    config: Config,
}

impl MetricVizer<Warehouse> {
    /// Serve from the SQLite warehouse, with settings read from its
    /// `app_config` table.
    pub async fn open(db: Database) -> Result<Self> {
        let config = Config::load(&db).await?;
        Self::new(Warehouse::new(db), config)
    }
}

impl<E: QueryExecutor> MetricVizer<E> {
    pub fn new(executor: E, config: Config) -> Result<Self> {
        Ok(Self {
            executor: CachedExecutor::new(executor),
            registry: MetricRegistry::standard()?,
            config,
        })
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn executor(&self) -> &CachedExecutor<E> {
        &self.executor
    }

    /// Resolve the grouping dimension of a request, which may be given as
    /// identifier or display label, and check its rolling window.
    fn resolve(&self, request: &SeriesRequest) -> Result<(SeriesRequest, String)> {
        date_util::rolling_window(request.rolling_window_days)?;
        let group_by = self.registry.group_by(&request.group_by)?;
        let group_label = self.registry.dimension_label(group_by).to_string();
        let resolved = SeriesRequest {
            group_by: group_by.to_string(),
            ..request.clone()
        };
        Ok((resolved, group_label))
    }

    // ── Series ─────────────────────────────────────────────────────

    /// The per-group time series of a metric, looked up by identifier or
    /// display label.
    pub async fn series(&self, metric: &str, request: &SeriesRequest) -> Result<MetricSeries> {
        let descriptor = self.registry.get(metric)?;
        if let MetricFamily::Ltv { .. } = descriptor.family {
            return self.ltv(metric, request).await?.to_metric_series();
        }
        let (request, group_label) = self.resolve(request)?;
        adapters::fetch(&self.executor, descriptor, &request, &group_label).await
    }

    /// Series together with the chart metadata the renderer needs.
    pub async fn plot(
        &self,
        metric: &str,
        request: &SeriesRequest,
        legend_order: LegendOrder,
    ) -> Result<(MetricSeries, PlotSpec)> {
        let descriptor = self.registry.get(metric)?;
        let series = self.series(metric, request).await?;
        let spec = PlotSpec::ordered(
            descriptor,
            &series,
            request.rolling_window_days,
            legend_order,
        );
        Ok((series, spec))
    }

    // ── LTV ────────────────────────────────────────────────────────

    pub async fn ltv(&self, metric: &str, request: &SeriesRequest) -> Result<LtvSeries> {
        let descriptor = self.registry.get(metric)?;
        let MetricFamily::Ltv { window_days } = descriptor.family else {
            return Err(Error::UnsupportedMetric(format!(
                "{} is not a lifetime value metric",
                descriptor.id
            )));
        };
        let (request, group_label) = self.resolve(request)?;

        let mut windows = CohortWindowSet::new();
        for days in ltv::cohort_windows(window_days)? {
            let series =
                adapters::fetch_retention(&self.executor, days, &request, &group_label).await?;
            windows.insert(days, series);
        }
        ltv::compute_ltv(&windows, window_days, self.config.ltv.unit_value())
    }

    // ── Change breakdown ───────────────────────────────────────────

    /// Attribute the change of a metric between two dates to its groups.
    /// Without explicit dates, compare the latest date with a value against
    /// the configured lookback.
    pub async fn change_breakdown(
        &self,
        metric: &str,
        request: &SeriesRequest,
        dates: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<ChangeReport> {
        let descriptor = self.registry.get(metric)?;
        let Some(weighting) = descriptor.change else {
            return Err(Error::UnsupportedMetric(format!(
                "{} has no change breakdown",
                descriptor.id
            )));
        };
        let series = self.series(metric, request).await?;
        let (start, end) = match dates {
            Some(dates) => dates,
            None => metrics::default_change_dates(&series, self.config.change_lookback_days)
                .ok_or_else(|| Error::InvalidValue {
                    column: series.metric_label.clone(),
                    message: "no values to compare".to_string(),
                })?,
        };
        metrics::compute_change(&series, start, end, weighting)
    }

    // ── Filters ────────────────────────────────────────────────────

    /// Values offered by every filter dimension.
    pub async fn filter_options(&self) -> Result<Vec<FilterOptions>> {
        adapters::filter_options(&self.executor, FILTER_DIMENSIONS).await
    }
}
