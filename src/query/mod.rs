pub mod adapters;
pub mod cache;

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{Error, Result};

static RE_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_][a-z0-9_]*)\}").unwrap());

/// SQL templates understood by a [`QueryExecutor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Template {
    Retention,
    TrialActivation,
    CustomerSuccess,
    Acquisition,
    UserMetrics,
    ActiveCustomerRate,
    FilterOptions,
}

impl Template {
    pub fn name(self) -> &'static str {
        match self {
            Template::Retention => "retention.sql",
            Template::TrialActivation => "trial_activation.sql",
            Template::CustomerSuccess => "customer_success.sql",
            Template::Acquisition => "acquisition.sql",
            Template::UserMetrics => "user_metrics.sql",
            Template::ActiveCustomerRate => "active_customer_rate.sql",
            Template::FilterOptions => "filter_options.sql",
        }
    }

    pub fn source(self) -> &'static str {
        match self {
            Template::Retention => include_str!("sql/retention.sql"),
            Template::TrialActivation => include_str!("sql/trial_activation.sql"),
            Template::CustomerSuccess => include_str!("sql/customer_success.sql"),
            Template::Acquisition => include_str!("sql/acquisition.sql"),
            Template::UserMetrics => include_str!("sql/user_metrics.sql"),
            Template::ActiveCustomerRate => include_str!("sql/active_customer_rate.sql"),
            Template::FilterOptions => include_str!("sql/filter_options.sql"),
        }
    }
}

/// Named parameters substituted into a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct QueryParams(BTreeMap<String, String>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: &str, value: impl ToString) -> Self {
        self.0.insert(name.to_string(), value.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// Substitute every `{name}` placeholder of the template. A placeholder
/// without a parameter is an error rather than an empty substitution.
pub fn render(template: Template, params: &QueryParams) -> Result<String> {
    let mut missing: Option<String> = None;
    let rendered = RE_PLACEHOLDER.replace_all(template.source(), |caps: &regex::Captures| {
        match params.get(&caps[1]) {
            Some(value) => value.to_string(),
            None => {
                missing.get_or_insert_with(|| caps[1].to_string());
                String::new()
            }
        }
    });
    if let Some(name) = missing {
        return Err(Error::Template {
            template: template.name().to_string(),
            message: format!("no value for parameter `{name}`"),
        });
    }
    Ok(rendered.into_owned())
}

/// A single cell of a query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Cell {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Integer(i) => Some(*i as f64),
            Cell::Real(r) => Some(*r),
            Cell::Text(s) => s.trim().parse().ok(),
            Cell::Null => None,
        }
    }

    /// Text rendering of the cell; numbers are formatted, null is `None`.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Text(s) => Some(s.clone()),
            Cell::Integer(i) => Some(i.to_string()),
            Cell::Real(r) => Some(r.to_string()),
            Cell::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

impl From<rusqlite::types::Value> for Cell {
    fn from(value: rusqlite::types::Value) -> Self {
        use rusqlite::types::Value;
        match value {
            Value::Null => Cell::Null,
            Value::Integer(i) => Cell::Integer(i),
            Value::Real(r) => Cell::Real(r),
            Value::Text(s) => Cell::Text(s),
            Value::Blob(b) => Cell::Text(String::from_utf8_lossy(&b).into_owned()),
        }
    }
}

/// Tabular query result with lower-cased column names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new<S: AsRef<str>>(columns: &[S], rows: Vec<Vec<Cell>>) -> Self {
        Self {
            columns: columns.iter().map(|c| c.as_ref().to_lowercase()).collect(),
            rows,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Index of a column the caller cannot do without.
    pub fn require_column(&self, template: Template, name: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| Error::MissingColumn {
            template: template.name().to_string(),
            column: name.to_string(),
        })
    }
}

/// Runs a SQL template against the data warehouse.
///
/// Implementations must report connection failures as
/// [`Error::QueryExecution`] and return column names lower-cased.
#[allow(async_fn_in_trait)]
pub trait QueryExecutor {
    async fn execute(&self, template: Template, params: &QueryParams) -> Result<Table>;
}


#[cfg(test)]
mod tests {
    use super::*;

    fn full_params() -> QueryParams {
        QueryParams::new()
            .set("start_date", "2025-01-01")
            .set("end_date", "2025-01-31")
            .set("rolling_window_days", 7)
            .set("group_by", "niche")
            .set("filters", "AND true")
    }

    #[test]
    fn test_render_substitutes_parameters() {
        let sql = render(Template::Acquisition, &full_params()).unwrap();
        assert!(sql.contains("'2025-01-01'"));
        assert!(sql.contains("du.niche AS niche"));
        assert!(sql.contains("AND true"));
        assert!(!sql.contains('{'));
    }

    #[test]
    fn test_render_rejects_missing_parameter() {
        let params = QueryParams::new().set("start_date", "2025-01-01");
        let err = render(Template::Acquisition, &params).unwrap_err();
        match err {
            Error::Template { template, message } => {
                assert_eq!(template, "acquisition.sql");
                assert!(message.contains("end_date") || message.contains("rolling_window_days") || message.contains("group_by") || message.contains("filters"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_every_template_renders_with_its_parameters() {
        let base = full_params().set("window_days", 30).set("first_n_days", 60);
        for template in [
            Template::Retention,
            Template::TrialActivation,
            Template::CustomerSuccess,
            Template::Acquisition,
            Template::UserMetrics,
            Template::ActiveCustomerRate,
        ] {
            let sql = render(template, &base).unwrap();
            assert!(!sql.contains('{'), "{} left a placeholder", template.name());
        }
        let options = QueryParams::new()
            .set("select_columns", "du.niche AS niche")
            .set("group_columns", "du.niche");
        assert!(render(Template::FilterOptions, &options).is_ok());
    }

    #[test]
    fn test_table_lowercases_columns() {
        let table = Table::new(&["DATE", "Niche"], vec![]);
        assert_eq!(table.columns(), &["date".to_string(), "niche".to_string()]);
        assert_eq!(table.column_index("niche"), Some(1));
        assert!(matches!(
            table.require_column(Template::Acquisition, "new_trials"),
            Err(Error::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_cell_conversions() {
        assert_eq!(Cell::Integer(3).as_f64(), Some(3.0));
        assert_eq!(Cell::Text("0.5".into()).as_f64(), Some(0.5));
        assert_eq!(Cell::Null.as_f64(), None);
        assert_eq!(Cell::Integer(3).as_text().as_deref(), Some("3"));
        assert!(Cell::Null.as_text().is_none());
    }
}
