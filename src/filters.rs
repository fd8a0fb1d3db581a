use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::registry::is_user_dimension;

/// The choice a multiselect offers to lift the restriction on a dimension.
pub const SELECT_ALL: &str = "Select All";

/// Selected values for one filter dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// No restriction.
    All,
    /// Only these values. An empty set matches nothing.
    Values(BTreeSet<String>),
}

impl Selection {
    /// Build a selection from multiselect choices, where the presence of
    /// [`SELECT_ALL`] anywhere in the choices means no restriction.
    pub fn from_choices<I, S>(choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut values = BTreeSet::new();
        for choice in choices {
            let choice = choice.into();
            if choice == SELECT_ALL {
                return Selection::All;
            }
            values.insert(choice);
        }
        Selection::Values(values)
    }
}

/// User filters keyed by dimension name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterSet {
    filters: BTreeMap<String, Selection>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, dimension: &str, selection: Selection) -> Self {
        self.filters.insert(dimension.to_string(), selection);
        self
    }

    pub fn insert(&mut self, dimension: &str, selection: Selection) {
        self.filters.insert(dimension.to_string(), selection);
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Selection)> {
        self.filters.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Compile filters into a predicate fragment of the form
/// `AND <cond1> AND <cond2> ...`, ready to follow an existing `WHERE` clause.
///
/// Dimension names are checked against the known user dimensions, and values
/// are emitted as SQL string literals with embedded quotes doubled.
pub fn compile(filters: &FilterSet, table_alias: &str) -> Result<String> {
    if filters.is_empty() {
        return Ok("AND true".to_string());
    }
    let mut conditions = Vec::new();
    for (dimension, selection) in filters.iter() {
        if !is_user_dimension(dimension) {
            return Err(Error::UnsupportedDimension(dimension.to_string()));
        }
        let condition = match selection {
            Selection::All => "true".to_string(),
            Selection::Values(values) if values.is_empty() => "false".to_string(),
            Selection::Values(values) => {
                let list: Vec<String> = values.iter().map(|v| quote_literal(v)).collect();
                format!("{table_alias}.{dimension} IN ({})", list.join(", "))
            }
        };
        conditions.push(format!("AND {condition}"));
    }
    Ok(conditions.join(" "))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
