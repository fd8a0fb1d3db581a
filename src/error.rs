use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Query execution error: {0}")]
    QueryExecution(String),

    #[error("Template error in {template}: {message}")]
    Template { template: String, message: String },

    #[error("Query {template} returned no column `{column}`")]
    MissingColumn { template: String, column: String },

    #[error("Invalid value in column `{column}`: {message}")]
    InvalidValue { column: String, message: String },

    #[error("Unsupported metric: {0}")]
    UnsupportedMetric(String),

    #[error("Unsupported dimension: {0}")]
    UnsupportedDimension(String),

    #[error("Duplicate row for date {date} and group {group}")]
    DuplicateRow { date: String, group: String },

    #[error("Display label `{label}` is shared by `{first}` and `{second}`")]
    LabelCollision {
        label: String,
        first: String,
        second: String,
    },

    #[error("Invalid window: {0}")]
    InvalidWindow(String),

    #[error("Missing {0}d retention window")]
    MissingWindow(u32),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<rusqlite_migration::Error> for Error {
    fn from(e: rusqlite_migration::Error) -> Self {
        Error::Migration(e.to_string())
    }
}

impl<E: fmt::Display> From<tokio_rusqlite::Error<E>> for Error {
    fn from(e: tokio_rusqlite::Error<E>) -> Self {
        Error::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
