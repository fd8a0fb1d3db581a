use rusqlite::types::Value;
use rusqlite::Connection;

use super::Database;
use crate::error::{Error, Result};
use crate::query::{render, Cell, QueryExecutor, QueryParams, Table, Template};

/// SQLite data warehouse answering the bundled SQL templates.
#[derive(Clone)]
pub struct Warehouse {
    db: Database,
}

impl Warehouse {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }
}

impl QueryExecutor for Warehouse {
    async fn execute(&self, template: Template, params: &QueryParams) -> Result<Table> {
        let sql = render(template, params)?;
        log::info!("running {}", template.name());
        log::debug!("{sql}");

        self.db
            .reader()
            .call(move |conn| read_table(conn, &sql))
            .await
            .map_err(|e| Error::QueryExecution(format!("{}: {e}", template.name())))
    }
}

fn read_table(conn: &Connection, sql: &str) -> rusqlite::Result<Table> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query([])?;
    let mut cells = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            record.push(Cell::from(row.get::<_, Value>(i)?));
        }
        cells.push(record);
    }
    Ok(Table::new(&columns, cells))
}
