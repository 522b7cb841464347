//! LanceDB connection and table helpers.

use std::sync::Arc;

use arrow_array::{RecordBatch, RecordBatchIterator};
use arrow_schema::{ArrowError, Schema};
use lancedb::{connect, Connection, Table};

use ragdb_core::{Error, Result};

pub(crate) fn storage(context: &str) -> impl Fn(lancedb::Error) -> Error + '_ {
    move |e| Error::Storage(format!("{context}: {e}"))
}

pub async fn open_db(uri: &str) -> Result<Connection> {
    connect(uri).execute().await.map_err(storage("connect"))
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let names = conn.table_names().execute().await.map_err(storage("list tables"))?;
    Ok(names.iter().any(|n| n == name))
}

/// Create `name` with zero rows.
pub async fn create_empty_table(conn: &Connection, name: &str, schema: Arc<Schema>) -> Result<Table> {
    let iter = RecordBatchIterator::new(Vec::<std::result::Result<RecordBatch, ArrowError>>::new(), schema);
    conn.create_table(name, Box::new(iter)).execute().await.map_err(storage("create table"))
}

pub async fn append(table: &Table, batch: RecordBatch) -> Result<()> {
    let schema = batch.schema();
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)], schema));
    table.add(reader).execute().await.map_err(storage("append rows"))?;
    Ok(())
}
