//! ragdb-vector
//!
//! LanceDB-backed vector index over chunk embeddings. One row per chunk with
//! its insertion ordinal, provenance columns and a fixed-size `vector` column.
//! Similarity is cosine throughout (`1 - distance`).

use std::path::Path;

use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, Table};

use arrow_array::{Int64Array, StringArray};

use ragdb_core::config::VectorSettings;
use ragdb_core::types::ChunkId;
use ragdb_core::{Error, Result};

pub mod index_build;
pub mod schema;
pub mod search;
pub mod table;
pub mod writer;

use crate::table::storage;

pub struct LanceVectorIndex {
    conn: Connection,
    table: Table,
    dim: usize,
    settings: VectorSettings,
}

impl LanceVectorIndex {
    /// Create a new, empty table at `path`. Fails if the table already exists.
    pub async fn create(path: &Path, dim: usize, settings: VectorSettings) -> Result<Self> {
        let conn = table::open_db(&path.to_string_lossy()).await?;
        if table::table_exists(&conn, &settings.table_name).await? {
            return Err(Error::Storage(format!("table '{}' already exists at {}", settings.table_name, path.display())));
        }
        let table = table::create_empty_table(&conn, &settings.table_name, schema::chunk_schema(dim)).await?;
        tracing::debug!(path = %path.display(), dim, table = %settings.table_name, "created vector table");
        Ok(Self { conn, table, dim, settings })
    }

    /// Open an existing table and check its vector dimension against `dim`.
    pub async fn open(path: &Path, dim: usize, settings: VectorSettings) -> Result<Self> {
        let corrupt = |what: String| Error::IndexCorruption(format!("vector store {}: {what}", path.display()));
        let conn = table::open_db(&path.to_string_lossy()).await.map_err(|e| corrupt(e.to_string()))?;
        if !table::table_exists(&conn, &settings.table_name).await.map_err(|e| corrupt(e.to_string()))? {
            return Err(corrupt(format!("table '{}' is missing", settings.table_name)));
        }
        let table = conn
            .open_table(&settings.table_name)
            .execute()
            .await
            .map_err(|e| corrupt(e.to_string()))?;
        let arrow_schema = table.schema().await.map_err(|e| corrupt(e.to_string()))?;
        match schema::vector_dim(&arrow_schema) {
            Some(found) if found == dim => {}
            Some(found) => return Err(corrupt(format!("vector dimension {found} does not match provider dimension {dim}"))),
            None => return Err(corrupt("no vector column".to_string())),
        }
        Ok(Self { conn, table, dim, settings })
    }

    pub fn dim(&self) -> usize { self.dim }
    pub fn settings(&self) -> &VectorSettings { &self.settings }
    pub fn connection(&self) -> &Connection { &self.conn }

    pub async fn count_rows(&self) -> Result<usize> {
        self.table.count_rows(None).await.map_err(storage("count rows"))
    }

    /// All chunk ids ordered by insertion ordinal.
    pub async fn chunk_ids(&self) -> Result<Vec<ChunkId>> {
        let mut stream = self
            .table
            .query()
            .select(Select::columns(&["id", "ordinal"]))
            .execute()
            .await
            .map_err(storage("scan ids"))?;
        let mut rows: Vec<(i64, ChunkId)> = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(storage("scan ids"))? {
            let ids = batch
                .column_by_name("id")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| Error::IndexCorruption("vector store: id column missing".into()))?;
            let ordinals = batch
                .column_by_name("ordinal")
                .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
                .ok_or_else(|| Error::IndexCorruption("vector store: ordinal column missing".into()))?;
            for i in 0..batch.num_rows() {
                rows.push((ordinals.value(i), ids.value(i).to_string()));
            }
        }
        rows.sort_by_key(|(ordinal, _)| *ordinal);
        Ok(rows.into_iter().map(|(_, id)| id).collect())
    }
}
