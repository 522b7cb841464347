use std::sync::Arc;

use arrow_array::types::Float32Type;
use arrow_array::{FixedSizeListArray, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};

use ragdb_core::types::Chunk;
use ragdb_core::{Error, Result};

pub const VECTOR_COLUMN: &str = "vector";

pub fn chunk_schema(dim: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("ordinal", DataType::Int64, false),
        Field::new("source_url", DataType::Utf8, false),
        Field::new("section", DataType::Utf8, false),
        Field::new("title", DataType::Utf8, false),
        Field::new("content", DataType::Utf8, false),
        Field::new(
            VECTOR_COLUMN,
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim as i32),
            true,
        ),
    ]))
}

/// Dimension of the vector column, if the schema has one.
pub fn vector_dim(schema: &Schema) -> Option<usize> {
    match schema.field_with_name(VECTOR_COLUMN).ok()?.data_type() {
        DataType::FixedSizeList(_, n) => usize::try_from(*n).ok(),
        _ => None,
    }
}

/// Rows for `chunks`, numbered from `first_ordinal`. Embeddings must already
/// have been checked against `dim`.
pub fn chunks_to_record_batch(
    chunks: &[Chunk],
    embeddings: &[Vec<f32>],
    first_ordinal: usize,
    dim: usize,
) -> Result<RecordBatch> {
    let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
    let ordinals: Vec<i64> = (0..chunks.len()).map(|i| (first_ordinal + i) as i64).collect();
    let urls: Vec<&str> = chunks.iter().map(|c| c.source_url.as_str()).collect();
    let sections: Vec<&str> = chunks.iter().map(|c| c.section.as_str()).collect();
    let titles: Vec<&str> = chunks.iter().map(|c| c.title.as_str()).collect();
    let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
    let vectors = embeddings.iter().map(|v| Some(v.iter().copied().map(Some).collect::<Vec<_>>()));

    RecordBatch::try_new(
        chunk_schema(dim),
        vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(Int64Array::from(ordinals)),
            Arc::new(StringArray::from(urls)),
            Arc::new(StringArray::from(sections)),
            Arc::new(StringArray::from(titles)),
            Arc::new(StringArray::from(contents)),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors, dim as i32)),
        ],
    )
    .map_err(|e| Error::Storage(format!("building record batch: {e}")))
}
