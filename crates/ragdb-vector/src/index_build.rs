//! IVF_PQ training for large tables. Below `vector.ann_min_rows` the table is
//! searched exhaustively.

use lancedb::index::vector::IvfPqIndexBuilder;
use lancedb::index::Index;
use lancedb::DistanceType;

use ragdb_core::Result;

use crate::schema::VECTOR_COLUMN;
use crate::table::storage;
use crate::LanceVectorIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IvfPqParams {
    pub nlist: usize,
    pub m: usize,
    pub nbits: usize,
}

pub fn compute_ivfpq_params(total_rows: usize, dim: usize) -> IvfPqParams {
    let sqrt_n = (total_rows as f64).sqrt() as usize;
    let mut nlist = std::cmp::max(2048, 2 * sqrt_n).min(65536);
    nlist = if total_rows > 1 { nlist.min(total_rows - 1) } else { 1 };
    let target_m = if dim >= 1024 { 32 } else { 16 };
    // num_sub_vectors must divide the dimension
    let m = (1..=target_m.min(dim.max(1))).rev().find(|m| dim % m == 0).unwrap_or(1);
    IvfPqParams { nlist, m, nbits: 8 }
}

impl LanceVectorIndex {
    pub async fn build_ann_index(&self, total_rows: usize) -> Result<IvfPqParams> {
        let params = compute_ivfpq_params(total_rows, self.dim);
        tracing::info!(rows = total_rows, nlist = params.nlist, m = params.m, "training IVF_PQ index");
        self.table
            .create_index(
                &[VECTOR_COLUMN],
                Index::IvfPq(
                    IvfPqIndexBuilder::default()
                        .distance_type(DistanceType::Cosine)
                        .num_partitions(params.nlist as u32)
                        .num_sub_vectors(params.m as u32),
                ),
            )
            .execute()
            .await
            .map_err(storage("build IVF_PQ index"))?;
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_scale_with_rows_and_divide_dim() {
        let p = compute_ivfpq_params(1_000_000, 1536);
        assert_eq!(p, IvfPqParams { nlist: 2048, m: 32, nbits: 8 });

        let p = compute_ivfpq_params(100, 1024);
        assert_eq!(p.nlist, 99);

        let p = compute_ivfpq_params(200_000, 100);
        assert_eq!(100 % p.m, 0);
        assert!(p.m <= 16);

        assert_eq!(compute_ivfpq_params(1, 8).nlist, 1);
    }
}
