//! Pivot tables from two-level aggregations.

use indexmap::IndexMap;
use quarry_core::{value_as_text, PivotConfig, PivotRow, PivotTable};
use serde_json::Value;

/// Pivot a response's aggregations.
///
/// Outer bucket keys become columns and inner bucket keys become rows. Every
/// row has a cell for every column; combinations with no bucket count zero.
pub fn build_pivot(aggregations: &Value, config: &PivotConfig) -> Option<PivotTable> {
    let outer = aggregations.get(&config.outer)?.get("buckets")?.as_array()?;
    let columns: Vec<String> = outer
        .iter()
        .map(|bucket| bucket.get("key").map(value_as_text).unwrap_or_default())
        .collect();
    let blank: IndexMap<String, u64> = columns.iter().map(|c| (c.clone(), 0)).collect();

    let mut rows: IndexMap<String, IndexMap<String, u64>> = IndexMap::new();
    for (bucket, column) in outer.iter().zip(&columns) {
        let inner = config
            .inner
            .iter()
            .try_fold(bucket, |node, key| node.get(key))
            .and_then(|node| node.get("buckets"))
            .and_then(Value::as_array);
        for inner_bucket in inner.into_iter().flatten() {
            let key = inner_bucket.get("key").map(value_as_text).unwrap_or_default();
            let count = inner_bucket.get("doc_count").and_then(Value::as_u64).unwrap_or(0);
            rows.entry(key)
                .or_insert_with(|| blank.clone())
                .insert(column.clone(), count);
        }
    }

    Some(PivotTable {
        columns,
        rows: rows
            .into_iter()
            .map(|(key, cells)| PivotRow { key, cells })
            .collect(),
    })
}
