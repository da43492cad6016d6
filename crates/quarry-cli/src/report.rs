//! Plain text summaries of page state.

use quarry_core::{value_as_text, value_at_path};
use quarry_engine::{GridConsumer, MapConsumer, PopulateOutcome};

/// One line per source outcome.
pub fn outcome_line(source: &str, outcome: &PopulateOutcome) -> String {
    let status = match outcome {
        PopulateOutcome::Rendered => "rendered".to_string(),
        PopulateOutcome::Skipped(reason) => format!("skipped ({:?})", reason),
        PopulateOutcome::Stale => "stale response dropped".to_string(),
        PopulateOutcome::Overrun => "no further page".to_string(),
        PopulateOutcome::Failed(e) => format!("failed: {}", e),
    };
    format!("{}: {}", source, status)
}

/// Grid header, pager label and one line per row with its column values.
pub fn grid_summary(grid: &GridConsumer) -> String {
    let config = grid.config();
    let pager = grid.pager();
    let mut out = match pager.label() {
        Some(label) => format!("[{}] {}\n", config.id, label),
        None => format!("[{}] {} rows\n", config.id, pager.shown),
    };
    for row in grid.rows() {
        let cells: Vec<String> = config
            .columns
            .iter()
            .map(|column| {
                value_at_path(&row.doc, &column.field)
                    .map(value_as_text)
                    .unwrap_or_default()
            })
            .collect();
        let marker = if grid.selected_id().as_deref() == Some(row.id.as_str()) {
            '>'
        } else {
            ' '
        };
        out.push_str(&format!("{} {} | {}\n", marker, row.id, cells.join(" | ")));
    }
    out
}

/// One line per map layer.
pub fn map_summary(map: &MapConsumer) -> String {
    map.layers()
        .iter()
        .map(|layer| {
            let state = if layer.enabled { "on" } else { "off" };
            format!(
                "[{}] {} ({}): {} features\n",
                map.config().id,
                layer.title,
                state,
                layer.features.len()
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{
        BackendError, ColumnConfig, GridConfig, Hit, HitTotal, Hits, MapConfig, Request,
        Response, SourceConfig,
    };
    use quarry_engine::{Consumer, SkipReason};
    use serde_json::json;

    #[test]
    fn test_outcome_lines() {
        assert_eq!(
            outcome_line("records", &PopulateOutcome::Skipped(SkipReason::Duplicate)),
            "records: skipped (Duplicate)"
        );
        assert_eq!(
            outcome_line(
                "records",
                &PopulateOutcome::Failed(BackendError::Transport("refused".to_string()))
            ),
            "records: failed: Transport error: refused"
        );
    }

    #[test]
    fn test_grid_summary() {
        let grid = GridConsumer::new(GridConfig {
            id: "records-grid".to_string(),
            sources: [("records".to_string(), "Records".to_string())]
                .into_iter()
                .collect(),
            columns: vec![ColumnConfig {
                field: "taxon.accepted_name".to_string(),
                caption: "Species".to_string(),
            }],
            panel: None,
            apply_filter_row_to_sources: vec![],
            source_table: None,
            include_filter_row: false,
        });
        let settings: SourceConfig = serde_json::from_value(json!({ "id": "records" })).unwrap();
        let response = Response {
            hits: Hits {
                hits: vec![
                    Hit {
                        id: Some("a".to_string()),
                        source: json!({ "taxon": { "accepted_name": "Bombus terrestris" } }),
                    },
                    Hit {
                        id: Some("b".to_string()),
                        source: json!({ "taxon": { "accepted_name": "Apis mellifera" } }),
                    },
                ],
                total: HitTotal::Count(12),
            },
            ..Default::default()
        };
        grid.populate(&settings, &response, &Request::default());
        grid.select_row("b");

        assert_eq!(
            grid_summary(&grid),
            "[records-grid] Showing 1 to 2 of 12\n  a | Bombus terrestris\n> b | Apis mellifera\n"
        );
    }

    #[test]
    fn test_map_summary() {
        let config: MapConfig = serde_json::from_value(json!({
            "id": "map",
            "sources": { "records": "Records" },
            "layers": { "records": { "enabled": false } }
        }))
        .unwrap();
        let map = MapConsumer::new(config);
        assert_eq!(map_summary(&map), "[map] Records (off): 0 features\n");
    }
}
