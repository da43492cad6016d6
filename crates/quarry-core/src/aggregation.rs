//! Aggregation templates with named insertion points.
//!
//! A template is an opaque aggregation body plus JSON pointers to the places
//! the data source writes into before each request:
//!
//! - `bounds_filter` - replaced by a geo bounding box built from a map viewport
//! - `grid` - geohash grid settings, precision derived from the map zoom
//! - `composite` - name of a top-level composite aggregation; its `after` key
//!   carries the paging cursor and its `after_key` is read from responses
//! - `buckets` - where the bucket list lives in the response aggregations

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ConfigError;

fn default_geo_field() -> String {
    "location.point".to_string()
}

/// Visible area of a map, in degrees, plus its zoom level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Viewport {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
    pub zoom: i32,
}

impl Viewport {
    /// Clamp every corner into valid latitude/longitude ranges.
    pub fn clamped(&self) -> Self {
        Self {
            north: self.north.clamp(-90.0, 90.0),
            south: self.south.clamp(-90.0, 90.0),
            east: self.east.clamp(-180.0, 180.0),
            west: self.west.clamp(-180.0, 180.0),
            zoom: self.zoom,
        }
    }

    /// Geohash precision appropriate to the zoom level.
    pub fn grid_precision(&self) -> i32 {
        (self.zoom - 3).clamp(4, 10)
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            north: 90.0,
            south: -90.0,
            east: 180.0,
            west: -180.0,
            zoom: 5,
        }
    }
}

/// An aggregation body with explicit insertion points.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregationTemplate {
    /// The aggregation DSL tree, sent as the request's `aggs`.
    pub body: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds_filter: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buckets: Option<String>,

    /// Geo point field used in bounding box and grid clauses.
    #[serde(default = "default_geo_field")]
    pub geo_field: String,
}

impl AggregationTemplate {
    pub fn new(body: Value) -> Self {
        Self {
            body,
            bounds_filter: None,
            grid: None,
            composite: None,
            buckets: None,
            geo_field: default_geo_field(),
        }
    }

    /// Check that every configured slot points into the body.
    pub fn validate(&self, source_id: &str) -> Result<(), ConfigError> {
        let check = |slot: &'static str, pointer: &Option<String>| match pointer {
            Some(p) if self.body.pointer(p).is_none() => Err(ConfigError::InvalidSlot {
                source_id: source_id.to_string(),
                slot,
                pointer: p.clone(),
            }),
            _ => Ok(()),
        };
        check("bounds_filter", &self.bounds_filter)?;
        check("grid", &self.grid)?;
        check("composite", &self.composite_pointer())?;
        Ok(())
    }

    /// Whether paging goes through a composite aggregation cursor.
    pub fn is_composite(&self) -> bool {
        self.composite.is_some()
    }

    fn composite_pointer(&self) -> Option<String> {
        self.composite
            .as_ref()
            .map(|name| format!("/{}/composite", escape_pointer(name)))
    }

    /// Deep-copy the body and fill the slots.
    ///
    /// The bounds and grid slots are only written when a viewport is given;
    /// the cursor only when one is known for the current page.
    pub fn instantiate(&self, viewport: Option<&Viewport>, cursor: Option<&Value>) -> Value {
        let mut body = self.body.clone();

        if let Some(viewport) = viewport {
            let v = viewport.clamped();
            if let Some(slot) = self.bounds_filter.as_deref().and_then(|p| body.pointer_mut(p)) {
                let mut bounds = serde_json::Map::new();
                bounds.insert("ignore_unmapped".to_string(), Value::Bool(true));
                bounds.insert(
                    self.geo_field.clone(),
                    json!({
                        "top_left": { "lat": v.north, "lon": v.west },
                        "bottom_right": { "lat": v.south, "lon": v.east },
                    }),
                );
                *slot = Value::Object(bounds);
            }
            if let Some(slot) = self.grid.as_deref().and_then(|p| body.pointer_mut(p)) {
                if !slot.is_object() {
                    *slot = json!({});
                }
                if let Some(grid) = slot.as_object_mut() {
                    grid.insert("field".to_string(), Value::String(self.geo_field.clone()));
                    grid.insert("precision".to_string(), json!(v.grid_precision()));
                }
            }
        }

        if let (Some(cursor), Some(pointer)) = (cursor, self.composite_pointer()) {
            if let Some(composite) = body.pointer_mut(&pointer).and_then(Value::as_object_mut) {
                composite.insert("after".to_string(), cursor.clone());
            }
        }

        body
    }

    /// The cursor written into an instantiated body, if any.
    pub fn cursor<'a>(&self, body: &'a Value) -> Option<&'a Value> {
        let pointer = self.composite_pointer()?;
        body.pointer(&format!("{}/after", pointer))
    }

    /// The composite `after_key` in a response's aggregations.
    pub fn after_key<'a>(&self, aggregations: &'a Value) -> Option<&'a Value> {
        let name = self.composite.as_ref()?;
        aggregations
            .pointer(&format!("/{}/after_key", escape_pointer(name)))
            .filter(|v| !v.is_null())
    }

    /// The bucket list in a response's aggregations.
    pub fn buckets<'a>(&self, aggregations: &'a Value) -> Option<&'a Vec<Value>> {
        let pointer = match (&self.buckets, &self.composite) {
            (Some(p), _) => p.clone(),
            (None, Some(name)) => format!("/{}/buckets", escape_pointer(name)),
            (None, None) => return None,
        };
        aggregations.pointer(&pointer).and_then(Value::as_array)
    }
}

/// Escape a key for use as a JSON pointer segment.
fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geo_template() -> AggregationTemplate {
        let mut template = AggregationTemplate::new(json!({
            "filter_agg": {
                "filter": { "geo_bounding_box": {} },
                "aggs": {
                    "by_hash": {
                        "geohash_grid": { "field": "location.point", "precision": 1, "size": 10000 }
                    }
                }
            }
        }));
        template.bounds_filter = Some("/filter_agg/filter/geo_bounding_box".to_string());
        template.grid = Some("/filter_agg/aggs/by_hash/geohash_grid".to_string());
        template
    }

    #[test]
    fn test_north_clamped_to_ninety() {
        let viewport = Viewport {
            north: 95.0,
            south: -10.0,
            east: 200.0,
            west: -190.0,
            zoom: 8,
        };
        let body = geo_template().instantiate(Some(&viewport), None);
        let bounds = body
            .pointer("/filter_agg/filter/geo_bounding_box/location.point")
            .unwrap();
        assert_eq!(bounds["top_left"]["lat"], json!(90.0));
        assert_eq!(bounds["top_left"]["lon"], json!(-180.0));
        assert_eq!(bounds["bottom_right"]["lat"], json!(-10.0));
        assert_eq!(bounds["bottom_right"]["lon"], json!(180.0));
        assert_eq!(
            body.pointer("/filter_agg/filter/geo_bounding_box/ignore_unmapped"),
            Some(&json!(true))
        );
    }

    #[test]
    fn test_grid_precision_clamped() {
        let mut viewport = Viewport::default();
        viewport.zoom = 2;
        assert_eq!(viewport.grid_precision(), 4);
        viewport.zoom = 9;
        assert_eq!(viewport.grid_precision(), 6);
        viewport.zoom = 18;
        assert_eq!(viewport.grid_precision(), 10);

        let body = geo_template().instantiate(Some(&viewport), None);
        let grid = body.pointer("/filter_agg/aggs/by_hash/geohash_grid").unwrap();
        assert_eq!(grid["precision"], json!(10));
        assert_eq!(grid["size"], json!(10000));
    }

    #[test]
    fn test_template_untouched_by_instantiate() {
        let template = geo_template();
        let _ = template.instantiate(Some(&Viewport::default()), None);
        assert_eq!(
            template.body.pointer("/filter_agg/filter/geo_bounding_box"),
            Some(&json!({}))
        );
    }

    #[test]
    fn test_composite_cursor_and_after_key() {
        let mut template = AggregationTemplate::new(json!({
            "by_species": { "composite": { "size": 50, "sources": [] } }
        }));
        template.composite = Some("by_species".to_string());
        assert!(template.validate("s").is_ok());

        let cursor = json!({ "species": "Bombus" });
        let body = template.instantiate(None, Some(&cursor));
        assert_eq!(body["by_species"]["composite"]["after"], cursor);
        assert_eq!(template.cursor(&body), Some(&cursor));
        assert_eq!(template.cursor(&template.body), None);

        let aggregations = json!({
            "by_species": { "after_key": { "species": "Vespa" }, "buckets": [{ "key": 1 }] }
        });
        assert_eq!(
            template.after_key(&aggregations),
            Some(&json!({ "species": "Vespa" }))
        );
        assert_eq!(template.buckets(&aggregations).map(Vec::len), Some(1));
    }

    #[test]
    fn test_validate_rejects_dangling_slot() {
        let mut template = AggregationTemplate::new(json!({ "a": {} }));
        template.grid = Some("/a/geohash_grid".to_string());
        assert!(matches!(
            template.validate("records"),
            Err(ConfigError::InvalidSlot { slot: "grid", .. })
        ));
    }
}
