//! Map model: viewport, layers and features.
//!
//! Each bound source feeds one layer. Features come from document hits
//! (`location.point` as "lat,lon") or from aggregation buckets, where the
//! bucket count is scaled to a metric between 0 and 20000.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use quarry_core::{
    value_at_path, AggregationMapMode, LayerKind, MapConfig, Request, Response, SourceConfig,
    Viewport,
};
use regex::Regex;
use serde_json::Value;

use super::{Consumer, ConsumerKind};

/// Largest feature metric.
pub const MAX_METRIC: f64 = 20000.0;

/// Grid square keys are "lon lat" centre coordinates.
static SQUARE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(-?\d+(?:\.\d+)?) (-?\d+(?:\.\d+)?)$").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct MapFeature {
    pub lat: f64,
    pub lon: f64,
    pub metric: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapLayer {
    pub source: String,
    pub title: String,
    pub kind: LayerKind,
    pub enabled: bool,
    pub features: Vec<MapFeature>,
}

struct MapState {
    viewport: Viewport,
    layers: IndexMap<String, MapLayer>,
    initial_bounds_set: bool,
    loading: bool,
}

pub struct MapConsumer {
    config: MapConfig,
    state: RwLock<MapState>,
}

impl MapConsumer {
    pub fn new(config: MapConfig) -> Self {
        let layers = config
            .sources
            .iter()
            .map(|(source, label)| {
                let layer = config.layers.get(source).cloned().unwrap_or_default();
                let enabled = match &config.disabled_layers {
                    Some(disabled) => !disabled.contains(source),
                    None => layer.enabled.unwrap_or(true),
                };
                (
                    source.clone(),
                    MapLayer {
                        source: source.clone(),
                        title: layer.title.unwrap_or_else(|| label.clone()),
                        kind: layer.kind,
                        enabled,
                        features: Vec::new(),
                    },
                )
            })
            .collect();
        let viewport = config.initial_viewport.unwrap_or_default();
        Self {
            config,
            state: RwLock::new(MapState {
                viewport,
                layers,
                initial_bounds_set: false,
                loading: false,
            }),
        }
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    pub fn viewport(&self) -> Viewport {
        self.state.read().viewport
    }

    pub fn set_viewport(&self, viewport: Viewport) {
        self.state.write().viewport = viewport;
    }

    pub fn layers(&self) -> Vec<MapLayer> {
        self.state.read().layers.values().cloned().collect()
    }

    pub fn layer(&self, source: &str) -> Option<MapLayer> {
        self.state.read().layers.get(source).cloned()
    }

    /// Switch a layer on or off. Returns false for unknown layers.
    pub fn set_layer_enabled(&self, source: &str, enabled: bool) -> bool {
        let mut state = self.state.write();
        match state.layers.get_mut(source) {
            Some(layer) => {
                layer.enabled = enabled;
                if !enabled {
                    layer.features.clear();
                }
                true
            }
            None => false,
        }
    }

    /// Layers switched off, for persisting between sessions.
    pub fn disabled_layers(&self) -> Vec<String> {
        self.state
            .read()
            .layers
            .values()
            .filter(|l| !l.enabled)
            .map(|l| l.source.clone())
            .collect()
    }

    /// Fit to the next population again.
    pub fn reset_initial_bounds(&self) {
        self.state.write().initial_bounds_set = false;
    }

    pub fn initial_bounds_set(&self) -> bool {
        self.state.read().initial_bounds_set
    }

    pub fn is_loading(&self) -> bool {
        self.state.read().loading
    }
}

impl Consumer for MapConsumer {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn kind(&self) -> ConsumerKind {
        ConsumerKind::Map
    }

    fn panel(&self) -> Option<String> {
        self.config.panel.clone()
    }

    fn needs_population(&self, source: &str) -> bool {
        self.state
            .read()
            .layers
            .get(source)
            .is_some_and(|l| l.enabled)
    }

    fn populate(&self, settings: &SourceConfig, response: &Response, _request: &Request) {
        let mut features = hit_features(response);
        if let Some(aggs) = &response.aggregations {
            let buckets = settings
                .aggregation
                .as_ref()
                .and_then(|t| t.buckets(aggs))
                .or_else(|| find_value(aggs, "buckets").and_then(Value::as_array));
            if let Some(buckets) = buckets {
                match settings.aggregation_map_mode {
                    AggregationMapMode::GeoHash => features.extend(geohash_features(buckets)),
                    AggregationMapMode::GridSquare => {
                        features.extend(grid_square_features(buckets))
                    }
                }
            }
        }

        let mut state = self.state.write();
        let Some(layer) = state.layers.get_mut(&settings.id).filter(|l| l.enabled) else {
            return;
        };
        tracing::debug!(
            "Map '{}' layer '{}' populated with {} features",
            self.config.id,
            settings.id,
            features.len()
        );
        layer.features = features;

        if settings.initial_map_bounds && !state.initial_bounds_set {
            let fitted = state
                .layers
                .get(&settings.id)
                .filter(|l| !l.features.is_empty())
                .map(|l| bounds_of(&l.features, state.viewport.zoom));
            if let Some(viewport) = fitted {
                state.viewport = viewport;
                state.initial_bounds_set = true;
            }
        }
    }

    fn set_loading(&self, loading: bool) {
        self.state.write().loading = loading;
    }
}

// ===== Feature extraction =====

/// Depth-first search for the first value stored under `key`.
fn find_value<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map
            .get(key)
            .or_else(|| map.values().find_map(|v| find_value(v, key))),
        Value::Array(items) => items.iter().find_map(|v| find_value(v, key)),
        _ => None,
    }
}

fn hit_features(response: &Response) -> Vec<MapFeature> {
    response
        .hits
        .hits
        .iter()
        .filter_map(|hit| {
            let point = value_at_path(&hit.source, "location.point")?.as_str()?;
            let (lat, lon) = point.split_once(',')?;
            let metric = value_at_path(&hit.source, "location.coordinate_uncertainty_in_meters")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            Some(MapFeature {
                lat: lat.trim().parse().ok()?,
                lon: lon.trim().parse().ok()?,
                metric,
            })
        })
        .collect()
}

fn scaled_metric(count: f64, max: f64) -> f64 {
    (count.sqrt() / max * MAX_METRIC).round()
}

fn geohash_features(buckets: &[Value]) -> Vec<MapFeature> {
    let count_of = |bucket: &Value| find_value(bucket, "count").and_then(Value::as_f64);
    let max = buckets
        .iter()
        .filter_map(count_of)
        .map(f64::sqrt)
        .fold(10.0, f64::max);
    buckets
        .iter()
        .filter_map(|bucket| {
            let location = find_value(bucket, "location")?;
            Some(MapFeature {
                lat: location.get("lat")?.as_f64()?,
                lon: location.get("lon")?.as_f64()?,
                metric: scaled_metric(count_of(bucket).unwrap_or(0.0), max),
            })
        })
        .collect()
}

fn grid_square_features(buckets: &[Value]) -> Vec<MapFeature> {
    let squares: Vec<&Value> = buckets
        .iter()
        .filter_map(|b| find_value(b, "buckets").and_then(Value::as_array))
        .flatten()
        .collect();
    let doc_count = |square: &Value| square.get("doc_count").and_then(Value::as_f64).unwrap_or(0.0);
    let max = squares
        .iter()
        .map(|s| doc_count(*s).sqrt())
        .fold(10.0, f64::max);
    squares
        .iter()
        .filter_map(|square| {
            let key = square.get("key")?.as_str()?;
            let caps = SQUARE_KEY.captures(key)?;
            Some(MapFeature {
                lat: caps[2].parse().ok()?,
                lon: caps[1].parse().ok()?,
                metric: scaled_metric(doc_count(*square), max),
            })
        })
        .collect()
}

fn bounds_of(features: &[MapFeature], zoom: i32) -> Viewport {
    let mut viewport = Viewport {
        north: f64::MIN,
        south: f64::MAX,
        east: f64::MIN,
        west: f64::MAX,
        zoom,
    };
    for feature in features {
        viewport.north = viewport.north.max(feature.lat);
        viewport.south = viewport.south.min(feature.lat);
        viewport.east = viewport.east.max(feature.lon);
        viewport.west = viewport.west.min(feature.lon);
    }
    viewport
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use quarry_core::{Hit, Hits, LayerConfig};
    use serde_json::json;

    fn map_config() -> MapConfig {
        MapConfig {
            id: "map".to_string(),
            sources: [
                ("records".to_string(), "Records".to_string()),
                ("squares".to_string(), "Squares".to_string()),
            ]
            .into_iter()
            .collect(),
            layers: [(
                "squares".to_string(),
                LayerConfig {
                    title: Some("Square density".to_string()),
                    kind: LayerKind::Square,
                    enabled: Some(false),
                },
            )]
            .into_iter()
            .collect(),
            panel: Some("tab-map".to_string()),
            initial_viewport: None,
            disabled_layers: None,
        }
    }

    fn settings(id: &str) -> SourceConfig {
        SourceConfig {
            id: id.to_string(),
            size: None,
            sort: IndexMap::new(),
            filter_bool_clauses: Default::default(),
            row_filter: None,
            filter_bounds_using_map: None,
            aggregation: None,
            aggregation_map_mode: Default::default(),
            tables: IndexMap::new(),
            initial_map_bounds: false,
        }
    }

    #[test]
    fn test_layer_enabled_defaults() {
        let map = MapConsumer::new(map_config());
        assert!(map.needs_population("records"));
        assert!(!map.needs_population("squares"));
        assert!(!map.needs_population("unbound"));
        assert_eq!(map.layer("squares").unwrap().title, "Square density");
        assert_eq!(map.layer("records").unwrap().title, "Records");
    }

    #[test]
    fn test_disabled_layers_override_config() {
        let mut config = map_config();
        config.disabled_layers = Some(vec!["records".to_string()]);
        let map = MapConsumer::new(config);
        assert!(!map.needs_population("records"));
        assert!(map.needs_population("squares"));
        assert_eq!(map.disabled_layers(), vec!["records".to_string()]);
    }

    #[test]
    fn test_hit_features() {
        let map = MapConsumer::new(map_config());
        let response = Response {
            hits: Hits {
                hits: vec![
                    Hit {
                        id: Some("1".to_string()),
                        source: json!({ "location": {
                            "point": "51.5,-0.12",
                            "coordinate_uncertainty_in_meters": 100
                        } }),
                    },
                    Hit {
                        id: Some("2".to_string()),
                        source: json!({ "location": {} }),
                    },
                ],
                total: Default::default(),
            },
            ..Default::default()
        };
        map.populate(&settings("records"), &response, &Request::default());
        assert_eq!(
            map.layer("records").unwrap().features,
            vec![MapFeature {
                lat: 51.5,
                lon: -0.12,
                metric: 100.0
            }]
        );
    }

    #[test]
    fn test_geohash_metric_scaling() {
        let buckets = vec![
            json!({ "key": "gcpv", "centroid": { "location": { "lat": 51.0, "lon": -1.0 }, "count": 400 } }),
            json!({ "key": "gcpu", "centroid": { "location": { "lat": 52.0, "lon": -2.0 }, "count": 100 } }),
        ];
        let features = geohash_features(&buckets);
        assert_eq!(features[0].metric, 20000.0);
        assert_eq!(features[1].metric, 10000.0);

        // Small counts are scaled against a floor of 10.
        let features = geohash_features(&[json!({ "location": { "lat": 1.0, "lon": 1.0 }, "count": 25 })]);
        assert_eq!(features[0].metric, 10000.0);
    }

    #[test]
    fn test_grid_square_features() {
        let buckets = vec![json!({
            "key": 27700,
            "by_square": { "buckets": [
                { "key": "-1.5 52.25", "doc_count": 400 },
                { "key": "not a square", "doc_count": 3 }
            ] }
        })];
        let features = grid_square_features(&buckets);
        assert_eq!(
            features,
            vec![MapFeature {
                lat: 52.25,
                lon: -1.5,
                metric: 20000.0
            }]
        );
    }

    #[test]
    fn test_initial_bounds_fit_once() {
        let map = MapConsumer::new(map_config());
        let mut settings = settings("records");
        settings.initial_map_bounds = true;
        let response = |point: &str| Response {
            hits: Hits {
                hits: vec![Hit {
                    id: None,
                    source: json!({ "location": { "point": point } }),
                }],
                total: Default::default(),
            },
            ..Default::default()
        };

        map.populate(&settings, &response("51.0,-1.0"), &Request::default());
        assert!(map.initial_bounds_set());
        assert_eq!(map.viewport().north, 51.0);

        map.populate(&settings, &response("10.0,10.0"), &Request::default());
        assert_eq!(map.viewport().north, 51.0);

        map.reset_initial_bounds();
        map.populate(&settings, &response("10.0,10.0"), &Request::default());
        assert_eq!(map.viewport().north, 10.0);
    }
}
