//! Request handling on top of the core: owns the long-lived state and turns
//! results into the JSON reply contract of the web front end.

use std::{collections::HashMap, fs::File, io::Read, path::Path};

use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::{
    aggregate::{aggregate, MeasurementTable},
    assemble::MapAssembler,
    catalog::{CatalogOptions, GeometryCatalog},
    classify::{ClassificationEngine, Color},
    config::Config,
    error::{ChoroplethError, Result},
    geometry::{GeoJsonFile, GeometryProvider},
    registry::DistrictRegistry,
    store::MetricStore,
};

/// A single upload: one table for one metric and one district.
#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub metric: String,
    pub district: String,
    pub table: MeasurementTable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    pub district: String,
    pub value: f64,
    pub color: Color,
    pub message: String,
}

/// Whether the boundaries loaded at startup.
#[derive(Debug)]
pub enum CatalogState {
    Loaded(GeometryCatalog),
    Unavailable { reason: String },
}

/// Status code and JSON body for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiReply {
    pub status: u16,
    pub body: Value,
}

impl ApiReply {
    pub fn error(err: &ChoroplethError) -> Self {
        Self {
            status: err.status_code(),
            body: json!({ "success": false, "error": err.to_string() }),
        }
    }
}

pub struct ChoroplethService {
    registry: DistrictRegistry,
    catalog: CatalogState,
    store: MetricStore,
    engine: ClassificationEngine,
    labels: HashMap<String, String>,
}

impl ChoroplethService {
    pub fn new(registry: DistrictRegistry, catalog: CatalogState, engine: ClassificationEngine) -> Self {
        Self {
            registry,
            catalog,
            store: MetricStore::new(),
            engine,
            labels: HashMap::new(),
        }
    }

    /// Display labels for metrics, used in upload messages.
    pub fn with_labels(mut self, labels: HashMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// Builds the service from configuration. Registry and classification
    /// errors are fatal; a geometry failure is logged and leaves the map
    /// unavailable.
    pub fn start(config: &Config) -> Result<Self> {
        let engine = config.classification_engine()?;
        let options = config.catalog_options()?;
        let labels = config
            .classification
            .metrics
            .iter()
            .map(|m| (m.id.clone(), config.metric_label(&m.id).to_owned()))
            .collect();

        let service = match config.district_source() {
            Some(source) => {
                let registry = DistrictRegistry::load(source.as_ref(), &config.region)?;
                info!("Registry for '{}' has {} districts", config.region, registry.len());
                let catalog = Self::load_catalog(
                    || GeoJsonFile::open(&config.geometry.path),
                    Some(&registry),
                    &options,
                );
                Self::new(registry, catalog, engine)
            }
            None => {
                // No district list: the menu is whatever the geometry holds.
                let catalog = Self::load_catalog(
                    || GeoJsonFile::open(&config.geometry.path),
                    None,
                    &options,
                );
                let registry = match &catalog {
                    CatalogState::Loaded(c) => DistrictRegistry::from_names(
                        &config.region,
                        c.names().map(|n| n.display.as_str()),
                    ),
                    CatalogState::Unavailable { .. } => DistrictRegistry::from_names(
                        &config.region,
                        std::iter::empty::<&str>(),
                    ),
                };
                info!(
                    "Registry for '{}' built from geometry: {} districts",
                    config.region,
                    registry.len()
                );
                Self::new(registry, catalog, engine)
            }
        };

        Ok(service.with_labels(labels))
    }

    /// Runs a catalog load and folds any failure into `Unavailable`.
    pub fn load_catalog<P, F>(
        open: F,
        registry: Option<&DistrictRegistry>,
        options: &CatalogOptions,
    ) -> CatalogState
    where
        P: GeometryProvider,
        F: FnOnce() -> Result<P>,
    {
        match open().and_then(|provider| GeometryCatalog::load(&provider, registry, options)) {
            Ok(catalog) => CatalogState::Loaded(catalog),
            Err(e) => {
                error!("Failed to load district boundaries: {}", e);
                CatalogState::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }

    pub fn registry(&self) -> &DistrictRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &CatalogState {
        &self.catalog
    }

    pub fn store(&self) -> &MetricStore {
        &self.store
    }

    pub fn engine(&self) -> &ClassificationEngine {
        &self.engine
    }

    pub fn assembler(&self) -> MapAssembler<'_> {
        match &self.catalog {
            CatalogState::Loaded(catalog) => MapAssembler::new(catalog, &self.store, &self.engine),
            CatalogState::Unavailable { reason } => {
                MapAssembler::unavailable(reason, &self.store, &self.engine)
            }
        }
    }

    /// Validates, aggregates and records one upload. Nothing is written
    /// unless every step succeeds.
    pub fn upload(&self, upload: &UploadRecord) -> Result<UploadOutcome> {
        let metric = upload.metric.trim();
        if self.engine.is_composite(metric) {
            return Err(ChoroplethError::UnknownMetric(format!(
                "{} is derived from other metrics and cannot be uploaded",
                metric
            )));
        }
        if !self.engine.is_metric(metric) {
            return Err(ChoroplethError::UnknownMetric(metric.to_owned()));
        }
        let district = self
            .registry
            .resolve(&upload.district)
            .ok_or_else(|| ChoroplethError::UnknownDistrict(upload.district.trim().to_owned()))?;

        let value = aggregate(metric, &upload.table)?;
        self.store.record(metric, &district.canonical, value);
        let color = self.engine.classify(metric, Some(value))?;

        let label = self.labels.get(metric).map(String::as_str).unwrap_or(metric);
        info!(metric, district = %district.display, value, "Recorded upload");
        Ok(UploadOutcome {
            district: district.display.clone(),
            value,
            color,
            message: format!(
                "Average {} for {} recorded as {:.2}.",
                label, district.display, value
            ),
        })
    }

    pub fn handle_upload(&self, upload: &UploadRecord) -> ApiReply {
        match self.upload(upload) {
            Ok(outcome) => ApiReply {
                status: 200,
                body: json!({
                    "success": true,
                    "message": outcome.message,
                    "district": outcome.district,
                    "value": outcome.value,
                    "color": outcome.color,
                }),
            },
            Err(e) => Self::rejected(&e),
        }
    }

    /// Parses a CSV body and handles it as an upload. A body that is not
    /// readable CSV is a caller error like any other.
    pub fn handle_csv_upload<R: Read>(&self, metric: &str, district: &str, reader: R) -> ApiReply {
        match MeasurementTable::from_csv(reader) {
            Ok(table) => self.handle_upload(&UploadRecord {
                metric: metric.to_owned(),
                district: district.to_owned(),
                table,
            }),
            Err(e) => Self::rejected(&e),
        }
    }

    /// Uploads a CSV file from disk. A missing or unopenable file gets a
    /// 400 reply instead of an error.
    pub fn handle_upload_file<P: AsRef<Path>>(&self, metric: &str, district: &str, path: P) -> ApiReply {
        let path = path.as_ref();
        match File::open(path) {
            Ok(file) => self.handle_csv_upload(metric, district, file),
            Err(e) => Self::rejected(&ChoroplethError::UnreadableUpload {
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn rejected(e: &ChoroplethError) -> ApiReply {
        warn!("Upload rejected: {}", e);
        ApiReply::error(e)
    }

    /// Map data for one metric (or the composite) as a GeoJSON
    /// FeatureCollection.
    pub fn handle_map_data(&self, metric: &str) -> ApiReply {
        let result = self
            .assembler()
            .assemble(metric.trim())
            .and_then(|doc| Ok(serde_json::to_value(doc.to_feature_collection())?));
        match result {
            Ok(body) => ApiReply { status: 200, body },
            Err(e) => {
                if matches!(e, ChoroplethError::CatalogUnavailable(_)) {
                    error!("{}", e);
                } else {
                    warn!("Map request rejected: {}", e);
                }
                ApiReply::error(&e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::tests::SAMPLE,
        geometry::{MemoryProvider, SourceFeature},
    };
    use geo::{Geometry, Rect};

    fn provider() -> MemoryProvider {
        let features = ["Çankaya", "Keçiören", "Yenimahalle", "Sincan"]
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let mut attributes = serde_json::Map::new();
                attributes.insert("ad".into(), json!(name));
                attributes.insert("il_adi".into(), json!("Ankara"));
                let x = 32.0 + i as f64 * 0.1;
                SourceFeature::new(
                    attributes,
                    Geometry::Polygon(Rect::new((x, 39.0), (x + 0.1, 39.1)).to_polygon()),
                )
            })
            .collect();
        MemoryProvider { crs: None, features }
    }

    fn service() -> ChoroplethService {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        let registry =
            DistrictRegistry::load(config.district_source().unwrap().as_ref(), "Ankara").unwrap();
        let catalog = ChoroplethService::load_catalog(
            || Ok(provider()),
            Some(&registry),
            &config.catalog_options().unwrap(),
        );
        ChoroplethService::new(registry, catalog, config.classification_engine().unwrap())
    }

    fn table(csv: &str) -> MeasurementTable {
        MeasurementTable::from_csv(csv.as_bytes()).unwrap()
    }

    fn upload(metric: &str, district: &str, csv: &str) -> UploadRecord {
        UploadRecord {
            metric: metric.into(),
            district: district.into(),
            table: table(csv),
        }
    }

    #[test]
    fn upload_records_mean_and_replies() {
        let service = service();
        let reply = service.handle_upload(&upload("temperature", "çankaya", "temperature\n16\n17\n"));
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body["success"], true);
        assert_eq!(reply.body["district"], "Çankaya");
        assert_eq!(reply.body["color"], "#FFFF00");
        assert_eq!(
            reply.body["message"],
            "Average temperature for Çankaya recorded as 16.50."
        );
        assert_eq!(service.store().get("temperature", "ÇANKAYA"), Some(16.5));
    }

    #[test]
    fn second_upload_replaces_first() {
        let service = service();
        service.upload(&upload("temperature", "Sincan", "temperature\n10\n")).unwrap();
        service.upload(&upload("temperature", "SINCAN ", "temperature\n20\n")).unwrap();
        assert_eq!(service.store().get("temperature", "SINCAN"), Some(20.0));
    }

    #[test]
    fn caller_errors_are_400_and_write_nothing() {
        let service = service();
        let cases = [
            upload("temperature", "Sincan", "humidity\n10\n"),
            upload("temperature", "Sincan", "temperature\n\n"),
            upload("temperature", "Bornova", "temperature\n10\n"),
            upload("rainfall", "Sincan", "rainfall\n10\n"),
            upload("summary", "Sincan", "summary\n3\n"),
        ];
        for case in &cases {
            let reply = service.handle_upload(case);
            assert_eq!(reply.status, 400, "{:?}", reply.body);
            assert_eq!(reply.body["success"], false);
            assert!(reply.body["error"].is_string());
        }
        assert!(service.store().snapshot("temperature").is_empty());
    }

    #[test]
    fn unreadable_csv_is_400() {
        let service = service();
        let reply = service.handle_csv_upload("temperature", "Sincan", &b"temperature\n\xff\xfe12\n"[..]);
        assert_eq!(reply.status, 400);
        assert_eq!(reply.body["success"], false);
        assert!(service.store().snapshot("temperature").is_empty());
    }

    #[test]
    fn missing_upload_file_is_400() {
        let service = service();
        let dir = tempfile::tempdir().unwrap();
        let reply = service.handle_upload_file("temperature", "Sincan", dir.path().join("absent.csv"));
        assert_eq!(reply.status, 400);
        assert_eq!(reply.body["success"], false);
        assert!(reply.body["error"].as_str().unwrap().contains("absent.csv"));
    }

    #[test]
    fn map_data_is_a_feature_collection() {
        let service = service();
        service.upload(&upload("temperature", "Sincan", "temperature\n18\n")).unwrap();
        let reply = service.handle_map_data("temperature");
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body["type"], "FeatureCollection");
        let features = reply.body["features"].as_array().unwrap();
        assert_eq!(features.len(), 4);
        let sincan = features
            .iter()
            .find(|f| f["properties"]["district"] == "SINCAN")
            .unwrap();
        assert_eq!(sincan["properties"]["color"], "#FF0000");
        assert_eq!(sincan["properties"]["value"], 18.0);
    }

    #[test]
    fn unavailable_catalog_is_500() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        let registry =
            DistrictRegistry::load(config.district_source().unwrap().as_ref(), "Ankara").unwrap();
        let catalog = ChoroplethService::load_catalog(
            || Ok(MemoryProvider::default()),
            Some(&registry),
            &CatalogOptions::default(),
        );
        assert!(matches!(catalog, CatalogState::Unavailable { .. }));
        let service =
            ChoroplethService::new(registry, catalog, config.classification_engine().unwrap());

        let reply = service.handle_map_data("temperature");
        assert_eq!(reply.status, 500);
        assert_eq!(reply.body["success"], false);
        assert!(reply.body["error"]
            .as_str()
            .unwrap()
            .contains("no recognized district-name field"));

        // Uploads still work; only the map is unavailable.
        let reply = service.handle_upload(&upload("temperature", "Sincan", "temperature\n10\n"));
        assert_eq!(reply.status, 200);
    }
}
