use std::collections::HashMap;

use geojson::{Feature, FeatureCollection, JsonObject, JsonValue};
use tracing::debug;

use crate::{
    catalog::{BoundaryRecord, GeometryCatalog},
    classify::{ClassificationEngine, Color},
    error::{ChoroplethError, Result},
    store::MetricStore,
};

/// One district of the map with its value and color.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedDistrict<'a> {
    pub record: &'a BoundaryRecord,
    /// The aggregate, or the integer score for a composite map.
    pub value: Option<f64>,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledDocument<'a> {
    pub metric: String,
    pub districts: Vec<AnnotatedDistrict<'a>>,
}

impl AssembledDocument<'_> {
    pub fn to_feature_collection(&self) -> FeatureCollection {
        let features = self
            .districts
            .iter()
            .map(|d| {
                let mut properties = JsonObject::new();
                properties.insert(
                    "district".into(),
                    JsonValue::from(d.record.name.canonical.clone()),
                );
                properties.insert("name".into(), JsonValue::from(d.record.name.display.clone()));
                properties.insert(
                    "value".into(),
                    d.value.map(JsonValue::from).unwrap_or(JsonValue::Null),
                );
                properties.insert("color".into(), JsonValue::from(d.color.as_str()));
                Feature {
                    bbox: None,
                    geometry: Some(geojson::Geometry::new(geojson::Value::from(
                        &d.record.geometry,
                    ))),
                    id: None,
                    properties: Some(properties),
                    foreign_members: None,
                }
            })
            .collect();

        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }
}

/// Joins boundaries with the current aggregates. Read-only over everything
/// it borrows.
pub struct MapAssembler<'a> {
    catalog: std::result::Result<&'a GeometryCatalog, &'a str>,
    store: &'a MetricStore,
    engine: &'a ClassificationEngine,
}

impl<'a> MapAssembler<'a> {
    pub fn new(catalog: &'a GeometryCatalog, store: &'a MetricStore, engine: &'a ClassificationEngine) -> Self {
        Self {
            catalog: Ok(catalog),
            store,
            engine,
        }
    }

    /// An assembler whose catalog failed to load; every request reports
    /// `reason`.
    pub fn unavailable(reason: &'a str, store: &'a MetricStore, engine: &'a ClassificationEngine) -> Self {
        Self {
            catalog: Err(reason),
            store,
            engine,
        }
    }

    pub fn assemble(&self, metric: &str) -> Result<AssembledDocument<'a>> {
        let catalog = self
            .catalog
            .map_err(|reason| ChoroplethError::CatalogUnavailable(reason.to_owned()))?;

        let districts = if let Some(rule) = self.engine.composite().filter(|c| c.id == metric) {
            let required = rule.required_metrics();
            let snapshot = self.store.snapshot_many(&required);
            catalog
                .iter()
                .map(|record| -> Result<AnnotatedDistrict<'a>> {
                    let values: HashMap<&str, Option<f64>> = required
                        .iter()
                        .map(|m| (*m, snapshot[*m].get(&record.name.canonical).copied()))
                        .collect();
                    let outcome = self.engine.classify_composite(&values)?;
                    Ok(AnnotatedDistrict {
                        record,
                        value: outcome.score.map(f64::from),
                        color: outcome.color,
                    })
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            if !self.engine.is_metric(metric) {
                return Err(ChoroplethError::UnknownMetric(metric.to_owned()));
            }
            let snapshot = self.store.snapshot(metric);
            catalog
                .iter()
                .map(|record| -> Result<AnnotatedDistrict<'a>> {
                    let value = snapshot.get(&record.name.canonical).copied();
                    Ok(AnnotatedDistrict {
                        record,
                        value,
                        color: self.engine.classify(metric, value)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?
        };

        debug!(
            metric,
            districts = districts.len(),
            with_values = districts.iter().filter(|d| d.value.is_some()).count(),
            "Assembled map"
        );

        Ok(AssembledDocument {
            metric: metric.to_owned(),
            districts,
        })
    }
}
