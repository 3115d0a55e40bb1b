use std::collections::HashMap;

use geo::Geometry;
use itertools::Itertools;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::{
    error::{ChoroplethError, Result},
    geometry::{Crs, GeometryProvider, SourceFeature},
    normalize::{normalize, DistrictName},
    registry::DistrictRegistry,
};

/// District-name attribute keys, most specific first.
pub const DISTRICT_NAME_FIELDS: [&str; 7] =
    ["ad", "ilce", "ilce_adi", "NAME_3", "NAME_2", "district", "name"];

/// Region attribute keys used to cut a multi-region source down to one region.
pub const REGION_FIELDS: [&str; 5] = ["il_adi", "il", "NAME_1", "province", "region"];

#[derive(Debug, Clone)]
pub struct CatalogOptions {
    pub name_fields: Vec<String>,
    pub region_fields: Vec<String>,
    /// Region to keep when the source carries a region column.
    pub region: Option<String>,
    /// Overrides whatever CRS the provider declares.
    pub crs: Option<Crs>,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            name_fields: DISTRICT_NAME_FIELDS.iter().map(|s| s.to_string()).collect(),
            region_fields: REGION_FIELDS.iter().map(|s| s.to_string()).collect(),
            region: None,
            crs: None,
        }
    }
}

/// Attribute keys resolved once per load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    pub name_key: String,
    pub region_key: Option<String>,
}

impl FieldSchema {
    /// Picks the first candidate present in any feature. Exact key matches
    /// win over case-insensitive ones.
    pub fn resolve(features: &[SourceFeature], options: &CatalogOptions) -> Result<Self> {
        let keys: Vec<&str> = features
            .iter()
            .flat_map(|f| f.attributes.keys().map(|k| k.as_str()))
            .unique()
            .collect();

        let name_key = resolve_key(&keys, &options.name_fields).ok_or_else(|| {
            ChoroplethError::schema(format!(
                "no recognized district-name field (tried {})",
                options.name_fields.join(", ")
            ))
        })?;
        let region_key = resolve_key(&keys, &options.region_fields);

        Ok(Self {
            name_key,
            region_key,
        })
    }
}

fn resolve_key(keys: &[&str], candidates: &[String]) -> Option<String> {
    candidates.iter().find_map(|candidate| {
        keys.iter()
            .find(|k| **k == candidate.as_str())
            .or_else(|| keys.iter().find(|k| k.eq_ignore_ascii_case(candidate)))
            .map(|k| k.to_string())
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryRecord {
    pub name: DistrictName,
    /// Always WGS84 longitude/latitude.
    pub geometry: Geometry<f64>,
    /// CRS the geometry was read in, before reprojection.
    pub source_crs: Crs,
}

/// Districts on one side of the registry/geometry comparison only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageReport {
    /// Registered districts with no boundary; they cannot be drawn.
    pub missing_geometry: Vec<String>,
    /// Boundaries with no registry entry; drawn, but not selectable.
    pub unregistered: Vec<String>,
}

impl CoverageReport {
    pub fn is_complete(&self) -> bool {
        self.missing_geometry.is_empty() && self.unregistered.is_empty()
    }
}

/// One boundary per district of a region, keyed by canonical name.
#[derive(Debug, Clone)]
pub struct GeometryCatalog {
    records: HashMap<String, BoundaryRecord>,
    order: Vec<String>,
    coverage: CoverageReport,
}

impl GeometryCatalog {
    /// Loads and reprojects boundaries from `provider`. When a registry is
    /// given the result is cross-checked against it and ordered by it.
    pub fn load<P: GeometryProvider + ?Sized>(
        provider: &P,
        registry: Option<&DistrictRegistry>,
        options: &CatalogOptions,
    ) -> Result<Self> {
        let features = provider.features()?;
        let schema = FieldSchema::resolve(&features, options)?;
        info!(
            "Resolved district field '{}'{}",
            schema.name_key,
            schema
                .region_key
                .as_ref()
                .map(|k| format!(", region field '{}'", k))
                .unwrap_or_default()
        );

        let total = features.len();
        let features = filter_region(features, &schema, options)?;

        let mut kept: Vec<(DistrictName, Geometry<f64>)> = Vec::new();
        let mut seen: HashMap<String, String> = HashMap::new();
        for feature in features {
            let Some(name) = feature.text(&schema.name_key).and_then(|n| DistrictName::parse(&n))
            else {
                warn!("Skipping feature with no '{}' value", schema.name_key);
                continue;
            };
            let Some(geometry) = feature.geometry else {
                warn!("Skipping '{}': feature has no geometry", name.display);
                continue;
            };
            if let Some(first) = seen.get(&name.canonical) {
                warn!(
                    "Duplicate boundary for '{}' (first seen as '{}'), keeping the first",
                    name.display, first
                );
                continue;
            }
            seen.insert(name.canonical.clone(), name.display.clone());
            kept.push((name, geometry));
        }

        let source_crs = options.crs.or_else(|| provider.crs()).unwrap_or(Crs::Wgs84);
        // Fail fast on an unusable CRS before fanning out.
        source_crs.to_wgs84()?;

        let records: Vec<BoundaryRecord> = kept
            .into_par_iter()
            .map_init(
                || source_crs.to_wgs84(),
                |transform, (name, geometry)| -> Result<BoundaryRecord> {
                    let transform = transform
                        .as_ref()
                        .map_err(|e| ChoroplethError::config(e.to_string()))?;
                    Ok(BoundaryRecord {
                        name,
                        geometry: transform.apply(&geometry)?,
                        source_crs,
                    })
                },
            )
            .collect::<Result<_>>()?;

        let catalog = Self::from_records(records, registry);
        info!(
            "Loaded {} district boundaries ({} source features, {})",
            catalog.len(),
            total,
            source_crs
        );
        Ok(catalog)
    }

    /// Builds a catalog from already-resolved records. The first record wins
    /// on duplicate keys.
    pub fn from_records(records: Vec<BoundaryRecord>, registry: Option<&DistrictRegistry>) -> Self {
        let mut map: HashMap<String, BoundaryRecord> = HashMap::with_capacity(records.len());
        for record in records {
            map.entry(record.name.canonical.clone()).or_insert(record);
        }

        let mut coverage = CoverageReport::default();
        let order = match registry {
            Some(registry) => {
                coverage.missing_geometry = registry
                    .list()
                    .into_iter()
                    .filter(|k| !map.contains_key(*k))
                    .map(str::to_owned)
                    .collect();
                coverage.unregistered = map
                    .keys()
                    .filter(|k| !registry.contains(k))
                    .cloned()
                    .sorted()
                    .collect();

                if !coverage.missing_geometry.is_empty() {
                    warn!(
                        "{} registered districts have no boundary: {}",
                        coverage.missing_geometry.len(),
                        coverage.missing_geometry.join(", ")
                    );
                }
                if !coverage.unregistered.is_empty() {
                    warn!(
                        "{} boundaries are not in the '{}' registry: {}",
                        coverage.unregistered.len(),
                        registry.region(),
                        coverage.unregistered.join(", ")
                    );
                }

                registry
                    .list()
                    .into_iter()
                    .filter(|k| map.contains_key(*k))
                    .map(str::to_owned)
                    .chain(coverage.unregistered.iter().cloned())
                    .collect()
            }
            None => map.keys().cloned().sorted().collect(),
        };

        Self {
            records: map,
            order,
            coverage,
        }
    }

    pub fn get(&self, name: &str) -> Option<&BoundaryRecord> {
        self.records
            .get(name)
            .or_else(|| self.records.get(&normalize(name)))
    }

    /// Records in registry order, then unregistered ones by name.
    pub fn iter(&self) -> impl Iterator<Item = &BoundaryRecord> + '_ {
        self.order.iter().filter_map(|k| self.records.get(k))
    }

    pub fn names(&self) -> impl Iterator<Item = &DistrictName> + '_ {
        self.iter().map(|r| &r.name)
    }

    pub fn coverage(&self) -> &CoverageReport {
        &self.coverage
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn filter_region(
    features: Vec<SourceFeature>,
    schema: &FieldSchema,
    options: &CatalogOptions,
) -> Result<Vec<SourceFeature>> {
    let (Some(key), Some(region)) = (&schema.region_key, &options.region) else {
        return Ok(features);
    };

    let target = normalize(region);
    let kept: Vec<SourceFeature> = features
        .into_iter()
        .filter(|f| f.text(key).map(|v| normalize(&v) == target).unwrap_or(false))
        .collect();

    if kept.is_empty() {
        return Err(ChoroplethError::config(format!(
            "no features with {} = '{}' in geometry source",
            key, region
        )));
    }
    Ok(kept)
}
