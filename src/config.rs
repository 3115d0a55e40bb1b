use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{
    catalog::{CatalogOptions, DISTRICT_NAME_FIELDS, REGION_FIELDS},
    classify::{
        ClassificationEngine, ClassificationRule, Color, Comparison, CompositeRule, Predicate,
        ScoreTier, Tier,
    },
    error::{ChoroplethError, Result},
    geometry::Crs,
    registry::{CsvDistrictList, DistrictListSource, RegionTable},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Region whose districts are served.
    pub region: String,
    /// Region key → raw district names.
    #[serde(default)]
    pub regions: HashMap<String, Vec<String>>,
    /// CSV with `region,district` columns; used instead of `regions`.
    pub district_list: Option<PathBuf>,
    pub geometry: GeometryConfig,
    pub classification: ClassificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeometryConfig {
    pub path: PathBuf,
    pub crs: Option<String>,
    pub name_fields: Option<Vec<String>>,
    pub region_fields: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub filter_region: bool,
}

fn default_true() -> bool {
    true
}

fn default_no_data() -> Color {
    Color::no_data()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassificationConfig {
    #[serde(default = "default_no_data")]
    pub no_data: Color,
    pub metrics: Vec<MetricConfig>,
    pub composite: Option<CompositeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricConfig {
    pub id: String,
    /// Human-readable name used in upload replies.
    pub label: Option<String>,
    #[serde(default)]
    pub tiers: Vec<TierConfig>,
    pub default: Color,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierConfig {
    pub above: f64,
    pub color: Color,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompositeConfig {
    pub id: String,
    pub predicates: Vec<PredicateConfig>,
    pub tiers: Vec<ScoreTierConfig>,
    pub default: Color,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PredicateConfig {
    pub metric: String,
    pub above: Option<f64>,
    pub below: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScoreTierConfig {
    pub min_score: u32,
    pub color: Color,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ChoroplethError::config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let mut config = Self::from_toml_str(&content)?;

        // Relative paths are resolved against the config file's directory.
        if let Some(dir) = path.parent() {
            if config.geometry.path.is_relative() {
                config.geometry.path = dir.join(&config.geometry.path);
            }
            if let Some(list) = config.district_list.as_mut() {
                if list.is_relative() {
                    *list = dir.join(&*list);
                }
            }
        }
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// The configured district-list source, if any. With none the registry
    /// is built from the geometry itself.
    pub fn district_source(&self) -> Option<Box<dyn DistrictListSource>> {
        if let Some(path) = &self.district_list {
            Some(Box::new(CsvDistrictList::new(path)))
        } else if !self.regions.is_empty() {
            Some(Box::new(RegionTable::new(self.regions.clone())))
        } else {
            None
        }
    }

    pub fn catalog_options(&self) -> Result<CatalogOptions> {
        let g = &self.geometry;
        Ok(CatalogOptions {
            name_fields: g
                .name_fields
                .clone()
                .unwrap_or_else(|| DISTRICT_NAME_FIELDS.iter().map(|s| s.to_string()).collect()),
            region_fields: g
                .region_fields
                .clone()
                .unwrap_or_else(|| REGION_FIELDS.iter().map(|s| s.to_string()).collect()),
            region: g.filter_region.then(|| self.region.clone()),
            crs: g.crs.as_deref().map(str::parse::<Crs>).transpose()?,
        })
    }

    /// Label for upload messages; falls back to the metric id.
    pub fn metric_label<'a>(&'a self, metric: &'a str) -> &'a str {
        self.classification
            .metrics
            .iter()
            .find(|m| m.id == metric)
            .and_then(|m| m.label.as_deref())
            .unwrap_or(metric)
    }

    pub fn classification_engine(&self) -> Result<ClassificationEngine> {
        self.classification.build()
    }
}

impl ClassificationConfig {
    pub fn build(&self) -> Result<ClassificationEngine> {
        let mut rules = HashMap::new();
        for metric in &self.metrics {
            if metric.id.trim().is_empty() {
                return Err(ChoroplethError::config("metric id must not be blank"));
            }
            let tiers = metric
                .tiers
                .iter()
                .map(|t| Tier {
                    threshold: t.above,
                    color: t.color.clone(),
                })
                .collect();
            let rule = ClassificationRule::new(tiers, metric.default.clone());
            if rules.insert(metric.id.clone(), rule).is_some() {
                return Err(ChoroplethError::config(format!(
                    "metric '{}' is defined twice",
                    metric.id
                )));
            }
        }

        let composite = self.composite.as_ref().map(|c| c.build()).transpose()?;
        ClassificationEngine::new(self.no_data.clone(), rules, composite)
    }
}

impl CompositeConfig {
    fn build(&self) -> Result<CompositeRule> {
        let predicates = self
            .predicates
            .iter()
            .map(|p| {
                let (comparison, bound) = match (p.above, p.below) {
                    (Some(b), None) => (Comparison::Above, b),
                    (None, Some(b)) => (Comparison::Below, b),
                    _ => {
                        return Err(ChoroplethError::config(format!(
                            "predicate on '{}' needs exactly one of `above` or `below`",
                            p.metric
                        )))
                    }
                };
                Ok(Predicate {
                    metric: p.metric.clone(),
                    comparison,
                    bound,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut seen = HashSet::new();
        for t in &self.tiers {
            if !seen.insert(t.min_score) {
                return Err(ChoroplethError::config(format!(
                    "composite '{}' has two tiers at score {}",
                    self.id, t.min_score
                )));
            }
        }
        let tiers = self
            .tiers
            .iter()
            .map(|t| ScoreTier {
                min_score: t.min_score,
                color: t.color.clone(),
            })
            .collect();

        Ok(CompositeRule::new(
            self.id.clone(),
            predicates,
            tiers,
            self.default.clone(),
        ))
    }
}
