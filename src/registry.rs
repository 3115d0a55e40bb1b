use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::{Path, PathBuf},
};

use csv::{ReaderBuilder, Trim};
use tracing::{debug, warn};

use crate::{
    error::{ChoroplethError, Result},
    normalize::{normalize, DistrictName},
};

/// Supplies the raw district names for a region key.
pub trait DistrictListSource {
    /// `Ok(None)` when the source is readable but has no such region.
    fn districts(&self, region: &str) -> Result<Option<Vec<String>>>;
}

/// Region key → raw names, usually the `[regions]` table of the config file.
#[derive(Debug, Clone, Default)]
pub struct RegionTable {
    regions: HashMap<String, Vec<String>>,
}

impl RegionTable {
    pub fn new(regions: HashMap<String, Vec<String>>) -> Self {
        Self { regions }
    }
}

impl DistrictListSource for RegionTable {
    fn districts(&self, region: &str) -> Result<Option<Vec<String>>> {
        let key = normalize(region);
        Ok(self
            .regions
            .iter()
            .find(|(k, _)| normalize(k) == key)
            .map(|(_, v)| v.clone()))
    }
}

#[derive(serde::Deserialize)]
struct DistrictListRecord {
    region: String,
    district: String,
}

/// A CSV file with `region,district` columns.
#[derive(Debug, Clone)]
pub struct CsvDistrictList {
    path: PathBuf,
}

impl CsvDistrictList {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl DistrictListSource for CsvDistrictList {
    fn districts(&self, region: &str) -> Result<Option<Vec<String>>> {
        let mut rdr = ReaderBuilder::new()
            .trim(Trim::All)
            .from_path(&self.path)
            .map_err(|e| {
                ChoroplethError::config(format!(
                    "failed to read district list '{}': {}",
                    self.path.display(),
                    e
                ))
            })?;

        let key = normalize(region);
        let mut found = false;
        let mut names = Vec::new();
        for result in rdr.deserialize::<DistrictListRecord>() {
            let record = result.map_err(|e| {
                ChoroplethError::config(format!(
                    "malformed district list '{}': {}",
                    self.path.display(),
                    e
                ))
            })?;
            if normalize(&record.region) == key {
                found = true;
                names.push(record.district);
            }
        }

        Ok(found.then_some(names))
    }
}

/// Sorted, de-duplicated set of the districts of one region.
#[derive(Debug, Clone, Default)]
pub struct DistrictRegistry {
    region: String,
    entries: Vec<DistrictName>,
    index: HashSet<String>,
}

impl DistrictRegistry {
    pub fn load<S: DistrictListSource + ?Sized>(source: &S, region: &str) -> Result<Self> {
        match source.districts(region)? {
            Some(names) => Ok(Self::from_names(region, names)),
            None => Err(ChoroplethError::config(format!(
                "region '{}' is not present in the district list",
                region
            ))),
        }
    }

    /// Builds a registry from raw names. Names that collapse to the same
    /// canonical key keep the first display form.
    pub fn from_names<I, S>(region: &str, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut by_key: BTreeMap<String, DistrictName> = BTreeMap::new();
        for raw in names {
            let raw = raw.as_ref();
            match DistrictName::parse(raw) {
                Some(name) => {
                    if let Some(existing) = by_key.get(&name.canonical) {
                        debug!(
                            "'{}' collapses onto existing district '{}'",
                            raw, existing.display
                        );
                    } else {
                        by_key.insert(name.canonical.clone(), name);
                    }
                }
                None => warn!("Skipping blank district name in region '{}'", region),
            }
        }

        let entries: Vec<DistrictName> = by_key.into_values().collect();
        let index = entries.iter().map(|e| e.canonical.clone()).collect();

        Self {
            region: region.to_owned(),
            entries,
            index,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains(&normalize(name))
    }

    /// Resolves a free-text name to its registered entry.
    pub fn resolve(&self, name: &str) -> Option<&DistrictName> {
        let key = normalize(name);
        self.entries
            .binary_search_by(|e| e.canonical.as_str().cmp(key.as_str()))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Canonical names in sorted order.
    pub fn list(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.canonical.as_str()).collect()
    }

    pub fn entries(&self) -> &[DistrictName] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
