//! Geometry sources and the coordinate conventions the catalog relies on.
//!
//! A provider only has to enumerate features (attributes plus a geometry)
//! and, where it knows it, declare the coordinate reference they are in.
//! Everything downstream of the catalog sees WGS84 longitude/latitude.

use std::{
    fmt,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use geo::{Coord, Geometry, MapCoords};
use geojson::{GeoJson, JsonObject, JsonValue};
use tracing::{debug, warn};

use crate::error::{ChoroplethError, Result};

const EARTH_RADIUS_M: f64 = 6_378_137.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    /// Longitude/latitude on WGS84 (EPSG:4326, OGC CRS84).
    Wgs84,
    /// Spherical Web Mercator (EPSG:3857).
    WebMercator,
    /// Any other EPSG code. Only usable with the `proj` feature.
    Epsg(u32),
}

impl Crs {
    fn from_epsg(code: u32) -> Self {
        match code {
            4326 => Crs::Wgs84,
            3857 | 900913 | 102100 | 102113 => Crs::WebMercator,
            other => Crs::Epsg(other),
        }
    }

    /// Builds the transform from this CRS to WGS84.
    pub fn to_wgs84(&self) -> Result<Transform> {
        match self {
            Crs::Wgs84 => Ok(Transform::Identity),
            Crs::WebMercator => Ok(Transform::WebMercator),
            #[cfg(feature = "proj")]
            Crs::Epsg(code) => proj::Proj::new_known_crs(&format!("EPSG:{}", code), "EPSG:4326", None)
                .map(Transform::Proj)
                .map_err(|e| {
                    ChoroplethError::config(format!("cannot reproject from EPSG:{}: {}", code, e))
                }),
            #[cfg(not(feature = "proj"))]
            Crs::Epsg(code) => Err(ChoroplethError::config(format!(
                "reprojecting from EPSG:{} requires the `proj` feature",
                code
            ))),
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Wgs84 => write!(f, "EPSG:4326"),
            Crs::WebMercator => write!(f, "EPSG:3857"),
            Crs::Epsg(code) => write!(f, "EPSG:{}", code),
        }
    }
}

impl FromStr for Crs {
    type Err = ChoroplethError;

    /// Accepts `EPSG:3857`, `urn:ogc:def:crs:EPSG::3857`,
    /// `urn:ogc:def:crs:OGC:1.3:CRS84` and bare codes.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.to_ascii_uppercase().ends_with("CRS84") {
            return Ok(Crs::Wgs84);
        }
        let code = s.rsplit(':').next().unwrap_or(s);
        code.parse::<u32>()
            .map(Crs::from_epsg)
            .map_err(|_| ChoroplethError::config(format!("unrecognized CRS '{}'", s)))
    }
}

/// A coordinate transform into WGS84.
pub enum Transform {
    Identity,
    WebMercator,
    #[cfg(feature = "proj")]
    Proj(proj::Proj),
}

impl Transform {
    pub fn apply(&self, geometry: &Geometry<f64>) -> Result<Geometry<f64>> {
        match self {
            Transform::Identity => Ok(geometry.clone()),
            Transform::WebMercator => Ok(geometry.map_coords(mercator_to_lon_lat)),
            #[cfg(feature = "proj")]
            Transform::Proj(proj) => geometry
                .try_map_coords(|c: Coord<f64>| {
                    proj.convert((c.x, c.y)).map(|(x, y)| Coord { x, y })
                })
                .map_err(|e| ChoroplethError::config(format!("reprojection failed: {}", e))),
        }
    }
}

fn mercator_to_lon_lat(c: Coord<f64>) -> Coord<f64> {
    let lon = (c.x / EARTH_RADIUS_M).to_degrees();
    let lat = (2.0 * (c.y / EARTH_RADIUS_M).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    Coord { x: lon, y: lat }
}

/// One boundary as read from a source, before name resolution.
#[derive(Debug, Clone)]
pub struct SourceFeature {
    pub attributes: JsonObject,
    pub geometry: Option<Geometry<f64>>,
}

impl SourceFeature {
    pub fn new(attributes: JsonObject, geometry: Geometry<f64>) -> Self {
        Self {
            attributes,
            geometry: Some(geometry),
        }
    }

    /// Reads an attribute as text. Numbers are rendered; other JSON types
    /// count as absent.
    pub fn text(&self, key: &str) -> Option<String> {
        match self.attributes.get(key)? {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

pub trait GeometryProvider {
    /// Coordinate reference the features are in, when the source declares one.
    fn crs(&self) -> Option<Crs>;

    fn features(&self) -> Result<Vec<SourceFeature>>;
}

/// A GeoJSON FeatureCollection on disk.
///
/// RFC 7946 files are WGS84; the legacy `crs` member is honoured when present.
#[derive(Debug, Clone)]
pub struct GeoJsonFile {
    path: PathBuf,
    collection: geojson::FeatureCollection,
}

impl GeoJsonFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let text = fs::read_to_string(&path).map_err(|e| {
            ChoroplethError::config(format!(
                "failed to read geometry file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let collection = Self::parse(&text)?;
        debug!(
            "Read {} features from {}",
            collection.features.len(),
            path.display()
        );
        Ok(Self { path, collection })
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(Self {
            path: PathBuf::from("<memory>"),
            collection: Self::parse(text)?,
        })
    }

    fn parse(text: &str) -> Result<geojson::FeatureCollection> {
        match text.parse::<GeoJson>()? {
            GeoJson::FeatureCollection(fc) => Ok(fc),
            GeoJson::Feature(f) => Ok(geojson::FeatureCollection {
                bbox: None,
                features: vec![f],
                foreign_members: None,
            }),
            GeoJson::Geometry(_) => Err(ChoroplethError::schema(
                "geometry source is a bare geometry, expected a FeatureCollection",
            )),
        }
    }
}

impl GeometryProvider for GeoJsonFile {
    fn crs(&self) -> Option<Crs> {
        let name = self
            .collection
            .foreign_members
            .as_ref()?
            .get("crs")?
            .get("properties")?
            .get("name")?
            .as_str()?;
        match name.parse() {
            Ok(crs) => Some(crs),
            Err(e) => {
                warn!("Ignoring crs member of {}: {}", self.path.display(), e);
                None
            }
        }
    }

    fn features(&self) -> Result<Vec<SourceFeature>> {
        let mut out = Vec::with_capacity(self.collection.features.len());
        for feature in &self.collection.features {
            let geometry = match &feature.geometry {
                Some(g) => Some(Geometry::<f64>::try_from(g.clone())?),
                None => None,
            };
            out.push(SourceFeature {
                attributes: feature.properties.clone().unwrap_or_default(),
                geometry,
            });
        }
        Ok(out)
    }
}

/// Features held in memory, e.g. produced by another reader.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    pub crs: Option<Crs>,
    pub features: Vec<SourceFeature>,
}

impl GeometryProvider for MemoryProvider {
    fn crs(&self) -> Option<Crs> {
        self.crs
    }

    fn features(&self) -> Result<Vec<SourceFeature>> {
        Ok(self.features.clone())
    }
}
