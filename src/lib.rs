//! District choropleth maps: a registry of a region's districts, their
//! boundaries, per-district aggregates of uploaded measurement tables, and a
//! rule-driven coloring of those aggregates into GeoJSON documents.

pub mod aggregate;
pub mod assemble;
pub mod catalog;
pub mod classify;
pub mod config;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod normalize;
pub mod registry;
pub mod service;
pub mod store;

pub use aggregate::{aggregate, MeasurementTable};
pub use assemble::{AssembledDocument, MapAssembler};
pub use catalog::GeometryCatalog;
pub use classify::{ClassificationEngine, Color};
pub use config::Config;
pub use error::{ChoroplethError, Result};
pub use registry::DistrictRegistry;
pub use service::{ApiReply, CatalogState, ChoroplethService, UploadRecord};
pub use store::MetricStore;
