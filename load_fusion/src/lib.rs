pub mod config;
pub mod data_loader;
pub mod diagnostics;
pub mod error;
pub mod expander;
pub mod feeder_features;
pub mod frames;
pub mod hourly_fuser;
pub mod load_shapes;
pub mod models;
pub mod pipeline;
pub mod profile_aggregator;
pub mod sink;
pub mod spatial_attributor;
pub mod zone_classifier;
pub mod zone_merger;

pub use config::{Granularity, OutputFormat, PipelineConfig};
pub use data_loader::DataLoader;
pub use diagnostics::FusionDiagnostics;
pub use error::{FusionError, Result};
pub use expander::Expander;
pub use hourly_fuser::{FusionStats, HourlyFuser};
pub use models::{ExpandedRow, FusedRow, HourlyRecord, Territory, ZipWithProfiles};
pub use pipeline::FusionPipeline;
pub use profile_aggregator::ProfileAggregator;
pub use spatial_attributor::SpatialAttributor;
pub use zone_classifier::ZoneClassifier;
pub use zone_merger::ZoneMerger;
