//! # zonestats pipeline
//!
//! Ties the other crates together: a [`PipelineConfig`] drives zone
//! generation, layer resolution and zonal reduction for each project
//! boundary, and the resulting [`ResultTable`]s are exported as CSV.
//!
//! ```no_run
//! use zonestats_pipeline::{run_project, PipelineConfig};
//! use zonestats_core::vector::load_boundary;
//!
//! # fn main() -> zonestats_core::Result<()> {
//! let config = PipelineConfig::from_file("zonestats.toml")?;
//! let resolver = config.build_resolver()?;
//! let session = config.session()?;
//! let boundary = load_boundary("ACR-123.geojson", &config.loader)?;
//! let run = run_project(&boundary, &config, &resolver, &session)?;
//! println!("{} values", run.table.observations().count());
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod derived;
pub mod export;
mod maybe_rayon;
pub mod result;
pub mod run;

pub use batch::{discover, run_batch, BatchReport, ProjectReport, ProjectSource, ProjectStatus};
pub use config::{BackendConfig, LocalBackendConfig, PipelineConfig, YearRange};
pub use derived::{derive, DerivedRow};
pub use export::{export_batch_summary, export_csv, export_derived, export_windows, write_csv, write_derived_csv};
pub use result::{Observation, Outcome, ResultEntry, ResultKey, ResultTable, ResultTableBuilder};
pub use run::{run_project, ProjectRun, ZoneWindow};
