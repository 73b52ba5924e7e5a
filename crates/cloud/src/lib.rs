//! # zonestats cloud
//!
//! Where layer data comes from: the catalog of logical layers, the backends
//! that serve concrete datasets (in-memory rasters, local GeoTIFFs, tiled
//! HTTP archives) and the resolver that picks one dataset per layer and
//! time slice.
//!
//! Every remote call takes an explicit [`Session`] carrying authentication,
//! the retry policy and the request timeout.

pub mod auth;
pub mod backend;
pub mod cache;
pub mod catalog;
pub mod error;
pub mod http;
pub mod resolver;
pub mod retry;
pub mod session;
pub mod tile_index;

pub use backend::{LayerBackend, MemoryBackend, TileBackend, TileBackendConfig};
pub use catalog::{DatasetInfo, LayerCatalog, LayerSpec, Season, TemporalResolution, TimeSlice};
pub use error::{CloudError, Result};
pub use resolver::{DatasetHandle, LayerResolver};
pub use retry::RetryPolicy;
pub use session::Session;
pub use tile_index::BBox;
