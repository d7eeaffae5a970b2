//! pinroll-source — artifact snapshots from a versioned object store.
//!
//! An artifact is a pair of objects sharing a name stem: `{name}-code.zip`
//! and `{name}-config.json` under a key prefix. The store keeps every
//! version of both, including delete markers. This crate turns that history
//! into one consistent (code, config) pair per name.
//!
//! # Components
//!
//! - **`store`** — `ObjectStore` trait plus in-memory and S3 backends
//! - **`stream`** — paginated version listing with a cutoff filter
//! - **`resolver`** — reduces version events to snapshots
//! - **`source`** — `ArtifactSource`: list, fetch code/config, timestamp
//! - **`catalog`** — memoized artifact listing per source
//! - **`materialize`** — writes an artifact's code and config to disk
//!
//! ```text
//! ObjectStore ──> VersionStream ──> resolve() ──> ArtifactSource
//!                                                   ├── ArtifactCatalog
//!                                                   └── ArtifactMaterializer
//! ```

pub mod catalog;
pub mod error;
pub mod materialize;
pub mod resolver;
pub mod source;
pub mod store;
pub mod stream;

pub use catalog::{ArtifactCatalog, ArtifactRef};
pub use error::{SourceError, SourceResult};
pub use materialize::ArtifactMaterializer;
pub use resolver::{KeyLayout, resolve};
pub use source::{ArtifactSource, LibrarySource, TimestampProvider};
pub use store::memory::MemoryObjectStore;
pub use store::{ObjectStore, VersionCursor, VersionPage};
pub use stream::VersionStream;

#[cfg(feature = "s3")]
pub use store::s3::S3ObjectStore;
