pub mod cancel;
pub mod config;
pub mod error;
pub mod location;
pub mod types;

pub use cancel::{Cancelled, cancellable};
pub use config::{PinrollConfig, RolloutConfig, SourceConfig};
pub use error::{ConfigError, ConfigResult};
pub use location::{LocationError, S3Location};
pub use types::*;
