pub mod algorithm;
pub mod config;
pub mod error;
pub mod export;
pub mod filter;
pub mod kernel;
pub mod model;
pub mod recovery;
pub mod row;
pub mod simplex;
pub mod status;
pub mod traits;
pub mod window;

pub use algorithm::{AdaptiveBoundsAlgorithm, BoundCheck};
pub use config::{ControlParameters, FilterConfig, ModelConfig};
pub use error::{FilterError, Result};
pub use filter::{FilterDirection, OutlierFilter};
pub use kernel::Kernel;
pub use model::{ModelPair, SignalModel, UncertaintyModel};
pub use row::{ObservationRow, ResultRow, RowIndex};
pub use status::FilterStatus;
pub use traits::FilterAlgorithm;
