#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod budget;
pub mod cache;
pub mod config;
pub mod correlate;
pub mod error;
pub mod io;
pub mod layout;
pub mod progress;
pub mod roi;
pub mod source;
pub mod stats;
pub mod types;
pub mod weights;

pub use budget::{
    BlockPlan, BudgetFacts, DEFAULT_FULL_CACHE_FRACTION, MemoryBudgetPlanner, MemoryLimit,
};
pub use config::{CorrelationOptions, RunConfig};
pub use correlate::{CorrelationEngine, correlate};
pub use error::{CorrelationError, ValidationError};
pub use layout::{Partition, RowLayout, SurfacePartition, VolumePartition, VolumeSpace};
pub use progress::{CorrelationProgressObserver, CorrelationStage, NoopCorrelationProgress};
pub use roi::{RoiIndexMap, RoiSelectors, SurfaceSelector, VolumeSelector};
pub use source::{DenseMatrix, MatrixSink, MatrixSource};
pub use weights::WeightModel;
