//! BioMixer - Adaptive wake-up alarm engine driven by wearable heart rate
//!
//! BioMixer reads intraday heart rate around each alarm firing and turns it
//! into a mixing-pattern choice and a comfort score through a deterministic
//! pipeline: telemetry fetch → resampling → summarization → pattern selection
//! → awakening metrics → comfort scoring.
//!
//! ## Modules
//!
//! - **Signal stages**: `resample`, `features`, `comfort` (pure functions)
//! - **Collaborators**: `telemetry`, `analysis`, `store` (async traits with
//!   HTTP and in-memory implementations)
//! - **Orchestration**: `policy` and `pipeline`

pub mod analysis;
pub mod comfort;
pub mod config;
pub mod error;
pub mod features;
pub mod pipeline;
pub mod policy;
pub mod resample;
pub mod store;
pub mod telemetry;
pub mod types;

pub use comfort::{ComfortFormula, ComfortScorer};
pub use config::EngineConfig;
pub use error::{EngineError, FetchError, StoreError};
pub use pipeline::AlarmProcessor;
pub use policy::{PatternPolicy, PolicyState};
pub use resample::Resampler;
pub use types::{AlarmEvent, MixingPattern, PatternSelection, ResampledSeries, TimeSample};

/// Engine version reported by the CLI
pub const BIOMIXER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "biomixer";
