pub mod algorithms;
pub mod config;
pub mod logging;
pub mod pipeline;
pub mod session;
pub mod synthetic;
pub mod tracker;
pub mod utils;

pub use algorithms::*;
pub use config::{load_config_or_default, Config, TrackerConfig};
pub use pipeline::*;
pub use session::{FrameHandoff, StepOutcome, TrackingSession};
pub use tracker::{ExtractFailure, Tracker, TrackerBuilder};
pub use utils::*;

pub type Result<T> = anyhow::Result<T>;
