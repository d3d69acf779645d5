pub mod batching;
pub mod classify;
pub mod identity;
pub mod loader;
pub mod pipeline;
pub mod progress;
pub mod text;
pub mod transform;

pub use pipeline::{IngestReport, Ingestor, PipelineError};
pub use progress::{spawn_progress_logger, StatsSnapshot};
pub use transform::Transformer;
