pub mod descriptor;
pub mod distance;
pub mod error;
pub mod extractor;
pub mod model;
pub mod pipeline;
pub mod preprocess;

// Re-export commonly used types
pub use descriptor::{PartDescriptorBuilder, PartDescriptorSet, Pooling, DEFAULT_PARTS};
pub use distance::AlignedDistanceScorer;
pub use error::VisionError;
pub use extractor::{FeatureExtractor, InferenceError, OnnxExtractor, TimedExtractor};
pub use model::Device;
pub use pipeline::Pipeline;
pub use preprocess::{InputShape, Normalization};
