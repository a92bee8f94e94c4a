pub mod config;
pub mod gallery;
pub mod matcher;
pub mod report;

// Re-export vision types for convenience
pub use alignreid_vision::{
    descriptor, distance, extractor, preprocess, AlignedDistanceScorer, Device, FeatureExtractor,
    PartDescriptorBuilder, PartDescriptorSet, Pipeline, Pooling, VisionError,
};
