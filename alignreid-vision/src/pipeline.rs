use std::path::Path;

use image::DynamicImage;

use crate::descriptor::{PartDescriptorBuilder, PartDescriptorSet};
use crate::error::{Result, VisionError};
use crate::extractor::FeatureExtractor;
use crate::preprocess::{self, InputShape, Normalization};

/// Image → tensor → feature map → part descriptors.
pub struct Pipeline {
    extractor: Box<dyn FeatureExtractor>,
    shape: InputShape,
    normalization: Normalization,
    builder: PartDescriptorBuilder,
}

impl Pipeline {
    pub fn new(
        extractor: Box<dyn FeatureExtractor>,
        shape: InputShape,
        normalization: Normalization,
        builder: PartDescriptorBuilder,
    ) -> Self {
        Self {
            extractor,
            shape,
            normalization,
            builder,
        }
    }

    pub fn builder(&self) -> &PartDescriptorBuilder {
        &self.builder
    }

    pub fn describe_image(&self, img: &DynamicImage) -> Result<PartDescriptorSet> {
        let input = preprocess::to_tensor(img, self.shape, &self.normalization);
        let maps = self.extractor.extract(&input)?;
        let map = maps.first().ok_or(VisionError::MissingFeatureMap)?;
        self.builder.build(map.view())
    }

    pub fn describe_path(&self, path: &Path) -> Result<PartDescriptorSet> {
        let img = preprocess::load_image(path)?;
        self.describe_image(&img)
    }
}
