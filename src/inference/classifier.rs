use std::path::Path;

use anyhow::{Context, Result};
use image::RgbImage;
use rten::Model;
use rten_tensor::prelude::*;
use rten_tensor::NdTensor;

use crate::inference::Classifier;
use crate::inference::preprocessing::{resize_exact, to_nhwc};
use crate::models::Classification;

/// Dish classifier running a CNN on rten.
///
/// The model takes `[1, height, width, 3]` RGB in `[0, 1]` and ends in a
/// softmax over the dish classes.
pub struct CnnClassifier {
    model: Model,
    input_size: (u32, u32),
}

impl CnnClassifier {
    pub fn load<P: AsRef<Path>>(path: P, input_size: (u32, u32)) -> Result<Self> {
        let path = path.as_ref();
        let model = Model::load_file(path)
            .with_context(|| format!("failed to load classifier model {}", path.display()))?;
        Ok(Self { model, input_size })
    }
}

impl Classifier for CnnClassifier {
    fn classify(&self, region: &RgbImage) -> Result<Classification> {
        let (w, h) = self.input_size;
        let input = to_nhwc(&resize_exact(region, w, h));
        let output: NdTensor<f32, 2> = self
            .model
            .run_one(input.view().into(), None)
            .context("classifier inference failed")?
            .try_into()
            .context("unexpected classifier output")?;

        let scores = output.to_vec();
        let (class_index, confidence) =
            argmax(&scores).context("classifier returned no scores")?;
        Ok(Classification {
            class_index,
            confidence,
        })
    }
}

/// Index and value of the highest score. NaNs never win.
pub fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, s)| !s.is_nan())
        .max_by(|a, b| a.1.total_cmp(&b.1))
}
