use ndarray::Array2;

use crate::common::Linear;
use crate::config::{FeedForwardKind, T5Config};
use crate::model::ModelError;
use crate::weights::WeightStore;

/// Tanh approximation of GELU, as used by T5 v1.1 checkpoints.
pub fn gelu_new(x: f32) -> f32 {
    const SQRT_2_OVER_PI: f32 = 0.797_884_6;
    0.5 * x * (1.0 + libm::tanhf(SQRT_2_OVER_PI * (x + 0.044_715 * x * x * x)))
}

#[derive(Debug)]
enum Projection {
    Relu { wi: Linear },
    GatedGelu { wi_0: Linear, wi_1: Linear },
}

/// The `DenseReluDense` sub-layer: `d_model -> d_ff -> d_model`, no biases.
#[derive(Debug)]
pub struct FeedForward {
    projection: Projection,
    wo: Linear,
}

impl FeedForward {
    pub fn load(weights: &mut WeightStore, prefix: &str, config: &T5Config) -> Result<Self, ModelError> {
        let d = config.d_model;
        let d_ff = config.d_ff;
        let projection = match config.feed_forward_kind()? {
            FeedForwardKind::Relu => Projection::Relu {
                wi: Linear::new(weights.take_matrix(&format!("{}.DenseReluDense.wi.weight", prefix), d_ff, d)?),
            },
            FeedForwardKind::GatedGelu => Projection::GatedGelu {
                wi_0: Linear::new(weights.take_matrix(&format!("{}.DenseReluDense.wi_0.weight", prefix), d_ff, d)?),
                wi_1: Linear::new(weights.take_matrix(&format!("{}.DenseReluDense.wi_1.weight", prefix), d_ff, d)?),
            },
        };
        let wo = Linear::new(weights.take_matrix(&format!("{}.DenseReluDense.wo.weight", prefix), d, d_ff)?);
        Ok(Self { projection, wo })
    }

    pub fn forward(&self, hidden_states: &Array2<f32>) -> Result<Array2<f32>, ModelError> {
        let activated = match &self.projection {
            Projection::Relu { wi } => wi.forward(hidden_states)?.mapv_into(|v| v.max(0.0)),
            Projection::GatedGelu { wi_0, wi_1 } => {
                let gate = wi_0.forward(hidden_states)?.mapv_into(gelu_new);
                gate * &wi_1.forward(hidden_states)?
            }
        };
        self.wo.forward(&activated)
    }
}
