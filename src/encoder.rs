//! Image to latent-distribution encoder.
//!
//! Nothing in the training loop calls it: no KL or reconstruction term is
//! computed, so its outputs only matter to callers that build a VAE loss.
use crate::{discriminator::ConvTrunk, error::Result, model};
use tch::{nn, Tensor};

#[derive(Clone, Copy, Debug)]
pub struct EncoderConfig {
    pub size: i64,
    pub n_hidden: i64,
    pub ch: i64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            size: 64,
            n_hidden: 128,
            ch: 512,
        }
    }
}

#[derive(Debug)]
pub struct Encoder {
    trunk: ConvTrunk,
    mean: nn::Linear,
    ln_var: nn::Linear,
}

impl Encoder {
    pub fn new(p: &nn::Path, config: EncoderConfig) -> Result<Self> {
        let EncoderConfig { size, n_hidden, ch } = config;
        let trunk = ConvTrunk::new(p, size, ch, None)?;
        let final_size = size / 16;
        let features = final_size * final_size * ch;
        Ok(Self {
            trunk,
            mean: model::linear(p / "mean", features, n_hidden),
            ln_var: model::linear(p / "ln_var", features, n_hidden),
        })
    }

    /// Returns `(mean, ln_var)`, each `[batch, n_hidden]`.
    pub fn forward_t(&self, xs: &Tensor, train: bool) -> (Tensor, Tensor) {
        let (_, h) = self.trunk.forward_t(xs, train);
        let h = h.flat_view();
        (h.apply(&self.mean), h.apply(&self.ln_var))
    }
}
