use crate::{
    error::{Error, Result},
    model::{self, NOISE_SIGMA},
};
use tch::{nn, Tensor};

/// Five convolution stages shared in layout by the critic and the encoder.
///
/// Spatial size shrinks by 16 overall; channel depth grows from `ch / 8` to
/// `ch`. When `noise` is set, Gaussian noise is added to the input and to
/// every stage pre-activation in training mode.
#[derive(Debug)]
pub(crate) struct ConvTrunk {
    c0_0: nn::Conv2D,
    c0_1: nn::Conv2D,
    c1_1: nn::Conv2D,
    c2_1: nn::Conv2D,
    c3_0: nn::Conv2D,
    bn0_1: nn::FuncT<'static>,
    bn1_1: nn::FuncT<'static>,
    bn2_1: nn::FuncT<'static>,
    bn3_0: nn::FuncT<'static>,
    noise: Option<f64>,
}

impl ConvTrunk {
    pub(crate) fn new(p: &nn::Path, size: i64, ch: i64, noise: Option<f64>) -> Result<Self> {
        if size % 16 != 0 {
            return Err(Error::SizeNotDivisible { size, divisor: 16 });
        }
        Ok(Self {
            c0_0: model::conv2d(p / "c0_0", 3, ch / 8, 3, 1),
            c0_1: model::conv2d(p / "c0_1", ch / 8, ch / 4, 4, 2),
            c1_1: model::conv2d(p / "c1_1", ch / 4, ch / 2, 4, 2),
            c2_1: model::conv2d(p / "c2_1", ch / 2, ch, 4, 2),
            c3_0: model::conv2d(p / "c3_0", ch, ch, 4, 2),
            bn0_1: model::batch_norm_no_gamma(p / "bn0_1", ch / 4),
            bn1_1: model::batch_norm_no_gamma(p / "bn1_1", ch / 2),
            bn2_1: model::batch_norm_no_gamma(p / "bn2_1", ch),
            bn3_0: model::batch_norm_no_gamma(p / "bn3_0", ch),
            noise,
        })
    }

    fn noisy(&self, xs: &Tensor, train: bool) -> Tensor {
        match self.noise {
            Some(sigma) => model::add_noise(xs, train, sigma),
            None => xs.shallow_clone(),
        }
    }

    /// Returns the outputs of the last two stages.
    pub(crate) fn forward_t(&self, xs: &Tensor, train: bool) -> (Tensor, Tensor) {
        let h = self.noisy(xs, train);
        let h = model::leaky_relu(&self.noisy(&h.apply(&self.c0_0), train));
        let h = self.stage(&h, &self.c0_1, &self.bn0_1, train);
        let h = self.stage(&h, &self.c1_1, &self.bn1_1, train);
        let h2 = self.stage(&h, &self.c2_1, &self.bn2_1, train);
        let h3 = self.stage(&h2, &self.c3_0, &self.bn3_0, train);
        (h2, h3)
    }

    fn stage(&self, xs: &Tensor, conv: &nn::Conv2D, bn: &nn::FuncT, train: bool) -> Tensor {
        let h = xs.apply(conv).apply_t(bn, train);
        model::leaky_relu(&self.noisy(&h, train))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DiscriminatorConfig {
    pub size: i64,
    pub ch: i64,
}

impl Default for DiscriminatorConfig {
    fn default() -> Self {
        Self { size: 64, ch: 512 }
    }
}

/// Critic scores plus the feature maps of the last two convolution stages.
#[derive(Debug)]
pub struct CriticOutput {
    pub score: Tensor,
    pub h2: Tensor,
    pub h3: Tensor,
}

/// Wasserstein critic. The score is unbounded.
#[derive(Debug)]
pub struct Discriminator {
    trunk: ConvTrunk,
    l4: nn::Linear,
}

impl Discriminator {
    pub fn new(p: &nn::Path, config: DiscriminatorConfig) -> Result<Self> {
        let DiscriminatorConfig { size, ch } = config;
        let trunk = ConvTrunk::new(p, size, ch, Some(NOISE_SIGMA))?;
        let final_size = size / 16;
        let l4 = model::linear(p / "l4", final_size * final_size * ch, 1);
        Ok(Self { trunk, l4 })
    }

    pub fn forward_t(&self, xs: &Tensor, train: bool) -> CriticOutput {
        let (h2, h3) = self.trunk.forward_t(xs, train);
        let h = h3.flat_view().apply(&self.l4);
        // Normalized by the element count of the per-sample scores.
        let score = h.sum(h.kind()) / h.numel() as f64;
        CriticOutput { score, h2, h3 }
    }
}

impl nn::ModuleT for Discriminator {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        Discriminator::forward_t(self, xs, train).score
    }
}

/// Clamps every trainable variable of `vs` into `[-clip, clip]`.
pub fn clip_weights(vs: &nn::VarStore, clip: f64) {
    tch::no_grad(|| {
        for mut var in vs.trainable_variables() {
            let _ = var.clamp_(-clip, clip);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    fn small(vs: &nn::VarStore, size: i64) -> Result<Discriminator> {
        Discriminator::new(&vs.root(), DiscriminatorConfig { size, ch: 32 })
    }

    #[test]
    fn size_must_divide_by_sixteen() {
        let vs = nn::VarStore::new(Device::Cpu);
        for size in [16, 32, 48] {
            assert!(small(&vs, size).is_ok(), "size {size}");
        }
        for size in [8, 24, 40] {
            assert!(matches!(
                small(&vs, size),
                Err(Error::SizeNotDivisible { divisor: 16, .. })
            ));
        }
    }

    #[test]
    fn score_and_feature_shapes() {
        let vs = nn::VarStore::new(Device::Cpu);
        let critic = small(&vs, 32).unwrap();
        let xs = Tensor::rand([4, 3, 32, 32], (Kind::Float, Device::Cpu));
        let out = critic.forward_t(&xs, true);
        assert_eq!(out.score.size(), Vec::<i64>::new());
        assert_eq!(out.h2.size(), vec![4, 32, 4, 4]);
        assert_eq!(out.h3.size(), vec![4, 32, 2, 2]);
    }

    #[test]
    fn score_is_sum_over_element_count() {
        let vs = nn::VarStore::new(Device::Cpu);
        let critic = small(&vs, 16).unwrap();
        let xs = Tensor::rand([6, 3, 16, 16], (Kind::Float, Device::Cpu));
        let (_, h3) = critic.trunk.forward_t(&xs, false);
        let per_sample = h3.flat_view().apply(&critic.l4);
        let expected = per_sample.sum(Kind::Float).double_value(&[]) / 6.;
        let score = critic.forward_t(&xs, false).score.double_value(&[]);
        assert!((score - expected).abs() < 1e-6);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let vs = nn::VarStore::new(Device::Cpu);
        let critic = small(&vs, 16).unwrap();
        let xs = Tensor::rand([2, 3, 16, 16], (Kind::Float, Device::Cpu));
        let a = critic.forward_t(&xs, false).score.double_value(&[]);
        let b = critic.forward_t(&xs, false).score.double_value(&[]);
        assert_eq!(a, b);
    }

    #[test]
    fn training_mode_injects_noise() {
        let vs = nn::VarStore::new(Device::Cpu);
        let critic = small(&vs, 16).unwrap();
        let xs = Tensor::rand([2, 3, 16, 16], (Kind::Float, Device::Cpu));
        let a = critic.forward_t(&xs, true);
        let b = critic.forward_t(&xs, true);
        assert!(!a.h3.equal(&b.h3));
        assert!(!a.h2.equal(&b.h2));
    }

    #[test]
    fn clipping_bounds_every_parameter() {
        let vs = nn::VarStore::new(Device::Cpu);
        let _critic = small(&vs, 16).unwrap();
        tch::no_grad(|| {
            for mut var in vs.trainable_variables() {
                let _ = var.uniform_(-5., 5.);
            }
        });
        for clip in [0.01, 0.5] {
            clip_weights(&vs, clip);
            for var in vs.trainable_variables() {
                assert!(var.abs().max().double_value(&[]) <= clip + 1e-7);
            }
        }
    }

    #[test]
    fn clipping_skips_running_statistics() {
        let vs = nn::VarStore::new(Device::Cpu);
        let _critic = small(&vs, 16).unwrap();
        clip_weights(&vs, 0.01);
        let variables = vs.variables();
        assert_eq!(variables["bn0_1.running_var"].min().double_value(&[]), 1.);
    }
}
