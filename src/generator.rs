use crate::{
    error::{Error, Result},
    model::{self, Sampler},
};
use std::{fmt, str::FromStr};
use tch::{nn, nn::Module as _, Kind, Tensor};

/// Bounding activation applied to the generator output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Activation {
    /// Pixels in [0, 1].
    #[default]
    Sigmoid,
    /// Pixels in [-1, 1].
    Tanh,
}

impl Activation {
    pub fn function(self) -> fn(&Tensor) -> Tensor {
        match self {
            Self::Sigmoid => Tensor::sigmoid,
            Self::Tanh => Tensor::tanh,
        }
    }

    /// Maps generator output to 8-bit pixels.
    pub fn to_pixels(self, imgs: &Tensor) -> Tensor {
        let scaled = match self {
            Self::Sigmoid => imgs * 255.,
            Self::Tanh => (imgs + 1.) * 127.5,
        };
        scaled.clamp(0., 255.).to_kind(Kind::Uint8)
    }
}

impl FromStr for Activation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sigmoid" => Ok(Self::Sigmoid),
            "tanh" => Ok(Self::Tanh),
            _ => Err(Error::InvalidActivation(s.to_string())),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sigmoid => "sigmoid",
            Self::Tanh => "tanh",
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GeneratorConfig {
    pub n_hidden: i64,
    pub size: i64,
    pub ch: i64,
    pub activation: Activation,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            n_hidden: 128,
            size: 64,
            ch: 512,
            activation: Activation::Sigmoid,
        }
    }
}

/// Decoder: latent vector to a `[3, size, size]` image.
#[derive(Debug)]
pub struct Generator {
    config: GeneratorConfig,
    initial_size: i64,
    l0: nn::Linear,
    bn0: nn::BatchNorm,
    dc1: nn::ConvTranspose2D,
    bn1: nn::BatchNorm,
    dc2: nn::ConvTranspose2D,
    bn2: nn::BatchNorm,
    dc3: nn::ConvTranspose2D,
    bn3: nn::BatchNorm,
    dc4: nn::ConvTranspose2D,
    activate: fn(&Tensor) -> Tensor,
}

impl Generator {
    pub fn new(p: &nn::Path, config: GeneratorConfig) -> Result<Self> {
        let GeneratorConfig {
            n_hidden, size, ch, ..
        } = config;
        if size % 8 != 0 {
            return Err(Error::SizeNotDivisible { size, divisor: 8 });
        }
        let initial_size = size / 8;
        let projected = initial_size * initial_size * ch;
        Ok(Self {
            config,
            initial_size,
            l0: model::linear(p / "l0", n_hidden, projected),
            bn0: nn::batch_norm1d(p / "bn0", projected, model::batch_norm_config()),
            dc1: model::tr2d(p / "dc1", ch, ch / 2, 4, 2),
            bn1: nn::batch_norm2d(p / "bn1", ch / 2, model::batch_norm_config()),
            dc2: model::tr2d(p / "dc2", ch / 2, ch / 4, 4, 2),
            bn2: nn::batch_norm2d(p / "bn2", ch / 4, model::batch_norm_config()),
            dc3: model::tr2d(p / "dc3", ch / 4, ch / 8, 4, 2),
            bn3: nn::batch_norm2d(p / "bn3", ch / 8, model::batch_norm_config()),
            dc4: model::tr2d(p / "dc4", ch / 8, 3, 3, 1),
            activate: config.activation.function(),
        })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn make_hidden(&self, batch_size: i64, device: tch::Device) -> Tensor {
        Sampler::Uniform.sample(batch_size, self.config.n_hidden, device)
    }

    pub fn make_hidden_normal(&self, batch_size: i64, device: tch::Device) -> Tensor {
        Sampler::Normal.sample(batch_size, self.config.n_hidden, device)
    }
}

impl nn::ModuleT for Generator {
    fn forward_t(&self, z: &Tensor, train: bool) -> Tensor {
        let batch_size = z.size()[0];
        let h = self
            .l0
            .forward(&z.flat_view())
            .apply_t(&self.bn0, train)
            .relu()
            .view([
                batch_size,
                self.config.ch,
                self.initial_size,
                self.initial_size,
            ]);
        let h = h.apply(&self.dc1).apply_t(&self.bn1, train).relu();
        let h = h.apply(&self.dc2).apply_t(&self.bn2, train).relu();
        let h = h.apply(&self.dc3).apply_t(&self.bn3, train).relu();
        (self.activate)(&h.apply(&self.dc4))
    }
}
