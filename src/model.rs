//! Layer builders and tensor helpers shared by the generator, the critic and
//! the encoder.
use tch::{nn, Device, Kind, Tensor};

/// Standard deviation of the normal initializer used for every weight.
pub const WEIGHT_SCALE: f64 = 0.02;
/// Negative slope of the critic and encoder rectifiers.
pub const LEAKY_SLOPE: f64 = 0.2;
/// Standard deviation of the instance noise injected into the critic.
pub const NOISE_SIGMA: f64 = 0.2;
/// Images per side of the visualization grid.
pub const GRID_SIDE: i64 = 8;

const BN_MOMENTUM: f64 = 0.1;
const BN_EPS: f64 = 2e-5;

fn weight_init() -> nn::Init {
    nn::Init::Randn {
        mean: 0.,
        stdev: WEIGHT_SCALE,
    }
}

pub fn linear(p: nn::Path, c_in: i64, c_out: i64) -> nn::Linear {
    let cfg = nn::LinearConfig {
        ws_init: weight_init(),
        bs_init: Some(nn::Init::Const(0.)),
        bias: true,
    };
    nn::linear(p, c_in, c_out, cfg)
}

pub fn tr2d(p: nn::Path, c_in: i64, c_out: i64, ksize: i64, stride: i64) -> nn::ConvTranspose2D {
    let cfg = nn::ConvTransposeConfig {
        stride,
        padding: 1,
        ws_init: weight_init(),
        ..Default::default()
    };
    nn::conv_transpose2d(p, c_in, c_out, ksize, cfg)
}

pub fn conv2d(p: nn::Path, c_in: i64, c_out: i64, ksize: i64, stride: i64) -> nn::Conv2D {
    let cfg = nn::ConvConfig {
        stride,
        padding: 1,
        ws_init: weight_init(),
        ..Default::default()
    };
    nn::conv2d(p, c_in, c_out, ksize, cfg)
}

/// Batch normalization settings shared by every normalized layer.
pub fn batch_norm_config() -> nn::BatchNormConfig {
    nn::BatchNormConfig {
        momentum: BN_MOMENTUM,
        eps: BN_EPS,
        ..Default::default()
    }
}

/// Batch normalization with a learnable shift but no learnable scale.
pub fn batch_norm_no_gamma(p: nn::Path, out_dim: i64) -> nn::FuncT<'static> {
    let running_mean = p.zeros_no_train("running_mean", &[out_dim]);
    let running_var = p.ones_no_train("running_var", &[out_dim]);
    let bias = p.var("bias", &[out_dim], nn::Init::Const(0.));
    nn::func_t(move |xs, train| {
        Tensor::batch_norm(
            xs,
            None::<&Tensor>,
            Some(&bias),
            Some(&running_mean),
            Some(&running_var),
            train,
            BN_MOMENTUM,
            BN_EPS,
            true,
        )
    })
}

pub fn leaky_relu(xs: &Tensor) -> Tensor {
    xs.maximum(&(xs * LEAKY_SLOPE))
}

/// Adds `N(0, sigma^2)` noise in training mode, identity otherwise.
pub fn add_noise(xs: &Tensor, train: bool, sigma: f64) -> Tensor {
    if train {
        xs + xs.randn_like() * sigma
    } else {
        xs.shallow_clone()
    }
}

/// Distribution the latent vectors are drawn from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Sampler {
    /// Uniform in [-1, 1].
    #[default]
    Uniform,
    /// Standard normal.
    Normal,
}

impl Sampler {
    pub fn sample(self, batch_size: i64, n_hidden: i64, device: Device) -> Tensor {
        let size = [batch_size, n_hidden];
        match self {
            Self::Uniform => Tensor::rand(size, (Kind::Float, device)) * 2.0 - 1.0,
            Self::Normal => Tensor::randn(size, (Kind::Float, device)),
        }
    }
}

// Generate a 2D matrix of images from a tensor of `sz * sz` uint8 images.
pub fn image_matrix(imgs: &Tensor, sz: i64) -> Tensor {
    assert!(imgs.size()[0] >= sz * sz, "not enough images for a {sz}x{sz} grid");
    let mut ys = Vec::new();
    for i in 0..sz {
        ys.push(Tensor::cat(
            &(0..sz)
                .map(|j| imgs.narrow(0, sz * i + j, 1))
                .collect::<Vec<_>>(),
            2,
        ));
    }
    Tensor::cat(&ys, 3).squeeze_dim(0)
}
