//! Wasserstein GAN with weight clipping and an auxiliary VAE encoder, built on
//! libtorch through `tch`.
pub mod dataset;
pub mod discriminator;
pub mod encoder;
pub mod error;
pub mod eval;
pub mod generator;
pub mod model;
pub mod run_dir;
pub mod schedule;
pub mod telemetry;
pub mod train;

pub use error::{Error, Result};
