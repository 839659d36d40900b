use crate::{
    generator::{Activation, Generator, GeneratorConfig},
    model::{self, GRID_SIDE},
    train::select_device,
};
use anyhow::Context as _;
use std::{fs::create_dir_all, path::Path, path::PathBuf};
use tch::{nn, nn::ModuleT as _, Device};

/// Renders a `GRID_SIDE x GRID_SIDE` grid of fresh samples to `path`.
pub fn visualize(generator: &Generator, device: Device, path: &Path) -> crate::error::Result<()> {
    let grid = tch::no_grad(|| {
        let z = generator.make_hidden(GRID_SIDE * GRID_SIDE, device);
        let imgs = generator.forward_t(&z, false).to_device(Device::Cpu);
        let pixels = generator.config().activation.to_pixels(&imgs);
        model::image_matrix(&pixels, GRID_SIDE)
    });
    tch::vision::image::save(&grid, path)?;
    Ok(())
}

/// Settings of the `generate` subcommand.
#[derive(clap::Args, Clone, Debug)]
pub struct GenerateConfig {
    /// Generator checkpoint (`*.gen.model`)
    pub gen_path: PathBuf,
    /// Output image path
    pub output: PathBuf,
    /// GPU device ID, negative for CPU
    #[clap(long, short, default_value = "-1", allow_hyphen_values = true)]
    pub gpu: i64,
    /// Generator latent dimension
    #[clap(long, default_value = "128")]
    pub g_hidden: i64,
    /// Image side length
    #[clap(long, default_value = "64")]
    pub size: i64,
    /// Generator output activation (sigmoid or tanh)
    #[clap(long, default_value = "sigmoid")]
    pub activation: Activation,
}

pub fn generate(config: GenerateConfig) -> anyhow::Result<()> {
    let device = select_device(config.gpu);
    if let Some(parent) = config.output.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            create_dir_all(parent)?;
        }
    }

    let mut generator_vs = nn::VarStore::new(device);
    let generator = Generator::new(
        &generator_vs.root(),
        GeneratorConfig {
            n_hidden: config.g_hidden,
            size: config.size,
            activation: config.activation,
            ..Default::default()
        },
    )?;
    generator_vs
        .load(&config.gen_path)
        .with_context(|| format!("loading {}", config.gen_path.display()))?;
    generator_vs.freeze();
    visualize(&generator, device, &config.output)?;
    Ok(())
}
