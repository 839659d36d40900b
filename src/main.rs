use clap::Parser;
use tracing_subscriber::EnvFilter;
use vae_wgan::{eval, train};

#[derive(Parser)]
#[clap(
    name = "vae-wgan",
    version = env!("CARGO_PKG_VERSION"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
struct Entry {
    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[derive(clap::Subcommand)]
enum Subcommand {
    /// Start training process
    Train(train::TrainConfig),
    /// Sample an image grid from a generator checkpoint
    Generate(eval::GenerateConfig),
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let args = Entry::parse();
    match args.subcommand {
        Subcommand::Train(config) => train::train(config),
        Subcommand::Generate(config) => eval::generate(config),
    }
}
