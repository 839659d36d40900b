// Wasserstein GAN with weight clipping.
// https://arxiv.org/abs/1701.07875
use crate::{
    dataset::{BatchIter, BatchSource, ImageDataset},
    discriminator::{self, Discriminator, DiscriminatorConfig},
    error::Result,
    eval,
    generator::{Activation, Generator, GeneratorConfig},
    run_dir::{self, RunDir},
    schedule::{critic_iterations, TrainState},
    telemetry,
};
use anyhow::{ensure, Context as _};
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};
use tch::{
    nn::{self, ModuleT as _, OptimizerConfig as _},
    Device, Tensor,
};
use tracing::{info, warn};

pub const LEARNING_RATE: f64 = 5e-5;
pub const GEN_WEIGHT_DECAY: f64 = 1e-5;
pub const CHECKPOINT_EVERY: u64 = 5;

pub fn should_checkpoint(epoch: u64) -> bool {
    epoch % CHECKPOINT_EVERY == 0
}

/// One side of the alternating optimization each.
pub trait Adversarial {
    /// Runs one critic update on a real batch and returns the critic loss.
    fn critic_step(&mut self, real: &Tensor) -> f64;
    /// Runs one generator update and returns the generator loss.
    fn generator_step(&mut self) -> f64;
}

#[derive(Clone, Copy, Debug)]
pub struct Schedule {
    pub d_iters: u64,
    pub initial_iter: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepReport {
    pub critic_steps: u64,
    /// Negated loss of the last critic step, i.e. `real - fake`.
    pub emd: f64,
    pub gen_loss: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EpochSummary {
    pub gen_loss: f64,
    pub emd: f64,
    pub outer_steps: usize,
    pub critic_steps: u64,
}

/// Critic phase followed by exactly one generator update.
pub fn outer_step<A, S>(
    model: &mut A,
    data: &mut S,
    state: &mut TrainState,
    schedule: Schedule,
) -> StepReport
where
    A: Adversarial + ?Sized,
    S: BatchSource + ?Sized,
{
    let d_iters = critic_iterations(state.gen_iterations, schedule.initial_iter, schedule.d_iters);
    let mut critic_loss = f64::NAN;
    for _ in 0..d_iters {
        let real = data.next_batch();
        critic_loss = model.critic_step(&real);
        state.critic_updates += 1;
    }
    let gen_loss = model.generator_step();
    state.gen_iterations += 1;
    StepReport {
        critic_steps: d_iters,
        emd: -critic_loss,
        gen_loss,
    }
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Runs outer steps until one pass worth of real batches went to the critic.
pub fn run_epoch<A, S, F>(
    model: &mut A,
    data: &mut S,
    state: &mut TrainState,
    schedule: Schedule,
    mut on_step: F,
) -> EpochSummary
where
    A: Adversarial + ?Sized,
    S: BatchSource + ?Sized,
    F: FnMut(&TrainState, &StepReport),
{
    let batches = data.batches_per_epoch() as u64;
    let mut consumed = 0;
    let mut gen_losses = Vec::new();
    let mut emds = Vec::new();
    while consumed < batches {
        let report = outer_step(model, data, state, schedule);
        consumed += report.critic_steps;
        gen_losses.push(report.gen_loss);
        emds.push(report.emd);
        on_step(state, &report);
    }
    EpochSummary {
        gen_loss: mean(&gen_losses),
        emd: mean(&emds),
        outer_steps: gen_losses.len(),
        critic_steps: consumed,
    }
}

#[derive(Clone, Copy, Debug)]
pub struct WganConfig {
    pub generator: GeneratorConfig,
    pub discriminator: DiscriminatorConfig,
    pub clip: f64,
    pub batch_size: i64,
    pub learning_rate: f64,
}

/// Generator and critic with their variable stores and RMSprop optimizers.
pub struct Wgan {
    device: Device,
    clip: f64,
    batch_size: i64,
    gen_vs: nn::VarStore,
    generator: Generator,
    opt_gen: nn::Optimizer,
    dis_vs: nn::VarStore,
    discriminator: Discriminator,
    opt_dis: nn::Optimizer,
}

impl Wgan {
    pub fn new(device: Device, config: WganConfig) -> Result<Self> {
        let gen_vs = nn::VarStore::new(device);
        let generator = Generator::new(&gen_vs.root(), config.generator)?;
        let opt_gen = rms_prop(GEN_WEIGHT_DECAY).build(&gen_vs, config.learning_rate)?;

        let dis_vs = nn::VarStore::new(device);
        let discriminator = Discriminator::new(&dis_vs.root(), config.discriminator)?;
        let opt_dis = rms_prop(0.).build(&dis_vs, config.learning_rate)?;

        Ok(Self {
            device,
            clip: config.clip,
            batch_size: config.batch_size,
            gen_vs,
            generator,
            opt_gen,
            dis_vs,
            discriminator,
            opt_dis,
        })
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    pub fn discriminator(&self) -> &Discriminator {
        &self.discriminator
    }

    pub fn gen_vs(&self) -> &nn::VarStore {
        &self.gen_vs
    }

    pub fn dis_vs(&self) -> &nn::VarStore {
        &self.dis_vs
    }

    pub fn save(&self, dis_path: &Path, gen_path: &Path) -> Result<()> {
        self.dis_vs.save(dis_path)?;
        self.gen_vs.save(gen_path)?;
        Ok(())
    }

    /// Loads `<prefix>.dis.model` and `<prefix>.gen.model`.
    pub fn load(&mut self, prefix: &Path) -> Result<()> {
        let with_suffix = |suffix: &str| {
            let mut path = OsString::from(prefix.as_os_str());
            path.push(suffix);
            PathBuf::from(path)
        };
        self.dis_vs.load(with_suffix(".dis.model"))?;
        self.gen_vs.load(with_suffix(".gen.model"))?;
        Ok(())
    }
}

fn rms_prop(wd: f64) -> nn::RmsProp {
    nn::RmsProp {
        alpha: 0.99,
        eps: 1e-8,
        wd,
        momentum: 0.,
        centered: false,
    }
}

impl Adversarial for Wgan {
    fn critic_step(&mut self, real: &Tensor) -> f64 {
        self.dis_vs.unfreeze();
        self.gen_vs.freeze();
        let z = self.generator.make_hidden(real.size()[0], self.device);
        let y_real = self.discriminator.forward_t(real, true).score;
        let x_fake = self.generator.forward_t(&z, true);
        let y_fake = self.discriminator.forward_t(&x_fake, true).score;
        let loss = -(&y_real - &y_fake);
        self.opt_dis.zero_grad();
        loss.backward();
        self.opt_dis.step();
        discriminator::clip_weights(&self.dis_vs, self.clip);
        loss.double_value(&[])
    }

    fn generator_step(&mut self) -> f64 {
        self.dis_vs.freeze();
        self.gen_vs.unfreeze();
        let z = self.generator.make_hidden(self.batch_size, self.device);
        let x_fake = self.generator.forward_t(&z, true);
        let loss = -self.discriminator.forward_t(&x_fake, true).score;
        self.opt_gen.zero_grad();
        loss.backward();
        self.opt_gen.step();
        loss.double_value(&[])
    }
}

/// Settings of the `train` subcommand.
#[derive(clap::Args, Clone, Debug)]
pub struct TrainConfig {
    /// Directory of training images
    pub dataset: PathBuf,
    /// GPU device ID, negative for CPU
    #[clap(long, short, default_value = "0", allow_hyphen_values = true)]
    pub gpu: i64,
    /// Number of epochs
    #[clap(long, short, default_value = "100")]
    pub epoch: u64,
    /// Learning minibatch size
    #[clap(long, short, default_value = "100")]
    pub batch_size: i64,
    /// Generator latent dimension
    #[clap(long, default_value = "128")]
    pub g_hidden: i64,
    /// Critic updates per generator update after warm-up
    #[clap(long, default_value = "5")]
    pub d_iters: u64,
    /// Generator updates that run with the warm-up critic count
    #[clap(long, default_value = "10")]
    pub initial_iter: u64,
    /// Critic weight clipping bound
    #[clap(long, default_value = "0.01")]
    pub d_clip: f64,
    /// Checkpoint prefix to resume from, e.g. runs/1016/models/005
    ///
    /// Only the weights are restored; epoch and update counters restart at
    /// zero. Pick a fresh --out, since a run directory that already holds
    /// checkpoints is refused.
    #[clap(long)]
    pub resume: Option<PathBuf>,
    /// Suffix appended to the run directory name
    #[clap(long)]
    pub out: Option<String>,
    /// Image side length
    #[clap(long, default_value = "64")]
    pub size: i64,
    /// Generator output activation (sigmoid or tanh)
    #[clap(long, default_value = "sigmoid")]
    pub activation: Activation,
    /// Critic channel depth
    #[clap(long, default_value = "256")]
    pub dis_ch: i64,
    /// Parent directory of all runs
    #[clap(long, default_value = "runs")]
    pub runs_root: PathBuf,
}

impl TrainConfig {
    pub fn settings(&self) -> Vec<(&'static str, String)> {
        let opt = |v: Option<String>| v.unwrap_or_default();
        vec![
            ("activation", self.activation.to_string()),
            ("batch_size", self.batch_size.to_string()),
            ("d_clip", self.d_clip.to_string()),
            ("d_iters", self.d_iters.to_string()),
            ("dataset", self.dataset.display().to_string()),
            ("dis_ch", self.dis_ch.to_string()),
            ("epoch", self.epoch.to_string()),
            ("g_hidden", self.g_hidden.to_string()),
            ("gpu", self.gpu.to_string()),
            ("initial_iter", self.initial_iter.to_string()),
            ("out", opt(self.out.clone())),
            ("resume", opt(self.resume.as_ref().map(|p| p.display().to_string()))),
            ("size", self.size.to_string()),
        ]
    }

    pub fn wgan_config(&self) -> WganConfig {
        WganConfig {
            generator: GeneratorConfig {
                n_hidden: self.g_hidden,
                size: self.size,
                activation: self.activation,
                ..Default::default()
            },
            discriminator: DiscriminatorConfig {
                size: self.size,
                ch: self.dis_ch,
            },
            clip: self.d_clip,
            batch_size: self.batch_size,
            learning_rate: LEARNING_RATE,
        }
    }
}

/// Negative ids select the host; unavailable CUDA devices fall back to it.
pub fn select_device(gpu: i64) -> Device {
    if gpu < 0 {
        return Device::Cpu;
    }
    if tch::Cuda::is_available() && gpu < tch::Cuda::device_count() {
        Device::Cuda(gpu as usize)
    } else {
        warn!("CUDA device {gpu} is not available, training on CPU");
        Device::Cpu
    }
}

pub fn train(config: TrainConfig) -> anyhow::Result<()> {
    ensure!(config.d_iters >= 1, "--d-iters must be at least 1");
    let wgan_config = config.wgan_config();

    let run = RunDir::create(
        &config.runs_root,
        &run_dir::run_name(&run_dir::today(), config.out.as_deref()),
    )
    .context("creating run directory")?;
    ensure!(
        !run.has_checkpoints().context("listing checkpoints")?,
        "{} already holds checkpoints, choose another --out",
        run.models_dir().display()
    );
    let settings = config.settings();
    for (k, v) in &settings {
        info!("{k} = {v}");
    }
    run.write_settings(&settings).context("writing setting.txt")?;
    let mut telemetry = telemetry::resolve(&run.summaries_dir());

    let device = select_device(config.gpu);
    let dataset = ImageDataset::load_dir(&config.dataset, config.size)
        .with_context(|| format!("loading images from {}", config.dataset.display()))?;
    info!("loaded dataset: {} images", dataset.len());
    let mut data = BatchIter::new(dataset, config.batch_size, device)?;

    let mut wgan = Wgan::new(device, wgan_config)?;
    if let Some(prefix) = &config.resume {
        wgan.load(prefix)
            .with_context(|| format!("resuming from {}", prefix.display()))?;
        info!("resumed from {}", prefix.display());
    }

    let schedule = Schedule {
        d_iters: config.d_iters,
        initial_iter: config.initial_iter,
    };
    let mut state = TrainState::new();
    let batches = data.batches_per_epoch() as u64;
    let pb = indicatif::ProgressBar::new(config.epoch * batches);
    pb.set_style(
        indicatif::ProgressStyle::default_bar()
            .template("{elapsed_precise} [{bar:40}] {pos}/{len} updates {msg}"),
    );
    for epoch in 0..config.epoch {
        state.epoch = epoch;
        let summary = run_epoch(&mut wgan, &mut data, &mut state, schedule, |state, report| {
            pb.set_position(state.critic_updates);
            pb.set_message(format!(
                "({:.2} samples/sec) emd : {:.5}",
                state.throughput(config.batch_size),
                report.emd
            ));
        });

        let log = format!(
            "gen loss={:.5}, dis loss={:.5}",
            summary.gen_loss, summary.emd
        );
        info!("epoch {epoch:03}: {log}");
        run.append_log(&log).context("appending to log")?;
        telemetry.add_scalar("gen_loss", summary.gen_loss, epoch)?;
        telemetry.add_scalar("dis_loss", summary.emd, epoch)?;

        if should_checkpoint(epoch) {
            let (dis_path, gen_path) = run.checkpoint_paths(epoch);
            wgan.save(&dis_path, &gen_path)
                .with_context(|| format!("saving checkpoint for epoch {epoch}"))?;
        }
        eval::visualize(wgan.generator(), device, &run.visualize_path(epoch))
            .with_context(|| format!("visualizing epoch {epoch}"))?;
    }
    pb.finish();
    info!(
        "finished {} generator updates in {:?}",
        state.gen_iterations,
        state.elapsed()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Kind;

    struct Scripted {
        critic_calls: u64,
        gen_calls: u64,
    }

    impl Adversarial for Scripted {
        fn critic_step(&mut self, _real: &Tensor) -> f64 {
            self.critic_calls += 1;
            -(self.critic_calls as f64)
        }

        fn generator_step(&mut self) -> f64 {
            self.gen_calls += 1;
            0.5 * self.gen_calls as f64
        }
    }

    struct Counting {
        per_epoch: usize,
        served: u64,
    }

    impl BatchSource for Counting {
        fn next_batch(&mut self) -> Tensor {
            self.served += 1;
            Tensor::zeros([1], (Kind::Float, Device::Cpu))
        }

        fn batches_per_epoch(&self) -> usize {
            self.per_epoch
        }
    }

    const SCHEDULE: Schedule = Schedule {
        d_iters: 5,
        initial_iter: 10,
    };

    fn fixtures(per_epoch: usize) -> (Scripted, Counting, TrainState) {
        (
            Scripted {
                critic_calls: 0,
                gen_calls: 0,
            },
            Counting {
                per_epoch,
                served: 0,
            },
            TrainState::new(),
        )
    }

    #[test]
    fn outer_step_consumes_d_iters_batches() {
        let (mut model, mut data, mut state) = fixtures(1);
        state.gen_iterations = 12;
        let report = outer_step(&mut model, &mut data, &mut state, SCHEDULE);
        assert_eq!(report.critic_steps, 5);
        assert_eq!(data.served, 5);
        assert_eq!(model.critic_calls, 5);
        assert_eq!(model.gen_calls, 1);
        assert_eq!(state.gen_iterations, 13);
        assert_eq!(state.critic_updates, 5);
    }

    #[test]
    fn emd_is_last_critic_loss_negated() {
        let (mut model, mut data, mut state) = fixtures(1);
        state.gen_iterations = 20;
        let report = outer_step(&mut model, &mut data, &mut state, SCHEDULE);
        // Losses were -1..=-5; only the last one counts.
        assert_eq!(report.emd, 5.);
        assert_eq!(report.gen_loss, 0.5);
    }

    #[test]
    fn epoch_stops_after_one_pass_of_batches() {
        let (mut model, mut data, mut state) = fixtures(12);
        state.gen_iterations = 11;
        let mut seen = 0;
        let summary = run_epoch(&mut model, &mut data, &mut state, SCHEDULE, |_, _| seen += 1);
        // 5 + 5 + 5 critic batches reach 12.
        assert_eq!(summary.outer_steps, 3);
        assert_eq!(summary.critic_steps, 15);
        assert_eq!(seen, 3);
        assert_eq!(summary.gen_loss, 1.0);
        assert_eq!(summary.emd, 10.);
    }

    #[test]
    fn warm_up_overshoots_a_short_epoch() {
        let (mut model, mut data, mut state) = fixtures(7);
        let summary = run_epoch(&mut model, &mut data, &mut state, SCHEDULE, |_, _| {});
        assert_eq!(summary.outer_steps, 1);
        assert_eq!(summary.critic_steps, 100);
        assert_eq!(data.served, 100);
    }

    #[test]
    fn checkpoints_every_fifth_epoch() {
        let saved = (0..12).filter(|&e| should_checkpoint(e)).collect::<Vec<_>>();
        assert_eq!(saved, vec![0, 5, 10]);
    }

    fn tiny_wgan() -> Wgan {
        let config = WganConfig {
            generator: GeneratorConfig {
                n_hidden: 8,
                size: 16,
                ch: 32,
                activation: Activation::Sigmoid,
            },
            discriminator: DiscriminatorConfig { size: 16, ch: 16 },
            clip: 0.01,
            batch_size: 4,
            learning_rate: LEARNING_RATE,
        };
        Wgan::new(Device::Cpu, config).unwrap()
    }

    fn snapshot(vs: &nn::VarStore) -> Vec<Tensor> {
        vs.trainable_variables().iter().map(|t| t.copy()).collect()
    }

    fn unchanged(before: &[Tensor], vs: &nn::VarStore) -> bool {
        before
            .iter()
            .zip(vs.trainable_variables())
            .all(|(a, b)| a.equal(&b))
    }

    #[test]
    fn critic_step_clips_and_leaves_generator_alone() {
        let mut wgan = tiny_wgan();
        let gen_before = snapshot(wgan.gen_vs());
        let dis_before = snapshot(wgan.dis_vs());
        let real = Tensor::rand([4, 3, 16, 16], (Kind::Float, Device::Cpu));
        let loss = wgan.critic_step(&real);
        assert!(loss.is_finite());
        assert!(unchanged(&gen_before, wgan.gen_vs()));
        assert!(!unchanged(&dis_before, wgan.dis_vs()));
        for var in wgan.dis_vs().trainable_variables() {
            assert!(var.abs().max().double_value(&[]) <= 0.01 + 1e-7);
        }
    }

    #[test]
    fn generator_step_leaves_critic_alone() {
        let mut wgan = tiny_wgan();
        let gen_before = snapshot(wgan.gen_vs());
        let dis_before = snapshot(wgan.dis_vs());
        let loss = wgan.generator_step();
        assert!(loss.is_finite());
        assert!(unchanged(&dis_before, wgan.dis_vs()));
        assert!(!unchanged(&gen_before, wgan.gen_vs()));
    }

    #[test]
    fn checkpoint_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let wgan = tiny_wgan();
        let run = RunDir::create(tmp.path(), "run").unwrap();
        let (dis_path, gen_path) = run.checkpoint_paths(0);
        wgan.save(&dis_path, &gen_path).unwrap();
        assert!(dis_path.is_file() && gen_path.is_file());

        let mut resumed = tiny_wgan();
        resumed.load(&run.models_dir().join("000")).unwrap();
        assert!(unchanged(&snapshot(wgan.gen_vs()), resumed.gen_vs()));
        assert!(unchanged(&snapshot(wgan.dis_vs()), resumed.dis_vs()));
    }

    #[test]
    fn cpu_selected_for_negative_gpu() {
        assert_eq!(select_device(-1), Device::Cpu);
    }
}
