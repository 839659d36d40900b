use std::{
    fs::{create_dir_all, read_dir, File, OpenOptions},
    io::{self, Write as _},
    path::{Path, PathBuf},
};

/// Directory name for a run started on `date`, e.g. `1016` or `1016_celeba`.
pub fn run_name(date: &str, suffix: Option<&str>) -> String {
    match suffix {
        Some(suffix) if !suffix.is_empty() => format!("{date}_{suffix}"),
        _ => date.to_string(),
    }
}

/// Today's date in the `MMDD` form used for run directories.
pub fn today() -> String {
    chrono::Local::now().format("%m%d").to_string()
}

/// Layout of one training run:
///
/// ```text
/// <root>/setting.txt
/// <root>/log
/// <root>/models/<epoch>.{dis,gen}.model
/// <root>/visualize/generate_<epoch>.png
/// <root>/summaries/
/// ```
#[derive(Clone, Debug)]
pub struct RunDir {
    root: PathBuf,
}

impl RunDir {
    pub fn create(runs_root: impl AsRef<Path>, name: &str) -> io::Result<Self> {
        let run = Self {
            root: runs_root.as_ref().join(name),
        };
        create_dir_all(run.models_dir())?;
        create_dir_all(run.visualize_dir())?;
        Ok(run)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    pub fn visualize_dir(&self) -> PathBuf {
        self.root.join("visualize")
    }

    pub fn summaries_dir(&self) -> PathBuf {
        self.root.join("summaries")
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join("log")
    }

    /// `(critic, generator)` checkpoint paths for `epoch`.
    pub fn checkpoint_paths(&self, epoch: u64) -> (PathBuf, PathBuf) {
        let models = self.models_dir();
        (
            models.join(format!("{epoch:03}.dis.model")),
            models.join(format!("{epoch:03}.gen.model")),
        )
    }

    /// Whether `models/` already holds a checkpoint file.
    pub fn has_checkpoints(&self) -> io::Result<bool> {
        for entry in read_dir(self.models_dir())? {
            if entry?.path().extension().map_or(false, |ext| ext == "model") {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn visualize_path(&self, epoch: u64) -> PathBuf {
        self.visualize_dir().join(format!("generate_{epoch:03}.png"))
    }

    /// Writes `key = value` lines to `setting.txt`, replacing any old dump.
    pub fn write_settings<K, V>(&self, settings: &[(K, V)]) -> io::Result<()>
    where
        K: std::fmt::Display,
        V: std::fmt::Display,
    {
        let mut f = File::create(self.root.join("setting.txt"))?;
        for (k, v) in settings {
            writeln!(f, "{k} = {v}")?;
        }
        Ok(())
    }

    pub fn append_log(&self, line: &str) -> io::Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())?;
        writeln!(f, "{line}")
    }
}
