//! Optional per-epoch scalar summaries.
//!
//! The backend is picked once by [`resolve`]. When it cannot be set up,
//! training carries on with [`NoopTelemetry`].
use std::{io, path::Path};
use tracing::{info, warn};

pub trait Telemetry {
    fn add_scalar(&mut self, tag: &str, value: f64, step: u64) -> io::Result<()>;

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Drops every event.
#[derive(Debug, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn add_scalar(&mut self, _tag: &str, _value: f64, _step: u64) -> io::Result<()> {
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

#[cfg(feature = "summaries")]
pub use scalar_log::ScalarLog;

#[cfg(feature = "summaries")]
mod scalar_log {
    use super::Telemetry;
    use serde::Serialize;
    use std::{
        fs::{self, File, OpenOptions},
        io::{self, Write as _},
        path::{Path, PathBuf},
        time::{SystemTime, UNIX_EPOCH},
    };

    pub const FILE_NAME: &str = "scalars.jsonl";

    #[derive(Serialize)]
    struct ScalarEvent<'a> {
        tag: &'a str,
        value: f64,
        step: u64,
        wall_time: f64,
    }

    /// Appends one JSON object per scalar to `<dir>/scalars.jsonl`.
    #[derive(Debug)]
    pub struct ScalarLog {
        path: PathBuf,
        file: File,
    }

    impl ScalarLog {
        pub fn create(dir: &Path) -> io::Result<Self> {
            fs::create_dir_all(dir)?;
            let path = dir.join(FILE_NAME);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            Ok(Self { path, file })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Telemetry for ScalarLog {
        fn add_scalar(&mut self, tag: &str, value: f64, step: u64) -> io::Result<()> {
            let wall_time = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64();
            let event = ScalarEvent {
                tag,
                value,
                step,
                wall_time,
            };
            serde_json::to_writer(&mut self.file, &event)?;
            writeln!(self.file)?;
            self.file.flush()
        }
    }
}

/// Picks the summary backend for a run writing into `summary_dir`.
#[cfg(feature = "summaries")]
pub fn resolve(summary_dir: &Path) -> Box<dyn Telemetry> {
    match ScalarLog::create(summary_dir) {
        Ok(log) => {
            info!("writing summaries to {}", log.path().display());
            Box::new(log)
        }
        Err(e) => {
            warn!("summaries disabled: {e}");
            Box::new(NoopTelemetry)
        }
    }
}

#[cfg(not(feature = "summaries"))]
pub fn resolve(_summary_dir: &Path) -> Box<dyn Telemetry> {
    info!("summary writer is not compiled in; summaries disabled");
    Box::new(NoopTelemetry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_accepts_everything() {
        let mut telemetry = NoopTelemetry;
        assert!(!telemetry.is_enabled());
        telemetry.add_scalar("gen_loss", 1.0, 0).unwrap();
    }

    #[cfg(feature = "summaries")]
    #[test]
    fn scalar_log_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let summaries = dir.path().join("summaries");
        let mut telemetry = resolve(&summaries);
        assert!(telemetry.is_enabled());
        telemetry.add_scalar("gen_loss", 0.5, 0).unwrap();
        telemetry.add_scalar("dis_loss", -0.25, 0).unwrap();
        telemetry.add_scalar("gen_loss", 0.4, 1).unwrap();

        let text = std::fs::read_to_string(summaries.join("scalars.jsonl")).unwrap();
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 3);
        let last: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(last["tag"], "gen_loss");
        assert_eq!(last["step"], 1);
        assert_eq!(last["value"], 0.4);
    }

    #[cfg(feature = "summaries")]
    #[test]
    fn unusable_directory_falls_back_to_noop() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("summaries");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let telemetry = resolve(&blocker);
        assert!(!telemetry.is_enabled());
    }
}
