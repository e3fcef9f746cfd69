// src/telemetry.rs
//
// CSV run telemetry. Four sinks, one per artifact the training loop
// emits: per-step rewards, semantic scores, per-client divergence and
// critic losses. Files are created lazily inside the run's output
// directory; a sink that cannot be opened or written disables itself
// rather than failing the run.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

/// One environment step of one client episode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StepRecord {
    pub round: usize,
    pub client: usize,
    pub step: usize,
    pub reward: f64,
    pub delay: f64,
    pub energy: f64,
    pub migration: bool,
}

/// Semantic fidelity observed at one step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SemanticRecord {
    pub round: usize,
    pub client: usize,
    pub step: usize,
    pub semantic_score: f64,
    pub energy: f64,
}

/// Actor divergence of one client against the global model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DivergenceRecord {
    pub round: usize,
    pub client: usize,
    pub divergence: f64,
}

/// Critic loss from one training step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LossRecord {
    pub round: usize,
    pub client: usize,
    pub step: usize,
    pub loss: f64,
}

#[derive(Debug)]
pub struct RunTelemetry {
    enabled: bool,
    dir: Option<PathBuf>,
    training: Option<BufWriter<File>>,
    semantic: Option<BufWriter<File>>,
    divergence: Option<BufWriter<File>>,
    loss: Option<BufWriter<File>>,
}

impl RunTelemetry {
    /// A sink that swallows every record. Used by sweeps and tests that
    /// only care about the run summary.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            dir: None,
            training: None,
            semantic: None,
            divergence: None,
            loss: None,
        }
    }

    /// Log under `dir`, creating it on first write.
    pub fn to_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            dir: Some(dir.into()),
            training: None,
            semantic: None,
            divergence: None,
            loss: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn log_step(&mut self, r: &StepRecord) {
        let line = format!(
            "{},{},{},{},{},{},{}",
            r.round,
            r.client,
            r.step,
            r.reward,
            r.delay,
            r.energy,
            r.migration as u8
        );
        self.write_line(Sink::Training, &line);
    }

    pub fn log_semantic(&mut self, r: &SemanticRecord) {
        let line = format!(
            "{},{},{},{},{}",
            r.round, r.client, r.step, r.semantic_score, r.energy
        );
        self.write_line(Sink::Semantic, &line);
    }

    pub fn log_divergence(&mut self, r: &DivergenceRecord) {
        let line = format!("{},{},{}", r.round, r.client, r.divergence);
        self.write_line(Sink::Divergence, &line);
    }

    pub fn log_loss(&mut self, r: &LossRecord) {
        let line = format!("{},{},{},{}", r.round, r.client, r.step, r.loss);
        self.write_line(Sink::Loss, &line);
    }

    pub fn flush(&mut self) {
        for writer in [
            &mut self.training,
            &mut self.semantic,
            &mut self.divergence,
            &mut self.loss,
        ]
        .into_iter()
        .flatten()
        {
            let _ = writer.flush();
        }
    }

    fn write_line(&mut self, sink: Sink, line: &str) {
        let Some(writer) = self.writer_for(sink) else {
            return;
        };
        if writeln!(writer, "{line}").is_err() {
            self.enabled = false;
        }
    }

    fn writer_for(&mut self, sink: Sink) -> Option<&mut BufWriter<File>> {
        if !self.enabled {
            return None;
        }
        let dir = self.dir.as_ref()?;
        let slot = match sink {
            Sink::Training => &mut self.training,
            Sink::Semantic => &mut self.semantic,
            Sink::Divergence => &mut self.divergence,
            Sink::Loss => &mut self.loss,
        };
        if slot.is_none() {
            *slot = open_sink(dir, sink.file_name(), sink.header());
            if slot.is_none() {
                self.enabled = false;
                return None;
            }
        }
        slot.as_mut()
    }
}

impl Drop for RunTelemetry {
    fn drop(&mut self) {
        self.flush();
    }
}

#[derive(Clone, Copy)]
enum Sink {
    Training,
    Semantic,
    Divergence,
    Loss,
}

impl Sink {
    fn file_name(&self) -> &'static str {
        match self {
            Sink::Training => "training_log.csv",
            Sink::Semantic => "semantic_log.csv",
            Sink::Divergence => "fl_divergence.csv",
            Sink::Loss => "loss_log.csv",
        }
    }

    fn header(&self) -> &'static str {
        match self {
            Sink::Training => "round,client,step,reward,delay,energy,migration",
            Sink::Semantic => "round,client,step,semantic_score,energy",
            Sink::Divergence => "round,client,divergence",
            Sink::Loss => "round,client,step,loss",
        }
    }
}

fn open_sink(dir: &Path, name: &str, header: &str) -> Option<BufWriter<File>> {
    fs::create_dir_all(dir).ok()?;
    let file = File::create(dir.join(name)).ok()?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{header}").ok()?;
    Some(writer)
}

/// Write a file through a temporary sibling plus rename, so readers never
/// observe a half-written artifact.
pub fn atomic_write(path: &Path, contents: &str) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut f = File::create(&tmp)?;
        f.write_all(contents.as_bytes())?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_sink_creates_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = RunTelemetry::disabled();
        t.log_step(&StepRecord {
            round: 1,
            client: 0,
            step: 0,
            reward: -0.5,
            delay: 0.1,
            energy: 0.2,
            migration: false,
        });
        t.flush();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn rows_land_under_their_headers() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = RunTelemetry::to_dir(dir.path());

        t.log_step(&StepRecord {
            round: 1,
            client: 3,
            step: 0,
            reward: -0.35,
            delay: 0.13,
            energy: 0.07,
            migration: true,
        });
        t.log_divergence(&DivergenceRecord {
            round: 1,
            client: 3,
            divergence: 0.002,
        });
        t.flush();

        let training = fs::read_to_string(dir.path().join("training_log.csv")).unwrap();
        assert_eq!(
            training,
            "round,client,step,reward,delay,energy,migration\n1,3,0,-0.35,0.13,0.07,1\n"
        );

        let divergence = fs::read_to_string(dir.path().join("fl_divergence.csv")).unwrap();
        assert_eq!(divergence, "round,client,divergence\n1,3,0.002\n");
    }

    #[test]
    fn only_touched_sinks_materialize() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = RunTelemetry::to_dir(dir.path());
        t.log_loss(&LossRecord {
            round: 1,
            client: 0,
            step: 65,
            loss: 0.9,
        });
        t.flush();

        assert!(dir.path().join("loss_log.csv").exists());
        assert!(!dir.path().join("training_log.csv").exists());
        assert!(!dir.path().join("semantic_log.csv").exists());
    }

    #[test]
    fn atomic_write_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        atomic_write(&path, "{\"a\":1}").unwrap();
        atomic_write(&path, "{\"a\":2}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":2}");
        assert!(!path.with_extension("tmp").exists());
    }
}
