//! Checkpoint policy and primary-network persistence.
//!
//! Only the primary network is ever saved; the weighting network is training-only state.

use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::backend::Backend;
use models::{build_network, Network, NetworkConfig};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointTag {
    Best,
    Regular,
}

impl CheckpointTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointTag::Best => "best",
            CheckpointTag::Regular => "regular",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CheckpointPolicy {
    /// Epochs strictly after this are eligible for "best" saves.
    pub best_after: usize,
    pub save_every: usize,
}

impl CheckpointPolicy {
    /// A new best (strict improvement past `best_after`) pre-empts the regular save.
    pub fn decide(&self, epoch: usize, accuracy: f64, best_accuracy: f64) -> Option<CheckpointTag> {
        if epoch > self.best_after && accuracy > best_accuracy {
            return Some(CheckpointTag::Best);
        }
        if self.save_every > 0 && epoch % self.save_every == 0 {
            return Some(CheckpointTag::Regular);
        }
        None
    }
}

/// `<net>-<epoch>-<tag>`; the recorder appends its own extension.
pub fn checkpoint_stem(net_name: &str, epoch: usize, tag: CheckpointTag) -> String {
    format!("{net_name}-{epoch}-{}", tag.as_str())
}

pub trait CheckpointSink<B: Backend> {
    fn save(
        &mut self,
        network: &Network<B>,
        net_name: &str,
        epoch: usize,
        tag: CheckpointTag,
    ) -> anyhow::Result<PathBuf>;
}

/// Writes Burn binary records into one run directory.
pub struct FileCheckpointer {
    dir: PathBuf,
    recorder: BinFileRecorder<FullPrecisionSettings>,
}

impl FileCheckpointer {
    pub fn create(dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            recorder: BinFileRecorder::<FullPrecisionSettings>::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl<B: Backend> CheckpointSink<B> for FileCheckpointer {
    fn save(
        &mut self,
        network: &Network<B>,
        net_name: &str,
        epoch: usize,
        tag: CheckpointTag,
    ) -> anyhow::Result<PathBuf> {
        let path = self.dir.join(checkpoint_stem(net_name, epoch, tag));
        network
            .clone()
            .save_file(&path, &self.recorder)
            .map_err(|e| anyhow::anyhow!("failed to save checkpoint {}: {e}", path.display()))?;
        Ok(path.with_extension("bin"))
    }
}

/// Records which checkpoints would have been written.
#[derive(Debug, Default)]
pub struct MemoryCheckpointer {
    pub saved: Vec<(usize, CheckpointTag, PathBuf)>,
}

impl<B: Backend> CheckpointSink<B> for MemoryCheckpointer {
    fn save(
        &mut self,
        _network: &Network<B>,
        net_name: &str,
        epoch: usize,
        tag: CheckpointTag,
    ) -> anyhow::Result<PathBuf> {
        let path = PathBuf::from(checkpoint_stem(net_name, epoch, tag)).with_extension("bin");
        self.saved.push((epoch, tag, path.clone()));
        Ok(path)
    }
}

/// Apply the policy for one evaluated epoch, saving and updating `best_accuracy` as needed.
pub fn apply_checkpoint_policy<B: Backend>(
    policy: &CheckpointPolicy,
    best_accuracy: &mut f64,
    epoch: usize,
    accuracy: f64,
    network: &Network<B>,
    net_name: &str,
    sink: &mut dyn CheckpointSink<B>,
) -> anyhow::Result<Option<(CheckpointTag, PathBuf)>> {
    let Some(tag) = policy.decide(epoch, accuracy, *best_accuracy) else {
        return Ok(None);
    };
    let path = sink.save(network, net_name, epoch, tag)?;
    if tag == CheckpointTag::Best {
        *best_accuracy = accuracy;
    }
    log::info!(
        "saved {} checkpoint for epoch {epoch} to {}",
        tag.as_str(),
        path.display()
    );
    Ok(Some((tag, path)))
}

/// Load a primary network saved by [`FileCheckpointer`].
pub fn load_network_from_checkpoint<B: Backend, P: AsRef<Path>>(
    path: P,
    cfg: &NetworkConfig,
    device: &B::Device,
) -> Result<Network<B>, RecorderError> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    build_network::<B>(cfg, device).load_file(path.as_ref().to_path_buf(), &recorder, device)
}
