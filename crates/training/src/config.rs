//! Run schedule and optimizer hyperparameters, loaded from an optional JSON file.

use burn_dataset::Normalization;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid settings: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Epoch budget `E`; training runs epochs `1..E`.
    pub epochs: usize,
    /// Learning-rate decay milestones; the second one also opens best-model saving.
    pub milestones: Vec<usize>,
    /// Multiplicative decay applied at each milestone.
    pub gamma: f64,
    /// Regular checkpoint cadence in epochs.
    pub save_every: usize,
    pub checkpoint_root: PathBuf,
    pub log_root: PathBuf,
    pub normalization: Normalization,
    pub momentum: f64,
    pub weight_decay: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            epochs: 200,
            milestones: vec![60, 120, 160],
            gamma: 0.2,
            save_every: 20,
            checkpoint_root: PathBuf::from("checkpoint"),
            log_root: PathBuf::from("runs"),
            normalization: Normalization::CIFAR100,
            momentum: 0.9,
            weight_decay: 5e-4,
        }
    }
}

impl Settings {
    /// Read settings from JSON; missing fields keep their defaults.
    pub fn from_path(path: &Path) -> Result<Self, SettingsError> {
        let bytes = fs::read(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.epochs < 2 {
            return Err(SettingsError::Invalid(format!(
                "epochs must be at least 2 (got {}); training runs epochs 1..epochs",
                self.epochs
            )));
        }
        if self.milestones.len() < 2 {
            return Err(SettingsError::Invalid(
                "at least two milestones are required".to_string(),
            ));
        }
        if self.milestones.windows(2).any(|w| w[0] >= w[1]) {
            return Err(SettingsError::Invalid(format!(
                "milestones must be strictly increasing: {:?}",
                self.milestones
            )));
        }
        if self.save_every == 0 {
            return Err(SettingsError::Invalid(
                "save_every must be positive".to_string(),
            ));
        }
        if self.normalization.std.iter().any(|s| *s <= 0.0) {
            return Err(SettingsError::Invalid(
                "normalization std must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Epochs strictly after this one are eligible for "best" checkpoints.
    pub fn best_after(&self) -> usize {
        self.milestones.get(1).copied().unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Settings::default().validate().unwrap();
        assert_eq!(Settings::default().best_after(), 120);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "epochs": 10, "milestones": [3, 6] }"#).unwrap();
        let settings = Settings::from_path(&path).unwrap();
        assert_eq!(settings.epochs, 10);
        assert_eq!(settings.milestones, vec![3, 6]);
        assert_eq!(settings.save_every, 20);
        assert_eq!(settings.normalization, Normalization::CIFAR100);
    }

    #[test]
    fn rejects_degenerate_schedules() {
        let bad = [
            Settings {
                epochs: 1,
                ..Default::default()
            },
            Settings {
                milestones: vec![60],
                ..Default::default()
            },
            Settings {
                milestones: vec![60, 60],
                ..Default::default()
            },
            Settings {
                save_every: 0,
                ..Default::default()
            },
        ];
        for settings in bad {
            assert!(matches!(
                settings.validate(),
                Err(SettingsError::Invalid(_))
            ));
        }
    }
}
