use crate::config::LabelsConfig;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fs::File,
    io::{self, BufRead},
    path::Path,
};
use thiserror::Error;

/// UCF11 action classes, in the sorted order the model was trained with.
pub const UCF11_CLASSES: [&str; 11] = [
    "basketball",
    "biking",
    "diving",
    "golf_swing",
    "horse_riding",
    "soccer_juggling",
    "swing",
    "tennis_swing",
    "trampoline_jumping",
    "volleyball_spiking",
    "walking",
];

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to read labels: {0}")]
    Io(#[from] io::Error),
    #[error("Label list is empty")]
    Empty,
    #[error("Duplicate label `{0}`")]
    Duplicate(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassEntry {
    pub class_index: usize,
    pub label: String,
}

/// Immutable mapping from model output index to action label.
#[derive(Debug, Clone)]
pub struct ClassRegistry {
    labels: Vec<String>,
}

impl ClassRegistry {
    pub fn new(labels: Vec<String>) -> Result<Self, RegistryError> {
        if labels.is_empty() {
            return Err(RegistryError::Empty);
        }
        let mut seen = HashSet::new();
        for label in &labels {
            if !seen.insert(label.as_str()) {
                return Err(RegistryError::Duplicate(label.clone()));
            }
        }
        Ok(Self { labels })
    }

    pub fn ucf11() -> Self {
        Self {
            labels: UCF11_CLASSES.iter().map(|label| label.to_string()).collect(),
        }
    }

    /// Uses the labels file when one is configured, the UCF11 classes otherwise.
    pub fn from_config(labels_cfg: Option<&LabelsConfig>) -> Result<Self, RegistryError> {
        match labels_cfg {
            Some(cfg) => Self::load(&cfg.get_path()),
            None => Ok(Self::ucf11()),
        }
    }

    /// Reads one label per line; blank lines and `#` comments are skipped.
    pub fn load(filepath: &Path) -> Result<Self, RegistryError> {
        let file = File::open(filepath)?;
        let reader = io::BufReader::new(file);
        let mut labels = Vec::new();

        for line_result in reader.lines() {
            let line = line_result?;
            let label = line.trim();
            if label.is_empty() || label.starts_with('#') {
                continue;
            }
            labels.push(label.to_string());
        }

        Self::new(labels)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label(&self, class_index: usize) -> Option<&str> {
        self.labels.get(class_index).map(String::as_str)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn entries(&self) -> Vec<ClassEntry> {
        self.labels
            .iter()
            .enumerate()
            .map(|(class_index, label)| ClassEntry {
                class_index,
                label: label.clone(),
            })
            .collect()
    }
}
