use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

// ── Settings ──

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub corpus: CorpusSettings,
    pub search: SearchSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    pub db_path: PathBuf,
    pub index_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorpusSettings {
    pub metadata: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchSettings {
    pub max_results: usize,
    pub writer_memory: usize,
}

impl Settings {
    /// Defaults, then the optional config file, then `KS__*` env variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name("kant-search").required(false),
        };
        let settings = Config::builder()
            .set_default("server.bind", "127.0.0.1:3000")?
            .set_default("storage.db_path", "data/kant-search.sqlite")?
            .set_default("storage.index_dir", "data/index")?
            .set_default("corpus.metadata", "config/volume-metadata.json")?
            .set_default("search.max_results", 10_000)?
            .set_default("search.writer_memory", 50_000_000)?
            .add_source(file)
            .add_source(Environment::with_prefix("KS").separator("__"))
            .build()?;
        settings
            .try_deserialize()
            .context("invalid configuration")
    }
}

// ── Corpus metadata ──

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkMetadata {
    pub code: String,
    pub siglum: Option<String>,
    pub year: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMetadata {
    pub volume_number: i32,
    pub title: String,
    pub works: Vec<WorkMetadata>,
}

/// Static volume and work metadata, keyed by volume number and work ordinal.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    volumes: Vec<VolumeMetadata>,
}

impl Corpus {
    pub fn from_json(json: &str) -> Result<Self> {
        let volumes: Vec<VolumeMetadata> = serde_json::from_str(json)?;
        Self::new(volumes)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading corpus metadata {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn new(volumes: Vec<VolumeMetadata>) -> Result<Self> {
        let mut numbers = HashSet::new();
        let mut codes = HashSet::new();
        for v in &volumes {
            if !(1..=23).contains(&v.volume_number) {
                bail!("volume number {} outside 1..=23", v.volume_number);
            }
            if !numbers.insert(v.volume_number) {
                bail!("volume {} configured twice", v.volume_number);
            }
            for w in &v.works {
                if !codes.insert(w.code.as_str()) {
                    bail!("work code {} configured twice", w.code);
                }
            }
        }
        Ok(Self { volumes })
    }

    pub fn volumes(&self) -> &[VolumeMetadata] {
        &self.volumes
    }

    pub fn volume(&self, number: i32) -> Option<&VolumeMetadata> {
        self.volumes.iter().find(|v| v.volume_number == number)
    }

    /// Volume and 1-based ordinal of a work code.
    pub fn locate_work(&self, code: &str) -> Option<(&VolumeMetadata, usize)> {
        self.volumes.iter().find_map(|v| {
            v.works
                .iter()
                .position(|w| w.code == code)
                .map(|i| (v, i + 1))
        })
    }
}
