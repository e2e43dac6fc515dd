use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use log::warn;

use crate::database::DEFAULT_CANCEL_RADIUS;

#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub sam_path: PathBuf,
    pub video_path: Option<PathBuf>,
    // Frame rate of image directories, video files report their own
    pub fps: f32,
    pub names: Vec<String>,
    pub worker: WorkerConfig,
    pub egui: EguiConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sam_path: "sam".into(),
            video_path: None,
            fps: 30.0,
            names: Vec::new(),
            worker: Default::default(),
            egui: Default::default(),
        }
    }
}

#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    pub poll_interval_ms: u64,
    pub cancel_radius: f32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            cancel_radius: DEFAULT_CANCEL_RADIUS,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EguiConfig {
    pub viewport: [f32; 2],
}

impl Default for EguiConfig {
    fn default() -> Self {
        Self {
            viewport: [1200.0, 800.0],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Can't read {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("Invalid {path:?}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl Config {
    /// Defaults if the file doesn't exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        read_json(path).map(Option::unwrap_or_default)
    }

    /// Labels offered for new records: `names`, else the JSON array in `names_path`,
    /// else a single generic label
    pub fn object_names(&self, names_path: &Path) -> Vec<String> {
        if !self.names.is_empty() {
            return self.names.clone();
        }
        match read_json::<Vec<String>>(names_path) {
            Ok(Some(names)) if !names.is_empty() => names,
            Ok(_) => vec!["object".into()],
            Err(e) => {
                warn!("Failed to load names: {e}");
                vec!["object".into()]
            }
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, ConfigError> {
    match std::fs::File::open(path) {
        Ok(f) => serde_json::from_reader(io::BufReader::new(f))
            .map(Some)
            .map_err(|source| ConfigError::Json {
                path: path.into(),
                source,
            }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Io {
            path: path.into(),
            source,
        }),
    }
}
