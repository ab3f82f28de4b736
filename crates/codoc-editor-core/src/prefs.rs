//! Persisted UI preferences.
//!
//! The split view remembers one number: the width of the editor pane as a
//! percentage of the container. It is stored as a string under a fixed key
//! in whatever client-local store the host provides.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage key for the editor pane width.
pub const SPLIT_RATIO_KEY: &str = "codoc-split-left";

pub const SPLIT_RATIO_MIN: f64 = 20.0;
pub const SPLIT_RATIO_MAX: f64 = 80.0;
pub const SPLIT_RATIO_DEFAULT: f64 = 50.0;

#[derive(Error, Debug)]
pub enum PrefsError {
    #[error("failed to access preference file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed preference file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Editor pane width in percent, always within
/// `[SPLIT_RATIO_MIN, SPLIT_RATIO_MAX]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SplitRatio(f64);

impl SplitRatio {
    pub fn new(percent: f64) -> Self {
        if !percent.is_finite() {
            return Self::default();
        }
        Self(percent.clamp(SPLIT_RATIO_MIN, SPLIT_RATIO_MAX))
    }

    /// Ratio for a divider dragged to `pointer_x` inside a container that
    /// starts at `container_left` and is `container_width` wide.
    pub fn from_drag(pointer_x: f64, container_left: f64, container_width: f64) -> Self {
        if container_width <= 0.0 {
            return Self::default();
        }
        Self::new((pointer_x - container_left) / container_width * 100.0)
    }

    pub fn percent(&self) -> f64 {
        self.0
    }

    /// Value for the container's split CSS variable, e.g. `"42.5%"`.
    pub fn css_value(&self) -> String {
        format!("{}%", self.0)
    }

    /// Parse a stored value; anything unparseable yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim()
            .trim_end_matches('%')
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Self::new)
    }
}

impl Default for SplitRatio {
    fn default() -> Self {
        Self(SPLIT_RATIO_DEFAULT)
    }
}

/// Client-local key/value store.
pub trait PreferenceStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), PrefsError>;
}

/// Load the split ratio, falling back to the default on a missing or
/// malformed entry.
pub fn load_split_ratio<S: PreferenceStore + ?Sized>(store: &S) -> SplitRatio {
    store
        .get(SPLIT_RATIO_KEY)
        .and_then(|raw| SplitRatio::parse(&raw))
        .unwrap_or_default()
}

pub fn save_split_ratio<S: PreferenceStore + ?Sized>(
    store: &mut S,
    ratio: SplitRatio,
) -> Result<(), PrefsError> {
    store.set(SPLIT_RATIO_KEY, &ratio.percent().to_string())
}

/// In-memory store, for tests and hosts without persistence.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PrefsError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// JSON object on disk, rewritten on every `set`.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl JsonFileStore {
    /// Open a store. A missing file is an empty store; a malformed one is
    /// logged and treated as empty so the UI still comes up.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PrefsError> {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "prefs: ignoring malformed file");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(PrefsError::Io { path, source }),
        };
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PrefsError> {
        self.values.insert(key.to_string(), value.to_string());
        let raw = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(&self.path, raw).map_err(|source| PrefsError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
