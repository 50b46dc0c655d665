use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::downloader::DEFAULT_MAX_REDIRECTS;
use crate::core::maven::{
    FML_FORGE_LIBRARIES, FML_MIRROR_LIBRARIES, MOJANG_LIBRARIES, MOJANG_RESOURCES,
};

const APP_DIR_NAME: &str = "InterfaceOficial";
const BOOTSTRAP_FILE: &str = "launcher_bootstrap.json";
const SETTINGS_FILE: &str = "fetch_settings.json";

pub const APP_USER_AGENT: &str = "InterfaceOficial/0.1.0";

/// Tunables of the fetch core, persisted next to the data it manages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Downloads a job keeps in flight at once.
    pub concurrency: usize,
    /// Redirects one download may follow before it gives up.
    pub max_redirects: u32,
    pub user_agent: String,
    /// Repository used by libraries that do not name their own.
    pub library_base_url: String,
    /// Root of the asset object store.
    pub resources_base_url: String,
    pub fml_mirror_base_url: String,
    pub fml_forge_base_url: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            concurrency: 8,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            user_agent: APP_USER_AGENT.to_string(),
            library_base_url: MOJANG_LIBRARIES.to_string(),
            resources_base_url: MOJANG_RESOURCES.to_string(),
            fml_mirror_base_url: FML_MIRROR_LIBRARIES.to_string(),
            fml_forge_base_url: FML_FORGE_LIBRARIES.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BootstrapConfig {
    data_dir: PathBuf,
}

impl FetchSettings {
    /// Read `fetch_settings.json` from `data_dir`. Missing or unreadable
    /// settings fall back to the defaults.
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join(SETTINGS_FILE);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str::<Self>(&raw) {
            Ok(settings) => settings.sanitized(),
            Err(e) => {
                warn!("Ignoring corrupt settings at {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    fn sanitized(mut self) -> Self {
        self.concurrency = self.concurrency.max(1);
        for base in [
            &mut self.library_base_url,
            &mut self.resources_base_url,
            &mut self.fml_mirror_base_url,
            &mut self.fml_forge_base_url,
        ] {
            if !base.ends_with('/') {
                base.push('/');
            }
        }
        self
    }
}

fn default_base_dir() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Data directory of the launcher. A bootstrap file in the platform data
/// dir may point somewhere else.
pub fn default_data_dir() -> PathBuf {
    let base = default_base_dir();
    let bootstrap_path = base.join(BOOTSTRAP_FILE);

    if let Ok(raw) = std::fs::read_to_string(&bootstrap_path) {
        if let Ok(cfg) = serde_json::from_str::<BootstrapConfig>(&raw) {
            return cfg.data_dir;
        }
    }

    base.join(APP_DIR_NAME)
}
