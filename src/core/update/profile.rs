use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::assets::AssetIndexRef;
use crate::core::error::{FetchError, FetchResult};
use crate::core::library::Library;

/// The parts of a resolved version profile the updater works from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameProfile {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_jar_url: Option<String>,
    #[serde(default)]
    pub libraries: Vec<Library>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_index: Option<AssetIndexRef>,
    /// Extra jars legacy FML expects in the instance's `lib` folder.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fml_libraries: Vec<FmlLibrary>,
}

/// A legacy FML library, fetched by file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FmlLibrary {
    pub filename: String,
    /// Served by the mirror rather than by Forge.
    #[serde(default, alias = "ours")]
    pub mirrored: bool,
}

impl GameProfile {
    pub fn from_file(path: &Path) -> FetchResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| FetchError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}
