use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::cache::ASSET_OBJECTS_BASE;
use crate::core::downloader::Download;
use crate::core::error::{FetchError, FetchResult};
use crate::core::state::NetContext;

/// Reference to an asset index as found in a version profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetIndexRef {
    pub id: String,
    pub url: String,
}

/// Top-level asset index JSON structure.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetIndex {
    pub objects: BTreeMap<String, AssetObject>,
}

/// One stored object. Only built through deserialization, which checks the
/// hash is 40 hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawAssetObject")]
pub struct AssetObject {
    hash: String,
    size: u64,
}

#[derive(Deserialize)]
struct RawAssetObject {
    hash: String,
    size: u64,
}

impl TryFrom<RawAssetObject> for AssetObject {
    type Error = String;

    fn try_from(raw: RawAssetObject) -> Result<Self, Self::Error> {
        if raw.hash.len() != 40 || !raw.hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(format!("malformed asset hash '{}'", raw.hash));
        }
        Ok(Self {
            hash: raw.hash.to_ascii_lowercase(),
            size: raw.size,
        })
    }
}

impl AssetObject {
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// `<first two hash chars>/<hash>`
    pub fn relative_path(&self) -> String {
        format!("{}/{}", &self.hash[..2], self.hash)
    }
}

impl AssetIndex {
    /// Parse and validate a downloaded index file.
    pub async fn load(path: &Path) -> FetchResult<Self> {
        let raw = tokio::fs::read(path).await.map_err(|e| FetchError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&raw).map_err(|reason| FetchError::InvalidContent {
            path: path.to_path_buf(),
            reason,
        })
    }

    fn parse(raw: &[u8]) -> Result<Self, String> {
        serde_json::from_slice(raw).map_err(|e| e.to_string())
    }

    /// Downloads for every object whose cache entry is stale. Objects shared
    /// by several names are fetched once.
    pub async fn downloads(&self, ctx: &NetContext) -> FetchResult<Vec<Download>> {
        let base = ctx.settings.resources_base_url.trim_end_matches('/');
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();

        for object in self.objects.values() {
            if !seen.insert(object.hash.as_str()) {
                continue;
            }
            let relative = object.relative_path();
            let entry = ctx
                .metacache
                .resolve_entry(ASSET_OBJECTS_BASE, &relative)
                .await?;
            if !entry.is_stale() {
                continue;
            }
            out.push(Download::new(ctx, &format!("{}/{}", base, relative), entry)?);
        }

        info!(
            "{} of {} asset objects need downloading",
            out.len(),
            seen.len()
        );
        Ok(out)
    }
}
