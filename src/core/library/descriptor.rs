use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::rules::{fold_rules, Rule, RuleAction};
use super::{OpSys, LIBRARY_STORAGE_PREFIX};
use crate::core::cache::LIBRARIES_BASE;
use crate::core::downloader::Download;
use crate::core::error::FetchResult;
use crate::core::maven::MavenArtifact;
use crate::core::state::NetContext;

const ARCH_PLACEHOLDER: &str = "${arch}";

/// How a library's files are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LibraryHint {
    /// Provided by the user; never downloaded.
    #[serde(rename = "local")]
    Local,
    /// Served as an xz-compressed `.pack.xz` next to the jar URL.
    #[serde(rename = "forge-pack-xz")]
    ForgePackXz,
    #[serde(other)]
    Unknown,
}

/// Location of one downloadable file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadInfo {
    pub path: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryDownloads {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<DownloadInfo>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub classifiers: BTreeMap<String, DownloadInfo>,
}

/// A library entry of a version profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    pub name: MavenArtifact,
    /// OS name to native classifier. The classifier may contain `${arch}`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub natives: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Rule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloads: Option<LibraryDownloads>,
    /// Repository base the coordinate path is appended to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "MMC-absoluteUrl", default, skip_serializing_if = "Option::is_none")]
    pub absolute_url: Option<String>,
    #[serde(rename = "MMC-hint", default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<LibraryHint>,
}

/// Files a library contributes on one OS, relative to the data directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicableFiles {
    pub jar: Vec<PathBuf>,
    pub native: Vec<PathBuf>,
    pub native32: Vec<PathBuf>,
    pub native64: Vec<PathBuf>,
}

impl ApplicableFiles {
    pub fn is_empty(&self) -> bool {
        self.jar.is_empty()
            && self.native.is_empty()
            && self.native32.is_empty()
            && self.native64.is_empty()
    }

    fn push(&mut self, slot: Slot, relative: &str) {
        let path: PathBuf = std::iter::once(LIBRARY_STORAGE_PREFIX)
            .chain(relative.split('/').filter(|s| !s.is_empty()))
            .collect();
        match slot {
            Slot::Jar => self.jar.push(path),
            Slot::Native => self.native.push(path),
            Slot::Native32 => self.native32.push(path),
            Slot::Native64 => self.native64.push(path),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Jar,
    Native,
    Native32,
    Native64,
}

/// One concrete file of a library: where it is stored and where it comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Variant {
    slot: Slot,
    path: String,
    url: String,
}

impl Library {
    pub fn new(name: MavenArtifact) -> Self {
        Self {
            name,
            natives: BTreeMap::new(),
            rules: Vec::new(),
            downloads: None,
            url: None,
            absolute_url: None,
            hint: None,
        }
    }

    pub fn is_native(&self) -> bool {
        !self.natives.is_empty()
    }

    pub fn native_classifier(&self, os: OpSys) -> Option<&str> {
        self.natives.get(os.name()).map(String::as_str)
    }

    /// Whether the library applies to `os`. Natives additionally need a
    /// classifier for that OS.
    pub fn is_active(&self, os: OpSys) -> bool {
        let allowed = fold_rules(&self.rules, os) == RuleAction::Allow;
        if self.is_native() {
            allowed && self.native_classifier(os).is_some()
        } else {
            allowed
        }
    }

    /// Files this library places on disk for `os`.
    pub fn resolve_local_files(&self, os: OpSys) -> ApplicableFiles {
        let mut files = ApplicableFiles::default();
        for variant in self.variants(os, "") {
            files.push(variant.slot, &variant.path);
        }
        files
    }

    /// Downloads for every file of this library whose cache entry is stale.
    ///
    /// Local libraries never produce downloads; their missing files are
    /// appended to `missing` instead.
    pub async fn resolve_downloads(
        &self,
        ctx: &NetContext,
        os: OpSys,
        missing: &mut Vec<PathBuf>,
    ) -> FetchResult<Vec<Download>> {
        let mut out = Vec::new();
        for variant in self.variants(os, &ctx.settings.library_base_url) {
            let entry = ctx
                .metacache
                .resolve_entry(LIBRARIES_BASE, &variant.path)
                .await?;
            if !entry.is_stale() {
                continue;
            }

            match self.hint {
                Some(LibraryHint::Local) => {
                    if !tokio::fs::try_exists(entry.full_path()).await.unwrap_or(false) {
                        warn!("Local library {} is missing {:?}", self.name, entry.full_path());
                        missing.push(entry.full_path().to_path_buf());
                    }
                }
                Some(LibraryHint::ForgePackXz) => {
                    let url = format!("{}.pack.xz", variant.url);
                    out.push(Download::forge_xz(ctx, &url, entry)?);
                }
                _ => out.push(Download::new(ctx, &variant.url, entry)?),
            }
        }
        debug!("Library {} needs {} downloads", self.name, out.len());
        Ok(out)
    }

    fn variants(&self, os: OpSys, library_base: &str) -> Vec<Variant> {
        if !self.is_native() {
            let structured = self.downloads.as_ref().and_then(|d| d.artifact.as_ref());
            let variant = match structured {
                Some(info) => Variant {
                    slot: Slot::Jar,
                    path: info.path.clone(),
                    url: info.url.clone(),
                },
                None => self.coordinate_variant(Slot::Jar, &self.name, library_base),
            };
            return vec![variant];
        }

        let Some(classifier) = self.native_classifier(os) else {
            return Vec::new();
        };

        if classifier.contains(ARCH_PLACEHOLDER) {
            [(Slot::Native32, "32"), (Slot::Native64, "64")]
                .into_iter()
                .map(|(slot, arch)| {
                    let cooked = classifier.replace(ARCH_PLACEHOLDER, arch);
                    self.native_variant(slot, &cooked, library_base)
                })
                .collect()
        } else {
            vec![self.native_variant(Slot::Native, classifier, library_base)]
        }
    }

    fn native_variant(&self, slot: Slot, classifier: &str, library_base: &str) -> Variant {
        let structured = self
            .downloads
            .as_ref()
            .and_then(|d| d.classifiers.get(classifier));
        match structured {
            Some(info) => Variant {
                slot,
                path: info.path.clone(),
                url: info.url.clone(),
            },
            None => {
                let artifact = self.name.with_classifier(classifier);
                self.coordinate_variant(slot, &artifact, library_base)
            }
        }
    }

    /// Storage path from the coordinate; URL from the absolute override, the
    /// repository override or the default base, in that order.
    fn coordinate_variant(&self, slot: Slot, artifact: &MavenArtifact, library_base: &str) -> Variant {
        let path = artifact.relative_path();
        let url = match (&self.absolute_url, &self.url) {
            (Some(absolute), _) if !absolute.is_empty() => self.cook_arch(absolute, slot),
            (_, Some(repo)) if !repo.is_empty() => artifact.url(repo),
            _ => artifact.url(library_base),
        };
        Variant { slot, path, url }
    }

    /// An absolute URL may carry the placeholder itself.
    fn cook_arch(&self, raw: &str, slot: Slot) -> String {
        match slot {
            Slot::Native32 => raw.replace(ARCH_PLACEHOLDER, "32"),
            Slot::Native64 => raw.replace(ARCH_PLACEHOLDER, "64"),
            _ => raw.to_string(),
        }
    }
}
