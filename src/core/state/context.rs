use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::cache::{
    HttpMetaCache, ASSET_INDEXES_BASE, ASSET_OBJECTS_BASE, FML_LIBRARIES_BASE, LIBRARIES_BASE,
    VERSIONS_BASE,
};
use crate::core::downloader::HttpTransport;
use crate::core::error::FetchResult;
use crate::core::http::ReqwestTransport;

use super::FetchSettings;

/// Everything a download needs from its surroundings: the transport, the
/// shared cache index and the settings. Cheap to clone.
#[derive(Clone)]
pub struct NetContext {
    pub transport: Arc<dyn HttpTransport>,
    pub metacache: Arc<HttpMetaCache>,
    pub settings: Arc<FetchSettings>,
    pub data_dir: PathBuf,
}

impl NetContext {
    /// Register the cache namespaces under `data_dir` and load the index.
    pub async fn open(
        data_dir: impl Into<PathBuf>,
        settings: FetchSettings,
        transport: Arc<dyn HttpTransport>,
    ) -> FetchResult<Self> {
        let data_dir = data_dir.into();
        let metacache = HttpMetaCache::new(data_dir.join("metacache"))
            .with_base(LIBRARIES_BASE, data_dir.join("libraries"))
            .with_base(VERSIONS_BASE, data_dir.join("versions"))
            .with_base(ASSET_INDEXES_BASE, data_dir.join("assets").join("indexes"))
            .with_base(ASSET_OBJECTS_BASE, data_dir.join("assets").join("objects"))
            .with_base(FML_LIBRARIES_BASE, data_dir.join("fmllibs"));
        metacache.load().await?;

        Ok(Self {
            transport,
            metacache: Arc::new(metacache),
            settings: Arc::new(settings),
            data_dir,
        })
    }

    /// Context backed by the real network, with settings read from `data_dir`.
    pub async fn with_defaults(data_dir: impl Into<PathBuf>) -> FetchResult<Self> {
        let data_dir = data_dir.into();
        let settings = FetchSettings::load(&data_dir);
        let transport = Arc::new(ReqwestTransport::new(&settings.user_agent)?);
        Self::open(data_dir, settings, transport).await
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn libraries_dir(&self) -> PathBuf {
        self.data_dir.join("libraries")
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.data_dir.join("assets")
    }
}
