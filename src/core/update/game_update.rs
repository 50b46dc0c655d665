// ─── Game Update ───
// Brings the files of one game profile up to date: libraries and the main
// jar first, then legacy FML libraries, then the asset index, then the asset
// objects it lists.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use super::GameProfile;
use crate::core::assets::AssetIndex;
use crate::core::cache::{ASSET_INDEXES_BASE, FML_LIBRARIES_BASE, VERSIONS_BASE};
use crate::core::downloader::{Download, NetJob};
use crate::core::error::{FetchError, FetchResult};
use crate::core::library::OpSys;
use crate::core::state::NetContext;

pub struct GameUpdate {
    ctx: NetContext,
    profile: GameProfile,
    os: OpSys,
    fml_target: Option<PathBuf>,
}

impl GameUpdate {
    pub fn new(ctx: NetContext, profile: GameProfile, os: OpSys) -> Self {
        Self {
            ctx,
            profile,
            os,
            fml_target: None,
        }
    }

    /// Folder that receives copies of the legacy FML libraries, usually the
    /// instance's `lib` folder. Without one they only land in the cache.
    pub fn with_fml_target(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fml_target = Some(dir.into());
        self
    }

    pub fn profile(&self) -> &GameProfile {
        &self.profile
    }

    /// Fetch the main jar and every active library that is not up to date.
    ///
    /// Fails before touching the network when local libraries are missing.
    pub async fn update_libraries(&self) -> FetchResult<()> {
        let id = &self.profile.id;
        let mut job = NetJob::new(&self.ctx, format!("Libraries for {}", id));

        if let Some(url) = &self.profile.main_jar_url {
            let entry = self
                .ctx
                .metacache
                .resolve_entry(VERSIONS_BASE, &format!("{id}/{id}.jar"))
                .await?;
            if entry.is_stale() {
                job.add(Download::new(&self.ctx, url, entry)?);
            }
        }

        let mut missing = Vec::new();
        for library in self.profile.libraries.iter().filter(|l| l.is_active(self.os)) {
            for download in library
                .resolve_downloads(&self.ctx, self.os, &mut missing)
                .await?
            {
                job.add(download);
            }
        }

        if !missing.is_empty() {
            warn!("{} local libraries are missing", missing.len());
            return Err(FetchError::MissingLocalLibraries(missing));
        }

        job.start().await
    }

    /// Fetch the legacy FML libraries the target folder lacks and copy them in.
    pub async fn update_fml_libraries(&self) -> FetchResult<()> {
        let mut pending = Vec::new();
        for library in &self.profile.fml_libraries {
            if let Some(target) = &self.fml_target {
                let present = tokio::fs::try_exists(target.join(&library.filename))
                    .await
                    .unwrap_or(false);
                if present {
                    continue;
                }
            }
            pending.push(library);
        }
        if pending.is_empty() {
            debug!("No FML libraries to fetch for {}", self.profile.id);
            return Ok(());
        }

        let settings = &self.ctx.settings;
        let mut job = NetJob::new(&self.ctx, format!("FML libraries for {}", self.profile.id));
        let mut entries = Vec::with_capacity(pending.len());
        for library in pending {
            let entry = self
                .ctx
                .metacache
                .resolve_entry(FML_LIBRARIES_BASE, &library.filename)
                .await?;
            if entry.is_stale() {
                let base = if library.mirrored {
                    &settings.fml_mirror_base_url
                } else {
                    &settings.fml_forge_base_url
                };
                let url = format!("{}/{}", base.trim_end_matches('/'), library.filename);
                job.add(Download::new(&self.ctx, &url, entry.clone())?);
            }
            entries.push((library, entry));
        }
        job.start().await?;

        let Some(target) = &self.fml_target else {
            return Ok(());
        };
        tokio::fs::create_dir_all(target)
            .await
            .map_err(|source| FetchError::Io {
                path: target.clone(),
                source,
            })?;
        for (library, entry) in entries {
            let dest = target.join(&library.filename);
            tokio::fs::copy(entry.full_path(), &dest)
                .await
                .map_err(|source| FetchError::Io { path: dest, source })?;
        }
        info!("Copied FML libraries into {:?}", target);
        Ok(())
    }

    /// Re-fetch the asset index and parse it. Invalid content is evicted from
    /// the cache so the next attempt downloads it again.
    pub async fn update_asset_index(&self) -> FetchResult<Option<AssetIndex>> {
        let Some(index_ref) = &self.profile.asset_index else {
            info!("Profile {} has no asset index", self.profile.id);
            return Ok(None);
        };

        let mut entry = self
            .ctx
            .metacache
            .resolve_entry(ASSET_INDEXES_BASE, &format!("{}.json", index_ref.id))
            .await?;
        entry.set_stale(true);

        let mut job = NetJob::new(&self.ctx, format!("Asset index for {}", self.profile.id));
        job.add(Download::new(&self.ctx, &index_ref.url, entry.clone())?);
        job.start().await?;

        match AssetIndex::load(entry.full_path()).await {
            Ok(index) => Ok(Some(index)),
            Err(e) => {
                warn!("Evicting asset index {}: {}", index_ref.id, e);
                self.ctx.metacache.evict_entry(&entry).await?;
                self.ctx.metacache.flush().await?;
                Err(e)
            }
        }
    }

    pub async fn update_assets(&self, index: &AssetIndex) -> FetchResult<()> {
        let mut job = NetJob::new(&self.ctx, format!("Assets for {}", self.profile.id));
        for download in index.downloads(&self.ctx).await? {
            job.add(download);
        }
        job.start().await
    }

    pub async fn run(&self) -> FetchResult<()> {
        info!("Updating {} for {}", self.profile.id, self.os);
        self.update_libraries().await?;
        self.update_fml_libraries().await?;
        if let Some(index) = self.update_asset_index().await? {
            self.update_assets(&index).await?;
        }
        info!("{} is up to date", self.profile.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::assets::AssetIndexRef;
    use crate::core::downloader::testing::{test_context, ScriptedResponse, ScriptedTransport};
    use crate::core::library::Library;
    use crate::core::update::FmlLibrary;

    const JAR_URL: &str = "https://launcher.example.net/1.7.10/client.jar";
    const INDEX_URL: &str = "https://launcher.example.net/indexes/1.7.10.json";
    const AUTHLIB_URL: &str =
        "https://libraries.example.net/com/mojang/authlib/1.5.21/authlib-1.5.21.jar";
    const OBJECT_HASH: &str = "bdf48ef6b5d0d23bbb02e17d04865216179f510a";

    fn profile(libraries: Vec<Library>) -> GameProfile {
        GameProfile {
            id: "1.7.10".into(),
            main_jar_url: Some(JAR_URL.into()),
            libraries,
            asset_index: Some(AssetIndexRef {
                id: "1.7.10".into(),
                url: INDEX_URL.into(),
            }),
            fml_libraries: Vec::new(),
        }
    }

    fn library(json: serde_json::Value) -> Library {
        serde_json::from_value(json).unwrap()
    }

    #[tokio::test]
    async fn run_fetches_everything() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.route(JAR_URL, ScriptedResponse::ok(vec![b"client".to_vec()]));
        transport.route(AUTHLIB_URL, ScriptedResponse::ok(vec![b"authlib".to_vec()]));
        transport.route(
            INDEX_URL,
            ScriptedResponse::ok(vec![format!(
                r#"{{"objects": {{"icons/icon_16x16.png": {{"hash": "{OBJECT_HASH}", "size": 4}}}}}}"#
            )
            .into_bytes()]),
        );
        transport.route(
            &format!("https://resources.example.net/bd/{OBJECT_HASH}"),
            ScriptedResponse::ok(vec![b"icon".to_vec()]),
        );
        let (_dir, ctx) = test_context(transport.clone()).await;

        let update = GameUpdate::new(
            ctx.clone(),
            profile(vec![
                library(serde_json::json!({ "name": "com.mojang:authlib:1.5.21" })),
                library(serde_json::json!({
                    "name": "ca.weblite:java-objc-bridge:1.0.0",
                    "rules": [{ "action": "allow", "os": { "name": "osx" } }]
                })),
            ]),
            OpSys::Linux,
        );
        update.run().await.unwrap();

        let data = ctx.data_dir();
        assert_eq!(
            std::fs::read(data.join("versions/1.7.10/1.7.10.jar")).unwrap(),
            b"client"
        );
        assert_eq!(
            std::fs::read(data.join("libraries/com/mojang/authlib/1.5.21/authlib-1.5.21.jar"))
                .unwrap(),
            b"authlib"
        );
        assert!(data.join("assets/indexes/1.7.10.json").exists());
        assert_eq!(
            std::fs::read(data.join("assets/objects/bd").join(OBJECT_HASH)).unwrap(),
            b"icon"
        );
        assert!(!data.join("libraries/ca").exists());

        // Second run only refreshes the asset index.
        update.run().await.unwrap();
        assert_eq!(transport.request_count(JAR_URL), 1);
        assert_eq!(transport.request_count(AUTHLIB_URL), 1);
        assert_eq!(transport.request_count(INDEX_URL), 2);
    }

    #[tokio::test]
    async fn missing_local_libraries_stop_before_network() {
        let transport = Arc::new(ScriptedTransport::new());
        let (_dir, ctx) = test_context(transport.clone()).await;
        let update = GameUpdate::new(
            ctx.clone(),
            profile(vec![
                library(serde_json::json!({ "name": "com.local:one:1.0", "MMC-hint": "local" })),
                library(serde_json::json!({ "name": "com.local:two:1.0", "MMC-hint": "local" })),
            ]),
            OpSys::Linux,
        );

        match update.update_libraries().await {
            Err(FetchError::MissingLocalLibraries(paths)) => {
                assert_eq!(
                    paths,
                    vec![
                        ctx.libraries_dir().join("com/local/one/1.0/one-1.0.jar"),
                        ctx.libraries_dir().join("com/local/two/1.0/two-1.0.jar"),
                    ]
                );
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn failed_library_is_listed() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.route(JAR_URL, ScriptedResponse::ok(vec![b"client".to_vec()]));
        let (_dir, ctx) = test_context(transport.clone()).await;
        let update = GameUpdate::new(
            ctx.clone(),
            profile(vec![library(serde_json::json!({ "name": "com.mojang:authlib:1.5.21" }))]),
            OpSys::Linux,
        );

        match update.update_libraries().await {
            Err(FetchError::JobFailed { job, failed }) => {
                assert_eq!(job, "Libraries for 1.7.10");
                assert_eq!(
                    failed,
                    vec![ctx
                        .libraries_dir()
                        .join("com/mojang/authlib/1.5.21/authlib-1.5.21.jar")]
                );
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert!(ctx.data_dir().join("versions/1.7.10/1.7.10.jar").exists());
    }

    #[tokio::test]
    async fn invalid_asset_index_is_evicted() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.route(
            INDEX_URL,
            ScriptedResponse::ok(vec![b"<html>maintenance</html>".to_vec()]),
        );
        let (_dir, ctx) = test_context(transport.clone()).await;
        let update = GameUpdate::new(ctx.clone(), profile(Vec::new()), OpSys::Linux);

        let err = update.update_asset_index().await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidContent { .. }));

        let entry = ctx
            .metacache
            .resolve_entry(ASSET_INDEXES_BASE, "1.7.10.json")
            .await
            .unwrap();
        assert!(entry.is_stale());
    }

    #[tokio::test]
    async fn fml_libraries_are_fetched_and_copied() {
        const ARGO_URL: &str = "https://files.minecraftforge.net/fmllibs/argo-2.25.jar";
        const SCALA_URL: &str = "https://files.multimc.org/fmllibs/scala-library.jar";
        let transport = Arc::new(ScriptedTransport::new());
        transport.route(ARGO_URL, ScriptedResponse::ok(vec![b"argo".to_vec()]));
        transport.route(SCALA_URL, ScriptedResponse::ok(vec![b"scala".to_vec()]));
        let (_dir, ctx) = test_context(transport.clone()).await;
        let lib_dir = ctx.data_dir().join("instances/legacy/lib");

        let mut legacy = profile(Vec::new());
        legacy.fml_libraries = vec![
            FmlLibrary {
                filename: "argo-2.25.jar".into(),
                mirrored: false,
            },
            FmlLibrary {
                filename: "scala-library.jar".into(),
                mirrored: true,
            },
        ];
        let update = GameUpdate::new(ctx.clone(), legacy, OpSys::Linux).with_fml_target(&lib_dir);

        update.update_fml_libraries().await.unwrap();
        assert_eq!(std::fs::read(lib_dir.join("argo-2.25.jar")).unwrap(), b"argo");
        assert_eq!(std::fs::read(lib_dir.join("scala-library.jar")).unwrap(), b"scala");
        assert!(ctx.data_dir().join("fmllibs/argo-2.25.jar").exists());

        // A removed copy is restored from the cache without a request.
        std::fs::remove_file(lib_dir.join("argo-2.25.jar")).unwrap();
        update.update_fml_libraries().await.unwrap();
        assert_eq!(std::fs::read(lib_dir.join("argo-2.25.jar")).unwrap(), b"argo");
        assert_eq!(transport.request_count(ARGO_URL), 1);
        assert_eq!(transport.request_count(SCALA_URL), 1);
    }

    #[tokio::test]
    async fn unreachable_fml_library_fails_the_step() {
        let transport = Arc::new(ScriptedTransport::new());
        let (_dir, ctx) = test_context(transport.clone()).await;
        let lib_dir = ctx.data_dir().join("instances/legacy/lib");
        let mut legacy = profile(Vec::new());
        legacy.fml_libraries = vec![FmlLibrary {
            filename: "guava-12.0.1.jar".into(),
            mirrored: false,
        }];
        let update = GameUpdate::new(ctx.clone(), legacy, OpSys::Linux).with_fml_target(&lib_dir);

        match update.update_fml_libraries().await {
            Err(FetchError::JobFailed { job, failed }) => {
                assert_eq!(job, "FML libraries for 1.7.10");
                assert_eq!(failed, vec![ctx.data_dir().join("fmllibs/guava-12.0.1.jar")]);
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert!(!lib_dir.join("guava-12.0.1.jar").exists());
    }
}
