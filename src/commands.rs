use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::core::error::FetchResult;
use crate::core::http::ReqwestTransport;
use crate::core::library::OpSys;
use crate::core::state::{default_data_dir, FetchSettings, NetContext};
use crate::core::update::{GameProfile, GameUpdate};

/// Files one active library contributes, relative to the data directory.
#[derive(Debug, Serialize)]
pub struct ResolvedLibrary {
    pub name: String,
    pub jar: Vec<PathBuf>,
    pub native: Vec<PathBuf>,
    pub native32: Vec<PathBuf>,
    pub native64: Vec<PathBuf>,
}

/// Local files of every library in the profile that is active on `os`.
pub fn resolve_profile(profile_path: &Path, os: OpSys) -> FetchResult<Vec<ResolvedLibrary>> {
    let profile = GameProfile::from_file(profile_path)?;
    let resolved: Vec<ResolvedLibrary> = profile
        .libraries
        .iter()
        .filter(|library| library.is_active(os))
        .map(|library| {
            let files = library.resolve_local_files(os);
            ResolvedLibrary {
                name: library.name.to_string(),
                jar: files.jar,
                native: files.native,
                native32: files.native32,
                native64: files.native64,
            }
        })
        .collect();
    info!(
        "{} of {} libraries active on {}",
        resolved.len(),
        profile.libraries.len(),
        os
    );
    Ok(resolved)
}

/// Bring the profile's files under `data_dir` up to date. Legacy FML
/// libraries are also copied into `fml_target` when given.
pub async fn update_profile(
    profile_path: &Path,
    os: OpSys,
    data_dir: Option<PathBuf>,
    concurrency: Option<usize>,
    fml_target: Option<PathBuf>,
) -> FetchResult<()> {
    let profile = GameProfile::from_file(profile_path)?;
    let data_dir = data_dir.unwrap_or_else(default_data_dir);

    let mut settings = FetchSettings::load(&data_dir);
    if let Some(n) = concurrency {
        settings.concurrency = n.max(1);
    }
    let transport = Arc::new(ReqwestTransport::new(&settings.user_agent)?);
    let ctx = NetContext::open(&data_dir, settings, transport).await?;

    info!("Using data directory {:?}", ctx.data_dir());
    let mut update = GameUpdate::new(ctx, profile, os);
    if let Some(dir) = fml_target {
        update = update.with_fml_target(dir);
    }
    update.run().await
}
