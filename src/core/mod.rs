// ─── InterfaceOficial Fetch Core ───
// Batch download, cache and library resolution for the launcher.
//
// Architecture:
//   core/
//     downloader/: Fetch units, stage pipeline, bounded batch jobs
//     cache/     : Persistent HTTP metadata index (ETag, mtime, md5)
//     maven/     : Coordinate parser
//     library/   : OS rules + library descriptor resolution
//     assets/    : Asset index + object downloads
//     update/    : Game profile update orchestration
//     state/     : Settings and the shared network context

pub mod assets;
pub mod cache;
pub mod downloader;
pub mod error;
pub mod http;
pub mod library;
pub mod maven;
pub mod state;
pub mod update;
