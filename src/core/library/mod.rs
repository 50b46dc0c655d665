// ─── Library Resolution ───
// Turns library descriptors from a version profile into the files a game
// instance needs on a given OS, and into downloads for the missing ones.

mod descriptor;
mod os;
mod rules;

pub use descriptor::{ApplicableFiles, DownloadInfo, Library, LibraryDownloads, LibraryHint};
pub use os::OpSys;
pub use rules::{fold_rules, OsRule, Rule, RuleAction, RuleResult};

/// Storage prefix of library files, relative to the data directory.
pub const LIBRARY_STORAGE_PREFIX: &str = "libraries";
