mod artifact;

pub use artifact::MavenArtifact;

/// Default repository for libraries that do not name their own.
pub const MOJANG_LIBRARIES: &str = "https://libraries.minecraft.net/";
/// Asset object store, addressed as `<hh>/<hash>`.
pub const MOJANG_RESOURCES: &str = "https://resources.download.minecraft.net/";
/// Mirror of the legacy FML libraries.
pub const FML_MIRROR_LIBRARIES: &str = "https://files.multimc.org/fmllibs/";
/// Forge's own host for the legacy FML libraries.
pub const FML_FORGE_LIBRARIES: &str = "https://files.minecraftforge.net/fmllibs/";
