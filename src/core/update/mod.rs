mod game_update;
mod profile;

pub use game_update::GameUpdate;
pub use profile::{FmlLibrary, GameProfile};
