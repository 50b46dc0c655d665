mod context;
mod settings;

pub use context::NetContext;
pub use settings::{default_data_dir, FetchSettings, APP_USER_AGENT};
