use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("menu file not found: {0}")]
    MenuMissing(PathBuf),
    #[error("failed to read menu {path}: {source}")]
    MenuUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("menu is not valid JSON: {0}")]
    MenuMalformed(#[from] serde_json::Error),
    #[error("menu document has no \"MENU\" list")]
    MenuListMissing,
    #[error("menu contains no valid entries")]
    MenuEmpty,
    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}
