use std::io;

use geolog_core::api::ApiError;
use geolog_core::auth::AuthError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] geolog_core::Error),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Not signed in. Run `geolog auth login --email <EMAIL> --password <PASSWORD>` first.")]
    NotSignedIn,
    #[error("{0}")]
    InvalidArgument(String),
    #[error("Sync failed: {0}")]
    SyncFailed(String),
}
