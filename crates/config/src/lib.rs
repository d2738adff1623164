pub mod constants;

pub use etcetera::AppStrategy;
use etcetera::{AppStrategyArgs, choose_app_strategy};

use std::path::PathBuf;
use std::env;

/// Environment variable overriding the runtime directory
pub const RUNTIME_DIRECTORY_ENV: &str = "RUNTIME_DIRECTORY";

pub fn create_strategy() -> std::result::Result<impl AppStrategy, etcetera::HomeDirError> {
    choose_app_strategy(AppStrategyArgs {
        top_level_domain: constants::TOP_LEVEL_DOMAIN.to_string(),
        author: constants::AUTHOR.to_string(),
        app_name: constants::APP_NAME.to_string(),
    })
}

pub fn resolve_dir<S, F>(env_key: &str, strategy: &S, strategy_fn: F) -> PathBuf
where
    S: AppStrategy,
    F: FnOnce(&S) -> Option<PathBuf>,
{
    env::var_os(env_key)
        .map(PathBuf::from)
        .or_else(|| strategy_fn(strategy))
        .unwrap_or_else(|| env::temp_dir().join(constants::APP_NAME))
}

/// Runtime directory the daemon listens in when no config overrides it.
pub fn default_runtime_dir() -> PathBuf {
    match create_strategy() {
        Ok(strategy) => resolve_dir(RUNTIME_DIRECTORY_ENV, &strategy, |s| s.runtime_dir()),
        Err(_) => env::var_os(RUNTIME_DIRECTORY_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join(constants::APP_NAME)),
    }
}

pub fn default_socket_path() -> PathBuf {
    default_runtime_dir().join(constants::UNIX_SOCKET_FILE_NAME)
}
