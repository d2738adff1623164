use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use config::{create_strategy, AppStrategy};
use search_core::{BackendFilter, CoreConfig, ShutdownConfig};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default = "default_config", deny_unknown_fields)]
pub struct Config {
    pub runtime_dir: PathBuf,
    /// 要监控和索引的目录列表
    pub watch_paths: Vec<PathBuf>,
    /// Idle seconds after which a client session is considered gone
    pub session_timeout_secs: u64,
    pub shutdown_poll_interval_ms: u64,
    pub change_feed_capacity: usize,
    /// Upper bound of responses returned by one poll
    pub response_batch_size: usize,
    pub backends: BackendFilter,
}

fn default_config() -> Config {
    Config {
        runtime_dir: config::default_runtime_dir(),
        watch_paths: vec![],  // 默认为空，要求用户配置
        session_timeout_secs: 1800,
        shutdown_poll_interval_ms: 1000,
        change_feed_capacity: 256,
        response_batch_size: 256,
        backends: BackendFilter::default(),
    }
}

impl Config {
    fn load_str(user_config_str: &str) -> Result<Config> {
        let user_config: Config = toml::from_str(user_config_str)?;
        Ok(user_config)
    }

    pub fn load() -> Result<Config> {
        let strategy = create_strategy()?;
        let config_path = strategy.config_dir().join(config::constants::SERVER_CONFIG_FILE_NAME);

        match std::fs::read_to_string(&config_path) {
            Ok(user_config_str) => Self::load_str(&user_config_str),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // 配置文件不存在，创建示例配置文件
                Self::create_example_config(&config_path)?;
                Self::load_str("")
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn socket_path(&self) -> PathBuf {
        self.runtime_dir.join(config::constants::UNIX_SOCKET_FILE_NAME)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn core_config(&self) -> CoreConfig {
        CoreConfig {
            watch_paths: self.watch_paths.clone(),
            backends: self.backends.clone(),
            shutdown: ShutdownConfig {
                poll_interval: Duration::from_millis(self.shutdown_poll_interval_ms.max(1)),
            },
            change_feed_capacity: self.change_feed_capacity,
        }
    }

    fn create_example_config(config_path: &Path) -> Result<()> {
        use std::io::Write;

        // 确保配置目录存在
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = std::fs::File::create(config_path)?;
        file.write_all(EXAMPLE_CONFIG.as_bytes())?;

        eprintln!("\n📝 已创建配置文件: {:?}", config_path);
        eprintln!("💡 请编辑配置文件，添加要索引的目录到 watch-paths");
        eprintln!("   然后运行: searchd serve\n");

        Ok(())
    }
}

const EXAMPLE_CONFIG: &str = r#"# searchd 配置文件
#
# 此文件在首次运行时自动创建
# 配置修改后重启服务生效

# 要监控和索引的目录列表
watch-paths = [
    # "/Users/yourname/Documents",
    # "/Users/yourname/Projects",
]

# 可选：自定义运行时目录（socket 所在目录）
# runtime-dir = "/custom/runtime/path"

# 客户端会话空闲多久后被回收（秒）
# session-timeout-secs = 1800

# 关闭时等待工作单元的日志间隔（毫秒）
# shutdown-poll-interval-ms = 1000

# 每个会话可缓冲的变更通知数
# change-feed-capacity = 256

# 单次拉取返回的最大响应数
# response-batch-size = 256

# 启用/禁用后端（名称不区分大小写，allow 非空时只启用列出的后端）
# [backends]
# allow = []
# deny = []
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_example_config_parses_to_defaults() {
        let cfg = Config::load_str(EXAMPLE_CONFIG).unwrap();
        assert!(cfg.watch_paths.is_empty());
        assert_eq!(cfg.session_timeout_secs, 1800);
        assert_eq!(cfg.response_batch_size, 256);
        assert_eq!(cfg.core_config().shutdown.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_backend_filter_table() {
        let cfg = Config::load_str(
            r#"
            watch-paths = ["/tmp/docs"]
            [backends]
            deny = ["NameIndex"]
            "#,
        )
        .unwrap();
        let core = cfg.core_config();
        assert_eq!(core.watch_paths, vec![PathBuf::from("/tmp/docs")]);
        assert!(!core.backends.permits("nameindex"));
    }

    #[rstest]
    #[case("cache-dir = \"/tmp\"")]
    #[case("session-timeout-secs = \"soon\"")]
    fn test_rejects_bad_config(#[case] input: &str) {
        assert!(Config::load_str(input).is_err());
    }

    #[test]
    fn test_socket_path_lives_in_runtime_dir() {
        let cfg = Config::load_str("runtime-dir = \"/run/user/1000/searchd\"").unwrap();
        assert_eq!(
            cfg.socket_path(),
            PathBuf::from("/run/user/1000/searchd").join(config::constants::UNIX_SOCKET_FILE_NAME)
        );
    }
}
