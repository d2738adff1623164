pub const TOP_LEVEL_DOMAIN: &str = "org";
pub const AUTHOR: &str = "searchd";
pub const APP_NAME: &str = "searchd";

pub const SERVER_CONFIG_FILE_NAME: &str = "server.toml";
pub const UNIX_SOCKET_FILE_NAME: &str = "searchd.sock";
