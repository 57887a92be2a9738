use std::env;
use std::path::PathBuf;

/// Environment variable overriding the default `~/.dlog` config dir.
pub const CONFIG_DIR_ENV: &str = "DLOG_CONFIG_DIR";

/// Root certificate shared by the server and every client.
pub fn ca_file() -> PathBuf {
    config_file("ca.pem")
}

pub fn server_cert_file() -> PathBuf {
    config_file("server.pem")
}

pub fn server_key_file() -> PathBuf {
    config_file("server-key.pem")
}

/// ACL rules consulted by the server, see [`crate::auth::Authorizer`].
pub fn policy_file() -> PathBuf {
    config_file("policy.csv")
}

fn config_file(name: &str) -> PathBuf {
    if let Ok(dir) = env::var(CONFIG_DIR_ENV) {
        return PathBuf::from(dir).join(name);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".dlog")
        .join(name)
}
