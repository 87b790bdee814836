use anyhow::{anyhow, Result};
use config::Config;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::database::{
    ConnectArgs, Engine, Pool, PoolConfig, DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_MAX_CONNECTIONS,
};
use crate::session::{Session, DEFAULT_SESSION_LIFETIME_MINUTES};

/// Database settings: which engine to use and how to reach it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Engine tag, e.g. `sqlite3` or `postgresql`
    pub engine: String,

    /// Engine-specific connection arguments
    pub args: ConnectArgs,

    /// Maximum number of pooled connections
    pub max_connections: usize,

    /// Seconds to wait for a pooled connection; 0 waits forever
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            engine: Engine::Sqlite.tag().to_string(),
            args: ConnectArgs::new(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT.as_secs(),
        }
    }
}

/// Session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Lifetime of new sessions, in minutes
    pub lifetime_minutes: i64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            lifetime_minutes: DEFAULT_SESSION_LIFETIME_MINUTES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoneConfig {
    /// Path to the directory to hold Keystone's data
    pub data_dir: String,

    pub database: DatabaseSettings,

    pub session: SessionSettings,
}

const EMPTY_CONFIG: &str = r#"### keystone configuration file

### directory for data used by keystone (default SQLite database lives here)
# data_dir = "~/.keystone"

[database]
### engine: sqlite3 | postgresql
# engine = "sqlite3"
# max_connections = 1
# acquire_timeout_secs = 30     # 0 waits forever

[database.args]
### sqlite3: database, timeout, read_only, journal_mode
### postgresql: host, port, user, password, database, connect_timeout
# database = "~/.keystone/keystone.sqlite3"

[session]
# lifetime_minutes = 60
"#;

fn default_data_dir() -> String {
    let home_dir = dirs::home_dir()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|| ".".to_string());
    format!("{}/.keystone", home_dir)
}

impl Default for KeystoneConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database: DatabaseSettings::default(),
            session: SessionSettings::default(),
        }
    }
}

impl KeystoneConfig {
    /// Function to create and initialize a new configuration
    ///
    /// Sources, lowest priority first: built-in defaults, the TOML file at `path`
    /// (default `$HOME/.keystone/keystone.toml`, created from a template when
    /// missing), and `KEYSTONE_`-prefixed environment variables with `__` between
    /// nested keys, e.g. `KEYSTONE_DATABASE__ENGINE=postgresql`.
    pub fn new(path: &Option<String>) -> Result<KeystoneConfig> {
        let mut builder = Config::builder();

        // Add in toml configuration file
        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    let path_str = path
                        .to_str()
                        .ok_or_else(|| anyhow!("Could not convert path to string"))?;
                    builder = builder.add_source(config::File::with_name(path_str));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file: {}", e))?;
                }
            }
            None => {
                let keystone_dir = default_data_dir();
                std::fs::create_dir_all(keystone_dir.as_str())
                    .map_err(|e| anyhow!("Unable to create keystone directory: {}", e))?;
                let p = format!("{}/keystone.toml", keystone_dir.as_str());
                if Path::new(p.as_str()).exists() {
                    builder = builder.add_source(config::File::with_name(p.as_str()));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG).map_err(|e| {
                        anyhow!("Unable to create config file {}: {}", p.as_str(), e)
                    })?;
                }
            }
        }

        // Add in settings from the environment (with a prefix of KEYSTONE)
        // E.g., `KEYSTONE_DATA_DIR=/srv/keystone ./keystone` would set the data directory
        builder = builder.add_source(
            config::Environment::with_prefix("KEYSTONE")
                .prefix_separator("_")
                .separator("__"),
        );

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let mut config = settings
            .try_deserialize::<KeystoneConfig>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        config.data_dir = expand_home(&config.data_dir);
        Ok(config)
    }

    /// Get the path to the default SQLite database file
    pub fn sqlite_path(&self) -> String {
        let data_dir = self.data_dir.trim_end_matches('/');
        format!("{}/keystone.sqlite3", data_dir)
    }

    /// Connection arguments with defaults filled in
    ///
    /// A SQLite configuration without a `database`/`path` argument points at
    /// [`KeystoneConfig::sqlite_path`]. `~/` prefixes are expanded.
    pub fn connect_args(&self) -> ConnectArgs {
        let mut args: ConnectArgs = self
            .database
            .args
            .iter()
            .map(|(k, v)| (k, expand_home(v)))
            .collect();

        let is_sqlite = matches!(Engine::from_name(&self.database.engine), Ok(Engine::Sqlite));
        if is_sqlite && args.get_any(&["database", "path"]).is_none() {
            args.insert("database", self.sqlite_path());
        }
        args
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        match self.database.acquire_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new(self.database.engine.clone(), self.connect_args())
            .max_connections(self.database.max_connections)
            .acquire_timeout(self.acquire_timeout())
    }

    /// Build the connection pool described by this configuration
    ///
    /// Creates the data directory first when the default SQLite database is used.
    pub fn pool(&self) -> Result<Pool> {
        let config = self.pool_config();
        if config.args.get("database") == Some(self.sqlite_path().as_str()) {
            std::fs::create_dir_all(self.data_dir.as_str())
                .map_err(|e| anyhow!("Unable to create data directory: {}", e))?;
        }
        Pool::with_config(config).map_err(|e| anyhow!("Failed to create database pool: {}", e))
    }

    /// Create a session with the configured lifetime
    pub fn new_session(&self) -> Session {
        Session::with_lifetime(self.session.lifetime_minutes)
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Data Directory:     {}", self.data_dir),
            format!("Database Engine:    {}", self.database.engine),
        ];

        for (key, value) in self.connect_args().iter() {
            let shown = if key == "password" { "********" } else { value };
            lines.push(format!("  {:<18}{}", format!("{}:", key), shown));
        }

        lines.push(format!("Max Connections:    {}", self.database.max_connections));
        lines.push(match self.acquire_timeout() {
            Some(t) => format!("Acquire Timeout:    {} seconds", t.as_secs()),
            None => "Acquire Timeout:    none".to_string(),
        });
        lines.push(format!(
            "Session Lifetime:   {} minutes",
            self.session.lifetime_minutes
        ));

        lines.join("\n")
    }

    /// Get the config file path
    pub fn config_file_path() -> String {
        format!("{}/keystone.toml", default_data_dir())
    }
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => format!("{}/{}", home.to_string_lossy(), rest),
        _ => path.to_string(),
    }
}
