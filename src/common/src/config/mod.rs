use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Default configuration file, looked up in the working directory.
pub const CONFIG_FILE: &str = "sqlseries.toml";

/// Prefix of environment overrides, e.g. `SQLSERIES__QUERY__TIMEOUT=5s`.
pub const ENV_PREFIX: &str = "SQLSERIES__";

/// SQL flavour generated by the time macros.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    Snowflake,
    #[default]
    #[value(name = "datafusion")]
    DataFusion,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    #[default]
    Csv,
    Parquet,
}

/// A file registered as a table with the embedded engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableSourceConfig {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub format: TableFormat,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address of the HTTP API
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: String::from("0.0.0.0:3100"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryConfig {
    pub dialect: SqlDialect,
    /// Deadline for all queries of one request
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            dialect: SqlDialect::default(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub server: ServerConfig,
    pub query: QueryConfig,
    /// Tables registered at startup
    pub tables: Vec<TableSourceConfig>,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(CONFIG_FILE))
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(path))
    }

    fn figment(file: figment::providers::Data<Toml>) -> Result<Self, Box<figment::Error>> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }
}
