//! Datasource configuration via TOML
//!
//! A datasource is described by a `[[datasource]]` table. Keys are accepted
//! in snake_case and in the PascalCase spelling used by container resource
//! definitions (`MaxIdle`, `JtaManaged`, ...), so existing property sets
//! translate one-to-one.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Default upper bound on connections per pool.
pub const DEFAULT_MAX_ACTIVE: usize = 20;
/// Default upper bound on idle connections per pool.
pub const DEFAULT_MAX_IDLE: usize = 20;

fn default_name() -> String {
    "default".to_string()
}

fn default_max_active() -> usize {
    DEFAULT_MAX_ACTIVE
}

fn default_max_idle() -> usize {
    DEFAULT_MAX_IDLE
}

fn default_jta_managed() -> bool {
    true
}

/// Configuration of a single pooled datasource.
///
/// # Example
///
/// ```toml
/// [[datasource]]
/// name = "xadb"
/// url = "mem:tomcat-xa"
/// user = "sa"
/// password = ""
/// JtaManaged = true
/// MaxIdle = 25
/// MaxActive = 25
/// InitialSize = 3
/// ```
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct DataSourceConfig {
    /// Resource name the datasource is registered under.
    #[serde(default = "default_name", alias = "Name")]
    pub name: String,
    /// Connection URL handed to the driver.
    #[serde(default, alias = "Url", alias = "URL")]
    pub url: String,
    /// Database user.
    #[serde(default, alias = "User", alias = "UserName")]
    pub user: String,
    /// Database password. Never printed by `Debug`.
    #[serde(default, alias = "Password")]
    pub password: String,
    /// Maximum idle connections kept after a return.
    #[serde(default = "default_max_idle", alias = "MaxIdle")]
    pub max_idle: usize,
    /// Maximum connections (idle + active).
    #[serde(default = "default_max_active", alias = "MaxActive", alias = "MaxTotal")]
    pub max_active: usize,
    /// Connections opened when the pool is created.
    #[serde(default, alias = "InitialSize")]
    pub initial_size: usize,
    /// Enlist connections in the ambient transaction.
    #[serde(default = "default_jta_managed", alias = "JtaManaged")]
    pub jta_managed: bool,
    /// Validate idle connections before handing them out.
    #[serde(default, alias = "TestOnBorrow")]
    pub test_on_borrow: bool,
    /// Validate connections before returning them to the idle set.
    #[serde(default, alias = "TestOnReturn")]
    pub test_on_return: bool,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            url: String::new(),
            user: String::new(),
            password: String::new(),
            max_idle: DEFAULT_MAX_IDLE,
            max_active: DEFAULT_MAX_ACTIVE,
            initial_size: 0,
            jta_managed: default_jta_managed(),
            test_on_borrow: false,
            test_on_return: false,
        }
    }
}

impl fmt::Debug for DataSourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSourceConfig")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &"***")
            .field("max_idle", &self.max_idle)
            .field("max_active", &self.max_active)
            .field("initial_size", &self.initial_size)
            .field("jta_managed", &self.jta_managed)
            .field("test_on_borrow", &self.test_on_borrow)
            .field("test_on_return", &self.test_on_return)
            .finish()
    }
}

impl DataSourceConfig {
    /// Create a config with the given resource name and defaults elsewhere
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the connection URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set user and password
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Set maximum idle connections
    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Set maximum total connections
    pub fn with_max_active(mut self, max_active: usize) -> Self {
        self.max_active = max_active;
        self
    }

    /// Set the number of connections opened up front
    pub fn with_initial_size(mut self, initial_size: usize) -> Self {
        self.initial_size = initial_size;
        self
    }

    /// Enable or disable transaction enlistment
    pub fn with_jta_managed(mut self, jta_managed: bool) -> Self {
        self.jta_managed = jta_managed;
        self
    }

    /// Enable or disable validation on borrow
    pub fn with_test_on_borrow(mut self, enabled: bool) -> Self {
        self.test_on_borrow = enabled;
        self
    }

    /// Enable or disable validation on return
    pub fn with_test_on_return(mut self, enabled: bool) -> Self {
        self.test_on_return = enabled;
        self
    }

    /// Check the sizing options for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `max_active` is zero or
    /// `initial_size` exceeds either `max_active` or `max_idle`.
    pub fn validate(&self) -> Result<()> {
        if self.max_active == 0 {
            return Err(Error::invalid_config(format!(
                "datasource '{}': max_active must be at least 1",
                self.name
            )));
        }
        if self.initial_size > self.max_active {
            return Err(Error::invalid_config(format!(
                "datasource '{}': initial_size ({}) exceeds max_active ({})",
                self.name, self.initial_size, self.max_active
            )));
        }
        if self.initial_size > self.max_idle {
            return Err(Error::invalid_config(format!(
                "datasource '{}': initial_size ({}) exceeds max_idle ({})",
                self.name, self.initial_size, self.max_idle
            )));
        }
        Ok(())
    }

    /// Parse a single datasource table from TOML and validate it.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: DataSourceConfig = toml::from_str(content)
            .map_err(|e| Error::config(format!("Failed to parse datasource config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}

/// A configuration file holding several datasources.
///
/// ```toml
/// [[datasource]]
/// name = "xadb"
/// MaxActive = 25
///
/// [[datasource]]
/// name = "reporting"
/// JtaManaged = false
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DataSourcesFile {
    /// Configured datasources, in file order.
    #[serde(default, rename = "datasource")]
    pub datasources: Vec<DataSourceConfig>,
}

impl DataSourcesFile {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# xapool datasource configuration
#
# One [[datasource]] table per pool. PascalCase keys (MaxIdle, JtaManaged, ...)
# are accepted as aliases.
[[datasource]]
name = "default"
url = "mem:default"
user = "sa"
password = ""

# Maximum idle connections kept after a return (default: 20)
max_idle = 20

# Maximum connections, idle + active (default: 20)
max_active = 20

# Connections opened when the pool is created (default: 0)
initial_size = 0

# Enlist connections in the ambient transaction (default: true)
jta_managed = true

# Validate connections on borrow / on return (default: false)
test_on_borrow = false
test_on_return = false
"#
    }

    /// Read and parse a config file, validating every datasource.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, cannot be parsed, or
    /// contains an invalid or duplicated datasource.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            Error::Config(msg) => Error::config(format!("{} ({})", msg, path.display())),
            other => other,
        })
    }

    /// Parse config file content, validating every datasource.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: DataSourcesFile = toml::from_str(content)
            .map_err(|e| Error::config(format!("Failed to parse config: {}", e)))?;
        for (i, ds) in file.datasources.iter().enumerate() {
            ds.validate()?;
            if file.datasources[..i].iter().any(|other| other.name == ds.name) {
                return Err(Error::invalid_config(format!(
                    "duplicate datasource name '{}'",
                    ds.name
                )));
            }
        }
        Ok(file)
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Look up a datasource by name.
    pub fn get(&self, name: &str) -> Option<&DataSourceConfig> {
        self.datasources.iter().find(|ds| ds.name == name)
    }
}
