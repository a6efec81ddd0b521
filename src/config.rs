use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::pages::DEFAULT_PAGE_SIZE;
use crate::record::ApiVersion;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The DHCP server to manage, by address or host name.
    pub server: String,
    pub api_version: ApiVersion,
    /// Preferred number of records per enumeration page.
    pub page_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: "127.0.0.1".to_string(),
            api_version: ApiVersion::Current,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Config {
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.trim().is_empty() {
            return Err(Error::InvalidConfig("server must not be empty".to_string()));
        }

        if self.page_size == 0 {
            return Err(Error::InvalidConfig(
                "page_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
