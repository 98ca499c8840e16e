//! Configuration file loading and per-section struct parsing helpers.

use std::fs;
use std::path::Path;

use crate::utils::CacheSyncError;

/// Composes a configuration struct from its default values, then overwrites
/// given fields by parsing from given TOML string if it's not `None`. Returns
/// an `Ok(config)` on success, and `Err(CacheSyncError)` on parser failure
/// or on any key in the string that is not among the given fields.
///
/// Example:
/// ```no_compile
/// let config = parsed_config!(section => MyConfig; sync_time, data_path)?;
/// ```
#[macro_export]
macro_rules! parsed_config {
    ($config_str:expr => $config_type:ty; $($field:ident),+) => {{
        let config_str: Option<&str> = $config_str;

        // closure helper for easier error returning
        let compose_config = || -> Result<$config_type, $crate::CacheSyncError> {
            let mut config: $config_type = Default::default();
            let Some(config_str) = config_str else {
                return Ok(config);
            };

            let mut table = config_str.parse::<toml::Table>()?;

            // traverse through all given field names
            $({
                // if field name found in table (and removed)
                if let Some(v) = table.remove(stringify!($field)) {
                    config.$field = v.try_into()?;
                }
            })+

            // if table is not empty at this time, some parsed keys are not
            // expected hence invalid
            if let Some(key) = table.keys().next() {
                return Err($crate::CacheSyncError::msg(format!(
                    "invalid field name '{}' in config",
                    key,
                )));
            }

            Ok(config)
        };

        compose_config()
    }};
}

/// A parsed TOML configuration file, split into top-level sections. Each
/// component re-reads the file on init and reload and parses only its own
/// section out of it.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    table: toml::Table,
}

impl ConfigFile {
    /// Reads and parses the configuration file at given path.
    pub fn load(path: &Path) -> Result<Self, CacheSyncError> {
        let content = fs::read_to_string(path).map_err(|e| {
            CacheSyncError::msg(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    /// Parses configuration from an in-memory TOML string.
    pub fn parse(content: &str) -> Result<Self, CacheSyncError> {
        Ok(ConfigFile {
            table: content.parse::<toml::Table>()?,
        })
    }

    /// Returns the given section re-serialized as a TOML string, suitable
    /// for feeding into `parsed_config!`. `None` if the section is absent.
    pub fn section(
        &self,
        name: &str,
    ) -> Result<Option<String>, CacheSyncError> {
        match self.table.get(name) {
            Some(toml::Value::Table(section)) => {
                Ok(Some(toml::to_string(section)?))
            }
            Some(_) => Err(CacheSyncError::msg(format!(
                "config section '{}' is not a table",
                name
            ))),
            None => Ok(None),
        }
    }

    /// Returns the given section as a flat map of string values. Non-string
    /// values in the section are rejected.
    pub fn string_map(
        &self,
        name: &str,
    ) -> Result<Vec<(String, String)>, CacheSyncError> {
        let mut entries = vec![];
        if let Some(value) = self.table.get(name) {
            let toml::Value::Table(section) = value else {
                return Err(CacheSyncError::msg(format!(
                    "config section '{}' is not a table",
                    name
                )));
            };
            for (key, value) in section {
                match value {
                    toml::Value::String(s) => {
                        entries.push((key.clone(), s.clone()))
                    }
                    _ => {
                        return Err(CacheSyncError::msg(format!(
                            "config '{}.{}' is not a string",
                            name, key
                        )))
                    }
                }
            }
        }
        Ok(entries)
    }
}
