//! Layered configuration loading
//!
//! Priority (highest to lowest):
//! 1. Environment variables prefixed with `<SERVICE>_` (nested keys use `__`)
//! 2. Configuration file (`.toml`, `.yaml`/`.yml` or `.json`)
//! 3. `Default` values of the configuration type

use std::path::Path;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::{Error, Result};

/// Load configuration for `service_name`, optionally from a file
pub fn load_config<T>(service_name: &str, path: Option<&Path>) -> Result<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    if let Some(path) = path {
        if !path.exists() {
            return Err(Error::ConfigNotFound(path.to_path_buf()));
        }
        info!("Loading configuration from {}", path.display());
        figment = merge_file(figment, path)?;
    } else {
        debug!("No configuration file given, using defaults");
    }

    let prefix = format!("{}_", service_name.to_uppercase());
    figment = figment.merge(Env::prefixed(&prefix).split("__"));

    figment
        .extract()
        .map_err(|e| Error::Config(format!("Failed to load configuration: {}", e)))
}

/// Load configuration from a specific file, without defaults or environment
pub fn load_config_from_file<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    Ok(merge_file(Figment::new(), path.as_ref())?.extract()?)
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::UnsupportedFormat(path.display().to_string()))?;

    match extension {
        "toml" => Ok(figment.merge(Toml::file(path))),
        "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
        "json" => Ok(figment.merge(Json::file(path))),
        other => Err(Error::UnsupportedFormat(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct TestConfig {
        name: String,
        cycle_time_ms: u64,
        nested: NestedConfig,
    }

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct NestedConfig {
        level: String,
    }

    impl Default for TestConfig {
        fn default() -> Self {
            Self {
                name: "default".to_string(),
                cycle_time_ms: 1000,
                nested: NestedConfig {
                    level: "info".to_string(),
                },
            }
        }
    }

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_file() {
        let config: TestConfig = load_config("cfgtest_defaults", None).unwrap();
        assert_eq!(config, TestConfig::default());
    }

    #[test]
    fn test_yaml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "bridge.yaml", "name: modbus1\ncycle_time_ms: 500\n");

        let config: TestConfig = load_config("cfgtest_yaml", Some(&path)).unwrap();
        assert_eq!(config.name, "modbus1");
        assert_eq!(config.cycle_time_ms, 500);
        // Untouched fields keep their defaults
        assert_eq!(config.nested.level, "info");
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "bridge.toml", "name = \"from-file\"\n");
        std::env::set_var("CFGTEST_ENV_NAME", "from-env");
        std::env::set_var("CFGTEST_ENV_NESTED__LEVEL", "debug");

        let config: TestConfig = load_config("cfgtest_env", Some(&path)).unwrap();
        assert_eq!(config.name, "from-env");
        assert_eq!(config.nested.level, "debug");

        std::env::remove_var("CFGTEST_ENV_NAME");
        std::env::remove_var("CFGTEST_ENV_NESTED__LEVEL");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result: Result<TestConfig> =
            load_config("cfgtest_missing", Some(Path::new("/nonexistent/bridge.yaml")));
        assert!(matches!(result, Err(Error::ConfigNotFound(_))));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "bridge.ini", "name=x\n");

        let result: Result<TestConfig> = load_config_from_file(&path);
        assert!(matches!(result, Err(Error::UnsupportedFormat(ext)) if ext == "ini"));
    }
}
