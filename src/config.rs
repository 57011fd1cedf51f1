use std::{env, fs, path::PathBuf, time::Duration};

use crate::prelude::*;
use lda_shared::protocol::DEFAULT_SOCKET_PATH;
use nestify::nest;
use serde::{Deserialize, Serialize};

nest! {
    #[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]*
    #[serde(rename_all = "kebab-case", default)]*
    /// Configuration of the collector daemon.
    ///
    /// Stored at `~/.config/lda/config.yaml` (following the XDG Base Directory Specification).
    /// Every field is optional in the file, missing ones fall back to [`CollectorConfig::default`].
    /// Intervals are expressed in seconds.
    pub struct CollectorConfig {
        pub debug: bool,
        pub socket_path: String,
        pub database_path: String,
        /// Baseline sampling interval, `0` disables baseline sampling
        pub process_interval: u64,
        /// First sampling interval once a command is in flight
        pub command_interval: u64,
        pub command_interval_multiplier: u32,
        /// Hard cutoff of active-mode sampling, also the upper bound of the backoff
        pub max_duration: u64,
        pub max_concurrent_commands: usize,
        pub exclude_regex: Option<String>,
        /// `ps` or `psutil`
        pub process_collection_type: String,
        pub retention: pub struct RetentionConfig {
            pub days: u32,
            /// `0` disables the retention job
            pub interval_hours: u64,
        },
        pub remote: pub struct RemoteConfig {
            pub enabled: bool,
            pub server_address: Option<String>,
            pub secure_connection: bool,
            pub cert_file: Option<String>,
            pub timeout: u64,
            pub user_id: Option<String>,
            pub user_email: Option<String>,
        },
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            debug: false,
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
            database_path: "~/.local/share/lda/lda.db".to_string(),
            process_interval: 3600,
            command_interval: 1,
            command_interval_multiplier: 5,
            max_duration: 300,
            max_concurrent_commands: 20,
            exclude_regex: None,
            process_collection_type: "psutil".to_string(),
            retention: RetentionConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: 5,
            interval_hours: 1,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_address: None,
            secure_connection: false,
            cert_file: None,
            timeout: 10,
            user_id: None,
            user_email: None,
        }
    }
}

/// Get the path to the configuration file, following the XDG Base Directory Specification
/// at https://specifications.freedesktop.org/basedir-spec/basedir-spec-latest.html
///
/// If config_name is None, returns ~/.config/lda/config.yaml (default)
/// If config_name is Some, returns ~/.config/lda/{config_name}.yaml
fn get_configuration_file_path(config_name: Option<&str>) -> Result<PathBuf> {
    let config_dir = match env::var("XDG_CONFIG_HOME") {
        Ok(config_home) => PathBuf::from(config_home),
        Err(_) => {
            let home = env::var("HOME").context("HOME env variable not set")?;
            PathBuf::from(home).join(".config")
        }
    };
    let config_dir = config_dir.join("lda");

    Ok(match config_name {
        Some(name) => config_dir.join(format!("{name}.yaml")),
        None => config_dir.join("config.yaml"),
    })
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

impl CollectorConfig {
    /// Load the configuration. If it does not exist, return a default configuration.
    pub fn load(config_name: Option<&str>) -> Result<Self> {
        let config_path = get_configuration_file_path(config_name)?;

        let config = match fs::read(&config_path) {
            Ok(config_str) => {
                let config: CollectorConfig =
                    serde_yaml::from_slice(&config_str).context(format!(
                        "Failed to parse lda config at {}",
                        config_path.display()
                    ))?;
                debug!("Config loaded from {}", config_path.display());
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Config file not found at {}", config_path.display());
                CollectorConfig::default()
            }
            Err(e) => bail!("Failed to load config: {e}"),
        };

        Ok(config)
    }

    pub fn socket_path(&self) -> PathBuf {
        expand_path(&self.socket_path)
    }

    pub fn database_path(&self) -> PathBuf {
        expand_path(&self.database_path)
    }

    pub fn process_interval(&self) -> Option<Duration> {
        (self.process_interval > 0).then(|| Duration::from_secs(self.process_interval))
    }

    pub fn command_interval(&self) -> Duration {
        Duration::from_secs(self.command_interval)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration)
    }

    /// The active `exclude-regex`, empty strings count as unset
    pub fn exclude_regex(&self) -> Option<&str> {
        self.exclude_regex
            .as_deref()
            .filter(|pattern| !pattern.is_empty())
    }
}

impl RetentionConfig {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_hours > 0).then(|| Duration::from_secs(self.interval_hours * 3600))
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn cert_file(&self) -> Option<PathBuf> {
        self.cert_file.as_deref().map(expand_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let tmp_dir = tempfile::tempdir().unwrap();
        temp_env::with_var("XDG_CONFIG_HOME", Some(tmp_dir.path()), || {
            let config = CollectorConfig::load(None).unwrap();
            assert_eq!(config, CollectorConfig::default());
            assert_eq!(config.process_interval(), Some(Duration::from_secs(3600)));
        });
    }

    #[test]
    fn test_partial_file_is_merged_with_defaults() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let config_dir = tmp_dir.path().join("lda");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(
            config_dir.join("work.yaml"),
            r#"
process-interval: 0
command-interval-multiplier: 2
exclude-regex: "^ls"
process-collection-type: ps
retention:
  days: 30
remote:
  enabled: true
  server-address: collector.example.com:443
  secure-connection: true
"#,
        )
        .unwrap();

        temp_env::with_var("XDG_CONFIG_HOME", Some(tmp_dir.path()), || {
            let config = CollectorConfig::load(Some("work")).unwrap();
            assert_eq!(config.process_interval(), None);
            assert_eq!(config.command_interval_multiplier, 2);
            assert_eq!(config.exclude_regex(), Some("^ls"));
            assert_eq!(config.process_collection_type, "ps");
            assert_eq!(config.retention.days, 30);
            assert_eq!(config.retention.interval_hours, 1);
            assert!(config.remote.enabled);
            assert!(config.remote.secure_connection);
            assert_eq!(config.remote.timeout(), Duration::from_secs(10));
            assert_eq!(config.max_concurrent_commands, 20);
        });
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let config_dir = tmp_dir.path().join("lda");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join("config.yaml"), "max-duration: [not, a, number]").unwrap();

        temp_env::with_var("XDG_CONFIG_HOME", Some(tmp_dir.path()), || {
            assert!(CollectorConfig::load(None).is_err());
        });
    }

    #[test]
    fn test_empty_exclude_regex_is_unset() {
        let config = CollectorConfig {
            exclude_regex: Some(String::new()),
            ..CollectorConfig::default()
        };
        assert_eq!(config.exclude_regex(), None);
    }
}
