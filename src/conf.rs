// Copyright (c) 2019 Julead Developers
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Daemon configuration.
//!
//! Loaded once at startup and immutable afterwards.  The file names the
//! storage and metadata backends and their backend-opaque paths; the stripe
//! size governs both client-side striping and the per-connection memory
//! bound, so it must match across a deployment.

use config::{Config, ConfigError, File};
use std::env;

/// Default stripe size: 512 KiB.
pub const DEFAULT_STRIPE_SIZE: u64 = 512 * 1024;

const CONFIG_ENV_VAR: &str = "JULEAD_CONFIG";
const CONFIG_PATHS: &[&str] = &["julead", "/etc/julead/julead"];

#[derive(Clone, Debug, Deserialize)]
pub struct BackendConfiguration {
    /// Registry name of the backend.
    pub backend: String,

    /// Passed verbatim to the backend's `init`.
    pub path: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Configuration {
    pub storage: BackendConfiguration,
    pub metadata: BackendConfiguration,

    #[serde(default = "default_stripe_size")]
    pub stripe_size: u64,
}

fn default_stripe_size() -> u64 { DEFAULT_STRIPE_SIZE }

impl Configuration {
    /// Loads the configuration from `$JULEAD_CONFIG` if set, otherwise from
    /// the default search path.
    pub fn load() -> Result<Configuration, ConfigError> {
        if let Ok(path) = env::var(CONFIG_ENV_VAR) {
            return Configuration::from_file(&path);
        }

        let mut last_error = ConfigError::Message("no configuration file found".to_string());

        for path in CONFIG_PATHS {
            match Configuration::from_file(path) {
                Ok(configuration) => return Ok(configuration),
                Err(e) => last_error = e,
            }
        }

        Err(last_error)
    }

    pub fn from_file(path: &str) -> Result<Configuration, ConfigError> {
        let mut settings = Config::new();
        settings.merge(File::with_name(path))?;

        let configuration: Configuration = settings.try_into()?;
        configuration.validate()?;

        Ok(configuration)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.stripe_size == 0 || !self.stripe_size.is_power_of_two() {
            return Err(ConfigError::Message(format!(
                "stripe_size must be a power of two, got {}",
                self.stripe_size
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn parses_a_complete_file() {
        let file = write_config(
            r#"{
                "storage": { "backend": "posix", "path": "/var/lib/julead" },
                "metadata": { "backend": "mongodb", "path": "localhost:julea" },
                "stripe_size": 1048576
            }"#,
        );

        let configuration = Configuration::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(configuration.storage.backend, "posix");
        assert_eq!(configuration.storage.path, "/var/lib/julead");
        assert_eq!(configuration.metadata.backend, "mongodb");
        assert_eq!(configuration.stripe_size, 1024 * 1024);
    }

    #[test]
    fn stripe_size_defaults_to_one_stripe() {
        let file = write_config(
            r#"{
                "storage": { "backend": "null", "path": "" },
                "metadata": { "backend": "mongodb", "path": "localhost:julea" }
            }"#,
        );

        let configuration = Configuration::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(configuration.stripe_size, DEFAULT_STRIPE_SIZE);
    }

    #[test]
    fn rejects_a_stripe_size_that_is_not_a_power_of_two() {
        let file = write_config(
            r#"{
                "storage": { "backend": "null", "path": "" },
                "metadata": { "backend": "mongodb", "path": "localhost:julea" },
                "stripe_size": 1000
            }"#,
        );

        assert!(Configuration::from_file(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn missing_sections_are_an_error() {
        let file = write_config(r#"{ "storage": { "backend": "null", "path": "" } }"#);
        assert!(Configuration::from_file(file.path().to_str().unwrap()).is_err());
    }
}
