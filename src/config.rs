//! Configuration loading via `ortho-config`.
//!
//! Values merge defaults, `quartermaster.toml`, and `QM_*` environment
//! variables. Validation errors name the environment variable and TOML key
//! that fix them.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

const CONFIG_FILE: &str = "quartermaster.toml";

/// Core allocation settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "QM",
    discovery(
        app_name = "quartermaster",
        env_var = "QM_CONFIG_PATH",
        config_file_name = "quartermaster.toml",
        dotfile_name = ".quartermaster.toml",
        project_file_name = "quartermaster.toml"
    )
)]
pub struct CoreConfig {
    /// Number of addresses the pool keeps reserved for the infrastructure.
    #[ortho_config(default = 0)]
    pub reserved_address_target: u32,
    /// Prefix of generated volume identifiers.
    #[ortho_config(default = "vol".to_owned())]
    pub volume_id_prefix: String,
    /// Identifier candidates tried per create before giving up.
    #[ortho_config(default = 32)]
    pub max_identifier_attempts: u32,
    /// Seconds to wait for any backend call.
    #[ortho_config(default = 30)]
    pub backend_timeout_secs: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            reserved_address_target: 0,
            volume_id_prefix: String::from("vol"),
            max_identifier_attempts: 32,
            backend_timeout_secs: 30,
        }
    }
}

/// Connection settings for the HTTP provisioning service.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "QM_PROVISIONER",
    discovery(
        app_name = "quartermaster",
        env_var = "QM_CONFIG_PATH",
        config_file_name = "quartermaster.toml",
        dotfile_name = ".quartermaster.toml",
        project_file_name = "quartermaster.toml"
    )
)]
pub struct ProvisionerConfig {
    /// Base URL of the provisioning service.
    pub endpoint: String,
    /// Token sent in the `X-Auth-Token` header.
    pub auth_token: Option<String>,
    /// Seconds before an HTTP request is abandoned.
    #[ortho_config(default = 30)]
    pub request_timeout_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }

    fn hint(&self) -> String {
        format!(
            "set {} or add {} to [{}] in {CONFIG_FILE}",
            self.env_var, self.toml_key, self.section
        )
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!("missing {}: {}", self.description, self.hint()))
    }

    fn invalid(&self, problem: &str) -> ConfigError {
        ConfigError::InvalidValue(format!("{} {problem}: {}", self.description, self.hint()))
    }
}

fn require_positive(value: u64, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(metadata.invalid("must be greater than zero"));
    }
    Ok(())
}

impl CoreConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("quartermaster")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Reservation target as a pool size.
    #[must_use]
    pub fn reserved_target(&self) -> usize {
        usize::try_from(self.reserved_address_target).unwrap_or(usize::MAX)
    }

    /// Timeout applied to backend calls.
    #[must_use]
    pub const fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    /// Checks the values the loader cannot check by type alone.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when the identifier prefix is
    /// empty and [`ConfigError::InvalidValue`] for malformed prefixes or zero
    /// attempt counts and timeouts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let prefix = FieldMetadata::new(
            "volume identifier prefix",
            "QM_VOLUME_ID_PREFIX",
            "volume_id_prefix",
            "core",
        );
        if self.volume_id_prefix.trim().is_empty() {
            return Err(prefix.missing());
        }
        if !self
            .volume_id_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric())
        {
            return Err(prefix.invalid("must be ASCII letters and digits"));
        }
        require_positive(
            u64::from(self.max_identifier_attempts),
            &FieldMetadata::new(
                "identifier attempt limit",
                "QM_MAX_IDENTIFIER_ATTEMPTS",
                "max_identifier_attempts",
                "core",
            ),
        )?;
        require_positive(
            self.backend_timeout_secs,
            &FieldMetadata::new(
                "backend timeout",
                "QM_BACKEND_TIMEOUT_SECS",
                "backend_timeout_secs",
                "core",
            ),
        )
    }
}

impl ProvisionerConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("quartermaster")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Timeout applied to each HTTP request.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when the endpoint is empty and
    /// [`ConfigError::InvalidValue`] for non-HTTP endpoints, blank tokens,
    /// or a zero timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = FieldMetadata::new(
            "provisioner endpoint",
            "QM_PROVISIONER_ENDPOINT",
            "endpoint",
            "provisioner",
        );
        let trimmed = self.endpoint.trim();
        if trimmed.is_empty() {
            return Err(endpoint.missing());
        }
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(endpoint.invalid("must be an http:// or https:// URL"));
        }
        if self
            .auth_token
            .as_deref()
            .is_some_and(|token| token.trim().is_empty())
        {
            return Err(FieldMetadata::new(
                "provisioner auth token",
                "QM_PROVISIONER_AUTH_TOKEN",
                "auth_token",
                "provisioner",
            )
            .invalid("must not be blank when set"));
        }
        require_positive(
            self.request_timeout_secs,
            &FieldMetadata::new(
                "provisioner request timeout",
                "QM_PROVISIONER_REQUEST_TIMEOUT_SECS",
                "request_timeout_secs",
                "provisioner",
            ),
        )
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is present but unusable.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
