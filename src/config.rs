//! Configuration loading via `ortho-config`.

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::bootstrap::{
    BootstrapOptions, DEFAULT_BUCKET_ENV_VAR, DEFAULT_INSTALL_ROOT, DEFAULT_SCRIPT_DIR,
    is_shell_word,
};

/// Accepted OpenSSH public key type prefixes.
const SSH_KEY_PREFIXES: [&str; 4] = ["ssh-rsa ", "ssh-ed25519 ", "ecdsa-sha2-", "sk-ssh-ed25519@"];

/// Stack settings derived from defaults, configuration files, environment
/// variables, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "BLOCKHOST",
    discovery(
        app_name = "blockhost",
        env_var = "BLOCKHOST_CONFIG_PATH",
        config_file_name = "blockhost.toml",
        dotfile_name = ".blockhost.toml",
        project_file_name = "blockhost.toml"
    )
)]
pub struct StackConfig {
    /// Invocation root the payload paths are relative to.
    #[ortho_config(default = ".".to_owned())]
    pub root_dir: String,
    /// Payload directory beneath the root. Its name is kept in the payload
    /// paths, so it also names the directory under the install root.
    #[ortho_config(default = DEFAULT_SCRIPT_DIR.to_owned())]
    pub source_dir: String,
    /// Directory on the instance that receives the payload.
    #[ortho_config(default = DEFAULT_INSTALL_ROOT.to_owned())]
    pub install_root: String,
    /// Environment variable exported with the bucket name.
    #[ortho_config(default = DEFAULT_BUCKET_ENV_VAR.to_owned())]
    pub bucket_env_var: String,
    /// Compute instance type.
    #[ortho_config(default = "t3.medium".to_owned())]
    pub instance_type: String,
    /// Owner account of the machine images to consider.
    #[ortho_config(default = "137112412989".to_owned())]
    pub image_owner: String,
    /// Name pattern of the machine images to consider; the most recent
    /// match wins.
    #[ortho_config(default = "amzn-ami-hvm-*".to_owned())]
    pub image_name_pattern: String,
    /// OpenSSH public key imported for remote shell access. Only stack
    /// definition requires it.
    pub ssh_public_key: Option<String>,
    /// Stop the bootstrap at the first failing step.
    #[ortho_config(default = false)]
    pub halt_on_step_failure: bool,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl StackConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to blockhost.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("blockhost")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Validates the settings that shape the bootstrap script. The SSH key
    /// is not needed to render a script, so it is not checked here.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when the payload or install
    /// directory is empty and [`ConfigError::Invalid`] when the bucket
    /// variable is not a shell variable name.
    pub fn validate_bootstrap(&self) -> Result<(), ConfigError> {
        let required = [
            (
                self.root_dir.as_str(),
                FieldMetadata::new("invocation root", "BLOCKHOST_ROOT_DIR", "root_dir"),
            ),
            (
                self.source_dir.as_str(),
                FieldMetadata::new("payload directory", "BLOCKHOST_SOURCE_DIR", "source_dir"),
            ),
            (
                self.install_root.as_str(),
                FieldMetadata::new(
                    "instance install root",
                    "BLOCKHOST_INSTALL_ROOT",
                    "install_root",
                ),
            ),
            (
                self.bucket_env_var.as_str(),
                FieldMetadata::new(
                    "bucket environment variable",
                    "BLOCKHOST_BUCKET_ENV_VAR",
                    "bucket_env_var",
                ),
            ),
        ];
        for (value, metadata) in &required {
            Self::require_field(value, metadata)?;
        }

        if !is_shell_word(self.bucket_env_var.trim()) {
            return Err(ConfigError::Invalid(format!(
                "bucket_env_var `{}` is not a valid shell variable name",
                self.bucket_env_var
            )));
        }
        Ok(())
    }

    /// Performs semantic validation for stack definition. Error messages
    /// name the environment variable and configuration key that supply each
    /// missing value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] when the SSH key is not an OpenSSH public
    /// key or [`validate_bootstrap`](Self::validate_bootstrap) rejects a value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ssh_public_key = self.public_key();
        Self::require_field(
            ssh_public_key,
            &FieldMetadata::new(
                "SSH public key",
                "BLOCKHOST_SSH_PUBLIC_KEY",
                "ssh_public_key",
            ),
        )?;
        self.validate_bootstrap()?;

        let required = [
            (
                self.instance_type.as_str(),
                FieldMetadata::new("instance type", "BLOCKHOST_INSTANCE_TYPE", "instance_type"),
            ),
            (
                self.image_owner.as_str(),
                FieldMetadata::new("image owner", "BLOCKHOST_IMAGE_OWNER", "image_owner"),
            ),
            (
                self.image_name_pattern.as_str(),
                FieldMetadata::new(
                    "image name pattern",
                    "BLOCKHOST_IMAGE_NAME_PATTERN",
                    "image_name_pattern",
                ),
            ),
        ];
        for (value, metadata) in &required {
            Self::require_field(value, metadata)?;
        }

        if !SSH_KEY_PREFIXES
            .iter()
            .any(|prefix| ssh_public_key.starts_with(prefix))
        {
            return Err(ConfigError::Invalid(String::from(
                "ssh_public_key must be an OpenSSH public key (for example `ssh-ed25519 AAAA...`)",
            )));
        }
        Ok(())
    }

    /// Trimmed SSH public key; empty when unset.
    #[must_use]
    pub fn public_key(&self) -> &str {
        self.ssh_public_key.as_deref().map_or("", str::trim)
    }

    /// Invocation root as a UTF-8 path.
    #[must_use]
    pub fn root_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.root_dir)
    }

    /// Payload directory as a UTF-8 path relative to the root.
    #[must_use]
    pub fn source_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.source_dir)
    }

    /// Bootstrap rendering options implied by this configuration.
    #[must_use]
    pub fn bootstrap_options(&self) -> BootstrapOptions {
        BootstrapOptions {
            install_root: self.install_root.trim().to_owned(),
            bucket_env_var: self.bucket_env_var.trim().to_owned(),
            script_dir: self
                .source_dir
                .trim()
                .trim_start_matches("./")
                .trim_end_matches('/')
                .to_owned(),
            halt_on_step_failure: self.halt_on_step_failure,
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
