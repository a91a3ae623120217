//! Configuration loading via `ortho-config`.

use std::env;
use std::fmt;

use ortho_config::OrthoConfig;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::engine::DEFAULT_TOFU_BIN;
use crate::params::{ParameterError, ProvisioningParameters};

/// Program name handed to the loader in place of real CLI arguments.
const LOADER_ARGV0: &str = "powervs-vm";

/// Provisioning inputs merged from defaults, configuration files, and
/// `POWERVS_*` environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "POWERVS",
    discovery(
        app_name = "powervs-vm",
        env_var = "POWERVS_CONFIG_PATH",
        config_file_name = "powervs-vm.toml",
        dotfile_name = ".powervs-vm.toml",
        project_file_name = "powervs-vm.toml"
    )
)]
pub struct ProvisionConfig {
    /// IBM Cloud API key handed to the engine's provider.
    #[ortho_config(default = String::new())]
    #[serde(deserialize_with = "scalar_text")]
    pub ibmcloud_api_key: String,
    /// Power Virtual Server zone, for example `lon04`.
    #[ortho_config(default = String::new())]
    #[serde(deserialize_with = "scalar_text")]
    pub zone: String,
    /// Prefix applied to every created resource name.
    #[ortho_config(default = String::new())]
    #[serde(deserialize_with = "scalar_text")]
    pub prefix: String,
    /// Boot image name, for example `RHEL9-SP2`.
    #[ortho_config(default = String::new())]
    #[serde(deserialize_with = "scalar_text")]
    pub os_image_name: String,
    /// Machine type, for example `s922`.
    #[ortho_config(default = String::new())]
    #[serde(deserialize_with = "scalar_text")]
    pub server_type: String,
    /// Number of processors to allocate.
    #[ortho_config(default = String::new())]
    #[serde(deserialize_with = "scalar_text")]
    pub number_of_processors: String,
    /// Memory size in GB.
    #[ortho_config(default = String::new())]
    #[serde(deserialize_with = "scalar_text")]
    pub memory_size: String,
    /// Optional cloud-init payload applied on first boot.
    #[serde(default, deserialize_with = "optional_scalar_text")]
    pub user_data: Option<String>,
    /// Engine executable. Defaults to `tofu`.
    #[ortho_config(default = DEFAULT_TOFU_BIN.to_owned())]
    #[serde(deserialize_with = "scalar_text")]
    pub tofu_bin: String,
}

/// Engine settings needed by teardown, which has no provisioning inputs of
/// its own.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "POWERVS",
    discovery(
        app_name = "powervs-vm",
        env_var = "POWERVS_CONFIG_PATH",
        config_file_name = "powervs-vm.toml",
        dotfile_name = ".powervs-vm.toml",
        project_file_name = "powervs-vm.toml"
    )
)]
pub struct EngineConfig {
    /// Engine executable. Defaults to `tofu`.
    #[ortho_config(default = DEFAULT_TOFU_BIN.to_owned())]
    #[serde(deserialize_with = "scalar_text")]
    pub tofu_bin: String,
}

/// Environment variable carrying the user-data payload.
const USER_DATA_ENV: &str = "POWERVS_USER_DATA";

/// Accepts any scalar a configuration layer produced and renders it as text.
///
/// File formats may type `memory_size = 4` as a number. Values set in the
/// environment are re-read verbatim by [`ProvisionConfig::overlay_raw_env`]
/// because the environment layer also guesses types, turning `04` into `4`.
struct ScalarText;

impl Visitor<'_> for ScalarText {
    type Value = String;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a string, number, or boolean")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        Ok(value.to_owned())
    }

    fn visit_string<E: de::Error>(self, value: String) -> Result<Self::Value, E> {
        Ok(value)
    }

    fn visit_bool<E: de::Error>(self, value: bool) -> Result<Self::Value, E> {
        Ok(value.to_string())
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
        Ok(value.to_string())
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        Ok(value.to_string())
    }

    fn visit_i128<E: de::Error>(self, value: i128) -> Result<Self::Value, E> {
        Ok(value.to_string())
    }

    fn visit_u128<E: de::Error>(self, value: u128) -> Result<Self::Value, E> {
        Ok(value.to_string())
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
        Ok(value.to_string())
    }
}

fn scalar_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(ScalarText)
}

fn optional_scalar_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Text(String);

    impl<'de> Deserialize<'de> for Text {
        fn deserialize<T: Deserializer<'de>>(deserializer: T) -> Result<Self, T::Error> {
            scalar_text(deserializer).map(Text)
        }
    }

    Option::<Text>::deserialize(deserializer).map(|text| text.map(|Text(value)| value))
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

impl ProvisionConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to {LOADER_ARGV0}.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        let mut config = Self::load_from_iter([std::ffi::OsString::from(LOADER_ARGV0)])
            .map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.overlay_raw_env(&|key| env::var(key).ok());
        Ok(config)
    }

    /// Replaces every field set in the environment with the variable's exact
    /// text, undoing the type guessing of the layered loader.
    fn overlay_raw_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        let text_fields = [
            ("POWERVS_IBMCLOUD_API_KEY", &mut self.ibmcloud_api_key),
            ("POWERVS_ZONE", &mut self.zone),
            ("POWERVS_PREFIX", &mut self.prefix),
            ("POWERVS_OS_IMAGE_NAME", &mut self.os_image_name),
            ("POWERVS_SERVER_TYPE", &mut self.server_type),
            ("POWERVS_NUMBER_OF_PROCESSORS", &mut self.number_of_processors),
            ("POWERVS_MEMORY_SIZE", &mut self.memory_size),
            ("POWERVS_TOFU_BIN", &mut self.tofu_bin),
        ];
        for (env_var, field) in text_fields {
            if let Some(raw) = lookup(env_var) {
                *field = raw;
            }
        }
        if let Some(raw) = lookup(USER_DATA_ENV) {
            self.user_data = Some(raw);
        }
    }

    /// Builds validated [`ProvisioningParameters`] from the loaded values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required value is blank.
    pub fn as_parameters(&self) -> Result<ProvisioningParameters, ConfigError> {
        self.validate()?;
        ProvisioningParameters::builder()
            .api_key(&self.ibmcloud_api_key)
            .zone(&self.zone)
            .prefix(&self.prefix)
            .os_image_name(&self.os_image_name)
            .server_type(&self.server_type)
            .number_of_processors(&self.number_of_processors)
            .memory_size(&self.memory_size)
            .user_data(self.user_data.clone())
            .build()
            .map_err(ConfigError::from)
    }

    /// Checks required fields, naming the environment variable and file key
    /// that supply each one.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            (
                &self.ibmcloud_api_key,
                FieldMetadata::new(
                    "IBM Cloud API key",
                    "POWERVS_IBMCLOUD_API_KEY",
                    "ibmcloud_api_key",
                ),
            ),
            (
                &self.zone,
                FieldMetadata::new("Power Virtual Server zone", "POWERVS_ZONE", "zone"),
            ),
            (
                &self.prefix,
                FieldMetadata::new("resource name prefix", "POWERVS_PREFIX", "prefix"),
            ),
            (
                &self.os_image_name,
                FieldMetadata::new("OS image name", "POWERVS_OS_IMAGE_NAME", "os_image_name"),
            ),
            (
                &self.server_type,
                FieldMetadata::new("server type", "POWERVS_SERVER_TYPE", "server_type"),
            ),
            (
                &self.number_of_processors,
                FieldMetadata::new(
                    "number of processors",
                    "POWERVS_NUMBER_OF_PROCESSORS",
                    "number_of_processors",
                ),
            ),
            (
                &self.memory_size,
                FieldMetadata::new("memory size", "POWERVS_MEMORY_SIZE", "memory_size"),
            ),
            (
                &self.tofu_bin,
                FieldMetadata::new("engine executable", "POWERVS_TOFU_BIN", "tofu_bin"),
            ),
        ];
        for (value, metadata) in &fields {
            Self::require_field(value, metadata)?;
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Loads engine settings from defaults, files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from(LOADER_ARGV0)])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

impl From<ParameterError> for ConfigError {
    fn from(value: ParameterError) -> Self {
        match value {
            ParameterError::MissingField(field) => Self::MissingField(field),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::UserData;
    use rstest::{fixture, rstest};

    #[fixture]
    fn valid_config() -> ProvisionConfig {
        ProvisionConfig {
            ibmcloud_api_key: String::from("k1"),
            zone: String::from("lon04"),
            prefix: String::from("ci-test"),
            os_image_name: String::from("RHEL9-SP2"),
            server_type: String::from("s922"),
            number_of_processors: String::from("2"),
            memory_size: String::from("4"),
            user_data: None,
            tofu_bin: String::from(DEFAULT_TOFU_BIN),
        }
    }

    #[rstest]
    fn as_parameters_copies_every_field(valid_config: ProvisionConfig) {
        let params = ProvisionConfig {
            user_data: Some(String::from("#cloud-config\n")),
            ..valid_config
        }
        .as_parameters()
        .expect("config should be valid");

        assert_eq!(params.api_key, "k1");
        assert_eq!(params.zone, "lon04");
        assert_eq!(params.prefix, "ci-test");
        assert_eq!(params.os_image_name, "RHEL9-SP2");
        assert_eq!(params.server_type, "s922");
        assert_eq!(params.number_of_processors, "2");
        assert_eq!(params.memory_size, "4");
        assert_eq!(
            params.user_data,
            UserData::Present(String::from("#cloud-config\n"))
        );
    }

    #[rstest]
    #[case::api_key("POWERVS_IBMCLOUD_API_KEY", "ibmcloud_api_key")]
    #[case::zone("POWERVS_ZONE", "zone")]
    #[case::prefix("POWERVS_PREFIX", "prefix")]
    #[case::image("POWERVS_OS_IMAGE_NAME", "os_image_name")]
    #[case::server_type("POWERVS_SERVER_TYPE", "server_type")]
    #[case::processors("POWERVS_NUMBER_OF_PROCESSORS", "number_of_processors")]
    #[case::memory("POWERVS_MEMORY_SIZE", "memory_size")]
    #[case::tofu("POWERVS_TOFU_BIN", "tofu_bin")]
    fn validation_errors_are_actionable(
        valid_config: ProvisionConfig,
        #[case] env_var: &str,
        #[case] toml_key: &str,
    ) {
        let mut cfg = valid_config;
        let field = match toml_key {
            "ibmcloud_api_key" => &mut cfg.ibmcloud_api_key,
            "zone" => &mut cfg.zone,
            "prefix" => &mut cfg.prefix,
            "os_image_name" => &mut cfg.os_image_name,
            "server_type" => &mut cfg.server_type,
            "number_of_processors" => &mut cfg.number_of_processors,
            "memory_size" => &mut cfg.memory_size,
            _ => &mut cfg.tofu_bin,
        };
        *field = String::from("  ");

        let message = cfg
            .validate()
            .expect_err("blank field should fail validation")
            .to_string();
        assert!(message.contains(env_var), "missing env var: {message}");
        assert!(message.contains(toml_key), "missing TOML key: {message}");
        assert!(
            message.contains("powervs-vm.toml"),
            "missing file hint: {message}"
        );
    }

    #[rstest]
    fn blank_user_data_is_not_an_error(valid_config: ProvisionConfig) {
        let params = ProvisionConfig {
            user_data: Some(String::from("   ")),
            ..valid_config
        }
        .as_parameters()
        .expect("blank user data is optional");
        assert_eq!(params.user_data, UserData::Blank(String::from("   ")));
        assert!(params.user_data.encoded().is_none());
    }

    #[test]
    fn typed_scalars_are_read_as_text() {
        let config: ProvisionConfig = serde_json::from_value(serde_json::json!({
            "ibmcloud_api_key": "k1",
            "zone": "lon04",
            "prefix": true,
            "os_image_name": "RHEL9-SP2",
            "server_type": "s922",
            "number_of_processors": 0.25,
            "memory_size": 4,
            "user_data": 12345,
            "tofu_bin": "tofu"
        }))
        .expect("config should deserialize");

        assert_eq!(config.prefix, "true");
        assert_eq!(config.number_of_processors, "0.25");
        assert_eq!(config.memory_size, "4");
        assert_eq!(config.user_data.as_deref(), Some("12345"));
    }

    #[test]
    fn absent_user_data_deserializes_as_none() {
        let config: ProvisionConfig = serde_json::from_value(serde_json::json!({
            "ibmcloud_api_key": "k1",
            "zone": "lon04",
            "prefix": "ci-test",
            "os_image_name": "RHEL9-SP2",
            "server_type": "s922",
            "number_of_processors": "2",
            "memory_size": "4",
            "tofu_bin": "tofu"
        }))
        .expect("config should deserialize");

        assert_eq!(config.user_data, None);
    }

    #[rstest]
    fn environment_values_keep_their_exact_text(valid_config: ProvisionConfig) {
        let mut config = ProvisionConfig {
            number_of_processors: String::from("0.5"),
            memory_size: String::from("4"),
            prefix: String::from("123"),
            ..valid_config
        };
        let env = [
            ("POWERVS_NUMBER_OF_PROCESSORS", "0.50"),
            ("POWERVS_MEMORY_SIZE", "04"),
            ("POWERVS_PREFIX", "0123"),
            ("POWERVS_ZONE", "true"),
            ("POWERVS_USER_DATA", "12345"),
        ];

        config.overlay_raw_env(&|key| {
            env.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value).to_owned())
        });

        assert_eq!(config.number_of_processors, "0.50");
        assert_eq!(config.memory_size, "04");
        assert_eq!(config.prefix, "0123");
        assert_eq!(config.zone, "true");
        assert_eq!(config.user_data.as_deref(), Some("12345"));
        assert_eq!(config.ibmcloud_api_key, "k1", "unset variables keep loaded values");
    }
}
