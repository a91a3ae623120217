//! Provisioning parameters passed to the engine as `-var` assignments.
//!
//! The same parameter set is used to plan the machine and, later, to destroy
//! it. [`ProvisioningParameters::engine_variables`] is the single place that
//! decides which variables are emitted and in which order, so creation and
//! teardown cannot drift apart.

use std::ffi::OsString;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

/// Engine variable carrying the IBM Cloud API key.
pub const API_KEY_VAR: &str = "ibmcloud_api_key";
/// Engine variable carrying the Power Virtual Server zone.
pub const ZONE_VAR: &str = "powervs_zone";
/// Engine variable carrying the resource name prefix.
pub const PREFIX_VAR: &str = "prefix";
/// Engine variable carrying the OS image name.
pub const OS_IMAGE_VAR: &str = "powervs_os_image_name";
/// Engine variable carrying the machine type.
pub const SERVER_TYPE_VAR: &str = "powervs_server_type";
/// Engine variable carrying the processor count.
pub const PROCESSORS_VAR: &str = "powervs_number_of_processors";
/// Engine variable carrying the memory size in GB.
pub const MEMORY_VAR: &str = "powervs_memory_size";
/// Engine variable carrying the base64-encoded user-data payload.
pub const USER_DATA_VAR: &str = "powervs_user_data";

/// Errors raised while assembling provisioning parameters.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ParameterError {
    /// Raised when a required field is empty after trimming.
    #[error("missing or empty field: {0}")]
    MissingField(String),
}

/// Optional cloud-init user-data payload.
///
/// `Blank` keeps whitespace-only input verbatim so that a persisted record
/// reproduces exactly what the caller supplied, while still contributing no
/// engine variable.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum UserData {
    /// No payload was supplied.
    #[default]
    Absent,
    /// A payload was supplied but is empty or whitespace only.
    Blank(String),
    /// A payload with content.
    Present(String),
}

impl UserData {
    /// Classifies a raw optional payload.
    #[must_use]
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw {
            None => Self::Absent,
            Some(text) if text.trim().is_empty() => Self::Blank(text.to_owned()),
            Some(text) => Self::Present(text.to_owned()),
        }
    }

    /// Returns the raw payload, or an empty string when absent.
    #[must_use]
    pub fn raw(&self) -> &str {
        match self {
            Self::Absent => "",
            Self::Blank(text) | Self::Present(text) => text,
        }
    }

    /// Returns the base64 encoding of the payload when it has content.
    #[must_use]
    pub fn encoded(&self) -> Option<String> {
        match self {
            Self::Present(text) => Some(encode_payload(text)),
            Self::Absent | Self::Blank(_) => None,
        }
    }
}

/// Encodes arbitrary payload text with the standard padded base64 alphabet.
#[must_use]
pub fn encode_payload(payload: &str) -> String {
    STANDARD.encode(payload.as_bytes())
}

/// Full parameter set for one machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisioningParameters {
    /// IBM Cloud API key used by the engine's provider.
    pub api_key: String,
    /// Power Virtual Server zone (for example `lon04`).
    pub zone: String,
    /// Prefix applied to every created resource name.
    pub prefix: String,
    /// Boot image name (for example `RHEL9-SP2`).
    pub os_image_name: String,
    /// Machine type (for example `s922`).
    pub server_type: String,
    /// Number of processors, passed through as text.
    pub number_of_processors: String,
    /// Memory size in GB, passed through as text.
    pub memory_size: String,
    /// Optional cloud-init payload.
    pub user_data: UserData,
}

impl ProvisioningParameters {
    /// Starts a builder for [`ProvisioningParameters`].
    #[must_use]
    pub fn builder() -> ProvisioningParametersBuilder {
        ProvisioningParametersBuilder::new()
    }

    /// Checks that every required field carries a value.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError::MissingField`] naming the first empty field.
    pub fn validate(&self) -> Result<(), ParameterError> {
        for (name, value) in self.required_fields() {
            if value.trim().is_empty() {
                return Err(ParameterError::MissingField(name.to_owned()));
            }
        }
        Ok(())
    }

    /// Returns the `(variable, value)` pairs handed to the engine, in a fixed
    /// order. The user-data variable is last and only present when the payload
    /// has content; its value is base64 encoded.
    #[must_use]
    pub fn engine_variables(&self) -> Vec<(&'static str, String)> {
        let mut vars = self
            .required_fields()
            .into_iter()
            .map(|(name, value)| (name, value.to_owned()))
            .collect::<Vec<_>>();
        if let Some(encoded) = self.user_data.encoded() {
            vars.push((USER_DATA_VAR, encoded));
        }
        vars
    }

    /// Renders [`Self::engine_variables`] as `-var=name=value` arguments.
    #[must_use]
    pub fn var_args(&self) -> Vec<OsString> {
        self.engine_variables()
            .into_iter()
            .map(|(name, value)| OsString::from(format!("-var={name}={value}")))
            .collect()
    }

    fn required_fields(&self) -> [(&'static str, &str); 7] {
        [
            (API_KEY_VAR, self.api_key.as_str()),
            (ZONE_VAR, self.zone.as_str()),
            (PREFIX_VAR, self.prefix.as_str()),
            (OS_IMAGE_VAR, self.os_image_name.as_str()),
            (SERVER_TYPE_VAR, self.server_type.as_str()),
            (PROCESSORS_VAR, self.number_of_processors.as_str()),
            (MEMORY_VAR, self.memory_size.as_str()),
        ]
    }
}

/// Builder for [`ProvisioningParameters`] that trims required inputs and
/// validates on construction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProvisioningParametersBuilder {
    api_key: String,
    zone: String,
    prefix: String,
    os_image_name: String,
    server_type: String,
    number_of_processors: String,
    memory_size: String,
    user_data: Option<String>,
}

impl ProvisioningParametersBuilder {
    /// Creates an empty builder; fields must be populated before build.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key.
    #[must_use]
    pub fn api_key(mut self, value: impl Into<String>) -> Self {
        self.api_key = value.into();
        self
    }

    /// Sets the zone.
    #[must_use]
    pub fn zone(mut self, value: impl Into<String>) -> Self {
        self.zone = value.into();
        self
    }

    /// Sets the resource name prefix.
    #[must_use]
    pub fn prefix(mut self, value: impl Into<String>) -> Self {
        self.prefix = value.into();
        self
    }

    /// Sets the OS image name.
    #[must_use]
    pub fn os_image_name(mut self, value: impl Into<String>) -> Self {
        self.os_image_name = value.into();
        self
    }

    /// Sets the machine type.
    #[must_use]
    pub fn server_type(mut self, value: impl Into<String>) -> Self {
        self.server_type = value.into();
        self
    }

    /// Sets the processor count.
    #[must_use]
    pub fn number_of_processors(mut self, value: impl Into<String>) -> Self {
        self.number_of_processors = value.into();
        self
    }

    /// Sets the memory size.
    #[must_use]
    pub fn memory_size(mut self, value: impl Into<String>) -> Self {
        self.memory_size = value.into();
        self
    }

    /// Sets the optional user-data payload. The payload is kept verbatim.
    #[must_use]
    pub fn user_data(mut self, value: Option<String>) -> Self {
        self.user_data = value;
        self
    }

    /// Builds and validates the parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError::MissingField`] when a required field is empty.
    pub fn build(self) -> Result<ProvisioningParameters, ParameterError> {
        let params = ProvisioningParameters {
            api_key: self.api_key.trim().to_owned(),
            zone: self.zone.trim().to_owned(),
            prefix: self.prefix.trim().to_owned(),
            os_image_name: self.os_image_name.trim().to_owned(),
            server_type: self.server_type.trim().to_owned(),
            number_of_processors: self.number_of_processors.trim().to_owned(),
            memory_size: self.memory_size.trim().to_owned(),
            user_data: UserData::from_raw(self.user_data.as_deref()),
        };
        params.validate()?;
        Ok(params)
    }
}
