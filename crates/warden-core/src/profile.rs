use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};

/// Provider credential handed to the external process (zeroized on drop, redacted in Debug).
#[derive(Clone)]
pub struct Credential(pub SecretString);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

impl<'de> Deserialize<'de> for Credential {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// One way of running the external process: which credential, model and
/// settings file it is started with. Profiles are tried in order of preference.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionProfile {
    pub name: String,
    /// Never serialized back out.
    #[serde(skip_serializing)]
    pub credentials: Option<Credential>,
    pub model_id: Option<String>,
    /// Path or name of a settings file passed to the process.
    pub settings_ref: Option<String>,
}

impl ExecutionProfile {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_settings(mut self, settings_ref: impl Into<String>) -> Self {
        self.settings_ref = Some(settings_ref.into());
        self
    }

    pub fn with_credentials(mut self, value: impl Into<String>) -> Self {
        self.credentials = Some(Credential::new(value));
        self
    }
}
