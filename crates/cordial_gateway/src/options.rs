//! Identify options shared by every shard of a group.

use cordial_error::{BuilderError, BuilderErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Connection properties reported in Identify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProperties {
    /// Operating system
    pub os: String,
    /// Library name
    pub browser: String,
    /// Library name
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "cordial".to_string(),
            device: "cordial".to_string(),
        }
    }
}

/// What a session sends when it identifies.
///
/// # Example
///
/// ```
/// use cordial_gateway::IdentifyOptionsBuilder;
///
/// let options = IdentifyOptionsBuilder::default()
///     .token("bot-token")
///     .intents(1u64 << 9)
///     .build()
///     .unwrap();
/// assert_eq!(*options.large_threshold(), 250);
/// ```
#[derive(Clone, PartialEq, derive_builder::Builder, derive_getters::Getters)]
#[builder(
    setter(into),
    build_fn(private, name = "build_internal", validate = "Self::validate")
)]
pub struct IdentifyOptions {
    /// Bot token
    token: String,
    /// Gateway intents bitset
    intents: u64,
    /// Member count above which offline members are omitted
    #[builder(default = "250")]
    large_threshold: u32,
    /// Initial presence
    #[builder(default, setter(strip_option))]
    presence: Option<Value>,
    /// Reported connection properties
    #[builder(default)]
    properties: ConnectionProperties,
}

impl std::fmt::Debug for IdentifyOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifyOptions")
            .field("token", &"[redacted]")
            .field("intents", &self.intents)
            .field("large_threshold", &self.large_threshold)
            .field("presence", &self.presence)
            .field("properties", &self.properties)
            .finish()
    }
}

impl IdentifyOptionsBuilder {
    fn validate(&self) -> Result<(), String> {
        match &self.token {
            Some(token) if token.trim().is_empty() => Err("token must not be empty".to_string()),
            _ => Ok(()),
        }
    }

    /// Build the options.
    ///
    /// # Errors
    ///
    /// Returns an error if the token or intents are missing, or the token is
    /// blank.
    #[track_caller]
    pub fn build(&self) -> Result<IdentifyOptions, BuilderError> {
        self.build_internal().map_err(|e| match e {
            IdentifyOptionsBuilderError::UninitializedField(field) => {
                BuilderError::new(BuilderErrorKind::MissingField(field.to_string()))
            }
            IdentifyOptionsBuilderError::ValidationError(reason) => {
                BuilderError::new(BuilderErrorKind::InvalidField {
                    field: "token".to_string(),
                    reason,
                })
            }
        })
    }
}
