//! When to ask the device for its routing state.
//!
//! Two independent behaviours can each be switched on:
//!
//! - **automatic** – query the device after every connect and every route
//!   change, so drift between the device and the local cache is caught early.
//! - **interactive** – offer the caller a manual "refresh" action.
//!
//! The four combinations are modelled as an enum so that only meaningful
//! values exist; the named accessors replace flag masking.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Returned when a fetch policy name is not recognised.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown fetch policy '{0}' (expected never, auto, interactive or always)")]
pub struct ParsePolicyError(pub String);

/// Fetch policy for the routing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FetchPolicy {
    /// Never query the device.
    Never,
    /// Query after connect and after route changes.
    Automatic,
    /// Only query when the caller asks for it.
    Interactive,
    /// Automatic and interactive together.
    #[default]
    Always,
}

impl FetchPolicy {
    /// Builds the policy from its two flags.
    pub fn from_flags(automatic: bool, interactive: bool) -> Self {
        match (automatic, interactive) {
            (false, false) => FetchPolicy::Never,
            (true, false) => FetchPolicy::Automatic,
            (false, true) => FetchPolicy::Interactive,
            (true, true) => FetchPolicy::Always,
        }
    }

    /// Whether connects and route changes trigger a refresh.
    pub fn refreshes_automatically(self) -> bool {
        matches!(self, FetchPolicy::Automatic | FetchPolicy::Always)
    }

    /// Whether a manual refresh action should be exposed to the caller.
    pub fn offers_manual_refresh(self) -> bool {
        matches!(self, FetchPolicy::Interactive | FetchPolicy::Always)
    }

    /// The spelling written to the configuration file.
    pub fn as_config_str(self) -> &'static str {
        match self {
            FetchPolicy::Never => "never",
            FetchPolicy::Automatic => "auto",
            FetchPolicy::Interactive => "interactive",
            FetchPolicy::Always => "always",
        }
    }

    /// Parses a configuration value by prefix, case-insensitively.
    ///
    /// `never…`, `auto…` and `inter…` select their policy; any other value
    /// means [`FetchPolicy::Always`].
    pub fn from_config_str(value: &str) -> Self {
        let value = value.trim().to_ascii_lowercase();
        if value.starts_with("never") {
            FetchPolicy::Never
        } else if value.starts_with("auto") {
            FetchPolicy::Automatic
        } else if value.starts_with("inter") {
            FetchPolicy::Interactive
        } else {
            FetchPolicy::Always
        }
    }
}

impl fmt::Display for FetchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_config_str())
    }
}

impl FromStr for FetchPolicy {
    type Err = ParsePolicyError;

    /// Strict parsing for command-line input.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" => Ok(FetchPolicy::Never),
            "auto" | "automatic" => Ok(FetchPolicy::Automatic),
            "interactive" => Ok(FetchPolicy::Interactive),
            "always" => Ok(FetchPolicy::Always),
            _ => Err(ParsePolicyError(s.to_string())),
        }
    }
}
