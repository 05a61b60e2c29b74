//! Provider kinds and per-provider account identity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ============================================================================
// Provider Kind
// ============================================================================

/// Monitored AI coding-assistant providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI Codex
    Codex,
    /// Anthropic Claude
    Claude,
    /// Google Gemini
    Gemini,
    /// Google Cloud Vertex AI
    VertexAI,
}

impl ProviderKind {
    /// Returns the display name for this provider.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Codex => "Codex",
            Self::Claude => "Claude",
            Self::Gemini => "Gemini",
            Self::VertexAI => "Vertex AI",
        }
    }

    /// Returns all provider kinds in display order.
    pub fn all() -> &'static [ProviderKind] {
        &[Self::Codex, Self::Claude, Self::Gemini, Self::VertexAI]
    }

    /// Returns the CLI name for this provider (lowercase, no spaces).
    pub fn cli_name(&self) -> &'static str {
        match self {
            Self::Codex => "codex",
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::VertexAI => "vertexai",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for ProviderKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        match needle.as_str() {
            "codex" | "openai" => Ok(Self::Codex),
            "claude" | "anthropic" => Ok(Self::Claude),
            "gemini" => Ok(Self::Gemini),
            "vertexai" | "vertex" | "vertex-ai" => Ok(Self::VertexAI),
            _ => Err(CoreError::UnknownProvider(s.to_string())),
        }
    }
}

// ============================================================================
// Login Method
// ============================================================================

/// How the account behind a snapshot authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginMethod {
    /// Signed in through the provider's CLI (ChatGPT / Claude account).
    Cli,
    /// OAuth credentials on disk.
    OAuth,
    /// API key.
    ApiKey,
    /// Browser session cookies.
    BrowserCookies,
    /// Google application-default credentials.
    ApplicationDefault,
    /// A plan or method label reported verbatim by the source.
    Other(String),
}

impl LoginMethod {
    /// Returns a short human label.
    pub fn label(&self) -> &str {
        match self {
            Self::Cli => "CLI",
            Self::OAuth => "OAuth",
            Self::ApiKey => "API key",
            Self::BrowserCookies => "Browser cookies",
            Self::ApplicationDefault => "Application default credentials",
            Self::Other(label) => label,
        }
    }
}

impl fmt::Display for LoginMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Provider Identity
// ============================================================================

/// Account identity for one provider.
///
/// Identity is siloed: it belongs to exactly one snapshot of exactly one
/// provider and is never merged with another provider's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdentitySnapshot {
    /// The provider this identity belongs to.
    pub provider_id: ProviderKind,
    /// Account email.
    pub account_email: Option<String>,
    /// Organization or team name.
    pub account_organization: Option<String>,
    /// How the account authenticated.
    pub login_method: Option<LoginMethod>,
    /// Plan name (e.g. "Pro", "Plus").
    pub plan_name: Option<String>,
}

impl ProviderIdentitySnapshot {
    /// Creates an empty identity for a provider.
    pub fn new(provider_id: ProviderKind) -> Self {
        Self {
            provider_id,
            account_email: None,
            account_organization: None,
            login_method: None,
            plan_name: None,
        }
    }

    /// Sets the account email.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.account_email = Some(email.into());
        self
    }

    /// Sets the organization.
    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.account_organization = Some(org.into());
        self
    }

    /// Sets the login method.
    pub fn with_login_method(mut self, method: LoginMethod) -> Self {
        self.login_method = Some(method);
        self
    }

    /// Returns true if no identity field is known.
    pub fn is_empty(&self) -> bool {
        self.account_email.is_none()
            && self.account_organization.is_none()
            && self.login_method.is_none()
            && self.plan_name.is_none()
    }

    /// Case-insensitive email comparison used for account matching.
    pub fn email_matches(&self, expected: &str) -> bool {
        self.account_email
            .as_deref()
            .is_some_and(|email| email.trim().eq_ignore_ascii_case(expected.trim()))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_str() {
        assert_eq!("codex".parse::<ProviderKind>().unwrap(), ProviderKind::Codex);
        assert_eq!("Claude".parse::<ProviderKind>().unwrap(), ProviderKind::Claude);
        assert_eq!("vertex".parse::<ProviderKind>().unwrap(), ProviderKind::VertexAI);
        assert!("cursor".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_provider_serde_lowercase() {
        let json = serde_json::to_string(&ProviderKind::VertexAI).unwrap();
        assert_eq!(json, "\"vertexai\"");
        let back: ProviderKind = serde_json::from_str("\"gemini\"").unwrap();
        assert_eq!(back, ProviderKind::Gemini);
    }

    #[test]
    fn test_cli_names_round_trip() {
        for kind in ProviderKind::all() {
            assert_eq!(kind.cli_name().parse::<ProviderKind>().unwrap(), *kind);
        }
    }

    #[test]
    fn test_email_matches_ignores_case() {
        let identity = ProviderIdentitySnapshot::new(ProviderKind::Codex).with_email("A@X.com");
        assert!(identity.email_matches("a@x.com "));
        assert!(!identity.email_matches("b@x.com"));
        assert!(!ProviderIdentitySnapshot::new(ProviderKind::Codex).email_matches("a@x.com"));
    }
}
