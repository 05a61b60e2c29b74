//! Token cost from local session logs.
//!
//! | Provider | Logs |
//! |----------|------|
//! | Codex | `$CODEX_HOME/sessions/**/*.jsonl` |
//! | Claude | `$CLAUDE_CONFIG_DIR/projects/**/*.jsonl`, else `~/.claude/projects` and `~/.config/claude/projects` |

pub mod cache;
pub mod logs;
pub mod pricing;
pub mod scanner;

use std::path::PathBuf;

use usagebar_core::ProviderKind;
use usagebar_fetch::ProbeContext;
use usagebar_providers::{claude, codex};

pub use cache::CostUsageCache;
pub use logs::{ParsedFile, SummaryRow, UsageRow};
pub use pricing::{ModelPrice, TokenCounts};
pub use scanner::{CostScanner, WINDOW_DAYS, aggregate};

use crate::error::StoreError;

/// Log format family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFamily {
    /// Codex session rollouts.
    Codex,
    /// Claude project transcripts.
    Claude,
}

/// Which entries a cost report counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderFilter {
    /// Codex sessions.
    Codex,
    /// Every Claude entry.
    Claude,
    /// Claude entries except those billed through Vertex AI (`model@version`).
    ClaudeExcludingVertex,
}

impl ProviderFilter {
    /// Filter for a provider. Claude excludes Vertex traffic when the
    /// Vertex AI provider is enabled, so that spend is not shown twice.
    pub fn for_provider(kind: ProviderKind, vertex_enabled: bool) -> Result<Self, StoreError> {
        match kind {
            ProviderKind::Codex => Ok(Self::Codex),
            ProviderKind::Claude if vertex_enabled => Ok(Self::ClaudeExcludingVertex),
            ProviderKind::Claude => Ok(Self::Claude),
            other => Err(StoreError::CostUnsupported(other.display_name().to_string())),
        }
    }

    /// Provider the report belongs to.
    pub fn provider(self) -> ProviderKind {
        match self {
            Self::Codex => ProviderKind::Codex,
            Self::Claude | Self::ClaudeExcludingVertex => ProviderKind::Claude,
        }
    }

    /// Log family scanned.
    pub fn family(self) -> LogFamily {
        match self {
            Self::Codex => LogFamily::Codex,
            Self::Claude | Self::ClaudeExcludingVertex => LogFamily::Claude,
        }
    }

    /// True if a row with `model` counts.
    pub fn accepts(self, model: Option<&str>) -> bool {
        match self {
            Self::ClaudeExcludingVertex => !model.is_some_and(|m| m.contains('@')),
            Self::Codex | Self::Claude => true,
        }
    }
}

/// Log directories per family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CostRoots {
    /// Codex session directories.
    pub codex: Vec<PathBuf>,
    /// Claude project directories.
    pub claude: Vec<PathBuf>,
}

impl CostRoots {
    /// Resolves directories from the environment and home of `ctx`.
    pub fn from_context(ctx: &ProbeContext) -> Self {
        let codex: Vec<PathBuf> = codex::auth::codex_home(ctx)
            .map(|home| home.join("sessions"))
            .into_iter()
            .collect();

        let mut claude: Vec<PathBuf> = claude::config_dir(ctx)
            .map(|dir| dir.join("projects"))
            .into_iter()
            .collect();
        if ctx.env_var(claude::config::CLAUDE_CONFIG_DIR_ENV).is_none() {
            if let Some(home) = ctx.home_dir() {
                claude.push(home.join(".config").join("claude").join("projects"));
            }
        }

        Self { codex, claude }
    }

    /// Directories for a family.
    pub fn for_family(&self, family: LogFamily) -> &[PathBuf] {
        match family {
            LogFamily::Codex => &self.codex,
            LogFamily::Claude => &self.claude,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_filter_for_provider() {
        assert_eq!(ProviderFilter::for_provider(ProviderKind::Claude, true).unwrap(), ProviderFilter::ClaudeExcludingVertex);
        assert_eq!(ProviderFilter::for_provider(ProviderKind::Claude, false).unwrap(), ProviderFilter::Claude);
        assert!(matches!(
            ProviderFilter::for_provider(ProviderKind::Gemini, false),
            Err(StoreError::CostUnsupported(_))
        ));
        assert!(!ProviderFilter::ClaudeExcludingVertex.accepts(Some("claude-opus-4@20250514")));
        assert!(ProviderFilter::ClaudeExcludingVertex.accepts(None));
    }

    #[test]
    fn test_roots_from_context() {
        let ctx = ProbeContext::builder()
            .home("/home/dev")
            .env(HashMap::from([("CODEX_HOME".to_string(), "/opt/codex".to_string())]))
            .build()
            .unwrap();
        let roots = CostRoots::from_context(&ctx);
        assert_eq!(roots.codex, vec![PathBuf::from("/opt/codex/sessions")]);
        assert_eq!(
            roots.claude,
            vec![
                PathBuf::from("/home/dev/.claude/projects"),
                PathBuf::from("/home/dev/.config/claude/projects"),
            ]
        );
    }
}
