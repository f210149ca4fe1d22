//! Strategy policy: glob-scoped rules for automatic conflict resolution
//!
//! The policy maps an item's remote path to a [`ConflictStrategy`]:
//! rules are evaluated in configuration order and the first matching glob
//! wins; the default strategy applies when nothing matches.
//!
//! ```yaml
//! conflicts:
//!   default_strategy: ask_user
//!   rules:
//!     - pattern: "/docs/**"
//!       strategy: keep_newer
//!     - pattern: "*.lock"
//!       strategy: keep_cloud
//! ```

use glob::Pattern;
use tracing::debug;

use nimbus_core::config::ConflictConfig;
use nimbus_core::domain::{ConflictInfo, ConflictStrategy, DomainError, RemotePath, Resolution};

/// One compiled rule
struct CompiledRule {
    pattern: Pattern,
    strategy: ConflictStrategy,
}

/// Glob-scoped strategy selection, first match wins
pub struct StrategyPolicy {
    rules: Vec<CompiledRule>,
    default_strategy: ConflictStrategy,
}

impl StrategyPolicy {
    /// Compiles the configured rules
    ///
    /// # Errors
    /// Returns [`DomainError::ValidationFailed`] for an invalid glob;
    /// configuration validation should have caught this earlier.
    pub fn from_config(config: &ConflictConfig) -> Result<Self, DomainError> {
        let rules = config
            .rules
            .iter()
            .map(|rule| {
                Pattern::new(&rule.pattern)
                    .map(|pattern| CompiledRule {
                        pattern,
                        strategy: rule.strategy,
                    })
                    .map_err(|e| DomainError::ValidationFailed {
                        field: "conflicts.rules".to_string(),
                        message: format!("invalid glob '{}': {}", rule.pattern, e),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            rules,
            default_strategy: config.default_strategy,
        })
    }

    /// Policy with no rules and the given default
    pub fn with_default(default_strategy: ConflictStrategy) -> Self {
        Self {
            rules: Vec::new(),
            default_strategy,
        }
    }

    /// Strategy applying to `path`: first matching rule, else the default
    pub fn strategy_for(&self, path: &RemotePath) -> ConflictStrategy {
        for rule in &self.rules {
            if rule.pattern.matches(path.as_str()) {
                debug!(
                    path = %path,
                    pattern = %rule.pattern,
                    strategy = %rule.strategy,
                    "Conflict rule matched"
                );
                return rule.strategy;
            }
        }
        self.default_strategy
    }

    /// Auto-selects a resolution for `conflict` under `strategy`
    ///
    /// Returns `None` for `AskUser` (never auto-resolves) and when the
    /// comparing strategies cannot produce a legal resolution. Ties in
    /// `KeepNewer`/`KeepLarger` break toward keeping local.
    pub fn select_resolution(
        strategy: ConflictStrategy,
        conflict: &ConflictInfo,
    ) -> Option<Resolution> {
        let resolution = match strategy {
            ConflictStrategy::AskUser => return None,
            ConflictStrategy::KeepLocal => Resolution::KeepLocal,
            ConflictStrategy::KeepCloud => Resolution::KeepCloud,
            ConflictStrategy::KeepBoth => Resolution::KeepBoth,
            ConflictStrategy::KeepNewer => {
                if conflict.local.modified_at >= conflict.remote.modified_at {
                    Resolution::KeepLocal
                } else {
                    Resolution::KeepCloud
                }
            }
            ConflictStrategy::KeepLarger => {
                if conflict.local.size_bytes >= conflict.remote.size_bytes {
                    Resolution::KeepLocal
                } else {
                    Resolution::KeepCloud
                }
            }
        };
        conflict.allows(resolution).then_some(resolution)
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use nimbus_core::config::ConflictRule;
    use nimbus_core::domain::{ConflictType, ItemKind, VersionInfo};

    use super::*;

    fn config(rules: Vec<(&str, ConflictStrategy)>) -> ConflictConfig {
        ConflictConfig {
            default_strategy: ConflictStrategy::AskUser,
            rules: rules
                .into_iter()
                .map(|(pattern, strategy)| ConflictRule {
                    pattern: pattern.to_string(),
                    strategy,
                })
                .collect(),
        }
    }

    fn conflict(local_newer_secs: i64, local_size: u64, remote_size: u64) -> ConflictInfo {
        let now = Utc::now();
        ConflictInfo::new(
            ConflictType::Content,
            VersionInfo {
                name: "a.txt".into(),
                kind: ItemKind::File,
                size_bytes: local_size,
                modified_at: now + Duration::seconds(local_newer_secs),
                hash: None,
            },
            VersionInfo {
                name: "a.txt".into(),
                kind: ItemKind::File,
                size_bytes: remote_size,
                modified_at: now,
                hash: None,
            },
        )
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let policy = StrategyPolicy::from_config(&config(vec![
            ("/docs/**", ConflictStrategy::KeepNewer),
            ("/docs/special/**", ConflictStrategy::KeepCloud),
        ]))
        .unwrap();

        // Both rules match, the first one in order applies
        let strategy = policy.strategy_for(&RemotePath::new("/docs/special/x.txt").unwrap());
        assert_eq!(strategy, ConflictStrategy::KeepNewer);
    }

    #[test]
    fn test_default_applies_when_nothing_matches() {
        let policy = StrategyPolicy::from_config(&config(vec![(
            "/docs/**",
            ConflictStrategy::KeepNewer,
        )]))
        .unwrap();
        let strategy = policy.strategy_for(&RemotePath::new("/photos/x.jpg").unwrap());
        assert_eq!(strategy, ConflictStrategy::AskUser);
    }

    #[test]
    fn test_invalid_glob_is_rejected() {
        let bad = config(vec![("[", ConflictStrategy::KeepLocal)]);
        assert!(StrategyPolicy::from_config(&bad).is_err());
    }

    #[test]
    fn test_ask_user_never_auto_resolves() {
        let c = conflict(10, 1, 2);
        assert!(StrategyPolicy::select_resolution(ConflictStrategy::AskUser, &c).is_none());
    }

    #[test]
    fn test_keep_newer_picks_sides() {
        let local_newer = conflict(10, 1, 1);
        assert_eq!(
            StrategyPolicy::select_resolution(ConflictStrategy::KeepNewer, &local_newer),
            Some(Resolution::KeepLocal)
        );
        let remote_newer = conflict(-10, 1, 1);
        assert_eq!(
            StrategyPolicy::select_resolution(ConflictStrategy::KeepNewer, &remote_newer),
            Some(Resolution::KeepCloud)
        );
    }

    #[test]
    fn test_keep_newer_tie_breaks_local() {
        let tied = conflict(0, 1, 1);
        assert_eq!(
            StrategyPolicy::select_resolution(ConflictStrategy::KeepNewer, &tied),
            Some(Resolution::KeepLocal)
        );
    }

    #[test]
    fn test_keep_larger_picks_sides_and_ties_local() {
        let local_larger = conflict(5, 200, 100);
        assert_eq!(
            StrategyPolicy::select_resolution(ConflictStrategy::KeepLarger, &local_larger),
            Some(Resolution::KeepLocal)
        );
        let remote_larger = conflict(5, 100, 200);
        assert_eq!(
            StrategyPolicy::select_resolution(ConflictStrategy::KeepLarger, &remote_larger),
            Some(Resolution::KeepCloud)
        );
        let tied = conflict(5, 100, 100);
        assert_eq!(
            StrategyPolicy::select_resolution(ConflictStrategy::KeepLarger, &tied),
            Some(Resolution::KeepLocal)
        );
    }

    #[test]
    fn test_direct_strategies_map_through() {
        let c = conflict(5, 1, 1);
        assert_eq!(
            StrategyPolicy::select_resolution(ConflictStrategy::KeepBoth, &c),
            Some(Resolution::KeepBoth)
        );
    }
}
