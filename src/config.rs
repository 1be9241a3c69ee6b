//! `gcjoin.toml` analysis config loading.

use serde::{Deserialize, Serialize};

use std::path::Path;

use crate::{GcJoinError, GcJoinResult};

/// What the replayer does with a join whose end never made it into the trace.
///
/// The collector's trace routinely stops between the start and end of the final `done`
/// join. A join-end dropped mid-stream is indistinguishable from that when it happens to
/// be the last pair in a heap's list, so the tolerance is named rather than implicit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrailingStagePolicy {
    /// Drop an unterminated trailing `done` join; anything else is an error.
    #[default]
    DoneOnly,
    /// Drop any unterminated trailing join.
    Any,
    /// Every join must be terminated.
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct AnalysisConfig {
    #[serde(default)]
    pub trailing_stage_policy: TrailingStagePolicy,

    /// Relative tolerance when checking the absolute clock against the relative clock.
    #[serde(default = "default_clock_rel_tolerance")]
    pub clock_rel_tolerance: f64,

    /// Absolute tolerance (ms) for the same check, so near-zero spans compare equal.
    #[serde(default = "default_clock_abs_tolerance")]
    pub clock_abs_tolerance: f64,
}

fn default_clock_rel_tolerance() -> f64 {
    1e-9
}

fn default_clock_abs_tolerance() -> f64 {
    1e-6
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            trailing_stage_policy: TrailingStagePolicy::default(),
            clock_rel_tolerance: default_clock_rel_tolerance(),
            clock_abs_tolerance: default_clock_abs_tolerance(),
        }
    }
}

impl AnalysisConfig {
    pub fn from_toml_str(s: &str) -> GcJoinResult<Self> {
        let cfg = toml::from_str::<AnalysisConfig>(s)?;
        if !(cfg.clock_rel_tolerance >= 0.0 && cfg.clock_abs_tolerance >= 0.0) {
            return Err(GcJoinError::Config(format!(
                "clock tolerances must be non-negative (rel {}, abs {})",
                cfg.clock_rel_tolerance, cfg.clock_abs_tolerance
            )));
        }
        Ok(cfg)
    }

    /// Strict load: any read or parse problem is an error.
    pub fn load(path: &Path) -> GcJoinResult<Self> {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    pub fn load_optional(path: &Path) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(GcJoinError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                Self::default()
            }
            Err(err) => {
                tracing::warn!("failed to load config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn with_trailing_stage_policy(mut self, policy: TrailingStagePolicy) -> Self {
        self.trailing_stage_policy = policy;
        self
    }

    /// Close when within either tolerance.
    pub fn clocks_agree(&self, a: f64, b: f64) -> bool {
        let diff = (a - b).abs();
        diff <= self.clock_abs_tolerance || diff <= self.clock_rel_tolerance * a.abs().max(b.abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_workspace(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("gcjoin-config-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = temp_workspace("missing");
        let cfg = AnalysisConfig::load_optional(&dir.join("gcjoin.toml"));
        assert_eq!(cfg, AnalysisConfig::default());
        assert_eq!(cfg.trailing_stage_policy, TrailingStagePolicy::DoneOnly);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = temp_workspace("partial");
        let path = dir.join("gcjoin.toml");
        std::fs::write(&path, "trailing_stage_policy = \"strict\"\n").unwrap();
        let cfg = AnalysisConfig::load_optional(&path);
        assert_eq!(cfg.trailing_stage_policy, TrailingStagePolicy::Strict);
        assert_eq!(cfg.clock_rel_tolerance, 1e-9);
    }

    #[test]
    fn invalid_file_falls_back_to_defaults() {
        let dir = temp_workspace("invalid");
        let path = dir.join("gcjoin.toml");
        std::fs::write(&path, "trailing_stage_policy = \"sometimes\"\n").unwrap();
        assert_eq!(AnalysisConfig::load_optional(&path), AnalysisConfig::default());
        assert!(AnalysisConfig::from_toml_str("trailing_stage_policy = \"sometimes\"").is_err());
    }

    #[test]
    fn strict_load_reports_missing_and_invalid_files() {
        let dir = temp_workspace("strict");
        let path = dir.join("gcjoin.toml");
        assert!(matches!(
            AnalysisConfig::load(&path),
            Err(GcJoinError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound
        ));
        std::fs::write(&path, "clock_rel_tolerance = \"tight\"\n").unwrap();
        assert!(matches!(AnalysisConfig::load(&path), Err(GcJoinError::Toml(_))));
        std::fs::write(&path, "trailing_stage_policy = \"any\"\n").unwrap();
        assert_eq!(
            AnalysisConfig::load(&path).unwrap().trailing_stage_policy,
            TrailingStagePolicy::Any
        );
    }

    #[test]
    fn negative_tolerance_is_rejected() {
        let err = AnalysisConfig::from_toml_str("clock_abs_tolerance = -1.0").unwrap_err();
        assert!(matches!(err, GcJoinError::Config(_)));
    }

    #[test]
    fn clocks_agree_uses_either_tolerance() {
        let cfg = AnalysisConfig::default();
        assert!(cfg.clocks_agree(3.0, 3.0 + 1e-7));
        assert!(cfg.clocks_agree(1e6, 1e6 + 1e-4));
        assert!(!cfg.clocks_agree(3.0, 3.1));
    }
}
