//! Engine configuration.

use std::collections::BTreeMap;
use std::path::Path;

use sayso_kws::{KeywordConfig, KwsConfig, DEFAULT_THRESHOLD};
use sayso_resolve::{CollisionPolicy, MatcherConfig};
use sayso_vad::VadConfig;

/// The wake and control keywords the router ships with.
pub mod keywords {
    /// Wake keywords that open a capture window.
    pub const OPEN: &str = "open";
    pub const CLICK: &str = "click";
    /// Abort keywords.
    pub const STOP: &str = "stop";
    pub const CANCEL: &str = "cancel";
    /// Emit-only keyword.
    pub const HELP: &str = "help";

    pub const ALL: [&str; 5] = [OPEN, CLICK, STOP, CANCEL, HELP];
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub collision_policy: CollisionPolicy,
    pub fuzzy_threshold: f32,
    pub fuzzy_margin: f32,
    /// Per-keyword detection threshold overrides; unlisted keywords use the
    /// spotter default.
    pub kws_thresholds: BTreeMap<String, f32>,
    /// How long a capture window may stay open without a speech end.
    pub capture_timeout_ms: i64,
    /// Delay between proposing an action and executing it, giving the UI
    /// time to highlight the target.
    pub highlight_ms: i64,
    /// Silence duration that ends an utterance.
    pub vad_silence_ms: i64,
    /// Selectors excluded from indexing page-wide.
    pub global_deny_selectors: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            collision_policy: CollisionPolicy::Disambiguate,
            fuzzy_threshold: 0.7,
            fuzzy_margin: 0.15,
            kws_thresholds: BTreeMap::new(),
            capture_timeout_ms: 5000,
            highlight_ms: 300,
            vad_silence_ms: 1000,
            global_deny_selectors: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn matcher_config(&self) -> MatcherConfig {
        MatcherConfig {
            fuzzy_threshold: self.fuzzy_threshold,
            fuzzy_margin: self.fuzzy_margin,
            collision_policy: self.collision_policy,
        }
    }

    pub fn vad_config(&self) -> VadConfig {
        VadConfig {
            silence_hold_ms: self.vad_silence_ms,
            ..VadConfig::default()
        }
    }

    /// Spotter configuration for the standard keyword set, applying any
    /// per-keyword threshold overrides.
    pub fn kws_config(&self, model_dir: impl AsRef<Path>) -> KwsConfig {
        KwsConfig {
            model_dir: model_dir.as_ref().to_path_buf(),
            keywords: keywords::ALL
                .iter()
                .map(|name| {
                    KeywordConfig::new(*name).with_threshold(
                        self.kws_thresholds
                            .get(*name)
                            .copied()
                            .unwrap_or(DEFAULT_THRESHOLD),
                    )
                })
                .collect(),
        }
    }
}
