//! Configuration
//!
//! Scheduler tuning and the state behavior table, loaded from a TOML file at
//! `$XDG_CONFIG_HOME/choreographer/choreographer.toml`.
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. Environment variables
//! 2. TOML configuration file
//! 3. Default values
//!
//! A missing file is not an error. A file that exists but cannot be read or
//! parsed is.
//!
//! # Example Configuration
//!
//! ```toml
//! [scheduler]
//! transition_length = 24
//! retention_window = 3
//! blend_loops_by_default = false
//! root_bone = "hips"
//!
//! [scheduler.loop_blend_overrides]
//! idle_breathe = true
//!
//! [blink]
//! enabled = true
//! speed_multiplier = 1.5
//! inter_cycle_delay = 200
//!
//! [states.idle]
//! categories = ["idle", "idle_fidget"]
//! mode = "loop"
//! auto_switch_interval = 900
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clip::{ClipId, FrameTime};
use crate::composite::LoopBlendPolicy;
use crate::overlay::BlinkSettings;
use crate::state::{AssistantState, StateBehavior, StateTable};

// =============================================================================
// Error Types
// =============================================================================

/// Configuration loading failures
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Scheduler Configuration
// =============================================================================

/// Smallest retention window: the cycle before the playing one, the playing
/// cycle, and the lookahead cycle all stay live
pub const MIN_RETENTION_WINDOW: u64 = 3;

/// Scheduler tuning
#[derive(Clone, Debug, PartialEq)]
pub struct SchedulerConfig {
    /// Crossfade length in frames
    pub transition_length: FrameTime,
    /// Live cycles kept per looping clip, at least [`MIN_RETENTION_WINDOW`]
    pub retention_window: u64,
    /// Iterations of declared timeline duration kept ahead of playback
    pub lookahead_iterations: u32,
    /// Extend the declared duration when fewer iterations than this remain
    pub extend_threshold_iterations: u32,
    /// Ticks after a queue drain during which the queue is not re-checked
    pub queue_guard_ticks: u32,
    /// Frames before a cycle boundary in which auto-switching may fire
    pub auto_switch_window: FrameTime,
    /// Which clips crossfade into their own loop point
    pub loop_blend: LoopBlendPolicy,
    /// Bone whose position track carries locomotion
    pub root_bone: String,
    /// Capacity of the event channel
    pub event_buffer: usize,
    /// Blink overlay timing
    pub blink: BlinkSettings,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            transition_length: 20.0,
            retention_window: 3,
            lookahead_iterations: 10,
            extend_threshold_iterations: 5,
            queue_guard_ticks: 3,
            auto_switch_window: 5.0,
            loop_blend: LoopBlendPolicy::default(),
            root_bone: "root".to_string(),
            event_buffer: 64,
            blink: BlinkSettings::default(),
        }
    }
}

impl SchedulerConfig {
    /// Create configuration from defaults and environment variables
    ///
    /// Environment variables:
    /// - `CHOREOGRAPHER_TRANSITION_LENGTH`: crossfade length in frames
    /// - `CHOREOGRAPHER_RETENTION_WINDOW`: live cycles per looping clip
    /// - `CHOREOGRAPHER_LOOKAHEAD`: iterations of declared duration ahead
    /// - `CHOREOGRAPHER_BLEND_LOOPS`: "1" or "true" to blend loop points by default
    /// - `CHOREOGRAPHER_ROOT_BONE`: locomotion bone name
    /// - `CHOREOGRAPHER_BLINK`: "0" or "false" to disable the blink overlay
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Set the crossfade length
    #[must_use]
    pub fn with_transition_length(mut self, frames: FrameTime) -> Self {
        self.transition_length = frames;
        self
    }

    /// Set the retention window
    #[must_use]
    pub fn with_retention_window(mut self, cycles: u64) -> Self {
        self.retention_window = cycles;
        self
    }

    /// Set the loop blend policy
    #[must_use]
    pub fn with_loop_blend(mut self, policy: LoopBlendPolicy) -> Self {
        self.loop_blend = policy;
        self
    }

    /// Set the queue guard
    #[must_use]
    pub fn with_queue_guard_ticks(mut self, ticks: u32) -> Self {
        self.queue_guard_ticks = ticks;
        self
    }

    /// Set the locomotion bone
    #[must_use]
    pub fn with_root_bone(mut self, bone: impl Into<String>) -> Self {
        self.root_bone = bone.into();
        self
    }

    /// Set the event channel capacity
    #[must_use]
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.transition_length.is_finite() || self.transition_length < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "transition_length must be a non-negative number, got {}",
                self.transition_length
            )));
        }
        if self.retention_window < MIN_RETENTION_WINDOW {
            return Err(ConfigError::ValidationError(format!(
                "retention_window must be at least {MIN_RETENTION_WINDOW}, got {}",
                self.retention_window
            )));
        }
        if self.lookahead_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "lookahead_iterations must be at least 1".to_string(),
            ));
        }
        if self.extend_threshold_iterations > self.lookahead_iterations {
            return Err(ConfigError::ValidationError(format!(
                "extend_threshold_iterations ({}) exceeds lookahead_iterations ({})",
                self.extend_threshold_iterations, self.lookahead_iterations
            )));
        }
        if !self.auto_switch_window.is_finite() || self.auto_switch_window < 0.0 {
            return Err(ConfigError::ValidationError(
                "auto_switch_window must be a non-negative number".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "event_buffer must be at least 1".to_string(),
            ));
        }
        if !(self.blink.speed_multiplier.is_finite() && self.blink.speed_multiplier > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "blink speed_multiplier must be positive, got {}",
                self.blink.speed_multiplier
            )));
        }
        Ok(())
    }

    /// Apply environment overrides; returns whether any applied
    fn apply_env(&mut self) -> bool {
        let mut applied = false;

        if let Some(frames) = env_parse::<FrameTime>("CHOREOGRAPHER_TRANSITION_LENGTH") {
            self.transition_length = frames;
            applied = true;
        }
        if let Some(cycles) = env_parse::<u64>("CHOREOGRAPHER_RETENTION_WINDOW") {
            self.retention_window = cycles;
            applied = true;
        }
        if let Some(iterations) = env_parse::<u32>("CHOREOGRAPHER_LOOKAHEAD") {
            self.lookahead_iterations = iterations;
            applied = true;
        }
        if let Ok(blend) = std::env::var("CHOREOGRAPHER_BLEND_LOOPS") {
            self.loop_blend.blend_by_default = blend == "1" || blend.to_lowercase() == "true";
            applied = true;
        }
        if let Ok(bone) = std::env::var("CHOREOGRAPHER_ROOT_BONE") {
            self.root_bone = bone;
            applied = true;
        }
        if let Ok(enabled) = std::env::var("CHOREOGRAPHER_BLINK") {
            self.blink.enabled = enabled != "0" && enabled.to_lowercase() != "false";
            applied = true;
        }

        applied
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Scheduler section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerToml {
    /// Crossfade length in frames
    pub transition_length: Option<FrameTime>,
    /// Live cycles kept per looping clip
    pub retention_window: Option<u64>,
    /// Iterations of declared duration kept ahead
    pub lookahead_iterations: Option<u32>,
    /// Extension threshold in iterations
    pub extend_threshold_iterations: Option<u32>,
    /// Queue guard in ticks
    pub queue_guard_ticks: Option<u32>,
    /// Auto-switch window in frames
    pub auto_switch_window: Option<FrameTime>,
    /// Default loop blending answer
    pub blend_loops_by_default: Option<bool>,
    /// Per-clip loop blending answers
    pub loop_blend_overrides: HashMap<String, bool>,
    /// Locomotion bone name
    pub root_bone: Option<String>,
    /// Event channel capacity
    pub event_buffer: Option<usize>,
}

/// Parsed `choreographer.toml`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChoreographerToml {
    /// Scheduler section
    pub scheduler: SchedulerToml,
    /// Blink overlay section
    pub blink: Option<BlinkSettings>,
    /// Per-state behavior overrides keyed by state name
    pub states: HashMap<String, StateBehavior>,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Fully resolved configuration
#[derive(Clone, Debug)]
pub struct ChoreographerConfig {
    /// Scheduler tuning
    pub scheduler: SchedulerConfig,
    /// State behavior table
    pub states: StateTable,
    /// Config file that contributed values, if one was read
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for ChoreographerConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            states: StateTable::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ChoreographerConfig {
    /// Highest-priority source that supplied a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Default config file location
///
/// `$XDG_CONFIG_HOME/choreographer/choreographer.toml`, falling back to
/// `~/.config` when `XDG_CONFIG_HOME` is unset.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("choreographer").join("choreographer.toml"))
}

/// Load configuration from the default path, env overriding file overriding defaults
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read, parsed,
/// or validated.
pub fn load_config() -> Result<ChoreographerConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration, reading `path` when it exists
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the resolved values fail validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ChoreographerConfig, ConfigError> {
    let mut config = ChoreographerConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ChoreographerToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    if config.scheduler.apply_env() {
        config.source = ConfigSource::Env;
    }

    config.scheduler.validate()?;
    Ok(config)
}

/// Copy every value set in the file onto the config
fn apply_toml_config(
    config: &mut ChoreographerConfig,
    toml: ChoreographerToml,
) -> Result<(), ConfigError> {
    let scheduler = &mut config.scheduler;
    let section = toml.scheduler;

    if let Some(frames) = section.transition_length {
        scheduler.transition_length = frames;
    }
    if let Some(cycles) = section.retention_window {
        scheduler.retention_window = cycles;
    }
    if let Some(iterations) = section.lookahead_iterations {
        scheduler.lookahead_iterations = iterations;
    }
    if let Some(iterations) = section.extend_threshold_iterations {
        scheduler.extend_threshold_iterations = iterations;
    }
    if let Some(ticks) = section.queue_guard_ticks {
        scheduler.queue_guard_ticks = ticks;
    }
    if let Some(window) = section.auto_switch_window {
        scheduler.auto_switch_window = window;
    }
    if let Some(blend) = section.blend_loops_by_default {
        scheduler.loop_blend.blend_by_default = blend;
    }
    for (clip, blend) in section.loop_blend_overrides {
        scheduler.loop_blend.overrides.insert(ClipId::from(clip), blend);
    }
    if let Some(bone) = section.root_bone {
        scheduler.root_bone = bone;
    }
    if let Some(capacity) = section.event_buffer {
        scheduler.event_buffer = capacity;
    }
    if let Some(blink) = toml.blink {
        scheduler.blink = blink;
    }

    for (name, behavior) in toml.states {
        let state = AssistantState::parse(&name)
            .ok_or_else(|| ConfigError::ValidationError(format!("unknown state '{name}'")))?;
        if behavior.categories.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "state '{name}' lists no categories"
            )));
        }
        config.states.set(state, behavior);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PlaybackMode;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Unset every `CHOREOGRAPHER_*` variable the loader reads
    fn clear_config_env_vars() {
        std::env::remove_var("CHOREOGRAPHER_TRANSITION_LENGTH");
        std::env::remove_var("CHOREOGRAPHER_RETENTION_WINDOW");
        std::env::remove_var("CHOREOGRAPHER_LOOKAHEAD");
        std::env::remove_var("CHOREOGRAPHER_BLEND_LOOPS");
        std::env::remove_var("CHOREOGRAPHER_ROOT_BONE");
        std::env::remove_var("CHOREOGRAPHER_BLINK");
    }

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    // =========================================================================
    // Default Configuration Tests
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();

        assert!((config.transition_length - 20.0).abs() < f64::EPSILON);
        assert_eq!(config.retention_window, 3);
        assert_eq!(config.lookahead_iterations, 10);
        assert_eq!(config.extend_threshold_iterations, 5);
        assert_eq!(config.queue_guard_ticks, 3);
        assert!(!config.loop_blend.blend_by_default);
        assert_eq!(config.root_bone, "root");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.to_string_lossy().contains("choreographer"));
            assert!(p.to_string_lossy().ends_with("choreographer.toml"));
        }
    }

    // =========================================================================
    // TOML Parsing Tests
    // =========================================================================

    #[test]
    fn test_parse_valid_toml() {
        let file = write_config(
            r#"
[scheduler]
transition_length = 24
retention_window = 4
queue_guard_ticks = 2
root_bone = "hips"

[scheduler.loop_blend_overrides]
idle_breathe = true

[blink]
enabled = false
speed_multiplier = 2.0
inter_cycle_delay = 90

[states.idle]
categories = ["idle", "idle_fidget"]
mode = "loop"
auto_switch_interval = 900

[states.celebrate]
categories = ["party"]
mode = "once"
"#,
        );

        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();
        let scheduler = &config.scheduler;

        assert!((scheduler.transition_length - 24.0).abs() < f64::EPSILON);
        assert_eq!(scheduler.retention_window, 4);
        assert_eq!(scheduler.queue_guard_ticks, 2);
        assert!(scheduler.loop_blend.blends_loop(&ClipId::from("idle_breathe")));
        assert!((scheduler.blink.inter_cycle_delay - 90.0).abs() < f64::EPSILON);

        let idle = config.states.get(AssistantState::Idle).unwrap();
        assert_eq!(idle.categories, vec!["idle", "idle_fidget"]);
        assert_eq!(idle.auto_switch_interval, Some(900.0));

        let celebrate = config.states.get(AssistantState::Celebrating).unwrap();
        assert_eq!(celebrate.mode, PlaybackMode::Once);

        // Untouched states keep their defaults
        assert!(config.states.get(AssistantState::Busy).is_ok());
        assert_eq!(config.config_file_path, Some(file.path().to_path_buf()));
    }

    #[test]
    fn test_parse_empty_toml() {
        let file = write_config("");
        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.scheduler.event_buffer, 64);
        assert!(
            config.source() == ConfigSource::File || config.source() == ConfigSource::Env,
            "Expected File or Env source, got: {:?}",
            config.source()
        );
    }

    #[test]
    fn test_unknown_state_rejected() {
        let file = write_config(
            r#"
[states.dancing]
categories = ["dance"]
"#,
        );
        let err = load_config_from_path(Some(file.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(ref msg) if msg.contains("dancing")));
    }

    #[test]
    fn test_state_without_categories_rejected() {
        let file = write_config(
            r#"
[states.busy]
categories = []
"#,
        );
        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_invalid_value_rejected() {
        let file = write_config(
            r#"
[scheduler]
retention_window = 0
"#,
        );
        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    // =========================================================================
    // Missing / Malformed File Tests
    // =========================================================================

    #[test]
    fn test_missing_file_graceful() {
        clear_config_env_vars();

        let path = PathBuf::from("/nonexistent/path/choreographer.toml");
        let config = load_config_from_path(Some(path)).unwrap();

        assert!(config.config_file_path.is_none());
        // Another test may have set CHOREOGRAPHER_* vars in the meantime
        assert!(
            config.source() == ConfigSource::Default || config.source() == ConfigSource::Env,
            "Expected Default or Env source, got: {:?}",
            config.source()
        );
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = write_config(
            r#"
[scheduler
transition_length = "long"
"#,
        );

        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    // =========================================================================
    // Priority Ordering Tests
    // =========================================================================

    #[test]
    fn test_env_overrides_file() {
        clear_config_env_vars();

        let file = write_config(
            r#"
[scheduler]
root_bone = "file_bone"
"#,
        );

        std::env::set_var("CHOREOGRAPHER_ROOT_BONE", "env_bone");
        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();
        clear_config_env_vars();

        // A concurrent test may clear the env var first, but the file value
        // still beats the default
        let bone = config.scheduler.root_bone.as_str();
        assert!(
            bone == "env_bone" || bone == "file_bone",
            "Expected env_bone or file_bone, got: {bone}"
        );
        assert!(
            config.source() == ConfigSource::Env || config.source() == ConfigSource::File,
            "Expected Env or File source, got: {:?}",
            config.source()
        );
    }

    #[test]
    fn test_builder_methods() {
        let config = SchedulerConfig::default()
            .with_transition_length(8.0)
            .with_retention_window(5)
            .with_queue_guard_ticks(0)
            .with_root_bone("pelvis")
            .with_event_buffer(4)
            .with_loop_blend(LoopBlendPolicy::always());

        assert!((config.transition_length - 8.0).abs() < f64::EPSILON);
        assert_eq!(config.retention_window, 5);
        assert_eq!(config.root_bone, "pelvis");
        assert!(config.loop_blend.blend_by_default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rules() {
        let bad = SchedulerConfig::default().with_transition_length(-1.0);
        assert!(bad.validate().is_err());

        let mut bad = SchedulerConfig::default();
        bad.extend_threshold_iterations = 11;
        assert!(bad.validate().is_err());

        let bad = SchedulerConfig::default().with_event_buffer(0);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_retention_window_below_minimum_rejected() {
        for cycles in [0, 1, 2] {
            let config = SchedulerConfig::default().with_retention_window(cycles);
            assert!(
                matches!(config.validate(), Err(ConfigError::ValidationError(_))),
                "retention_window {cycles} accepted"
            );
        }
        let config = SchedulerConfig::default().with_retention_window(MIN_RETENTION_WINDOW);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(format!("{}", ConfigSource::Env), "environment");
        assert_eq!(format!("{}", ConfigSource::File), "config file");
        assert_eq!(format!("{}", ConfigSource::Default), "default");
    }

    #[test]
    fn test_config_error_display() {
        let err = SchedulerConfig::default()
            .with_retention_window(1)
            .validate()
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid configuration: retention_window must be at least 3, got 1"
        );
    }
}
