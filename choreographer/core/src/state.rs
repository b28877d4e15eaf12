//! Assistant States and Clip Selection
//!
//! The state machine drives which category of clip plays and how. The
//! scheduler asks three collaborators:
//! - [`StateTable`]: per-state behavior (categories, loop/once, auto-switch)
//! - [`ClipSelector`]: which concrete clip to play from a category
//! - [`AudioSignal`]: whether speech audio is still audible

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clip::{ClipId, FrameTime};

// ============================================================================
// States
// ============================================================================

/// Assistant states
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistantState {
    /// Default resting loop
    Idle,
    /// Working on a request
    Busy,
    /// Talking without a lip-sync track
    Speaking,
    /// Short hold while speech audio tails off
    SpeakingHold,
    /// One-shot celebration
    Celebrating,
    /// Entrance animation
    Intro,
    /// Stitched body motion under a lip-sync track
    Composite,
}

impl AssistantState {
    /// Every state
    #[must_use]
    pub const fn all() -> [Self; 7] {
        [
            Self::Idle,
            Self::Busy,
            Self::Speaking,
            Self::SpeakingHold,
            Self::Celebrating,
            Self::Intro,
            Self::Composite,
        ]
    }

    /// Parse a state name (config keys, host commands)
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "idle" => Some(Self::Idle),
            "busy" | "thinking" => Some(Self::Busy),
            "speaking" => Some(Self::Speaking),
            "speaking_hold" | "hold" => Some(Self::SpeakingHold),
            "celebrating" | "celebrate" => Some(Self::Celebrating),
            "intro" => Some(Self::Intro),
            "composite" => Some(Self::Composite),
            _ => None,
        }
    }

    /// Config key / log label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Speaking => "speaking",
            Self::SpeakingHold => "speaking_hold",
            Self::Celebrating => "celebrating",
            Self::Intro => "intro",
            Self::Composite => "composite",
        }
    }
}

impl std::fmt::Display for AssistantState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Whether a clip repeats
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    /// Repeat until interrupted
    #[default]
    Loop,
    /// Play once, then return to idle
    Once,
}

impl PlaybackMode {
    /// Whether this mode repeats
    #[must_use]
    pub fn is_loop(self) -> bool {
        matches!(self, Self::Loop)
    }
}

/// How a state plays its clips
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateBehavior {
    /// Clip categories this state may draw from
    pub categories: Vec<String>,
    /// Loop or play once
    #[serde(default)]
    pub mode: PlaybackMode,
    /// Swap to another clip of the same category after this many frames
    #[serde(default)]
    pub auto_switch_interval: Option<FrameTime>,
    /// Clip moves the character; its root displacement is carried forward
    #[serde(default)]
    pub positional: bool,
}

impl StateBehavior {
    /// Looping behavior over one category
    pub fn looping(category: impl Into<String>) -> Self {
        Self {
            categories: vec![category.into()],
            mode: PlaybackMode::Loop,
            auto_switch_interval: None,
            positional: false,
        }
    }

    /// One-shot behavior over one category
    pub fn once(category: impl Into<String>) -> Self {
        Self {
            mode: PlaybackMode::Once,
            ..Self::looping(category)
        }
    }

    /// Set the auto-switch interval
    #[must_use]
    pub fn with_auto_switch(mut self, interval: FrameTime) -> Self {
        self.auto_switch_interval = Some(interval);
        self
    }

    /// Mark as positional
    #[must_use]
    pub fn positional(mut self) -> Self {
        self.positional = true;
        self
    }
}

/// Errors in state configuration
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StateConfigError {
    /// The state has no behavior entry
    #[error("no behavior configured for state '{0}'")]
    MissingBehavior(AssistantState),

    /// None of the state's categories has a selectable clip
    #[error("no selectable clip in categories {0:?}")]
    EmptyCategory(Vec<String>),
}

/// Per-state behavior table
#[derive(Clone, Debug, PartialEq)]
pub struct StateTable {
    behaviors: HashMap<AssistantState, StateBehavior>,
}

impl Default for StateTable {
    fn default() -> Self {
        let mut behaviors = HashMap::new();
        behaviors.insert(
            AssistantState::Idle,
            StateBehavior::looping("idle").with_auto_switch(600.0),
        );
        behaviors.insert(AssistantState::Busy, StateBehavior::looping("busy"));
        behaviors.insert(AssistantState::Speaking, StateBehavior::looping("speaking"));
        behaviors.insert(AssistantState::SpeakingHold, StateBehavior::once("hold"));
        behaviors.insert(AssistantState::Celebrating, StateBehavior::once("celebrate"));
        behaviors.insert(AssistantState::Intro, StateBehavior::once("intro").positional());
        behaviors.insert(AssistantState::Composite, StateBehavior::once("talk_fill"));
        Self { behaviors }
    }
}

impl StateTable {
    /// Create a table with no entries
    #[must_use]
    pub fn empty() -> Self {
        Self {
            behaviors: HashMap::new(),
        }
    }

    /// Behavior for a state
    ///
    /// # Errors
    ///
    /// Returns `StateConfigError::MissingBehavior` when the state has no entry.
    pub fn get(&self, state: AssistantState) -> Result<&StateBehavior, StateConfigError> {
        self.behaviors
            .get(&state)
            .ok_or(StateConfigError::MissingBehavior(state))
    }

    /// Add or replace a state's behavior
    pub fn set(&mut self, state: AssistantState, behavior: StateBehavior) {
        self.behaviors.insert(state, behavior);
    }

    /// Builder form of [`StateTable::set`]
    #[must_use]
    pub fn with(mut self, state: AssistantState, behavior: StateBehavior) -> Self {
        self.set(state, behavior);
        self
    }

    /// Remove a state's behavior
    pub fn remove(&mut self, state: AssistantState) -> Option<StateBehavior> {
        self.behaviors.remove(&state)
    }
}

// ============================================================================
// Clip Selection
// ============================================================================

/// Picks concrete clips for categories
pub trait ClipSelector: Send + Sync {
    /// A random clip from a category, `None` if the category is empty
    fn random_from(&self, category: &str) -> Option<ClipId>;

    /// Look up a clip by its catalog name
    fn by_name(&self, name: &str) -> Option<ClipId>;

    /// Every clip in a category
    fn clips_in(&self, category: &str) -> Vec<ClipId>;

    /// A random clip from a category other than `current`, when one exists
    fn random_other(&self, category: &str, current: &ClipId) -> Option<ClipId> {
        let others: Vec<ClipId> = self
            .clips_in(category)
            .into_iter()
            .filter(|id| id != current)
            .collect();
        others.choose(&mut rand::thread_rng()).cloned()
    }
}

/// One selectable catalog entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Clip to play
    pub clip: ClipId,
    /// Weight for random selection (higher = more likely)
    pub weight: u8,
}

/// Category catalog with weighted random selection
#[derive(Debug)]
pub struct ClipCatalog {
    categories: HashMap<String, Vec<CatalogEntry>>,
    names: HashMap<String, ClipId>,
    rng: Mutex<StdRng>,
}

impl Default for ClipCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ClipCatalog {
    /// Create an empty catalog seeded from entropy
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create an empty catalog with deterministic selection
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            categories: HashMap::new(),
            names: HashMap::new(),
            rng: Mutex::new(rng),
        }
    }

    /// Register a clip under a category with the default weight (50)
    #[must_use]
    pub fn with_clip(self, category: &str, clip: impl Into<ClipId>) -> Self {
        self.with_weighted_clip(category, clip, 50)
    }

    /// Register a clip under a category with a selection weight
    #[must_use]
    pub fn with_weighted_clip(
        mut self,
        category: &str,
        clip: impl Into<ClipId>,
        weight: u8,
    ) -> Self {
        let clip = clip.into();
        self.names.insert(clip.as_str().to_string(), clip.clone());
        self.categories
            .entry(category.to_string())
            .or_default()
            .push(CatalogEntry { clip, weight });
        self
    }

    /// Make `name` resolve to `clip` in [`ClipSelector::by_name`]
    #[must_use]
    pub fn with_alias(mut self, name: &str, clip: impl Into<ClipId>) -> Self {
        self.names.insert(name.to_string(), clip.into());
        self
    }

    /// Registered category names
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }
}

impl ClipSelector for ClipCatalog {
    fn random_from(&self, category: &str) -> Option<ClipId> {
        let entries = self.categories.get(category)?;
        let first = entries.first()?;

        let total_weight: u32 = entries.iter().map(|e| u32::from(e.weight)).sum();
        if total_weight == 0 {
            return Some(first.clip.clone());
        }

        let roll: u32 = self.rng.lock().gen_range(0..total_weight);
        let mut cumulative = 0u32;
        for entry in entries {
            cumulative += u32::from(entry.weight);
            if roll < cumulative {
                return Some(entry.clip.clone());
            }
        }
        Some(first.clip.clone())
    }

    fn by_name(&self, name: &str) -> Option<ClipId> {
        self.names.get(name).cloned()
    }

    fn clips_in(&self, category: &str) -> Vec<ClipId> {
        self.categories
            .get(category)
            .map(|entries| entries.iter().map(|e| e.clip.clone()).collect())
            .unwrap_or_default()
    }

    fn random_other(&self, category: &str, current: &ClipId) -> Option<ClipId> {
        let others: Vec<ClipId> = self
            .clips_in(category)
            .into_iter()
            .filter(|id| id != current)
            .collect();
        others.choose(&mut *self.rng.lock()).cloned()
    }
}

// ============================================================================
// Audio Signal
// ============================================================================

/// Whether speech audio is still playing
pub trait AudioSignal: Send + Sync {
    /// Sampled when a speech clip finishes
    fn is_audio_active(&self) -> bool;
}

/// Audio signal that is never active
#[derive(Clone, Copy, Debug, Default)]
pub struct SilentAudio;

impl AudioSignal for SilentAudio {
    fn is_audio_active(&self) -> bool {
        false
    }
}

/// Audio flag shared with the audio player
#[derive(Clone, Debug, Default)]
pub struct AudioFlag(Arc<AtomicBool>);

impl AudioFlag {
    /// Create an inactive flag
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark audio as playing or stopped
    pub fn set(&self, active: bool) {
        self.0.store(active, Ordering::Release);
    }
}

impl AudioSignal for AudioFlag {
    fn is_audio_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_parse_roundtrips_labels() {
        for state in AssistantState::all() {
            assert_eq!(AssistantState::parse(state.label()), Some(state));
        }
        assert_eq!(AssistantState::parse("Thinking"), Some(AssistantState::Busy));
        assert_eq!(AssistantState::parse("dancing"), None);
    }

    #[test]
    fn test_default_table_covers_every_state() {
        let table = StateTable::default();
        for state in AssistantState::all() {
            assert!(table.get(state).is_ok(), "missing {state}");
        }
        assert!(table.get(AssistantState::Intro).unwrap().positional);
        assert_eq!(
            table.get(AssistantState::Celebrating).unwrap().mode,
            PlaybackMode::Once
        );
    }

    #[test]
    fn test_missing_behavior_error() {
        let table = StateTable::empty();
        assert_eq!(
            table.get(AssistantState::Busy),
            Err(StateConfigError::MissingBehavior(AssistantState::Busy))
        );
    }

    #[test]
    fn test_catalog_random_from_empty_category() {
        let catalog = ClipCatalog::seeded(1);
        assert!(catalog.random_from("idle").is_none());
        assert!(catalog.clips_in("idle").is_empty());
    }

    #[test]
    fn test_catalog_respects_zero_weight() {
        let catalog = ClipCatalog::seeded(7)
            .with_weighted_clip("idle", "never", 0)
            .with_weighted_clip("idle", "always", 10);
        for _ in 0..50 {
            assert_eq!(catalog.random_from("idle"), Some(ClipId::new("always")));
        }
    }

    #[test]
    fn test_catalog_random_other_excludes_current() {
        let catalog = ClipCatalog::seeded(3)
            .with_clip("idle", "idle_a")
            .with_clip("idle", "idle_b");
        let current = ClipId::new("idle_a");
        for _ in 0..20 {
            assert_eq!(
                catalog.random_other("idle", &current),
                Some(ClipId::new("idle_b"))
            );
        }

        let lonely = ClipCatalog::seeded(3).with_clip("idle", "idle_a");
        assert!(lonely.random_other("idle", &current).is_none());
    }

    #[test]
    fn test_catalog_by_name() {
        let catalog = ClipCatalog::seeded(0).with_clip("celebrate", "confetti");
        assert_eq!(catalog.by_name("confetti"), Some(ClipId::new("confetti")));
        assert!(catalog.by_name("nope").is_none());

        let catalog = catalog.with_alias("party", "confetti");
        assert_eq!(catalog.by_name("party"), Some(ClipId::new("confetti")));
    }

    #[test]
    fn test_audio_flag() {
        let flag = AudioFlag::new();
        assert!(!flag.is_audio_active());
        flag.set(true);
        assert!(flag.clone().is_audio_active());
    }
}
