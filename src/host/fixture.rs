//! Scene fixture files
//!
//! A fixture describes a small UI: its elements, which scenes can be loaded,
//! what pressing a button changes, and changes that happen on their own after
//! a delay. [`MemoryHost`](super::MemoryHost) serves the fixture to the
//! engine.

use std::path::Path;

use serde::Deserialize;

use super::Capability;
use crate::common::{Error, Result};

/// A complete scene fixture loaded from a YAML file
#[derive(Deserialize, Debug, Clone, Default)]
pub struct SceneFixture {
    /// Scene active when the host starts
    #[serde(default)]
    pub scene: Option<String>,
    /// Additional scene names that may be requested
    #[serde(default)]
    pub scenes: Vec<String>,
    /// Delay between a scene request and the scene becoming active
    #[serde(default)]
    pub scene_load_ms: u64,
    /// Elements of the UI
    #[serde(default)]
    pub elements: Vec<ElementFixture>,
    /// Effects applied automatically after a delay
    #[serde(default)]
    pub timeline: Vec<TimelineEntry>,
}

/// One UI element
#[derive(Deserialize, Debug, Clone)]
pub struct ElementFixture {
    /// Hierarchy path, e.g. `Canvas/PlayButton`
    pub path: String,
    /// Optional stable id (looked up with `id:<id>`)
    pub id: Option<String>,
    /// Scene the element lives in; elements without one are always present
    pub scene: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_true")]
    pub interactable: bool,
    /// Current display text
    pub text: Option<String>,
    /// Capability tags (`button`, `plain_text`, `rich_dropdown`, ...)
    #[serde(default)]
    pub widgets: Vec<Capability>,
    /// Dropdown options
    #[serde(default)]
    pub options: Vec<String>,
    /// Slider value
    #[serde(default)]
    pub value: f64,
    /// Effects applied when the element is pressed or raycast-clicked
    #[serde(default)]
    pub on_press: Vec<Effect>,
}

fn default_true() -> bool {
    true
}

/// A change to the UI
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    SetText { target: String, text: String },
    Activate { target: String },
    Deactivate { target: String },
    SetInteractable { target: String, interactable: bool },
    LoadScene { scene: String },
}

/// Effects applied once `after_ms` have passed since the host started
#[derive(Deserialize, Debug, Clone)]
pub struct TimelineEntry {
    pub after_ms: u64,
    pub effects: Vec<Effect>,
}

impl SceneFixture {
    /// Parse a fixture from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load a fixture from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        serde_yaml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse scene fixture '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
