//! Host capabilities
//!
//! The engine never touches widgets directly. Everything it needs from the
//! UI toolkit goes through these traits: resolving targets, reading text,
//! performing boundary actions and switching scenes. A concrete UI host
//! implements all four; [`MemoryHost`] is the in-process implementation used
//! by the CLI and the tests.

mod fixture;
mod memory;

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::common::Result;

pub use fixture::{Effect, ElementFixture, SceneFixture, TimelineEntry};
pub use memory::{Interaction, MemoryHost};

/// Case-insensitive prefix selecting lookup by stable id
pub const ID_PREFIX: &str = "id:";

/// A logical target: a hierarchy path or a stable opaque id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// Slash-separated hierarchy path, e.g. `Canvas/PlayButton`
    Path(String),
    /// Stable id assigned to the element, written `id:PlayButton`
    Id(String),
}

impl Target {
    /// Parse a target string; `id:` (any case) selects an id lookup
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();
        match trimmed.get(..ID_PREFIX.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(ID_PREFIX) => {
                Target::Id(trimmed[ID_PREFIX.len()..].to_string())
            }
            _ => Target::Path(trimmed.to_string()),
        }
    }

    /// Whether the target names nothing at all
    pub fn is_empty(&self) -> bool {
        match self {
            Target::Path(p) => p.is_empty(),
            Target::Id(id) => id.is_empty(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Path(p) => write!(f, "{}", p),
            Target::Id(id) => write!(f, "{}{}", ID_PREFIX, id),
        }
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Target::parse(s)
    }
}

/// Opaque handle to a live element, valid until the host drops the element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub u64);

/// Widget capability tags reported per element
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Button,
    Toggle,
    Slider,
    Dropdown,
    RichDropdown,
    InputField,
    RichInputField,
    PlainText,
    RichText,
    Selectable,
    ScrollRect,
    Collider,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Button => "button",
            Self::Toggle => "toggle",
            Self::Slider => "slider",
            Self::Dropdown => "dropdown",
            Self::RichDropdown => "rich dropdown",
            Self::InputField => "input field",
            Self::RichInputField => "rich input field",
            Self::PlainText => "text",
            Self::RichText => "rich text",
            Self::Selectable => "selectable",
            Self::ScrollRect => "scroll rect",
            Self::Collider => "collider",
        };
        f.write_str(s)
    }
}

/// Set of capability tags
pub type Capabilities = BTreeSet<Capability>;

/// Text widget variant to read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextKind {
    Plain,
    Rich,
}

impl TextKind {
    /// Capability tag a handle must report to be read with this variant
    pub fn capability(self) -> Capability {
        match self {
            TextKind::Plain => Capability::PlainText,
            TextKind::Rich => Capability::RichText,
        }
    }
}

/// Resolve targets and inspect element state
///
/// Every method is infallible: an unknown handle is simply inactive, has no
/// capabilities and no name.
pub trait Lookup: Send + Sync {
    /// Resolve a target to zero or one live element
    fn resolve(&self, target: &Target) -> Option<ElementHandle>;

    /// Whether the element is active/visible in the hierarchy
    fn is_active(&self, handle: ElementHandle) -> bool;

    /// Capability tags of the element
    fn capabilities(&self, handle: ElementHandle) -> Capabilities;

    /// Whether a selectable element currently accepts interaction
    fn is_interactable(&self, handle: ElementHandle) -> bool;

    /// Display name of the element, for diagnostics
    fn name(&self, handle: ElementHandle) -> Option<String>;
}

/// Read display text from text widgets
pub trait TextInspect: Send + Sync {
    /// Current text of the given widget variant, if the element has one
    fn read_text(&self, handle: ElementHandle, kind: TextKind) -> Option<String>;
}

/// Primitive interactions; each is a boundary call the host implements
#[async_trait]
pub trait Actions: Send + Sync {
    async fn press(&self, handle: ElementHandle) -> Result<()>;
    async fn input_text(&self, handle: ElementHandle, text: &str) -> Result<()>;
    async fn set_toggle(&self, handle: ElementHandle, on: bool) -> Result<()>;
    async fn set_slider(&self, handle: ElementHandle, value: f64) -> Result<()>;
    async fn select_option(&self, handle: ElementHandle, index: usize) -> Result<()>;
    async fn hover(&self, handle: ElementHandle) -> Result<()>;
    async fn hold(&self, handle: ElementHandle, duration: Duration) -> Result<()>;
    async fn drag_and_drop(&self, source: ElementHandle, target: ElementHandle) -> Result<()>;
    async fn raycast_click(&self, handle: ElementHandle) -> Result<()>;
    async fn scroll(&self, handle: ElementHandle, delta: (f64, f64)) -> Result<()>;
}

/// Scene / execution-context switching
#[async_trait]
pub trait SceneControl: Send + Sync {
    /// Name of the currently active scene
    fn active_scene(&self) -> Option<String>;

    /// Request a switch to the named scene; completion is observed by
    /// polling [`SceneControl::active_scene`]
    async fn request_scene(&self, name: &str) -> Result<()>;
}

/// Everything the engine needs from a UI host
pub trait Host: Lookup + TextInspect + Actions + SceneControl {}

impl<T> Host for T where T: Lookup + TextInspect + Actions + SceneControl {}
