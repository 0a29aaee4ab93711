//! Conditions polled by the waiter
//!
//! A [`Condition`] is built right before a wait starts and dropped after it.
//! Evaluating it never fails: a target that cannot be resolved, an inactive
//! element or a missing text widget all just mean "not satisfied yet", and
//! [`Condition::describe`] explains which of those it was on the last check.

use std::fmt;
use std::sync::Arc;

use crate::host::{Capability, ElementHandle, Host, Target, TextKind};

/// A predicate over the host, polled until it holds
pub trait Condition: Send {
    /// Evaluate against the current host state; may cache the lookup
    fn satisfied(&mut self, host: &dyn Host) -> bool;

    /// Human-readable diagnostic, including why it is not satisfied yet
    fn describe(&self) -> String;
}

/// Result of the last element lookup, kept for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Seen {
    NotChecked,
    Missing,
    Inactive(ElementHandle),
    Active(ElementHandle),
}

impl Seen {
    fn lookup(host: &dyn Host, target: &Target) -> Self {
        match host.resolve(target) {
            None => Seen::Missing,
            Some(handle) if host.is_active(handle) => Seen::Active(handle),
            Some(handle) => Seen::Inactive(handle),
        }
    }

    fn active(self) -> Option<ElementHandle> {
        match self {
            Seen::Active(handle) => Some(handle),
            _ => None,
        }
    }
}

impl fmt::Display for Seen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Seen::NotChecked => write!(f, "not checked yet"),
            Seen::Missing => write!(f, "not found"),
            Seen::Inactive(_) => write!(f, "found but inactive"),
            Seen::Active(_) => write!(f, "active"),
        }
    }
}

/// Target resolves to an element that is active in the hierarchy
#[derive(Debug)]
pub struct ObjectAppeared {
    target: Target,
    seen: Seen,
}

impl ObjectAppeared {
    pub fn new(target: impl Into<Target>) -> Self {
        Self {
            target: target.into(),
            seen: Seen::NotChecked,
        }
    }

    /// Handle found by the last successful check
    pub fn handle(&self) -> Option<ElementHandle> {
        self.seen.active()
    }
}

impl Condition for ObjectAppeared {
    fn satisfied(&mut self, host: &dyn Host) -> bool {
        self.seen = Seen::lookup(host, &self.target);
        self.seen.active().is_some()
    }

    fn describe(&self) -> String {
        format!("ObjectAppeared({}): {}", self.target, self.seen)
    }
}

/// Target no longer resolves, or its element is inactive
#[derive(Debug)]
pub struct ObjectDisappeared {
    target: Target,
    seen: Seen,
}

impl ObjectDisappeared {
    pub fn new(target: impl Into<Target>) -> Self {
        Self {
            target: target.into(),
            seen: Seen::NotChecked,
        }
    }
}

impl Condition for ObjectDisappeared {
    fn satisfied(&mut self, host: &dyn Host) -> bool {
        self.seen = Seen::lookup(host, &self.target);
        matches!(self.seen, Seen::Missing | Seen::Inactive(_))
    }

    fn describe(&self) -> String {
        format!("ObjectDisappeared({}): {}", self.target, self.seen)
    }
}

/// Text widget on the target shows exactly the expected text
///
/// With no explicit [`TextKind`], the plain text widget is read first and the
/// rich one second.
#[derive(Debug)]
pub struct LabelTextEquals {
    target: Target,
    expected: String,
    kind: Option<TextKind>,
    seen: Seen,
    actual: Option<String>,
}

impl LabelTextEquals {
    pub fn new(target: impl Into<Target>, expected: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            expected: expected.into(),
            kind: None,
            seen: Seen::NotChecked,
            actual: None,
        }
    }

    /// Only read the given widget variant
    pub fn with_kind(mut self, kind: TextKind) -> Self {
        self.kind = Some(kind);
        self
    }

    fn read(&self, host: &dyn Host, handle: ElementHandle) -> Option<String> {
        let kinds: &[TextKind] = match &self.kind {
            Some(TextKind::Plain) => &[TextKind::Plain],
            Some(TextKind::Rich) => &[TextKind::Rich],
            None => &[TextKind::Plain, TextKind::Rich],
        };
        let caps = host.capabilities(handle);
        kinds
            .iter()
            .filter(|kind| caps.contains(&kind.capability()))
            .find_map(|kind| host.read_text(handle, *kind))
    }
}

impl Condition for LabelTextEquals {
    fn satisfied(&mut self, host: &dyn Host) -> bool {
        self.seen = Seen::lookup(host, &self.target);
        self.actual = self.seen.active().and_then(|h| self.read(host, h));
        self.actual.as_deref() == Some(self.expected.as_str())
    }

    fn describe(&self) -> String {
        let state = match (&self.seen, &self.actual) {
            (Seen::Active(_), Some(actual)) => format!("text is '{}'", actual),
            (Seen::Active(_), None) => "no text widget".to_string(),
            (seen, _) => seen.to_string(),
        };
        format!(
            "LabelTextEquals({}, '{}'): {}",
            self.target, self.expected, state
        )
    }
}

/// Active element with the given capability that accepts interaction
#[derive(Debug)]
struct Interactable {
    name: &'static str,
    target: Target,
    capability: Capability,
    seen: Seen,
    has_capability: bool,
    interactable: bool,
}

impl Interactable {
    fn new(name: &'static str, target: Target, capability: Capability) -> Self {
        Self {
            name,
            target,
            capability,
            seen: Seen::NotChecked,
            has_capability: false,
            interactable: false,
        }
    }

    fn check(&mut self, host: &dyn Host) -> bool {
        self.seen = Seen::lookup(host, &self.target);
        match self.seen.active() {
            Some(handle) => {
                self.has_capability = host.capabilities(handle).contains(&self.capability);
                self.interactable = host.is_interactable(handle);
            }
            None => {
                self.has_capability = false;
                self.interactable = false;
            }
        }
        self.has_capability && self.interactable
    }

    fn describe(&self) -> String {
        let state = match self.seen {
            Seen::Active(_) if !self.has_capability => format!("no {} widget", self.capability),
            Seen::Active(_) if !self.interactable => "not interactable".to_string(),
            Seen::Active(_) => "ready".to_string(),
            seen => seen.to_string(),
        };
        format!("{}({}): {}", self.name, self.target, state)
    }
}

/// Selectable element that is active and interactable
#[derive(Debug)]
pub struct SelectableInteractable(Interactable);

impl SelectableInteractable {
    pub fn new(target: impl Into<Target>) -> Self {
        Self(Interactable::new(
            "SelectableInteractable",
            target.into(),
            Capability::Selectable,
        ))
    }
}

impl Condition for SelectableInteractable {
    fn satisfied(&mut self, host: &dyn Host) -> bool {
        self.0.check(host)
    }

    fn describe(&self) -> String {
        self.0.describe()
    }
}

/// Button that is active and interactable
#[derive(Debug)]
pub struct ButtonAccessible(Interactable);

impl ButtonAccessible {
    pub fn new(target: impl Into<Target>) -> Self {
        Self(Interactable::new(
            "ButtonAccessible",
            target.into(),
            Capability::Button,
        ))
    }
}

impl Condition for ButtonAccessible {
    fn satisfied(&mut self, host: &dyn Host) -> bool {
        self.0.check(host)
    }

    fn describe(&self) -> String {
        self.0.describe()
    }
}

/// Named scene is the active one
#[derive(Debug)]
pub struct SceneLoaded {
    scene: String,
    active: Option<String>,
}

impl SceneLoaded {
    pub fn new(scene: impl Into<String>) -> Self {
        Self {
            scene: scene.into(),
            active: None,
        }
    }
}

impl Condition for SceneLoaded {
    fn satisfied(&mut self, host: &dyn Host) -> bool {
        self.active = host.active_scene();
        self.active.as_deref() == Some(self.scene.as_str())
    }

    fn describe(&self) -> String {
        match &self.active {
            Some(active) => format!("SceneLoaded({}): active scene is '{}'", self.scene, active),
            None => format!("SceneLoaded({}): no active scene", self.scene),
        }
    }
}

/// Shared predicate closure used by [`Predicate`]
pub type PredicateFn = Arc<dyn Fn(&dyn Host) -> bool + Send + Sync>;

/// Arbitrary closure with a label
pub struct Predicate {
    label: String,
    check: PredicateFn,
    last: Option<bool>,
}

impl Predicate {
    pub fn new(label: impl Into<String>, check: PredicateFn) -> Self {
        Self {
            label: label.into(),
            check,
            last: None,
        }
    }
}

impl Condition for Predicate {
    fn satisfied(&mut self, host: &dyn Host) -> bool {
        let ok = (self.check)(host);
        self.last = Some(ok);
        ok
    }

    fn describe(&self) -> String {
        match self.last {
            Some(true) => format!("Predicate({}): true", self.label),
            Some(false) => format!("Predicate({}): false", self.label),
            None => format!("Predicate({}): not checked yet", self.label),
        }
    }
}

/// How several conditions combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// Every condition must hold on the same check
    #[default]
    All,
    /// At least one condition must hold
    Any,
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "AllOf"),
            Self::Any => write!(f, "AnyOf"),
        }
    }
}

/// Several conditions evaluated together
pub struct Composite {
    mode: MatchMode,
    parts: Vec<Box<dyn Condition>>,
    last: Vec<bool>,
}

impl Composite {
    pub fn new(mode: MatchMode, parts: Vec<Box<dyn Condition>>) -> Self {
        Self {
            mode,
            parts,
            last: Vec::new(),
        }
    }
}

impl Condition for Composite {
    fn satisfied(&mut self, host: &dyn Host) -> bool {
        // Evaluate every part so each diagnostic reflects this check
        self.last = self.parts.iter_mut().map(|c| c.satisfied(host)).collect();
        match self.mode {
            MatchMode::All => self.last.iter().all(|ok| *ok),
            // An empty composite holds, like an empty AllOf
            MatchMode::Any => self.last.is_empty() || self.last.iter().any(|ok| *ok),
        }
    }

    fn describe(&self) -> String {
        let pending: Vec<String> = self
            .parts
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.last.get(*i).copied().unwrap_or(false))
            .map(|(_, c)| c.describe())
            .collect();
        if pending.is_empty() {
            format!("{}: satisfied", self.mode)
        } else {
            format!("{}[{}]", self.mode, pending.join("; "))
        }
    }
}

/// Reusable description of a condition
///
/// Steps keep specs and build a fresh [`Condition`] for every wait, so a
/// step can be executed any number of times.
#[derive(Clone)]
pub enum ConditionSpec {
    ObjectAppeared(Target),
    ObjectDisappeared(Target),
    LabelTextEquals {
        target: Target,
        expected: String,
        kind: Option<TextKind>,
    },
    SelectableInteractable(Target),
    ButtonAccessible(Target),
    SceneLoaded(String),
    Predicate { label: String, check: PredicateFn },
    AllOf(Vec<ConditionSpec>),
    AnyOf(Vec<ConditionSpec>),
}

impl ConditionSpec {
    /// Wrap a closure as a condition spec
    pub fn predicate(
        label: impl Into<String>,
        check: impl Fn(&dyn Host) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::Predicate {
            label: label.into(),
            check: Arc::new(check),
        }
    }

    /// Build a fresh condition ready to be polled
    pub fn build(&self) -> Box<dyn Condition> {
        match self {
            Self::ObjectAppeared(t) => Box::new(ObjectAppeared::new(t.clone())),
            Self::ObjectDisappeared(t) => Box::new(ObjectDisappeared::new(t.clone())),
            Self::LabelTextEquals {
                target,
                expected,
                kind,
            } => {
                let condition = LabelTextEquals::new(target.clone(), expected.clone());
                Box::new(match kind {
                    Some(kind) => condition.with_kind(*kind),
                    None => condition,
                })
            }
            Self::SelectableInteractable(t) => Box::new(SelectableInteractable::new(t.clone())),
            Self::ButtonAccessible(t) => Box::new(ButtonAccessible::new(t.clone())),
            Self::SceneLoaded(scene) => Box::new(SceneLoaded::new(scene.clone())),
            Self::Predicate { label, check } => Box::new(Predicate::new(label.clone(), check.clone())),
            Self::AllOf(parts) => Box::new(Composite::new(
                MatchMode::All,
                parts.iter().map(ConditionSpec::build).collect(),
            )),
            Self::AnyOf(parts) => Box::new(Composite::new(
                MatchMode::Any,
                parts.iter().map(ConditionSpec::build).collect(),
            )),
        }
    }

    /// Combine specs under a match mode; a single spec is returned as is
    pub fn combine(mode: MatchMode, mut specs: Vec<ConditionSpec>) -> Self {
        if specs.len() == 1 {
            if let Some(only) = specs.pop() {
                return only;
            }
        }
        match mode {
            MatchMode::All => Self::AllOf(specs),
            MatchMode::Any => Self::AnyOf(specs),
        }
    }
}

impl fmt::Debug for ConditionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ObjectAppeared(t) => write!(f, "ObjectAppeared({})", t),
            Self::ObjectDisappeared(t) => write!(f, "ObjectDisappeared({})", t),
            Self::LabelTextEquals {
                target, expected, ..
            } => write!(f, "LabelTextEquals({}, {:?})", target, expected),
            Self::SelectableInteractable(t) => write!(f, "SelectableInteractable({})", t),
            Self::ButtonAccessible(t) => write!(f, "ButtonAccessible({})", t),
            Self::SceneLoaded(s) => write!(f, "SceneLoaded({})", s),
            Self::Predicate { label, .. } => write!(f, "Predicate({})", label),
            Self::AllOf(parts) => f.debug_tuple("AllOf").field(parts).finish(),
            Self::AnyOf(parts) => f.debug_tuple("AnyOf").field(parts).finish(),
        }
    }
}
