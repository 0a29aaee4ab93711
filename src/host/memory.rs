//! In-memory UI host
//!
//! Serves a [`SceneFixture`] through the host capability traits. Timeline
//! effects are applied lazily whenever the host is queried, against the tokio
//! clock, so paused-time tests stay deterministic.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::fixture::{Effect, SceneFixture};
use super::{
    Actions, Capabilities, ElementHandle, Lookup, SceneControl, Target, TextInspect, TextKind,
};
use crate::common::{Error, Result};

/// An interaction the engine performed against the host
#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    Press { target: String },
    InputText { target: String, text: String },
    SetToggle { target: String, on: bool },
    SetSlider { target: String, value: f64 },
    SelectOption { target: String, index: usize },
    Hover { target: String },
    Hold { target: String, duration: Duration },
    DragAndDrop { source: String, target: String },
    RaycastClick { target: String },
    Scroll { target: String, delta: (f64, f64) },
    SceneRequested { name: String },
}

#[derive(Debug)]
struct Element {
    path: String,
    id: Option<String>,
    scene: Option<String>,
    active: bool,
    interactable: bool,
    text: Option<String>,
    capabilities: Capabilities,
    options: Vec<String>,
    value: f64,
    toggled: bool,
    selected: Option<usize>,
    on_press: Vec<Effect>,
}

#[derive(Debug)]
struct Scheduled {
    due: Instant,
    effect: Effect,
}

/// Delays past the end of the clock never come due
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline(from: Instant, after: Duration) -> Instant {
    from.checked_add(after).unwrap_or_else(|| from + FAR_FUTURE)
}

#[derive(Debug)]
struct State {
    elements: Vec<Element>,
    active_scene: Option<String>,
    scenes: Vec<String>,
    scene_load: Duration,
    scheduled: Vec<Scheduled>,
    interactions: Vec<Interaction>,
}

/// UI host backed by an in-memory element table
#[derive(Debug)]
pub struct MemoryHost {
    state: Mutex<State>,
}

impl MemoryHost {
    /// Create a host serving the given fixture; the timeline starts now
    pub fn new(fixture: SceneFixture) -> Self {
        let start = Instant::now();

        let elements = fixture
            .elements
            .into_iter()
            .map(|e| Element {
                path: e.path,
                id: e.id,
                scene: e.scene,
                active: e.active,
                interactable: e.interactable,
                text: e.text,
                capabilities: e.widgets.into_iter().collect(),
                options: e.options,
                value: e.value,
                toggled: false,
                selected: None,
                on_press: e.on_press,
            })
            .collect();

        let scheduled = fixture
            .timeline
            .into_iter()
            .flat_map(|entry| {
                let due = deadline(start, Duration::from_millis(entry.after_ms));
                entry
                    .effects
                    .into_iter()
                    .map(move |effect| Scheduled { due, effect })
            })
            .collect();

        Self {
            state: Mutex::new(State {
                elements,
                active_scene: fixture.scene,
                scenes: fixture.scenes,
                scene_load: Duration::from_millis(fixture.scene_load_ms),
                scheduled,
                interactions: Vec::new(),
            }),
        }
    }

    /// Create a host with no elements
    pub fn empty() -> Self {
        Self::new(SceneFixture::default())
    }

    /// All interactions performed so far, in order
    pub fn interactions(&self) -> Vec<Interaction> {
        self.lock().interactions.clone()
    }

    /// Apply an effect immediately (used by tests to drive the UI)
    pub fn apply(&self, effect: Effect) {
        self.lock().apply(&effect);
    }

    /// Current text of an element, regardless of widget type
    pub fn text_of(&self, target: &str) -> Option<String> {
        let state = self.lock();
        let idx = state.find(&Target::parse(target))?;
        state.elements[idx].text.clone()
    }

    /// Current slider value of an element
    pub fn value_of(&self, target: &str) -> Option<f64> {
        let state = self.lock();
        let idx = state.find(&Target::parse(target))?;
        Some(state.elements[idx].value)
    }

    /// Current toggle state of an element
    pub fn toggled(&self, target: &str) -> Option<bool> {
        let state = self.lock();
        let idx = state.find(&Target::parse(target))?;
        Some(state.elements[idx].toggled)
    }

    /// Selected dropdown option of an element
    pub fn selected(&self, target: &str) -> Option<usize> {
        let state = self.lock();
        let idx = state.find(&Target::parse(target))?;
        state.elements[idx].selected
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.apply_due(Instant::now());
        state
    }

    /// Run `f` against a live element, failing the action when it is gone or inactive
    fn with_element<T>(
        &self,
        action: &str,
        handle: ElementHandle,
        f: impl FnOnce(&mut State, usize) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.lock();
        let idx = handle.0 as usize;
        let Some(element) = state.elements.get(idx) else {
            return Err(Error::action_failed(action, &format!("#{}", handle.0), "element no longer exists"));
        };
        if !state.is_active(idx) {
            let path = element.path.clone();
            return Err(Error::action_failed(action, &path, "element is not active"));
        }
        f(&mut state, idx)
    }
}

impl State {
    fn apply_due(&mut self, now: Instant) {
        if self.scheduled.iter().all(|s| s.due > now) {
            return;
        }
        let mut due: Vec<Scheduled> = Vec::new();
        self.scheduled.retain_mut(|s| {
            if s.due <= now {
                due.push(Scheduled {
                    due: s.due,
                    effect: s.effect.clone(),
                });
                false
            } else {
                true
            }
        });
        due.sort_by_key(|s| s.due);
        for s in due {
            tracing::trace!(effect = ?s.effect, "Applying scheduled effect");
            self.apply(&s.effect);
        }
    }

    fn apply(&mut self, effect: &Effect) {
        match effect {
            Effect::SetText { target, text } => {
                if let Some(idx) = self.find(&Target::parse(target)) {
                    self.elements[idx].text = Some(text.clone());
                }
            }
            Effect::Activate { target } => {
                if let Some(idx) = self.find(&Target::parse(target)) {
                    self.elements[idx].active = true;
                }
            }
            Effect::Deactivate { target } => {
                if let Some(idx) = self.find(&Target::parse(target)) {
                    self.elements[idx].active = false;
                }
            }
            Effect::SetInteractable {
                target,
                interactable,
            } => {
                if let Some(idx) = self.find(&Target::parse(target)) {
                    self.elements[idx].interactable = *interactable;
                }
            }
            Effect::LoadScene { scene } => {
                self.active_scene = Some(scene.clone());
            }
        }
    }

    fn in_active_scene(&self, element: &Element) -> bool {
        match &element.scene {
            None => true,
            Some(scene) => self.active_scene.as_deref() == Some(scene.as_str()),
        }
    }

    fn find(&self, target: &Target) -> Option<usize> {
        if target.is_empty() {
            return None;
        }
        self.elements.iter().position(|e| {
            self.in_active_scene(e)
                && match target {
                    Target::Path(path) => &e.path == path,
                    Target::Id(id) => e.id.as_deref() == Some(id.as_str()),
                }
        })
    }

    /// Active in hierarchy: the element and every ancestor present in the table
    fn is_active(&self, idx: usize) -> bool {
        let element = &self.elements[idx];
        if !element.active || !self.in_active_scene(element) {
            return false;
        }
        let mut path = element.path.as_str();
        while let Some((parent, _)) = path.rsplit_once('/') {
            let parent_inactive = self
                .elements
                .iter()
                .any(|e| e.path == parent && self.in_active_scene(e) && !e.active);
            if parent_inactive {
                return false;
            }
            path = parent;
        }
        true
    }

    fn path(&self, idx: usize) -> String {
        self.elements[idx].path.clone()
    }
}

impl Lookup for MemoryHost {
    fn resolve(&self, target: &Target) -> Option<ElementHandle> {
        self.lock().find(target).map(|idx| ElementHandle(idx as u64))
    }

    fn is_active(&self, handle: ElementHandle) -> bool {
        let state = self.lock();
        let idx = handle.0 as usize;
        idx < state.elements.len() && state.is_active(idx)
    }

    fn capabilities(&self, handle: ElementHandle) -> Capabilities {
        self.lock()
            .elements
            .get(handle.0 as usize)
            .map(|e| e.capabilities.clone())
            .unwrap_or_default()
    }

    fn is_interactable(&self, handle: ElementHandle) -> bool {
        self.lock()
            .elements
            .get(handle.0 as usize)
            .map(|e| e.interactable)
            .unwrap_or(false)
    }

    fn name(&self, handle: ElementHandle) -> Option<String> {
        self.lock().elements.get(handle.0 as usize).map(|e| {
            e.path
                .rsplit_once('/')
                .map(|(_, name)| name.to_string())
                .unwrap_or_else(|| e.path.clone())
        })
    }
}

impl TextInspect for MemoryHost {
    fn read_text(&self, handle: ElementHandle, kind: TextKind) -> Option<String> {
        let state = self.lock();
        let element = state.elements.get(handle.0 as usize)?;
        if element.capabilities.contains(&kind.capability()) {
            element.text.clone()
        } else {
            None
        }
    }
}

#[async_trait]
impl Actions for MemoryHost {
    async fn press(&self, handle: ElementHandle) -> Result<()> {
        self.with_element("press", handle, |state, idx| {
            let effects = state.elements[idx].on_press.clone();
            let target = state.path(idx);
            state.interactions.push(Interaction::Press { target });
            for effect in &effects {
                state.apply(effect);
            }
            Ok(())
        })
    }

    async fn input_text(&self, handle: ElementHandle, text: &str) -> Result<()> {
        self.with_element("input text", handle, |state, idx| {
            state.elements[idx].text = Some(text.to_string());
            let target = state.path(idx);
            state.interactions.push(Interaction::InputText {
                target,
                text: text.to_string(),
            });
            Ok(())
        })
    }

    async fn set_toggle(&self, handle: ElementHandle, on: bool) -> Result<()> {
        self.with_element("set toggle", handle, |state, idx| {
            state.elements[idx].toggled = on;
            let target = state.path(idx);
            state.interactions.push(Interaction::SetToggle { target, on });
            Ok(())
        })
    }

    async fn set_slider(&self, handle: ElementHandle, value: f64) -> Result<()> {
        self.with_element("set slider", handle, |state, idx| {
            state.elements[idx].value = value;
            let target = state.path(idx);
            state.interactions.push(Interaction::SetSlider { target, value });
            Ok(())
        })
    }

    async fn select_option(&self, handle: ElementHandle, index: usize) -> Result<()> {
        self.with_element("select option", handle, |state, idx| {
            let count = state.elements[idx].options.len();
            let target = state.path(idx);
            if index >= count {
                let range = if count == 0 {
                    "dropdown has no options".to_string()
                } else {
                    format!("index {} out of range (0-{})", index, count - 1)
                };
                return Err(Error::action_failed("select option", &target, range));
            }
            let element = &mut state.elements[idx];
            element.selected = Some(index);
            element.text = Some(element.options[index].clone());
            state
                .interactions
                .push(Interaction::SelectOption { target, index });
            Ok(())
        })
    }

    async fn hover(&self, handle: ElementHandle) -> Result<()> {
        self.with_element("hover", handle, |state, idx| {
            let target = state.path(idx);
            state.interactions.push(Interaction::Hover { target });
            Ok(())
        })
    }

    async fn hold(&self, handle: ElementHandle, duration: Duration) -> Result<()> {
        // Validate before and after: the element may vanish during the hold
        self.with_element("hold", handle, |_, _| Ok(()))?;
        tokio::time::sleep(duration).await;
        self.with_element("hold", handle, |state, idx| {
            let target = state.path(idx);
            state
                .interactions
                .push(Interaction::Hold { target, duration });
            Ok(())
        })
    }

    async fn drag_and_drop(&self, source: ElementHandle, target: ElementHandle) -> Result<()> {
        let target_path = self.with_element("drop", target, |state, idx| Ok(state.path(idx)))?;
        self.with_element("drag", source, |state, idx| {
            let source = state.path(idx);
            state.interactions.push(Interaction::DragAndDrop {
                source,
                target: target_path,
            });
            Ok(())
        })
    }

    async fn raycast_click(&self, handle: ElementHandle) -> Result<()> {
        self.with_element("raycast click", handle, |state, idx| {
            let effects = state.elements[idx].on_press.clone();
            let target = state.path(idx);
            state.interactions.push(Interaction::RaycastClick { target });
            for effect in &effects {
                state.apply(effect);
            }
            Ok(())
        })
    }

    async fn scroll(&self, handle: ElementHandle, delta: (f64, f64)) -> Result<()> {
        self.with_element("scroll", handle, |state, idx| {
            let target = state.path(idx);
            state.interactions.push(Interaction::Scroll { target, delta });
            Ok(())
        })
    }
}

#[async_trait]
impl SceneControl for MemoryHost {
    fn active_scene(&self) -> Option<String> {
        self.lock().active_scene.clone()
    }

    async fn request_scene(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        let known = state.scenes.iter().any(|s| s == name)
            || state.active_scene.as_deref() == Some(name)
            || state.elements.iter().any(|e| e.scene.as_deref() == Some(name));
        if !known {
            return Err(Error::action_failed(
                "load scene",
                name,
                "scene is not known to the host",
            ));
        }

        state.interactions.push(Interaction::SceneRequested {
            name: name.to_string(),
        });
        let effect = Effect::LoadScene {
            scene: name.to_string(),
        };
        if state.scene_load.is_zero() {
            state.apply(&effect);
        } else {
            let due = deadline(Instant::now(), state.scene_load);
            state.scheduled.push(Scheduled { due, effect });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> SceneFixture {
        SceneFixture::from_yaml(
            r#"
scene: MainMenu
scenes: [GameScene]
scene_load_ms: 100
elements:
  - path: Canvas
  - path: Canvas/PlayButton
    id: Play
    widgets: [button, selectable]
    on_press:
      - { type: set_text, target: Canvas/Status, text: Game Started }
  - path: Canvas/Status
    text: Idle
    widgets: [plain_text]
  - path: Canvas/Quality
    widgets: [dropdown]
    options: [Low, Medium, High]
  - path: Canvas/Panel
    active: false
  - path: Canvas/Panel/Child
  - path: Hud/Score
    scene: GameScene
    text: "0"
    widgets: [rich_text]
timeline:
  - after_ms: 500
    effects:
      - { type: activate, target: Canvas/Panel }
"#,
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_by_path_and_id() {
        let host = MemoryHost::new(fixture());
        let by_path = host.resolve(&Target::parse("Canvas/PlayButton"));
        let by_id = host.resolve(&Target::parse("id:Play"));
        assert!(by_path.is_some());
        assert_eq!(by_path, by_id);
        assert!(host.resolve(&Target::parse("id:play")).is_none());
        assert!(host.resolve(&Target::parse("Canvas/Missing")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactive_parent_hides_child() {
        let host = MemoryHost::new(fixture());
        let child = host.resolve(&Target::parse("Canvas/Panel/Child")).unwrap();
        assert!(!host.is_active(child));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(host.is_active(child));
    }

    #[tokio::test(start_paused = true)]
    async fn test_press_applies_effects_and_records() {
        let host = MemoryHost::new(fixture());
        let play = host.resolve(&Target::parse("id:Play")).unwrap();
        host.press(play).await.unwrap();

        assert_eq!(host.text_of("Canvas/Status").as_deref(), Some("Game Started"));
        assert_eq!(
            host.interactions(),
            vec![Interaction::Press {
                target: "Canvas/PlayButton".to_string()
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_text_respects_widget_variant() {
        let host = MemoryHost::new(fixture());
        let status = host.resolve(&Target::parse("Canvas/Status")).unwrap();
        assert_eq!(host.read_text(status, TextKind::Plain).as_deref(), Some("Idle"));
        assert_eq!(host.read_text(status, TextKind::Rich), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_option_out_of_range_fails() {
        let host = MemoryHost::new(fixture());
        let quality = host.resolve(&Target::parse("Canvas/Quality")).unwrap();
        host.select_option(quality, 2).await.unwrap();
        assert_eq!(host.selected("Canvas/Quality"), Some(2));

        let err = host.select_option(quality, 3).await.unwrap_err();
        assert!(err.to_string().contains("out of range (0-2)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_press_on_inactive_element_fails() {
        let host = MemoryHost::new(fixture());
        let panel = host.resolve(&Target::parse("Canvas/Panel")).unwrap();
        assert!(host.press(panel).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scene_request_is_delayed_and_scopes_elements() {
        let host = MemoryHost::new(fixture());
        assert!(host.resolve(&Target::parse("Hud/Score")).is_none());

        host.request_scene("GameScene").await.unwrap();
        assert_eq!(host.active_scene().as_deref(), Some("MainMenu"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(host.active_scene().as_deref(), Some("GameScene"));
        assert!(host.resolve(&Target::parse("Hud/Score")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_delays_never_come_due() {
        let mut fixture = fixture();
        fixture.scene_load_ms = u64::MAX;
        fixture.timeline[0].after_ms = u64::MAX;
        let host = MemoryHost::new(fixture);

        host.request_scene("GameScene").await.unwrap();
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(host.active_scene().as_deref(), Some("MainMenu"));
        let child = host.resolve(&Target::parse("Canvas/Panel/Child")).unwrap();
        assert!(!host.is_active(child));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_scene_fails() {
        let host = MemoryHost::new(fixture());
        assert!(host.request_scene("Credits").await.is_err());
    }
}
