//! Built-in actions
//!
//! Most actions first wait for their target to appear, then check that the
//! element carries the widget they need and finally make one boundary call
//! on the host. Drag-and-drop and raycast clicks resolve their targets once,
//! without waiting.

use std::fmt;
use std::time::Duration;

use super::condition::{ButtonAccessible, LabelTextEquals, ObjectAppeared, SceneLoaded};
use super::step::StepContext;
use crate::common::{Error, Result};
use crate::host::{Capability, ElementHandle, Target};

/// One boundary action and its payload
#[derive(Debug, Clone, PartialEq)]
pub enum ActionSpec {
    Press { target: Target },
    AssertLabel { target: Target, expected: String },
    LoadScene { scene: String },
    InputText { target: Target, text: String },
    SetToggle { target: Target, on: bool },
    WaitSeconds { seconds: f64 },
    DragAndDrop { source: Target, target: Target },
    RaycastClick { target: Target },
    SelectDropdown { target: Target, index: usize },
    SetSlider { target: Target, value: f64 },
    Hover { target: Target },
    Hold { target: Target, seconds: f64 },
    Scroll { target: Target, delta: (f64, f64) },
}

impl ActionSpec {
    /// Short name of the action, as written in case files
    pub fn name(&self) -> &'static str {
        match self {
            Self::Press { .. } => "Press",
            Self::AssertLabel { .. } => "AssertLabel",
            Self::LoadScene { .. } => "LoadScene",
            Self::InputText { .. } => "InputText",
            Self::SetToggle { .. } => "SetToggle",
            Self::WaitSeconds { .. } => "WaitSeconds",
            Self::DragAndDrop { .. } => "DragAndDrop",
            Self::RaycastClick { .. } => "RaycastClick",
            Self::SelectDropdown { .. } => "SelectDropdown",
            Self::SetSlider { .. } => "SetSlider",
            Self::Hover { .. } => "Hover",
            Self::Hold { .. } => "Hold",
            Self::Scroll { .. } => "Scroll",
        }
    }
}

impl fmt::Display for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoadScene { scene } => write!(f, "{} ({})", self.name(), scene),
            Self::WaitSeconds { seconds } => write!(f, "{} ({}s)", self.name(), seconds),
            Self::DragAndDrop { source, target } => {
                write!(f, "{} ({} -> {})", self.name(), source, target)
            }
            Self::Press { target }
            | Self::AssertLabel { target, .. }
            | Self::InputText { target, .. }
            | Self::SetToggle { target, .. }
            | Self::RaycastClick { target }
            | Self::SelectDropdown { target, .. }
            | Self::SetSlider { target, .. }
            | Self::Hover { target }
            | Self::Hold { target, .. }
            | Self::Scroll { target, .. } => write!(f, "{} ({})", self.name(), target),
        }
    }
}

/// Seconds as a duration; negative or non-finite values fail the action
fn seconds(action: &str, target: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        Error::action_failed(
            action,
            target,
            format!("{} is not a valid number of seconds", secs),
        )
    })
}

/// Wait for the target to appear and return its handle
async fn appeared(ctx: &StepContext, target: &Target) -> Result<ElementHandle> {
    let mut condition = ObjectAppeared::new(target.clone());
    ctx.wait_for(&mut condition).await?;
    condition
        .handle()
        .ok_or_else(|| Error::action_failed("lookup", &target.to_string(), "element vanished"))
}

/// Resolve the target once, without waiting
fn resolve_now(ctx: &StepContext, action: &str, target: &Target) -> Result<ElementHandle> {
    let host = ctx.host();
    match host.resolve(target) {
        Some(handle) if host.is_active(handle) => Ok(handle),
        Some(_) => Err(Error::action_failed(action, &target.to_string(), "target is inactive")),
        None => Err(Error::action_failed(action, &target.to_string(), "target not found")),
    }
}

/// Fail unless the element carries one of the capabilities
fn require(
    ctx: &StepContext,
    handle: ElementHandle,
    target: &Target,
    any_of: &[Capability],
) -> Result<()> {
    let caps = ctx.host().capabilities(handle);
    if any_of.iter().any(|c| caps.contains(c)) {
        Ok(())
    } else {
        Err(Error::missing_capability(&target.to_string(), any_of[0]))
    }
}

/// Execute one action against the context's host
pub async fn perform(spec: &ActionSpec, ctx: &StepContext) -> Result<()> {
    tracing::debug!(step = %ctx.label(), action = %spec, "Performing action");
    let host = ctx.host();

    match spec {
        ActionSpec::Press { target } => {
            let handle = appeared(ctx, target).await?;
            require(ctx, handle, target, &[Capability::Button])?;
            let mut accessible = ButtonAccessible::new(target.clone());
            ctx.wait_for(&mut accessible).await?;
            host.press(handle).await?;
        }
        ActionSpec::AssertLabel { target, expected } => {
            let mut label = LabelTextEquals::new(target.clone(), expected.clone());
            ctx.wait_for(&mut label).await?;
        }
        ActionSpec::LoadScene { scene } => {
            host.request_scene(scene).await?;
            let mut loaded = SceneLoaded::new(scene.clone());
            ctx.wait_for(&mut loaded).await?;
        }
        ActionSpec::InputText { target, text } => {
            let handle = appeared(ctx, target).await?;
            require(
                ctx,
                handle,
                target,
                &[Capability::InputField, Capability::RichInputField],
            )?;
            host.input_text(handle, text).await?;
        }
        ActionSpec::SetToggle { target, on } => {
            let handle = appeared(ctx, target).await?;
            require(ctx, handle, target, &[Capability::Toggle])?;
            host.set_toggle(handle, *on).await?;
        }
        ActionSpec::WaitSeconds { seconds: secs } => {
            tokio::time::sleep(seconds("wait", "", *secs)?).await;
        }
        ActionSpec::DragAndDrop { source, target } => {
            let from = resolve_now(ctx, "drag", source)?;
            let to = resolve_now(ctx, "drop", target)?;
            host.drag_and_drop(from, to).await?;
        }
        ActionSpec::RaycastClick { target } => {
            let handle = resolve_now(ctx, "raycast click", target)?;
            host.raycast_click(handle).await?;
        }
        ActionSpec::SelectDropdown { target, index } => {
            let handle = appeared(ctx, target).await?;
            require(
                ctx,
                handle,
                target,
                &[Capability::Dropdown, Capability::RichDropdown],
            )?;
            host.select_option(handle, *index).await?;
        }
        ActionSpec::SetSlider { target, value } => {
            let handle = appeared(ctx, target).await?;
            require(ctx, handle, target, &[Capability::Slider])?;
            host.set_slider(handle, *value).await?;
        }
        ActionSpec::Hover { target } => {
            let handle = appeared(ctx, target).await?;
            host.hover(handle).await?;
        }
        ActionSpec::Hold { target, seconds: secs } => {
            let duration = seconds("hold", &target.to_string(), *secs)?;
            let handle = appeared(ctx, target).await?;
            host.hold(handle, duration).await?;
        }
        ActionSpec::Scroll { target, delta } => {
            let handle = appeared(ctx, target).await?;
            require(ctx, handle, target, &[Capability::ScrollRect])?;
            host.scroll(handle, *delta).await?;
        }
    }

    // Let the UI react before the next step looks at it
    ctx.frames().tick().await;
    tracing::debug!(step = %ctx.label(), action = %spec, "Action completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::frames::Frames;
    use crate::engine::waiter::Waiter;
    use crate::host::{Interaction, MemoryHost, SceneControl, SceneFixture};
    use std::sync::Arc;

    const FIXTURE: &str = r#"
scene: MainMenu
scenes: [Game]
scene_load_ms: 200
elements:
  - path: Canvas/Play
    widgets: [button, selectable]
    interactable: false
    on_press:
      - { type: set_text, target: Canvas/Status, text: Started }
  - path: Canvas/Status
    text: Idle
    widgets: [plain_text]
  - path: Canvas/Name
    widgets: [rich_input_field]
  - path: Canvas/Volume
    widgets: [slider]
  - path: Canvas/Quality
    widgets: [dropdown]
    options: [Low, High]
  - path: Canvas/Card
  - path: Canvas/Slot
timeline:
  - after_ms: 300
    effects:
      - { type: set_interactable, target: Canvas/Play, interactable: true }
"#;

    fn setup(timeout: Duration) -> (Arc<MemoryHost>, StepContext) {
        let host = Arc::new(MemoryHost::new(SceneFixture::from_yaml(FIXTURE).unwrap()));
        let waiter = Waiter::new(timeout, 10, Frames::new(Duration::from_millis(16)));
        let ctx = StepContext::new(host.clone(), waiter).labelled("step 1 'action'");
        (host, ctx)
    }

    fn target(s: &str) -> Target {
        Target::parse(s)
    }

    #[tokio::test(start_paused = true)]
    async fn test_press_waits_for_interactable_button() {
        let (host, ctx) = setup(Duration::from_secs(5));
        perform(&ActionSpec::Press { target: target("Canvas/Play") }, &ctx)
            .await
            .unwrap();
        assert_eq!(host.text_of("Canvas/Status").as_deref(), Some("Started"));

        perform(
            &ActionSpec::AssertLabel {
                target: target("Canvas/Status"),
                expected: "Started".to_string(),
            },
            &ctx,
        )
        .await
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_press_without_button_fails_with_missing_capability() {
        let (_, ctx) = setup(Duration::from_secs(5));
        let err = perform(&ActionSpec::Press { target: target("Canvas/Status") }, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingCapability { .. }));
        assert_eq!(err.to_string(), "Target 'Canvas/Status' has no button widget attached");
    }

    #[tokio::test(start_paused = true)]
    async fn test_press_missing_target_times_out() {
        let (_, ctx) = setup(Duration::from_secs(1));
        let err = perform(&ActionSpec::Press { target: target("Canvas/Nope") }, &ctx)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("ObjectAppeared(Canvas/Nope): not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_accepts_rich_input_field() {
        let (host, ctx) = setup(Duration::from_secs(1));
        perform(
            &ActionSpec::InputText {
                target: target("Canvas/Name"),
                text: "Ada".to_string(),
            },
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!(host.text_of("Canvas/Name").as_deref(), Some("Ada"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slider_and_dropdown() {
        let (host, ctx) = setup(Duration::from_secs(1));
        perform(
            &ActionSpec::SetSlider {
                target: target("Canvas/Volume"),
                value: 0.25,
            },
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!(host.value_of("Canvas/Volume"), Some(0.25));

        let err = perform(
            &ActionSpec::SelectDropdown {
                target: target("Canvas/Quality"),
                index: 5,
            },
            &ctx,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::ActionFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_scene_waits_until_active() {
        let (host, ctx) = setup(Duration::from_secs(2));
        perform(&ActionSpec::LoadScene { scene: "Game".to_string() }, &ctx)
            .await
            .unwrap();
        assert_eq!(host.active_scene().as_deref(), Some("Game"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drag_and_drop_resolves_immediately() {
        let (host, ctx) = setup(Duration::from_secs(2));
        perform(
            &ActionSpec::DragAndDrop {
                source: target("Canvas/Card"),
                target: target("Canvas/Slot"),
            },
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!(
            host.interactions(),
            vec![Interaction::DragAndDrop {
                source: "Canvas/Card".to_string(),
                target: "Canvas/Slot".to_string()
            }]
        );

        let err = perform(
            &ActionSpec::RaycastClick {
                target: target("Canvas/Ghost"),
            },
            &ctx,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("target not found"));
    }

    #[test]
    fn test_seconds_rejects_invalid_values() {
        assert_eq!(seconds("wait", "", 0.5).unwrap(), Duration::from_millis(500));
        for bad in [-1.0, f64::NAN, f64::INFINITY] {
            let err = seconds("hold", "Canvas/Play", bad).unwrap_err();
            assert!(matches!(err, Error::ActionFailed { .. }), "{}", err);
        }
    }
}
