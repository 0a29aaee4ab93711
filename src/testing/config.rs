//! Test case file format
//!
//! Defines the data structures for deserializing YAML test cases and their
//! conversion into engine [`TestCase`]s.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::common::{Error, Result};
use crate::engine::{ActionSpec, ConditionSpec, MatchMode, Step, StepKind, TestCase};
use crate::host::{Target, TextKind};

/// A complete test case loaded from a YAML file
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct CaseFile {
    /// Name of the test case
    pub name: String,
    /// Optional description of what the case verifies
    pub description: Option<String>,
    /// Stop at the first failing step
    #[serde(default = "default_true")]
    pub stop_on_error: bool,
    /// Scene fixture to run against, relative to the case file
    pub fixture: Option<PathBuf>,
    /// The sequence of steps to execute
    pub steps: Vec<StepFile>,
}

fn default_true() -> bool {
    true
}

/// A single step as written in a case file
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepFile {
    /// Perform one boundary action
    Action {
        action: String,
        target: Option<String>,
        source: Option<String>,
        expected: Option<String>,
        text: Option<String>,
        scene: Option<String>,
        on: Option<bool>,
        index: Option<usize>,
        value: Option<f64>,
        seconds: Option<f64>,
        delta: Option<(f64, f64)>,
        note: Option<String>,
        timeout: Option<f64>,
    },
    /// Wait until conditions hold
    WaitFor {
        #[serde(default)]
        mode: ModeFile,
        conditions: Vec<ConditionFile>,
        /// Per-wait timeout in seconds (0 or absent = ambient)
        wait_timeout: Option<f64>,
        note: Option<String>,
        timeout: Option<f64>,
    },
    /// Sleep for a fixed time
    WaitTime {
        seconds: f64,
        note: Option<String>,
        timeout: Option<f64>,
    },
    /// Write a message to the log
    Log {
        message: String,
        note: Option<String>,
        timeout: Option<f64>,
    },
    /// Run nested steps in order
    Group {
        steps: Vec<StepFile>,
        note: Option<String>,
        timeout: Option<f64>,
    },
}

/// How the conditions of a `wait_for` step combine
#[derive(Deserialize, Debug, Default, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum ModeFile {
    #[default]
    All,
    Any,
}

impl From<ModeFile> for MatchMode {
    fn from(mode: ModeFile) -> Self {
        match mode {
            ModeFile::All => MatchMode::All,
            ModeFile::Any => MatchMode::Any,
        }
    }
}

/// A condition as written in a case file
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionFile {
    ObjectAppeared {
        target: String,
    },
    ObjectDisappeared {
        target: String,
    },
    LabelTextEquals {
        target: String,
        expected: String,
        kind: Option<TextKind>,
    },
    SelectableInteractable {
        target: String,
    },
    ButtonAccessible {
        target: String,
    },
    SceneLoaded {
        scene: String,
    },
    AllOf {
        conditions: Vec<ConditionFile>,
    },
    AnyOf {
        conditions: Vec<ConditionFile>,
    },
}

impl ConditionFile {
    fn into_spec(self) -> ConditionSpec {
        match self {
            Self::ObjectAppeared { target } => ConditionSpec::ObjectAppeared(Target::parse(&target)),
            Self::ObjectDisappeared { target } => {
                ConditionSpec::ObjectDisappeared(Target::parse(&target))
            }
            Self::LabelTextEquals {
                target,
                expected,
                kind,
            } => ConditionSpec::LabelTextEquals {
                target: Target::parse(&target),
                expected,
                kind,
            },
            Self::SelectableInteractable { target } => {
                ConditionSpec::SelectableInteractable(Target::parse(&target))
            }
            Self::ButtonAccessible { target } => ConditionSpec::ButtonAccessible(Target::parse(&target)),
            Self::SceneLoaded { scene } => ConditionSpec::SceneLoaded(scene),
            Self::AllOf { conditions } => {
                ConditionSpec::AllOf(conditions.into_iter().map(Self::into_spec).collect())
            }
            Self::AnyOf { conditions } => {
                ConditionSpec::AnyOf(conditions.into_iter().map(Self::into_spec).collect())
            }
        }
    }
}

impl CaseFile {
    /// Parse a case from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Convert into a runnable test case
    ///
    /// Invalid steps are reported as [`Error::Config`] naming the step
    /// number, e.g. `step 2.1` for the first step of the second (group) step.
    pub fn into_test_case(self) -> Result<TestCase> {
        let steps = convert_steps(self.steps, "")?;
        let mut case = TestCase::new(self.name, steps).with_stop_on_error(self.stop_on_error);
        if let Some(description) = self.description {
            case = case.with_description(description);
        }
        Ok(case)
    }
}

/// A case file loaded from disk
#[derive(Debug)]
pub struct LoadedCase {
    pub path: PathBuf,
    pub case: TestCase,
    /// Fixture path resolved against the case file's directory
    pub fixture: Option<PathBuf>,
}

/// Load, parse and convert a case file
pub fn load_case(path: &Path) -> Result<LoadedCase> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    let file: CaseFile =
        serde_yaml::from_str(&content).map_err(|e| Error::case_file(path, e.to_string()))?;

    // Resolve the fixture relative to the case file
    let case_dir = path.parent().unwrap_or(Path::new("."));
    let fixture = file.fixture.as_ref().map(|f| {
        if f.is_relative() {
            case_dir.join(f)
        } else {
            f.clone()
        }
    });

    let case = file.into_test_case().map_err(|e| match e {
        Error::Config(message) => Error::case_file(path, message),
        other => other,
    })?;

    Ok(LoadedCase {
        path: path.to_path_buf(),
        case,
        fixture,
    })
}

fn convert_steps(steps: Vec<StepFile>, prefix: &str) -> Result<Vec<Step>> {
    steps
        .into_iter()
        .enumerate()
        .map(|(i, step)| convert_step(step, &format!("{}{}", prefix, i + 1)))
        .collect()
}

fn secs(value: f64, field: &str) -> std::result::Result<Duration, String> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| format!("{} must be a non-negative number of seconds, got {}", field, value))
}

fn convert_step(step: StepFile, number: &str) -> Result<Step> {
    let invalid = |message: String| Error::Config(format!("step {}: {}", number, message));

    let (kind, note, timeout) = match step {
        StepFile::Action {
            action,
            target,
            source,
            expected,
            text,
            scene,
            on,
            index,
            value,
            seconds,
            delta,
            note,
            timeout,
        } => {
            let payload = ActionPayload {
                target,
                source,
                expected,
                text,
                scene,
                on,
                index,
                value,
                seconds,
                delta,
            };
            let action = payload.into_action(&action).map_err(invalid)?;
            (StepKind::Action(action), note, timeout)
        }
        StepFile::WaitFor {
            mode,
            conditions,
            wait_timeout,
            note,
            timeout,
        } => {
            if conditions.is_empty() {
                return Err(invalid("wait_for needs at least one condition".to_string()));
            }
            let wait_timeout = match wait_timeout {
                Some(t) => secs(t, "wait_timeout").map_err(invalid)?,
                None => Duration::ZERO,
            };
            let kind = StepKind::WaitFor {
                conditions: conditions.into_iter().map(ConditionFile::into_spec).collect(),
                mode: mode.into(),
                wait_timeout,
            };
            (kind, note, timeout)
        }
        StepFile::WaitTime {
            seconds,
            note,
            timeout,
        } => {
            let duration = secs(seconds, "seconds").map_err(invalid)?;
            (StepKind::WaitTime(duration), note, timeout)
        }
        StepFile::Log {
            message,
            note,
            timeout,
        } => (StepKind::Log(message), note, timeout),
        StepFile::Group {
            steps,
            note,
            timeout,
        } => {
            let steps = convert_steps(steps, &format!("{}.", number))?;
            (StepKind::Group(steps), note, timeout)
        }
    };

    let mut step = Step::new(kind);
    if let Some(note) = note {
        step = step.with_note(note);
    }
    if let Some(timeout) = timeout {
        step = step.with_timeout(secs(timeout, "timeout").map_err(invalid)?);
    }
    Ok(step)
}

/// Optional payload fields of an action step
struct ActionPayload {
    target: Option<String>,
    source: Option<String>,
    expected: Option<String>,
    text: Option<String>,
    scene: Option<String>,
    on: Option<bool>,
    index: Option<usize>,
    value: Option<f64>,
    seconds: Option<f64>,
    delta: Option<(f64, f64)>,
}

fn need<T>(value: Option<T>, action: &str, field: &str) -> std::result::Result<T, String> {
    value.ok_or_else(|| format!("action '{}' needs '{}'", action, field))
}

impl ActionPayload {
    fn seconds(&self, action: &str) -> std::result::Result<f64, String> {
        let value = need(self.seconds, action, "seconds")?;
        secs(value, "seconds")?;
        Ok(value)
    }

    fn target(&mut self, action: &str) -> std::result::Result<Target, String> {
        let target = need(self.target.take(), action, "target")?;
        let target = Target::parse(&target);
        if target.is_empty() {
            return Err(format!("action '{}' has an empty target", action));
        }
        Ok(target)
    }

    /// Build the action named `action`
    ///
    /// Names match case-insensitively with or without underscores, so
    /// `drag_and_drop` and `DragAndDrop` are the same action.
    fn into_action(mut self, action: &str) -> std::result::Result<ActionSpec, String> {
        let key = action.replace(['_', '-'], "").to_ascii_lowercase();
        let spec = match key.as_str() {
            "press" => ActionSpec::Press {
                target: self.target(action)?,
            },
            "assertlabel" => ActionSpec::AssertLabel {
                target: self.target(action)?,
                expected: need(self.expected.take(), action, "expected")?,
            },
            "loadscene" => ActionSpec::LoadScene {
                scene: need(self.scene.take(), action, "scene")?,
            },
            "inputtext" => ActionSpec::InputText {
                target: self.target(action)?,
                text: need(self.text.take(), action, "text")?,
            },
            "settoggle" => ActionSpec::SetToggle {
                target: self.target(action)?,
                on: need(self.on, action, "on")?,
            },
            "waitseconds" => ActionSpec::WaitSeconds {
                seconds: self.seconds(action)?,
            },
            "draganddrop" => ActionSpec::DragAndDrop {
                source: Target::parse(&need(self.source.take(), action, "source")?),
                target: self.target(action)?,
            },
            "raycastclick" => ActionSpec::RaycastClick {
                target: self.target(action)?,
            },
            "selectdropdown" => ActionSpec::SelectDropdown {
                target: self.target(action)?,
                index: need(self.index, action, "index")?,
            },
            "setslider" => ActionSpec::SetSlider {
                target: self.target(action)?,
                value: need(self.value, action, "value")?,
            },
            "hover" => ActionSpec::Hover {
                target: self.target(action)?,
            },
            "hold" => ActionSpec::Hold {
                target: self.target(action)?,
                seconds: self.seconds(action)?,
            },
            "scroll" => ActionSpec::Scroll {
                target: self.target(action)?,
                delta: need(self.delta, action, "delta")?,
            },
            _ => return Err(format!("unknown action '{}'", action)),
        };
        Ok(spec)
    }
}
