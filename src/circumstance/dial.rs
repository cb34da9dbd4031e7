//! The dial room: a continuous control (dial orientation, wrapped modulo
//! 360) plus a bounded retry counter. Pressing the button succeeds only
//! while the dial sits inside the target arc; each miss burns a retry, and
//! running out of retries permanently fails the puzzle, switching the scene
//! into its game-over persona. Sub-state is persisted after every mutating
//! tool call as a comma-separated record.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::message::Message;
use crate::tools::{Tool, ToolOutput, ToolSet};

use super::Circumstance;

const TARGET_ARC_START: f64 = 247.5;
const TARGET_ARC_END: f64 = 292.5;
const STARTING_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
struct DialState {
    orientation: f64,
    retries_left: u32,
    sequence_initiated: bool,
    failed: bool,
}

impl Default for DialState {
    fn default() -> Self {
        Self {
            orientation: 0.0,
            retries_left: STARTING_RETRIES,
            sequence_initiated: false,
            failed: false,
        }
    }
}

impl DialState {
    fn in_target_arc(&self) -> bool {
        (TARGET_ARC_START..=TARGET_ARC_END).contains(&self.orientation)
    }

    fn to_record(&self) -> String {
        format!(
            "{},{},{},{}",
            self.orientation,
            self.retries_left,
            u8::from(self.sequence_initiated),
            u8::from(self.failed),
        )
    }

    fn parse(record: &str) -> Option<Self> {
        let mut fields = record.trim().split(',');
        let orientation = fields.next()?.trim().parse().ok()?;
        let retries_left = fields.next()?.trim().parse().ok()?;
        let sequence_initiated = fields.next()?.trim() == "1";
        let failed = fields.next()?.trim() == "1";
        Some(Self {
            orientation,
            retries_left,
            sequence_initiated,
            failed,
        })
    }
}

fn persist_state(path: &PathBuf, state: &DialState) -> Result<()> {
    std::fs::write(path, state.to_record())
        .with_context(|| format!("failed to persist dial room state {:?}", path))
}

pub struct DialRoom {
    persona: String,
    game_over_persona: String,
    state: Arc<Mutex<DialState>>,
    path: PathBuf,
}

impl DialRoom {
    /// Load persisted sub-state if present, otherwise start at the default
    /// (dial at 0 degrees, full retries).
    pub fn load_or_default(
        persona: impl Into<String>,
        game_over_persona: impl Into<String>,
        path: PathBuf,
    ) -> Result<Arc<Self>> {
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read dial room state {:?}", path))?;
            match DialState::parse(&raw) {
                Some(state) => state,
                None => {
                    tracing::warn!("Dial room state {:?} is unreadable, resetting", path);
                    DialState::default()
                }
            }
        } else {
            DialState::default()
        };

        Ok(Arc::new(Self {
            persona: persona.into(),
            game_over_persona: game_over_persona.into(),
            state: Arc::new(Mutex::new(state)),
            path,
        }))
    }
}

impl Circumstance for DialRoom {
    fn name(&self) -> &str {
        "dial-room"
    }

    fn persona(&self) -> String {
        if self.state.lock().unwrap().failed {
            self.game_over_persona.clone()
        } else {
            self.persona.clone()
        }
    }

    fn context_note(&self) -> String {
        let state = self.state.lock().unwrap();
        if state.failed {
            "The mechanism is sealed. The puzzle can no longer be solved.".to_string()
        } else {
            format!(
                "The dial currently points at {} degrees. {} attempt(s) remain on the button.",
                state.orientation, state.retries_left
            )
        }
    }

    fn tool_set(&self) -> ToolSet {
        ToolSet::new(vec![
            Arc::new(TurnDialTool {
                state: self.state.clone(),
                path: self.path.clone(),
            }),
            Arc::new(PressButtonTool {
                state: self.state.clone(),
                path: self.path.clone(),
            }),
        ])
    }

    fn exit_code_for(&self, _message: &Message) -> Option<i32> {
        // Exit is driven by the sub-state flag, not by anything the
        // assistant says.
        self.state
            .lock()
            .unwrap()
            .sequence_initiated
            .then_some(1)
    }
}

struct TurnDialTool {
    state: Arc<Mutex<DialState>>,
    path: PathBuf,
}

#[async_trait]
impl Tool for TurnDialTool {
    fn name(&self) -> &str {
        "turn_dial"
    }

    fn description(&self) -> &str {
        "Rotate the brass dial by a number of degrees (negative for counter-clockwise)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "degrees": {
                    "type": "number",
                    "description": "Degrees to rotate the dial by"
                }
            },
            "required": ["degrees"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolOutput> {
        let degrees = args["degrees"]
            .as_f64()
            .context("'degrees' must be a number")?;

        let orientation = {
            let mut state = self.state.lock().unwrap();
            if state.failed {
                return Ok(ToolOutput::text("The dial is locked in place."));
            }
            state.orientation = (state.orientation + degrees).rem_euclid(360.0);
            let snapshot = state.clone();
            drop(state);
            persist_state(&self.path, &snapshot)?;
            snapshot.orientation
        };

        Ok(ToolOutput::text(format!(
            "The dial now points at {} degrees.",
            orientation
        )))
    }
}

struct PressButtonTool {
    state: Arc<Mutex<DialState>>,
    path: PathBuf,
}

#[async_trait]
impl Tool for PressButtonTool {
    fn name(&self) -> &str {
        "press_button"
    }

    fn description(&self) -> &str {
        "Press the button below the dial. Only succeeds while the dial is aligned correctly."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: serde_json::Value) -> Result<ToolOutput> {
        let (content, snapshot) = {
            let mut state = self.state.lock().unwrap();
            if state.failed {
                // Terminal: no state change, the retry counter never resets.
                return Ok(ToolOutput::text(
                    "The button gives a dull click. The mechanism is dead.",
                ));
            }
            if state.sequence_initiated {
                return Ok(ToolOutput::text("The chime has already sounded."));
            }

            let content = if state.in_target_arc() {
                state.sequence_initiated = true;
                "A deep chime reverberates through the room. The sequence has been initiated."
                    .to_string()
            } else {
                state.retries_left = state.retries_left.saturating_sub(1);
                if state.retries_left == 0 {
                    state.failed = true;
                    "A harsh buzz sounds, and something inside the wall snaps shut. \
                     The mechanism has sealed itself permanently."
                        .to_string()
                } else {
                    format!(
                        "A harsh buzz sounds. {} attempt(s) remain.",
                        state.retries_left
                    )
                }
            };
            (content, state.clone())
        };

        persist_state(&self.path, &snapshot)?;
        Ok(ToolOutput::text(content))
    }
}
