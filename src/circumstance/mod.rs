//! Scenes ("circumstances") and the multi-track progress state machine.
//!
//! Each scene owns its persona text, its tool set, and a pure exit
//! condition evaluated against newly produced assistant messages. The
//! overall conversation state is a vector of independent progress tracks,
//! one per scene: `0` means the track is still in its scene's default
//! sub-state, any nonzero value is an opaque exit code meaning the track
//! has concluded. The current scene is the one at the first zero-valued
//! track, or the last scene once every track is nonzero.

pub mod dial;
pub mod phrase_gate;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::log::ConversationLog;
use crate::message::{Message, Role};
use crate::scheduler::MessageObserver;
use crate::tools::ToolSet;

pub trait Circumstance: Send + Sync {
    fn name(&self) -> &str;

    /// Persona text for the pinned system message. May change while the
    /// scene is current (e.g. a puzzle entering its game-over state).
    fn persona(&self) -> String;

    /// Extra live context appended below the persona (dial readings,
    /// remaining attempts, ...).
    fn context_note(&self) -> String {
        String::new()
    }

    /// Tools available to the model while this scene is current.
    fn tool_set(&self) -> ToolSet;

    /// Evaluate the exit condition against one assistant message. A nonzero
    /// code concludes this scene's track; `None` leaves it open.
    fn exit_code_for(&self, message: &Message) -> Option<i32>;
}

/// Persisted track vector over the configured scene list.
pub struct SceneProgress {
    scenes: Vec<Arc<dyn Circumstance>>,
    tracks: Mutex<Vec<i32>>,
    path: PathBuf,
}

impl SceneProgress {
    /// Load the persisted track vector, or create the all-zero default.
    /// A stale file whose length no longer matches the scene list is reset.
    pub fn load_or_default(path: PathBuf, scenes: Vec<Arc<dyn Circumstance>>) -> Result<Arc<Self>> {
        assert!(!scenes.is_empty(), "scene list must not be empty");

        let tracks = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read track vector {:?}", path))?;
            let parsed: Result<Vec<i32>, _> =
                raw.trim().split(',').map(|field| field.trim().parse()).collect();
            match parsed {
                Ok(tracks) if tracks.len() == scenes.len() => tracks,
                Ok(tracks) => {
                    tracing::warn!(
                        "Track vector {:?} has {} entries for {} scenes, resetting",
                        path,
                        tracks.len(),
                        scenes.len()
                    );
                    vec![0; scenes.len()]
                }
                Err(e) => {
                    tracing::warn!("Track vector {:?} is unreadable ({}), resetting", path, e);
                    vec![0; scenes.len()]
                }
            }
        } else {
            vec![0; scenes.len()]
        };

        let progress = Arc::new(Self {
            scenes,
            tracks: Mutex::new(tracks.clone()),
            path,
        });
        progress.persist(&tracks)?;
        Ok(progress)
    }

    pub fn current_index(&self) -> usize {
        let tracks = self.tracks.lock().unwrap();
        tracks
            .iter()
            .position(|&code| code == 0)
            .unwrap_or(self.scenes.len() - 1)
    }

    pub fn current(&self) -> Arc<dyn Circumstance> {
        self.scenes[self.current_index()].clone()
    }

    pub fn tracks(&self) -> Vec<i32> {
        self.tracks.lock().unwrap().clone()
    }

    /// The pinned system message regenerated from the current scene.
    pub fn pinned_message(&self) -> Message {
        let scene = self.current();
        let persona = scene.persona();
        let note = scene.context_note();
        if note.is_empty() {
            Message::system(persona)
        } else {
            Message::system(format!("{}\n\n{}", persona, note))
        }
    }

    /// Feed a new batch to the current scene. At most one track advances
    /// per batch; the whole vector is persisted on every transition.
    pub fn observe(&self, batch: &[Message]) -> Result<bool> {
        let index = {
            let tracks = self.tracks.lock().unwrap();
            match tracks.iter().position(|&code| code == 0) {
                Some(index) => index,
                // Terminal: every track concluded, nothing left to advance.
                None => return Ok(false),
            }
        };
        let scene = &self.scenes[index];

        for message in batch.iter().filter(|m| m.role == Role::Assistant) {
            if let Some(code) = scene.exit_code_for(message) {
                if code == 0 {
                    continue;
                }
                let snapshot = {
                    let mut tracks = self.tracks.lock().unwrap();
                    tracks[index] = code;
                    tracks.clone()
                };
                self.persist(&snapshot)?;
                tracing::info!(
                    "Scene '{}' concluded with exit code {} (tracks now {:?})",
                    scene.name(),
                    code,
                    snapshot
                );
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn persist(&self, tracks: &[i32]) -> Result<()> {
        let line = tracks
            .iter()
            .map(|code| code.to_string())
            .collect::<Vec<_>>()
            .join(",");
        std::fs::write(&self.path, line)
            .with_context(|| format!("failed to persist track vector {:?}", self.path))
    }
}

/// Bridges appended batches into the state machine and keeps the pinned
/// system message in sync with the current scene's persona.
pub struct SceneObserver {
    progress: Arc<SceneProgress>,
    log: Arc<ConversationLog>,
}

impl SceneObserver {
    pub fn new(progress: Arc<SceneProgress>, log: Arc<ConversationLog>) -> Arc<Self> {
        Arc::new(Self { progress, log })
    }
}

#[async_trait]
impl MessageObserver for SceneObserver {
    async fn on_new_messages(&self, messages: &[Message]) {
        match self.progress.observe(messages) {
            Ok(true) => {
                tracing::info!("Now in scene '{}'", self.progress.current().name());
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!("Failed to persist scene transition: {:#}", e);
            }
        }

        // Covers both scene transitions and persona changes inside the
        // current scene (e.g. the dial room entering game over).
        self.log
            .replace_pinned_if_changed(self.progress.pinned_message())
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phrase::PhraseMatcher;

    struct StubScene {
        name: String,
        matcher: PhraseMatcher,
        code: i32,
    }

    impl StubScene {
        fn new(name: &str, phrase: &str, code: i32) -> Arc<dyn Circumstance> {
            Arc::new(Self {
                name: name.to_string(),
                matcher: PhraseMatcher::new(phrase).unwrap(),
                code,
            })
        }
    }

    impl Circumstance for StubScene {
        fn name(&self) -> &str {
            &self.name
        }

        fn persona(&self) -> String {
            format!("You are hosting {}.", self.name)
        }

        fn tool_set(&self) -> ToolSet {
            ToolSet::empty()
        }

        fn exit_code_for(&self, message: &Message) -> Option<i32> {
            self.matcher.matches_unquoted(message.text()).then_some(self.code)
        }
    }

    fn two_scene_progress(dir: &tempfile::TempDir) -> Arc<SceneProgress> {
        SceneProgress::load_or_default(
            dir.path().join("tracks.txt"),
            vec![
                StubScene::new("first", "onward", 1),
                StubScene::new("second", "farewell", 1),
            ],
        )
        .unwrap()
    }

    #[test]
    fn advances_first_zero_track_on_qualifying_exit() {
        let dir = tempfile::tempdir().unwrap();
        let progress = two_scene_progress(&dir);
        assert_eq!(progress.tracks(), vec![0, 0]);

        let advanced = progress
            .observe(&[Message::assistant("Onward, then!")])
            .unwrap();
        assert!(advanced);
        assert_eq!(progress.tracks(), vec![1, 0]);
        assert_eq!(progress.current().name(), "second");

        let advanced = progress
            .observe(&[Message::assistant("Farewell, traveler.")])
            .unwrap();
        assert!(advanced);
        assert_eq!(progress.tracks(), vec![1, 1]);
    }

    #[test]
    fn terminal_fallback_is_last_scene() {
        let dir = tempfile::tempdir().unwrap();
        let progress = two_scene_progress(&dir);
        progress.observe(&[Message::assistant("onward")]).unwrap();
        progress.observe(&[Message::assistant("farewell")]).unwrap();

        assert_eq!(progress.current().name(), "second");
        // Further qualifying events change nothing.
        assert!(!progress.observe(&[Message::assistant("farewell")]).unwrap());
        assert_eq!(progress.tracks(), vec![1, 1]);
    }

    #[test]
    fn only_one_track_advances_per_batch() {
        let dir = tempfile::tempdir().unwrap();
        let progress = two_scene_progress(&dir);

        // One batch satisfying both scenes' conditions.
        let advanced = progress
            .observe(&[Message::assistant("onward and farewell")])
            .unwrap();
        assert!(advanced);
        assert_eq!(progress.tracks(), vec![1, 0]);
    }

    #[test]
    fn non_assistant_messages_never_advance_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let progress = two_scene_progress(&dir);

        assert!(!progress.observe(&[Message::user("onward")]).unwrap());
        assert_eq!(progress.tracks(), vec![0, 0]);
    }

    #[test]
    fn track_vector_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracks.txt");
        {
            let progress = SceneProgress::load_or_default(
                path.clone(),
                vec![
                    StubScene::new("first", "onward", 7),
                    StubScene::new("second", "farewell", 1),
                ],
            )
            .unwrap();
            progress.observe(&[Message::assistant("onward")]).unwrap();
        }

        let reloaded = SceneProgress::load_or_default(
            path,
            vec![
                StubScene::new("first", "onward", 7),
                StubScene::new("second", "farewell", 1),
            ],
        )
        .unwrap();
        assert_eq!(reloaded.tracks(), vec![7, 0]);
        assert_eq!(reloaded.current().name(), "second");
    }

    #[test]
    fn mismatched_persisted_vector_resets_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracks.txt");
        std::fs::write(&path, "1,2,3").unwrap();

        let progress = SceneProgress::load_or_default(
            path,
            vec![
                StubScene::new("first", "onward", 1),
                StubScene::new("second", "farewell", 1),
            ],
        )
        .unwrap();
        assert_eq!(progress.tracks(), vec![0, 0]);
    }
}
