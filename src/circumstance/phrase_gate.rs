//! A scene that concludes when the assistant utters its exit phrase.

use anyhow::Result;

use crate::message::Message;
use crate::phrase::PhraseMatcher;
use crate::tools::ToolSet;

use super::Circumstance;

pub struct PhraseGate {
    name: String,
    persona: String,
    matcher: PhraseMatcher,
    exit_code: i32,
    tools: ToolSet,
}

impl PhraseGate {
    pub fn new(
        name: impl Into<String>,
        persona: impl Into<String>,
        exit_phrase: &str,
        exit_code: i32,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            persona: persona.into(),
            matcher: PhraseMatcher::new(exit_phrase)?,
            exit_code,
            tools: ToolSet::empty(),
        })
    }

    /// Attach tools that should be callable while this scene is current.
    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }
}

impl Circumstance for PhraseGate {
    fn name(&self) -> &str {
        &self.name
    }

    fn persona(&self) -> String {
        self.persona.clone()
    }

    fn tool_set(&self) -> ToolSet {
        self.tools.clone()
    }

    fn exit_code_for(&self, message: &Message) -> Option<i32> {
        self.matcher
            .matches_unquoted(message.text())
            .then_some(self.exit_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> PhraseGate {
        PhraseGate::new("briefing", "You are the host.", "let the game begin", 1).unwrap()
    }

    #[test]
    fn exits_on_unquoted_phrase() {
        let scene = gate();
        let msg = Message::assistant("Very well. Let the game begin!");
        assert_eq!(scene.exit_code_for(&msg), Some(1));
    }

    #[test]
    fn quoted_phrase_does_not_exit() {
        let scene = gate();
        let msg = Message::assistant(r#"You must make me say "let the game begin" first."#);
        assert_eq!(scene.exit_code_for(&msg), None);
    }

    #[test]
    fn unrelated_text_does_not_exit() {
        let scene = gate();
        assert_eq!(scene.exit_code_for(&Message::assistant("Welcome!")), None);
    }
}
