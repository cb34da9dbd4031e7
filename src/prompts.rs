//! Persona/context prompt assets, one markdown file per scene.

use std::path::Path;

/// Shown in place of a persona when its prompt file cannot be read. A
/// missing asset degrades the persona, it never crashes startup.
pub const FALLBACK_PROMPT: &str =
    "(persona prompt failed to load) You are a polite host. Apologize that part of \
     your script is missing and carry on as best you can.";

/// Read `<dir>/<name>.md`, falling back to the fixed placeholder persona.
pub fn load_prompt(dir: &Path, name: &str) -> String {
    let path = dir.join(format!("{}.md", name));
    match std::fs::read_to_string(&path) {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            tracing::warn!("Failed to load prompt {:?}: {}", path, e);
            FALLBACK_PROMPT.to_string()
        }
    }
}
