//! System instruction and opening context for the tutoring assistant.

use serde::{Deserialize, Serialize};

/// Base persona every backend is instructed with.
pub const TUTOR_PERSONA: &str = "Tu es un professeur particulier bienveillant et pédagogue.";

/// First user turn seeded into every conversation context.
pub const VOICE_ASSISTANT_PRIMER: &str =
    "Tu es un assistant vocal intelligent et amical. Garde tes réponses concises et naturelles.";

/// Optional study context a client can attach to a connect request.
///
/// Neither field is validated; both are spliced into the instruction text as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyContext {
    pub category: Option<String>,
    pub periods: Vec<String>,
}

impl StudyContext {
    pub fn new(category: Option<String>, periods: Option<Vec<String>>) -> Self {
        Self {
            category,
            periods: periods.unwrap_or_default(),
        }
    }

    /// Composes the system instruction handed to the model service.
    pub fn system_instruction(&self) -> String {
        let mut instruction = TUTOR_PERSONA.to_string();
        if let Some(category) = self.category.as_deref().filter(|c| !c.is_empty()) {
            instruction.push_str(&format!(" Tu enseignes {}.", category));
        }
        if !self.periods.is_empty() {
            instruction.push_str(&format!(
                " Les sujets d'étude sont: {}.",
                self.periods.join(", ")
            ));
        }
        instruction
    }
}
