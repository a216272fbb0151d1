const PREVIEW_CHARS: usize = 50;

/// Canned assistant used until a local model is wired in.
#[derive(Debug, Clone, Default)]
pub struct MockAssistant;

impl MockAssistant {
    /// First characters of the prompt, cut on a char boundary.
    pub fn preview(prompt: &str) -> &str {
        match prompt.char_indices().nth(PREVIEW_CHARS) {
            Some((idx, _)) => &prompt[..idx],
            None => prompt,
        }
    }

    pub fn reply(&self, prompt: &str) -> String {
        format!(
            "[Mock AI] I understood your question: '{prompt}'. No local model is installed yet. \
             The other features (Monitor, Terminal) are online!"
        )
    }
}
