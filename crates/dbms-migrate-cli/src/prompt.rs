//! Terminal confirmation prompt.

use dbms_migrate::ConfirmationGate;
use dialoguer::Confirm;

/// Asks on the terminal. Anything other than an explicit yes declines,
/// including a closed or non-interactive stdin.
pub struct PromptGate;

impl ConfirmationGate for PromptGate {
    fn confirm(&self, prompt: &str, required: bool) -> bool {
        if !required {
            return true;
        }
        Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .unwrap_or(false)
    }
}
