//! Yes/no confirmation before a run starts.

/// Asks the operator whether to proceed.
///
/// When `required` is false the gate must not prompt and should answer yes.
pub trait ConfirmationGate: Send + Sync {
    fn confirm(&self, prompt: &str, required: bool) -> bool;
}

/// Always answers yes without prompting.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

impl ConfirmationGate for AutoConfirm {
    fn confirm(&self, _prompt: &str, _required: bool) -> bool {
        true
    }
}
