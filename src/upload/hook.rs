use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use super::UploadState;

/// Observer invoked on every state transition of an upload.
///
/// Implement this trait to report progress while an upload runs, for example
/// to drive a progress indicator or forward state changes to a client.
///
/// # Example
///
/// ```rust
/// use shelbytube::upload::{UploadHook, UploadState};
///
/// struct PrintHook;
///
/// impl UploadHook for PrintHook {
///     fn on_transition(&self, state: &UploadState) {
///         println!("upload is now {}", state.label());
///     }
/// }
/// ```
pub trait UploadHook: Send + Sync {
    fn on_transition(&self, state: &UploadState);
}

/// A hook that ignores every transition.
pub struct NoopHook;

impl UploadHook for NoopHook {
    fn on_transition(&self, _state: &UploadState) {}
}

/// Terminal spinner that shows the current upload step.
///
/// Ticking pauses while a signature is pending so the signer can prompt on
/// the same terminal.
pub struct SpinnerHook {
    bar: ProgressBar,
}

const TICK: Duration = Duration::from_millis(120);

impl SpinnerHook {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("[{elapsed_precise}] {spinner} {msg}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(TICK);
        Self { bar }
    }
}

impl Default for SpinnerHook {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the spinner may redraw on its own in `state`.
fn ticks_in(state: &UploadState) -> bool {
    !matches!(
        state,
        UploadState::AwaitingSignature | UploadState::Complete(_) | UploadState::Failed { .. }
    )
}

impl UploadHook for SpinnerHook {
    fn on_transition(&self, state: &UploadState) {
        if ticks_in(state) {
            self.bar.enable_steady_tick(TICK);
        } else {
            self.bar.disable_steady_tick();
        }
        match state {
            UploadState::AwaitingSignature => {
                self.bar.set_message("awaiting signature (confirm in your wallet)")
            }
            UploadState::Complete(_) => self.bar.finish_with_message("upload complete"),
            UploadState::Failed { step, .. } => {
                self.bar.abandon_with_message(format!("failed while {}", step.label()))
            }
            other => self.bar.set_message(other.label().to_string()),
        }
    }
}
