//! Debounced typing indicator.
//!
//! Keystrokes with text raise the participant's `isTyping` flag. It drops
//! again once no keystroke has arrived for the idle timeout, or as soon as
//! a message is sent. Only transitions are written to the store.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::store::SharedStore;

enum TypingInput {
    Keystroke { blank: bool },
    Sent,
}

/// Handle to the debounce task. Dropping it stops the task without
/// clearing the flag; the on-disconnect hook resets it.
pub struct TypingIndicator {
    input_tx: mpsc::UnboundedSender<TypingInput>,
    task: JoinHandle<()>,
}

impl TypingIndicator {
    pub(crate) fn spawn(store: Arc<dyn SharedStore>, flag_path: String, idle: Duration) -> Self {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(typing_loop(store, flag_path, idle, input_rx));
        Self { input_tx, task }
    }

    /// Report the composer's current text after a keystroke.
    pub fn input_changed(&self, text: &str) {
        let _ = self.input_tx.send(TypingInput::Keystroke {
            blank: text.trim().is_empty(),
        });
    }

    /// Report that the composed message was sent.
    pub fn message_sent(&self) {
        let _ = self.input_tx.send(TypingInput::Sent);
    }
}

impl Drop for TypingIndicator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn typing_loop(
    store: Arc<dyn SharedStore>,
    flag_path: String,
    idle: Duration,
    mut input_rx: mpsc::UnboundedReceiver<TypingInput>,
) {
    let mut typing = false;
    let mut deadline: Option<Instant> = None;

    loop {
        let change = tokio::select! {
            input = input_rx.recv() => match input {
                Some(TypingInput::Keystroke { blank }) => {
                    deadline = Some(Instant::now() + idle);
                    (!blank && !typing).then_some(true)
                }
                Some(TypingInput::Sent) => {
                    deadline = None;
                    typing.then_some(false)
                }
                None => break,
            },
            _ = sleep_until(deadline) => {
                deadline = None;
                typing.then_some(false)
            }
        };

        if let Some(flag) = change {
            typing = flag;
            debug!(path = %flag_path, typing, "Typing flag changed");
            if let Err(e) = store.set(&flag_path, Value::Bool(flag)).await {
                warn!(path = %flag_path, error = %e, "Failed to write typing flag");
            }
        }
    }
}
