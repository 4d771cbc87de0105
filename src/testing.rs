//! Test doubles shared by the unit tests of several modules.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::remote::{Completer, Completion, CompletionRequest, RemoteError};

/// Completer whose answers are scripted per user message.
///
/// Each scripted message pops one outcome per call; once its script runs
/// out, or for messages never scripted, it answers `"reply to {message}"`.
#[derive(Default)]
pub(crate) struct ScriptedCompleter {
    scripts: Mutex<HashMap<String, VecDeque<Result<String, RemoteError>>>>,
    calls: Mutex<Vec<String>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedCompleter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn script(self, message: &str, outcomes: Vec<Result<&str, RemoteError>>) -> Self {
        let outcomes = outcomes
            .into_iter()
            .map(|o| o.map(str::to_string))
            .collect();
        self.scripts
            .lock()
            .unwrap()
            .insert(message.to_string(), outcomes);
        self
    }

    /// Sleep before every answer.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of calls whose last user message was `message`.
    pub(crate) fn calls_for(&self, message: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|m| *m == message)
            .count()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Highest number of calls that were in flight at the same time.
    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Completer for ScriptedCompleter {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, RemoteError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let message = request.last_user_message().unwrap_or_default().to_string();
        self.calls.lock().unwrap().push(message.clone());

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&message)
            .and_then(VecDeque::pop_front);
        let text = match scripted {
            Some(outcome) => outcome?,
            None => format!("reply to {message}"),
        };
        Ok(Completion {
            text,
            model: request.model.clone(),
        })
    }
}
