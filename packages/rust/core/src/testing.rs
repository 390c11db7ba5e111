//! Scripted text generator for pipeline tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use modeldoc_llm::{GenerateError, GenerateOptions, Generation, TextGenerator, UsageStats};
use modeldoc_shared::StageId;

use crate::stages::stage_marker;

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Text(String),
    Fail(GenerateError),
    /// Never answers; exercises the call timeout.
    Hang,
}

/// Replies are keyed by the stage marker at the top of the prompt. Each
/// stage's script is consumed front to back; the last reply repeats.
/// Unscripted stages fail as unavailable.
pub(crate) struct ScriptedGenerator {
    scripts: Mutex<HashMap<StageId, Vec<Reply>>>,
    calls: Mutex<Vec<StageId>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedGenerator {
    pub(crate) fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn reply(self, stage: StageId, text: impl Into<String>) -> Self {
        self.script(stage, vec![Reply::Text(text.into())])
    }

    pub(crate) fn fail(self, stage: StageId, err: GenerateError) -> Self {
        self.script(stage, vec![Reply::Fail(err)])
    }

    pub(crate) fn script(self, stage: StageId, replies: Vec<Reply>) -> Self {
        self.scripts.lock().unwrap().insert(stage, replies);
        self
    }

    /// Every stage answers with `text`.
    pub(crate) fn all(mut self, text: &str) -> Self {
        for stage in StageId::ALL {
            self = self.reply(stage, text);
        }
        self
    }

    pub(crate) fn calls(&self) -> Vec<StageId> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_for(&self, stage: StageId) -> usize {
        self.calls().iter().filter(|s| **s == stage).count()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, stage: Option<StageId>) -> Reply {
        let unavailable = Reply::Fail(GenerateError::Unavailable("unscripted".into()));
        let Some(stage) = stage else {
            return unavailable;
        };
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(&stage) {
            Some(replies) if replies.len() > 1 => replies.remove(0),
            Some(replies) => replies.first().cloned().unwrap_or(unavailable),
            None => unavailable,
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        prompt: &str,
        _options: &GenerateOptions,
    ) -> Result<Generation, GenerateError> {
        let stage = StageId::ALL
            .into_iter()
            .find(|s| prompt.starts_with(&stage_marker(*s)));
        if let Some(stage) = stage {
            self.calls.lock().unwrap().push(stage);
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.next_reply(stage) {
            Reply::Text(text) => Ok(Generation {
                text,
                usage: Some(UsageStats {
                    tokens_in: prompt.len() as u64 / 4,
                    tokens_out: 10,
                }),
                model: Some("scripted".into()),
                latency_ms: 1,
            }),
            Reply::Fail(err) => Err(err),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(GenerateError::Empty)
            }
        }
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}
