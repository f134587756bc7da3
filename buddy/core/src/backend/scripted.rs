//! Scripted Generator
//!
//! Deterministic in-process generator. The CLI uses it for `--offline`
//! runs and the test suites use it to drive sessions through every
//! terminal state without a model server.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use super::traits::{DeliveryMode, GenerationRequest, Generator, ProducerEvent, ProducerFault};

#[derive(Clone, Debug)]
enum Script {
    /// Replay fixed events
    Events(Vec<ProducerEvent>),
    /// Answer with the words of the prompt
    Echo,
}

/// Generator that replays a fixed script
#[derive(Clone)]
pub struct ScriptedGenerator {
    name: String,
    mode: DeliveryMode,
    script: Script,
    /// Delay before each event (none = as fast as the channel allows)
    pace: Option<Duration>,
    /// Reported through [`Generator::max_silence`]
    max_silence: Option<Duration>,
    /// Keep the channel open after the script until the receiver goes away
    hold_open: bool,
    /// Refuse every request with this fault
    reject: Option<ProducerFault>,
    received: Arc<Mutex<Vec<GenerationRequest>>>,
}

impl ScriptedGenerator {
    fn from_script(mode: DeliveryMode, script: Script) -> Self {
        Self {
            name: "Scripted".to_string(),
            mode,
            script,
            pace: None,
            max_silence: None,
            hold_open: false,
            reject: None,
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Stream the given fragments, then `End`
    pub fn streaming<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut events: Vec<ProducerEvent> = fragments
            .into_iter()
            .map(|f| ProducerEvent::Fragment(f.into()))
            .collect();
        events.push(ProducerEvent::End);
        Self::from_script(DeliveryMode::Streaming, Script::Events(events))
    }

    /// Deliver `text` as one `Complete`
    pub fn single_shot(text: impl Into<String>) -> Self {
        Self::from_script(
            DeliveryMode::SingleShot,
            Script::Events(vec![ProducerEvent::Complete(text.into())]),
        )
    }

    /// Stream the given fragments, then fail with `fault`
    pub fn failing_after<I, S>(fragments: I, fault: ProducerFault) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut events: Vec<ProducerEvent> = fragments
            .into_iter()
            .map(|f| ProducerEvent::Fragment(f.into()))
            .collect();
        events.push(ProducerEvent::Error(fault));
        Self::from_script(DeliveryMode::Streaming, Script::Events(events))
    }

    /// Replay raw events under the given declared mode
    #[must_use]
    pub fn with_events(mode: DeliveryMode, events: Vec<ProducerEvent>) -> Self {
        Self::from_script(mode, Script::Events(events))
    }

    /// Refuse every request before any output
    #[must_use]
    pub fn rejecting(fault: ProducerFault) -> Self {
        let mut generator = Self::from_script(DeliveryMode::Streaming, Script::Events(Vec::new()));
        generator.reject = Some(fault);
        generator
    }

    /// Answer each request with the words of its prompt
    #[must_use]
    pub fn echo() -> Self {
        Self::from_script(DeliveryMode::Streaming, Script::Echo)
    }

    /// Set the generator name shown in logs
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Change the declared delivery mode
    ///
    /// Echo scripts follow the mode; fixed scripts are replayed as written,
    /// so a mismatch exercises the session's malformed-stream handling.
    #[must_use]
    pub fn with_delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.mode = mode;
        self
    }

    /// Wait `pace` before each event, the first one included
    #[must_use]
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    /// Declare a silence allowance, as a slow single-shot backend would
    #[must_use]
    pub fn with_max_silence(mut self, silence: Duration) -> Self {
        self.max_silence = Some(silence);
        self
    }

    /// Drop the terminal event and go silent after the last fragment
    #[must_use]
    pub fn then_stall(mut self) -> Self {
        if let Script::Events(ref mut events) = self.script {
            while events.last().is_some_and(ProducerEvent::is_terminal) {
                events.pop();
            }
        }
        self.hold_open = true;
        self
    }

    /// Requests received so far, oldest first
    #[must_use]
    pub fn received(&self) -> Vec<GenerationRequest> {
        self.received.lock().clone()
    }

    /// Number of `generate` calls so far
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.received.lock().len()
    }

    fn events_for(&self, request: &GenerationRequest) -> Vec<ProducerEvent> {
        match self.script {
            Script::Events(ref events) => events.clone(),
            Script::Echo => {
                let words: Vec<String> = request
                    .prompt
                    .split_whitespace()
                    .map(|w| format!("{w} "))
                    .collect();
                match self.mode {
                    DeliveryMode::SingleShot => vec![ProducerEvent::Complete(words.concat())],
                    DeliveryMode::Streaming => {
                        let mut events = vec![ProducerEvent::Fragment(format!(
                            "[offline {}] ",
                            request.kind
                        ))];
                        events.extend(words.into_iter().map(ProducerEvent::Fragment));
                        events.push(ProducerEvent::End);
                        events
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn delivery_mode(&self) -> DeliveryMode {
        self.mode
    }

    fn max_silence(&self) -> Option<Duration> {
        self.max_silence
    }

    async fn health_check(&self) -> bool {
        self.reject.is_none()
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> anyhow::Result<mpsc::Receiver<ProducerEvent>> {
        self.received.lock().push(request.clone());

        if let Some(ref fault) = self.reject {
            return Err(anyhow::Error::new(fault.clone()));
        }

        let events = self.events_for(request);
        let pace = self.pace;
        let hold_open = self.hold_open;
        let (tx, rx) = mpsc::channel(events.len().max(1));

        tokio::spawn(async move {
            let mut ticker = pace.map(|pace| {
                let mut interval = tokio::time::interval_at(Instant::now() + pace, pace);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                interval
            });

            for event in events {
                if let Some(ref mut ticker) = ticker {
                    ticker.tick().await;
                }
                if tx.send(event).await.is_err() {
                    return;
                }
            }

            if hold_open {
                tx.closed().await;
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;

    async fn collect(mut rx: mpsc::Receiver<ProducerEvent>) -> Vec<ProducerEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_streaming_script() {
        let generator = ScriptedGenerator::streaming(["a", "b"]);
        let request = GenerationRequest::new(ActionKind::Chat, "hi");
        let events = collect(generator.generate(&request).await.unwrap()).await;

        assert_eq!(
            events,
            vec![
                ProducerEvent::Fragment("a".to_string()),
                ProducerEvent::Fragment("b".to_string()),
                ProducerEvent::End,
            ]
        );
        assert_eq!(generator.call_count(), 1);
        assert_eq!(generator.received()[0].prompt, "hi");
    }

    #[tokio::test]
    async fn test_single_shot_script() {
        let generator = ScriptedGenerator::single_shot("whole answer");
        assert_eq!(generator.delivery_mode(), DeliveryMode::SingleShot);
        let request = GenerationRequest::new(ActionKind::Summarize, "video");
        let events = collect(generator.generate(&request).await.unwrap()).await;
        assert_eq!(events, vec![ProducerEvent::Complete("whole answer".to_string())]);
    }

    #[tokio::test]
    async fn test_pace_delays_first_event() {
        let generator = ScriptedGenerator::single_shot("late")
            .with_pace(Duration::from_millis(40))
            .with_max_silence(Duration::from_secs(10));
        assert_eq!(generator.max_silence(), Some(Duration::from_secs(10)));

        let started = Instant::now();
        let request = GenerationRequest::new(ActionKind::Summarize, "video");
        let events = collect(generator.generate(&request).await.unwrap()).await;
        assert_eq!(events, vec![ProducerEvent::Complete("late".to_string())]);
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_echo_uses_prompt_words() {
        let generator = ScriptedGenerator::echo();
        let request = GenerationRequest::new(ActionKind::Chat, "what is  mitosis");
        let events = collect(generator.generate(&request).await.unwrap()).await;

        let text: String = events
            .iter()
            .filter_map(|e| match e {
                ProducerEvent::Fragment(f) => Some(f.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "[offline chat] what is mitosis ");
        assert_eq!(events.last(), Some(&ProducerEvent::End));
    }

    #[tokio::test]
    async fn test_rejecting_keeps_fault() {
        let generator = ScriptedGenerator::rejecting(ProducerFault::Quota("daily".to_string()));
        let request = GenerationRequest::new(ActionKind::Mcq, "q");
        let err = generator.generate(&request).await.unwrap_err();
        assert_eq!(
            ProducerFault::from_anyhow(&err),
            ProducerFault::Quota("daily".to_string())
        );
        assert!(!generator.health_check().await);
    }

    #[tokio::test]
    async fn test_stall_holds_channel_open() {
        let generator = ScriptedGenerator::streaming(["only"]).then_stall();
        let request = GenerationRequest::new(ActionKind::Chat, "q");
        let mut rx = generator.generate(&request).await.unwrap();

        assert_eq!(rx.recv().await, Some(ProducerEvent::Fragment("only".to_string())));
        let next = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(next.is_err(), "stalled generator should not emit or close");
    }
}
