//! Paced message delivery. The delay policy is computed up front as a plan;
//! executing the plan is just awaiting each delay and emitting each segment,
//! so tests can check the plan without sleeping and run delivery against a
//! recording clock.

use anyhow::Result;
use async_trait::async_trait;
use norn_core::config::PacingConfig;
use norn_core::ChatSink;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Suspension seam, injected so tests never sleep for real.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// One segment with the pause that precedes it.
#[derive(Debug, Clone)]
pub struct DeliveryStep {
    pub segment: String,
    pub pre_delay: Duration,
}

/// Split generated text into segments on blank lines, dropping empties.
pub fn split_segments(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Compute the full delivery plan for a reply. The first step waits only its
/// typing time; later steps add a randomized gap, as if the speaker paused
/// between messages.
pub fn plan_delivery(text: &str, config: &PacingConfig) -> Vec<DeliveryStep> {
    let mut rng = rand::thread_rng();
    split_segments(text)
        .into_iter()
        .enumerate()
        .map(|(i, segment)| {
            let typing = typing_delay(&segment, config, &mut rng);
            let gap = if i == 0 {
                Duration::ZERO
            } else {
                Duration::from_secs_f64(rng.gen_range(config.min_gap_secs..=config.max_gap_secs))
            };
            DeliveryStep {
                segment,
                pre_delay: typing + gap,
            }
        })
        .collect()
}

fn typing_delay(segment: &str, config: &PacingConfig, rng: &mut impl Rng) -> Duration {
    let base = segment.chars().count() as f64 / config.typing_chars_per_sec.max(1.0);
    let clamped = base.clamp(config.min_typing_secs, config.max_typing_secs);
    let jitter = rng.gen_range(0.8..=1.2);
    Duration::from_secs_f64(clamped * jitter)
}

/// Executes delivery plans against a sink. Returns the platform id of the
/// last message sent, which choice reactions attach to.
pub struct Deliverer {
    sink: Arc<dyn ChatSink>,
    clock: Arc<dyn Clock>,
}

impl Deliverer {
    pub fn new(sink: Arc<dyn ChatSink>, clock: Arc<dyn Clock>) -> Self {
        Self { sink, clock }
    }

    pub async fn deliver(&self, channel: &str, plan: &[DeliveryStep]) -> Result<Option<String>> {
        let mut last_id = None;
        for step in plan {
            if !step.pre_delay.is_zero() {
                self.clock.sleep(step.pre_delay).await;
            }
            let id = self.sink.send(channel, &step.segment).await?;
            last_id = Some(id);
        }
        Ok(last_id)
    }

    pub async fn react(&self, channel: &str, message_id: &str, emoji: &str) -> Result<()> {
        self.sink.react(channel, message_id, emoji).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[test]
    fn test_split_segments_on_blank_lines() {
        let text = "First paragraph.\n\nSecond one.\nStill second.\n\n\n\nThird.";
        let segs = split_segments(text);
        assert_eq!(segs.len(), 3);
        assert_eq!(segs[1], "Second one.\nStill second.");
    }

    #[test]
    fn test_plan_preserves_order_and_counts() {
        let text = "One.\n\nTwo.\n\nThree.\n\nFour.";
        let plan = plan_delivery(text, &PacingConfig::default());
        assert_eq!(plan.len(), 4);
        let segments: Vec<_> = plan.iter().map(|s| s.segment.as_str()).collect();
        assert_eq!(segments, vec!["One.", "Two.", "Three.", "Four."]);
    }

    #[test]
    fn test_delay_bounds() {
        let config = PacingConfig::default();
        let short = "Hi.";
        let long = "x".repeat(2000);
        let text = format!("{short}\n\n{long}");
        for _ in 0..20 {
            let plan = plan_delivery(&text, &config);
            // First segment: typing only, clamped low then jittered.
            let first = plan[0].pre_delay.as_secs_f64();
            assert!(first >= config.min_typing_secs * 0.8 - 1e-9);
            assert!(first <= config.min_typing_secs * 1.2 + 1e-9);
            // Second segment: clamped high typing plus a gap.
            let second = plan[1].pre_delay.as_secs_f64();
            assert!(second >= config.max_typing_secs * 0.8 + config.min_gap_secs - 1e-9);
            assert!(second <= config.max_typing_secs * 1.2 + config.max_gap_secs + 1e-9);
        }
    }

    struct RecordingSink {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatSink for RecordingSink {
        async fn send(&self, _channel: &str, text: &str) -> Result<String> {
            let mut sent = self.sent.lock().await;
            sent.push(text.to_string());
            Ok(format!("msg_{}", sent.len()))
        }

        async fn react(&self, _channel: &str, _message_id: &str, _emoji: &str) -> Result<()> {
            Ok(())
        }
    }

    struct InstantClock;

    #[async_trait]
    impl Clock for InstantClock {
        async fn sleep(&self, _duration: Duration) {}
    }

    #[tokio::test]
    async fn test_deliver_sends_in_order_and_returns_last_id() {
        let sink = Arc::new(RecordingSink {
            sent: Mutex::new(Vec::new()),
        });
        let deliverer = Deliverer::new(sink.clone(), Arc::new(InstantClock));
        let plan = plan_delivery("A.\n\nB.\n\nC.", &PacingConfig::default());
        let last = deliverer.deliver("chan", &plan).await.unwrap();
        assert_eq!(last.as_deref(), Some("msg_3"));
        assert_eq!(*sink.sent.lock().await, vec!["A.", "B.", "C."]);
    }

    #[tokio::test]
    async fn test_deliver_empty_plan() {
        let sink = Arc::new(RecordingSink {
            sent: Mutex::new(Vec::new()),
        });
        let deliverer = Deliverer::new(sink, Arc::new(InstantClock));
        let last = deliverer.deliver("chan", &[]).await.unwrap();
        assert!(last.is_none());
    }
}
