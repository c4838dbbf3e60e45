//! Per-connection token stream emulation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, trace};

use super::{ScriptedResponse, SpeedProfile, Tokenizer};
use crate::cancel::CancelHandle;

/// Lifecycle of one emulated response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EmulatorState {
    Idle = 0,
    SendingHeaders = 1,
    StreamingTokens = 2,
    SentTerminal = 3,
    Closed = 4,
}

impl EmulatorState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::SendingHeaders,
            2 => Self::StreamingTokens,
            3 => Self::SentTerminal,
            _ => Self::Closed,
        }
    }
}

/// Which part of the response a token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Thinking,
    Answer,
}

/// One emitted unit. The terminal chunk has an empty delta and
/// `is_final == true`; its index equals the number of token chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub delta: String,
    pub segment: Segment,
    pub is_final: bool,
    pub index: usize,
}

#[derive(Debug)]
struct Shared {
    state: AtomicU8,
    emitted: AtomicUsize,
}

/// Read-only view of a running emulator, usable after the stream moved away.
#[derive(Debug, Clone)]
pub struct EmulatorMonitor {
    shared: Arc<Shared>,
}

impl EmulatorMonitor {
    pub fn state(&self) -> EmulatorState {
        EmulatorState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    /// Chunks emitted so far, terminal chunk included.
    pub fn emitted(&self) -> usize {
        self.shared.emitted.load(Ordering::SeqCst)
    }
}

/// Moves the emulator to `Closed` however the stream ends.
struct CloseOnDrop(Arc<Shared>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0
            .state
            .store(EmulatorState::Closed as u8, Ordering::SeqCst);
    }
}

/// Text produced by a whole-shot run, split by segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generated {
    pub thinking: String,
    pub answer: String,
    pub thinking_tokens: usize,
    pub answer_tokens: usize,
}

impl Generated {
    pub fn token_count(&self) -> usize {
        self.thinking_tokens + self.answer_tokens
    }
}

/// Synthetic token generator for one connection.
#[derive(Debug)]
pub struct StreamEmulator {
    profile: SpeedProfile,
    tokens: Vec<(Segment, String)>,
    shared: Arc<Shared>,
}

impl StreamEmulator {
    pub fn new(profile: SpeedProfile, response: &ScriptedResponse) -> Self {
        let tokenizer = Tokenizer::new();
        let mut tokens: Vec<(Segment, String)> = Vec::new();
        if let Some(thinking) = &response.thinking {
            tokens.extend(
                tokenizer
                    .tokenize(thinking)
                    .into_iter()
                    .map(|t| (Segment::Thinking, t.to_string())),
            );
        }
        tokens.extend(
            tokenizer
                .tokenize(&response.answer)
                .into_iter()
                .map(|t| (Segment::Answer, t.to_string())),
        );

        if let Some(total) = profile.total_tokens {
            tokens = fit_to_length(tokens, total as usize);
        }

        Self {
            profile,
            tokens,
            shared: Arc::new(Shared {
                state: AtomicU8::new(EmulatorState::Idle as u8),
                emitted: AtomicUsize::new(0),
            }),
        }
    }

    pub fn profile(&self) -> &SpeedProfile {
        &self.profile
    }

    /// Number of token chunks (terminal chunk excluded).
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Tokens of one segment, concatenated.
    pub fn segment_text(&self, segment: Segment) -> String {
        self.tokens
            .iter()
            .filter(|(s, _)| *s == segment)
            .map(|(_, t)| t.as_str())
            .collect()
    }

    pub fn segment_token_count(&self, segment: Segment) -> usize {
        self.tokens.iter().filter(|(s, _)| *s == segment).count()
    }

    pub fn monitor(&self) -> EmulatorMonitor {
        EmulatorMonitor {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> EmulatorState {
        self.monitor().state()
    }

    /// Latency of the whole-shot response.
    pub fn whole_shot_delay(&self) -> std::time::Duration {
        self.profile.generation_time(self.tokens.len())
    }

    fn set_state(shared: &Shared, state: EmulatorState) {
        shared.state.store(state as u8, Ordering::SeqCst);
    }

    /// Generate the whole response after the full generation delay.
    ///
    /// The state is `StreamingTokens` while the delay runs, although nothing
    /// is sent until the body is complete. Returns `None` when cancelled
    /// first.
    pub async fn whole_shot(self, cancel: &CancelHandle) -> Option<Generated> {
        let _close = CloseOnDrop(Arc::clone(&self.shared));
        Self::set_state(&self.shared, EmulatorState::SendingHeaders);
        let deadline = Instant::now() + self.whole_shot_delay();
        Self::set_state(&self.shared, EmulatorState::StreamingTokens);
        cancel.run_until_cancelled(sleep_until(deadline)).await?;
        Self::set_state(&self.shared, EmulatorState::SentTerminal);
        self.shared
            .emitted
            .store(self.tokens.len() + 1, Ordering::SeqCst);

        let mut generated = Generated::default();
        for (segment, token) in self.tokens {
            match segment {
                Segment::Thinking => {
                    generated.thinking.push_str(&token);
                    generated.thinking_tokens += 1;
                }
                Segment::Answer => {
                    generated.answer.push_str(&token);
                    generated.answer_tokens += 1;
                }
            }
        }
        Some(generated)
    }

    /// Paced chunk stream: token `i` at `ttft + i / tps`, then the terminal
    /// chunk at `ttft + n / tps`.
    ///
    /// Dropping the stream or firing `cancel` moves the emulator to `Closed`
    /// and no further chunk is produced.
    pub fn into_stream(self, cancel: CancelHandle) -> impl Stream<Item = StreamChunk> + Send {
        let Self {
            profile,
            tokens,
            shared,
        } = self;

        async_stream::stream! {
            let _close = CloseOnDrop(Arc::clone(&shared));
            Self::set_state(&shared, EmulatorState::SendingHeaders);
            let start = Instant::now();
            let total = tokens.len();
            debug!(
                tokens = total,
                tokens_per_second = profile.tokens_per_second,
                ttft_ms = profile.time_to_first_token.as_millis() as u64,
                "emulated stream started"
            );

            for (index, (segment, delta)) in tokens.into_iter().enumerate() {
                let deadline = start + profile.emission_offset(index);
                if cancel.run_until_cancelled(sleep_until(deadline)).await.is_none() {
                    debug!(emitted = index, "emulated stream cancelled");
                    return;
                }
                if index == 0 {
                    Self::set_state(&shared, EmulatorState::StreamingTokens);
                }
                shared.emitted.fetch_add(1, Ordering::SeqCst);
                trace!(index, "emitting token");
                yield StreamChunk { delta, segment, is_final: false, index };
            }

            let deadline = start + profile.generation_time(total);
            if cancel.run_until_cancelled(sleep_until(deadline)).await.is_none() {
                return;
            }
            Self::set_state(&shared, EmulatorState::SentTerminal);
            shared.emitted.fetch_add(1, Ordering::SeqCst);
            yield StreamChunk {
                delta: String::new(),
                segment: Segment::Answer,
                is_final: true,
                index: total,
            };
        }
    }
}

/// Truncate, or repeat the token sequence until it has exactly `len` tokens.
/// An empty script is padded with single spaces.
fn fit_to_length(tokens: Vec<(Segment, String)>, len: usize) -> Vec<(Segment, String)> {
    if tokens.is_empty() {
        return vec![(Segment::Answer, " ".to_string()); len];
    }
    if tokens.len() >= len {
        let mut tokens = tokens;
        tokens.truncate(len);
        return tokens;
    }
    tokens.iter().cycle().take(len).cloned().collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;

    use super::*;

    fn response(text: &str) -> ScriptedResponse {
        ScriptedResponse::answer(text)
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_follow_schedule_and_terminal_is_last() {
        let profile = SpeedProfile::new(Duration::from_millis(100), 20.0).with_total_tokens(10);
        let emulator = StreamEmulator::new(profile, &response("one two three"));
        assert_eq!(emulator.token_count(), 10);
        let monitor = emulator.monitor();
        assert_eq!(monitor.state(), EmulatorState::Idle);

        let start = Instant::now();
        let mut stream = Box::pin(emulator.into_stream(CancelHandle::new()));
        let mut seen = Vec::new();
        while let Some(chunk) = stream.next().await {
            seen.push((start.elapsed(), chunk));
        }

        assert_eq!(seen.len(), 11);
        for (i, (at, chunk)) in seen.iter().take(10).enumerate() {
            assert!(!chunk.is_final);
            assert_eq!(chunk.index, i);
            let expected = profile.emission_offset(i);
            let drift = at.abs_diff(expected);
            assert!(drift <= Duration::from_millis(5), "chunk {i} at {at:?}");
        }
        let (at, last) = &seen[10];
        assert!(last.is_final);
        assert!(*at >= Duration::from_millis(600));
        assert_eq!(monitor.state(), EmulatorState::Closed);
        assert_eq!(monitor.emitted(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_halts_emission() {
        let profile = SpeedProfile::new(Duration::ZERO, 10.0).with_total_tokens(50);
        let emulator = StreamEmulator::new(profile, &response("a b c d e"));
        let monitor = emulator.monitor();
        let cancel = CancelHandle::new();
        let mut stream = Box::pin(emulator.into_stream(cancel.clone()));

        for _ in 0..3 {
            stream.next().await;
        }
        assert_eq!(monitor.state(), EmulatorState::StreamingTokens);
        cancel.cancel();
        assert!(stream.next().await.is_none());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(monitor.emitted(), 3);
        assert_eq!(monitor.state(), EmulatorState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_stream_closes_it() {
        let emulator = StreamEmulator::new(
            SpeedProfile::new(Duration::ZERO, 100.0),
            &response("x y z"),
        );
        let monitor = emulator.monitor();
        let mut stream = Box::pin(emulator.into_stream(CancelHandle::new()));
        stream.next().await;
        drop(stream);
        assert_eq!(monitor.state(), EmulatorState::Closed);
        assert_eq!(monitor.emitted(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn whole_shot_waits_for_full_generation() {
        let profile = SpeedProfile::new(Duration::from_millis(100), 50.0).with_total_tokens(100);
        let emulator = StreamEmulator::new(profile, &response("word "));
        let start = Instant::now();
        let generated = emulator.whole_shot(&CancelHandle::new()).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(2100));
        assert!(elapsed < Duration::from_millis(2150));
        assert_eq!(generated.answer, "word ".repeat(100));
        assert_eq!(generated.token_count(), 100);
        assert!(generated.thinking.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn whole_shot_reports_streaming_state_while_waiting() {
        let profile = SpeedProfile::new(Duration::from_millis(100), 10.0).with_total_tokens(5);
        let emulator = StreamEmulator::new(profile, &response("a b c d e"));
        let monitor = emulator.monitor();
        let handle = tokio::spawn(async move { emulator.whole_shot(&CancelHandle::new()).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(monitor.state(), EmulatorState::StreamingTokens);
        assert!(handle.await.unwrap().is_some());
        assert_eq!(monitor.state(), EmulatorState::Closed);
        assert_eq!(monitor.emitted(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_script_still_emits_configured_token_count() {
        let profile = SpeedProfile::new(Duration::ZERO, 10.0).with_total_tokens(5);
        let emulator = StreamEmulator::new(profile, &response(""));
        assert_eq!(emulator.token_count(), 5);

        let chunks: Vec<StreamChunk> = emulator.into_stream(CancelHandle::new()).collect().await;
        assert_eq!(chunks.len(), 6);
        assert_eq!(chunks.iter().filter(|c| !c.is_final).count(), 5);
        assert!(chunks[5].is_final);
    }

    #[test]
    fn thinking_tokens_come_first() {
        let emulator = StreamEmulator::new(
            SpeedProfile::default(),
            &ScriptedResponse::reasoned("think hard ", "answer"),
        );
        assert_eq!(emulator.segment_token_count(Segment::Thinking), 2);
        assert_eq!(emulator.segment_text(Segment::Answer), "answer");
        assert_eq!(emulator.token_count(), 3);
    }
}
