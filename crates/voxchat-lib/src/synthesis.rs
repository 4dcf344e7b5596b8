//! Speech output: sentence-by-sentence playback through a synthesis engine.
//!
//! ```text
//! speak(reply) → normalize → split_utterances
//!     → engine.speak(unit 0) … end event … pause
//!     → engine.speak(unit 1) … end event … pause
//!     → on_complete()
//! ```
//!
//! Only one utterance is ever in flight. Epoch-based cancellation: `cancel()`
//! bumps an [`AtomicU64`] and cancels the engine, so the playback task of the
//! previous epoch stops dispatching and never fires its completion.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use voxchat_core::text_prep::{normalize, split_utterances};
use voxchat_core::types::SpeechConfig;

use crate::error::SynthesisError;

/// A voice offered by a synthesis engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    pub name: String,
    pub locale: String,
}

/// One unit of speech handed to the engine.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub text: String,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
    pub voice: Voice,
}

/// Host text-to-speech capability.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    fn voices(&self) -> Vec<Voice>;

    /// Speak one utterance. Resolves when the engine reports its end event
    /// (or when it was cancelled).
    async fn speak(&self, utterance: Utterance) -> Result<(), SynthesisError>;

    /// Drop everything queued or playing.
    fn cancel_all(&self);
}

/// Prefer a voice whose name contains the configured substring and whose
/// locale matches exactly; otherwise the first voice. `None` when the engine
/// offers no voices at all.
pub fn select_voice(voices: &[Voice], config: &SpeechConfig) -> Option<Voice> {
    voices
        .iter()
        .find(|v| v.name.contains(&config.preferred_voice) && v.locale == config.preferred_locale)
        .or_else(|| voices.first())
        .cloned()
}

/// Cloneable speech output driver.
#[derive(Clone)]
pub struct SpeechOutput {
    engine: Option<Arc<dyn Synthesizer>>,
    config: SpeechConfig,
    epoch: Arc<AtomicU64>,
}

impl SpeechOutput {
    /// `engine` is `None` when the host has no synthesis support.
    pub fn new(engine: Option<Arc<dyn Synthesizer>>, config: SpeechConfig) -> Self {
        Self {
            engine,
            config,
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_available(&self) -> bool {
        self.engine.is_some()
    }

    /// Speak `text` sentence by sentence, then call `on_complete` once.
    ///
    /// Without an engine (or with an engine that has no voices) `on_complete`
    /// runs immediately. After [`cancel`](Self::cancel) it never runs.
    /// Callers must cancel before starting a second playback.
    pub fn speak(&self, text: &str, on_complete: impl FnOnce() + Send + 'static) {
        let Some(engine) = self.engine.clone() else {
            on_complete();
            return;
        };
        let Some(voice) = select_voice(&engine.voices(), &self.config) else {
            debug!("speech: engine offers no voices, skipping playback");
            on_complete();
            return;
        };

        let units = split_utterances(&normalize(text));
        if units.is_empty() {
            on_complete();
            return;
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let current = self.epoch.clone();
        let config = self.config.clone();

        debug!("speech: {} units with voice {} (epoch {epoch})", units.len(), voice.name);

        tokio::spawn(async move {
            for unit in units {
                if current.load(Ordering::SeqCst) != epoch {
                    debug!("speech: epoch {epoch} cancelled");
                    return;
                }

                let utterance = Utterance {
                    text: unit,
                    rate: config.rate,
                    pitch: config.pitch,
                    volume: config.volume,
                    voice: voice.clone(),
                };
                if let Err(e) = engine.speak(utterance).await {
                    // Treat a failed unit as finished and move on.
                    warn!("speech: utterance failed: {e}");
                }

                if current.load(Ordering::SeqCst) != epoch {
                    debug!("speech: epoch {epoch} cancelled");
                    return;
                }
                tokio::time::sleep(config.sentence_pause).await;
            }

            if current.load(Ordering::SeqCst) == epoch {
                on_complete();
            }
        });
    }

    /// Stop all pending speech immediately.
    pub fn cancel(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(engine) = &self.engine {
            engine.cancel_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{wait_for, FakeSynthesizer};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn voice(name: &str, locale: &str) -> Voice {
        Voice {
            name: name.into(),
            locale: locale.into(),
        }
    }

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    // ── select_voice ────────────────────────────────────────────────

    #[test]
    fn prefers_named_voice_in_locale() {
        let voices = vec![
            voice("Alex", "en-US"),
            voice("Google Deutsch", "de-DE"),
            voice("Google US English", "en-US"),
        ];
        let chosen = select_voice(&voices, &SpeechConfig::default()).unwrap();
        assert_eq!(chosen.name, "Google US English");
    }

    #[test]
    fn falls_back_to_first_voice() {
        let voices = vec![voice("Alex", "en-US"), voice("Google Deutsch", "de-DE")];
        let chosen = select_voice(&voices, &SpeechConfig::default()).unwrap();
        assert_eq!(chosen.name, "Alex");
    }

    #[test]
    fn no_voices_selects_nothing() {
        assert!(select_voice(&[], &SpeechConfig::default()).is_none());
    }

    // ── speak ───────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn unavailable_engine_completes_immediately() {
        let output = SpeechOutput::new(None, SpeechConfig::default());
        let (count, done) = counter();
        output.speak("Hello there.", done);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!output.is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn engine_without_voices_counts_as_unavailable() {
        let synth = Arc::new(FakeSynthesizer::without_voices());
        let output = SpeechOutput::new(Some(synth.clone()), SpeechConfig::default());
        let (count, done) = counter();
        output.speak("Hello there.", done);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(synth.spoken().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn speaks_units_in_order_then_completes_once() {
        let synth = Arc::new(FakeSynthesizer::with_latency(Duration::from_millis(50)));
        let output = SpeechOutput::new(Some(synth.clone()), SpeechConfig::default());
        let (count, done) = counter();

        output.speak("## Hi **there**. How are you? Fine", done);
        wait_for(|| count.load(Ordering::SeqCst) > 0).await;

        assert_eq!(synth.spoken(), vec!["Hi there.", "How are you?", "Fine"]);
        assert_eq!(synth.max_in_flight(), 1);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn utterances_carry_configured_parameters() {
        let synth = Arc::new(FakeSynthesizer::with_latency(Duration::ZERO));
        let output = SpeechOutput::new(Some(synth.clone()), SpeechConfig::default());
        let (count, done) = counter();
        output.speak("Hi.", done);
        wait_for(|| count.load(Ordering::SeqCst) > 0).await;

        let utterance = synth.utterances().remove(0);
        assert_eq!(utterance.rate, 0.95);
        assert_eq!(utterance.pitch, 1.08);
        assert_eq!(utterance.volume, 1.0);
        assert_eq!(utterance.voice.locale, "en-US");
    }

    #[tokio::test(start_paused = true)]
    async fn markup_only_text_completes_without_speaking() {
        let synth = Arc::new(FakeSynthesizer::with_latency(Duration::ZERO));
        let output = SpeechOutput::new(Some(synth.clone()), SpeechConfig::default());
        let (count, done) = counter();
        output.speak("```\ncode only\n```", done);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(synth.spoken().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_playback_without_completion() {
        let synth = Arc::new(FakeSynthesizer::with_latency(Duration::from_millis(500)));
        let output = SpeechOutput::new(Some(synth.clone()), SpeechConfig::default());
        let (count, done) = counter();

        output.speak("One. Two. Three.", done);
        wait_for(|| !synth.spoken().is_empty()).await;
        output.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(synth.spoken(), vec!["One."]);
        assert_eq!(synth.cancels(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
