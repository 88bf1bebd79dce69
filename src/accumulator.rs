//! Collects streamed audio fragments for the in-flight assistant turn and
//! finalizes them into one playable artifact.

use crate::artifact::ArtifactStore;
use crate::constants::WORD_DELIMITERS;
use crate::types::{AudioHalf, CharAlignment, Result, TimingEntry, TurnId};
use bytes::{Bytes, BytesMut};

#[derive(Default)]
pub struct AudioAccumulator {
    buffer: BytesMut,
    alignment: CharAlignment,
    chunks: usize,
}

impl AudioAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one fragment. Fragment timings are relative to the fragment itself,
    /// so they are shifted by the end of everything recorded so far.
    pub fn on_chunk(&mut self, fragment: &[u8], timing: Option<&CharAlignment>) {
        self.chunks += 1;
        self.buffer.extend_from_slice(fragment);

        if let Some(timing) = timing {
            let offset = self.alignment.end_ms();
            let count = timing
                .chars
                .len()
                .min(timing.char_start_times_ms.len())
                .min(timing.char_durations_ms.len());
            if count < timing.chars.len() {
                tracing::warn!(
                    target: "accumulator",
                    "Alignment arrays disagree in length ({} chars); truncating to {}",
                    timing.chars.len(),
                    count
                );
            }
            self.alignment
                .chars
                .extend(timing.chars.iter().take(count).cloned());
            self.alignment.char_start_times_ms.extend(
                timing
                    .char_start_times_ms
                    .iter()
                    .take(count)
                    .map(|start| start + offset),
            );
            self.alignment
                .char_durations_ms
                .extend(timing.char_durations_ms.iter().take(count).copied());
        }

        tracing::trace!(
            target: "accumulator",
            "Chunk {} appended: +{} bytes (total {})",
            self.chunks,
            fragment.len(),
            self.buffer.len()
        );
    }

    pub fn is_empty(&self) -> bool {
        self.chunks == 0
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Persists the buffered audio and resets. The buffers are reset even when the write fails,
    /// so a failed artifact never leaks into the next turn.
    pub async fn on_final(
        &mut self,
        turn_id: Option<&TurnId>,
        store: &dyn ArtifactStore,
    ) -> Result<AudioHalf> {
        let (bytes, alignment) = self.take();
        let key = match turn_id {
            Some(id) => id.0.clone(),
            None => format!("unkeyed_{}", uuid::Uuid::new_v4().simple()),
        };

        let audio_uri = store.write(&key, &bytes).await?;
        let timing = word_timings(&alignment);

        tracing::debug!(
            target: "accumulator",
            "Finalized audio for {}: {} bytes, {} words",
            key,
            bytes.len(),
            timing.len()
        );

        Ok(AudioHalf { audio_uri, timing })
    }

    /// Drops any in-flight accumulation without persisting it.
    pub fn discard(&mut self) {
        if !self.is_empty() {
            tracing::debug!(
                target: "accumulator",
                "Discarding {} buffered bytes from {} chunks",
                self.buffer.len(),
                self.chunks
            );
        }
        self.take();
    }

    fn take(&mut self) -> (Bytes, CharAlignment) {
        self.chunks = 0;
        (
            self.buffer.split().freeze(),
            std::mem::take(&mut self.alignment),
        )
    }
}

/// Derives word-level timing from char-level alignment. A word starts at its first
/// character and lasts for the summed durations up to and including its delimiter.
pub fn word_timings(alignment: &CharAlignment) -> Vec<TimingEntry> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut word_start: Option<u64> = None;
    let mut word_duration = 0u64;

    for ((ch, start), duration) in alignment
        .chars
        .iter()
        .zip(&alignment.char_start_times_ms)
        .zip(&alignment.char_durations_ms)
    {
        word_duration += duration;

        if WORD_DELIMITERS.contains(&ch.as_str()) {
            flush_word(&mut words, &mut word, word_start.take(), word_duration);
            word_duration = 0;
            continue;
        }

        if word_start.is_none() {
            word_start = Some(*start);
        }
        word.push_str(ch);
    }

    flush_word(&mut words, &mut word, word_start, word_duration);
    words
}

fn flush_word(words: &mut Vec<TimingEntry>, word: &mut String, start: Option<u64>, duration_ms: u64) {
    match start {
        Some(start_ms) if !word.is_empty() => words.push(TimingEntry {
            unit: std::mem::take(word),
            start_ms,
            duration_ms,
        }),
        _ => word.clear(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alignment(text: &str, char_ms: u64) -> CharAlignment {
        let chars: Vec<String> = text.chars().map(|c| c.to_string()).collect();
        let n = chars.len() as u64;
        CharAlignment {
            chars,
            char_start_times_ms: (0..n).map(|i| i * char_ms).collect(),
            char_durations_ms: vec![char_ms; n as usize],
        }
    }

    #[test]
    fn test_words_split_on_space_and_punctuation() {
        let words = word_timings(&alignment("Hi, you.", 10));
        let units: Vec<&str> = words.iter().map(|w| w.unit.as_str()).collect();
        assert_eq!(units, vec!["Hi", "you"]);
        assert_eq!(words[0].start_ms, 0);
        // "H", "i", "," contribute to the first word's duration.
        assert_eq!(words[0].duration_ms, 30);
        // Second word starts at "y" (index 4) after ", " and the space.
        assert_eq!(words[1].start_ms, 40);
        assert_eq!(words[1].duration_ms, 40);
    }

    #[test]
    fn test_trailing_word_without_delimiter_is_kept() {
        let words = word_timings(&alignment("hola amigo", 5));
        assert_eq!(words.len(), 2);
        assert_eq!(words[1].unit, "amigo");
        assert_eq!(words[1].duration_ms, 25);
    }

    #[test]
    fn test_second_fragment_is_offset_by_previous_end() {
        let mut acc = AudioAccumulator::new();
        acc.on_chunk(b"AAA", Some(&alignment("ab", 10)));
        acc.on_chunk(b"BBB", Some(&alignment("cd", 10)));

        assert_eq!(acc.buffered_bytes(), 6);
        assert_eq!(acc.alignment.char_start_times_ms, vec![0, 10, 20, 30]);
    }

    #[test]
    fn test_discard_resets_everything() {
        let mut acc = AudioAccumulator::new();
        acc.on_chunk(b"AAA", Some(&alignment("ab", 10)));
        acc.discard();
        assert!(acc.is_empty());
        assert_eq!(acc.buffered_bytes(), 0);
        assert!(acc.alignment.is_empty());
    }
}
