use crate::types::{AudioHalf, Turn, TurnId};
use std::collections::HashSet;

/// Owns the ordered turn list. Every other component mutates conversation state through
/// `append_turn` (and the audio back-fill), which keeps a turn id from appearing twice.
#[derive(Debug, Default)]
pub struct TurnApplier {
    turns: Vec<Turn>,
    ids: HashSet<TurnId>,
}

impl TurnApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the list from an initial load, skipping duplicate ids.
    pub fn with_turns(turns: impl IntoIterator<Item = Turn>) -> Self {
        let mut applier = Self::new();
        for turn in turns {
            applier.append_turn(turn);
        }
        applier
    }

    /// Appends `turn` unless its id is already present. Returns the new list on append,
    /// `None` when the call was a no-op.
    pub fn append_turn(&mut self, turn: Turn) -> Option<&[Turn]> {
        match &turn.turn_id {
            Some(id) => {
                if !self.ids.insert(id.clone()) {
                    tracing::debug!(target: "applier", "Turn {} already applied; ignoring", id.short());
                    return None;
                }
            }
            None => {
                tracing::debug!(target: "applier", "Appending {:?} turn without an id", turn.role);
            }
        }

        tracing::debug!(
            target: "applier",
            "Applied {:?} turn {} (audio: {})",
            turn.role,
            turn.short_id(),
            turn.audio_uri.is_some()
        );
        self.turns.push(turn);
        Some(&self.turns)
    }

    /// Attaches audio to an applied turn that has none yet. Returns the updated turn.
    pub fn backfill_audio(&mut self, turn_id: &TurnId, audio: AudioHalf) -> Option<&Turn> {
        let turn = self
            .turns
            .iter_mut()
            .rev()
            .find(|t| t.turn_id.as_ref() == Some(turn_id))?;
        if turn.audio_uri.is_some() {
            tracing::debug!(target: "applier", "Turn {} already has audio; keeping it", turn_id.short());
            return None;
        }
        turn.audio_uri = Some(audio.audio_uri);
        turn.timing = Some(audio.timing);
        tracing::info!(target: "applier", "Back-filled audio for turn {}", turn_id.short());
        Some(turn)
    }

    pub fn contains(&self, turn_id: &TurnId) -> bool {
        self.ids.contains(turn_id)
    }

    pub fn get(&self, turn_id: &TurnId) -> Option<&Turn> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.turn_id.as_ref() == Some(turn_id))
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_is_idempotent_per_id() {
        let mut applier = TurnApplier::new();
        assert_eq!(applier.append_turn(Turn::assistant("t1", "Hello!")).map(|t| t.len()), Some(1));
        assert!(applier.append_turn(Turn::assistant("t1", "Hello again")).is_none());
        assert_eq!(applier.len(), 1);
        assert_eq!(applier.turns()[0].content, "Hello!");
    }

    #[test]
    fn test_turns_without_ids_are_always_appended() {
        let mut applier = TurnApplier::new();
        applier.append_turn(Turn::new(None, crate::types::Role::User, "hola"));
        applier.append_turn(Turn::new(None, crate::types::Role::User, "hola"));
        assert_eq!(applier.len(), 2);
    }

    #[test]
    fn test_backfill_only_fills_missing_audio() {
        let mut applier = TurnApplier::with_turns([Turn::assistant("t2", "Hi")]);
        let audio = AudioHalf {
            audio_uri: "file:///a.mp3".into(),
            timing: vec![],
        };
        assert!(applier.backfill_audio(&"t2".into(), audio.clone()).is_some());
        assert!(applier.backfill_audio(&"t2".into(), audio.clone()).is_none());
        assert!(applier.backfill_audio(&"missing".into(), audio).is_none());
        assert_eq!(
            applier.get(&"t2".into()).and_then(|t| t.audio_uri.as_deref()),
            Some("file:///a.mp3")
        );
    }
}
