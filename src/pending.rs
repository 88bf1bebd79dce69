//! Join table for the two independently arriving halves of an assistant turn.

use crate::bounded_set::BoundedIdSet;
use crate::types::{AudioHalf, ParleyError, Turn, TurnId};
use std::collections::HashMap;

#[derive(Debug)]
struct PendingTurn {
    text: Option<Turn>,
    audio: Option<AudioHalf>,
    /// Arrival order of the first text half, used by the id-less audio heuristic.
    text_seq: Option<u64>,
}

impl PendingTurn {
    fn empty() -> Self {
        Self {
            text: None,
            audio: None,
            text_seq: None,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum JoinOutcome {
    /// Both halves are present; the entry is gone and the turn should be applied.
    Completed(Turn),
    /// Waiting for the other half.
    Pending,
    /// Audio for a turn that was already released text-only.
    BackFill { turn_id: TurnId, audio: AudioHalf },
    /// Audio that could not be correlated with any text and was dropped.
    Dropped,
}

pub struct PendingTurnTable {
    entries: HashMap<TurnId, PendingTurn>,
    /// Id-less audio waiting for the next text half.
    unkeyed_audio: Option<AudioHalf>,
    released: BoundedIdSet,
    /// Turns whose audio failed before their text arrived.
    audio_lost: BoundedIdSet,
    seq: u64,
}

impl PendingTurnTable {
    pub fn new(released_capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            unkeyed_audio: None,
            released: BoundedIdSet::new(released_capacity),
            audio_lost: BoundedIdSet::new(released_capacity),
            seq: 0,
        }
    }

    /// Records a text half. Repeated calls for the same id replace the text (last write wins).
    pub fn on_text_half(&mut self, turn: Turn) -> JoinOutcome {
        let Some(turn_id) = turn.turn_id.clone() else {
            tracing::warn!(target: "pending", "Text half without turn id; releasing immediately");
            return JoinOutcome::Completed(turn);
        };

        if self.released.contains(&turn_id) {
            tracing::debug!(target: "pending", "Text half for released turn {} ignored", turn_id.short());
            return JoinOutcome::Pending;
        }

        if self.audio_lost.remove(&turn_id) {
            tracing::info!(target: "pending", "Audio for {} was lost; releasing text only", turn_id.short());
            return JoinOutcome::Completed(turn);
        }

        self.seq += 1;
        let seq = self.seq;
        let entry = self
            .entries
            .entry(turn_id.clone())
            .or_insert_with(PendingTurn::empty);
        entry.text = Some(turn);
        if entry.text_seq.is_none() {
            entry.text_seq = Some(seq);
        }

        if entry.audio.is_none() {
            if let Some(audio) = self.unkeyed_audio.take() {
                tracing::warn!(
                    target: "pending",
                    "Pairing parked id-less audio with text half {} by arrival order",
                    turn_id.short()
                );
                entry.audio = Some(audio);
            }
        }

        self.try_complete(&turn_id)
    }

    /// Records the audio half for a completed accumulation.
    pub fn on_audio_half(&mut self, turn_id: Option<TurnId>, audio: AudioHalf) -> JoinOutcome {
        let turn_id = match turn_id {
            Some(id) => id,
            None => return self.on_unkeyed_audio(audio),
        };

        if self.released.remove(&turn_id) {
            return JoinOutcome::BackFill { turn_id, audio };
        }

        let entry = self
            .entries
            .entry(turn_id.clone())
            .or_insert_with(PendingTurn::empty);
        if entry.audio.is_some() {
            tracing::warn!(target: "pending", "Second audio half for {}; keeping the newest", turn_id.short());
        }
        entry.audio = Some(audio);

        self.try_complete(&turn_id)
    }

    /// Best-effort pairing: the oldest text half still lacking audio gets the id-less audio.
    fn on_unkeyed_audio(&mut self, audio: AudioHalf) -> JoinOutcome {
        let candidate = self
            .entries
            .iter()
            .filter(|(_, e)| e.text.is_some() && e.audio.is_none())
            .min_by_key(|(_, e)| e.text_seq)
            .map(|(id, _)| id.clone());

        match candidate {
            Some(turn_id) => {
                tracing::warn!(
                    target: "pending",
                    "Pairing id-less audio with oldest pending text {} by arrival order",
                    turn_id.short()
                );
                if let Some(entry) = self.entries.get_mut(&turn_id) {
                    entry.audio = Some(audio);
                }
                self.try_complete(&turn_id)
            }
            None => {
                if let Some(stale) = self.unkeyed_audio.replace(audio) {
                    let err = ParleyError::MissingCorrelation(stale.audio_uri);
                    tracing::warn!(target: "pending", "{}", err);
                    return JoinOutcome::Dropped;
                }
                tracing::debug!(target: "pending", "Parking id-less audio until a text half arrives");
                JoinOutcome::Pending
            }
        }
    }

    /// Marks the audio for `turn_id` as lost (e.g. the artifact write failed) so its text
    /// is not held back. Returns the text-only turn if the text half is already here.
    pub fn on_audio_failed(&mut self, turn_id: &TurnId) -> Option<Turn> {
        match self.entries.remove(turn_id) {
            Some(PendingTurn {
                text: Some(turn), ..
            }) => Some(turn),
            Some(_) | None => {
                self.audio_lost.insert(turn_id.clone());
                None
            }
        }
    }

    /// Releases every text half still waiting for audio as a text-only turn, oldest first.
    /// Late audio for these ids comes back as `JoinOutcome::BackFill`.
    pub fn release_text_only(&mut self) -> Vec<Turn> {
        let mut waiting: Vec<(u64, TurnId)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.text.is_some() && e.audio.is_none())
            .map(|(id, e)| (e.text_seq.unwrap_or(u64::MAX), id.clone()))
            .collect();
        waiting.sort();

        let mut released = Vec::with_capacity(waiting.len());
        for (_, turn_id) in waiting {
            if let Some(PendingTurn {
                text: Some(turn), ..
            }) = self.entries.remove(&turn_id)
            {
                tracing::info!(target: "pending", "Releasing turn {} without audio", turn_id.short());
                self.released.insert(turn_id);
                released.push(turn);
            }
        }
        released
    }

    /// Releases one specific text half without audio, if it is waiting.
    pub fn release(&mut self, turn_id: &TurnId) -> Option<Turn> {
        let entry = self.entries.get(turn_id)?;
        if entry.text.is_none() || entry.audio.is_some() {
            return None;
        }
        let turn = self.entries.remove(turn_id).and_then(|e| e.text)?;
        self.released.insert(turn_id.clone());
        Some(turn)
    }

    /// Forgets a turn that reached the transcript through another path. Audio already
    /// parked for it is handed back for back-fill; audio arriving later becomes `BackFill`.
    pub fn settle(&mut self, turn_id: &TurnId) -> Option<AudioHalf> {
        let parked = self.entries.remove(turn_id).and_then(|e| e.audio);
        if parked.is_none() {
            self.released.insert(turn_id.clone());
        }
        parked
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_unkeyed_audio(&self) -> bool {
        self.unkeyed_audio.is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.unkeyed_audio = None;
        self.released.clear();
        self.audio_lost.clear();
    }

    fn try_complete(&mut self, turn_id: &TurnId) -> JoinOutcome {
        let ready = matches!(
            self.entries.get(turn_id),
            Some(PendingTurn {
                text: Some(_),
                audio: Some(_),
                ..
            })
        );
        if !ready {
            return JoinOutcome::Pending;
        }

        match self.entries.remove(turn_id) {
            Some(PendingTurn {
                text: Some(turn),
                audio: Some(audio),
                ..
            }) => {
                tracing::debug!(target: "pending", "Joined text and audio for turn {}", turn_id.short());
                JoinOutcome::Completed(turn.with_audio(audio))
            }
            _ => JoinOutcome::Pending,
        }
    }
}
