use rand::seq::SliceRandom;
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::audio::track::Track;
use crate::{Error, Result};

/// What the player has to do after the queue moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Repeat-song: play the same current track again.
    Replay,
    /// A new current track was selected (or none, with repeat-queue on an empty list).
    Play,
    /// Nothing left: the queue was reset and `queueEmpty` must be reported.
    Empty,
}

/// Cola de reproducción de un player.
///
/// `current` is the track playing in the guild, `upcoming` the tracks not yet
/// played and `history` the ones already played. Entries are moved between the
/// lists, never shared.
#[derive(Debug, Default)]
pub struct Queue {
    current: Option<Track>,
    upcoming: VecDeque<Track>,
    history: Vec<Track>,
    repeat_song: bool,
    repeat_queue: bool,
    max_history: Option<usize>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cola que solo guarda los últimos `max` tracks reproducidos.
    pub fn with_max_history(max: usize) -> Self {
        Self {
            max_history: Some(max),
            ..Self::default()
        }
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub(crate) fn current_mut(&mut self) -> Option<&mut Track> {
        self.current.as_mut()
    }

    pub fn upcoming(&self) -> &VecDeque<Track> {
        &self.upcoming
    }

    pub fn history(&self) -> &[Track] {
        &self.history
    }

    pub fn repeat_song(&self) -> bool {
        self.repeat_song
    }

    pub fn repeat_queue(&self) -> bool {
        self.repeat_queue
    }

    /// Activa/desactiva repetir canción. Activarla apaga repetir cola.
    pub fn set_repeat_song(&mut self, enabled: bool) {
        self.repeat_song = enabled;
        if enabled {
            self.repeat_queue = false;
            info!("🔂 Repetir canción activado");
        }
    }

    /// Activa/desactiva repetir cola. Activarla apaga repetir canción.
    pub fn set_repeat_queue(&mut self, enabled: bool) {
        self.repeat_queue = enabled;
        if enabled {
            self.repeat_song = false;
            info!("🔁 Repetir cola activado");
        }
    }

    /// Moves the queue one step forward.
    ///
    /// `to_previous` controls whether the outgoing current track is kept
    /// (in history, or at the back of the list with repeat-queue).
    pub fn advance(&mut self, to_previous: bool) -> Advance {
        if self.repeat_song && self.current.is_some() {
            return Advance::Replay;
        }

        if self.repeat_queue && self.current.is_some() {
            if to_previous {
                if let Some(current) = self.current.take() {
                    self.upcoming.push_back(current);
                }
            }
            self.current = self.upcoming.pop_front();
            return Advance::Play;
        }

        if self.upcoming.is_empty() {
            self.reset();
            info!("📭 Cola vacía, no hay siguiente track");
            return Advance::Empty;
        }

        if to_previous {
            if let Some(current) = self.current.take() {
                self.push_history(current);
            }
        }
        self.current = self.upcoming.pop_front();
        Advance::Play
    }

    /// Skips `amount` tracks at once (`amount >= 1`).
    ///
    /// The current track and the ones jumped over go to history, or to the back
    /// of the list with repeat-queue. Without repeat-queue, skipping past the end
    /// resets the queue.
    pub fn skip(&mut self, amount: usize) -> Result<Advance> {
        if amount == 0 {
            return Err(Error::validation("amount must be 1 or greater"));
        }

        if self.repeat_queue {
            for _ in 0..amount {
                if let Some(current) = self.current.take() {
                    self.upcoming.push_back(current);
                }
                self.current = self.upcoming.pop_front();
            }
            return Ok(if self.current.is_some() {
                Advance::Play
            } else {
                self.reset();
                Advance::Empty
            });
        }

        if amount > self.upcoming.len() {
            self.reset();
            return Ok(Advance::Empty);
        }

        for _ in 0..amount {
            if let Some(current) = self.current.take() {
                self.push_history(current);
            }
            self.current = self.upcoming.pop_front();
        }
        debug!("⏭️ Saltadas {} canciones", amount);
        Ok(Advance::Play)
    }

    /// Agrega tracks en `offset` (al final si es `None`).
    ///
    /// With no current track the first inserted one becomes current right away.
    pub fn add(&mut self, tracks: impl IntoIterator<Item = Track>, offset: Option<usize>) -> Result<()> {
        let tracks: Vec<Track> = tracks.into_iter().collect();
        if tracks.is_empty() {
            return Ok(());
        }

        let at = offset.unwrap_or(self.upcoming.len());
        if at > self.upcoming.len() {
            return Err(Error::validation(format!(
                "offset {} is past the end of the queue ({})",
                at,
                self.upcoming.len()
            )));
        }

        let added = tracks.len();
        for (i, track) in tracks.into_iter().enumerate() {
            self.upcoming.insert(at + i, track);
        }

        if self.current.is_none() {
            self.current = self.upcoming.remove(at);
        }

        info!("➕ Agregadas {} canciones a la cola", added);
        Ok(())
    }

    /// Removes the slot `from`, or the half-open range `[from, to)`.
    pub fn remove(&mut self, from: usize, to: Option<usize>) -> Result<Vec<Track>> {
        let len = self.upcoming.len();
        let to = match to {
            Some(to) => to,
            None => from
                .checked_add(1)
                .ok_or_else(|| Error::validation(format!("position {from} is out of bounds")))?,
        };

        if from >= to {
            return Err(Error::validation("`from` must be smaller than `to`"));
        }
        if from >= len || to > len {
            return Err(Error::validation(format!(
                "range {from}..{to} is out of bounds for a queue of {len}"
            )));
        }

        let removed: Vec<Track> = self.upcoming.drain(from..to).collect();
        debug!("❌ {} tracks eliminados desde la posición {}", removed.len(), from);
        Ok(removed)
    }

    /// Fisher–Yates sobre los tracks pendientes.
    pub fn shuffle(&mut self) {
        let mut rng = rand::thread_rng();
        self.upcoming.make_contiguous().shuffle(&mut rng);
        info!("🔀 Cola mezclada");
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.upcoming.clear();
        self.history.clear();
    }

    /// Duración total (ms): actual + pendientes.
    pub fn duration(&self) -> u64 {
        let current = self.current.as_ref().and_then(Track::duration).unwrap_or(0);
        current
            + self
                .upcoming
                .iter()
                .filter_map(Track::duration)
                .sum::<u64>()
    }

    pub fn size(&self) -> usize {
        self.upcoming.len()
    }

    pub fn total_size(&self) -> usize {
        self.upcoming.len() + usize::from(self.current.is_some())
    }

    fn push_history(&mut self, track: Track) {
        self.history.push(track);

        if let Some(max) = self.max_history {
            if self.history.len() > max {
                let excess = self.history.len() - max;
                self.history.drain(..excess);
            }
        }
    }
}
