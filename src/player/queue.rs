use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::{collections::VecDeque, fmt, ops::Range, sync::Arc, time::Duration};
use tracing::{debug, info};

use super::GuildPlayer;
use crate::{
    error::{LavalinkError, Result},
    model::{Track, TrackEndReason},
};

const MAX_HISTORY: usize = 50;

/// Hooks opcionales alrededor de una entrada de la cola
#[async_trait]
pub trait QueueHooks: Send + Sync {
    /// Devolver `false` cancela la entrada y la cola sigue con la próxima
    async fn before_playing(&self, _player: &GuildPlayer, _track: &Track) -> bool {
        true
    }

    async fn after_playing(&self, _player: &GuildPlayer, _track: &Track, _reason: TrackEndReason) {}
}

#[derive(Clone)]
pub struct QueueEntry {
    pub track: Track,
    pub hooks: Option<Arc<dyn QueueHooks>>,
    pub added_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(track: Track) -> Self {
        Self {
            track,
            hooks: None,
            added_at: Utc::now(),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn QueueHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }
}

impl From<Track> for QueueEntry {
    fn from(track: Track) -> Self {
        Self::new(track)
    }
}

impl fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueEntry")
            .field("title", &self.track.info.title)
            .field("hooks", &self.hooks.is_some())
            .field("added_at", &self.added_at)
            .finish()
    }
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<QueueEntry>,
    history: VecDeque<QueueEntry>,
    /// Hay un driver consumiendo la cola
    running: bool,
}

/// Cola FIFO de un player. Se puede modificar mientras el driver la consume.
#[derive(Debug)]
pub struct TrackQueue {
    state: Mutex<QueueState>,
    max_size: usize,
}

impl TrackQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            max_size,
        }
    }

    /// Agrega una entrada al final, devuelve su posición
    pub fn push(&self, entry: QueueEntry) -> Result<usize> {
        let mut state = self.state.lock();
        if state.items.len() >= self.max_size {
            return Err(LavalinkError::QueueFull(self.max_size));
        }

        info!("➕ Agregado a la cola: {}", entry.track.info.title);
        state.items.push_back(entry);
        Ok(state.items.len() - 1)
    }

    /// Agrega tantas entradas como quepan, devuelve cuántas entraron
    pub fn push_many(&self, entries: impl IntoIterator<Item = QueueEntry>) -> usize {
        let mut state = self.state.lock();
        let available = self.max_size.saturating_sub(state.items.len());

        let before = state.items.len();
        state.items.extend(entries.into_iter().take(available));
        let added = state.items.len() - before;

        info!("➕ Agregadas {} canciones a la cola", added);
        added
    }

    pub fn remove(&self, index: usize) -> Option<QueueEntry> {
        let removed = self.state.lock().items.remove(index);
        if removed.is_some() {
            debug!("❌ Entrada eliminada en posición {}", index);
        }
        removed
    }

    /// Elimina un rango de posiciones; el rango se recorta a la cola actual
    pub fn remove_range(&self, range: Range<usize>) -> Vec<QueueEntry> {
        let mut state = self.state.lock();
        let end = range.end.min(state.items.len());
        let start = range.start.min(end);
        state.items.drain(start..end).collect()
    }

    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let removed = state.items.len();
        state.items.clear();
        info!("🗑️ Cola limpiada");
        removed
    }

    pub fn shuffle(&self) {
        let mut state = self.state.lock();
        state.items.make_contiguous().shuffle(&mut rand::thread_rng());
        info!("🔀 Cola mezclada");
    }

    pub fn reverse(&self) {
        let mut state = self.state.lock();
        state.items.make_contiguous().reverse();
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Tracks pendientes, en orden
    pub fn snapshot(&self) -> Vec<Track> {
        self.state
            .lock()
            .items
            .iter()
            .map(|entry| entry.track.clone())
            .collect()
    }

    /// Últimos tracks reproducidos por la cola, del más viejo al más reciente
    pub fn history(&self) -> Vec<Track> {
        self.state
            .lock()
            .history
            .iter()
            .map(|entry| entry.track.clone())
            .collect()
    }

    pub fn total_duration(&self) -> Duration {
        self.state
            .lock()
            .items
            .iter()
            .filter(|entry| !entry.track.info.is_stream)
            .map(|entry| entry.track.info.duration())
            .sum()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Marca la cola como tomada por un driver; `false` si ya había uno
    pub(crate) fn try_start(&self) -> bool {
        let mut state = self.state.lock();
        if state.running || state.items.is_empty() {
            return false;
        }
        state.running = true;
        true
    }

    /// Próxima entrada. Con la cola vacía libera el driver en el mismo lock,
    /// así un `push` concurrente siempre ve `running == false`.
    pub(crate) fn next_or_release(&self) -> Option<QueueEntry> {
        let mut state = self.state.lock();
        let next = state.items.pop_front();
        if next.is_none() {
            state.running = false;
            info!("📭 Cola vacía, no hay siguiente track");
        }
        next
    }

    pub(crate) fn release(&self) {
        self.state.lock().running = false;
    }

    pub(crate) fn record_played(&self, entry: QueueEntry) {
        let mut state = self.state.lock();
        state.history.push_back(entry);
        if state.history.len() > MAX_HISTORY {
            state.history.pop_front();
        }
    }
}
