use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, UserId};
use std::{collections::VecDeque, time::Duration};
use tracing::{debug, info};

use crate::sources::ResolvedTrack;

/// Una pista lista para reproducir. Inmutable una vez creada.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub url: String,
    pub title: String,
    pub duration: Option<Duration>,
    /// Canal de texto desde donde se pidió; ahí va el mensaje "Now playing".
    pub text_channel: ChannelId,
    pub requested_by: UserId,
    pub added_at: DateTime<Utc>,
}

impl Track {
    pub fn new(resolved: ResolvedTrack, text_channel: ChannelId, requested_by: UserId) -> Self {
        Self {
            url: resolved.url,
            title: resolved.title,
            duration: resolved.duration,
            text_channel,
            requested_by,
            added_at: Utc::now(),
        }
    }
}

/// Cola FIFO de una sesión. Todas las operaciones toman el lock interno,
/// así que el orden entre `enqueue` concurrentes es el orden de adquisición.
#[derive(Debug, Default)]
pub struct TrackQueue {
    items: Mutex<VecDeque<Track>>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega un track al final de la cola
    pub fn enqueue(&self, track: Track) {
        debug!("➕ Agregado a la cola: {}", track.title);
        self.items.lock().push_back(track);
    }

    /// Agrega varios tracks de una vez, sin intercalar con otros productores
    pub fn enqueue_all(&self, tracks: impl IntoIterator<Item = Track>) -> usize {
        let mut items = self.items.lock();
        let before = items.len();
        items.extend(tracks);
        items.len() - before
    }

    /// Saca el primer track; `None` si la cola está vacía (nunca bloquea)
    pub fn dequeue(&self) -> Option<Track> {
        let next = self.items.lock().pop_front();
        match &next {
            Some(track) => debug!("➡️ Siguiente en cola (FIFO): {}", track.title),
            None => debug!("📭 Cola vacía, no hay siguiente track"),
        }
        next
    }

    /// Copia independiente del contenido actual, para la UI
    pub fn snapshot(&self) -> Vec<Track> {
        self.items.lock().iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Vacía la cola y devuelve cuántos tracks se descartaron
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let cleared = items.len();
        items.clear();
        if cleared > 0 {
            info!("🗑️ Cola limpiada: {} tracks removidos", cleared);
        }
        cleared
    }
}
