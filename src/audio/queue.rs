use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::track::{ResolvedTrack, TrackRequest};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("la cola está vacía")]
    Empty,
    #[error("la cola fue descartada")]
    Disposed,
}

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    disposed: bool,
}

/// Cola FIFO compartida entre el surface de comandos, los workers de descarga
/// y el player. Todas las operaciones toman el lock internamente y nunca
/// bloquean esperando items.
#[derive(Debug)]
pub struct TrackQueue<T> {
    name: &'static str,
    inner: Mutex<Inner<T>>,
}

impl<T> TrackQueue<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                disposed: false,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Agrega un item al final. Nunca falla: en una cola descartada el item se
    /// descarta (y con él cualquier recurso que posea).
    pub fn put(&self, item: T) {
        let mut inner = self.inner.lock();
        if inner.disposed {
            warn!("⚠️ put sobre cola descartada '{}', item ignorado", self.name);
            return;
        }
        inner.items.push_back(item);
        debug!("➕ Cola '{}': {} items", self.name, inner.items.len());
    }

    pub fn put_all(&self, items: impl IntoIterator<Item = T>) {
        let mut inner = self.inner.lock();
        if inner.disposed {
            warn!("⚠️ put sobre cola descartada '{}', items ignorados", self.name);
            return;
        }
        inner.items.extend(items);
    }

    /// Extrae hasta `n` items desde la cabeza. `get(0)` devuelve un vector vacío.
    pub fn get(&self, n: usize) -> Result<Vec<T>, QueueError> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let mut inner = self.inner.lock();
        if inner.disposed {
            return Err(QueueError::Disposed);
        }
        if inner.items.is_empty() {
            return Err(QueueError::Empty);
        }

        let take = n.min(inner.items.len());
        Ok(inner.items.drain(..take).collect())
    }

    pub fn get_one(&self) -> Result<T, QueueError> {
        self.get(1)?.pop().ok_or(QueueError::Empty)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Snapshot de una proyección de cada item, en orden.
    pub fn peek_map<R>(&self, f: impl FnMut(&T) -> R) -> Result<Vec<R>, QueueError> {
        let inner = self.inner.lock();
        if inner.disposed {
            return Err(QueueError::Disposed);
        }
        Ok(inner.items.iter().map(f).collect())
    }

    /// Vacía la cola atómicamente e invoca `cleanup` una vez por item, fuera
    /// del lock. La cola queda vacía y usable.
    pub fn clear(&self, mut cleanup: impl FnMut(T)) -> Result<usize, QueueError> {
        let drained: Vec<T> = {
            let mut inner = self.inner.lock();
            if inner.disposed {
                return Err(QueueError::Disposed);
            }
            inner.items.drain(..).collect()
        };

        let count = drained.len();
        for item in drained {
            cleanup(item);
        }

        if count > 0 {
            debug!("🗑️ Cola '{}' limpiada ({} items)", self.name, count);
        }
        Ok(count)
    }

    /// Marca la cola como inutilizable y devuelve lo que quedaba en ella.
    pub fn dispose(&self) -> Vec<T> {
        let mut inner = self.inner.lock();
        inner.disposed = true;
        inner.items.drain(..).collect()
    }
}

impl<T: Clone> TrackQueue<T> {
    pub fn peek_all(&self) -> Result<Vec<T>, QueueError> {
        self.peek_map(T::clone)
    }
}

/// Las tres colas del pipeline y la señal que despierta al player cuando
/// aparece trabajo nuevo.
#[derive(Debug, Clone)]
pub struct PipelineQueues {
    pub downloads: Arc<TrackQueue<TrackRequest>>,
    pub ready: Arc<TrackQueue<ResolvedTrack>>,
    pub failed: Arc<TrackQueue<TrackRequest>>,
    pub wake: Arc<Notify>,
}

impl PipelineQueues {
    pub fn new() -> Self {
        Self {
            downloads: Arc::new(TrackQueue::new("downloads")),
            ready: Arc::new(TrackQueue::new("ready")),
            failed: Arc::new(TrackQueue::new("failed")),
            wake: Arc::new(Notify::new()),
        }
    }

    /// No queda nada por descargar ni por reproducir.
    pub fn is_drained(&self) -> bool {
        self.downloads.is_empty() && self.ready.is_empty()
    }
}

impl Default for PipelineQueues {
    fn default() -> Self {
        Self::new()
    }
}
