//! Históricos limitados: trajeto GPS, log de plantio e marcadores de mapa.
//!
//! Todos são FIFO com capacidade fixa; `len() <= capacity()` sempre vale.

use crate::config::HistoryConfig;
use crate::types::*;
use std::collections::VecDeque;
use tracing::debug;

// ──────────────────────────────────────────────
// Buffer circular
// ──────────────────────────────────────────────

/// Sequência append-only com despejo do mais antigo.
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedHistory<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Acrescenta `item` e devolve o item despejado, se houver.
    pub fn push(&mut self, item: T) -> Option<T> {
        self.items.push_back(item);
        if self.items.len() > self.capacity {
            self.items.pop_front()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Do mais antigo para o mais novo.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.items.iter()
    }

    pub fn newest(&self) -> Option<&T> {
        self.items.back()
    }
}

// ──────────────────────────────────────────────
// Camada de mapa
// ──────────────────────────────────────────────

/// Colaborador de apresentação que desenha marcadores.
///
/// `attach` cria o recurso de mapa; `release` é chamado antes de o marcador
/// despejado ser descartado.
pub trait MarkerLayer: Send {
    fn attach(&mut self, marker: &MapMarker) -> Option<MarkerHandle>;
    fn release(&mut self, handle: MarkerHandle);
}

/// Camada sem recursos (sem mapa conectado).
#[derive(Debug, Default)]
pub struct NullLayer;

impl MarkerLayer for NullLayer {
    fn attach(&mut self, _marker: &MapMarker) -> Option<MarkerHandle> {
        None
    }

    fn release(&mut self, _handle: MarkerHandle) {}
}

/// Marcadores de plantio bem-sucedido.
pub struct MarkerStore {
    markers: BoundedHistory<MapMarker>,
    layer: Box<dyn MarkerLayer>,
}

impl MarkerStore {
    pub fn new(capacity: usize, layer: Box<dyn MarkerLayer>) -> Self {
        Self {
            markers: BoundedHistory::new(capacity),
            layer,
        }
    }

    /// Cria o marcador, anexa à camada e libera o recurso do despejado.
    pub fn add(&mut self, position: Option<GeoPoint>, kind: MarkerKind) -> MapMarker {
        let mut marker = MapMarker {
            position,
            kind,
            handle: None,
        };
        marker.handle = self.layer.attach(&marker);

        if let Some(evicted) = self.markers.push(marker.clone()) {
            if let Some(handle) = evicted.handle {
                debug!("Liberando marcador {:?}", handle);
                self.layer.release(handle);
            }
        }
        marker
    }

    pub fn markers(&self) -> &BoundedHistory<MapMarker> {
        &self.markers
    }
}

// ──────────────────────────────────────────────
// Conjunto de históricos
// ──────────────────────────────────────────────

/// Tipo de histórico pedido por `Session::history`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    Path,
    Planting,
    Markers,
}

/// Cópia ordenada de um histórico.
#[derive(Debug, Clone, PartialEq)]
pub enum HistorySnapshot {
    /// Do mais antigo para o mais novo
    Path(Vec<PathPoint>),
    /// Do mais novo para o mais antigo
    Planting(Vec<PlantingLogEntry>),
    /// Do mais antigo para o mais novo
    Markers(Vec<MapMarker>),
}

impl HistorySnapshot {
    pub fn len(&self) -> usize {
        match self {
            HistorySnapshot::Path(v) => v.len(),
            HistorySnapshot::Planting(v) => v.len(),
            HistorySnapshot::Markers(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct HistoryStores {
    pub path: BoundedHistory<PathPoint>,
    pub planting: BoundedHistory<PlantingLogEntry>,
    pub markers: MarkerStore,
}

impl HistoryStores {
    pub fn new(config: &HistoryConfig, layer: Box<dyn MarkerLayer>) -> Self {
        Self {
            path: BoundedHistory::new(config.path_capacity),
            planting: BoundedHistory::new(config.planting_capacity),
            markers: MarkerStore::new(config.marker_capacity, layer),
        }
    }

    pub fn snapshot(&self, kind: HistoryKind) -> HistorySnapshot {
        match kind {
            HistoryKind::Path => HistorySnapshot::Path(self.path.iter().copied().collect()),
            HistoryKind::Planting => {
                HistorySnapshot::Planting(self.planting.iter().rev().cloned().collect())
            }
            HistoryKind::Markers => {
                HistorySnapshot::Markers(self.markers.markers().iter().cloned().collect())
            }
        }
    }
}
