//! Sessão: instância explícita que liga link → decoder → reconciler → hub.
//!
//! A thread de leitura do link executa decodificação, reconciliação e
//! publicação de forma síncrona sob um único lock (escritor único). Os
//! assinantes só recebem cópias.

use crate::board::{BoardKind, PortInfo};
use crate::command::{CommandChannel, CommandError};
use crate::config::AppConfig;
use crate::history::{HistoryKind, HistorySnapshot, MarkerLayer, NullLayer};
use crate::hub::{BroadcastHub, Subscription, SubscriptionId};
use crate::link::{ConnectOptions, LinkError, LinkManager, LinkObserver, LinkState, PortProvider};
use crate::protocol::{DecodeStats, LineDecoder};
use crate::reconciler::{Notification, StateReconciler};
use crate::types::DeviceState;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct PipelineInner {
    decoder: LineDecoder,
    reconciler: StateReconciler,
}

/// Recebe os eventos do link e publica as notificações resultantes.
struct Pipeline {
    inner: Mutex<PipelineInner>,
    hub: BroadcastHub<Notification>,
}

impl Pipeline {
    fn publish(&self, notification: Option<Notification>) {
        if let Some(n) = notification {
            self.hub.publish(&n);
        }
    }
}

impl LinkObserver for Pipeline {
    fn on_state(&self, state: LinkState) {
        let mut inner = lock(&self.inner);
        let notification = match state {
            LinkState::Requesting => {
                // Linha parcial de uma conexão anterior não vale mais
                inner.decoder.reset();
                state
                    .connection_status()
                    .and_then(|s| inner.reconciler.set_connection(s))
            }
            LinkState::Disconnected => inner.reconciler.mark_link_down(),
            other => other
                .connection_status()
                .and_then(|s| inner.reconciler.set_connection(s)),
        };
        self.publish(notification);
    }

    fn on_open(&self, info: &PortInfo, board: BoardKind, baud_rate: u32) {
        debug!("Pipeline: {} aberto @ {baud_rate}", info.name);
        let mut inner = lock(&self.inner);
        let notification = inner.reconciler.set_board(board);
        self.publish(notification);
    }

    fn on_data(&self, chunk: &[u8]) {
        let mut inner = lock(&self.inner);
        let PipelineInner {
            decoder,
            reconciler,
        } = &mut *inner;
        for record in decoder.feed(chunk) {
            for notification in reconciler.apply(&record) {
                self.hub.publish(&notification);
            }
        }
    }
}

/// Contadores agregados da sessão.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub decode: DecodeStats,
    /// Notificações ainda na fila de algum assinante
    pub pending_notifications: usize,
    pub subscribers: usize,
}

/// Dona do link, do pipeline de telemetria, do hub e do canal de comandos.
///
/// Todos os métodos recebem `&self`; a sessão pode ser compartilhada via
/// `Arc` entre a thread de UI/console e os observers.
pub struct Session {
    link: Mutex<LinkManager>,
    options: ConnectOptions,
    pipeline: Arc<Pipeline>,
    commands: CommandChannel,
}

impl Session {
    pub fn new(config: &AppConfig, provider: Box<dyn PortProvider>) -> Self {
        Self::with_marker_layer(config, provider, Box::new(NullLayer))
    }

    /// Como [`Session::new`], com uma camada de mapa para os marcadores.
    pub fn with_marker_layer(
        config: &AppConfig,
        provider: Box<dyn PortProvider>,
        layer: Box<dyn MarkerLayer>,
    ) -> Self {
        let pipeline = Arc::new(Pipeline {
            inner: Mutex::new(PipelineInner {
                decoder: LineDecoder::new(&config.decoder),
                reconciler: StateReconciler::new(&config.history, layer),
            }),
            hub: BroadcastHub::new(config.hub.backlog_warn),
        });
        let link = LinkManager::new(provider, &config.link, pipeline.clone());
        let commands = CommandChannel::new(&link);
        Self {
            link: Mutex::new(link),
            options: ConnectOptions::from_config(&config.link),
            pipeline,
            commands,
        }
    }

    /// Conecta com as opções da configuração.
    pub fn connect(&self) -> Result<BoardKind, LinkError> {
        self.connect_with(&self.options)
    }

    pub fn connect_with(&self, options: &ConnectOptions) -> Result<BoardKind, LinkError> {
        let board = lock(&self.link).connect(options)?;
        info!("Sessão conectada ({board})");
        Ok(board)
    }

    pub fn disconnect(&self) {
        lock(&self.link).disconnect();
    }

    pub fn link_state(&self) -> LinkState {
        lock(&self.link).state()
    }

    pub fn subscribe(&self) -> Subscription<Notification> {
        self.pipeline.hub.subscribe()
    }

    pub fn subscribe_with<F>(&self, observer: F) -> SubscriptionId
    where
        F: FnMut(Notification) + Send + 'static,
    {
        self.pipeline.hub.subscribe_with(observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.pipeline.hub.unsubscribe(id)
    }

    /// Cópia do estado atual.
    pub fn snapshot(&self) -> DeviceState {
        lock(&self.pipeline.inner).reconciler.state().clone()
    }

    pub fn history(&self, kind: HistoryKind) -> HistorySnapshot {
        lock(&self.pipeline.inner).reconciler.history(kind)
    }

    pub fn send_command(&self, text: &str) -> Result<(), CommandError> {
        self.commands.send(text)
    }

    /// Handle clonável para enviar comandos de outra thread.
    pub fn commands(&self) -> CommandChannel {
        self.commands.clone()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            decode: lock(&self.pipeline.inner).decoder.stats(),
            pending_notifications: self.pipeline.hub.pending(),
            subscribers: self.pipeline.hub.subscriber_count(),
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
