//! Gerenciador do link serial com o robô.
//!
//! Máquina de estados:
//!
//! ```text
//! Disconnected → Requesting → Opening → Connected → Reading
//!       ↑                                              │
//!       └──────────── (Closing | Faulted) ←────────────┘
//! ```
//!
//! Uma única thread de leitura por link é dona do lado de leitura do
//! transporte e entrega os bytes ao [`LinkObserver`]. O teardown sempre
//! termina em `Disconnected`, mesmo que passos individuais falhem.

use crate::board::{self, BoardKind, PortInfo};
use crate::config::LinkConfig;
use crate::types::ConnectionStatus;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

// ──────────────────────────────────────────────
// Estados e erros
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Requesting,
    Opening,
    Connected,
    Reading,
    Closing,
    Faulted,
}

impl LinkState {
    /// Aceita comandos de saída.
    pub fn is_connected(self) -> bool {
        matches!(self, LinkState::Connected | LinkState::Reading)
    }

    /// Status visível aos assinantes. `Closing` não altera o status.
    pub fn connection_status(self) -> Option<ConnectionStatus> {
        match self {
            LinkState::Disconnected => Some(ConnectionStatus::Disconnected),
            LinkState::Requesting | LinkState::Opening => Some(ConnectionStatus::Connecting),
            LinkState::Connected | LinkState::Reading => Some(ConnectionStatus::Connected),
            LinkState::Faulted => Some(ConnectionStatus::Error),
            LinkState::Closing => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Transporte serial indisponível neste ambiente: {0}")]
    Unsupported(String),

    #[error("Nenhuma porta serial compatível encontrada")]
    NoDevice,

    #[error("Solicitação de porta falhou: {0}")]
    Request(String),

    #[error("Link já ativo (estado {0:?})")]
    AlreadyConnected(LinkState),

    #[error("Nenhum baud rate aceito (tentados: {tried:?})")]
    Negotiation { tried: Vec<u32> },

    #[error("Erro de E/S no transporte: {0}")]
    Io(#[from] io::Error),
}

/// Parâmetros de uma solicitação de porta.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Porta explícita; `None` = primeira porta USB compatível
    pub port_name: Option<String>,
    /// Vendor IDs aceitos (vazio = qualquer)
    pub vendor_ids: Vec<u16>,
}

impl ConnectOptions {
    pub fn from_config(config: &LinkConfig) -> Self {
        Self {
            port_name: (!config.port_name.is_empty()).then(|| config.port_name.clone()),
            vendor_ids: config.vendor_ids.clone(),
        }
    }
}

// ──────────────────────────────────────────────
// Seams do transporte
// ──────────────────────────────────────────────

/// Handle de transporte concedido pelo [`PortProvider`].
///
/// Pode ser aberto e fechado várias vezes; o link guarda o último handle
/// concedido para reutilizá-lo se uma nova solicitação falhar.
pub trait SerialDevice: Send {
    fn info(&self) -> &PortInfo;
    fn open(&mut self, baud_rate: u32) -> io::Result<()>;
    /// Lado de leitura independente, usado só pela thread de leitura.
    /// Leituras podem retornar `TimedOut` para permitir o cancelamento.
    fn reader(&mut self) -> io::Result<Box<dyn Read + Send>>;
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
    fn close(&mut self) -> io::Result<()>;
}

/// Fonte de handles (enumeração/solicitação de portas).
pub trait PortProvider: Send {
    fn request(&mut self, options: &ConnectOptions) -> Result<Box<dyn SerialDevice>, LinkError>;
}

/// Recebe transições de estado e bytes do link.
pub trait LinkObserver: Send + Sync {
    fn on_state(&self, state: LinkState);
    fn on_open(&self, info: &PortInfo, board: BoardKind, baud_rate: u32);
    fn on_data(&self, chunk: &[u8]);
}

// ──────────────────────────────────────────────
// Estado compartilhado com a thread de leitura
// ──────────────────────────────────────────────

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct LinkShared {
    state: Mutex<LinkState>,
    device: Mutex<Option<Box<dyn SerialDevice>>>,
    observer: Arc<dyn LinkObserver>,
}

impl LinkShared {
    pub(crate) fn state(&self) -> LinkState {
        *lock(&self.state)
    }

    /// O observer é chamado com o lock de estado para manter a ordem das
    /// transições igual para todos os assinantes.
    fn transition(&self, next: LinkState) {
        let mut state = lock(&self.state);
        if *state != next {
            debug!("Link: {:?} → {:?}", *state, next);
        }
        *state = next;
        self.observer.on_state(next);
    }

    /// Transição iniciada pela thread de leitura. Não faz nada se um
    /// `disconnect()` já está em andamento ou concluído.
    fn transition_from_reader(&self, next: LinkState) -> bool {
        let mut state = lock(&self.state);
        if matches!(*state, LinkState::Closing | LinkState::Disconnected) {
            return false;
        }
        debug!("Link: {:?} → {:?}", *state, next);
        *state = next;
        self.observer.on_state(next);
        true
    }

    /// Flush + close do handle ativo. Falhas são registradas e ignoradas.
    fn close_device(&self) {
        let mut device = lock(&self.device);
        if let Some(device) = device.as_mut() {
            if let Err(e) = device.flush() {
                debug!("Flush ignorado no fechamento: {e}");
            }
            if let Err(e) = device.close() {
                debug!("Falha ao fechar {} ignorada: {e}", device.info().name);
            }
        }
    }

    /// Escreve no transporte se o link estiver conectado.
    pub(crate) fn write(&self, data: &[u8]) -> Option<io::Result<()>> {
        if !self.state().is_connected() {
            return None;
        }
        let mut device = lock(&self.device);
        let device = device.as_mut()?;
        Some(device.write_all(data).and_then(|()| device.flush()))
    }
}

enum ReadExit {
    Cancelled,
    EndOfStream,
    Fault(io::Error),
}

fn read_loop(mut reader: Box<dyn Read + Send>, cancel: &AtomicBool, shared: &LinkShared) {
    let mut buf = [0u8; 512];
    let exit = loop {
        if cancel.load(Ordering::Acquire) {
            break ReadExit::Cancelled;
        }
        match reader.read(&mut buf) {
            Ok(0) => break ReadExit::EndOfStream,
            Ok(n) => shared.observer.on_data(&buf[..n]),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                // Poll normal, continua
            }
            Err(e) => break ReadExit::Fault(e),
        }
    };

    // O leitor é liberado antes de o transporte ser fechado.
    drop(reader);

    match exit {
        ReadExit::Cancelled => debug!("Leitura cancelada"),
        ReadExit::EndOfStream => {
            info!("Fim do stream serial");
            if shared.transition_from_reader(LinkState::Closing) {
                shared.close_device();
                shared.transition(LinkState::Disconnected);
            }
        }
        ReadExit::Fault(e) => {
            error!("Erro de leitura no transporte: {e}");
            if shared.transition_from_reader(LinkState::Faulted) {
                shared.close_device();
                shared.transition(LinkState::Disconnected);
            }
        }
    }
}

struct ReaderHandle {
    cancel: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

// ──────────────────────────────────────────────
// Link Manager
// ──────────────────────────────────────────────

pub struct LinkManager {
    provider: Box<dyn PortProvider>,
    baud_candidates: Vec<u32>,
    shared: Arc<LinkShared>,
    reader: Option<ReaderHandle>,
    /// Motivo da ausência de transporte, reportado uma única vez.
    unsupported: Option<String>,
}

impl LinkManager {
    pub fn new(
        provider: Box<dyn PortProvider>,
        config: &LinkConfig,
        observer: Arc<dyn LinkObserver>,
    ) -> Self {
        Self {
            provider,
            baud_candidates: config.baud_candidates.clone(),
            shared: Arc::new(LinkShared {
                state: Mutex::new(LinkState::Disconnected),
                device: Mutex::new(None),
                observer,
            }),
            reader: None,
            unsupported: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.shared.state()
    }

    pub(crate) fn shared(&self) -> Arc<LinkShared> {
        self.shared.clone()
    }

    /// Solicita uma porta, negocia o baud rate e inicia a thread de leitura.
    pub fn connect(&mut self, options: &ConnectOptions) -> Result<BoardKind, LinkError> {
        if let Some(reason) = &self.unsupported {
            debug!("connect() ignorado: transporte indisponível");
            return Err(LinkError::Unsupported(reason.clone()));
        }

        self.reap_reader();
        let current = self.shared.state();
        if current != LinkState::Disconnected {
            return Err(LinkError::AlreadyConnected(current));
        }

        self.shared.transition(LinkState::Requesting);
        let mut device = match self.provider.request(options) {
            Ok(device) => device,
            Err(LinkError::Unsupported(reason)) => {
                error!("Transporte serial indisponível: {reason}");
                self.unsupported = Some(reason.clone());
                self.shared.transition(LinkState::Disconnected);
                return Err(LinkError::Unsupported(reason));
            }
            Err(e) => {
                let previous = lock(&self.shared.device).take();
                match previous {
                    Some(previous) => {
                        warn!(
                            "Solicitação falhou ({e}); usando a porta concedida anteriormente {}",
                            previous.info().name
                        );
                        previous
                    }
                    None => return Err(self.fail(e)),
                }
            }
        };

        self.shared.transition(LinkState::Opening);
        let Some(baud_rate) = negotiate(device.as_mut(), &self.baud_candidates) else {
            // Mantém o handle para o fallback da próxima tentativa
            *lock(&self.shared.device) = Some(device);
            return Err(self.fail(LinkError::Negotiation {
                tried: self.baud_candidates.clone(),
            }));
        };

        let reader = match device.reader() {
            Ok(reader) => reader,
            Err(e) => {
                if let Err(close_err) = device.close() {
                    debug!("Falha ao fechar após erro do leitor: {close_err}");
                }
                *lock(&self.shared.device) = Some(device);
                return Err(self.fail(e.into()));
            }
        };

        let info = device.info().clone();
        let board = board::classify(&info);
        info!("Conectado a {} @ {baud_rate} baud – placa: {board}", info.name);
        *lock(&self.shared.device) = Some(device);

        self.shared.observer.on_open(&info, board, baud_rate);
        self.shared.transition(LinkState::Connected);
        self.shared.transition(LinkState::Reading);

        let cancel = Arc::new(AtomicBool::new(false));
        let spawned = std::thread::Builder::new().name("serial-reader".into()).spawn({
            let cancel = cancel.clone();
            let shared = self.shared.clone();
            move || read_loop(reader, &cancel, &shared)
        });
        match spawned {
            Ok(thread) => {
                self.reader = Some(ReaderHandle { cancel, thread });
                Ok(board)
            }
            Err(e) => {
                self.shared.close_device();
                Err(self.fail(e.into()))
            }
        }
    }

    fn fail(&self, err: LinkError) -> LinkError {
        warn!("Falha ao conectar: {err}");
        self.shared.transition(LinkState::Faulted);
        self.shared.transition(LinkState::Disconnected);
        err
    }

    /// Junta uma thread de leitura que já terminou sozinha (EOF/erro).
    fn reap_reader(&mut self) {
        if self.shared.state() != LinkState::Disconnected {
            return;
        }
        if let Some(reader) = self.reader.take() {
            if reader.thread.join().is_err() {
                warn!("Thread de leitura terminou em pânico");
            }
        }
    }

    /// Cancela a leitura, libera o leitor, fecha o transporte.
    ///
    /// Sempre termina em `Disconnected`; erros de cada passo são ignorados.
    pub fn disconnect(&mut self) {
        if self.shared.state() == LinkState::Disconnected {
            self.reap_reader();
            debug!("disconnect() com link já desconectado");
            return;
        }

        self.shared.transition(LinkState::Closing);
        if let Some(reader) = self.reader.take() {
            reader.cancel.store(true, Ordering::Release);
            if reader.thread.join().is_err() {
                warn!("Thread de leitura terminou em pânico");
            }
        }
        self.shared.close_device();
        self.shared.transition(LinkState::Disconnected);
        info!("Link desconectado");
    }
}

impl Drop for LinkManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Tenta cada baud rate em ordem; fecha o handle após cada falha.
fn negotiate(device: &mut dyn SerialDevice, candidates: &[u32]) -> Option<u32> {
    for &baud in candidates {
        match device.open(baud) {
            Ok(()) => return Some(baud),
            Err(e) => {
                warn!("Falha ao abrir {} @ {baud} baud: {e}", device.info().name);
                if let Err(e) = device.close() {
                    debug!("Falha ao fechar após tentativa: {e}");
                }
            }
        }
    }
    None
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
