//! Transporte simulado para os testes do link e da sessão.

use crate::board::{BoardKind, PortInfo};
use crate::link::{ConnectOptions, LinkError, LinkObserver, LinkState, PortProvider, SerialDevice};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Espera `cond` ficar verdadeira (polling a cada 5 ms).
pub(crate) fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

enum Chunk {
    Data(Vec<u8>),
    Fail(io::ErrorKind),
}

/// Lado de teste do fio: injeta linhas/erros e inspeciona o que foi escrito.
#[derive(Clone)]
pub(crate) struct MockWire {
    tx: Sender<Chunk>,
    events: Arc<Mutex<Vec<String>>>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl MockWire {
    pub(crate) fn send_line(&self, line: &str) {
        let _ = self.tx.send(Chunk::Data(format!("{line}\n").into_bytes()));
    }

    pub(crate) fn send_raw(&self, bytes: &[u8]) {
        let _ = self.tx.send(Chunk::Data(bytes.to_vec()));
    }

    pub(crate) fn fail(&self, kind: io::ErrorKind) {
        let _ = self.tx.send(Chunk::Fail(kind));
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn written(&self) -> String {
        String::from_utf8_lossy(&self.written.lock().unwrap()).into_owned()
    }
}

pub(crate) struct MockDevice {
    info: PortInfo,
    accepted: Vec<u32>,
    rx: Receiver<Chunk>,
    events: Arc<Mutex<Vec<String>>>,
    written: Arc<Mutex<Vec<u8>>>,
    failing_release: bool,
    open: bool,
}

impl MockDevice {
    /// Dispositivo que só abre nos baud rates de `accepted`.
    pub(crate) fn new(name: &str, accepted: &[u32]) -> (Self, MockWire) {
        let (tx, rx) = unbounded();
        let events = Arc::new(Mutex::new(Vec::new()));
        let written = Arc::new(Mutex::new(Vec::new()));
        let device = Self {
            info: PortInfo {
                name: name.into(),
                ..Default::default()
            },
            accepted: accepted.to_vec(),
            rx,
            events: events.clone(),
            written: written.clone(),
            failing_release: false,
            open: false,
        };
        (device, MockWire { tx, events, written })
    }

    pub(crate) fn with_product(mut self, product: &str, product_id: u16) -> Self {
        self.info.product = Some(product.into());
        self.info.product_id = Some(product_id);
        self
    }

    /// `flush` e `close` sempre falham.
    pub(crate) fn failing_release(mut self) -> Self {
        self.failing_release = true;
        self
    }

    fn log(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }
}

impl SerialDevice for MockDevice {
    fn info(&self) -> &PortInfo {
        &self.info
    }

    fn open(&mut self, baud_rate: u32) -> io::Result<()> {
        self.log(format!("open:{baud_rate}"));
        if self.accepted.contains(&baud_rate) {
            self.open = true;
            Ok(())
        } else {
            Err(io::Error::other("baud recusado"))
        }
    }

    fn reader(&mut self) -> io::Result<Box<dyn Read + Send>> {
        if !self.open {
            return Err(io::ErrorKind::NotConnected.into());
        }
        self.log("reader");
        Ok(Box::new(MockReader {
            rx: self.rx.clone(),
            pending: VecDeque::new(),
            events: self.events.clone(),
        }))
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        if !self.open {
            return Err(io::ErrorKind::NotConnected.into());
        }
        self.written.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.failing_release {
            return Err(io::Error::other("flush falhou"));
        }
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.log("close");
        self.open = false;
        if self.failing_release {
            return Err(io::Error::other("close falhou"));
        }
        Ok(())
    }
}

struct MockReader {
    rx: Receiver<Chunk>,
    pending: VecDeque<u8>,
    events: Arc<Mutex<Vec<String>>>,
}

impl Read for MockReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(Duration::from_millis(10)) {
                Ok(Chunk::Data(data)) => self.pending.extend(data),
                Ok(Chunk::Fail(kind)) => return Err(io::Error::new(kind, "falha simulada")),
                Err(RecvTimeoutError::Timeout) => return Err(io::ErrorKind::TimedOut.into()),
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Drop for MockReader {
    fn drop(&mut self) {
        self.events.lock().unwrap().push("reader_released".into());
    }
}

/// Fila de respostas para `request()`; clonável para o teste manter acesso.
#[derive(Clone, Default)]
pub(crate) struct MockProvider {
    queue: Arc<Mutex<VecDeque<Result<MockDevice, LinkError>>>>,
    requests: Arc<AtomicUsize>,
}

impl MockProvider {
    pub(crate) fn push_device(&self, device: MockDevice) {
        self.queue.lock().unwrap().push_back(Ok(device));
    }

    pub(crate) fn push_error(&self, err: LinkError) {
        self.queue.lock().unwrap().push_back(Err(err));
    }

    pub(crate) fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl PortProvider for MockProvider {
    fn request(&mut self, _options: &ConnectOptions) -> Result<Box<dyn SerialDevice>, LinkError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match self.queue.lock().unwrap().pop_front() {
            Some(Ok(device)) => Ok(Box::new(device)),
            Some(Err(e)) => Err(e),
            None => Err(LinkError::NoDevice),
        }
    }
}

/// Observer que só registra o que recebeu.
#[derive(Default)]
pub(crate) struct RecordingObserver {
    states: Mutex<Vec<LinkState>>,
    data: Mutex<Vec<u8>>,
    opened: Mutex<Option<(BoardKind, u32)>>,
}

impl RecordingObserver {
    pub(crate) fn states(&self) -> Vec<LinkState> {
        self.states.lock().unwrap().clone()
    }

    pub(crate) fn data(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }

    pub(crate) fn opened_baud(&self) -> Option<u32> {
        self.opened.lock().unwrap().map(|(_, baud)| baud)
    }
}

impl LinkObserver for RecordingObserver {
    fn on_state(&self, state: LinkState) {
        self.states.lock().unwrap().push(state);
    }

    fn on_open(&self, _info: &PortInfo, board: BoardKind, baud_rate: u32) {
        *self.opened.lock().unwrap() = Some((board, baud_rate));
    }

    fn on_data(&self, chunk: &[u8]) {
        self.data.lock().unwrap().extend_from_slice(chunk);
    }
}
