//! Thread de rede que escuta UDP e envia snapshots do relay via channel.

use agri_core::DeviceState;
use agri_core::wire::{MAX_UDP_PAYLOAD, decode_snapshot};
use crossbeam_channel::{Receiver, Sender, bounded};
use std::io;
use std::net::UdpSocket;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Mensagem enviada da thread de rede para o console.
#[derive(Debug, Clone)]
pub struct NetMessage {
    pub state: DeviceState,
    pub source_addr: String,
    pub raw_size: usize,
}

/// Inicia a thread de rede. Retorna o receiver do channel.
pub fn spawn_receiver_thread(port: u16, relay_ip_filter: String) -> io::Result<Receiver<NetMessage>> {
    let (tx, rx) = bounded::<NetMessage>(64);

    std::thread::Builder::new()
        .name("udp-receiver".into())
        .spawn(move || receiver_loop(&tx, port, &relay_ip_filter))?;

    Ok(rx)
}

fn receiver_loop(tx: &Sender<NetMessage>, port: u16, relay_ip_filter: &str) {
    loop {
        match UdpSocket::bind(format!("0.0.0.0:{port}")) {
            Ok(sock) => {
                if serve(&sock, tx, relay_ip_filter).is_break() {
                    return;
                }
            }
            Err(e) => {
                error!("Falha ao bind porta {port}: {e}. Tentando novamente em 2s...");
                std::thread::sleep(Duration::from_secs(2));
            }
        }
    }
}

/// Recebe frames até o console fechar o channel.
fn serve(sock: &UdpSocket, tx: &Sender<NetMessage>, relay_ip_filter: &str) -> std::ops::ControlFlow<()> {
    sock.set_read_timeout(Some(Duration::from_secs(1))).ok();
    let port = sock.local_addr().map(|a| a.port()).unwrap_or_default();
    let mode = if relay_ip_filter.is_empty() {
        "Auto (broadcast)"
    } else {
        relay_ip_filter
    };
    info!("Monitor escutando em 0.0.0.0:{port} – Modo: {mode}");

    let mut buf = vec![0u8; MAX_UDP_PAYLOAD + 1];
    loop {
        match sock.recv_from(&mut buf) {
            Ok((size, addr)) => {
                let source = addr.ip().to_string();
                if !relay_ip_filter.is_empty() && source != relay_ip_filter {
                    debug!("Ignorando pacote de {source} (esperado: {relay_ip_filter})");
                    continue;
                }

                match decode_snapshot(&buf[..size]) {
                    Ok(state) => {
                        let msg = NetMessage {
                            state,
                            source_addr: source,
                            raw_size: size,
                        };
                        match tx.try_send(msg) {
                            Ok(()) => {}
                            Err(crossbeam_channel::TrySendError::Full(_)) => {
                                debug!("Channel cheio, descartando snapshot");
                            }
                            Err(crossbeam_channel::TrySendError::Disconnected(_)) => {
                                return std::ops::ControlFlow::Break(());
                            }
                        }
                    }
                    Err(e) => debug!("Pacote inválido de {source}: {e}"),
                }
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock =>
            {
                // Timeout normal, continua
            }
            Err(e) => warn!("Erro ao receber UDP: {e}"),
        }
    }
}
