//! Socket UDP que republica snapshots para os monitores da rede.

use agri_core::config::RelayConfig;
use agri_core::wire::{WireError, encode_snapshot};
use agri_core::DeviceState;
use std::io;
use std::net::UdpSocket;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum UplinkError {
    #[error("Falha ao montar frame: {0}")]
    Wire(#[from] WireError),

    #[error("Erro de socket UDP: {0}")]
    Io(#[from] io::Error),
}

pub struct Uplink {
    sock: UdpSocket,
    dest: String,
}

impl Uplink {
    /// Cria o socket (broadcast ou unicast conforme a configuração).
    pub fn open(cfg: &RelayConfig) -> Result<Self, UplinkError> {
        let bind = if cfg.bind_ip.is_empty() {
            "0.0.0.0:0".to_string()
        } else {
            format!("{}:0", cfg.bind_ip)
        };
        let sock = UdpSocket::bind(bind)?;

        if cfg.mode == "broadcast" || cfg.dest_ip == "255.255.255.255" {
            sock.set_broadcast(true)?;
            info!("Modo BROADCAST ativado");
        } else {
            info!("Modo UNICAST → {}", cfg.dest_ip);
        }

        Ok(Self {
            sock,
            dest: format!("{}:{}", cfg.dest_ip, cfg.port),
        })
    }

    pub fn dest(&self) -> &str {
        &self.dest
    }

    /// Envia um frame de snapshot; devolve o número de bytes enviados.
    pub fn send_state(&self, state: &DeviceState) -> Result<usize, UplinkError> {
        let frame = encode_snapshot(state)?;
        Ok(self.sock.send_to(&frame, &self.dest)?)
    }
}
