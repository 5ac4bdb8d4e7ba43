//! Frame binário de snapshot para clientes de rede.
//!
//! ```text
//! ┌──────────┬─────────┬──────────────────────────┐
//! │ Magic(1) │ Ver.(1) │ bincode(DeviceState) (N) │
//! └──────────┴─────────┴──────────────────────────┘
//! ```

use crate::types::DeviceState;

/// Magic byte dos frames de snapshot.
pub const MAGIC_BYTE: u8 = 0x41; // 'A'

pub const WIRE_VERSION: u8 = 1;

const HEADER_SIZE: usize = 2;

/// Tamanho máximo de pacote UDP seguro (sem fragmentação).
pub const MAX_UDP_PAYLOAD: usize = 65507;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("Frame muito curto ({0} bytes, mínimo {HEADER_SIZE})")]
    TooShort(usize),

    #[error("Magic byte inválido: 0x{0:02X} (esperado 0x{MAGIC_BYTE:02X})")]
    InvalidMagic(u8),

    #[error("Versão incompatível: {0} (suportada: {WIRE_VERSION})")]
    VersionMismatch(u8),

    #[error("Erro de serialização: {0}")]
    Serialize(String),

    #[error("Erro de deserialização: {0}")]
    Deserialize(String),
}

/// `[MAGIC][VERSION][bincode...]`
pub fn encode_snapshot(state: &DeviceState) -> Result<Vec<u8>, WireError> {
    let body = bincode::serialize(state).map_err(|e| WireError::Serialize(e.to_string()))?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
    frame.push(MAGIC_BYTE);
    frame.push(WIRE_VERSION);
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Valida magic e versão antes de deserializar.
pub fn decode_snapshot(data: &[u8]) -> Result<DeviceState, WireError> {
    let [magic, version, body @ ..] = data else {
        return Err(WireError::TooShort(data.len()));
    };
    if *magic != MAGIC_BYTE {
        return Err(WireError::InvalidMagic(*magic));
    }
    if *version != WIRE_VERSION {
        return Err(WireError::VersionMismatch(*version));
    }
    bincode::deserialize(body).map_err(|e| WireError::Deserialize(e.to_string()))
}
