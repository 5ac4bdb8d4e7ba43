//! # Agri Core
//!
//! Núcleo de telemetria do robô agrícola: link serial, decodificação das
//! linhas do robô, estado canônico, históricos limitados, fan-out para
//! assinantes e canal de comandos.
//!
//! ## Módulos
//! - [`link`] – Máquina de estados do link serial e thread de leitura
//! - [`serial`] – Transporte real via `serialport`
//! - [`protocol`] – Montagem de linhas e gramáticas (envelope JSON e tags)
//! - [`reconciler`] – Dobra registros no [`DeviceState`]
//! - [`history`] – Caminho, log de plantio e marcadores com capacidade fixa
//! - [`hub`] – Broadcast não bloqueante para N assinantes
//! - [`command`] – Comandos de texto de volta ao robô
//! - [`session`] – Instância que liga tudo
//! - [`wire`] – Frame binário de snapshot para a rede
//! - [`config`] – Configuração unificada via TOML
//! - [`alerts`] – Thresholds e níveis de alerta
//! - [`board`] – Classificação da placa conectada

pub mod types;
pub mod protocol;
pub mod config;
pub mod board;
pub mod history;
pub mod reconciler;
pub mod hub;
pub mod link;
pub mod serial;
pub mod command;
pub mod session;
pub mod wire;
pub mod alerts;

#[cfg(test)]
mod mock;

// Re-exports convenientes
pub use types::{ConnectionStatus, DeviceState, SensorId, SensorStatus, TelemetryRecord};
pub use config::AppConfig;
pub use link::{ConnectOptions, LinkError, LinkState};
pub use reconciler::Notification;
pub use history::{HistoryKind, HistorySnapshot};
pub use session::{Session, SessionStats};
pub use command::CommandError;
pub use wire::{decode_snapshot, encode_snapshot, WIRE_VERSION};
