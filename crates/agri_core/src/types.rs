//! Tipos de telemetria do robô de campo.
//!
//! Campos nunca recebidos ficam em `None` (desconhecido), nunca em zero.
//! `DeviceState` é serializável com bincode para os frames do relay.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ──────────────────────────────────────────────
// Conexão e sensores
// ──────────────────────────────────────────────

/// Status de conexão exposto aos assinantes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Sensor lógico do robô.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SensorId {
    TempHumidity,
    Soil,
    Light,
    Ph,
    Obstacle,
    Gps,
    Battery,
}

impl SensorId {
    pub const ALL: [SensorId; 7] = [
        SensorId::TempHumidity,
        SensorId::Soil,
        SensorId::Light,
        SensorId::Ph,
        SensorId::Obstacle,
        SensorId::Gps,
        SensorId::Battery,
    ];

    pub fn label(self) -> &'static str {
        match self {
            SensorId::TempHumidity => "temp/umidade",
            SensorId::Soil => "solo",
            SensorId::Light => "luz",
            SensorId::Ph => "pH",
            SensorId::Obstacle => "obstáculo",
            SensorId::Gps => "GPS",
            SensorId::Battery => "bateria",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorStatus {
    Online,
    #[default]
    Offline,
}

// ──────────────────────────────────────────────
// Leituras
// ──────────────────────────────────────────────

/// Fix de GPS: posição + validade + satélites.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub lat: f64,
    pub lng: f64,
    pub fixed: bool,
    pub satellites: u32,
}

impl PositionFix {
    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            lat: self.lat,
            lng: self.lng,
        }
    }
}

/// Resultado de um evento de plantio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlantingOutcome {
    #[serde(rename = "OK")]
    Ok,
    Shallow,
    Deep,
    Failed,
}

impl PlantingOutcome {
    /// Token exato usado no protocolo (`PLANT:<depth>,<token>`).
    pub fn as_token(self) -> &'static str {
        match self {
            PlantingOutcome::Ok => "OK",
            PlantingOutcome::Shallow => "Shallow",
            PlantingOutcome::Deep => "Deep",
            PlantingOutcome::Failed => "Failed",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "OK" => Some(PlantingOutcome::Ok),
            "Shallow" => Some(PlantingOutcome::Shallow),
            "Deep" => Some(PlantingOutcome::Deep),
            "Failed" => Some(PlantingOutcome::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PlantingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_token())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlantingEvent {
    /// Profundidade (cm)
    pub depth: f32,
    pub outcome: PlantingOutcome,
}

/// Leitura ambiental parcial. Campos ausentes na linha ficam `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentReading {
    /// Temperatura ambiente (°C)
    pub temperature: Option<f32>,
    /// Umidade relativa (%)
    pub humidity: Option<u32>,
    /// Umidade do solo (%)
    pub soil_moisture: Option<u32>,
}

impl EnvironmentReading {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.humidity.is_none() && self.soil_moisture.is_none()
    }
}

/// Dados de energia/rádio vindos apenas do envelope `system_status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerStatus {
    /// Tensão da bateria (V)
    pub voltage: Option<f32>,
    /// Intensidade de sinal (0–100)
    pub signal: Option<u8>,
    /// Temperatura do MCU (°C)
    pub mcu_temperature: Option<f32>,
    pub charging: Option<bool>,
    pub uptime: Option<String>,
    pub runtime: Option<String>,
}

impl PowerStatus {
    pub fn is_empty(&self) -> bool {
        self.voltage.is_none()
            && self.signal.is_none()
            && self.mcu_temperature.is_none()
            && self.charging.is_none()
            && self.uptime.is_none()
            && self.runtime.is_none()
    }
}

/// Uma leitura tipada extraída de uma linha.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reading {
    /// Bateria (0–100%)
    Battery(u8),
    Environment(EnvironmentReading),
    Position(PositionFix),
    Planting(PlantingEvent),
    Power(PowerStatus),
}

/// Resultado da decodificação de uma linha: no máximo um registro por linha.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TelemetryRecord {
    /// Uma ou mais leituras, na ordem das tags. Nunca vazio.
    Readings(Vec<Reading>),
    Log(String),
    Unrecognized(String),
}

// ──────────────────────────────────────────────
// Histórico
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Ponto do trajeto GPS.
pub type PathPoint = GeoPoint;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantingLogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Ex: "12.0 cm"
    pub depth_display: String,
    pub outcome: PlantingOutcome,
    /// Última posição conhecida no momento do plantio.
    pub position: Option<GeoPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerKind {
    Planted,
}

/// Handle opaco de um recurso da camada de mapa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarkerHandle(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapMarker {
    pub position: Option<GeoPoint>,
    pub kind: MarkerKind,
    pub handle: Option<MarkerHandle>,
}

// ──────────────────────────────────────────────
// Snapshot canônico
// ──────────────────────────────────────────────

/// Snapshot atual do dispositivo.
///
/// Cada campo reflete o valor mais recente já decodificado. Sensores
/// começam `Offline` e só voltam a `Offline` quando o link inteiro cai.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub board: Option<String>,
    pub connection: ConnectionStatus,
    pub battery_percent: Option<u8>,
    pub voltage: Option<f32>,
    pub signal_strength: Option<u8>,
    pub mcu_temperature: Option<f32>,
    pub charging: Option<bool>,
    pub uptime: Option<String>,
    pub runtime: Option<String>,
    pub temperature: Option<f32>,
    pub humidity: Option<u32>,
    pub soil_moisture: Option<u32>,
    pub position: Option<PositionFix>,
    pub sensors: BTreeMap<SensorId, SensorStatus>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            board: None,
            connection: ConnectionStatus::Disconnected,
            battery_percent: None,
            voltage: None,
            signal_strength: None,
            mcu_temperature: None,
            charging: None,
            uptime: None,
            runtime: None,
            temperature: None,
            humidity: None,
            soil_moisture: None,
            position: None,
            sensors: SensorId::ALL
                .iter()
                .map(|&id| (id, SensorStatus::Offline))
                .collect(),
        }
    }
}

impl DeviceState {
    pub fn sensor(&self, id: SensorId) -> SensorStatus {
        self.sensors.get(&id).copied().unwrap_or_default()
    }

    pub fn online_sensors(&self) -> usize {
        self.sensors
            .values()
            .filter(|s| **s == SensorStatus::Online)
            .count()
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
