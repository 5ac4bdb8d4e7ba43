//! Formatação em texto do estado, dos históricos e dos alertas.

use agri_core::alerts::{Alert, AlertLevel};
use agri_core::history::HistorySnapshot;
use agri_core::types::{ConnectionStatus, SensorId, SensorStatus};
use agri_core::{DeviceState, Notification};
use std::fmt::Write;

/// Comando digitado no console local.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Connect,
    Disconnect,
    Status,
    Path,
    Log,
    Markers,
    Stats,
    Help,
    Quit,
    /// Texto enviado ao robô como está
    Send(String),
    Empty,
}

impl ConsoleCommand {
    /// Linhas iniciadas por `:` são comandos do console; o resto vai ao robô.
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(ConsoleCommand::Empty);
        }
        let Some(name) = line.strip_prefix(':') else {
            return Ok(ConsoleCommand::Send(line.to_string()));
        };
        Ok(match name.trim().to_ascii_lowercase().as_str() {
            "connect" | "c" => ConsoleCommand::Connect,
            "disconnect" | "d" => ConsoleCommand::Disconnect,
            "status" | "s" => ConsoleCommand::Status,
            "path" => ConsoleCommand::Path,
            "log" => ConsoleCommand::Log,
            "markers" => ConsoleCommand::Markers,
            "stats" => ConsoleCommand::Stats,
            "help" | "h" | "?" => ConsoleCommand::Help,
            "quit" | "q" | "exit" => ConsoleCommand::Quit,
            other => return Err(format!("Comando desconhecido: :{other}")),
        })
    }
}

pub const HELP: &str = "\
  :connect / :disconnect   liga ou desliga o link serial
  :status                  estado atual e alertas
  :path | :log | :markers  históricos
  :stats                   contadores do decodificador e do hub
  :quit                    sai
  qualquer outro texto     enviado ao robô como comando";

fn opt<T: std::fmt::Display>(value: Option<T>, unit: &str) -> String {
    match value {
        Some(v) => format!("{v}{unit}"),
        None => "—".into(),
    }
}

pub fn connection_label(status: ConnectionStatus) -> &'static str {
    match status {
        ConnectionStatus::Disconnected => "DESCONECTADO",
        ConnectionStatus::Connecting => "CONECTANDO",
        ConnectionStatus::Connected => "CONECTADO",
        ConnectionStatus::Error => "ERRO",
    }
}

/// Bloco de várias linhas com o snapshot.
pub fn format_state(state: &DeviceState) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "  Link: {} | Placa: {}",
        connection_label(state.connection),
        state.board.as_deref().unwrap_or("—")
    );
    let _ = writeln!(
        out,
        "  Bateria: {} | Tensão: {} | Sinal: {} | Carregando: {}",
        opt(state.battery_percent, "%"),
        opt(state.voltage.map(|v| format!("{v:.2}")), " V"),
        opt(state.signal_strength, "%"),
        opt(state.charging.map(|c| if c { "sim" } else { "não" }), ""),
    );
    let _ = writeln!(
        out,
        "  Temp: {} | Umidade: {} | Solo: {} | MCU: {}",
        opt(state.temperature.map(|t| format!("{t:.1}")), " °C"),
        opt(state.humidity, "%"),
        opt(state.soil_moisture, "%"),
        opt(state.mcu_temperature.map(|t| format!("{t:.1}")), " °C"),
    );
    let position = match state.position {
        Some(p) => format!(
            "{:.5}, {:.5} ({}, {} sat)",
            p.lat,
            p.lng,
            if p.fixed { "fix" } else { "sem fix" },
            p.satellites
        ),
        None => "—".into(),
    };
    let _ = writeln!(out, "  GPS: {position}");
    if state.uptime.is_some() || state.runtime.is_some() {
        let _ = writeln!(
            out,
            "  Uptime: {} | Operação: {}",
            state.uptime.as_deref().unwrap_or("—"),
            state.runtime.as_deref().unwrap_or("—")
        );
    }
    let sensors: Vec<String> = SensorId::ALL
        .iter()
        .map(|&id| {
            let mark = match state.sensor(id) {
                SensorStatus::Online => "●",
                SensorStatus::Offline => "○",
            };
            format!("{mark} {}", id.label())
        })
        .collect();
    let _ = write!(out, "  Sensores: {}", sensors.join("  "));
    out
}

pub fn format_alerts(alerts: &[Alert]) -> Vec<String> {
    alerts
        .iter()
        .map(|a| {
            let tag = match a.level {
                AlertLevel::Critical => "CRÍTICO",
                AlertLevel::Warning => "ATENÇÃO",
                AlertLevel::Normal => "ok",
            };
            format!("  [{tag}] {}: {:.1}{}", a.label, a.value, a.unit)
        })
        .collect()
}

pub fn format_history(history: &HistorySnapshot) -> Vec<String> {
    match history {
        HistorySnapshot::Path(points) => points
            .iter()
            .enumerate()
            .map(|(i, p)| format!("  {i:>3}  {:.5}, {:.5}", p.lat, p.lng))
            .collect(),
        HistorySnapshot::Planting(entries) => entries
            .iter()
            .map(|e| {
                let local = e.timestamp.with_timezone(&chrono::Local);
                let at = e
                    .position
                    .map(|p| format!(" @ {:.5}, {:.5}", p.lat, p.lng))
                    .unwrap_or_default();
                format!(
                    "  {}  {:<8} {}{at}",
                    local.format("%H:%M:%S"),
                    e.outcome,
                    e.depth_display
                )
            })
            .collect(),
        HistorySnapshot::Markers(markers) => markers
            .iter()
            .map(|m| match m.position {
                Some(p) => format!("  {:?} @ {:.5}, {:.5}", m.kind, p.lat, p.lng),
                None => format!("  {:?} (sem posição)", m.kind),
            })
            .collect(),
    }
}

/// Linha curta para notificações que merecem aparecer no console.
pub fn format_notification(notification: &Notification) -> Option<String> {
    match notification {
        Notification::Planting(e) => Some(format!("🌱 Plantio {} a {}", e.outcome, e.depth_display)),
        Notification::Log(text) => Some(format!("[robô] {text}")),
        Notification::State(_) | Notification::PathPoint(_) | Notification::Marker(_) => None,
    }
}
