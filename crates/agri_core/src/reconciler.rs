//! Reconciliação: dobra registros de telemetria no snapshot canônico.
//!
//! Só os campos presentes no registro são escritos; o resto mantém o valor
//! anterior. Cada registro que muda ao menos um campo gera exatamente uma
//! notificação [`Notification::State`], emitida depois das notificações de
//! histórico do mesmo registro.

use crate::board::BoardKind;
use crate::config::HistoryConfig;
use crate::history::{HistoryKind, HistorySnapshot, HistoryStores, MarkerLayer};
use crate::types::*;
use tracing::{debug, info};

/// Mensagem publicada no hub.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    State(DeviceState),
    PathPoint(PathPoint),
    Planting(PlantingLogEntry),
    Marker(MapMarker),
    Log(String),
}

/// Dono exclusivo do `DeviceState` e dos históricos.
pub struct StateReconciler {
    state: DeviceState,
    history: HistoryStores,
}

impl StateReconciler {
    pub fn new(config: &HistoryConfig, layer: Box<dyn MarkerLayer>) -> Self {
        Self {
            state: DeviceState::default(),
            history: HistoryStores::new(config, layer),
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn history(&self, kind: HistoryKind) -> HistorySnapshot {
        self.history.snapshot(kind)
    }

    /// Aplica um registro e devolve as notificações resultantes.
    pub fn apply(&mut self, record: &TelemetryRecord) -> Vec<Notification> {
        let mut out = Vec::new();
        match record {
            TelemetryRecord::Readings(readings) => {
                let before = self.state.clone();
                for reading in readings {
                    self.apply_reading(reading, &mut out);
                }
                if self.state != before {
                    out.push(Notification::State(self.state.clone()));
                }
            }
            TelemetryRecord::Log(text) => {
                info!("[robô] {text}");
                out.push(Notification::Log(text.clone()));
            }
            TelemetryRecord::Unrecognized(_) => {}
        }
        out
    }

    fn apply_reading(&mut self, reading: &Reading, out: &mut Vec<Notification>) {
        match reading {
            Reading::Battery(percent) => {
                self.state.battery_percent = Some(*percent);
                self.mark_online(SensorId::Battery);
            }
            Reading::Environment(env) => {
                if let Some(t) = env.temperature {
                    self.state.temperature = Some(t);
                }
                if let Some(h) = env.humidity {
                    self.state.humidity = Some(h);
                }
                if env.temperature.is_some() || env.humidity.is_some() {
                    self.mark_online(SensorId::TempHumidity);
                }
                if let Some(s) = env.soil_moisture {
                    self.state.soil_moisture = Some(s);
                    self.mark_online(SensorId::Soil);
                }
            }
            Reading::Position(fix) => {
                self.state.position = Some(*fix);
                self.mark_online(SensorId::Gps);
                let point = fix.point();
                self.history.path.push(point);
                out.push(Notification::PathPoint(point));
            }
            Reading::Planting(event) => {
                let position = self.history.path.newest().copied();
                let entry = PlantingLogEntry {
                    timestamp: chrono::Utc::now(),
                    depth_display: format!("{:.1} cm", event.depth),
                    outcome: event.outcome,
                    position,
                };
                self.history.planting.push(entry.clone());
                out.push(Notification::Planting(entry));

                if event.outcome == PlantingOutcome::Ok {
                    let marker = self.history.markers.add(position, MarkerKind::Planted);
                    out.push(Notification::Marker(marker));
                }
            }
            Reading::Power(power) => {
                if let Some(v) = power.voltage {
                    self.state.voltage = Some(v);
                }
                if let Some(s) = power.signal {
                    self.state.signal_strength = Some(s);
                }
                if let Some(t) = power.mcu_temperature {
                    self.state.mcu_temperature = Some(t);
                }
                if let Some(c) = power.charging {
                    self.state.charging = Some(c);
                }
                if let Some(u) = &power.uptime {
                    self.state.uptime = Some(u.clone());
                }
                if let Some(r) = &power.runtime {
                    self.state.runtime = Some(r.clone());
                }
            }
        }
    }

    fn mark_online(&mut self, sensor: SensorId) {
        self.state.sensors.insert(sensor, SensorStatus::Online);
    }

    /// Atualiza o status de conexão. Notifica só se mudou.
    pub fn set_connection(&mut self, status: ConnectionStatus) -> Option<Notification> {
        if self.state.connection == status {
            return None;
        }
        debug!("Status de conexão: {:?} → {:?}", self.state.connection, status);
        self.state.connection = status;
        Some(Notification::State(self.state.clone()))
    }

    pub fn set_board(&mut self, board: BoardKind) -> Option<Notification> {
        let name = board.display_name();
        if self.state.board.as_deref() == Some(name) {
            return None;
        }
        self.state.board = Some(name.to_string());
        Some(Notification::State(self.state.clone()))
    }

    /// Link inteiro caiu: status `Disconnected` e todos os sensores `Offline`.
    /// Os valores lidos permanecem.
    pub fn mark_link_down(&mut self) -> Option<Notification> {
        let before = self.state.clone();
        self.state.connection = ConnectionStatus::Disconnected;
        for status in self.state.sensors.values_mut() {
            *status = SensorStatus::Offline;
        }
        (self.state != before).then(|| Notification::State(self.state.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DecoderConfig;
    use crate::history::NullLayer;
    use crate::protocol::LineDecoder;

    fn setup() -> (LineDecoder, StateReconciler) {
        (
            LineDecoder::new(&DecoderConfig::default()),
            StateReconciler::new(&HistoryConfig::default(), Box::new(NullLayer)),
        )
    }

    fn feed(d: &mut LineDecoder, r: &mut StateReconciler, line: &str) -> Vec<Notification> {
        let record = d.decode(line);
        r.apply(&record)
    }

    fn state_notifications(n: &[Notification]) -> usize {
        n.iter()
            .filter(|n| matches!(n, Notification::State(_)))
            .count()
    }

    #[test]
    fn environment_lines_fold_into_state() {
        let (mut d, mut r) = setup();
        for line in ["TEMP:24.5", "HUM:61", "SOIL:41"] {
            let n = feed(&mut d, &mut r, line);
            assert_eq!(state_notifications(&n), 1);
        }
        let s = r.state();
        assert_eq!(s.temperature, Some(24.5));
        assert_eq!(s.humidity, Some(61));
        assert_eq!(s.soil_moisture, Some(41));
        assert_eq!(s.sensor(SensorId::TempHumidity), SensorStatus::Online);
        assert_eq!(s.sensor(SensorId::Soil), SensorStatus::Online);
        assert_eq!(s.sensor(SensorId::Gps), SensorStatus::Offline);
    }

    #[test]
    fn multi_tag_line_changes_only_its_fields() {
        let (mut d, mut r) = setup();
        let n = feed(&mut d, &mut r, "BAT:87 TEMP:24.5");
        assert_eq!(state_notifications(&n), 1);

        let mut expected = DeviceState {
            battery_percent: Some(87),
            temperature: Some(24.5),
            ..Default::default()
        };
        expected.sensors.insert(SensorId::Battery, SensorStatus::Online);
        expected.sensors.insert(SensorId::TempHumidity, SensorStatus::Online);
        assert_eq!(*r.state(), expected);
    }

    #[test]
    fn garbage_changes_nothing() {
        let (mut d, mut r) = setup();
        feed(&mut d, &mut r, "BAT:50");
        let before = r.state().clone();
        let n = feed(&mut d, &mut r, "???");
        assert!(n.is_empty());
        assert_eq!(*r.state(), before);
    }

    #[test]
    fn repeated_value_does_not_notify_state() {
        let (mut d, mut r) = setup();
        feed(&mut d, &mut r, "BAT:50");
        let n = feed(&mut d, &mut r, "BAT:50");
        assert!(n.is_empty());
    }

    #[test]
    fn path_keeps_last_100_points() {
        let (mut d, mut r) = setup();
        feed(&mut d, &mut r, "GPS:14.6091,121.0223,1,7");
        for i in 1..=101 {
            let line = format!("GPS:14.{:04},121.0223,{},7", 6091 + i, i % 2);
            feed(&mut d, &mut r, &line);
        }
        let HistorySnapshot::Path(points) = r.history(HistoryKind::Path) else {
            panic!("esperava trajeto");
        };
        assert_eq!(points.len(), 100);
        // 102 pontos no total: os dois primeiros foram despejados
        assert!((points[0].lat - 14.6093).abs() < 1e-9);
        assert!((points[99].lat - 14.6192).abs() < 1e-9);
    }

    #[test]
    fn planting_log_and_markers() {
        let (mut d, mut r) = setup();
        let n = feed(&mut d, &mut r, "PLANT:12.0,OK");
        assert!(n.iter().any(|n| matches!(n, Notification::Marker(_))));
        let n = feed(&mut d, &mut r, "PLANT:8.0,Shallow");
        assert!(!n.iter().any(|n| matches!(n, Notification::Marker(_))));

        let HistorySnapshot::Planting(log) = r.history(HistoryKind::Planting) else {
            panic!("esperava log de plantio");
        };
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].outcome, PlantingOutcome::Shallow);
        assert_eq!(log[0].depth_display, "8.0 cm");
        assert_eq!(log[1].outcome, PlantingOutcome::Ok);
        assert_eq!(r.history(HistoryKind::Markers).len(), 1);
    }

    #[test]
    fn planting_uses_last_known_position() {
        let (mut d, mut r) = setup();
        feed(&mut d, &mut r, "GPS:1.5,2.5,1,9 PLANT:10.0,OK");
        let HistorySnapshot::Markers(markers) = r.history(HistoryKind::Markers) else {
            panic!("esperava marcadores");
        };
        assert_eq!(markers[0].position, Some(GeoPoint { lat: 1.5, lng: 2.5 }));
    }

    #[test]
    fn link_down_marks_sensors_offline_but_keeps_values() {
        let (mut d, mut r) = setup();
        r.set_connection(ConnectionStatus::Connected);
        feed(&mut d, &mut r, "BAT:80 TEMP:20.0");
        assert!(r.mark_link_down().is_some());
        let s = r.state();
        assert_eq!(s.connection, ConnectionStatus::Disconnected);
        assert_eq!(s.online_sensors(), 0);
        assert_eq!(s.battery_percent, Some(80));
        assert!(r.mark_link_down().is_none());
    }

    #[test]
    fn log_message_is_forwarded() {
        let (mut d, mut r) = setup();
        let n = feed(&mut d, &mut r, r#"{"type":"log","message":"semeadora pronta"}"#);
        assert_eq!(n, vec![Notification::Log("semeadora pronta".into())]);
    }
}
