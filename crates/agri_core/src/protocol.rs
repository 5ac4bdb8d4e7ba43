//! Protocolo de linhas do firmware.
//!
//! Duas gramáticas convivem, tentadas nesta ordem em cada linha:
//!
//! ```text
//! 1. Envelope JSON   {"type":"system_status","battery":87,"temperature":24.5}
//! 2. Tags            BAT:87 TEMP:24.5 HUM:61 SOIL:41
//!                    GPS:14.6091,121.0223,1,7 PLANT:12.0,OK
//! ```
//!
//! Cada tag é casada de forma independente: a primeira ocorrência válida
//! vence, tags ausentes simplesmente não aparecem no registro. Uma linha que
//! não casa nenhuma gramática vira [`TelemetryRecord::Unrecognized`] e nunca
//! interrompe o stream.

use crate::config::DecoderConfig;
use crate::types::*;
use serde::Deserialize;
use tracing::{debug, trace};

/// Tamanho máximo padrão de uma linha (bytes, sem o terminador).
pub const DEFAULT_MAX_LINE_LEN: usize = 1024;

/// Contadores de erros de protocolo. Nada aqui é fatal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub lines: u64,
    pub records: u64,
    pub envelopes: u64,
    pub unrecognized: u64,
    /// Tags reconhecidas cujo valor não pôde ser convertido
    pub rejected_tokens: u64,
    /// Linhas descartadas por exceder o tamanho máximo
    pub overlong_lines: u64,
}

// ──────────────────────────────────────────────
// Montagem de linhas
// ──────────────────────────────────────────────

/// Remonta linhas a partir de pedaços de bytes vindos do transporte.
#[derive(Debug)]
pub struct LineSplitter {
    buf: Vec<u8>,
    max_len: usize,
    discarding: bool,
    overlong: u64,
}

impl LineSplitter {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(max_len.min(4096)),
            max_len,
            discarding: false,
            overlong: 0,
        }
    }

    /// Acrescenta um pedaço e devolve as linhas completas (sem `\r\n`).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                if self.discarding {
                    self.discarding = false;
                } else {
                    lines.push(self.take_line());
                }
                self.buf.clear();
            } else if !self.discarding {
                // O `\r` de um CRLF não conta para o limite
                let fits = self.buf.len() < self.max_len
                    || (byte == b'\r' && self.buf.len() == self.max_len);
                if !fits {
                    debug!("Linha excedeu {} bytes, descartando", self.max_len);
                    self.discarding = true;
                    self.overlong += 1;
                    self.buf.clear();
                } else {
                    self.buf.push(byte);
                }
            }
        }
        lines
    }

    /// Descarta qualquer linha parcial pendente.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.discarding = false;
    }

    pub fn overlong(&self) -> u64 {
        self.overlong
    }

    fn take_line(&self) -> String {
        let bytes = match self.buf.last() {
            Some(b'\r') => &self.buf[..self.buf.len() - 1],
            _ => &self.buf[..],
        };
        String::from_utf8_lossy(bytes).into_owned()
    }
}

// ──────────────────────────────────────────────
// Decodificador
// ──────────────────────────────────────────────

/// Decodificador com estado: montagem de linhas + contadores.
#[derive(Debug)]
pub struct LineDecoder {
    splitter: LineSplitter,
    envelopes: bool,
    tag_tokens: bool,
    stats: DecodeStats,
}

impl LineDecoder {
    pub fn new(config: &DecoderConfig) -> Self {
        Self {
            splitter: LineSplitter::new(config.max_line_len),
            envelopes: config.envelopes,
            tag_tokens: config.tag_tokens,
            stats: DecodeStats::default(),
        }
    }

    /// Alimenta bytes brutos e devolve um registro por linha completa.
    /// Linhas vazias são ignoradas.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<TelemetryRecord> {
        let lines = self.splitter.push(chunk);
        self.stats.overlong_lines = self.splitter.overlong();
        lines
            .iter()
            .filter(|l| !l.trim().is_empty())
            .map(|l| self.decode(l))
            .collect()
    }

    /// Decodifica uma linha já separada.
    pub fn decode(&mut self, line: &str) -> TelemetryRecord {
        self.stats.lines += 1;
        let trimmed = line.trim();

        if self.envelopes {
            if let Some(record) = decode_envelope(trimmed) {
                self.stats.envelopes += 1;
                self.stats.records += 1;
                return record;
            }
        }

        if self.tag_tokens {
            let (readings, rejected) = scan_tags(trimmed);
            self.stats.rejected_tokens += rejected;
            if !readings.is_empty() {
                self.stats.records += 1;
                return TelemetryRecord::Readings(readings);
            }
        }

        trace!("Linha não reconhecida: {line:?}");
        self.stats.unrecognized += 1;
        TelemetryRecord::Unrecognized(line.to_string())
    }

    /// Descarta linha parcial (ex: ao reabrir o link).
    pub fn reset(&mut self) {
        self.splitter.reset();
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }
}

// ──────────────────────────────────────────────
// Envelope JSON
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Envelope {
    SystemStatus(SystemStatusPayload),
    PlantingEvent(PlantingPayload),
    Log(LogPayload),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SystemStatusPayload {
    battery: Option<f64>,
    temperature: Option<f64>,
    humidity: Option<f64>,
    soil: Option<f64>,
    voltage: Option<f64>,
    signal: Option<f64>,
    mcu_temp: Option<f64>,
    charging: Option<bool>,
    uptime: Option<String>,
    runtime: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlantingPayload {
    depth: f64,
    status: PlantingOutcome,
}

#[derive(Debug, Deserialize)]
struct LogPayload {
    message: String,
}

/// Converte um número JSON em percentual 0–100. Fora da faixa = ausente.
fn json_percent(value: Option<f64>) -> Option<u8> {
    value
        .filter(|v| v.is_finite() && (0.0..=100.0).contains(v))
        .map(|v| v.round() as u8)
}

/// Número JSON como `f32`; fora da faixa de `f32` = ausente.
fn json_f32(value: Option<f64>) -> Option<f32> {
    value.map(|v| v as f32).filter(|v| v.is_finite())
}

fn json_count(value: Option<f64>) -> Option<u32> {
    value
        .filter(|v| v.is_finite() && *v >= 0.0 && *v <= f64::from(u32::MAX))
        .map(|v| v.round() as u32)
}

fn decode_envelope(line: &str) -> Option<TelemetryRecord> {
    if !line.starts_with('{') {
        return None;
    }
    let envelope: Envelope = match serde_json::from_str(line) {
        Ok(e) => e,
        Err(e) => {
            trace!("Envelope inválido ({e}), tentando tags");
            return None;
        }
    };

    match envelope {
        Envelope::SystemStatus(p) => {
            let mut readings = Vec::new();
            if let Some(battery) = json_percent(p.battery) {
                readings.push(Reading::Battery(battery));
            }
            let env = EnvironmentReading {
                temperature: json_f32(p.temperature),
                humidity: json_count(p.humidity),
                soil_moisture: json_count(p.soil),
            };
            if !env.is_empty() {
                readings.push(Reading::Environment(env));
            }
            let power = PowerStatus {
                voltage: json_f32(p.voltage),
                signal: json_percent(p.signal),
                mcu_temperature: json_f32(p.mcu_temp),
                charging: p.charging,
                uptime: p.uptime,
                runtime: p.runtime,
            };
            if !power.is_empty() {
                readings.push(Reading::Power(power));
            }
            (!readings.is_empty()).then_some(TelemetryRecord::Readings(readings))
        }
        Envelope::PlantingEvent(p) => {
            let depth = json_f32(Some(p.depth))?;
            Some(TelemetryRecord::Readings(vec![Reading::Planting(PlantingEvent {
                depth,
                outcome: p.status,
            })]))
        }
        Envelope::Log(p) => Some(TelemetryRecord::Log(p.message)),
    }
}

// ──────────────────────────────────────────────
// Tags
// ──────────────────────────────────────────────

const KNOWN_TAGS: [&str; 6] = ["BAT", "TEMP", "HUM", "SOIL", "GPS", "PLANT"];

/// Localiza pares `(TAG, resto da linha)` para tags conhecidas.
///
/// A tag é a sequência de maiúsculas ASCII imediatamente antes de `:` e não
/// pode estar colada a outro caractere alfanumérico (`XBAT:` não é `BAT:`).
fn find_tokens(line: &str) -> Vec<(&str, &str)> {
    let mut tokens = Vec::new();
    for (colon, _) in line.match_indices(':') {
        let head = &line[..colon];
        let start = head
            .char_indices()
            .rev()
            .find(|(_, c)| !c.is_ascii_uppercase())
            .map_or(0, |(i, c)| {
                if c.is_alphanumeric() || c == '_' {
                    usize::MAX
                } else {
                    i + c.len_utf8()
                }
            });
        if start == usize::MAX || start == colon {
            continue;
        }
        let tag = &head[start..];
        if KNOWN_TAGS.contains(&tag) {
            tokens.push((tag, &line[colon + 1..]));
        }
    }
    tokens
}

/// Dígitos ASCII no início de `s`.
fn take_uint(s: &str) -> Option<(u64, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    let value = s[..end].parse().ok()?;
    Some((value, &s[end..]))
}

/// `-?\d+(\.\d*)?` no início de `s`; devolve o texto casado.
fn take_float(s: &str) -> Option<(&str, &str)> {
    let bytes = s.as_bytes();
    let mut end = usize::from(bytes.first() == Some(&b'-'));
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == digits_start {
        return None;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    Some((&s[..end], &s[end..]))
}

fn take_char(s: &str, expected: char) -> Option<&str> {
    s.strip_prefix(expected)
}

fn parse_battery(value: &str) -> Option<u8> {
    let (v, _) = take_uint(value)?;
    u8::try_from(v).ok().filter(|p| *p <= 100)
}

/// Número finito; dígitos demais para o tipo contam como valor inválido.
fn parse_finite<F: std::str::FromStr + Into<f64> + Copy>(text: &str) -> Option<F> {
    text.parse::<F>().ok().filter(|v| (*v).into().is_finite())
}

fn parse_f32(value: &str) -> Option<f32> {
    let (text, _) = take_float(value)?;
    parse_finite(text)
}

fn parse_u32(value: &str) -> Option<u32> {
    let (v, _) = take_uint(value)?;
    u32::try_from(v).ok()
}

fn parse_gps(value: &str) -> Option<PositionFix> {
    let (lat, rest) = take_float(value)?;
    let rest = take_char(rest, ',')?;
    let (lng, rest) = take_float(rest)?;
    let rest = take_char(rest, ',')?;
    let fixed = match rest.as_bytes().first()? {
        b'0' => false,
        b'1' => true,
        _ => return None,
    };
    let rest = take_char(&rest[1..], ',')?;
    let (satellites, _) = take_uint(rest)?;
    Some(PositionFix {
        lat: parse_finite(lat)?,
        lng: parse_finite(lng)?,
        fixed,
        satellites: u32::try_from(satellites).ok()?,
    })
}

fn parse_plant(value: &str) -> Option<PlantingEvent> {
    let (depth, rest) = take_float(value)?;
    let rest = take_char(rest, ',')?;
    let end = rest
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    Some(PlantingEvent {
        depth: parse_finite(depth)?,
        outcome: PlantingOutcome::from_token(&rest[..end])?,
    })
}

/// Varre as tags da linha. Devolve as leituras (ordem fixa: bateria,
/// ambiente, GPS, plantio) e o número de tokens rejeitados.
fn scan_tags(line: &str) -> (Vec<Reading>, u64) {
    let mut rejected = 0;
    let mut battery = None;
    let mut env = EnvironmentReading::default();
    let mut fix = None;
    let mut plant = None;

    for (tag, value) in find_tokens(line) {
        let accepted = match tag {
            "BAT" if battery.is_none() => parse_battery(value).map(|v| battery = Some(v)),
            "TEMP" if env.temperature.is_none() => {
                parse_f32(value).map(|v| env.temperature = Some(v))
            }
            "HUM" if env.humidity.is_none() => parse_u32(value).map(|v| env.humidity = Some(v)),
            "SOIL" if env.soil_moisture.is_none() => {
                parse_u32(value).map(|v| env.soil_moisture = Some(v))
            }
            "GPS" if fix.is_none() => parse_gps(value).map(|v| fix = Some(v)),
            "PLANT" if plant.is_none() => parse_plant(value).map(|v| plant = Some(v)),
            // Repetição de uma tag já aceita
            _ => Some(()),
        };
        if accepted.is_none() {
            debug!("Token {tag} com valor inválido: {value:?}");
            rejected += 1;
        }
    }

    let mut readings = Vec::new();
    if let Some(b) = battery {
        readings.push(Reading::Battery(b));
    }
    if !env.is_empty() {
        readings.push(Reading::Environment(env));
    }
    if let Some(f) = fix {
        readings.push(Reading::Position(f));
    }
    if let Some(p) = plant {
        readings.push(Reading::Planting(p));
    }
    (readings, rejected)
}

/// Reescreve leituras na gramática de tags.
///
/// `Reading::Power` não tem tag equivalente e é omitido.
pub fn encode_tags(readings: &[Reading]) -> String {
    let mut tokens = Vec::new();
    for reading in readings {
        match reading {
            Reading::Battery(p) => tokens.push(format!("BAT:{p}")),
            Reading::Environment(env) => {
                if let Some(t) = env.temperature {
                    tokens.push(format!("TEMP:{t}"));
                }
                if let Some(h) = env.humidity {
                    tokens.push(format!("HUM:{h}"));
                }
                if let Some(s) = env.soil_moisture {
                    tokens.push(format!("SOIL:{s}"));
                }
            }
            Reading::Position(f) => tokens.push(format!(
                "GPS:{},{},{},{}",
                f.lat,
                f.lng,
                u8::from(f.fixed),
                f.satellites
            )),
            Reading::Planting(p) => tokens.push(format!("PLANT:{},{}", p.depth, p.outcome)),
            Reading::Power(_) => {}
        }
    }
    tokens.join(" ")
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> LineDecoder {
        LineDecoder::new(&DecoderConfig::default())
    }

    fn readings(record: TelemetryRecord) -> Vec<Reading> {
        match record {
            TelemetryRecord::Readings(r) => r,
            other => panic!("esperava leituras, veio {other:?}"),
        }
    }

    #[test]
    fn multiple_tags_share_one_record() {
        let r = readings(decoder().decode("BAT:87 TEMP:24.5"));
        assert_eq!(
            r,
            vec![
                Reading::Battery(87),
                Reading::Environment(EnvironmentReading {
                    temperature: Some(24.5),
                    ..Default::default()
                }),
            ]
        );
    }

    #[test]
    fn gps_and_plant_subfields() {
        let r = readings(decoder().decode("GPS:14.6091,121.0223,1,7 PLANT:12.0,OK"));
        assert_eq!(
            r[0],
            Reading::Position(PositionFix {
                lat: 14.6091,
                lng: 121.0223,
                fixed: true,
                satellites: 7,
            })
        );
        assert_eq!(
            r[1],
            Reading::Planting(PlantingEvent {
                depth: 12.0,
                outcome: PlantingOutcome::Ok,
            })
        );
    }

    #[test]
    fn negative_temperature() {
        let r = readings(decoder().decode("TEMP:-4.75"));
        assert_eq!(
            r,
            vec![Reading::Environment(EnvironmentReading {
                temperature: Some(-4.75),
                ..Default::default()
            })]
        );
    }

    #[test]
    fn bad_subfield_drops_only_that_token() {
        let mut d = decoder();
        let r = readings(d.decode("GPS:abc,121.0,1,7 HUM:61"));
        assert_eq!(
            r,
            vec![Reading::Environment(EnvironmentReading {
                humidity: Some(61),
                ..Default::default()
            })]
        );
        assert_eq!(d.stats().rejected_tokens, 1);
    }

    #[test]
    fn first_valid_occurrence_wins() {
        let r = readings(decoder().decode("BAT:x BAT:55 BAT:60"));
        assert_eq!(r, vec![Reading::Battery(55)]);
    }

    #[test]
    fn battery_above_100_is_rejected() {
        let mut d = decoder();
        assert!(matches!(d.decode("BAT:140"), TelemetryRecord::Unrecognized(_)));
        assert_eq!(d.stats().rejected_tokens, 1);
    }

    #[test]
    fn tag_glued_to_word_is_ignored() {
        assert!(matches!(
            decoder().decode("XBAT:50 mcuTEMP:30"),
            TelemetryRecord::Unrecognized(_)
        ));
    }

    #[test]
    fn garbage_is_unrecognized() {
        let mut d = decoder();
        assert_eq!(
            d.decode("???"),
            TelemetryRecord::Unrecognized("???".into())
        );
        assert_eq!(d.stats().unrecognized, 1);
        assert_eq!(d.stats().records, 0);
    }

    #[test]
    fn plant_outcome_is_case_sensitive() {
        assert!(matches!(
            decoder().decode("PLANT:8.0,shallow"),
            TelemetryRecord::Unrecognized(_)
        ));
    }

    #[test]
    fn envelope_system_status() {
        let line = r#"{"type":"system_status","battery":87,"temperature":24.5,"humidity":61,"voltage":12.4,"charging":true}"#;
        let r = readings(decoder().decode(line));
        assert_eq!(r[0], Reading::Battery(87));
        assert_eq!(
            r[1],
            Reading::Environment(EnvironmentReading {
                temperature: Some(24.5),
                humidity: Some(61),
                soil_moisture: None,
            })
        );
        assert_eq!(
            r[2],
            Reading::Power(PowerStatus {
                voltage: Some(12.4),
                charging: Some(true),
                ..Default::default()
            })
        );
    }

    #[test]
    fn envelope_planting_and_log() {
        let mut d = decoder();
        let r = readings(d.decode(r#"{"type":"planting_event","depth":8.0,"status":"Shallow"}"#));
        assert_eq!(
            r,
            vec![Reading::Planting(PlantingEvent {
                depth: 8.0,
                outcome: PlantingOutcome::Shallow,
            })]
        );
        assert_eq!(
            d.decode(r#"{"type":"log","message":"motor ok"}"#),
            TelemetryRecord::Log("motor ok".into())
        );
        assert_eq!(d.stats().envelopes, 2);
    }

    #[test]
    fn malformed_envelope_falls_through_to_tags() {
        let mut d = decoder();
        let r = readings(d.decode(r#"{"type":"system_status" BAT:42"#));
        assert_eq!(r, vec![Reading::Battery(42)]);
        assert_eq!(d.stats().envelopes, 0);
    }

    #[test]
    fn disabled_grammars() {
        let mut d = LineDecoder::new(&DecoderConfig {
            envelopes: false,
            ..Default::default()
        });
        assert!(matches!(
            d.decode(r#"{"type":"log","message":"x"}"#),
            TelemetryRecord::Unrecognized(_)
        ));

        let mut d = LineDecoder::new(&DecoderConfig {
            tag_tokens: false,
            ..Default::default()
        });
        assert!(matches!(d.decode("BAT:50"), TelemetryRecord::Unrecognized(_)));
    }

    #[test]
    fn tag_lines_reencode_exactly() {
        let lines = [
            "BAT:87",
            "TEMP:24.5 HUM:61 SOIL:41",
            "TEMP:-0.125",
            "GPS:14.6091,121.0223,1,7",
            "GPS:-33.8688,151.2093,0,0",
            "PLANT:12.5,Deep",
            "BAT:3 TEMP:19.75 GPS:1.5,-2.25,1,12 PLANT:7.25,Failed",
        ];
        let mut d = decoder();
        for line in lines {
            let first = readings(d.decode(line));
            let again = readings(d.decode(&encode_tags(&first)));
            assert_eq!(first, again, "linha {line}");
        }
    }

    #[test]
    fn splitter_handles_chunks_and_crlf() {
        let mut s = LineSplitter::new(64);
        assert!(s.push(b"BAT:8").is_empty());
        assert_eq!(s.push(b"7\r\nHUM:6"), vec!["BAT:87".to_string()]);
        assert_eq!(s.push(b"1\n"), vec!["HUM:61".to_string()]);
    }

    #[test]
    fn splitter_drops_overlong_lines() {
        let mut s = LineSplitter::new(8);
        let lines = s.push(b"0123456789ABCDEF\nBAT:1\n");
        assert_eq!(lines, vec!["BAT:1".to_string()]);
        assert_eq!(s.overlong(), 1);
    }

    #[test]
    fn splitter_crlf_does_not_count_toward_limit() {
        let mut s = LineSplitter::new(6);
        assert_eq!(s.push(b"BAT:87\r\n"), vec!["BAT:87".to_string()]);
        assert_eq!(s.push(b"BAT:87\n"), vec!["BAT:87".to_string()]);
        assert!(s.push(b"BAT:87\rX\n").is_empty());
        assert_eq!(s.overlong(), 1);
    }

    #[test]
    fn float_too_large_for_its_type_is_rejected() {
        let mut d = decoder();
        let huge = format!("1{}", "0".repeat(40));
        let line = format!("TEMP:{huge} BAT:50");
        assert_eq!(readings(d.decode(&line)), vec![Reading::Battery(50)]);
        assert_eq!(d.stats().rejected_tokens, 1);

        let gps = format!("GPS:1{},121.0,1,7", "0".repeat(400));
        assert!(matches!(d.decode(&gps), TelemetryRecord::Unrecognized(_)));
        assert_eq!(d.stats().rejected_tokens, 2);

        let plant = format!("PLANT:{huge},OK");
        assert!(matches!(d.decode(&plant), TelemetryRecord::Unrecognized(_)));
    }

    #[test]
    fn largest_finite_temperature_reencodes() {
        let mut d = decoder();
        let line = format!("TEMP:3{}", "0".repeat(38));
        let first = readings(d.decode(&line));
        let again = readings(d.decode(&encode_tags(&first)));
        assert_eq!(first, again);
    }

    #[test]
    fn envelope_float_out_of_range_drops_only_that_field() {
        let line = format!(
            r#"{{"type":"system_status","battery":80,"temperature":1{},"voltage":12.5}}"#,
            "0".repeat(40)
        );
        let r = readings(decoder().decode(&line));
        assert_eq!(r[0], Reading::Battery(80));
        assert!(r.iter().all(|reading| !matches!(reading, Reading::Environment(_))));
        match &r[1] {
            Reading::Power(p) => assert_eq!(p.voltage, Some(12.5)),
            other => panic!("esperava energia, veio {other:?}"),
        }

        let plant = format!(
            r#"{{"type":"planting_event","depth":1{},"status":"OK"}}"#,
            "0".repeat(40)
        );
        assert!(matches!(decoder().decode(&plant), TelemetryRecord::Unrecognized(_)));
    }

    #[test]
    fn feed_skips_blank_lines() {
        let mut d = decoder();
        let records = d.feed(b"\n\r\nTEMP:24.5\n???\n");
        assert_eq!(records.len(), 2);
        assert!(matches!(records[1], TelemetryRecord::Unrecognized(_)));
        assert_eq!(d.stats().lines, 2);
    }
}
