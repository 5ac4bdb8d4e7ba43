//! Classificação da placa a partir dos metadados USB.
//!
//! Informativo apenas: nunca altera o comportamento do link.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Metadados da porta disponíveis no momento da abertura.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub name: String,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

/// Placas conhecidas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoardKind {
    ArduinoUno,
    ArduinoMega,
    ArduinoNano,
    ArduinoLeonardo,
    Esp32,
    Esp8266,
    RaspberryPiPico,
    Unknown,
}

impl BoardKind {
    pub fn display_name(self) -> &'static str {
        match self {
            BoardKind::ArduinoUno => "Arduino Uno",
            BoardKind::ArduinoMega => "Arduino Mega 2560",
            BoardKind::ArduinoNano => "Arduino Nano",
            BoardKind::ArduinoLeonardo => "Arduino Leonardo",
            BoardKind::Esp32 => "ESP32",
            BoardKind::Esp8266 => "ESP8266",
            BoardKind::RaspberryPiPico => "Raspberry Pi Pico",
            BoardKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for BoardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Substrings (minúsculas) procuradas no nome do produto, em ordem.
const NAME_TABLE: &[(&str, BoardKind)] = &[
    ("mega", BoardKind::ArduinoMega),
    ("uno", BoardKind::ArduinoUno),
    ("nano", BoardKind::ArduinoNano),
    ("leonardo", BoardKind::ArduinoLeonardo),
    ("esp32", BoardKind::Esp32),
    ("esp8266", BoardKind::Esp8266),
    ("nodemcu", BoardKind::Esp8266),
    ("pico", BoardKind::RaspberryPiPico),
];

/// Product IDs USB conhecidos.
const PRODUCT_ID_TABLE: &[(u16, BoardKind)] = &[
    (0x0043, BoardKind::ArduinoUno),      // Uno R3 (ATmega16U2)
    (0x0001, BoardKind::ArduinoUno),      // Uno (8U2)
    (0x0042, BoardKind::ArduinoMega),     // Mega 2560 R3
    (0x0010, BoardKind::ArduinoMega),     // Mega 2560
    (0x8036, BoardKind::ArduinoLeonardo), // Leonardo
    (0x7523, BoardKind::ArduinoNano),     // CH340 (clones Nano)
    (0x6001, BoardKind::ArduinoNano),     // FTDI FT232R
    (0xEA60, BoardKind::Esp32),           // CP210x
    (0x1001, BoardKind::Esp32),           // ESP32-S3 USB nativo
    (0x000A, BoardKind::RaspberryPiPico), // Pico (SDK CDC)
];

/// Nome do produto (substring, sem caixa) → product ID exato → `Unknown`.
pub fn classify(info: &PortInfo) -> BoardKind {
    if let Some(product) = info.product.as_deref() {
        let product = product.to_lowercase();
        if let Some((_, kind)) = NAME_TABLE.iter().find(|(needle, _)| product.contains(needle)) {
            return *kind;
        }
    }

    info.product_id
        .and_then(|pid| {
            PRODUCT_ID_TABLE
                .iter()
                .find(|(id, _)| *id == pid)
                .map(|(_, kind)| *kind)
        })
        .unwrap_or(BoardKind::Unknown)
}
