//! Configuração unificada via TOML.
//!
//! Um único `config.toml` ao lado do executável cobre o link serial, o
//! decodificador, as capacidades do histórico, o relay e o monitor.

use crate::protocol::DEFAULT_MAX_LINE_LEN;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Configuração do link serial com o robô.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Porta explícita (vazio = primeira porta USB compatível)
    pub port_name: String,
    /// Baud rates tentados em ordem durante a negociação
    pub baud_candidates: Vec<u32>,
    /// Vendor IDs USB aceitos (vazio = qualquer)
    pub vendor_ids: Vec<u16>,
    /// Intervalo de poll da leitura (ms). Limita só a latência do cancelamento.
    pub read_poll_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_candidates: vec![115_200, 57_600, 38_400, 9_600],
            vendor_ids: Vec::new(),
            read_poll_ms: 100,
        }
    }
}

/// Gramáticas aceitas pelo decodificador.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Envelopes JSON (`{"type": ...}`)
    pub envelopes: bool,
    /// Tags `BAT:`, `TEMP:`, `GPS:`...
    pub tag_tokens: bool,
    /// Tamanho máximo de linha (bytes)
    pub max_line_len: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            envelopes: true,
            tag_tokens: true,
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }
}

/// Capacidades dos históricos.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub path_capacity: usize,
    pub planting_capacity: usize,
    pub marker_capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path_capacity: 100,
            planting_capacity: 50,
            marker_capacity: 100,
        }
    }
}

/// Hub de notificações.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Fila de um assinante a partir da qual ele é reportado como atrasado
    pub backlog_warn: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            backlog_warn: 1024,
        }
    }
}

/// Thresholds de alerta.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Bateria abaixo disso = warning (%)
    pub battery_warning: f32,
    pub battery_critical: f32,
    /// Solo abaixo disso = seco (%)
    pub soil_dry_warning: f32,
    pub soil_dry_critical: f32,
    pub temp_warning: f32,
    pub temp_critical: f32,
    pub mcu_temp_warning: f32,
    pub mcu_temp_critical: f32,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            battery_warning: 30.0,
            battery_critical: 15.0,
            soil_dry_warning: 30.0,
            soil_dry_critical: 15.0,
            temp_warning: 35.0,
            temp_critical: 40.0,
            mcu_temp_warning: 70.0,
            mcu_temp_critical: 85.0,
        }
    }
}

/// Configuração do relay (processo separado que republica via UDP).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Modo de envio: "broadcast" ou "unicast"
    pub mode: String,
    /// IP de destino (255.255.255.255 para broadcast)
    pub dest_ip: String,
    /// Porta UDP
    pub port: u16,
    /// IP local para bind (vazio = auto)
    pub bind_ip: String,
    /// Espera fixa entre tentativas de reconexão (segundos)
    pub retry_delay_secs: f64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            mode: "broadcast".into(),
            dest_ip: "255.255.255.255".into(),
            port: 5005,
            bind_ip: String::new(),
            retry_delay_secs: 3.0,
        }
    }
}

/// Configuração do monitor de console.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Porta UDP para escutar frames do relay
    pub listen_port: u16,
    /// IP do relay (vazio = aceita qualquer origem)
    pub relay_ip: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            listen_port: 5005,
            relay_ip: String::new(),
        }
    }
}

/// Configuração raiz do aplicativo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub link: LinkConfig,
    pub decoder: DecoderConfig,
    pub history: HistoryConfig,
    pub hub: HubConfig,
    pub alerts: AlertThresholds,
    pub relay: RelayConfig,
    pub monitor: MonitorConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(path, content).map_err(|e| e.to_string())?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.link.baud_candidates.is_empty() {
            errors.push("Lista de baud rates vazia".into());
        }
        if self.link.baud_candidates.contains(&0) {
            errors.push("Baud rate 0 é inválido".into());
        }
        if self.link.read_poll_ms == 0 || self.link.read_poll_ms > 5_000 {
            errors.push(format!(
                "Intervalo de poll inválido: {} ms (1–5000)",
                self.link.read_poll_ms
            ));
        }
        if !self.decoder.envelopes && !self.decoder.tag_tokens {
            errors.push("Nenhuma gramática habilitada no decodificador".into());
        }
        if self.decoder.max_line_len < 16 {
            errors.push(format!(
                "Tamanho máximo de linha muito pequeno: {}",
                self.decoder.max_line_len
            ));
        }
        for (name, cap) in [
            ("path_capacity", self.history.path_capacity),
            ("planting_capacity", self.history.planting_capacity),
            ("marker_capacity", self.history.marker_capacity),
        ] {
            if cap == 0 {
                errors.push(format!("Capacidade {name} não pode ser 0"));
            }
        }
        if self.hub.backlog_warn == 0 {
            errors.push("Limite de fila do assinante não pode ser 0".into());
        }
        if self.relay.port == 0 {
            errors.push("Porta do relay não pode ser 0".into());
        }
        if self.relay.retry_delay_secs < 0.1 || self.relay.retry_delay_secs > 300.0 {
            errors.push(format!(
                "Espera de reconexão inválida: {} (0.1–300.0)",
                self.relay.retry_delay_secs
            ));
        }
        if self.monitor.listen_port == 0 {
            errors.push("Porta do monitor não pode ser 0".into());
        }

        errors
    }
}
