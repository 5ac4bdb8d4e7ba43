//! # AgriGuard Relay
//!
//! Mantém o link serial com o robô (reconexão automática com espera fixa)
//! e republica cada snapshot do estado via UDP para os monitores da rede.
//!
//! ## Uso
//! ```bash
//! agri_relay                 # porta e destino do config.toml
//! RUST_LOG=debug agri_relay  # log detalhado do link e do decodificador
//! ```

mod uplink;
mod watch;

use agri_core::alerts::{AlertLevel, evaluate_alerts};
use agri_core::serial::SerialPortProvider;
use agri_core::{AppConfig, LinkError, LinkState, Notification, Session, WIRE_VERSION};
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uplink::Uplink;
use watch::{AlertChange, AlertWatch};

fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Carregar config ──
    let config_path = AppConfig::default_path();
    let config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }
    for problem in config.validate() {
        warn!("Config: {problem}");
    }

    // ── Socket UDP ──
    let uplink = match Uplink::open(&config.relay) {
        Ok(uplink) => uplink,
        Err(e) => {
            error!("Falha ao criar socket UDP: {e}");
            return ExitCode::FAILURE;
        }
    };

    // ── Sessão ──
    let provider = SerialPortProvider::new(Duration::from_millis(config.link.read_poll_ms));
    let session = Session::new(&config, Box::new(provider));
    let notifications = session.subscribe();
    let retry = Duration::from_secs_f64(config.relay.retry_delay_secs.max(0.1));

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   🌱 AGRIGUARD RELAY – ATIVO");
    println!("══════════════════════════════════════════════");
    println!(
        "  Porta:     {}",
        if config.link.port_name.is_empty() { "auto (USB)" } else { config.link.port_name.as_str() }
    );
    println!("  Destino:   {}", uplink.dest());
    println!("  Reconexão: {:.1}s", retry.as_secs_f64());
    println!("  Protocolo: bincode v{WIRE_VERSION}");
    println!("══════════════════════════════════════════════");
    println!();

    let mut alerts = AlertWatch::default();

    // ── Loop principal ──
    loop {
        if session.link_state() == LinkState::Disconnected {
            match session.connect() {
                Ok(board) => info!("Robô conectado – placa: {board}"),
                Err(LinkError::Unsupported(reason)) => {
                    error!("Sem transporte serial neste ambiente ({reason}). Encerrando.");
                    return ExitCode::FAILURE;
                }
                Err(e) => warn!("Conexão falhou: {e}. Nova tentativa em {:.1}s", retry.as_secs_f64()),
            }
        }

        // Drena notificações até a próxima checagem do link
        let deadline = Instant::now() + retry;
        let mut forwarded = false;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match notifications.recv_timeout(remaining) {
                Ok(Notification::State(state)) => {
                    forward(&uplink, &state);
                    forwarded = true;
                    for change in alerts.update(&evaluate_alerts(&state, &config.alerts)) {
                        report(change);
                    }
                }
                Ok(Notification::Planting(entry)) => {
                    info!("Plantio: {} a {}", entry.outcome, entry.depth_display);
                }
                Ok(other) => debug!("Notificação: {other:?}"),
                Err(e) if e.is_timeout() => break,
                Err(e) => {
                    error!("Hub encerrado: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }

        // Heartbeat: monitores que entraram depois recebem o estado atual
        if !forwarded && session.link_state().is_connected() {
            forward(&uplink, &session.snapshot());
        }
    }
}

fn forward(uplink: &Uplink, state: &agri_core::DeviceState) {
    match uplink.send_state(state) {
        Ok(sent) => debug!(
            "→ {sent} bytes para {} | BAT {:?}% | {:?}",
            uplink.dest(),
            state.battery_percent,
            state.connection
        ),
        Err(e) => error!("Erro ao enviar snapshot: {e}"),
    }
}

fn report(change: AlertChange) {
    match change {
        AlertChange::Raised(alert) => {
            let msg = format!("{}: {:.1}{}", alert.label, alert.value, alert.unit);
            match alert.level {
                AlertLevel::Critical => error!("Alerta CRÍTICO – {msg}"),
                AlertLevel::Warning => warn!("Alerta – {msg}"),
                AlertLevel::Normal => info!("{msg}"),
            }
        }
        AlertChange::Cleared(metric) => info!("Alerta normalizado: {metric}"),
    }
}
