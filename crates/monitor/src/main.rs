//! # AgriGuard Monitor
//!
//! Visão em console do robô agrícola.
//!
//! ## Uso
//! ```bash
//! agri_monitor                      # sessão local: link serial + linha de comando
//! agri_monitor --port /dev/ttyACM0  # porta explícita
//! agri_monitor --listen             # recebe snapshots do agri_relay via UDP
//! ```

mod console;
mod net_thread;

use agri_core::alerts::evaluate_alerts;
use agri_core::serial::SerialPortProvider;
use agri_core::{AppConfig, CommandError, ConnectionStatus, DeviceState, HistoryKind, Notification, Session};
use console::ConsoleCommand;
use std::io::BufRead;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Config ──
    let config_path = AppConfig::default_path();
    let mut config = AppConfig::load(&config_path);

    if !config_path.exists() {
        let _ = config.save(&config_path);
    }
    for problem in config.validate() {
        warn!("Config: {problem}");
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Some(i) = args.iter().position(|a| a == "--port") {
        match args.get(i + 1) {
            Some(port) => config.link.port_name = port.clone(),
            None => {
                error!("--port requer o nome da porta");
                return ExitCode::FAILURE;
            }
        }
    }

    if args.iter().any(|a| a == "--listen") {
        run_remote(&config)
    } else {
        run_local(&config)
    }
}

/// Mostra os snapshots republicados pelo relay.
fn run_remote(config: &AppConfig) -> ExitCode {
    let rx = match net_thread::spawn_receiver_thread(
        config.monitor.listen_port,
        config.monitor.relay_ip.clone(),
    ) {
        Ok(rx) => rx,
        Err(e) => {
            error!("Falha ao criar thread de rede: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut last: Option<DeviceState> = None;
    for msg in rx.iter() {
        if last.as_ref() == Some(&msg.state) {
            continue;
        }
        println!("── {} ({} bytes) ──", msg.source_addr, msg.raw_size);
        println!("{}", console::format_state(&msg.state));
        for line in console::format_alerts(&evaluate_alerts(&msg.state, &config.alerts)) {
            println!("{line}");
        }
        last = Some(msg.state);
    }
    ExitCode::SUCCESS
}

/// Sessão local: link serial + comandos pelo stdin.
fn run_local(config: &AppConfig) -> ExitCode {
    let provider = SerialPortProvider::new(Duration::from_millis(config.link.read_poll_ms));
    let session = Session::new(config, Box::new(provider));

    let mut last_status: Option<ConnectionStatus> = None;
    session.subscribe_with(move |n| {
        if let Notification::State(state) = &n {
            if last_status != Some(state.connection) {
                last_status = Some(state.connection);
                println!("Link: {}", console::connection_label(state.connection));
            }
        }
        if let Some(line) = console::format_notification(&n) {
            println!("{line}");
        }
    });

    connect(&session);
    println!("{}", console::HELP);

    for line in std::io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("Erro ao ler stdin: {e}");
                break;
            }
        };
        match ConsoleCommand::parse(&line) {
            Ok(ConsoleCommand::Quit) => break,
            Ok(command) => dispatch(&session, config, command),
            Err(msg) => println!("{msg}"),
        }
    }

    session.disconnect();
    info!("Monitor encerrado");
    ExitCode::SUCCESS
}

fn connect(session: &Session) {
    match session.connect() {
        Ok(board) => info!("Conectado – placa: {board}"),
        Err(e) => warn!("Conexão falhou: {e}"),
    }
}

fn dispatch(session: &Session, config: &AppConfig, command: ConsoleCommand) {
    match command {
        ConsoleCommand::Connect => connect(session),
        ConsoleCommand::Disconnect => session.disconnect(),
        ConsoleCommand::Status => {
            let state = session.snapshot();
            println!("{}", console::format_state(&state));
            for line in console::format_alerts(&evaluate_alerts(&state, &config.alerts)) {
                println!("{line}");
            }
        }
        ConsoleCommand::Path => print_history(session, HistoryKind::Path),
        ConsoleCommand::Log => print_history(session, HistoryKind::Planting),
        ConsoleCommand::Markers => print_history(session, HistoryKind::Markers),
        ConsoleCommand::Stats => {
            let stats = session.stats();
            println!(
                "  Linhas: {} | Registros: {} | Envelopes: {} | Não reconhecidas: {} | Tokens rejeitados: {} | Longas demais: {}",
                stats.decode.lines,
                stats.decode.records,
                stats.decode.envelopes,
                stats.decode.unrecognized,
                stats.decode.rejected_tokens,
                stats.decode.overlong_lines
            );
            println!(
                "  Link: {:?} | Assinantes: {} | Notificações pendentes: {}",
                session.link_state(),
                stats.subscribers,
                stats.pending_notifications
            );
        }
        ConsoleCommand::Help => println!("{}", console::HELP),
        ConsoleCommand::Send(text) => match session.send_command(&text) {
            Ok(()) => println!("→ {text}"),
            Err(CommandError::NotConnected) => println!("Não conectado – use :connect"),
            Err(e) => println!("Falha ao enviar: {e}"),
        },
        ConsoleCommand::Empty | ConsoleCommand::Quit => {}
    }
}

fn print_history(session: &Session, kind: HistoryKind) {
    let history = session.history(kind);
    if history.is_empty() {
        println!("  (vazio)");
        return;
    }
    for line in console::format_history(&history) {
        println!("{line}");
    }
}
