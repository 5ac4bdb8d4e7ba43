//! Canal de comandos: caminho de volta assinante → robô.
//!
//! Cada comando é uma linha de texto terminada em `\n`. Nada é enfileirado:
//! sem link conectado o envio falha na hora.

use crate::link::{LinkManager, LinkShared};
use std::io;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Link não conectado")]
    NotConnected,

    #[error("Comando contém terminador de linha: {0:?}")]
    InvalidCommand(String),

    #[error("Falha ao escrever no transporte: {0}")]
    Io(#[from] io::Error),
}

/// Clonável; pode ser usado de qualquer thread.
#[derive(Clone)]
pub struct CommandChannel {
    link: Arc<LinkShared>,
}

impl CommandChannel {
    pub fn new(link: &LinkManager) -> Self {
        Self {
            link: link.shared(),
        }
    }

    /// Escreve `text` + `\n` se o link estiver conectado.
    pub fn send(&self, text: &str) -> Result<(), CommandError> {
        if text.contains(['\n', '\r']) {
            return Err(CommandError::InvalidCommand(text.to_string()));
        }

        let mut line = Vec::with_capacity(text.len() + 1);
        line.extend_from_slice(text.as_bytes());
        line.push(b'\n');

        match self.link.write(&line) {
            None => Err(CommandError::NotConnected),
            Some(Ok(())) => {
                debug!("→ comando {text:?}");
                Ok(())
            }
            Some(Err(e)) => {
                warn!("Erro ao enviar comando {text:?}: {e}");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::link::ConnectOptions;
    use crate::mock::{MockDevice, MockProvider, RecordingObserver};

    fn link_with_device() -> (LinkManager, crate::mock::MockWire) {
        let provider = MockProvider::default();
        let (device, wire) = MockDevice::new("a", &[115_200]);
        provider.push_device(device);
        let link = LinkManager::new(
            Box::new(provider),
            &LinkConfig::default(),
            Arc::new(RecordingObserver::default()),
        );
        (link, wire)
    }

    #[test]
    fn not_connected_is_rejected_without_queueing() {
        let (mut link, wire) = link_with_device();
        let commands = CommandChannel::new(&link);
        assert!(matches!(commands.send("START"), Err(CommandError::NotConnected)));

        link.connect(&ConnectOptions::default()).unwrap();
        commands.send("STOP").unwrap();
        // O START anterior não foi guardado
        assert_eq!(wire.written(), "STOP\n");
    }

    #[test]
    fn writes_after_disconnect_fail() {
        let (mut link, wire) = link_with_device();
        let commands = CommandChannel::new(&link);
        link.connect(&ConnectOptions::default()).unwrap();
        commands.send("PLANT").unwrap();
        link.disconnect();
        assert!(matches!(commands.send("PLANT"), Err(CommandError::NotConnected)));
        assert_eq!(wire.written(), "PLANT\n");
    }

    #[test]
    fn embedded_newline_is_invalid() {
        let (link, _wire) = link_with_device();
        let commands = CommandChannel::new(&link);
        assert!(matches!(
            commands.send("A\nB"),
            Err(CommandError::InvalidCommand(_))
        ));
    }
}
