//! Acompanha mudanças de nível de alerta entre snapshots.

use agri_core::alerts::{Alert, AlertLevel};
use std::collections::HashMap;

/// Guarda o último nível de cada métrica para só reportar transições.
#[derive(Debug, Default)]
pub struct AlertWatch {
    levels: HashMap<String, AlertLevel>,
}

/// Transição de uma métrica.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertChange {
    Raised(Alert),
    Cleared(String),
}

impl AlertWatch {
    pub fn update(&mut self, alerts: &[Alert]) -> Vec<AlertChange> {
        let mut changes = Vec::new();

        for alert in alerts {
            let previous = self.levels.insert(alert.metric.clone(), alert.level);
            if previous != Some(alert.level) {
                changes.push(AlertChange::Raised(alert.clone()));
            }
        }

        let mut cleared: Vec<String> = self
            .levels
            .keys()
            .filter(|metric| !alerts.iter().any(|a| &a.metric == *metric))
            .cloned()
            .collect();
        cleared.sort();
        for metric in cleared {
            self.levels.remove(&metric);
            changes.push(AlertChange::Cleared(metric));
        }

        changes
    }
}
