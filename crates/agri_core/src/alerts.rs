//! Sistema de alertas – níveis e avaliação de thresholds.

use crate::config::AlertThresholds;
use crate::types::DeviceState;
use serde::{Deserialize, Serialize};

/// Nível de alerta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertLevel {
    Normal,
    Warning,
    Critical,
}

/// Um alerta disparado.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub metric: String,
    pub label: String,
    pub value: f32,
    pub unit: String,
    pub level: AlertLevel,
}

/// Sentido do threshold.
#[derive(Debug, Clone, Copy)]
enum Direction {
    /// Alerta quando o valor sobe (temperaturas)
    Above,
    /// Alerta quando o valor desce (bateria, umidade do solo)
    Below,
}

/// Avalia o snapshot contra os thresholds. Campos desconhecidos são ignorados.
pub fn evaluate_alerts(state: &DeviceState, thresholds: &AlertThresholds) -> Vec<Alert> {
    let mut alerts = Vec::new();

    check(
        &mut alerts,
        "battery",
        "Bateria",
        state.battery_percent.map(f32::from),
        "%",
        Direction::Below,
        thresholds.battery_warning,
        thresholds.battery_critical,
    );

    check(
        &mut alerts,
        "soil",
        "Umidade do solo",
        state.soil_moisture.map(|v| v as f32),
        "%",
        Direction::Below,
        thresholds.soil_dry_warning,
        thresholds.soil_dry_critical,
    );

    check(
        &mut alerts,
        "temperature",
        "Temperatura",
        state.temperature,
        "°C",
        Direction::Above,
        thresholds.temp_warning,
        thresholds.temp_critical,
    );

    check(
        &mut alerts,
        "mcu_temp",
        "MCU Temp",
        state.mcu_temperature,
        "°C",
        Direction::Above,
        thresholds.mcu_temp_warning,
        thresholds.mcu_temp_critical,
    );

    alerts
}

#[allow(clippy::too_many_arguments)]
fn check(
    alerts: &mut Vec<Alert>,
    metric: &str,
    label: &str,
    value: Option<f32>,
    unit: &str,
    direction: Direction,
    warn: f32,
    crit: f32,
) {
    let Some(value) = value else {
        return; // Nunca lido
    };
    let level = match direction {
        Direction::Above => level_for_value(value, warn, crit),
        Direction::Below => level_for_low_value(value, warn, crit),
    };
    if level == AlertLevel::Normal {
        return;
    }

    alerts.push(Alert {
        metric: metric.into(),
        label: label.into(),
        value,
        unit: unit.into(),
        level,
    });
}

/// Retorna o [`AlertLevel`] para um valor dado thresholds.
pub fn level_for_value(value: f32, warn: f32, crit: f32) -> AlertLevel {
    if value >= crit {
        AlertLevel::Critical
    } else if value >= warn {
        AlertLevel::Warning
    } else {
        AlertLevel::Normal
    }
}

/// Como [`level_for_value`], mas para métricas em que pouco é ruim.
pub fn level_for_low_value(value: f32, warn: f32, crit: f32) -> AlertLevel {
    if value <= crit {
        AlertLevel::Critical
    } else if value <= warn {
        AlertLevel::Warning
    } else {
        AlertLevel::Normal
    }
}
