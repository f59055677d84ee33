//! Metric lines of the shape `name{label="value",...} value`, as read by the
//! node-exporter textfile collector.
//!
//! The label names (`mode`, `myStr`) and values (`CellNum1`, `aggVolts`, ...)
//! are the ones existing dashboards query, so they must stay stable.

use crate::protocol::{CellExtension, CellImpedance, CellVoltages, SystemStatus};
use std::fmt;

/// Sample value of a line. Capacity counters need double precision, the
/// rest render from single precision so `3.3` stays `3.3`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Single(f32),
    Double(f64),
}

impl From<f32> for MetricValue {
    fn from(value: f32) -> Self {
        Self::Single(value)
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<MetricValue> for f64 {
    fn from(value: MetricValue) -> Self {
        match value {
            MetricValue::Single(value) => f64::from(value),
            MetricValue::Double(value) => value,
        }
    }
}

impl fmt::Display for MetricValue {
    // Forwards the formatter so a requested precision applies.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Single(value) => fmt::Display::fmt(value, f),
            Self::Double(value) => fmt::Display::fmt(value, f),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricLine {
    name: String,
    labels: Vec<(String, String)>,
    value: MetricValue,
    precision: Option<usize>,
}

impl MetricLine {
    pub fn new(name: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        Self {
            name: name.into(),
            labels: Vec::new(),
            value: value.into(),
            precision: None,
        }
    }

    /// Appends a label; labels are rendered in insertion order.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    /// Renders the value with a fixed number of decimal places.
    pub fn precision(mut self, digits: usize) -> Self {
        self.precision = Some(digits);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> &[(String, String)] {
        &self.labels
    }

    pub fn value(&self) -> MetricValue {
        self.value
    }
}

impl fmt::Display for MetricLine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.labels.is_empty() {
            write!(f, "{{")?;
            for (i, (key, value)) in self.labels.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}=\"{value}\"")?;
            }
            write!(f, "}}")?;
        }
        match self.precision {
            Some(digits) => write!(f, " {:.*}", digits, self.value),
            None => write!(f, " {}", self.value),
        }
    }
}

fn mode_line(name: &str, mode: &str, value: impl Into<MetricValue>) -> MetricLine {
    MetricLine::new(name, value).label("mode", mode)
}

/// Converts a decoded measurement into the metric lines published for it.
pub trait ToMetrics {
    fn to_metrics(&self, name: &str) -> Vec<MetricLine>;
}

impl ToMetrics for CellVoltages {
    fn to_metrics(&self, name: &str) -> Vec<MetricLine> {
        let mut lines: Vec<MetricLine> = self
            .voltages
            .iter()
            .enumerate()
            .map(|(i, volt)| mode_line(name, &format!("CellNum{}", i + 1), *volt))
            .collect();
        match &self.extension {
            Some(CellExtension::Capacity { wh, ah }) => {
                lines.push(mode_line(name, "capacity_wh", *wh));
                lines.push(mode_line(name, "capacity_ah", *ah));
            }
            Some(CellExtension::StateOfCharge(soc)) => {
                lines.push(mode_line(name, "SOC2", f32::from(*soc)));
            }
            None => {}
        }
        lines.push(mode_line(name, "aggVolts", self.total_voltage).precision(2));
        lines
    }
}

impl ToMetrics for SystemStatus {
    fn to_metrics(&self, name: &str) -> Vec<MetricLine> {
        let mut lines = vec![
            mode_line(name, "current", self.current),
            mode_line(name, "maxEndVolts", self.charge_end_voltage),
            mode_line(name, "modeInt", f32::from(u8::from(self.mode)))
                .label("myStr", self.mode.to_string()),
            mode_line(name, "temp1", self.temperature_1),
            mode_line(name, "temp2", self.temperature_2),
            mode_line(name, "SOC", f32::from(self.soc_percent)),
        ];
        if let Some(extension) = &self.extension {
            lines.push(mode_line(
                name,
                "minEndVolts",
                extension.discharge_end_voltage,
            ));
            lines.push(
                mode_line(
                    name,
                    "chgProtectionInt",
                    f32::from(u8::from(extension.charge_protection)),
                )
                .label("myStr", extension.charge_protection.to_string()),
            );
            lines.push(
                mode_line(
                    name,
                    "dsgProtectionInt",
                    f32::from(u8::from(extension.discharge_protection)),
                )
                .label("myStr", extension.discharge_protection.to_string()),
            );
        }
        lines
    }
}

impl ToMetrics for CellImpedance {
    fn to_metrics(&self, name: &str) -> Vec<MetricLine> {
        let mut lines = vec![
            mode_line(name, "currentMode1", f32::from(u8::from(self.mode)))
                .label("myStr", self.mode.to_string()),
            mode_line(name, "current1", self.current),
        ];
        lines.extend(
            self.impedances
                .iter()
                .enumerate()
                .map(|(i, impedance)| mode_line(name, &format!("CellNumImp{}", i + 1), *impedance)),
        );
        lines.push(mode_line(name, "aggImpedance", self.total_impedance).precision(2));
        lines
    }
}
