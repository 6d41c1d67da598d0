use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Heating demand threshold, in tenths of a degree.
pub const HEATING_DELTA: i64 = 10;

/// Temperature stored as Celsius internally.
/// The boiler reports tenths of a degree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Temperature(f64);

impl Temperature {
    pub fn from_celsius(c: f64) -> Self {
        Self(c)
    }

    pub fn from_tenths(tenths: f64) -> Self {
        Self(tenths / 10.0)
    }

    pub fn celsius(&self) -> f64 {
        self.0
    }

    pub fn tenths(&self) -> i64 {
        (self.0 * 10.0).round() as i64
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}\u{00b0}C", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneMode {
    Comfort,
    Reduced,
    Other(i64),
}

impl ZoneMode {
    pub fn from_code(code: i64) -> Self {
        match code {
            6 => ZoneMode::Comfort,
            7 => ZoneMode::Reduced,
            other => ZoneMode::Other(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            ZoneMode::Comfort => 6,
            ZoneMode::Reduced => 7,
            ZoneMode::Other(code) => *code,
        }
    }

    pub fn is_heating(&self) -> bool {
        matches!(self, ZoneMode::Comfort | ZoneMode::Reduced)
    }
}

/// Raw `carac_zone` block. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneSettings {
    #[serde(rename = "MODE", default)]
    pub mode: Option<i64>,
    #[serde(rename = "SELECTEUR", default)]
    pub selector: Option<i64>,
    #[serde(rename = "TAMB", default)]
    pub ambient: Option<f64>,
    #[serde(rename = "CAMB", default)]
    pub setpoint: Option<f64>,
    #[serde(rename = "DERO", default)]
    pub derogation: Option<bool>,
    #[serde(rename = "CONS_RED", default)]
    pub reduced_setpoint: Option<f64>,
    #[serde(rename = "CONS_CONF", default)]
    pub comfort_setpoint: Option<f64>,
    #[serde(rename = "CONS_HG", default)]
    pub frost_setpoint: Option<f64>,
    #[serde(rename = "ACTIVITE_BOOST", default)]
    pub boost_active: Option<bool>,
}

impl ZoneSettings {
    pub fn zone_mode(&self) -> Option<ZoneMode> {
        self.mode.map(ZoneMode::from_code)
    }

    pub fn ambient_temperature(&self) -> Option<Temperature> {
        self.ambient.map(Temperature::from_tenths)
    }

    pub fn target_temperature(&self) -> Option<Temperature> {
        self.setpoint.map(Temperature::from_tenths)
    }

    /// True when the setpoint sits more than [`HEATING_DELTA`] above ambient.
    pub fn is_heating(&self) -> Option<bool> {
        match (self.setpoint, self.ambient) {
            (Some(setpoint), Some(ambient)) => Some(setpoint > ambient + HEATING_DELTA as f64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: i64,
    pub identifiant: String,
    #[serde(default)]
    pub nom: String,
    #[serde(default)]
    pub numero: Option<i64>,
    #[serde(default)]
    pub boost_disponible: Option<bool>,
    #[serde(default)]
    pub carac_zone: ZoneSettings,
}

/// Payload of `GET sites/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Site {
    #[serde(default)]
    pub environnement: HashMap<String, Option<f64>>,
    #[serde(default)]
    pub zones: Vec<Zone>,
}

impl Site {
    pub fn environment(&self, device_id: &str) -> f64 {
        self.environnement
            .get(device_id)
            .copied()
            .flatten()
            .unwrap_or(0.0)
    }

    pub fn zone(&self, device_id: &str) -> Option<&Zone> {
        self.zones.iter().find(|z| z.identifiant == device_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCategory {
    Sensor,
    Thermostat,
}

/// One device found by [`crate::Controller::scan`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    pub name: String,
    pub category: DeviceCategory,
    pub device_id: String,
    pub accessory_id: String,
    pub manufacturer: String,
    pub serial_number: String,
    pub model: String,
}
