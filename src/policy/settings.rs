//! Typed user settings stored alongside the policy lists.
//!
//! Each setting is an explicit optional override on top of a built-in default.
//! Values are validated against declared ranges both when the user changes them
//! and when the policy store is loaded; invalid stored values are dropped (with
//! a warning) so the default applies instead.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// Names of the supported settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingKey {
    /// Base font size for UI elements.
    UiFontSize,
    /// Font size for process names in the connection list.
    ProcessFontSize,
    /// Seconds between sampling ticks.
    ConnectionUpdateInterval,
    /// Maximum number of connections delivered to the UI per snapshot.
    MaxConnectionsDisplay,
    /// Whether new applications are announced to the UI.
    EnableNotifications,
}

impl SettingKey {
    /// Every supported key, in display order.
    pub const ALL: [SettingKey; 5] = [
        SettingKey::UiFontSize,
        SettingKey::ProcessFontSize,
        SettingKey::ConnectionUpdateInterval,
        SettingKey::MaxConnectionsDisplay,
        SettingKey::EnableNotifications,
    ];

    /// Name used in the policy store.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SettingKey::UiFontSize => "ui_font_size",
            SettingKey::ProcessFontSize => "process_font_size",
            SettingKey::ConnectionUpdateInterval => "connection_update_interval",
            SettingKey::MaxConnectionsDisplay => "max_connections_display",
            SettingKey::EnableNotifications => "enable_notifications",
        }
    }

    /// Built-in default value.
    #[must_use]
    pub fn default_value(self) -> SettingValue {
        match self {
            SettingKey::UiFontSize | SettingKey::ProcessFontSize => SettingValue::Integer(12),
            SettingKey::ConnectionUpdateInterval => SettingValue::Float(2.0),
            SettingKey::MaxConnectionsDisplay => SettingValue::Integer(30),
            SettingKey::EnableNotifications => SettingValue::Bool(true),
        }
    }

    /// Validate a candidate value for this key.
    ///
    /// Integers are accepted for the float-valued interval. Returns the value
    /// in the key's native representation.
    pub fn validate(self, value: SettingValue) -> Result<SettingValue, SettingsError> {
        let out_of_range = |value: SettingValue| SettingsError::OutOfRange {
            key: self,
            value,
            range: self.range_description(),
        };

        match (self, value) {
            (SettingKey::UiFontSize | SettingKey::ProcessFontSize, SettingValue::Integer(v)) => {
                if (8..=20).contains(&v) {
                    Ok(value)
                } else {
                    Err(out_of_range(value))
                }
            }
            (SettingKey::MaxConnectionsDisplay, SettingValue::Integer(v)) => {
                if (10..=100).contains(&v) {
                    Ok(value)
                } else {
                    Err(out_of_range(value))
                }
            }
            (SettingKey::ConnectionUpdateInterval, SettingValue::Float(v)) => {
                if (1.0..=10.0).contains(&v) {
                    Ok(value)
                } else {
                    Err(out_of_range(value))
                }
            }
            (SettingKey::ConnectionUpdateInterval, SettingValue::Integer(v)) => {
                self.validate(SettingValue::Float(v as f64))
            }
            (SettingKey::EnableNotifications, SettingValue::Bool(_)) => Ok(value),
            (key, value) => Err(SettingsError::WrongType { key, value }),
        }
    }

    fn range_description(self) -> &'static str {
        match self {
            SettingKey::UiFontSize | SettingKey::ProcessFontSize => "8..=20",
            SettingKey::ConnectionUpdateInterval => "1.0..=10.0",
            SettingKey::MaxConnectionsDisplay => "10..=100",
            SettingKey::EnableNotifications => "true|false",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SettingKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| SettingsError::UnknownKey(s.to_string()))
    }
}

/// A setting value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    /// Whole number.
    Integer(i64),
    /// Decimal number.
    Float(f64),
    /// Flag.
    Bool(bool),
}

impl SettingValue {
    /// Parse a value typed by a user (e.g. `14`, `2.5`, `false`).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Ok(b) = raw.parse::<bool>() {
            return Some(SettingValue::Bool(b));
        }
        if let Ok(i) = raw.parse::<i64>() {
            return Some(SettingValue::Integer(i));
        }
        raw.parse::<f64>().ok().map(SettingValue::Float)
    }

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(SettingValue::Integer)
                .or_else(|| n.as_f64().map(SettingValue::Float)),
            Value::Bool(b) => Some(SettingValue::Bool(*b)),
            _ => None,
        }
    }

    fn to_json(self) -> Value {
        match self {
            SettingValue::Integer(i) => Value::from(i),
            SettingValue::Float(f) => Value::from(f),
            SettingValue::Bool(b) => Value::Bool(b),
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Integer(i) => write!(f, "{i}"),
            SettingValue::Float(v) => write!(f, "{v:.1}"),
            SettingValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Errors from reading or changing settings.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettingsError {
    /// The key is not a known setting.
    #[error("Unknown setting: {0}")]
    UnknownKey(String),

    /// The value has the wrong type for the key.
    #[error("Invalid value {value} for {key}: wrong type")]
    WrongType {
        /// Setting being changed.
        key: SettingKey,
        /// Rejected value.
        value: SettingValue,
    },

    /// The value is outside the declared range.
    #[error("Invalid value {value} for {key}: expected {range}")]
    OutOfRange {
        /// Setting being changed.
        key: SettingKey,
        /// Rejected value.
        value: SettingValue,
        /// Accepted range.
        range: &'static str,
    },
}

/// User settings with optional overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    ui_font_size: Option<i64>,
    process_font_size: Option<i64>,
    connection_update_interval: Option<f64>,
    max_connections_display: Option<i64>,
    enable_notifications: Option<bool>,
}

impl Settings {
    /// Build settings from the raw `settings` object of a policy document.
    ///
    /// Unknown keys are ignored. Values of the wrong type or out of range are
    /// dropped with a warning.
    #[must_use]
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let mut settings = Settings::default();
        for (name, raw) in map {
            let Ok(key) = name.parse::<SettingKey>() else {
                continue;
            };
            let applied = SettingValue::from_json(raw)
                .ok_or(SettingsError::UnknownKey(name.clone()))
                .and_then(|value| settings.set(key, value));
            if let Err(e) = applied {
                warn!("Ignoring stored setting {}: {}", name, e);
            }
        }
        settings
    }

    /// Serialize the explicit overrides into a JSON object.
    #[must_use]
    pub fn to_map(&self) -> Map<String, Value> {
        SettingKey::ALL
            .into_iter()
            .filter_map(|key| {
                self.override_of(key)
                    .map(|value| (key.as_str().to_string(), value.to_json()))
            })
            .collect()
    }

    /// Effective value of a setting, falling back to its default.
    #[must_use]
    pub fn get(&self, key: SettingKey) -> SettingValue {
        self.override_of(key).unwrap_or_else(|| key.default_value())
    }

    /// Validate and store an override.
    pub fn set(&mut self, key: SettingKey, value: SettingValue) -> Result<(), SettingsError> {
        match (key, key.validate(value)?) {
            (SettingKey::UiFontSize, SettingValue::Integer(v)) => self.ui_font_size = Some(v),
            (SettingKey::ProcessFontSize, SettingValue::Integer(v)) => {
                self.process_font_size = Some(v)
            }
            (SettingKey::MaxConnectionsDisplay, SettingValue::Integer(v)) => {
                self.max_connections_display = Some(v)
            }
            (SettingKey::ConnectionUpdateInterval, SettingValue::Float(v)) => {
                self.connection_update_interval = Some(v)
            }
            (SettingKey::ConnectionUpdateInterval, SettingValue::Integer(v)) => {
                self.connection_update_interval = Some(v as f64)
            }
            (SettingKey::EnableNotifications, SettingValue::Bool(v)) => {
                self.enable_notifications = Some(v)
            }
            (key, value) => return Err(SettingsError::WrongType { key, value }),
        }
        Ok(())
    }

    /// Base UI font size.
    #[must_use]
    pub fn ui_font_size(&self) -> u32 {
        self.ui_font_size.unwrap_or(12) as u32
    }

    /// Font size for process names.
    #[must_use]
    pub fn process_font_size(&self) -> u32 {
        self.process_font_size.unwrap_or(12) as u32
    }

    /// Interval between sampling ticks.
    #[must_use]
    pub fn connection_update_interval(&self) -> Duration {
        Duration::from_secs_f64(self.connection_update_interval.unwrap_or(2.0))
    }

    /// Maximum connections per UI snapshot.
    #[must_use]
    pub fn max_connections_display(&self) -> usize {
        self.max_connections_display.unwrap_or(30) as usize
    }

    /// Whether new applications are announced to the UI.
    #[must_use]
    pub fn enable_notifications(&self) -> bool {
        self.enable_notifications.unwrap_or(true)
    }

    fn override_of(&self, key: SettingKey) -> Option<SettingValue> {
        match key {
            SettingKey::UiFontSize => self.ui_font_size.map(SettingValue::Integer),
            SettingKey::ProcessFontSize => self.process_font_size.map(SettingValue::Integer),
            SettingKey::ConnectionUpdateInterval => {
                self.connection_update_interval.map(SettingValue::Float)
            }
            SettingKey::MaxConnectionsDisplay => {
                self.max_connections_display.map(SettingValue::Integer)
            }
            SettingKey::EnableNotifications => self.enable_notifications.map(SettingValue::Bool),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.get(SettingKey::UiFontSize), SettingValue::Integer(12));
        assert_eq!(settings.get(SettingKey::ProcessFontSize), SettingValue::Integer(12));
        assert_eq!(
            settings.get(SettingKey::ConnectionUpdateInterval),
            SettingValue::Float(2.0)
        );
        assert_eq!(
            settings.get(SettingKey::MaxConnectionsDisplay),
            SettingValue::Integer(30)
        );
        assert_eq!(
            settings.get(SettingKey::EnableNotifications),
            SettingValue::Bool(true)
        );
        assert_eq!(settings.connection_update_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_set_validates_range() {
        let mut settings = Settings::default();
        settings.set(SettingKey::UiFontSize, SettingValue::Integer(14)).unwrap();
        assert_eq!(settings.ui_font_size(), 14);

        let err = settings
            .set(SettingKey::UiFontSize, SettingValue::Integer(99))
            .unwrap_err();
        assert!(matches!(err, SettingsError::OutOfRange { .. }));
        assert_eq!(settings.ui_font_size(), 14);
    }

    #[test]
    fn test_set_rejects_wrong_type() {
        let mut settings = Settings::default();
        let err = settings
            .set(SettingKey::EnableNotifications, SettingValue::Integer(1))
            .unwrap_err();
        assert!(matches!(err, SettingsError::WrongType { .. }));
    }

    #[test]
    fn test_interval_accepts_integer() {
        let mut settings = Settings::default();
        settings
            .set(SettingKey::ConnectionUpdateInterval, SettingValue::Integer(5))
            .unwrap();
        assert_eq!(settings.connection_update_interval(), Duration::from_secs(5));
        assert_eq!(
            settings.get(SettingKey::ConnectionUpdateInterval),
            SettingValue::Float(5.0)
        );
    }

    #[test]
    fn test_from_map_ignores_unknown_and_invalid() {
        let map: Map<String, Value> = serde_json::from_str(
            r#"{
                "ui_font_size": 16,
                "max_connections_display": 5000,
                "enable_notifications": "yes",
                "theme": "dark"
            }"#,
        )
        .unwrap();

        let settings = Settings::from_map(&map);
        assert_eq!(settings.ui_font_size(), 16);
        assert_eq!(settings.max_connections_display(), 30);
        assert!(settings.enable_notifications());
    }

    #[test]
    fn test_to_map_only_overrides() {
        let mut settings = Settings::default();
        settings
            .set(SettingKey::EnableNotifications, SettingValue::Bool(false))
            .unwrap();

        let map = settings.to_map();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("enable_notifications"), Some(&Value::Bool(false)));
        assert_eq!(Settings::from_map(&map), settings);
    }

    #[test]
    fn test_key_and_value_parsing() {
        assert_eq!(
            "max_connections_display".parse::<SettingKey>().unwrap(),
            SettingKey::MaxConnectionsDisplay
        );
        assert!("font".parse::<SettingKey>().is_err());

        assert_eq!(SettingValue::parse("14"), Some(SettingValue::Integer(14)));
        assert_eq!(SettingValue::parse("2.5"), Some(SettingValue::Float(2.5)));
        assert_eq!(SettingValue::parse("false"), Some(SettingValue::Bool(false)));
        assert_eq!(SettingValue::parse("loud"), None);
    }
}
