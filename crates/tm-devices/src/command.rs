//! Control commands that can be sent to an instrument.
//!
//! Remote clients send `{command, parameters}` pairs; operators on the CLI
//! use the `name[@output]=value` shorthand (`setpoint=77`,
//! `heater@2=off`). Both forms end up as a typed [`DeviceCommand`].

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::error::CommandParseError;

/// Output used when a command does not name one.
pub const DEFAULT_OUTPUT: &str = "1";

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    /// Change the control-loop setpoint of an output.
    SetSetpoint { output: String, kelvin: f64 },
    /// Switch an output's heater on or off.
    SetHeater { output: String, enabled: bool },
    /// Send a protocol line verbatim.
    Raw { line: String },
}

impl DeviceCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetSetpoint { .. } => "setpoint",
            Self::SetHeater { .. } => "heater",
            Self::Raw { .. } => "raw",
        }
    }

    /// Build a command from the remote `{command, parameters}` form.
    pub fn from_request(
        command: &str,
        parameters: &BTreeMap<String, Value>,
    ) -> Result<Self, CommandParseError> {
        let output = match parameters.get("output") {
            None => DEFAULT_OUTPUT.to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => {
                return Err(CommandParseError::InvalidValue {
                    param: "output",
                    value: other.to_string(),
                });
            }
        };

        match command {
            "setpoint" => {
                let raw = parameters
                    .get("value")
                    .ok_or(CommandParseError::MissingParameter {
                        command: "setpoint",
                        param: "value",
                    })?;
                let kelvin = match raw {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                };
                Ok(Self::SetSetpoint {
                    output,
                    kelvin: setpoint_value(kelvin, raw.to_string())?,
                })
            }
            "heater" => {
                let raw = parameters
                    .get("enabled")
                    .or_else(|| parameters.get("value"))
                    .ok_or(CommandParseError::MissingParameter {
                        command: "heater",
                        param: "enabled",
                    })?;
                let enabled = match raw {
                    Value::Bool(b) => Some(*b),
                    Value::String(s) => parse_switch(s),
                    _ => None,
                }
                .ok_or_else(|| CommandParseError::InvalidValue {
                    param: "enabled",
                    value: raw.to_string(),
                })?;
                Ok(Self::SetHeater { output, enabled })
            }
            "raw" => {
                let line = parameters
                    .get("line")
                    .and_then(Value::as_str)
                    .ok_or(CommandParseError::MissingParameter {
                        command: "raw",
                        param: "line",
                    })?;
                raw_line(line)
            }
            other => Err(CommandParseError::UnknownCommand(other.to_string())),
        }
    }

    /// Parse the `name[@output]=value` shorthand.
    pub fn parse_shorthand(input: &str) -> Result<Self, CommandParseError> {
        let (head, value) = input
            .split_once('=')
            .ok_or_else(|| CommandParseError::UnknownCommand(input.to_string()))?;
        let (name, output) = match head.trim().split_once('@') {
            Some((name, output)) => (name.trim(), output.trim().to_string()),
            None => (head.trim(), DEFAULT_OUTPUT.to_string()),
        };
        let value = value.trim();

        match name {
            "setpoint" => Ok(Self::SetSetpoint {
                output,
                kelvin: setpoint_value(value.parse().ok(), value.to_string())?,
            }),
            "heater" => {
                let enabled = parse_switch(value).ok_or_else(|| CommandParseError::InvalidValue {
                    param: "enabled",
                    value: value.to_string(),
                })?;
                Ok(Self::SetHeater { output, enabled })
            }
            "raw" => raw_line(value),
            other => Err(CommandParseError::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetSetpoint { output, kelvin } => write!(f, "setpoint@{output}={kelvin}"),
            Self::SetHeater { output, enabled } => {
                write!(f, "heater@{output}={}", if *enabled { "on" } else { "off" })
            }
            Self::Raw { line } => write!(f, "raw={line}"),
        }
    }
}

fn setpoint_value(kelvin: Option<f64>, raw: String) -> Result<f64, CommandParseError> {
    match kelvin {
        Some(k) if k.is_finite() && k >= 0.0 => Ok(k),
        _ => Err(CommandParseError::InvalidValue {
            param: "value",
            value: raw,
        }),
    }
}

fn raw_line(line: &str) -> Result<DeviceCommand, CommandParseError> {
    if line.trim().is_empty() || line.contains(['\r', '\n']) {
        return Err(CommandParseError::InvalidValue {
            param: "line",
            value: line.to_string(),
        });
    }
    Ok(DeviceCommand::Raw {
        line: line.trim().to_string(),
    })
}

fn parse_switch(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "enable" | "enabled" => Some(true),
        "off" | "false" | "0" | "disable" | "disabled" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn shorthand_setpoint_uses_default_output() {
        let cmd = DeviceCommand::parse_shorthand("setpoint=77").unwrap();
        assert_eq!(
            cmd,
            DeviceCommand::SetSetpoint {
                output: "1".to_string(),
                kelvin: 77.0
            }
        );
    }

    #[test]
    fn shorthand_heater_with_output() {
        let cmd = DeviceCommand::parse_shorthand("heater@2=off").unwrap();
        assert_eq!(
            cmd,
            DeviceCommand::SetHeater {
                output: "2".to_string(),
                enabled: false
            }
        );
    }

    #[test]
    fn shorthand_rejects_garbage() {
        assert!(DeviceCommand::parse_shorthand("setpoint").is_err());
        assert!(DeviceCommand::parse_shorthand("setpoint=warm").is_err());
        assert!(DeviceCommand::parse_shorthand("setpoint=-3").is_err());
        assert!(DeviceCommand::parse_shorthand("heater=maybe").is_err());
        assert!(matches!(
            DeviceCommand::parse_shorthand("explode=1"),
            Err(CommandParseError::UnknownCommand(_))
        ));
    }

    #[test]
    fn request_form_accepts_numbers_and_strings() {
        let cmd =
            DeviceCommand::from_request("setpoint", &params(json!({"value": 4.5, "output": 2})))
                .unwrap();
        assert_eq!(
            cmd,
            DeviceCommand::SetSetpoint {
                output: "2".to_string(),
                kelvin: 4.5
            }
        );

        let cmd = DeviceCommand::from_request("heater", &params(json!({"enabled": "on"}))).unwrap();
        assert_eq!(
            cmd,
            DeviceCommand::SetHeater {
                output: "1".to_string(),
                enabled: true
            }
        );
    }

    #[test]
    fn request_form_reports_missing_parameter() {
        let err = DeviceCommand::from_request("setpoint", &BTreeMap::new()).unwrap_err();
        assert_eq!(
            err,
            CommandParseError::MissingParameter {
                command: "setpoint",
                param: "value"
            }
        );
    }

    #[test]
    fn raw_line_must_be_single_line() {
        assert!(DeviceCommand::from_request("raw", &params(json!({"line": "*IDN?"}))).is_ok());
        assert!(
            DeviceCommand::from_request("raw", &params(json!({"line": "A\nB"}))).is_err()
        );
    }

    #[test]
    fn display_matches_shorthand() {
        for text in ["setpoint@1=77", "heater@2=on", "raw=*IDN?"] {
            let cmd = DeviceCommand::parse_shorthand(text).unwrap();
            assert_eq!(cmd.to_string(), text);
        }
    }
}
