//! ASCII line-protocol templates per instrument family.
//!
//! Templates use `{channel}`, `{output}` and `{kelvin}` placeholders.

use serde::{Deserialize, Serialize};

use crate::command::DeviceCommand;
use crate::error::{DeviceCommandError, ReadError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    /// Lake Shore 224 / 372 style (`KRDG? A`).
    Lakeshore,
    /// Stanford Research CTC100 (`4pump.value?`).
    Ctc100,
    /// In-process simulated instrument.
    Simulated,
}

impl Family {
    pub fn label(self) -> &'static str {
        match self {
            Self::Lakeshore => "lakeshore",
            Self::Ctc100 => "ctc100",
            Self::Simulated => "simulated",
        }
    }

    pub fn default_baud_rate(self) -> u32 {
        match self {
            Self::Lakeshore => 57_600,
            Self::Ctc100 | Self::Simulated => 9_600,
        }
    }

    pub fn default_templates(self) -> ProtocolTemplates {
        match self {
            Self::Lakeshore => ProtocolTemplates {
                query: "KRDG? {channel}".to_string(),
                setpoint: Some("SETP {output},{kelvin}".to_string()),
                heater_on: Some("RANGE {output},3".to_string()),
                heater_off: Some("RANGE {output},0".to_string()),
                line_ending: "\r\n".to_string(),
                command_reply: false,
            },
            Self::Ctc100 => ProtocolTemplates {
                query: "{channel}.value?".to_string(),
                setpoint: Some("{output}.PID.setpoint {kelvin}".to_string()),
                heater_on: Some("outputEnable on".to_string()),
                heater_off: Some("outputEnable off".to_string()),
                line_ending: "\n".to_string(),
                command_reply: true,
            },
            Self::Simulated => ProtocolTemplates {
                query: "{channel}?".to_string(),
                setpoint: None,
                heater_on: None,
                heater_off: None,
                line_ending: "\n".to_string(),
                command_reply: false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolTemplates {
    pub query: String,
    pub setpoint: Option<String>,
    pub heater_on: Option<String>,
    pub heater_off: Option<String>,
    pub line_ending: String,
    /// Whether the instrument answers control commands with a line.
    pub command_reply: bool,
}

/// Per-device overrides of a family's templates, as written in config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolOverrides {
    pub query: Option<String>,
    pub setpoint: Option<String>,
    pub heater_on: Option<String>,
    pub heater_off: Option<String>,
    pub line_ending: Option<String>,
    pub command_reply: Option<bool>,
}

impl ProtocolTemplates {
    pub fn with_overrides(mut self, o: &ProtocolOverrides) -> Self {
        if let Some(q) = &o.query {
            self.query = q.clone();
        }
        if o.setpoint.is_some() {
            self.setpoint = o.setpoint.clone();
        }
        if o.heater_on.is_some() {
            self.heater_on = o.heater_on.clone();
        }
        if o.heater_off.is_some() {
            self.heater_off = o.heater_off.clone();
        }
        if let Some(le) = &o.line_ending {
            self.line_ending = le.clone();
        }
        if let Some(r) = o.command_reply {
            self.command_reply = r;
        }
        self
    }

    pub fn query_line(&self, channel: &str) -> String {
        self.query.replace("{channel}", channel)
    }

    pub fn command_line(&self, command: &DeviceCommand) -> Result<String, DeviceCommandError> {
        let (template, output, kelvin) = match command {
            DeviceCommand::Raw { line } => return Ok(line.clone()),
            DeviceCommand::SetSetpoint { output, kelvin } => {
                (self.setpoint.as_ref(), output, Some(*kelvin))
            }
            DeviceCommand::SetHeater {
                output,
                enabled: true,
            } => (self.heater_on.as_ref(), output, None),
            DeviceCommand::SetHeater {
                output,
                enabled: false,
            } => (self.heater_off.as_ref(), output, None),
        };
        let template =
            template.ok_or_else(|| DeviceCommandError::Unsupported(command.name().to_string()))?;
        let mut line = template.replace("{output}", output);
        if let Some(k) = kelvin {
            line = line.replace("{kelvin}", &k.to_string());
        }
        Ok(line)
    }
}

/// Extract a kelvin value from a query response.
///
/// Accepts bare numbers (`+4.2345E+00`) and `name = value` echoes; unit
/// suffixes after the number are ignored.
pub fn parse_temperature(response: &str) -> Result<f64, ReadError> {
    let trimmed = response.trim();
    let value_part = trimmed
        .rsplit_once('=')
        .map_or(trimmed, |(_, rhs)| rhs.trim());
    value_part
        .split(|c: char| c.is_whitespace() || c == ',')
        .find(|tok| !tok.is_empty())
        .and_then(|tok| tok.trim_end_matches(['K', 'k']).parse::<f64>().ok())
        .ok_or_else(|| ReadError::Malformed(trimmed.to_string()))
}

/// Instrument error replies look like `Error: ...` or a lone `?`.
pub fn is_error_reply(reply: &str) -> bool {
    let r = reply.trim();
    r.starts_with('?') || r.to_ascii_lowercase().starts_with("error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_response_shapes() {
        assert_eq!(parse_temperature("+4.2345E+00\r\n").unwrap(), 4.2345);
        assert_eq!(parse_temperature("3.512").unwrap(), 3.512);
        assert_eq!(parse_temperature("4pump.value = 3.5").unwrap(), 3.5);
        assert_eq!(parse_temperature("77.1 K").unwrap(), 77.1);
        assert_eq!(parse_temperature("77.1K").unwrap(), 77.1);
    }

    #[test]
    fn rejects_non_numeric_responses() {
        assert!(matches!(parse_temperature(""), Err(ReadError::Malformed(_))));
        assert!(matches!(
            parse_temperature("Error: no such channel"),
            Err(ReadError::Malformed(_))
        ));
    }

    #[test]
    fn lakeshore_templates_render() {
        let t = Family::Lakeshore.default_templates();
        assert_eq!(t.query_line("A"), "KRDG? A");
        let line = t
            .command_line(&DeviceCommand::SetSetpoint {
                output: "1".to_string(),
                kelvin: 77.0,
            })
            .unwrap();
        assert_eq!(line, "SETP 1,77");
        let line = t
            .command_line(&DeviceCommand::SetHeater {
                output: "2".to_string(),
                enabled: false,
            })
            .unwrap();
        assert_eq!(line, "RANGE 2,0");
    }

    #[test]
    fn missing_template_is_unsupported() {
        let t = Family::Simulated.default_templates();
        let err = t
            .command_line(&DeviceCommand::SetHeater {
                output: "1".to_string(),
                enabled: true,
            })
            .unwrap_err();
        assert_eq!(err, DeviceCommandError::Unsupported("heater".to_string()));
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let t = Family::Ctc100
            .default_templates()
            .with_overrides(&ProtocolOverrides {
                query: Some("{channel}?".to_string()),
                ..Default::default()
            });
        assert_eq!(t.query_line("3pump"), "3pump?");
        assert_eq!(t.line_ending, "\n");
        assert!(t.command_reply);
    }

    #[test]
    fn error_replies_are_recognised() {
        assert!(is_error_reply("Error: bad value"));
        assert!(is_error_reply("?"));
        assert!(!is_error_reply("OK"));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn scientific_replies_parse_back(v in 0.0_f64..2000.0) {
            let reply = format!("{:+.4E}\r\n", v);
            let parsed = parse_temperature(&reply).unwrap();
            prop_assert!((parsed - v).abs() <= v.abs() * 1e-3 + 1e-9);
        }

        #[test]
        fn echoed_replies_parse_back(v in 0.0_f64..2000.0, name in "[a-zA-Z0-9]{1,8}") {
            let reply = format!("{name}.value = {v}");
            prop_assert_eq!(parse_temperature(&reply).unwrap(), v);
        }
    }
}
