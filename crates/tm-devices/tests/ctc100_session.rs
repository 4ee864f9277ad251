//! A CTC100 conversation against an emulated controller.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::time::Duration;

use tm_core::as_kelvin;
use tm_devices::{
    DeviceCommand, DeviceCommandError, DeviceHandle, Family, LineInstrument, ProtocolOverrides,
    ReadError, Transport,
};

/// Parses CTC100 lines the way the controller does and queues its answers.
#[derive(Default)]
struct FakeCtc100 {
    values: HashMap<String, f64>,
    setpoints: HashMap<String, f64>,
    outputs_enabled: bool,
    outbox: VecDeque<String>,
    log: Vec<String>,
}

impl Transport for FakeCtc100 {
    fn send_line(&mut self, line: &str, _timeout: Duration) -> io::Result<()> {
        assert!(line.ends_with('\n'), "unterminated line {line:?}");
        let line = line.trim_end().to_string();
        self.log.push(line.clone());

        let reply = if let Some(channel) = line.strip_suffix(".value?") {
            match self.values.get(channel) {
                Some(v) => format!("{channel}.value = {v}"),
                None => "Error: no such channel".to_string(),
            }
        } else if let Some((lhs, value)) = line.split_once(".PID.setpoint ") {
            match value.parse::<f64>() {
                Ok(v) => {
                    self.setpoints.insert(lhs.to_string(), v);
                    format!("{lhs}.PID.setpoint = {v}")
                }
                Err(_) => "Error: bad value".to_string(),
            }
        } else if let Some(state) = line.strip_prefix("outputEnable ") {
            self.outputs_enabled = state == "on";
            format!("outputEnable = {state}")
        } else {
            "?".to_string()
        };
        self.outbox.push_back(reply);
        Ok(())
    }

    fn read_line(&mut self, _timeout: Duration) -> io::Result<String> {
        self.outbox
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "no reply"))
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.outbox.clear();
        Ok(())
    }

    fn describe(&self) -> String {
        "fake-ctc100".to_string()
    }
}

const T: Duration = Duration::from_millis(200);

fn controller() -> LineInstrument<FakeCtc100> {
    let mut fake = FakeCtc100::default();
    fake.values.insert("4pump".to_string(), 3.512);
    fake.values.insert("4switch".to_string(), 12.0);
    LineInstrument::new(Family::Ctc100, Family::Ctc100.default_templates(), fake)
}

#[test]
fn reads_each_channel_by_name() {
    let mut ctc = controller();
    assert_eq!(as_kelvin(ctc.read_channel("4pump", T).unwrap()), 3.512);
    assert_eq!(as_kelvin(ctc.read_channel("4switch", T).unwrap()), 12.0);
    assert_eq!(ctc.transport().log, vec!["4pump.value?", "4switch.value?"]);
}

#[test]
fn unknown_channel_is_malformed_not_fatal() {
    let mut ctc = controller();
    assert!(matches!(
        ctc.read_channel("9pump", T),
        Err(ReadError::Malformed(_))
    ));
    // The next query still gets its own answer.
    assert_eq!(as_kelvin(ctc.read_channel("4pump", T).unwrap()), 3.512);
}

#[test]
fn setpoint_and_heater_commands() {
    let mut ctc = controller();
    let reply = ctc
        .apply_command(&DeviceCommand::parse_shorthand("setpoint@4pump=5.25").unwrap(), T)
        .unwrap();
    assert_eq!(reply, "4pump.PID.setpoint = 5.25");
    assert_eq!(ctc.transport().setpoints.get("4pump"), Some(&5.25));

    ctc.apply_command(&DeviceCommand::parse_shorthand("heater=on").unwrap(), T)
        .unwrap();
    assert!(ctc.transport().outputs_enabled);
    ctc.apply_command(&DeviceCommand::parse_shorthand("heater=off").unwrap(), T)
        .unwrap();
    assert!(!ctc.transport().outputs_enabled);
}

#[test]
fn unknown_raw_line_is_rejected() {
    let mut ctc = controller();
    let err = ctc
        .apply_command(&DeviceCommand::Raw { line: "selfDestruct".into() }, T)
        .unwrap_err();
    assert_eq!(err, DeviceCommandError::Rejected("?".to_string()));
}

#[test]
fn overridden_query_template_is_used() {
    let templates = Family::Ctc100
        .default_templates()
        .with_overrides(&ProtocolOverrides {
            query: Some("{channel}.value?".to_string()),
            line_ending: Some("\r\n".to_string()),
            ..Default::default()
        });
    let mut fake = FakeCtc100::default();
    fake.values.insert("A".to_string(), 1.5);
    let mut ctc = LineInstrument::new(Family::Ctc100, templates, fake);
    assert_eq!(as_kelvin(ctc.read_channel("A", T).unwrap()), 1.5);
}
