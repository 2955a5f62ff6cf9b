use crate::error::ProtocolError;
use serde::Deserialize;
use serde_json::{json, Value};

/// Observer ids registered on a fresh connection. The player echoes the id
/// back in every property-change notification.
pub const OBS_PAUSE: u64 = 1;
pub const OBS_TIME_POS: u64 = 2;
pub const OBS_DURATION: u64 = 3;

/// Player properties the controller reads, writes, or observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    Pause,
    TimePos,
    Duration,
    Volume,
}

impl Property {
    pub fn as_str(&self) -> &'static str {
        match self {
            Property::Pause => "pause",
            Property::TimePos => "time-pos",
            Property::Duration => "duration",
            Property::Volume => "volume",
        }
    }
}

/// Requests sent over the control socket, one JSON object per line.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    GetProperty(Property),
    SetProperty(Property, Value),
    SeekAbsolute(f64),
    SeekRelative(f64),
    /// Forces the player to reopen its audio output. Seeking desynchronizes
    /// audio from video without this.
    ReloadAudio,
    ObserveProperty { id: u64, property: Property },
    Quit,
}

impl PlayerCommand {
    pub fn to_wire(&self, request_id: u64) -> Value {
        let command = match self {
            PlayerCommand::GetProperty(prop) => json!(["get_property", prop.as_str()]),
            PlayerCommand::SetProperty(prop, value) => {
                json!(["set_property", prop.as_str(), value])
            }
            PlayerCommand::SeekAbsolute(seconds) => json!(["seek", seconds, "absolute"]),
            PlayerCommand::SeekRelative(seconds) => json!(["seek", seconds, "relative"]),
            PlayerCommand::ReloadAudio => json!(["ao-reload"]),
            PlayerCommand::ObserveProperty { id, property } => {
                json!(["observe_property", id, property.as_str()])
            }
            PlayerCommand::Quit => json!(["quit"]),
        };

        json!({ "command": command, "request_id": request_id })
    }
}

/// A correlated response to a single request.
#[derive(Debug, Clone, Deserialize)]
pub struct Reply {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub request_id: Option<u64>,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        self.error == "success"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Eof,
    Error,
    Quit,
    Other,
}

/// The closed set of asynchronous notifications the controller reacts to.
/// Everything else the player pushes parses to `Ignored` so the state
/// machine's match over events stays exhaustive.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    PauseChanged(bool),
    PositionChanged(Option<f64>),
    DurationChanged(Option<f64>),
    EndOfFile(EndReason),
    FileLoaded,
    Ignored,
}

/// One inbound line: either a reply to a request or an unsolicited event.
#[derive(Debug, Clone)]
pub enum Incoming {
    Reply(Reply),
    Event(PlayerEvent),
}

pub fn parse_line(line: &str) -> Result<Incoming, ProtocolError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    if value.get("event").is_some() {
        return Ok(Incoming::Event(parse_event(&value)));
    }

    let reply: Reply =
        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    Ok(Incoming::Reply(reply))
}

fn parse_event(value: &Value) -> PlayerEvent {
    match value.get("event").and_then(Value::as_str) {
        Some("property-change") => match value.get("name").and_then(Value::as_str) {
            Some("pause") => {
                PlayerEvent::PauseChanged(value.get("data").and_then(Value::as_bool).unwrap_or(false))
            }
            Some("time-pos") => PlayerEvent::PositionChanged(value.get("data").and_then(Value::as_f64)),
            Some("duration") => PlayerEvent::DurationChanged(value.get("data").and_then(Value::as_f64)),
            _ => PlayerEvent::Ignored,
        },
        Some("end-file") => {
            let reason = match value.get("reason").and_then(Value::as_str) {
                Some("eof") => EndReason::Eof,
                // A dropped network source reads the same as a decode error
                // from the controller's point of view.
                Some("error") | Some("network") => EndReason::Error,
                Some("quit") => EndReason::Quit,
                _ => EndReason::Other,
            };
            PlayerEvent::EndOfFile(reason)
        }
        Some("file-loaded") => PlayerEvent::FileLoaded,
        _ => PlayerEvent::Ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_property_serialization() {
        let wire = PlayerCommand::GetProperty(Property::TimePos).to_wire(7);
        assert_eq!(wire["command"], json!(["get_property", "time-pos"]));
        assert_eq!(wire["request_id"], 7);
    }

    #[test]
    fn test_seek_serialization() {
        let wire = PlayerCommand::SeekAbsolute(30.0).to_wire(1);
        assert_eq!(wire["command"], json!(["seek", 30.0, "absolute"]));

        let wire = PlayerCommand::SeekRelative(-10.0).to_wire(2);
        assert_eq!(wire["command"], json!(["seek", -10.0, "relative"]));
    }

    #[test]
    fn test_observe_property_serialization() {
        let wire = PlayerCommand::ObserveProperty {
            id: OBS_PAUSE,
            property: Property::Pause,
        }
        .to_wire(3);
        assert_eq!(wire["command"], json!(["observe_property", OBS_PAUSE, "pause"]));
    }

    #[test]
    fn parses_successful_reply() {
        let incoming = parse_line(r#"{"error":"success","data":42.5,"request_id":9}"#).unwrap();
        match incoming {
            Incoming::Reply(reply) => {
                assert!(reply.is_success());
                assert_eq!(reply.data.as_f64(), Some(42.5));
                assert_eq!(reply.request_id, Some(9));
            }
            Incoming::Event(_) => panic!("expected a reply"),
        }
    }

    #[test]
    fn parses_failed_reply() {
        let incoming = parse_line(r#"{"error":"property not found","request_id":4}"#).unwrap();
        match incoming {
            Incoming::Reply(reply) => assert!(!reply.is_success()),
            Incoming::Event(_) => panic!("expected a reply"),
        }
    }

    #[test]
    fn parses_pause_change() {
        let line = r#"{"event":"property-change","id":1,"name":"pause","data":true}"#;
        match parse_line(line).unwrap() {
            Incoming::Event(PlayerEvent::PauseChanged(true)) => {}
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn parses_cleared_position_as_none() {
        let line = r#"{"event":"property-change","id":2,"name":"time-pos","data":null}"#;
        match parse_line(line).unwrap() {
            Incoming::Event(PlayerEvent::PositionChanged(None)) => {}
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn parses_end_file_reasons() {
        let eof = parse_line(r#"{"event":"end-file","reason":"eof"}"#).unwrap();
        assert!(matches!(
            eof,
            Incoming::Event(PlayerEvent::EndOfFile(EndReason::Eof))
        ));

        let network = parse_line(r#"{"event":"end-file","reason":"network"}"#).unwrap();
        assert!(matches!(
            network,
            Incoming::Event(PlayerEvent::EndOfFile(EndReason::Error))
        ));
    }

    #[test]
    fn unknown_events_are_ignored_not_errors() {
        let line = r#"{"event":"idle-active"}"#;
        assert!(matches!(
            parse_line(line).unwrap(),
            Incoming::Event(PlayerEvent::Ignored)
        ));
    }

    #[test]
    fn malformed_line_is_a_protocol_error() {
        assert!(parse_line("not json at all").is_err());
    }
}
