use std::str::FromStr;

use serde::Serialize;

use crate::shutter::State;

/// A command received from a remote client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open,
    Close,
    Stop,
    SetPosition(i32),
    /// Overwrite the estimated position, e.g. with a value the client kept
    /// from before a restart.
    Reset(i32),
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "open" => Ok(Command::Open),
            "close" => Ok(Command::Close),
            "stop" => Ok(Command::Stop),
            other => {
                if let Some(position) = other.strip_prefix("reset ") {
                    return parse_position(position).map(Command::Reset);
                }
                parse_position(other).map(Command::SetPosition)
            }
        }
    }
}

fn parse_position(s: &str) -> Result<i32, String> {
    s.trim()
        .parse()
        .map_err(|_| format!("{} is not a supported command", s.trim()))
}

/// Sent to clients after every change of a shutter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Update {
    pub name: String,
    pub state: State,
    pub position: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!("open".parse::<Command>(), Ok(Command::Open));
        assert_eq!("close\n".parse::<Command>(), Ok(Command::Close));
        assert_eq!("stop".parse::<Command>(), Ok(Command::Stop));
        assert_eq!("42".parse::<Command>(), Ok(Command::SetPosition(42)));
        assert_eq!(" -3 ".parse::<Command>(), Ok(Command::SetPosition(-3)));
        assert_eq!("reset 17".parse::<Command>(), Ok(Command::Reset(17)));
    }

    #[test]
    fn rejects_unknown_commands() {
        assert!("keep-alive".parse::<Command>().is_err());
        assert!("reset".parse::<Command>().is_err());
        assert!("reset x".parse::<Command>().is_err());
        assert!("".parse::<Command>().is_err());
    }

    #[test]
    fn update_serializes_state_as_string() {
        let update = Update {
            name: "kitchen".to_string(),
            state: State::Opening,
            position: 12,
        };

        assert_eq!(
            serde_json::to_string(&update).unwrap(),
            r#"{"name":"kitchen","state":"opening","position":12}"#
        );
    }
}
