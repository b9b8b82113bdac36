// Interactive prompt commands for `ghostlink start`

use ghostlink_core::{DmPolicy, RoomType};

pub const HELP: &[(&str, &str)] = &[
    ("/connect <peer>", "open a direct room with a peer"),
    ("/dm <peer> <text>", "send a direct message"),
    ("/create <group|channel> <name>", "host a new room"),
    ("/invite <room> <peer>", "invite a peer into a room you host"),
    ("/say <room> <text>", "send into a room"),
    ("/rooms", "list rooms"),
    ("/reconnect <room>", "reconnect a room's peers"),
    ("/call <peer>", "start a call"),
    ("/accept", "accept the ringing call"),
    ("/decline", "decline the ringing call"),
    ("/hangup", "end the current call"),
    ("/privacy [dm <everyone|contacts> | calls <on|off>]", "show or change privacy"),
    ("/anon <on|off>", "switch anonymized routing (new peer ID)"),
    ("/quit", "leave the network and exit"),
];

/// A change to the privacy policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrivacyChange {
    Show,
    Dm(DmPolicy),
    Calls(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect(String),
    Dm { peer: String, text: String },
    Create { room_type: RoomType, name: String },
    Invite { room: String, peer: String },
    Say { room: String, text: String },
    Rooms,
    Reconnect(String),
    Call(String),
    Accept,
    Decline,
    Hangup,
    Privacy(PrivacyChange),
    Anon(bool),
    Quit,
    Help,
}

/// Parse one prompt line. `Ok(None)` for blank lines; `Err` carries usage text.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let command = match verb {
        "/connect" => Command::Connect(one_arg(rest, "/connect <peer>")?),
        "/dm" => {
            let (peer, text) = arg_and_text(rest, "/dm <peer> <text>")?;
            Command::Dm { peer, text }
        }
        "/create" => {
            let (kind, name) = arg_and_text(rest, "/create <group|channel> <name>")?;
            let room_type = match kind.to_ascii_lowercase().as_str() {
                "group" => RoomType::Group,
                "channel" => RoomType::Channel,
                _ => return Err("Usage: /create <group|channel> <name>".to_string()),
            };
            Command::Create { room_type, name }
        }
        "/invite" => {
            let (room, peer) = arg_and_text(rest, "/invite <room> <peer>")?;
            Command::Invite { room, peer }
        }
        "/say" => {
            let (room, text) = arg_and_text(rest, "/say <room> <text>")?;
            Command::Say { room, text }
        }
        "/rooms" => Command::Rooms,
        "/reconnect" => Command::Reconnect(one_arg(rest, "/reconnect <room>")?),
        "/call" => Command::Call(one_arg(rest, "/call <peer>")?),
        "/accept" => Command::Accept,
        "/decline" => Command::Decline,
        "/hangup" => Command::Hangup,
        "/privacy" => Command::Privacy(parse_privacy(rest)?),
        "/anon" => Command::Anon(toggle(&one_arg(rest, "/anon <on|off>")?, "/anon <on|off>")?),
        "/quit" | "/exit" => Command::Quit,
        "/help" => Command::Help,
        other => return Err(format!("Unknown command: {} (try /help)", other)),
    };
    Ok(Some(command))
}

fn parse_privacy(rest: &str) -> Result<PrivacyChange, String> {
    const USAGE: &str = "/privacy [dm <everyone|contacts> | calls <on|off>]";
    if rest.is_empty() {
        return Ok(PrivacyChange::Show);
    }
    let (key, value) = arg_and_text(rest, USAGE)?;
    match key.as_str() {
        "dm" => value
            .parse::<DmPolicy>()
            .map(PrivacyChange::Dm)
            .map_err(|_| format!("Usage: {}", USAGE)),
        "calls" => toggle(&value, USAGE).map(PrivacyChange::Calls),
        _ => Err(format!("Usage: {}", USAGE)),
    }
}

fn one_arg(rest: &str, usage: &str) -> Result<String, String> {
    let mut parts = rest.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(arg), None) => Ok(arg.to_string()),
        _ => Err(format!("Usage: {}", usage)),
    }
}

/// First word, then everything after it
fn arg_and_text(rest: &str, usage: &str) -> Result<(String, String), String> {
    match rest.split_once(char::is_whitespace) {
        Some((arg, text)) if !text.trim().is_empty() => {
            Ok((arg.to_string(), text.trim().to_string()))
        }
        _ => Err(format!("Usage: {}", usage)),
    }
}

fn toggle(value: &str, usage: &str) -> Result<bool, String> {
    match value {
        "on" | "true" | "yes" => Ok(true),
        "off" | "false" | "no" => Ok(false),
        _ => Err(format!("Usage: {}", usage)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_line() {
        assert_eq!(parse("   "), Ok(None));
    }

    #[test]
    fn test_text_keeps_spaces() {
        assert_eq!(
            parse("/say group-1 hello   there"),
            Ok(Some(Command::Say {
                room: "group-1".into(),
                text: "hello   there".into()
            }))
        );
        assert_eq!(
            parse("/dm 12D3KooW hi"),
            Ok(Some(Command::Dm {
                peer: "12D3KooW".into(),
                text: "hi".into()
            }))
        );
    }

    #[test]
    fn test_create() {
        assert_eq!(
            parse("/create channel Weekend plans"),
            Ok(Some(Command::Create {
                room_type: RoomType::Channel,
                name: "Weekend plans".into()
            }))
        );
        assert!(parse("/create direct x").is_err());
    }

    #[test]
    fn test_privacy() {
        assert_eq!(parse("/privacy"), Ok(Some(Command::Privacy(PrivacyChange::Show))));
        assert_eq!(
            parse("/privacy dm contacts"),
            Ok(Some(Command::Privacy(PrivacyChange::Dm(DmPolicy::ContactsOnly))))
        );
        assert_eq!(
            parse("/privacy calls off"),
            Ok(Some(Command::Privacy(PrivacyChange::Calls(false))))
        );
        assert!(parse("/privacy calls maybe").is_err());
    }

    #[test]
    fn test_usage_errors() {
        assert!(parse("/connect").is_err());
        assert!(parse("/connect a b").is_err());
        assert!(parse("/say room").is_err());
        assert!(parse("/anon sometimes").is_err());
        assert!(parse("hello").is_err());
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse("/anon on"), Ok(Some(Command::Anon(true))));
        assert_eq!(parse("/rooms"), Ok(Some(Command::Rooms)));
        assert_eq!(parse("/quit"), Ok(Some(Command::Quit)));
        assert_eq!(parse("/accept"), Ok(Some(Command::Accept)));
    }
}
