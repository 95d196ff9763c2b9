//! Line grammar: `--subsystem=<S> handle --devpath=<D> --udevaction=<A>\n`
//!
//! Every event is a single line written with a single `write(2)`, so the
//! encoded size must stay under `PIPE_BUF` for concurrent writers not to
//! interleave.

use super::error::MalformedEventError;
use super::event::{HotplugAction, HotplugEvent};

/// Largest line, newline included, a writer may put on the channel (`PIPE_BUF` on Linux)
pub const MAX_EVENT_LINE: usize = 4096;

const SUBSYSTEM_FLAG: &str = "--subsystem=";
const HANDLE_VERB: &str = "handle";
const DEVPATH_FLAG: &str = "--devpath=";
const ACTION_FLAG: &str = "--udevaction=";

/// Encode raw event fields as a wire line, without the trailing newline.
///
/// Field values are not interpreted here; the handler validates them. Only
/// what would break framing is refused.
pub fn encode_line(
    subsystem: &str,
    devpath: &str,
    action: &str,
) -> Result<String, MalformedEventError> {
    for (field, value) in [
        ("--subsystem", subsystem),
        ("--devpath", devpath),
        ("--udevaction", action),
    ] {
        if value.is_empty() {
            return Err(MalformedEventError::MissingValue(field));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(MalformedEventError::Whitespace { field });
        }
    }

    let line = format!(
        "{SUBSYSTEM_FLAG}{subsystem} {HANDLE_VERB} {DEVPATH_FLAG}{devpath} {ACTION_FLAG}{action}"
    );

    // +1 for the newline the writer appends
    let size = line.len() + 1;
    if size > MAX_EVENT_LINE {
        return Err(MalformedEventError::TooLarge {
            size,
            limit: MAX_EVENT_LINE,
        });
    }

    Ok(line)
}

/// Parse one channel line. A single trailing `\n` is tolerated; anything else
/// that deviates from the grammar is rejected.
pub fn parse_line(line: &str) -> Result<HotplugEvent, MalformedEventError> {
    let body = line.strip_suffix('\n').unwrap_or(line);
    if body.is_empty() {
        return Err(MalformedEventError::Empty);
    }
    if body.contains(|c: char| c == '\n' || c == '\r') {
        return Err(MalformedEventError::UnexpectedToken {
            position: 0,
            token: body.to_string(),
        });
    }

    let tokens: Vec<&str> = body.split(' ').collect();
    if tokens.len() != 4 {
        return Err(MalformedEventError::TokenCount(tokens.len()));
    }

    let subsystem = flag_value(&tokens, 0, SUBSYSTEM_FLAG, "--subsystem")?;
    if tokens[1] != HANDLE_VERB {
        return Err(MalformedEventError::UnexpectedToken {
            position: 1,
            token: tokens[1].to_string(),
        });
    }
    let devpath = flag_value(&tokens, 2, DEVPATH_FLAG, "--devpath")?;
    let action: HotplugAction = flag_value(&tokens, 3, ACTION_FLAG, "--udevaction")?.parse()?;

    HotplugEvent::new(subsystem, devpath, action)
}

fn flag_value<'a>(
    tokens: &[&'a str],
    position: usize,
    flag: &str,
    name: &'static str,
) -> Result<&'a str, MalformedEventError> {
    let token = tokens[position];
    let value = token
        .strip_prefix(flag)
        .ok_or_else(|| MalformedEventError::UnexpectedToken {
            position,
            token: token.to_string(),
        })?;

    if value.is_empty() {
        return Err(MalformedEventError::MissingValue(name));
    }
    Ok(value)
}

impl HotplugEvent {
    /// Wire line for this event, without the trailing newline
    pub fn to_wire(&self) -> String {
        format!(
            "{SUBSYSTEM_FLAG}{} {HANDLE_VERB} {DEVPATH_FLAG}{} {ACTION_FLAG}{}",
            self.subsystem, self.devpath, self.action
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ETH1_ADD: &str = "--subsystem=net handle --devpath=/devices/pci0000:00/net/eth1 --udevaction=add";

    #[test]
    fn test_encode_matches_grammar() {
        let line = encode_line("net", "/devices/pci0000:00/net/eth1", "add").unwrap();
        assert_eq!(line, ETH1_ADD);
    }

    #[test]
    fn test_encode_rejects_framing_hazards() {
        assert_eq!(
            encode_line("net", "", "add"),
            Err(MalformedEventError::MissingValue("--devpath"))
        );
        assert_eq!(
            encode_line("net", "/devices/net/eth0\n--subsystem=x", "add"),
            Err(MalformedEventError::Whitespace { field: "--devpath" })
        );

        let long_path = format!("/devices/{}", "a".repeat(MAX_EVENT_LINE));
        assert!(matches!(
            encode_line("net", &long_path, "add"),
            Err(MalformedEventError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_parse_valid_line() {
        let event = parse_line(&format!("{ETH1_ADD}\n")).unwrap();
        assert_eq!(event.subsystem, "net");
        assert_eq!(event.devpath, "/devices/pci0000:00/net/eth1");
        assert_eq!(event.action, HotplugAction::Add);
        assert_eq!(event.to_wire(), ETH1_ADD);
    }

    #[test]
    fn test_parse_rejects_deviations() {
        let cases = [
            "",
            "\n",
            " --subsystem=net handle --devpath=/devices/net/eth0 --udevaction=add",
            "--subsystem=net handle --devpath=/devices/net/eth0 --udevaction=add\r\n",
            "--subsystem=net handle  --devpath=/devices/net/eth0 --udevaction=add",
            "--subsystem=net run --devpath=/devices/net/eth0 --udevaction=add",
            "--devpath=/devices/net/eth0 handle --subsystem=net --udevaction=add",
            "--subsystem= handle --devpath=/devices/net/eth0 --udevaction=add",
            "--subsystem=net handle --devpath= --udevaction=add",
            "--subsystem=net handle --devpath=/devices/net/eth0 --udevaction=bind",
            "--subsystem=net handle --devpath=/devices/net/eth0 --udevaction=add extra",
            "--subsystem=net handle --devpath=/devices/net/eth0 --udevaction=add\n\n",
            "garbage",
        ];

        for case in cases {
            assert!(parse_line(case).is_err(), "accepted malformed line {case:?}");
        }
    }

    #[test]
    fn test_parse_reports_unknown_action() {
        let err = parse_line("--subsystem=net handle --devpath=/devices/net/eth0 --udevaction=bind")
            .unwrap_err();
        assert_eq!(err, MalformedEventError::UnknownAction("bind".to_string()));
    }
}
