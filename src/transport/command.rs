// ABOUTME: Validates commands and assembles the string actually sent over SSH.
// ABOUTME: Container-bound commands travel as a base64 payload piped into bash.

use super::ExecutionTarget;
use crate::shell;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("command is empty")]
    Empty,

    #[error("command contains a NUL byte at offset {0}")]
    NulByte(usize),

    #[error("assembled command has an unterminated {0} quote")]
    UnbalancedQuotes(QuoteKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteKind {
    Single,
    Double,
}

impl std::fmt::Display for QuoteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuoteKind::Single => write!(f, "single"),
            QuoteKind::Double => write!(f, "double"),
        }
    }
}

/// Build the SSH-level command for `target`.
///
/// Host targets run the command as given. Container targets receive it as
/// `pct exec ID -- bash -c "echo B64 | base64 -d | bash"`, so no byte of the
/// original command is ever interpreted by the host shell.
pub fn assemble(target: &ExecutionTarget, command: &str) -> Result<String, CommandError> {
    build(target, command, "bash")
}

/// Like [`assemble`], but the container-side shell leads its own session and
/// carries `marker` on its command line, so the whole process tree can be
/// killed later with [`shell::Process::kill_session`].
pub fn assemble_marked(
    target: &ExecutionTarget,
    command: &str,
    marker: &str,
) -> Result<String, CommandError> {
    build(target, command, &format!("setsid -w bash -s {marker}"))
}

fn build(target: &ExecutionTarget, command: &str, consumer: &str) -> Result<String, CommandError> {
    if command.trim().is_empty() {
        return Err(CommandError::Empty);
    }
    if let Some(offset) = command.find('\0') {
        return Err(CommandError::NulByte(offset));
    }

    let assembled = match target.vmid() {
        Some(vmid) => format!(
            "pct exec {} -- bash -c \"{}\"",
            vmid,
            shell::pipe_decoded(command, consumer)
        ),
        None => command.to_string(),
    };

    check_quotes(&assembled)?;
    Ok(assembled)
}

/// Check that every quote opened in `command` is closed, following POSIX shell rules.
///
/// Backslash escapes apply outside quotes and inside double quotes. Comments
/// (a `#` starting a word) run to end of line and are not scanned.
pub fn check_quotes(command: &str) -> Result<(), CommandError> {
    #[derive(PartialEq)]
    enum State {
        Plain,
        Single,
        Double,
        Comment,
    }

    let mut state = State::Plain;
    let mut word_start = true;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match state {
            State::Plain => {
                match c {
                    '\\' => {
                        chars.next();
                    }
                    '\'' => state = State::Single,
                    '"' => state = State::Double,
                    '#' if word_start => state = State::Comment,
                    _ => {}
                }
                word_start = c.is_whitespace() || matches!(c, ';' | '&' | '|' | '(' | ')');
            }
            State::Single => {
                if c == '\'' {
                    state = State::Plain;
                    word_start = false;
                }
            }
            State::Double => match c {
                '\\' => {
                    chars.next();
                }
                '"' => {
                    state = State::Plain;
                    word_start = false;
                }
                _ => {}
            },
            State::Comment => {
                if c == '\n' {
                    state = State::Plain;
                    word_start = true;
                }
            }
        }
    }

    match state {
        State::Single => Err(CommandError::UnbalancedQuotes(QuoteKind::Single)),
        State::Double => Err(CommandError::UnbalancedQuotes(QuoteKind::Double)),
        State::Plain | State::Comment => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HostAddress;
    use crate::types::Vmid;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    fn host() -> ExecutionTarget {
        ExecutionTarget::host(HostAddress::new("root", "pve"))
    }

    fn container() -> ExecutionTarget {
        ExecutionTarget::container(HostAddress::new("root", "pve"), Vmid::new(104).unwrap())
    }

    #[test]
    fn host_command_passes_through() {
        assert_eq!(assemble(&host(), "pct list 2>&1").unwrap(), "pct list 2>&1");
    }

    #[test]
    fn container_command_is_base64_wrapped() {
        let cmd = "echo 'it'\"'\"'s' > \"/tmp/a b\"";
        let assembled = assemble(&container(), cmd).unwrap();
        assert!(assembled.starts_with("pct exec 104 -- bash -c \"echo "));
        assert!(assembled.ends_with(" | base64 -d | bash\""));

        let payload = assembled
            .trim_start_matches("pct exec 104 -- bash -c \"echo ")
            .trim_end_matches(" | base64 -d | bash\"");
        let decoded = STANDARD.decode(payload).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), cmd);
    }

    #[test]
    fn marked_container_command_runs_in_own_session() {
        let assembled = assemble_marked(&container(), "apt-get update", "pvelab-run-1-7").unwrap();
        assert!(assembled.starts_with("pct exec 104 -- bash -c \"echo "));
        assert!(assembled.ends_with(" | base64 -d | setsid -w bash -s pvelab-run-1-7\""));
    }

    #[test]
    fn marked_host_command_passes_through() {
        assert_eq!(
            assemble_marked(&host(), "pct list 2>&1", "pvelab-run-1-8").unwrap(),
            "pct list 2>&1"
        );
    }

    #[test]
    fn container_accepts_commands_unbalanced_on_their_own() {
        // The payload is opaque to the host shell, so only the envelope is checked.
        assert!(assemble(&container(), "echo \"unterminated").is_ok());
    }

    #[test]
    fn rejects_empty_and_nul() {
        assert_eq!(assemble(&host(), "").unwrap_err(), CommandError::Empty);
        assert_eq!(assemble(&host(), "   \n").unwrap_err(), CommandError::Empty);
        assert_eq!(
            assemble(&container(), "echo a\0b").unwrap_err(),
            CommandError::NulByte(6)
        );
    }

    #[test]
    fn rejects_unbalanced_host_commands() {
        assert_eq!(
            assemble(&host(), "echo 'oops").unwrap_err(),
            CommandError::UnbalancedQuotes(QuoteKind::Single)
        );
        assert_eq!(
            assemble(&host(), "echo \"oops").unwrap_err(),
            CommandError::UnbalancedQuotes(QuoteKind::Double)
        );
    }

    #[test]
    fn quote_scanner_follows_shell_rules() {
        assert!(check_quotes(r#"echo "a \" b""#).is_ok());
        assert!(check_quotes(r"echo it\'s").is_ok());
        assert!(check_quotes(r#"echo 'a "b" c'"#).is_ok());
        assert!(check_quotes(r"echo 'no \' escapes'").is_err());
        assert!(check_quotes("# don't care\necho ok").is_ok());
        assert!(check_quotes("echo a#'b").is_err());
    }
}
