// ABOUTME: Command builders for the remote tools the lab drives (apt, pct, systemctl, docker).
// ABOUTME: Arguments are POSIX-quoted; generated content always travels as a base64 payload.

mod apt;
mod gluster;
mod pct;
mod swarm;
mod system;
mod systemctl;

pub use apt::Apt;
pub use gluster::Gluster;
pub use pct::{CreateOptions, Pct, PctStatus, Pveam, Vzdump};
pub use swarm::{Swarm, SwarmRole};
pub use system::{Dpkg, Files, Net, Process, Sed, Users};
pub use systemctl::SystemCtl;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::borrow::Cow;

/// Quote one shell word so the remote shell sees it verbatim.
///
/// Words made only of safe characters are returned unchanged.
pub fn quote(word: &str) -> Cow<'_, str> {
    let safe = !word.is_empty()
        && word
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"@%+=:,./-_".contains(&b));
    if safe {
        Cow::Borrowed(word)
    } else {
        Cow::Owned(format!("'{}'", word.replace('\'', "'\"'\"'")))
    }
}

/// Base64-encode content for transport through any number of shell layers.
pub fn encode(content: &str) -> String {
    STANDARD.encode(content.as_bytes())
}

/// Pipe decoded content into a consumer command: `echo B64 | base64 -d | consumer`.
pub fn pipe_decoded(content: &str, consumer: &str) -> String {
    format!("echo {} | base64 -d | {}", encode(content), consumer)
}

/// Join commands so each runs only if the previous one succeeded.
pub fn and_then<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    parts
        .into_iter()
        .map(|p| p.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(" && ")
}

/// Run a command as root from a non-root login, failing instead of prompting.
pub fn sudo(command: &str) -> String {
    format!("sudo -n bash -c {} < /dev/null", quote(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_words_are_not_quoted() {
        assert_eq!(quote("openssh-server"), "openssh-server");
        assert_eq!(quote("/etc/apt/sources.list"), "/etc/apt/sources.list");
    }

    #[test]
    fn unsafe_words_are_single_quoted() {
        assert_eq!(quote("two words"), "'two words'");
        assert_eq!(quote(""), "''");
        assert_eq!(quote("it's"), "'it'\"'\"'s'");
    }

    #[test]
    fn payload_round_trips_through_base64() {
        let content = "line 'one'\n\"two\" $HOME `x`\n";
        let encoded = encode(content);
        let decoded = STANDARD.decode(encoded.as_bytes()).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), content);
        assert!(
            encoded
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "+/=".contains(c))
        );
    }

    #[test]
    fn pipe_decoded_has_no_raw_content() {
        let cmd = pipe_decoded("root:p'ss", "chpasswd");
        assert!(cmd.starts_with("echo "));
        assert!(cmd.ends_with(" | base64 -d | chpasswd"));
        assert!(!cmd.contains("p'ss"));
    }

    #[test]
    fn and_then_joins_with_conjunction() {
        assert_eq!(and_then(["a", "b", "c"]), "a && b && c");
    }
}
