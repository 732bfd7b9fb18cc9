// ABOUTME: Builders for file, user, process, dpkg, sed, and network probe commands.
// ABOUTME: Content such as files, passwords, and keys is always shipped base64-encoded.

use super::{and_then, pipe_decoded, quote};

pub struct Files;

impl Files {
    /// Write `content` to `path` without exposing it to shell parsing.
    pub fn write(path: &str, content: &str) -> String {
        pipe_decoded(content, &format!("tee {} > /dev/null", quote(path)))
    }

    pub fn chmod(path: &str, mode: &str) -> String {
        format!("chmod {} {}", quote(mode), quote(path))
    }

    pub fn move_to(from: &str, to: &str) -> String {
        format!("mv -f {} {}", quote(from), quote(to))
    }

    /// `rm -f` that never fails, so repeating it is harmless.
    pub fn remove(path: &str) -> String {
        format!("rm -f {} || true", quote(path))
    }

    /// Prints `exists` when `path` is a regular file.
    pub fn exists(path: &str) -> String {
        format!("test -f {} && echo exists || echo missing", quote(path))
    }

    pub fn parse_exists(output: &str) -> bool {
        output.lines().any(|l| l.trim() == "exists")
    }

    pub fn list_matching(dir: &str, suffix: &str) -> String {
        format!("ls -lh {}/*.{suffix} 2>/dev/null || true", dir.trim_end_matches('/'))
    }
}

pub struct Users;

impl Users {
    /// Create `user` with a home directory unless it already exists.
    pub fn ensure(user: &str, group: &str) -> String {
        format!(
            "id -u {u} >/dev/null 2>&1 || useradd -m -s /bin/bash -G {g} {u} 2>&1",
            u = quote(user),
            g = quote(group)
        )
    }

    pub fn set_password(user: &str, password: &str) -> String {
        pipe_decoded(&format!("{user}:{password}"), "chpasswd")
    }

    /// Passwordless sudo drop-in, mode 0440.
    pub fn sudoers(user: &str) -> String {
        let path = format!("/etc/sudoers.d/{user}");
        and_then([
            Files::write(&path, &format!("{user} ALL=(ALL) NOPASSWD: ALL\n")),
            Files::chmod(&path, "440"),
        ])
    }

    /// Install `public_key` as the only authorized key of `user`.
    pub fn authorized_key(user: &str, public_key: &str) -> String {
        let home = if user == "root" {
            "/root".to_string()
        } else {
            format!("/home/{user}")
        };
        let ssh_dir = format!("{home}/.ssh");
        let keys = format!("{ssh_dir}/authorized_keys");
        and_then([
            format!("mkdir -p {}", quote(&ssh_dir)),
            pipe_decoded(&format!("{public_key}\n"), &format!("tee {} > /dev/null", quote(&keys))),
            Files::chmod(&keys, "600"),
            format!("chown -R {u}:{u} {}", quote(&ssh_dir), u = quote(user)),
            Files::chmod(&ssh_dir, "700"),
        ])
    }
}

pub struct Process;

impl Process {
    /// Kill processes whose name is exactly `name`; succeeds when none run.
    pub fn kill_named(name: &str) -> String {
        format!("pkill -9 -x {} 2>/dev/null || true", quote(name))
    }

    /// Kill processes whose command line matches `pattern`; succeeds when none match.
    pub fn kill_matching(pattern: &str) -> String {
        format!("pkill -9 -f {} 2>/dev/null || true", quote(&self_excluding(pattern)))
    }

    /// Kill every process in the session led by `bash -s MARKER`.
    pub fn kill_session(marker: &str) -> String {
        format!(
            "sids=$(pgrep -d, -f {}); [ -z \"$sids\" ] || pkill -KILL -s \"$sids\"",
            quote(&format!("^bash -s {marker}$"))
        )
    }

    pub fn running_named(name: &str) -> String {
        format!("pgrep -x {} >/dev/null 2>&1", quote(name))
    }

    pub fn running_matching(pattern: &str) -> String {
        format!("pgrep -f {} >/dev/null 2>&1", quote(&self_excluding(pattern)))
    }
}

/// Turn `pattern` into a regex that cannot match the shell running it
/// (`apt.systemd.daily` becomes `[a]pt.systemd.daily`).
fn self_excluding(pattern: &str) -> String {
    let mut chars = pattern.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => format!("[{first}]{}", chars.as_str()),
        _ => pattern.to_string(),
    }
}

pub struct Dpkg;

impl Dpkg {
    /// Finish interrupted package configuration, logging to `log_file`.
    pub fn configure_pending(log_file: &str) -> String {
        format!("dpkg --configure -a > {} 2>&1 || true", quote(log_file))
    }

    pub fn lock_held(lock_file: &str) -> String {
        format!("fuser {} >/dev/null 2>&1", quote(lock_file))
    }

    pub fn is_installed(package: &str) -> String {
        format!(
            "dpkg -s {} 2>/dev/null | grep -q '^Status: install ok installed' && echo installed || echo not_installed",
            quote(package)
        )
    }
}

pub struct Sed;

impl Sed {
    /// In-place global replacement using `delimiter` as the `s` separator.
    pub fn replace(file: &str, from: &str, to: &str, delimiter: char) -> String {
        let expr = format!("s{d}{from}{d}{to}{d}g", d = delimiter);
        format!("sed -i {} {}", quote(&expr), quote(file))
    }
}

pub struct Net;

impl Net {
    pub fn probe_tcp(address: &str, port: u16) -> String {
        format!("nc -zv -w 3 {address} {port} 2>&1")
    }

    /// `nc -zv` reports success as "open" (BSD) or "succeeded" (OpenBSD/GNU).
    pub fn parse_probe(output: &str) -> bool {
        let lower = output.to_lowercase();
        lower.contains("open") || lower.contains("succeeded")
    }

    pub fn ping(address: &str) -> String {
        format!("ping -c 1 -W 2 {address} 2>&1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_write_hides_content() {
        let cmd = Files::write("/etc/apt/apt.conf.d/01proxy", "Acquire::http::Proxy \"x\";\n");
        assert!(cmd.ends_with("| base64 -d | tee /etc/apt/apt.conf.d/01proxy > /dev/null"));
        assert!(!cmd.contains("Acquire"));
    }

    #[test]
    fn remove_is_idempotent_by_construction() {
        assert_eq!(
            Files::remove("/var/lib/dpkg/lock"),
            "rm -f /var/lib/dpkg/lock || true"
        );
    }

    #[test]
    fn pattern_kill_cannot_match_itself() {
        assert_eq!(
            Process::kill_matching("apt.systemd.daily"),
            "pkill -9 -f '[a]pt.systemd.daily' 2>/dev/null || true"
        );
        assert_eq!(
            Process::kill_named("apt-get"),
            "pkill -9 -x apt-get 2>/dev/null || true"
        );
    }

    #[test]
    fn session_kill_targets_marked_shell() {
        assert_eq!(
            Process::kill_session("pvelab-run-9-3"),
            "sids=$(pgrep -d, -f '^bash -s pvelab-run-9-3$'); [ -z \"$sids\" ] || pkill -KILL -s \"$sids\""
        );
    }

    #[test]
    fn sed_replace_with_custom_delimiter() {
        assert_eq!(
            Sed::replace(
                "/etc/apt/sources.list",
                "old-releases.ubuntu.com",
                "archive.ubuntu.com",
                '|'
            ),
            "sed -i 's|old-releases.ubuntu.com|archive.ubuntu.com|g' /etc/apt/sources.list"
        );
    }

    #[test]
    fn user_commands() {
        assert_eq!(
            Users::ensure("ops", "sudo"),
            "id -u ops >/dev/null 2>&1 || useradd -m -s /bin/bash -G sudo ops 2>&1"
        );
        let pw = Users::set_password("ops", "s3cr'et");
        assert!(pw.ends_with("| base64 -d | chpasswd"));
        assert!(!pw.contains("s3cr"));
        let keys = Users::authorized_key("root", "ssh-ed25519 AAAA test");
        assert!(keys.starts_with("mkdir -p /root/.ssh && "));
        assert!(keys.contains("chmod 700 /root/.ssh"));
    }

    #[test]
    fn probe_output_parsing() {
        assert!(Net::parse_probe("Connection to 10.0.0.2 3142 port [tcp/*] succeeded!"));
        assert!(Net::parse_probe("10.0.0.2 (10.0.0.2:5432) open"));
        assert!(!Net::parse_probe("nc: connect to 10.0.0.2 port 80 (tcp) failed: Connection refused"));
    }
}
