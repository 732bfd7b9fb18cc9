// ABOUTME: Builder for non-interactive apt / apt-get command lines.
// ABOUTME: Produces `DEBIAN_FRONTEND=noninteractive apt-get -y ... 2>&1` style strings.

use super::quote;

#[derive(Debug, Clone, Default)]
pub struct Apt {
    apt_get: bool,
}

impl Apt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use apt-get instead of apt (stable CLI output, no progress bar).
    pub fn use_apt_get(mut self) -> Self {
        self.apt_get = true;
        self
    }

    fn base(&self, subcommand: &str, yes: bool) -> String {
        let tool = if self.apt_get { "apt-get" } else { "apt" };
        let mut cmd = format!("DEBIAN_FRONTEND=noninteractive {tool} ");
        cmd.push_str(subcommand);
        if yes {
            cmd.push_str(" -y");
        }
        cmd
    }

    fn with_packages(&self, subcommand: &str, packages: &[String]) -> String {
        let mut cmd = self.base(subcommand, true);
        for pkg in packages {
            cmd.push(' ');
            cmd.push_str(&quote(pkg));
        }
        cmd.push_str(" 2>&1");
        cmd
    }

    pub fn update(&self) -> String {
        format!("{} 2>&1", self.base("update", false))
    }

    pub fn upgrade(&self) -> String {
        format!("{} 2>&1", self.base("upgrade", true))
    }

    pub fn install(&self, packages: &[String]) -> String {
        self.with_packages("install", packages)
    }

    pub fn remove(&self, packages: &[String]) -> String {
        self.with_packages("remove", packages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkgs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn install_is_noninteractive() {
        let cmd = Apt::new().install(&pkgs(&["apt-cacher-ng", "curl"]));
        assert_eq!(
            cmd,
            "DEBIAN_FRONTEND=noninteractive apt install -y apt-cacher-ng curl 2>&1"
        );
    }

    #[test]
    fn apt_get_update() {
        let cmd = Apt::new().use_apt_get().update();
        assert_eq!(cmd, "DEBIAN_FRONTEND=noninteractive apt-get update 2>&1");
    }
}
