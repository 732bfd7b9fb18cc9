// ABOUTME: Diagnostics accumulator for non-fatal warnings during a lab run.
// ABOUTME: Collects problems that shouldn't abort provisioning but should be shown to users.

/// Collects non-fatal warnings during provisioning.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Record a warning, auto-logging it via tracing.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!("{}", warning.message);
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// A non-fatal warning collected during provisioning.
#[derive(Debug, Clone)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn lock_release(message: impl Into<String>) -> Self {
        Self::new(WarningKind::LockRelease, message)
    }

    pub fn ssh_disconnect(message: impl Into<String>) -> Self {
        Self::new(WarningKind::SshDisconnect, message)
    }

    pub fn source_fixup(message: impl Into<String>) -> Self {
        Self::new(WarningKind::SourceFixup, message)
    }

    pub fn container_features(message: impl Into<String>) -> Self {
        Self::new(WarningKind::ContainerFeatures, message)
    }

    pub fn rollback(message: impl Into<String>) -> Self {
        Self::new(WarningKind::Rollback, message)
    }

    pub fn cleanup(message: impl Into<String>) -> Self {
        Self::new(WarningKind::Cleanup, message)
    }
}

/// Categories of warnings that can occur during provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// Failed to release the deploy lock (lock file may remain).
    LockRelease,
    /// Failed to cleanly close an SSH session.
    SshDisconnect,
    /// An apt sources rewrite step failed.
    SourceFixup,
    /// Container feature flags could not be set.
    ContainerFeatures,
    /// Destroying a failed container did not complete.
    Rollback,
    /// A cleanup step left something behind.
    Cleanup,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_starts_empty() {
        let diag = Diagnostics::default();
        assert!(!diag.has_warnings());
        assert!(diag.warnings().is_empty());
    }

    #[test]
    fn diagnostics_collects_warnings() {
        let mut diag = Diagnostics::default();

        diag.warn(Warning::lock_release("failed to remove lock file"));
        diag.warn(Warning::source_fixup("sed exited 2"));

        assert!(diag.has_warnings());
        assert_eq!(diag.warnings().len(), 2);
    }

    #[test]
    fn warning_constructors_set_correct_kind() {
        assert_eq!(Warning::ssh_disconnect("x").kind, WarningKind::SshDisconnect);
        assert_eq!(
            Warning::container_features("x").kind,
            WarningKind::ContainerFeatures
        );
        assert_eq!(Warning::rollback("x").kind, WarningKind::Rollback);
    }
}
