//! Fault injection.

use lkm_driver_api::AcquireError;

/// Which host operations should fail.
///
/// The default plan injects nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultPlan {
    /// Fail the n-th acquisition (1-indexed, counted across the whole host).
    pub fail_nth_acquire: Option<(usize, AcquireError)>,
    /// Fail every acquisition of these labels.
    pub fail_labels: Vec<(String, AcquireError)>,
    /// Fail the release of these labels. The resource stays registered.
    pub fail_releases: Vec<String>,
    /// Refuse every thread spawn.
    pub deny_spawn: bool,
    /// Fault every user copy on files opened at these paths.
    pub fault_copies: Vec<String>,
}

impl FaultPlan {
    /// A plan that injects nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// Fails the `n`-th acquisition with `reason`.
    #[must_use]
    pub fn fail_acquire_at(mut self, n: usize, reason: AcquireError) -> Self {
        self.fail_nth_acquire = Some((n, reason));
        self
    }

    /// Fails every acquisition of `label` with `reason`.
    #[must_use]
    pub fn fail_acquire_of(mut self, label: &str, reason: AcquireError) -> Self {
        self.fail_labels.push((label.to_owned(), reason));
        self
    }

    /// Fails the release of `label`.
    #[must_use]
    pub fn fail_release_of(mut self, label: &str) -> Self {
        self.fail_releases.push(label.to_owned());
        self
    }

    /// Refuses every thread spawn.
    #[must_use]
    pub fn deny_spawns(mut self) -> Self {
        self.deny_spawn = true;
        self
    }

    /// Faults user copies on `path`.
    #[must_use]
    pub fn fault_copies_on(mut self, path: &str) -> Self {
        self.fault_copies.push(path.to_owned());
        self
    }

    pub(crate) fn acquire_fault(&self, nth: usize, label: &str) -> Option<AcquireError> {
        if let Some((n, reason)) = self.fail_nth_acquire {
            if n == nth {
                return Some(reason);
            }
        }
        self.fail_labels
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, reason)| *reason)
    }

    pub(crate) fn release_faults(&self, label: &str) -> bool {
        self.fail_releases.iter().any(|l| l == label)
    }

    pub(crate) fn copy_faults(&self, path: &str) -> bool {
        self.fault_copies.iter().any(|p| p == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nth_and_label_faults() {
        let plan = FaultPlan::none()
            .fail_acquire_at(2, AcquireError::OutOfMemory)
            .fail_acquire_of("cls", AcquireError::NameCollision);
        assert_eq!(plan.acquire_fault(1, "x"), None);
        assert_eq!(plan.acquire_fault(2, "x"), Some(AcquireError::OutOfMemory));
        assert_eq!(plan.acquire_fault(7, "cls"), Some(AcquireError::NameCollision));
    }

    #[test]
    fn release_and_copy_faults() {
        let plan = FaultPlan::none()
            .fail_release_of("cls")
            .fault_copies_on("/dev/chardev");
        assert!(plan.release_faults("cls"));
        assert!(!plan.release_faults("other"));
        assert!(plan.copy_faults("/dev/chardev"));
        assert!(!plan.deny_spawn);
        assert!(FaultPlan::none().deny_spawns().deny_spawn);
    }
}
