//! Ordered resource registration with rollback.
//!
//! A module claims its resources through a by-value [`Registration`]
//! builder. Each [`Registration::acquire`] either adds one handle or, on
//! failure, releases everything acquired so far in reverse order and
//! reports the failed step in a [`RegistrationError`]. Once every step has
//! succeeded, [`Registration::finish`] yields a [`DriverActive`], which
//! releases all handles in reverse order on [`DriverActive::teardown`] or
//! when dropped.

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use lkm_core::id::DevNum;
use lkm_core::{pr_debug, pr_err};

use crate::error::{RegistrationError, ReleaseError};
use crate::resource::{self, ResourceHandle, ResourceKind, ResourceLabel, ResourceSpec};
use crate::services::ModuleServices;

/// Outcome of a teardown.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    /// Resources released successfully, in release order.
    pub released: Vec<ResourceLabel>,
    /// Resources whose release failed, in release order.
    pub failed: Vec<(ResourceLabel, ReleaseError)>,
}

impl TeardownReport {
    /// Returns `true` if every release succeeded.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Releases `handles` from last to first. Release errors are logged and the
/// walk continues.
fn release_reverse(
    driver: &str,
    services: &dyn ModuleServices,
    handles: &mut Vec<ResourceHandle>,
) -> (Vec<ResourceLabel>, TeardownReport) {
    let mut order = Vec::with_capacity(handles.len());
    let mut report = TeardownReport::default();
    while let Some(handle) = handles.pop() {
        let label = handle.describe();
        match services.release(&handle) {
            Ok(()) => {
                pr_debug!("{driver}: released {label}");
                report.released.push(label.clone());
            }
            Err(e) => {
                pr_err!("{driver}: failed to release {label}: {e} ({})", e.errno());
                report.failed.push((label.clone(), e));
            }
        }
        order.push(label);
    }
    (order, report)
}

/// In-progress registration of a driver's resources.
#[must_use = "an unfinished registration releases its resources when dropped"]
pub struct Registration {
    driver: String,
    services: Arc<dyn ModuleServices>,
    handles: Vec<ResourceHandle>,
}

impl Registration {
    /// Starts an empty registration for `driver`.
    pub fn new(driver: &str, services: Arc<dyn ModuleServices>) -> Self {
        Self {
            driver: driver.to_string(),
            services,
            handles: Vec::new(),
        }
    }

    /// Acquires the next resource.
    ///
    /// # Errors
    ///
    /// If the host refuses the resource, every handle acquired so far is
    /// released in reverse order and the failure is returned with the
    /// 1-indexed step number and the labels that were rolled back.
    pub fn acquire(mut self, spec: ResourceSpec) -> Result<Self, RegistrationError> {
        let step = self.handles.len() + 1;
        match self.services.acquire(&spec, &self.handles) {
            Ok(token) => {
                let handle = ResourceHandle::new(&spec, token);
                pr_debug!(
                    "{}: step {step}: acquired {} ({:#x})",
                    self.driver,
                    handle.describe(),
                    token.raw()
                );
                self.handles.push(handle);
                Ok(self)
            }
            Err(reason) => {
                pr_err!(
                    "{}: step {step}: cannot acquire {} `{}`: {reason} ({})",
                    self.driver,
                    spec.kind().name(),
                    spec.label(),
                    reason.errno()
                );
                let rolled_back = self.unwind();
                Err(RegistrationError {
                    driver: core::mem::take(&mut self.driver),
                    step,
                    kind: spec.kind(),
                    label: spec.label().to_string(),
                    reason,
                    rolled_back,
                })
            }
        }
    }

    /// Handles acquired so far, in acquisition order.
    pub fn acquired(&self) -> &[ResourceHandle] {
        &self.handles
    }

    /// Finds an acquired handle by kind and label.
    pub fn find(&self, kind: ResourceKind, label: &str) -> Option<&ResourceHandle> {
        resource::find(&self.handles, kind, label)
    }

    /// Gives up the registration, releasing everything in reverse order.
    ///
    /// Returns the released labels, most recent first.
    pub fn abort(mut self) -> Vec<ResourceLabel> {
        self.unwind()
    }

    /// Completes the registration.
    pub fn finish(mut self) -> DriverActive {
        DriverActive {
            driver: core::mem::take(&mut self.driver),
            services: Arc::clone(&self.services),
            handles: core::mem::take(&mut self.handles),
        }
    }

    fn unwind(&mut self) -> Vec<ResourceLabel> {
        let (order, _) = release_reverse(&self.driver, &*self.services, &mut self.handles);
        order
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.unwind();
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("driver", &self.driver)
            .field("handles", &self.handles)
            .finish_non_exhaustive()
    }
}

/// A fully registered driver owning its handles.
pub struct DriverActive {
    driver: String,
    services: Arc<dyn ModuleServices>,
    handles: Vec<ResourceHandle>,
}

impl DriverActive {
    /// Returns the driver name.
    pub fn driver(&self) -> &str {
        &self.driver
    }

    /// Owned handles, in acquisition order.
    pub fn handles(&self) -> &[ResourceHandle] {
        &self.handles
    }

    /// Finds an owned handle by kind and label.
    pub fn find(&self, kind: ResourceKind, label: &str) -> Option<&ResourceHandle> {
        resource::find(&self.handles, kind, label)
    }

    /// Returns the first device number of the range labelled `region`.
    pub fn dev(&self, region: &str) -> Option<DevNum> {
        self.find(ResourceKind::Identifier, region).map(ResourceHandle::dev)
    }

    /// Releases every handle in reverse acquisition order.
    ///
    /// Never stops early: a failed release is logged and recorded in the
    /// report, and the remaining handles are still released.
    pub fn teardown(mut self) -> TeardownReport {
        self.release_all()
    }

    fn release_all(&mut self) -> TeardownReport {
        let (_, report) = release_reverse(&self.driver, &*self.services, &mut self.handles);
        report
    }
}

impl Drop for DriverActive {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.release_all();
        }
    }
}

impl fmt::Debug for DriverActive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverActive")
            .field("driver", &self.driver)
            .field("handles", &self.handles)
            .finish_non_exhaustive()
    }
}

/// Acquires `specs` in order.
///
/// # Errors
///
/// Returns the first failure, after rolling back every earlier step.
pub fn register_all(
    driver: &str,
    services: Arc<dyn ModuleServices>,
    specs: impl IntoIterator<Item = ResourceSpec>,
) -> Result<DriverActive, RegistrationError> {
    specs
        .into_iter()
        .try_fold(Registration::new(driver, services), Registration::acquire)
        .map(Registration::finish)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AcquireError;
    use crate::resource::ResourceToken;
    use std::sync::Mutex;

    /// Records every call; fails the n-th acquire or a named release.
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        fail_acquire_at: Option<usize>,
        fail_release_of: Option<&'static str>,
        acquires: Mutex<usize>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ModuleServices for Recorder {
        fn acquire(
            &self,
            spec: &ResourceSpec,
            acquired: &[ResourceHandle],
        ) -> Result<ResourceToken, AcquireError> {
            let mut n = self.acquires.lock().unwrap();
            *n += 1;
            if self.fail_acquire_at == Some(*n) {
                return Err(AcquireError::Denied);
            }
            self.events
                .lock()
                .unwrap()
                .push(format!("acquire {}", spec.label()));
            Ok(ResourceToken::new(acquired.len() as u64))
        }

        fn release(&self, handle: &ResourceHandle) -> Result<(), ReleaseError> {
            self.events
                .lock()
                .unwrap()
                .push(format!("release {}", handle.label()));
            if self.fail_release_of == Some(handle.label()) {
                return Err(ReleaseError::HostFault);
            }
            Ok(())
        }
    }

    fn specs() -> Vec<ResourceSpec> {
        vec![
            ResourceSpec::chrdev_region("a", 0, 1),
            ResourceSpec::class("b"),
            ResourceSpec::device("c", "b", "a", 0),
            ResourceSpec::class("d"),
        ]
    }

    #[test]
    fn all_steps_succeed_then_teardown_reverses() {
        let host = Arc::new(Recorder::default());
        let active = register_all("drv", host.clone(), specs()).unwrap();
        assert_eq!(active.handles().len(), 4);
        let report = active.teardown();
        assert!(report.is_clean());
        assert_eq!(
            host.events(),
            [
                "acquire a", "acquire b", "acquire c", "acquire d", "release d", "release c",
                "release b", "release a",
            ]
        );
    }

    #[test]
    fn failure_rolls_back_earlier_steps_in_reverse() {
        let host = Arc::new(Recorder {
            fail_acquire_at: Some(3),
            ..Recorder::default()
        });
        let err = register_all("drv", host.clone(), specs()).unwrap_err();
        assert_eq!(err.step, 3);
        assert_eq!(err.kind, ResourceKind::DeviceNode);
        assert_eq!(err.label, "c");
        assert_eq!(err.reason, AcquireError::Denied);
        assert_eq!(
            err.rolled_back,
            [
                ResourceLabel::new(ResourceKind::Category, "b"),
                ResourceLabel::new(ResourceKind::Identifier, "a"),
            ]
        );
        assert_eq!(
            host.events(),
            ["acquire a", "acquire b", "release b", "release a"]
        );
    }

    #[test]
    fn first_step_failure_has_nothing_to_roll_back() {
        let host = Arc::new(Recorder {
            fail_acquire_at: Some(1),
            ..Recorder::default()
        });
        let err = register_all("drv", host.clone(), specs()).unwrap_err();
        assert_eq!(err.step, 1);
        assert!(err.rolled_back.is_empty());
        assert!(host.events().is_empty());
    }

    #[test]
    fn failed_release_is_reported_and_teardown_continues() {
        let host = Arc::new(Recorder {
            fail_release_of: Some("b"),
            ..Recorder::default()
        });
        let active = register_all("drv", host.clone(), specs()).unwrap();
        let report = active.teardown();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0.label, "b");
        assert_eq!(report.released.len(), 3);
        assert_eq!(
            host.events()[4..],
            ["release d", "release c", "release b", "release a"]
        );
    }

    #[test]
    fn dropping_unfinished_builder_unwinds() {
        let host = Arc::new(Recorder::default());
        {
            let reg = Registration::new("drv", host.clone())
                .acquire(ResourceSpec::chrdev_region("a", 0, 1))
                .unwrap()
                .acquire(ResourceSpec::class("b"))
                .unwrap();
            assert!(reg.find(ResourceKind::Category, "b").is_some());
        }
        assert_eq!(
            host.events(),
            ["acquire a", "acquire b", "release b", "release a"]
        );
    }

    #[test]
    fn abort_returns_released_labels() {
        let host = Arc::new(Recorder::default());
        let reg = Registration::new("drv", host.clone())
            .acquire(ResourceSpec::chrdev_region("a", 0, 1))
            .unwrap();
        let released = reg.abort();
        assert_eq!(released, [ResourceLabel::new(ResourceKind::Identifier, "a")]);
        assert_eq!(host.events(), ["acquire a", "release a"]);
    }

    #[test]
    fn dropping_active_driver_releases_everything_once() {
        let host = Arc::new(Recorder::default());
        drop(register_all("drv", host.clone(), specs()).unwrap());
        let releases = host
            .events()
            .iter()
            .filter(|e| e.starts_with("release"))
            .count();
        assert_eq!(releases, 4);
    }
}
