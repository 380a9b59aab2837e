//! Resource specs and handles.
//!
//! A [`ResourceSpec`] describes a host object a module wants to claim. Once
//! the host grants it, the module holds a [`ResourceHandle`] carrying the
//! opaque [`ResourceToken`] the host returned. Handles are neither `Clone`
//! nor `Copy`, and releasing one consumes it, so each is released once.

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use core::fmt;

use lkm_core::id::DevNum;

use crate::dyn_dispatch::DynFileOperations;

/// The kind of object a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A range of device numbers (`register_chrdev` / `alloc_chrdev_region`).
    Identifier,
    /// A device class (`class_create`).
    Category,
    /// A device node visible under `/dev` (`device_create`).
    DeviceNode,
    /// File operations bound to a device number range (`cdev_add`).
    InterfaceBinding,
    /// A file under `/proc` (`proc_create`).
    ProcEntry,
}

impl ResourceKind {
    /// Human-readable name used in log lines and error messages.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Identifier => "identifier",
            Self::Category => "class",
            Self::DeviceNode => "device node",
            Self::InterfaceBinding => "cdev",
            Self::ProcEntry => "proc entry",
        }
    }
}

/// Opaque value the host hands back for a granted resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceToken(u64);

impl ResourceToken {
    /// Wraps a raw host value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Encodes a device number as a token.
    pub const fn from_dev(dev: DevNum) -> Self {
        Self(dev.as_raw() as u64)
    }

    /// Returns the raw host value.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Reads the token as a device number.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn as_dev(self) -> DevNum {
        DevNum::from_raw(self.0 as u32)
    }
}

/// A request for one host resource.
#[derive(Clone)]
pub enum ResourceSpec {
    /// A device number range.
    Identifier {
        /// Name the range is registered under.
        name: String,
        /// Fixed major number, or `None` for a dynamically allocated one.
        major: Option<u32>,
        /// First minor of the range.
        first_minor: u32,
        /// Number of minors in the range.
        count: u32,
        /// File operations bound to the whole range, if any.
        fops: Option<Arc<dyn DynFileOperations>>,
    },
    /// File operations bound to part of an already acquired range.
    InterfaceBinding {
        /// Label of the [`ResourceSpec::Identifier`] to bind against.
        region: String,
        /// Number of minors bound.
        count: u32,
        /// The bound file operations.
        fops: Arc<dyn DynFileOperations>,
    },
    /// A device class.
    Category {
        /// Class name.
        name: String,
    },
    /// A device node.
    DeviceNode {
        /// Node name, visible as `/dev/<name>`.
        name: String,
        /// Label of the class the node belongs to.
        class: String,
        /// Label of the range the node's number comes from.
        region: String,
        /// Minor offset inside the range.
        minor: u32,
    },
    /// A procfs file.
    ProcEntry {
        /// Entry name, visible as `/proc/<name>`.
        name: String,
        /// Permission bits.
        mode: u16,
        /// File operations serving the entry.
        fops: Arc<dyn DynFileOperations>,
    },
}

impl ResourceSpec {
    /// One minor with a dynamic major and bound file operations
    /// (`register_chrdev(0, name, fops)`).
    pub fn chrdev(name: &str, fops: Arc<dyn DynFileOperations>) -> Self {
        Self::Identifier {
            name: name.to_string(),
            major: None,
            first_minor: 0,
            count: 1,
            fops: Some(fops),
        }
    }

    /// A dynamically allocated range with no file operations
    /// (`alloc_chrdev_region`).
    pub fn chrdev_region(name: &str, first_minor: u32, count: u32) -> Self {
        Self::Identifier {
            name: name.to_string(),
            major: None,
            first_minor,
            count,
            fops: None,
        }
    }

    /// Binds `fops` to `count` minors of the range labelled `region`.
    pub fn cdev(region: &str, count: u32, fops: Arc<dyn DynFileOperations>) -> Self {
        Self::InterfaceBinding {
            region: region.to_string(),
            count,
            fops,
        }
    }

    /// A device class.
    pub fn class(name: &str) -> Self {
        Self::Category {
            name: name.to_string(),
        }
    }

    /// A device node using minor offset `minor` of `region`.
    pub fn device(name: &str, class: &str, region: &str, minor: u32) -> Self {
        Self::DeviceNode {
            name: name.to_string(),
            class: class.to_string(),
            region: region.to_string(),
            minor,
        }
    }

    /// A procfs entry.
    pub fn proc_entry(name: &str, mode: u16, fops: Arc<dyn DynFileOperations>) -> Self {
        Self::ProcEntry {
            name: name.to_string(),
            mode,
            fops,
        }
    }

    /// Requests a fixed major. Has no effect on non-identifier specs.
    #[must_use]
    pub fn with_major(mut self, fixed: u32) -> Self {
        if let Self::Identifier { major, .. } = &mut self {
            *major = Some(fixed);
        }
        self
    }

    /// Returns the kind of resource this spec requests.
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Identifier { .. } => ResourceKind::Identifier,
            Self::InterfaceBinding { .. } => ResourceKind::InterfaceBinding,
            Self::Category { .. } => ResourceKind::Category,
            Self::DeviceNode { .. } => ResourceKind::DeviceNode,
            Self::ProcEntry { .. } => ResourceKind::ProcEntry,
        }
    }

    /// Returns the label the granted handle will carry.
    ///
    /// An interface binding is labelled after the range it binds.
    pub fn label(&self) -> &str {
        match self {
            Self::Identifier { name, .. }
            | Self::Category { name }
            | Self::DeviceNode { name, .. }
            | Self::ProcEntry { name, .. } => name,
            Self::InterfaceBinding { region, .. } => region,
        }
    }
}

impl fmt::Debug for ResourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier {
                name,
                major,
                first_minor,
                count,
                fops,
            } => f
                .debug_struct("Identifier")
                .field("name", name)
                .field("major", major)
                .field("first_minor", first_minor)
                .field("count", count)
                .field("fops", &fops.is_some())
                .finish(),
            Self::InterfaceBinding { region, count, .. } => f
                .debug_struct("InterfaceBinding")
                .field("region", region)
                .field("count", count)
                .finish_non_exhaustive(),
            Self::Category { name } => f.debug_struct("Category").field("name", name).finish(),
            Self::DeviceNode {
                name,
                class,
                region,
                minor,
            } => f
                .debug_struct("DeviceNode")
                .field("name", name)
                .field("class", class)
                .field("region", region)
                .field("minor", minor)
                .finish(),
            Self::ProcEntry { name, mode, .. } => f
                .debug_struct("ProcEntry")
                .field("name", name)
                .field("mode", &format_args!("{mode:#o}"))
                .finish_non_exhaustive(),
        }
    }
}

/// A granted host resource.
#[derive(Debug, PartialEq, Eq)]
pub struct ResourceHandle {
    kind: ResourceKind,
    label: String,
    token: ResourceToken,
}

impl ResourceHandle {
    pub(crate) fn new(spec: &ResourceSpec, token: ResourceToken) -> Self {
        Self {
            kind: spec.kind(),
            label: spec.label().to_string(),
            token,
        }
    }

    /// Returns the kind of resource.
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Returns the label the resource was registered under.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the host's token.
    pub fn token(&self) -> ResourceToken {
        self.token
    }

    /// Returns the token read as a device number.
    pub fn dev(&self) -> DevNum {
        self.token.as_dev()
    }

    /// Returns the kind and label, detached from the handle.
    pub fn describe(&self) -> ResourceLabel {
        ResourceLabel::new(self.kind, &self.label)
    }
}

/// Kind and label of a resource, kept after the handle itself is gone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceLabel {
    /// Kind of the resource.
    pub kind: ResourceKind,
    /// Label of the resource.
    pub label: String,
}

impl ResourceLabel {
    /// Creates a label.
    pub fn new(kind: ResourceKind, label: &str) -> Self {
        Self {
            kind,
            label: label.to_string(),
        }
    }
}

impl fmt::Display for ResourceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} `{}`", self.kind.name(), self.label)
    }
}

/// Finds the handle of the given kind and label in `handles`.
pub fn find<'a>(
    handles: &'a [ResourceHandle],
    kind: ResourceKind,
    label: &str,
) -> Option<&'a ResourceHandle> {
    handles
        .iter()
        .find(|h| h.kind == kind && h.label == label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_is_labelled_after_region() {
        let spec = ResourceSpec::class("cls");
        assert_eq!(spec.kind(), ResourceKind::Category);
        assert_eq!(spec.label(), "cls");

        let spec = ResourceSpec::device("node", "cls", "region", 0);
        assert_eq!(spec.kind(), ResourceKind::DeviceNode);
        assert_eq!(spec.label(), "node");
    }

    #[test]
    fn with_major_only_touches_identifiers() {
        let spec = ResourceSpec::chrdev_region("r", 0, 2).with_major(240);
        assert!(matches!(spec, ResourceSpec::Identifier { major: Some(240), .. }));

        let spec = ResourceSpec::class("c").with_major(240);
        assert!(matches!(spec, ResourceSpec::Category { .. }));
    }

    #[test]
    fn token_round_trips_device_numbers() {
        let dev = DevNum::new(254, 1);
        assert_eq!(ResourceToken::from_dev(dev).as_dev(), dev);
    }

    #[test]
    fn find_matches_kind_and_label() {
        let region = ResourceSpec::chrdev_region("dev", 0, 1);
        let class = ResourceSpec::class("dev");
        let handles = [
            ResourceHandle::new(&region, ResourceToken::from_dev(DevNum::new(254, 0))),
            ResourceHandle::new(&class, ResourceToken::new(7)),
        ];
        let found = find(&handles, ResourceKind::Category, "dev").unwrap();
        assert_eq!(found.token(), ResourceToken::new(7));
        assert_eq!(find(&handles, ResourceKind::Identifier, "dev").unwrap().dev().major(), 254);
        assert!(find(&handles, ResourceKind::DeviceNode, "dev").is_none());
    }

    #[test]
    fn label_display() {
        let label = ResourceLabel::new(ResourceKind::ProcEntry, "simple_procfs");
        assert_eq!(format!("{label}"), "proc entry `simple_procfs`");
    }
}
