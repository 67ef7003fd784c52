//! Class, method and field access flags.

use bitflags::bitflags;

bitflags! {
    /// Access and property flags as they appear in the class file.
    ///
    /// Some bits are context-dependent: `SUPER`, `SYNCHRONIZED` and
    /// `OPEN` share 0x0020; `VOLATILE` and `BRIDGE` share 0x0040;
    /// `TRANSIENT` and `VARARGS` share 0x0080.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const SYNCHRONIZED = 0x0020;
        const VOLATILE = 0x0040;
        const BRIDGE = 0x0040;
        const TRANSIENT = 0x0080;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
    }
}

impl AccessFlags {
    /// True when none of the visibility bits are set (package-private).
    pub fn is_package_private(&self) -> bool {
        !self.intersects(AccessFlags::PUBLIC | AccessFlags::PRIVATE | AccessFlags::PROTECTED)
    }

    /// Returns these flags with visibility bits replaced by `visibility`.
    pub fn with_visibility(self, visibility: AccessFlags) -> Self {
        (self - (AccessFlags::PUBLIC | AccessFlags::PRIVATE | AccessFlags::PROTECTED)) | visibility
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_private() {
        assert!(AccessFlags::STATIC.is_package_private());
        assert!(!(AccessFlags::PUBLIC | AccessFlags::STATIC).is_package_private());
    }

    #[test]
    fn test_with_visibility() {
        let flags = AccessFlags::PRIVATE | AccessFlags::FINAL;
        let widened = flags.with_visibility(AccessFlags::PUBLIC);
        assert!(widened.contains(AccessFlags::PUBLIC));
        assert!(widened.contains(AccessFlags::FINAL));
        assert!(!widened.contains(AccessFlags::PRIVATE));
    }
}
