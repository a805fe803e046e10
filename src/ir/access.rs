//! Access flags for classes, fields and methods.
//!
//! Dalvik uses one flag word for all three entity kinds; which bits are
//! meaningful depends on where the word appears. The helpers below group the
//! queries the optimizer actually asks instead of exposing raw bit tests at
//! every call site.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Access and property flags as they appear in a Dalvik-style container.
    pub struct AccessFlags: u32 {
        /// Visible everywhere
        const PUBLIC = 0x0001;
        /// Visible only to the defining class
        const PRIVATE = 0x0002;
        /// Visible to the package and subclasses
        const PROTECTED = 0x0004;
        /// Per-class rather than per-instance
        const STATIC = 0x0008;
        /// No further mutation / overriding
        const FINAL = 0x0010;
        /// Method wraps a monitor enter/exit pair
        const SYNCHRONIZED = 0x0020;
        /// Field has volatile semantics
        const VOLATILE = 0x0040;
        /// Compiler-generated bridge method
        const BRIDGE = 0x0040;
        /// Method takes a trailing argument array
        const VARARGS = 0x0080;
        /// Implemented in native code
        const NATIVE = 0x0100;
        /// Class is an interface
        const INTERFACE = 0x0200;
        /// No implementation is provided
        const ABSTRACT = 0x0400;
        /// Strict floating-point arithmetic
        const STRICT = 0x0800;
        /// Not directly present in source code
        const SYNTHETIC = 0x1000;
        /// Class is an enum type
        const ENUM = 0x4000;
        /// Method is a class or instance initializer
        const CONSTRUCTOR = 0x1_0000;
        /// Method declared synchronized, flag retained after lowering
        const DECLARED_SYNCHRONIZED = 0x2_0000;
    }
}

impl AccessFlags {
    /// Is the SYNTHETIC or BRIDGE bit set?
    ///
    /// Both mark compiler-generated members; the synthetic accessor pass
    /// accepts either since front ends differ in which one they emit.
    /// Note that BRIDGE aliases VOLATILE, which is only meaningful on
    /// fields, so this query must only be asked of methods.
    #[must_use]
    pub fn is_compiler_generated(&self) -> bool {
        self.intersects(Self::SYNTHETIC | Self::BRIDGE)
    }

    /// Is the STATIC bit set?
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.contains(Self::STATIC)
    }

    /// Is the PRIVATE bit set?
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.contains(Self::PRIVATE)
    }

    /// Is the CONSTRUCTOR bit set?
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.contains(Self::CONSTRUCTOR)
    }

    /// Does a method with these flags carry a body?
    ///
    /// Abstract and native methods have no instruction sequence even when the
    /// defining class is loaded.
    #[must_use]
    pub fn has_body(&self) -> bool {
        !self.intersects(Self::ABSTRACT | Self::NATIVE)
    }
}

#[cfg(test)]
mod tests {
    use super::AccessFlags;

    #[test]
    fn test_compiler_generated_detection() {
        let synth = AccessFlags::STATIC | AccessFlags::SYNTHETIC;
        assert!(synth.is_compiler_generated());

        let bridge = AccessFlags::PUBLIC | AccessFlags::BRIDGE;
        assert!(bridge.is_compiler_generated());

        let plain = AccessFlags::PUBLIC | AccessFlags::STATIC;
        assert!(!plain.is_compiler_generated());
    }

    #[test]
    fn test_has_body() {
        assert!(!(AccessFlags::PUBLIC | AccessFlags::ABSTRACT).has_body());
        assert!(!(AccessFlags::PUBLIC | AccessFlags::NATIVE).has_body());
        assert!((AccessFlags::PUBLIC | AccessFlags::STATIC).has_body());
    }
}
