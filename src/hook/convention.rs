//! # Convention
//!
//! Calling-convention tags carried by foreign function pointers.
//!
//! The engine never generates glue between conventions: a replacement must be declared with the
//! same convention as the code it is redirected from. The tag documents that contract and lets a
//! detour hand its `original` slot back to the replacement with the right type.

use std::fmt;

/// Calling convention a foreign function expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallingConvention {
    /// `extern "C"` (cdecl on x86)
    #[default]
    C,
    /// `extern "stdcall"`, callee cleans the stack
    Stdcall,
    /// `extern "fastcall"`, first two integer args in ecx/edx
    Fastcall,
    /// `extern "thiscall"`, `this` in ecx
    Thiscall,
    /// `extern "system"`
    System,
}

impl fmt::Display for CallingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::C => "C",
            Self::Stdcall => "stdcall",
            Self::Fastcall => "fastcall",
            Self::Thiscall => "thiscall",
            Self::System => "system",
        })
    }
}
