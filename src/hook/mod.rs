//! # Hook
//!
//! This module covers hooks, which redirect a `call` or `jmp` from one location to another

pub mod convention;
pub mod trampoline;

use std::fmt;
use std::mem;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::code::{CALL_REL32, JMP_REL32, REL32_LEN};

pub use self::convention::CallingConvention;

/// Address of a foreign function plus the convention it expects to be called with.
///
/// The engine treats the address as opaque; whether it really points at a function with the
/// declared convention is the caller's contract.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FnPtr {
    /// Entry point
    address: usize,
    /// Expected calling convention
    convention: CallingConvention,
}

impl FnPtr {
    /// Wraps a raw function address
    pub const fn new(address: usize, convention: CallingConvention) -> Self {
        Self {
            address,
            convention,
        }
    }

    /// Entry point of the function
    pub fn address(&self) -> usize {
        self.address
    }

    /// Convention the function expects
    pub fn convention(&self) -> CallingConvention {
        self.convention
    }

    /// Reinterprets the address as a callable function pointer type.
    ///
    /// # Safety
    ///
    /// `F` must be a function pointer type whose ABI matches [`FnPtr::convention`] and the real
    /// signature of the function at [`FnPtr::address`].
    pub unsafe fn cast<F: Copy>(self) -> F {
        debug_assert_eq!(mem::size_of::<F>(), mem::size_of::<usize>());
        mem::transmute_copy(&self.address)
    }
}

impl fmt::Debug for FnPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FnPtr({:#x}, {})", self.address, self.convention)
    }
}

/// How a hook encodes its redirection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// `call rel32`: the replacement must return to the instruction after the call
    Call,
    /// `jmp rel32`: the replacement takes over control flow entirely
    Jmp,
}

impl HookKind {
    /// Opcode byte written at the hook's source
    pub fn opcode(self) -> u8 {
        match self {
            Self::Call => CALL_REL32,
            Self::Jmp => JMP_REL32,
        }
    }
}

/// Two explicit slots composed by a feature: the replacement it installs, and the original code it
/// may fall back to.
///
/// The `original` slot is bound by the engine when the hook is first applied, before the
/// redirection goes live. The engine never chains to the original on its own; a replacement that
/// wants the original behavior calls [`Detour::original`] itself.
pub struct Detour {
    /// Function the hook redirects to
    replacement: FnPtr,
    /// Address of callable original code, 0 while unbound
    original: AtomicUsize,
}

impl Detour {
    /// Creates an unbound detour
    pub fn new(replacement: FnPtr) -> Arc<Self> {
        Arc::new(Self {
            replacement,
            original: AtomicUsize::new(0),
        })
    }

    /// Function the hook redirects to
    pub fn replacement(&self) -> FnPtr {
        self.replacement
    }

    /// Callable original code, with the replacement's calling convention.
    ///
    /// `None` until the hook has been applied once.
    pub fn original(&self) -> Option<FnPtr> {
        match self.original.load(Ordering::Acquire) {
            0 => None,
            address => Some(FnPtr::new(address, self.replacement.convention)),
        }
    }

    /// Binds (or with 0, unbinds) the original slot
    pub(crate) fn bind(&self, address: usize) {
        self.original.store(address, Ordering::Release);
    }
}

impl fmt::Debug for Detour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detour")
            .field("replacement", &self.replacement)
            .field("original", &self.original())
            .finish()
    }
}

/// Immutable description of one call/jmp redirection
#[derive(Debug, Clone)]
pub struct Hook {
    /// Name, unique within the owning set
    name: String,
    /// Address of the `call`/`jmp` being written
    source: usize,
    /// Replacement function
    target: FnPtr,
    /// Encoding of the redirection
    kind: HookKind,
    /// Slots bound when the hook is applied
    detour: Option<Arc<Detour>>,
    /// Bytes at `source` relocated into a trampoline for `Jmp` detours
    stolen: usize,
}

impl Hook {
    /// Redirects the instruction at `source` to `target`
    pub fn new(name: impl Into<String>, source: usize, target: FnPtr, kind: HookKind) -> Self {
        Self {
            name: name.into(),
            source,
            target,
            kind,
            detour: None,
            stolen: 0,
        }
    }

    /// Replaces the target of the `call` at `source`
    pub fn call(name: impl Into<String>, source: usize, target: FnPtr) -> Self {
        Self::new(name, source, target, HookKind::Call)
    }

    /// Writes a `jmp` to `target` at `source`
    pub fn jmp(name: impl Into<String>, source: usize, target: FnPtr) -> Self {
        Self::new(name, source, target, HookKind::Jmp)
    }

    /// Replaces the target of the `call` at `source` with `detour`'s replacement, binding its
    /// original slot to the call's previous target
    pub fn call_detour(name: impl Into<String>, source: usize, detour: Arc<Detour>) -> Self {
        let mut hook = Self::call(name, source, detour.replacement());
        hook.detour = Some(detour);
        hook
    }

    /// Splices a `jmp` to `detour`'s replacement over the first `stolen` bytes at `source`.
    ///
    /// The original slot is bound to a trampoline that runs the stolen bytes and jumps back to
    /// `source + stolen`. `stolen` must cover whole instructions, at least 5 bytes, none of which
    /// may be position dependent.
    pub fn jmp_detour(
        name: impl Into<String>,
        source: usize,
        stolen: usize,
        detour: Arc<Detour>,
    ) -> Self {
        let mut hook = Self::jmp(name, source, detour.replacement());
        hook.detour = Some(detour);
        hook.stolen = stolen;
        hook
    }

    /// Name of the hook
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address of the redirected instruction
    pub fn source(&self) -> usize {
        self.source
    }

    /// Replacement function
    pub fn target(&self) -> FnPtr {
        self.target
    }

    /// Encoding of the redirection
    pub fn kind(&self) -> HookKind {
        self.kind
    }

    /// Detour slots, if any
    pub fn detour(&self) -> Option<&Arc<Detour>> {
        self.detour.as_ref()
    }

    /// Bytes relocated into the trampoline, 0 if none
    pub fn stolen(&self) -> usize {
        self.stolen
    }

    /// Bytes rewritten when the hook is applied
    pub fn written(&self) -> Range<usize> {
        self.source..self.source.saturating_add(REL32_LEN)
    }

    /// Bytes the hook owns: the written branch plus any stolen instructions behind it
    pub fn footprint(&self) -> Range<usize> {
        self.source..self.source.saturating_add(self.stolen.max(REL32_LEN))
    }

    /// Describes what is wrong with the hook, if anything
    pub(crate) fn defect(&self) -> Option<&'static str> {
        match (self.kind, &self.detour) {
            (HookKind::Jmp, Some(_)) if self.stolen < REL32_LEN => {
                Some("a jmp detour must steal at least 5 bytes")
            }
            (HookKind::Call, _) if self.stolen != 0 => Some("call hooks cannot steal bytes"),
            _ if self.target.address == 0 => Some("target function is null"),
            _ => None,
        }
    }
}
