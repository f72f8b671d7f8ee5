#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]
#![doc = include_str!("../README.md")]

pub mod alloc;
pub mod code;
pub mod config;
pub mod error;
pub mod hook;
pub mod manager;
pub mod patch;
pub mod patcher;

pub use crate::config::SymbolResolver;
pub use crate::error::{Error, Result};
pub use crate::hook::{CallingConvention, Detour, FnPtr, Hook, HookKind};
pub use crate::manager::PatchManager;
pub use crate::patch::{Patch, PatchSet, Payload};
pub use crate::patcher::mem::ProcessMemory;
pub use crate::patcher::MemoryAccessor;
