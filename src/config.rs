//! # Config
//!
//! Patch sets declared in TOML instead of code.
//!
//! ```toml
//! name = "UIPatches"
//!
//! [[patch]]
//! name = "NetworkFix"
//! address = 0xAC34B0
//! bytes = [0xB6]
//!
//! [[patch]]
//! name = "ShowH3PauseMenu1"
//! address = 0x7B682B
//! nop = 1
//!
//! [[hook]]
//! name = "ShowH3PauseMenu2"
//! address = 0x7B6826
//! kind = "call"
//! target = "pause_menu"
//! ```
//!
//! A patch takes exactly one of `bytes`, `fill` with `len`, `nop` (a length) or `pointer` (a
//! symbol whose address is written little-endian). `expect` optionally lists the bytes that must
//! be present before the first write. Hook targets and pointers are symbols looked up through a
//! [`SymbolResolver`], so no function address is ever spelled out in a config file.

use std::collections::HashMap;
use std::hash::BuildHasher;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::hook::{FnPtr, Hook, HookKind};
use crate::patch::{Patch, PatchSet};

/// Maps symbol names used in configs to functions
pub trait SymbolResolver {
    /// Looks up `symbol`, returning `None` if it is unknown
    fn resolve(&self, symbol: &str) -> Option<FnPtr>;
}

impl<S: BuildHasher> SymbolResolver for HashMap<String, FnPtr, S> {
    fn resolve(&self, symbol: &str) -> Option<FnPtr> {
        self.get(symbol).copied()
    }
}

/// Top-level table
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SetDef {
    /// Set name
    name: String,
    /// `[[patch]]` tables
    #[serde(default, rename = "patch")]
    patches: Vec<PatchDef>,
    /// `[[hook]]` tables
    #[serde(default, rename = "hook")]
    hooks: Vec<HookDef>,
}

/// One `[[patch]]` table
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PatchDef {
    /// Patch name
    name: String,
    /// First byte overwritten
    address: usize,
    /// Explicit replacement bytes
    bytes: Option<Vec<u8>>,
    /// Byte repeated `len` times
    fill: Option<u8>,
    /// Length of a `fill`
    len: Option<usize>,
    /// Number of `nop`s
    nop: Option<usize>,
    /// Symbol whose address is written
    pointer: Option<String>,
    /// Bytes required before the first write
    expect: Option<Vec<u8>>,
}

/// One `[[hook]]` table
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HookDef {
    /// Hook name
    name: String,
    /// Address of the redirected instruction
    address: usize,
    /// Encoding of the redirection
    kind: KindDef,
    /// Symbol of the function redirected to
    target: String,
}

/// `kind` of a hook
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum KindDef {
    /// `call rel32`
    Call,
    /// `jmp rel32`
    Jmp,
}

impl From<KindDef> for HookKind {
    fn from(kind: KindDef) -> Self {
        match kind {
            KindDef::Call => HookKind::Call,
            KindDef::Jmp => HookKind::Jmp,
        }
    }
}

/// Resolves a symbol or reports which item referenced it
fn resolve<R: SymbolResolver + ?Sized>(resolver: &R, item: &str, symbol: &str) -> Result<FnPtr> {
    resolver
        .resolve(symbol)
        .ok_or_else(|| Error::Config(format!("`{item}` refers to unknown symbol `{symbol}`")))
}

impl PatchDef {
    /// Builds the patch described by the table
    fn build<R: SymbolResolver + ?Sized>(self, resolver: &R) -> Result<Patch> {
        let PatchDef {
            name,
            address,
            bytes,
            fill,
            len,
            nop,
            pointer,
            expect,
        } = self;

        let patch = match (bytes, fill, len, nop, pointer) {
            (Some(bytes), None, None, None, None) => Patch::new(name, address, bytes),
            (None, Some(byte), Some(len), None, None) => Patch::fill(name, address, byte, len),
            (None, None, None, Some(len), None) => Patch::nop(name, address, len),
            (None, None, None, None, Some(symbol)) => {
                let value = resolve(resolver, &name, &symbol)?.address();
                Patch::pointer(name, address, value)
            }
            _ => {
                return Err(Error::Config(format!(
                    "patch `{name}` needs exactly one of `bytes`, `fill` with `len`, `nop` or `pointer`"
                )))
            }
        };

        Ok(match expect {
            Some(expected) => patch.expect(expected),
            None => patch,
        })
    }
}

impl HookDef {
    /// Builds the hook described by the table
    fn build<R: SymbolResolver + ?Sized>(self, resolver: &R) -> Result<Hook> {
        let target = resolve(resolver, &self.name, &self.target)?;
        Ok(Hook::new(self.name, self.address, target, self.kind.into()))
    }
}

impl PatchSet {
    /// Parses a set from TOML, resolving hook targets and pointers through `resolver`.
    ///
    /// The result is not validated; [`crate::PatchManager::register`] does that.
    pub fn from_toml<R: SymbolResolver + ?Sized>(source: &str, resolver: &R) -> Result<Self> {
        let def: SetDef = toml::from_str(source)?;
        let patches = def
            .patches
            .into_iter()
            .map(|patch| patch.build(resolver))
            .collect::<Result<_>>()?;
        let hooks = def
            .hooks
            .into_iter()
            .map(|hook| hook.build(resolver))
            .collect::<Result<_>>()?;
        Ok(PatchSet::new(def.name, patches, hooks))
    }
}
