use crate::sync::UnsafeCell;
use core::num::{NonZeroU64, TryFromIntError};
use derive_more::{Deref, DerefMut, Display};
use indexmap::IndexMap as _IndexMap;
use rustc_hash::FxBuildHasher;
use std::collections::{HashMap as _HashMap, HashSet as _HashSet};

/// A minimal `UnsafeCell` wrapper that is `Sync` when `T: Sync`.
///
/// Used internally by the executor for node output slots. Correctness is
/// ensured by the run protocol: a slot is written exactly once by the worker
/// that claimed the node, and read only after its terminal status has been
/// observed with `Acquire` ordering.
#[derive(Debug, Deref, DerefMut)]
#[repr(transparent)]
pub(crate) struct SyncUnsafeCell<T>(UnsafeCell<T>);

unsafe impl<T: Sync> Sync for SyncUnsafeCell<T> {}

impl<T> SyncUnsafeCell<T> {
    pub(crate) fn new(val: T) -> Self {
        Self(UnsafeCell::new(val))
    }
}

/// Unique identifier of a task within one scheduler instance.
///
/// Identifiers are assigned monotonically at `spawn`/`submit_dag` time and are
/// never reused by the same scheduler.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("task#{_0}")]
pub struct TaskId(NonZeroU64);

impl TaskId {
    pub(crate) fn from_raw(raw: NonZeroU64) -> Self {
        Self(raw)
    }

    /// Raw numeric value of the identifier.
    #[inline]
    #[must_use]
    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// Identifier `offset` places after `self` in a contiguously reserved
    /// range.
    pub(crate) fn offset(self, offset: u32) -> Self {
        Self(self.0.saturating_add(u64::from(offset)))
    }
}

impl TryFrom<u64> for TaskId {
    type Error = TryFromIntError;

    /// Rebuild an identifier from its raw value, as printed by debuggers.
    fn try_from(raw: u64) -> Result<Self, Self::Error> {
        NonZeroU64::try_from(raw).map(Self)
    }
}

/// Stable arena index of a node inside its owning [`Dag`](crate::dag::Dag).
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("n{_0}")]
pub struct NodeIndex(pub(crate) u32);

impl NodeIndex {
    /// Position of the node in insertion order.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_usize(idx: usize) -> Self {
        Self(u32::try_from(idx).unwrap_or(u32::MAX))
    }
}

/// Source-location provenance attached to nodes for diagnostics.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
#[display("{start}..{end}")]
pub struct Span {
    /// Byte offset of the first character.
    pub start: u32,
    /// Byte offset one past the last character.
    pub end: u32,
}

impl Span {
    /// Construct a span covering `start..end`.
    #[must_use]
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

pub(crate) type HashMap<K, V> = _HashMap<K, V, FxBuildHasher>;
pub(crate) type HashSet<T> = _HashSet<T, FxBuildHasher>;
/// `IndexMap` type with fast hasher.
pub type IndexMap<K, V> = _IndexMap<K, V, FxBuildHasher>;
