//! Shared, typed parameter cells.
//!
//! A [`Uniform`] is the single writer for one published value. Any number of
//! [`UniformRef`] readers can be handed out to renderers or other loops; they
//! observe every committed write without re-subscribing. Cells live on the
//! cooperative host thread, so they are `Rc<RefCell<_>>` rather than locked.
//!
//! The concurrency contract is "one producer per cell": the writer handle is
//! not `Clone`, so the component that owns it is the only one that can mutate
//! the value.

use std::{cell::RefCell, collections::BTreeMap, fmt, rc::Rc};

use serde::{Deserialize, Serialize};

/// Well-known names of the cells published by a session.
pub mod names {
    pub const AMPLITUDE: &str = "amplitude";
    pub const AMPLITUDES: &str = "amplitudes";
    pub const FREQUENCY: &str = "frequency";
    pub const FREQUENCIES: &str = "frequencies";
    pub const STREAK: &str = "streak";
    pub const TIME: &str = "time";
}

/// Shape of the value stored in a cell. Fixed for the lifetime of the cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UniformKind {
    Scalar,
    Vector3,
    FloatArray(usize),
    Texture,
    ColorArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Linear RGB colour with components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    /// Builds a colour from a packed `0xRRGGBB` value.
    pub fn from_hex(hex: u32) -> Self {
        let channel = |shift: u32| ((hex >> shift) & 0xff) as f32 / 255.0;
        Self {
            r: channel(16),
            g: channel(8),
            b: channel(0),
        }
    }
}

/// Opaque handle to a texture owned by the external renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TextureId(pub u32);

/// Owned copy of a cell's value, used by renderers that want a uniform view
/// over cells of different kinds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum UniformSnapshot {
    Scalar(f32),
    Vector3(Vec3),
    FloatArray(Vec<f32>),
    Texture(TextureId),
    ColorArray(Vec<Rgb>),
}

impl UniformSnapshot {
    pub fn kind(&self) -> UniformKind {
        match self {
            Self::Scalar(_) => UniformKind::Scalar,
            Self::Vector3(_) => UniformKind::Vector3,
            Self::FloatArray(values) => UniformKind::FloatArray(values.len()),
            Self::Texture(_) => UniformKind::Texture,
            Self::ColorArray(_) => UniformKind::ColorArray,
        }
    }

    pub fn as_scalar(&self) -> Option<f32> {
        match self {
            Self::Scalar(value) => Some(*value),
            _ => None,
        }
    }
}

/// Values that can live in a cell.
pub trait UniformValue: Clone + 'static {
    fn kind(&self) -> UniformKind;
    fn snapshot(&self) -> UniformSnapshot;
}

impl UniformValue for f32 {
    fn kind(&self) -> UniformKind {
        UniformKind::Scalar
    }

    fn snapshot(&self) -> UniformSnapshot {
        UniformSnapshot::Scalar(*self)
    }
}

impl UniformValue for Vec3 {
    fn kind(&self) -> UniformKind {
        UniformKind::Vector3
    }

    fn snapshot(&self) -> UniformSnapshot {
        UniformSnapshot::Vector3(*self)
    }
}

impl<const N: usize> UniformValue for [f32; N] {
    fn kind(&self) -> UniformKind {
        UniformKind::FloatArray(N)
    }

    fn snapshot(&self) -> UniformSnapshot {
        UniformSnapshot::FloatArray(self.to_vec())
    }
}

impl UniformValue for TextureId {
    fn kind(&self) -> UniformKind {
        UniformKind::Texture
    }

    fn snapshot(&self) -> UniformSnapshot {
        UniformSnapshot::Texture(*self)
    }
}

impl UniformValue for Vec<Rgb> {
    fn kind(&self) -> UniformKind {
        UniformKind::ColorArray
    }

    fn snapshot(&self) -> UniformSnapshot {
        UniformSnapshot::ColorArray(self.clone())
    }
}

/// Writer handle for a shared cell.
pub struct Uniform<T> {
    cell: Rc<RefCell<T>>,
    kind: UniformKind,
}

impl<T: UniformValue> Uniform<T> {
    /// Creates a cell. Its kind is taken from the initial value.
    pub fn new(value: T) -> Self {
        let kind = value.kind();
        Self {
            cell: Rc::new(RefCell::new(value)),
            kind,
        }
    }

    pub fn kind(&self) -> UniformKind {
        self.kind
    }

    /// Returns the latest committed value.
    pub fn get(&self) -> T {
        self.cell.borrow().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.cell.borrow())
    }

    /// Replaces the whole value in one step.
    pub fn set(&mut self, value: T) {
        debug_assert_eq!(value.kind(), self.kind, "uniform kind is fixed at creation");
        *self.cell.borrow_mut() = value;
    }

    /// Mutates the value in place. The closure must not change its kind.
    pub fn update<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut value = self.cell.borrow_mut();
        let result = f(&mut value);
        debug_assert_eq!(value.kind(), self.kind, "uniform kind is fixed at creation");
        result
    }

    /// Hands out a read-only view sharing the same storage.
    pub fn reader(&self) -> UniformRef<T> {
        UniformRef {
            cell: Rc::clone(&self.cell),
            kind: self.kind,
        }
    }
}

impl<const N: usize> Uniform<[f32; N]> {
    /// Writes a single element. Out-of-range indices are ignored and reported
    /// by the return value.
    pub fn set_element(&mut self, index: usize, value: f32) -> bool {
        match self.cell.borrow_mut().get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Copies `source` element by element into the array, zero-filling the
    /// tail when the source is shorter and ignoring any excess.
    pub fn fill_from_bytes(&mut self, source: &[u8]) {
        let mut values = self.cell.borrow_mut();
        for (index, slot) in values.iter_mut().enumerate() {
            *slot = source.get(index).copied().map(f32::from).unwrap_or(0.0);
        }
    }
}

impl<T: UniformValue + fmt::Debug> fmt::Debug for Uniform<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uniform")
            .field("kind", &self.kind)
            .field("value", &*self.cell.borrow())
            .finish()
    }
}

/// Read-only view over a cell owned by some [`Uniform`] writer.
pub struct UniformRef<T> {
    cell: Rc<RefCell<T>>,
    kind: UniformKind,
}

impl<T: UniformValue> UniformRef<T> {
    pub fn kind(&self) -> UniformKind {
        self.kind
    }

    pub fn get(&self) -> T {
        self.cell.borrow().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.cell.borrow())
    }

    /// Returns `true` when both views point at the same cell.
    pub fn same_cell(&self, other: &UniformRef<T>) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<T> Clone for UniformRef<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
            kind: self.kind,
        }
    }
}

impl<T: UniformValue + fmt::Debug> fmt::Debug for UniformRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniformRef")
            .field("kind", &self.kind)
            .field("value", &*self.cell.borrow())
            .finish()
    }
}

/// Kind-erased read access, so cells of different value types can share one
/// name table.
pub trait ErasedUniform {
    fn kind(&self) -> UniformKind;
    fn snapshot(&self) -> UniformSnapshot;
}

impl<T: UniformValue> ErasedUniform for UniformRef<T> {
    fn kind(&self) -> UniformKind {
        self.kind
    }

    fn snapshot(&self) -> UniformSnapshot {
        self.cell.borrow().snapshot()
    }
}

/// Named table of read-only cells handed to a renderer.
#[derive(Clone, Default)]
pub struct UniformSet {
    entries: BTreeMap<String, Rc<dyn ErasedUniform>>,
}

impl UniformSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a reader under `name`, replacing any previous entry.
    pub fn insert<T: UniformValue>(&mut self, name: impl Into<String>, uniform: UniformRef<T>) {
        self.entries.insert(name.into(), Rc::new(uniform));
    }

    /// Returns a new set containing `self` overlaid with `other`. Entries of
    /// `other` win on name clashes.
    pub fn merged(&self, other: &UniformSet) -> UniformSet {
        let mut entries = self.entries.clone();
        for (name, uniform) in &other.entries {
            entries.insert(name.clone(), Rc::clone(uniform));
        }
        UniformSet { entries }
    }

    pub fn get(&self, name: &str) -> Option<&dyn ErasedUniform> {
        self.entries.get(name).map(|uniform| uniform.as_ref())
    }

    pub fn snapshot(&self, name: &str) -> Option<UniformSnapshot> {
        self.get(name).map(|uniform| uniform.snapshot())
    }

    pub fn scalar(&self, name: &str) -> Option<f32> {
        self.snapshot(name).and_then(|snapshot| snapshot.as_scalar())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copies every cell's current value, keyed by name.
    pub fn snapshot_all(&self) -> BTreeMap<String, UniformSnapshot> {
        self.entries
            .iter()
            .map(|(name, uniform)| (name.clone(), uniform.snapshot()))
            .collect()
    }
}

impl fmt::Debug for UniformSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(name, uniform)| (name, uniform.kind())))
            .finish()
    }
}
