//! # Parameter Stores and the Global Theta Arena
//!
//! A [`ParamStore`] is one model's learnable values: a [`Layout`] plus the
//! flat buffer it describes. Before optimization every store is relocated
//! into a single [`Theta`] so the optimizer sees one contiguous vector:
//!
//! ```text
//!   ParamStore A [Wl|Bl]     ParamStore dict [D]     ParamStore B [Wl|Bl]
//!          │                        │                       │
//!          ▼  adopt (bulk copy)     ▼                       ▼
//!   Theta  [ A.Wl | A.Bl | D .............. | B.Wl | B.Bl ]
//!            StoreId(0)     StoreId(1)         StoreId(2)
//! ```
//!
//! A gradient buffer of the same length mirrors the arena, so the same
//! [`StoreId`] resolves regions in either buffer. A dictionary shared by two
//! models is adopted once and both models hold the same id.

use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::CoreError;
use crate::layout::{Layout, RegionsMut};
use crate::view::{MatrixMut, MatrixRef};
use crate::Real;

/// A layout plus the buffer it describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamStore {
    layout: Layout,
    data: Vec<Real>,
}

impl ParamStore {
    /// A zero-filled store.
    pub fn zeros(layout: Layout) -> Self {
        let data = vec![0.0; layout.size()];
        Self { layout, data }
    }

    /// Wrap an existing buffer; its length must match the layout.
    pub fn from_vec(layout: Layout, data: Vec<Real>) -> Result<Self, CoreError> {
        layout.check_len(data.len())?;
        Ok(Self { layout, data })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[Real] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [Real] {
        &mut self.data
    }

    pub fn view(&self) -> StoreView<'_> {
        StoreView {
            layout: &self.layout,
            data: &self.data,
        }
    }

    pub fn view_mut(&mut self) -> StoreViewMut<'_> {
        StoreViewMut {
            layout: &self.layout,
            data: &mut self.data,
        }
    }

    /// Fill one region with values drawn from `sample`.
    pub fn fill_region(
        &mut self,
        name: &str,
        mut sample: impl FnMut() -> Real,
    ) -> Result<(), CoreError> {
        let range = self.layout.region(name)?.range();
        self.data[range].iter_mut().for_each(|v| *v = sample());
        Ok(())
    }

    pub fn into_parts(self) -> (Layout, Vec<Real>) {
        (self.layout, self.data)
    }
}

/// Handle to a store adopted by a [`Theta`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreId(usize);

impl StoreId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Where a store lives inside the arena.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    layout: Layout,
    offset: usize,
}

impl Segment {
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len()
    }
}

/// The global optimizer vector: every adopted store, back to back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Theta {
    data: Vec<Real>,
    segments: Vec<Segment>,
}

impl Theta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a store to the end of the arena.
    ///
    /// Values are copied verbatim; the store's layout is kept unchanged so
    /// every region resolves to the same logical parameters afterwards.
    pub fn adopt(&mut self, store: ParamStore) -> StoreId {
        let (layout, data) = store.into_parts();
        let offset = self.data.len();
        self.data.extend_from_slice(&data);
        self.segments.push(Segment { layout, offset });
        StoreId(self.segments.len() - 1)
    }

    /// Relocate the whole arena into `target`, which must have exactly the
    /// arena's length. Segments keep their offsets relative to the new base.
    pub fn move_to_address(&self, target: &mut [Real]) -> Result<(), CoreError> {
        if target.len() != self.data.len() {
            return Err(CoreError::SizeMismatch {
                expected: self.data.len(),
                got: target.len(),
            });
        }
        target.copy_from_slice(&self.data);
        Ok(())
    }

    /// Replace every value with `values`, keeping the segment table.
    pub fn load(&mut self, values: &[Real]) -> Result<(), CoreError> {
        if values.len() != self.data.len() {
            return Err(CoreError::SizeMismatch {
                expected: self.data.len(),
                got: values.len(),
            });
        }
        self.data.copy_from_slice(values);
        Ok(())
    }

    /// Copy one store back out of the arena.
    pub fn extract(&self, id: StoreId) -> Result<ParamStore, CoreError> {
        let segment = self.segment(id)?;
        ParamStore::from_vec(segment.layout.clone(), self.data[segment.range()].to_vec())
    }

    pub fn segment(&self, id: StoreId) -> Result<&Segment, CoreError> {
        self.segments.get(id.0).ok_or(CoreError::UnknownStore {
            id: id.0,
            count: self.segments.len(),
        })
    }

    pub fn segments(&self) -> impl Iterator<Item = (StoreId, &Segment)> {
        self.segments
            .iter()
            .enumerate()
            .map(|(i, s)| (StoreId(i), s))
    }

    pub fn num_stores(&self) -> usize {
        self.segments.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[Real] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [Real] {
        &mut self.data
    }

    /// A zeroed buffer mirroring the arena (for gradients, AdaGrad history).
    pub fn zeros_like(&self) -> Vec<Real> {
        vec![0.0; self.data.len()]
    }

    pub fn store(&self, id: StoreId) -> Result<StoreView<'_>, CoreError> {
        self.view_in(id, &self.data)
    }

    pub fn store_mut(&mut self, id: StoreId) -> Result<StoreViewMut<'_>, CoreError> {
        let segment = self.segments.get(id.0).ok_or(CoreError::UnknownStore {
            id: id.0,
            count: self.segments.len(),
        })?;
        Ok(StoreViewMut {
            layout: &segment.layout,
            data: &mut self.data[segment.range()],
        })
    }

    /// Resolve a store inside another buffer that mirrors this arena.
    pub fn view_in<'a>(&'a self, id: StoreId, buffer: &'a [Real]) -> Result<StoreView<'a>, CoreError> {
        self.check_mirror(buffer.len())?;
        let segment = self.segment(id)?;
        Ok(StoreView {
            layout: &segment.layout,
            data: &buffer[segment.range()],
        })
    }

    /// Mutable variant of [`Theta::view_in`].
    pub fn view_in_mut<'a>(
        &'a self,
        id: StoreId,
        buffer: &'a mut [Real],
    ) -> Result<StoreViewMut<'a>, CoreError> {
        self.check_mirror(buffer.len())?;
        let segment = self.segment(id)?;
        Ok(StoreViewMut {
            layout: &segment.layout,
            data: &mut buffer[segment.range()],
        })
    }

    fn check_mirror(&self, len: usize) -> Result<(), CoreError> {
        if len == self.data.len() {
            Ok(())
        } else {
            Err(CoreError::SizeMismatch {
                expected: self.data.len(),
                got: len,
            })
        }
    }
}

/// Read-only view of one store.
#[derive(Debug, Clone, Copy)]
pub struct StoreView<'a> {
    layout: &'a Layout,
    data: &'a [Real],
}

impl<'a> StoreView<'a> {
    pub fn layout(&self) -> &'a Layout {
        self.layout
    }

    pub fn as_slice(&self) -> &'a [Real] {
        self.data
    }

    pub fn matrix(&self, name: &str) -> Result<MatrixRef<'a>, CoreError> {
        let region = self.layout.region(name)?;
        Ok(MatrixRef::new(&self.data[region.range()], region.rows, region.cols))
    }

    pub fn vector(&self, name: &str) -> Result<&'a [Real], CoreError> {
        let region = self.layout.region(name)?;
        Ok(&self.data[region.range()])
    }

    /// Like [`StoreView::matrix`] but `None` when the layout lacks `name`.
    pub fn matrix_opt(&self, name: &str) -> Option<MatrixRef<'a>> {
        self.matrix(name).ok()
    }

    pub fn vector_opt(&self, name: &str) -> Option<&'a [Real]> {
        self.vector(name).ok()
    }
}

/// Mutable view of one store.
#[derive(Debug)]
pub struct StoreViewMut<'a> {
    layout: &'a Layout,
    data: &'a mut [Real],
}

impl<'a> StoreViewMut<'a> {
    pub fn layout(&self) -> &'a Layout {
        self.layout
    }

    pub fn as_slice(&self) -> &[Real] {
        &*self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [Real] {
        &mut *self.data
    }

    pub fn matrix_mut(&mut self, name: &str) -> Result<MatrixMut<'_>, CoreError> {
        let region = self.layout.region(name)?;
        Ok(MatrixMut::new(
            &mut self.data[region.range()],
            region.rows,
            region.cols,
        ))
    }

    pub fn vector_mut(&mut self, name: &str) -> Result<&mut [Real], CoreError> {
        let region = self.layout.region(name)?;
        Ok(&mut self.data[region.range()])
    }

    /// Split into disjoint per-region slices.
    pub fn into_regions(self) -> RegionsMut<'a> {
        let len = self.data.len();
        match self.layout.split_mut(self.data) {
            Ok(regions) => regions,
            // Views are only built from validated segments.
            Err(e) => unreachable!("segment of {} values does not fit its layout: {}", len, e),
        }
    }
}
