//! # Declarative Parameter Layouts
//!
//! A [`Layout`] is an ordered list of named regions. Offsets are fixed when
//! the layout is built, so two layouts built from the same region list are
//! identical and a flat buffer written under one re-aliases correctly under
//! the other.
//!
//! ```text
//!   Layout [W 4x8][B 4][Wl 1x4][Bl 1]
//!   buffer ├──32──┼─4─┼──4───┼─1─┤  size = 41
//! ```

use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::CoreError;
use crate::view::{MatrixMut, MatrixRef};
use crate::Real;

/// One named region: a `rows x cols` row-major block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionSpec {
    pub name: String,
    pub rows: usize,
    pub cols: usize,
}

impl RegionSpec {
    /// Number of scalars in this region.
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A resolved region: its spec plus its offset inside the owning buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region<'l> {
    pub name: &'l str,
    pub offset: usize,
    pub rows: usize,
    pub cols: usize,
}

impl Region<'_> {
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len()
    }
}

/// Ordered list of named regions with precomputed offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    regions: Vec<RegionSpec>,
    offsets: Vec<usize>,
    size: usize,
}

impl Layout {
    /// Start building a layout.
    pub fn builder() -> LayoutBuilder {
        LayoutBuilder::default()
    }

    /// Total number of scalars covered by the layout.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of regions.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Iterate over the regions in declaration order.
    pub fn regions(&self) -> impl Iterator<Item = Region<'_>> {
        self.regions
            .iter()
            .zip(self.offsets.iter())
            .map(|(spec, &offset)| Region {
                name: spec.name.as_str(),
                offset,
                rows: spec.rows,
                cols: spec.cols,
            })
    }

    /// Look up a region by name.
    pub fn region(&self, name: &str) -> Result<Region<'_>, CoreError> {
        self.regions()
            .find(|r| r.name == name)
            .ok_or_else(|| CoreError::UnknownRegion {
                name: name.to_string(),
                available: self.names().join(", "),
            })
    }

    /// Does the layout declare `name`?
    pub fn contains(&self, name: &str) -> bool {
        self.regions.iter().any(|r| r.name == name)
    }

    /// Region names in declaration order.
    pub fn names(&self) -> Vec<&str> {
        self.regions.iter().map(|r| r.name.as_str()).collect()
    }

    /// Check that `len` matches the layout size.
    pub fn check_len(&self, len: usize) -> Result<(), CoreError> {
        if len == self.size {
            Ok(())
        } else {
            Err(CoreError::SizeMismatch {
                expected: self.size,
                got: len,
            })
        }
    }

    /// Split a mutable buffer into disjoint per-region slices.
    ///
    /// Each region can be taken exactly once from the result.
    pub fn split_mut<'a>(&'a self, buffer: &'a mut [Real]) -> Result<RegionsMut<'a>, CoreError> {
        self.check_len(buffer.len())?;
        let mut slots = Vec::with_capacity(self.regions.len());
        let mut rest = buffer;
        for region in self.regions() {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(region.len());
            slots.push((region, Some(head)));
            rest = tail;
        }
        Ok(RegionsMut { slots })
    }
}

/// Builder for [`Layout`].
#[derive(Debug, Clone, Default)]
pub struct LayoutBuilder {
    regions: Vec<RegionSpec>,
}

impl LayoutBuilder {
    /// Append a `rows x cols` matrix region.
    pub fn matrix(mut self, name: &str, rows: usize, cols: usize) -> Self {
        self.regions.push(RegionSpec {
            name: name.to_string(),
            rows,
            cols,
        });
        self
    }

    /// Append a vector region (stored as a `len x 1` matrix).
    pub fn vector(self, name: &str, len: usize) -> Self {
        self.matrix(name, len, 1)
    }

    /// Fix the offsets. Fails if a name is declared twice.
    pub fn build(self) -> Result<Layout, CoreError> {
        let mut offsets = Vec::with_capacity(self.regions.len());
        let mut size = 0;
        for (i, spec) in self.regions.iter().enumerate() {
            if self.regions[..i].iter().any(|r| r.name == spec.name) {
                return Err(CoreError::DuplicateRegion {
                    name: spec.name.clone(),
                });
            }
            offsets.push(size);
            size += spec.len();
        }
        Ok(Layout {
            regions: self.regions,
            offsets,
            size,
        })
    }
}

/// Disjoint mutable slices of one buffer, keyed by region name.
pub struct RegionsMut<'a> {
    slots: Vec<(Region<'a>, Option<&'a mut [Real]>)>,
}

impl<'a> RegionsMut<'a> {
    fn take(&mut self, name: &str) -> Result<(Region<'a>, &'a mut [Real]), CoreError> {
        let available = self
            .slots
            .iter()
            .filter(|(_, s)| s.is_some())
            .map(|(r, _)| r.name)
            .collect::<Vec<_>>()
            .join(", ");
        self.slots
            .iter_mut()
            .find(|(r, _)| r.name == name)
            .and_then(|(r, slot)| slot.take().map(|s| (*r, s)))
            .ok_or_else(|| CoreError::UnknownRegion {
                name: name.to_string(),
                available,
            })
    }

    /// Take a region as a mutable matrix view.
    pub fn take_matrix(&mut self, name: &str) -> Result<MatrixMut<'a>, CoreError> {
        let (region, data) = self.take(name)?;
        Ok(MatrixMut::new(data, region.rows, region.cols))
    }

    /// Take a region as a flat mutable slice.
    pub fn take_vector(&mut self, name: &str) -> Result<&'a mut [Real], CoreError> {
        self.take(name).map(|(_, data)| data)
    }

    /// Take a region only if the layout declares it.
    pub fn take_matrix_opt(&mut self, name: &str) -> Option<MatrixMut<'a>> {
        self.take_matrix(name).ok()
    }

    /// Take a vector region only if the layout declares it.
    pub fn take_vector_opt(&mut self, name: &str) -> Option<&'a mut [Real]> {
        self.take_vector(name).ok()
    }
}

/// Resolve a region of an immutable buffer laid out under `layout`.
pub fn matrix_in<'a>(
    layout: &Layout,
    buffer: &'a [Real],
    name: &str,
) -> Result<MatrixRef<'a>, CoreError> {
    layout.check_len(buffer.len())?;
    let region = layout.region(name)?;
    Ok(MatrixRef::new(&buffer[region.range()], region.rows, region.cols))
}
