//! Fixed-size memory arena.
//!
//! The arena owns one buffer of 32-bit words. At construction it is
//! partitioned into sub-regions whose offsets never change afterwards; all
//! later access goes through typed, bounds-checked slices obtained from
//! [`Arena::regions`].

use core::mem;

use bytemuck::Pod;

use crate::errors::{HashCrfError, Result};

/// Size of one arena word in bytes.
pub const WORD: usize = 4;

/// Identifies a sub-region of the arena.
///
/// Regions are laid out in memory in declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegionId {
    /// Working memory of the sparse builder.
    Scratch,
    /// Header slots of training instances.
    TrainHeaders,
    /// Header slots of development instances.
    DevHeaders,
    /// Per-position nonzero counts.
    Nz,
    /// Hashed feature keys.
    Keys,
    /// Feature values.
    Values,
    /// Supervisory paths.
    Paths,
    /// First-order AdaGrad information.
    Foi,
    /// Second-order AdaGrad information.
    Soi,
    /// Weight vector.
    Weights,
    /// Loss of the latest training round.
    Loss,
    /// Latest decoded path.
    Prediction,
    /// Normalized score of the latest decoded path.
    PredictionScore,
    /// Per-instance algorithm buffers.
    Work,
}

impl RegionId {
    /// All regions in memory order.
    pub const ALL: [Self; 14] = [
        Self::Scratch,
        Self::TrainHeaders,
        Self::DevHeaders,
        Self::Nz,
        Self::Keys,
        Self::Values,
        Self::Paths,
        Self::Foi,
        Self::Soi,
        Self::Weights,
        Self::Loss,
        Self::Prediction,
        Self::PredictionScore,
        Self::Work,
    ];

    /// Human readable name, used in error messages and memory reports.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Scratch => "scratch",
            Self::TrainHeaders => "train header store",
            Self::DevHeaders => "dev header store",
            Self::Nz => "nonzero-count store",
            Self::Keys => "key store",
            Self::Values => "value store",
            Self::Paths => "path store",
            Self::Foi => "first-order info",
            Self::Soi => "second-order info",
            Self::Weights => "weight vector",
            Self::Loss => "loss",
            Self::Prediction => "prediction buffer",
            Self::PredictionScore => "prediction score",
            Self::Work => "algorithm scratch",
        }
    }
}

/// Location of a sub-region, in words.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Region {
    /// Offset from the start of the arena.
    pub offset: usize,
    /// Capacity.
    pub len: usize,
}

/// Static partition of the arena.
#[derive(Clone, Debug, Default)]
pub struct Layout {
    regions: [Region; 14],
    total: usize,
}

impl Layout {
    /// Partitions the arena, asking `size_of` for the number of words of each region.
    pub fn new<F>(mut size_of: F) -> Self
    where
        F: FnMut(RegionId) -> usize,
    {
        let mut layout = Self::default();
        for id in RegionId::ALL {
            layout.allocate(id, size_of(id));
        }
        layout
    }

    fn allocate(&mut self, id: RegionId, words: usize) -> usize {
        let base = self.total;
        self.regions[id as usize] = Region {
            offset: base,
            len: words,
        };
        self.total += words;
        base
    }

    /// Returns the location of the region.
    #[inline(always)]
    pub fn region(&self, id: RegionId) -> Region {
        self.regions[id as usize]
    }

    /// Returns the number of words used by all regions.
    #[inline(always)]
    pub const fn total_words(&self) -> usize {
        self.total
    }

    /// Converts an element index inside a region to an absolute byte offset.
    #[inline(always)]
    pub fn byte_offset(&self, id: RegionId, index: usize) -> u32 {
        // Construction guarantees the whole arena is addressable with u32.
        ((self.region(id).offset + index) * WORD) as u32
    }

    /// Converts an absolute byte offset back to an element index inside the region.
    ///
    /// # Errors
    ///
    /// The offset must be word-aligned and point inside the region.
    pub fn index_of(&self, id: RegionId, byte_offset: u32) -> Result<usize> {
        let byte_offset = byte_offset as usize;
        let region = self.region(id);
        if byte_offset % WORD != 0 {
            return Err(HashCrfError::CorruptHeader);
        }
        let word = byte_offset / WORD;
        if word < region.offset || word > region.offset + region.len {
            return Err(HashCrfError::CorruptHeader);
        }
        Ok(word - region.offset)
    }
}

/// Mutable views of every region at once.
pub struct Regions<'a> {
    pub scratch: &'a mut [u32],
    pub train_headers: &'a mut [u32],
    pub dev_headers: &'a mut [u32],
    pub nz: &'a mut [u32],
    pub keys: &'a mut [u32],
    pub values: &'a mut [f32],
    pub paths: &'a mut [u32],
    pub foi: &'a mut [f32],
    pub soi: &'a mut [f32],
    pub weights: &'a mut [f32],
    pub loss: &'a mut [f32],
    pub prediction: &'a mut [u32],
    pub prediction_score: &'a mut [f32],
    pub work: &'a mut [u32],
}

#[inline(always)]
fn carve<'a>(rest: &mut &'a mut [u32], len: usize) -> &'a mut [u32] {
    let (head, tail) = mem::take(rest).split_at_mut(len);
    *rest = tail;
    head
}

/// One contiguous buffer partitioned into fixed sub-regions.
pub struct Arena {
    words: Vec<u32>,
    layout: Layout,
}

impl Arena {
    /// Allocates the buffer.
    ///
    /// # Errors
    ///
    /// The layout must fit in `heap_size` bytes, `heap_size` must be a
    /// multiple of 4 and the heap must be addressable with 32-bit byte offsets.
    pub fn new(heap_size: usize, layout: Layout) -> Result<Self> {
        if heap_size % WORD != 0 {
            return Err(HashCrfError::invalid_argument(
                "heap_size must be a multiple of 4",
            ));
        }
        if u32::try_from(heap_size).is_err() {
            return Err(HashCrfError::invalid_argument(
                "heap_size must be addressable with 32-bit offsets",
            ));
        }
        if layout.total_words() * WORD > heap_size {
            return Err(HashCrfError::invalid_argument(
                "sub-regions do not fit in heap_size",
            ));
        }
        Ok(Self {
            words: vec![0; heap_size / WORD],
            layout,
        })
    }

    /// Returns the partition.
    #[inline(always)]
    pub const fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Returns the size of the buffer in bytes.
    #[inline(always)]
    pub fn heap_size(&self) -> usize {
        self.words.len() * WORD
    }

    /// Returns a read-only typed view of one region.
    pub fn view<T>(&self, id: RegionId) -> &[T]
    where
        T: Pod,
    {
        let region = self.layout.region(id);
        bytemuck::cast_slice(&self.words[region.offset..region.offset + region.len])
    }

    /// Splits the buffer into disjoint typed views.
    pub fn regions(&mut self) -> Regions<'_> {
        let layout = &self.layout;
        let mut rest = &mut self.words[..layout.total_words()];
        let len = |id| layout.region(id).len;
        let scratch = carve(&mut rest, len(RegionId::Scratch));
        let train_headers = carve(&mut rest, len(RegionId::TrainHeaders));
        let dev_headers = carve(&mut rest, len(RegionId::DevHeaders));
        let nz = carve(&mut rest, len(RegionId::Nz));
        let keys = carve(&mut rest, len(RegionId::Keys));
        let values = carve(&mut rest, len(RegionId::Values));
        let paths = carve(&mut rest, len(RegionId::Paths));
        let foi = carve(&mut rest, len(RegionId::Foi));
        let soi = carve(&mut rest, len(RegionId::Soi));
        let weights = carve(&mut rest, len(RegionId::Weights));
        let loss = carve(&mut rest, len(RegionId::Loss));
        let prediction = carve(&mut rest, len(RegionId::Prediction));
        let prediction_score = carve(&mut rest, len(RegionId::PredictionScore));
        let work = carve(&mut rest, len(RegionId::Work));
        Regions {
            scratch,
            train_headers,
            dev_headers,
            nz,
            keys,
            values: bytemuck::cast_slice_mut(values),
            paths,
            foi: bytemuck::cast_slice_mut(foi),
            soi: bytemuck::cast_slice_mut(soi),
            weights: bytemuck::cast_slice_mut(weights),
            loss: bytemuck::cast_slice_mut(loss),
            prediction,
            prediction_score: bytemuck::cast_slice_mut(prediction_score),
            work,
        }
    }
}

/// Bump allocator over a region, used for buffers that live for one operation.
pub struct Scratch<'a> {
    rest: &'a mut [u32],
    store: &'static str,
}

impl<'a> Scratch<'a> {
    /// Wraps the region. `store` names it in exhaustion errors.
    pub fn new(words: &'a mut [u32], store: &'static str) -> Self {
        Self { rest: words, store }
    }

    /// Takes `n` elements of `T` from the front of the remaining space.
    ///
    /// The returned memory holds whatever the previous user left there.
    ///
    /// # Errors
    ///
    /// Returns [`HashCrfError::StoreExhausted`] without consuming anything when
    /// the remaining space is too small.
    pub fn take<T>(&mut self, n: usize) -> Result<&'a mut [T]>
    where
        T: Pod,
    {
        debug_assert_eq!(0, mem::size_of::<T>() % WORD);
        let words = n * mem::size_of::<T>() / WORD;
        if words > self.rest.len() {
            return Err(HashCrfError::store_exhausted(self.store));
        }
        let (head, tail) = mem::take(&mut self.rest).split_at_mut(words);
        self.rest = tail;
        Ok(bytemuck::cast_slice_mut(head))
    }

    /// Takes `n` elements and fills them with `value`.
    ///
    /// # Errors
    ///
    /// See [`Scratch::take`].
    pub fn filled<T>(&mut self, n: usize, value: T) -> Result<&'a mut [T]>
    where
        T: Pod,
    {
        let buf = self.take(n)?;
        buf.fill(value);
        Ok(buf)
    }

    /// Returns the number of remaining words.
    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.rest.len()
    }
}
