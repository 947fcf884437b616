//! Instance store and encoder.
//!
//! An instance is a fixed-size header followed by a variable-length payload
//! spread over four parallel stores (nonzero counts, keys, values, paths).
//! The header records the chain length and absolute byte offsets into the
//! arena; a path offset of 0 marks an instance without supervision.

use core::ops::Range;

use bincode::{Decode, Encode};
use hashbrown::HashMap;

use crate::arena::{Layout, RegionId, Regions, WORD};
use crate::errors::{HashCrfError, Result};
use crate::hashing;

/// Number of words in one header slot.
pub const HEADER_WORDS: usize = 7;

/// Purpose of an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InstanceKind {
    /// Training instance. Unseen labels extend the label table.
    Train,

    /// Development (held-out) instance. Labels must already be known.
    Dev,
}

impl InstanceKind {
    pub(crate) const fn header_region(self) -> RegionId {
        match self {
            Self::Train => RegionId::TrainHeaders,
            Self::Dev => RegionId::DevHeaders,
        }
    }
}

/// Decoded header slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct InstanceHeader {
    /// Chain length.
    pub length: u32,
    /// Byte offset of the per-position nonzero counts.
    pub nz_offset: u32,
    /// Byte offset of the values.
    pub values_offset: u32,
    /// Byte offset of the hashed keys.
    pub indices_offset: u32,
    /// Byte offset of the supervisory path, or 0.
    pub path_offset: u32,
    /// Sum of the nonzero counts.
    pub total_nz: u32,
    /// 0 for training, 1 for development instances.
    pub kind: u32,
}

fn header_config() -> impl bincode::config::Config {
    bincode::config::standard().with_fixed_int_encoding()
}

/// One chain position: a label and a sparse feature vector.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Item {
    /// Label, or `None` for an instance to be predicted.
    pub label: Option<String>,
    /// Feature keys.
    pub keys: Vec<String>,
    /// Feature values, parallel to `keys`.
    pub values: Vec<f32>,
}

impl Item {
    /// Creates a new item.
    pub fn new<S>(label: Option<S>, keys: Vec<String>, values: Vec<f32>) -> Self
    where
        S: Into<String>,
    {
        Self {
            label: label.map(Into::into),
            keys,
            values,
        }
    }
}

/// Ordered, append-only list of labels. A label's id is its position.
#[derive(Debug, Default)]
pub struct LabelTable {
    ids: HashMap<String, u32>,
    names: Vec<String>,
    capacity: usize,
}

impl LabelTable {
    /// Creates an empty table holding at most `capacity` labels.
    pub fn new(capacity: usize) -> Self {
        Self {
            ids: HashMap::new(),
            names: vec![],
            capacity,
        }
    }

    /// Returns the id of the label.
    #[inline(always)]
    pub fn get(&self, label: &str) -> Option<u32> {
        self.ids.get(label).copied()
    }

    /// Returns the label of the id.
    #[inline(always)]
    pub fn name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    /// Returns all labels ordered by id.
    #[inline(always)]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Returns the number of labels.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    fn push(&mut self, label: &str) -> u32 {
        let id = self.names.len() as u32;
        self.ids.insert(label.to_string(), id);
        self.names.push(label.to_string());
        id
    }
}

/// Element ranges of one instance inside the payload stores.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceSpan {
    /// Range in the nonzero-count store.
    pub nz: Range<usize>,
    /// Range in the key and value stores.
    pub kv: Range<usize>,
    /// Range in the path store.
    pub path: Option<Range<usize>>,
}

impl InstanceSpan {
    /// Borrows the payload.
    #[inline(always)]
    pub fn view<'r>(
        &self,
        nz: &'r [u32],
        keys: &'r [u32],
        values: &'r [f32],
        paths: &'r [u32],
    ) -> InstanceRef<'r> {
        InstanceRef {
            nz: &nz[self.nz.clone()],
            keys: &keys[self.kv.clone()],
            values: &values[self.kv.clone()],
            path: self.path.clone().map(|r| &paths[r]),
        }
    }
}

/// Borrowed payload of one instance.
#[derive(Clone, Copy, Debug)]
pub struct InstanceRef<'r> {
    /// Nonzero count of each position.
    pub nz: &'r [u32],
    /// Hashed keys of all positions, concatenated.
    pub keys: &'r [u32],
    /// Values of all positions, concatenated.
    pub values: &'r [f32],
    /// Supervisory path.
    pub path: Option<&'r [u32]>,
}

impl InstanceRef<'_> {
    /// Returns the chain length.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.nz.len()
    }
}

/// Free pointer of one growing sub-region, in elements.
#[derive(Clone, Copy, Debug)]
struct Cursor {
    region: RegionId,
    used: usize,
    capacity: usize,
}

impl Cursor {
    fn new(layout: &Layout, region: RegionId) -> Self {
        Self {
            region,
            used: 0,
            capacity: layout.region(region).len,
        }
    }

    #[inline(always)]
    fn check(&self, n: usize) -> Result<()> {
        if n > self.capacity - self.used {
            tracing::warn!(store = self.region.name(), requested = n, "store exhausted");
            return Err(HashCrfError::store_exhausted(self.region.name()));
        }
        Ok(())
    }
}

/// Usage of one sub-region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionUsage {
    /// Name of the sub-region.
    pub name: &'static str,
    /// Reserved bytes.
    pub capacity_bytes: usize,
    /// Bytes in use.
    pub used_bytes: usize,
}

/// Appends instances into the arena stores and locates them again.
pub struct InstanceStore {
    layout: Layout,
    train_headers: Cursor,
    dev_headers: Cursor,
    nz: Cursor,
    keys: Cursor,
    values: Cursor,
    paths: Cursor,
    labels: LabelTable,
}

impl InstanceStore {
    /// Creates an empty store over the given partition.
    pub fn new(layout: Layout, label_capacity: usize) -> Self {
        Self {
            train_headers: Cursor::new(&layout, RegionId::TrainHeaders),
            dev_headers: Cursor::new(&layout, RegionId::DevHeaders),
            nz: Cursor::new(&layout, RegionId::Nz),
            keys: Cursor::new(&layout, RegionId::Keys),
            values: Cursor::new(&layout, RegionId::Values),
            paths: Cursor::new(&layout, RegionId::Paths),
            labels: LabelTable::new(label_capacity),
            layout,
        }
    }

    /// Returns the label table.
    #[inline(always)]
    pub const fn labels(&self) -> &LabelTable {
        &self.labels
    }

    /// Returns the number of stored instances of the kind.
    #[inline(always)]
    pub fn len(&self, kind: InstanceKind) -> usize {
        self.header_cursor(kind).used / HEADER_WORDS
    }

    #[inline(always)]
    const fn header_cursor(&self, kind: InstanceKind) -> &Cursor {
        match kind {
            InstanceKind::Train => &self.train_headers,
            InstanceKind::Dev => &self.dev_headers,
        }
    }

    /// Reports the usage of the growing stores.
    pub fn usage(&self) -> Vec<RegionUsage> {
        [
            self.train_headers,
            self.dev_headers,
            self.nz,
            self.keys,
            self.values,
            self.paths,
        ]
        .iter()
        .map(|c| RegionUsage {
            name: c.region.name(),
            capacity_bytes: c.capacity * WORD,
            used_bytes: c.used * WORD,
        })
        .collect()
    }

    /// Writes the next header slot from the current free pointers of the payload stores.
    ///
    /// # Errors
    ///
    /// Fails without writing when the header store is full.
    pub fn append_instance_header(
        &mut self,
        regions: &mut Regions<'_>,
        length: u32,
        total_nz: u32,
        supervised: bool,
        kind: InstanceKind,
    ) -> Result<usize> {
        let cursor = *self.header_cursor(kind);
        cursor.check(HEADER_WORDS)?;
        let header = InstanceHeader {
            length,
            nz_offset: self.layout.byte_offset(RegionId::Nz, self.nz.used),
            values_offset: self.layout.byte_offset(RegionId::Values, self.values.used),
            indices_offset: self.layout.byte_offset(RegionId::Keys, self.keys.used),
            path_offset: if supervised {
                self.layout.byte_offset(RegionId::Paths, self.paths.used)
            } else {
                0
            },
            total_nz,
            kind: match kind {
                InstanceKind::Train => 0,
                InstanceKind::Dev => 1,
            },
        };
        let slots = match kind {
            InstanceKind::Train => &mut *regions.train_headers,
            InstanceKind::Dev => &mut *regions.dev_headers,
        };
        let slot = &mut slots[cursor.used..cursor.used + HEADER_WORDS];
        bincode::encode_into_slice(header, bytemuck::cast_slice_mut(slot), header_config())
            .map_err(|_| HashCrfError::CorruptHeader)?;
        let id = cursor.used / HEADER_WORDS;
        match kind {
            InstanceKind::Train => self.train_headers.used += HEADER_WORDS,
            InstanceKind::Dev => self.dev_headers.used += HEADER_WORDS,
        }
        Ok(id)
    }

    /// Appends one nonzero count.
    ///
    /// # Errors
    ///
    /// Fails without writing when the store is full.
    pub fn append_nz(&mut self, regions: &mut Regions<'_>, count: u32) -> Result<()> {
        self.nz.check(1)?;
        regions.nz[self.nz.used] = count;
        self.nz.used += 1;
        Ok(())
    }

    /// Appends one label id of a supervisory path.
    ///
    /// # Errors
    ///
    /// Fails without writing when the store is full.
    pub fn append_correct_path(&mut self, regions: &mut Regions<'_>, state_id: u32) -> Result<()> {
        self.paths.check(1)?;
        regions.paths[self.paths.used] = state_id;
        self.paths.used += 1;
        Ok(())
    }

    /// Appends one hashed key and its value.
    ///
    /// # Errors
    ///
    /// Fails without writing when either store is full.
    pub fn append_key_value(&mut self, regions: &mut Regions<'_>, key: u32, value: f32) -> Result<()> {
        self.keys.check(1)?;
        self.values.check(1)?;
        regions.keys[self.keys.used] = key;
        regions.values[self.values.used] = value;
        self.keys.used += 1;
        self.values.used += 1;
        Ok(())
    }

    /// Validates and appends a whole instance. Returns its id within `kind`.
    ///
    /// Nothing is written and the label table is left untouched unless every
    /// check passes.
    ///
    /// # Errors
    ///
    /// - [`HashCrfError::InvalidInstance`]: empty sequence, mismatched keys and
    ///   values, partially labeled sequence, or unlabeled training sequence.
    /// - [`HashCrfError::UnknownLabel`]: an unseen label in a dev instance.
    /// - [`HashCrfError::StoreExhausted`]: a store or the label table is full.
    pub fn append_instance(
        &mut self,
        regions: &mut Regions<'_>,
        items: &[Item],
        kind: InstanceKind,
    ) -> Result<usize> {
        if items.is_empty() {
            return Err(HashCrfError::invalid_instance("instance has no items"));
        }
        let mut total_nz = 0;
        for item in items {
            if item.keys.len() != item.values.len() {
                return Err(HashCrfError::invalid_instance(
                    "keys and values differ in length",
                ));
            }
            total_nz += item.keys.len();
        }
        let labeled = items.iter().filter(|item| item.label.is_some()).count();
        let supervised = match (labeled, kind) {
            (0, InstanceKind::Train) => {
                return Err(HashCrfError::invalid_instance(
                    "training instance has no labels",
                ));
            }
            (0, InstanceKind::Dev) => false,
            (n, _) if n == items.len() => true,
            _ => {
                return Err(HashCrfError::invalid_instance(
                    "instance is partially labeled",
                ));
            }
        };

        let mut path = Vec::with_capacity(if supervised { items.len() } else { 0 });
        let mut pending: Vec<&str> = vec![];
        for label in items.iter().filter_map(|item| item.label.as_deref()) {
            if let Some(id) = self.labels.get(label) {
                path.push(id);
            } else if kind == InstanceKind::Dev {
                return Err(HashCrfError::unknown_label(label));
            } else if let Some(p) = pending.iter().position(|&x| x == label) {
                path.push((self.labels.len() + p) as u32);
            } else {
                path.push((self.labels.len() + pending.len()) as u32);
                pending.push(label);
            }
        }
        if self.labels.len() + pending.len() > self.labels.capacity {
            tracing::warn!(capacity = self.labels.capacity, "label table exhausted");
            return Err(HashCrfError::store_exhausted("label table"));
        }

        self.header_cursor(kind).check(HEADER_WORDS)?;
        self.nz.check(items.len())?;
        self.keys.check(total_nz)?;
        self.values.check(total_nz)?;
        self.paths.check(path.len())?;

        for label in pending {
            self.labels.push(label);
        }
        // Capacities are below 2^32 words, so the casts are lossless.
        let id = self.append_instance_header(
            regions,
            items.len() as u32,
            total_nz as u32,
            supervised,
            kind,
        )?;
        for item in items {
            self.append_nz(regions, item.keys.len() as u32)?;
        }
        for &state_id in &path {
            self.append_correct_path(regions, state_id)?;
        }
        for item in items {
            for (key, &value) in item.keys.iter().zip(&item.values) {
                self.append_key_value(regions, hashing::hash_key(key), value)?;
            }
        }
        Ok(id)
    }

    /// Decodes the header of an instance.
    ///
    /// # Errors
    ///
    /// The id must be in range.
    pub fn header(&self, headers: &[u32], kind: InstanceKind, id: usize) -> Result<InstanceHeader> {
        if id >= self.len(kind) {
            return Err(HashCrfError::invalid_argument("instance id is out of range"));
        }
        debug_assert_eq!(
            self.layout.region(kind.header_region()).len,
            headers.len()
        );
        let slot = &headers[id * HEADER_WORDS..(id + 1) * HEADER_WORDS];
        let (header, _) = bincode::decode_from_slice(bytemuck::cast_slice(slot), header_config())
            .map_err(|_| HashCrfError::CorruptHeader)?;
        Ok(header)
    }

    /// Locates the payload of an instance.
    ///
    /// # Errors
    ///
    /// The id must be in range.
    pub fn locate(&self, headers: &[u32], kind: InstanceKind, id: usize) -> Result<InstanceSpan> {
        let header = self.header(headers, kind, id)?;
        let length = header.length as usize;
        let total_nz = header.total_nz as usize;
        let span = |region: RegionId, offset: u32, len: usize| -> Result<Range<usize>> {
            let start = self.layout.index_of(region, offset)?;
            let end = start + len;
            if end > self.layout.region(region).len {
                return Err(HashCrfError::CorruptHeader);
            }
            Ok(start..end)
        };
        let nz = span(RegionId::Nz, header.nz_offset, length)?;
        let kv = span(RegionId::Keys, header.indices_offset, total_nz)?;
        if span(RegionId::Values, header.values_offset, total_nz)? != kv {
            return Err(HashCrfError::CorruptHeader);
        }
        let path = if header.path_offset == 0 {
            None
        } else {
            Some(span(RegionId::Paths, header.path_offset, length)?)
        };
        Ok(InstanceSpan { nz, kv, path })
    }
}
