//! Result schema description and structural fingerprinting.

use crate::value::ColumnType;

/// Metadata for one result column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnMeta {
    pub name: String,
    pub column_type: ColumnType,
    /// `Some(false)` when the driver knows the column can never be NULL.
    pub nullable: Option<bool>,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: None,
        }
    }

    /// Record the nullability reported by the driver.
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    /// Column declared NOT NULL.
    pub fn not_null(self) -> Self {
        self.nullable(false)
    }
}

const FNV_OFFSET: u64 = 14695981039346656037;
const FNV_OFFSET_ALT: u64 = 9650029242287828579;
const FNV_PRIME: u64 = 1099511628211;

/// Structural identity of a result schema.
///
/// Two schemas with the same column names (compared case-insensitively),
/// types and order always fingerprint equal. Unequal schemas collide only
/// with negligible probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaFingerprint {
    pub field_count: usize,
    pub hash1: u64,
    pub hash2: u64,
}

struct Accumulator {
    h1: u64,
    h2: u64,
}

impl Accumulator {
    #[inline]
    fn fold(&mut self, unit: u64) {
        self.h1 = (self.h1 ^ unit).wrapping_mul(FNV_PRIME);
        self.h2 = (self.h2.rotate_left(5) ^ unit).wrapping_mul(FNV_PRIME);
    }

    #[inline]
    fn fold_char(&mut self, c: char) {
        if c.is_ascii() {
            let mut byte = c as u8;
            if byte.is_ascii_lowercase() {
                byte &= !0x20;
            }
            self.fold(byte as u64);
        } else {
            for upper in c.to_uppercase() {
                self.fold(upper as u64);
            }
        }
    }
}

impl SchemaFingerprint {
    /// Fingerprint of an empty schema.
    pub const EMPTY: SchemaFingerprint = SchemaFingerprint {
        field_count: 0,
        hash1: FNV_OFFSET,
        hash2: FNV_OFFSET_ALT,
    };

    pub fn compute(columns: &[ColumnMeta]) -> Self {
        let mut acc = Accumulator {
            h1: FNV_OFFSET,
            h2: FNV_OFFSET_ALT,
        };
        for (ordinal, column) in columns.iter().enumerate() {
            for c in column.name.chars() {
                acc.fold_char(c);
            }
            // separator so ("AB","C") differs from ("A","BC")
            acc.fold(0);
            for byte in (column.column_type.id() as u64).to_le_bytes() {
                acc.fold(byte as u64);
            }
            acc.h2 = (acc.h2 ^ (ordinal as u64 + 1)).wrapping_mul(FNV_PRIME);
        }
        Self {
            field_count: columns.len(),
            hash1: acc.h1,
            hash2: acc.h2,
        }
    }
}

/// Ordinals of the columns declared NOT NULL, one bit per column.
///
/// A binder compiled for a NOT NULL column reads without a null check, so two
/// schemas with equal fingerprints but different masks need separate factories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NotNullMask(Box<[u64]>);

impl NotNullMask {
    pub fn compute(columns: &[ColumnMeta]) -> Self {
        if columns.iter().all(|c| c.nullable != Some(false)) {
            return Self::default();
        }
        let mut words = vec![0u64; columns.len().div_ceil(64)];
        for (ordinal, column) in columns.iter().enumerate() {
            if column.nullable == Some(false) {
                words[ordinal / 64] |= 1 << (ordinal % 64);
            }
        }
        Self(words.into_boxed_slice())
    }

    /// Whether the column at `ordinal` is declared NOT NULL.
    pub fn contains(&self, ordinal: usize) -> bool {
        self.0
            .get(ordinal / 64)
            .is_some_and(|word| word & (1 << (ordinal % 64)) != 0)
    }

    /// No column is declared NOT NULL.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
