//! Target type description.
//!
//! A [`Record`] lists its settable fields once; each [`Field`] knows how to
//! turn a result column into a small typed binder closure. The row factory
//! strings those binders together per schema.
//!
//! ```rust
//! use rowforge::{db_enum, record};
//!
//! db_enum! {
//!     pub enum Category: i32 {
//!         #[default]
//!         Regular = 1,
//!         Lead = 2,
//!     }
//! }
//!
//! record! {
//!     #[derive(Debug, Default, Clone, PartialEq)]
//!     pub struct Employee {
//!         pub id: i32 => "Id",
//!         pub name: String => "Name",
//!         pub category: Option<Category> => "Category",
//!     }
//! }
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use tracing::debug;

use crate::driver::Row;
use crate::error::{ConvertError, MapError, MapResult};
use crate::schema::ColumnMeta;
use crate::value::{ColumnType, Value};

/// How a column is read for a given field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPath {
    /// Typed accessor, no conversion.
    Direct,
    /// Enum parsed from its textual name.
    Name,
    /// Boxed read followed by [`FieldType::convert`].
    Convert,
}

/// A type a result column can be assigned to.
pub trait FieldType: Default + Send + Sized + 'static {
    /// Column type read with a direct typed accessor.
    const EXACT: Option<ColumnType>;

    /// NULL resets the field to its default (`Option`, text, blobs).
    /// For plain value types a NULL leaves the field untouched.
    const NULLABLE: bool = false;

    fn read_path(column: ColumnType) -> ReadPath {
        match Self::EXACT {
            Some(exact) if exact == column => ReadPath::Direct,
            _ => ReadPath::Convert,
        }
    }

    /// Read a non-null cell whose type equals [`Self::EXACT`].
    fn read_exact(row: &dyn Row, ordinal: usize) -> Result<Self, ConvertError>;

    /// Convert a boxed value.
    fn convert(value: Value) -> Result<Self, ConvertError>;

    /// Parse from a name (enums).
    fn parse_name(name: &str) -> Result<Self, ConvertError> {
        Self::convert(Value::Text(name.to_string()))
    }
}

/// Applies one column of the current row to a target instance.
pub(crate) type Binder<T> =
    Box<dyn Fn(&mut T, &dyn Row, usize) -> Result<(), ConvertError> + Send + Sync>;

type Compile<T> = Box<dyn Fn(&ColumnMeta) -> Binder<T> + Send + Sync>;

/// A settable field of `T`.
pub struct Field<T> {
    name: &'static str,
    compile: Compile<T>,
}

impl<T: 'static> Field<T> {
    /// Describe a field matched to the column `name` (case-insensitive).
    pub fn new<F: FieldType>(name: &'static str, set: fn(&mut T, F)) -> Self {
        Self {
            name,
            compile: Box::new(move |column| bind_column::<T, F>(set, column)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn bind(&self, column: &ColumnMeta) -> Binder<T> {
        (self.compile)(column)
    }
}

enum NullPolicy {
    /// Column declared NOT NULL; no check.
    NotNull,
    AssignDefault,
    Skip,
}

fn bind_column<T: 'static, F: FieldType>(set: fn(&mut T, F), column: &ColumnMeta) -> Binder<T> {
    let read: fn(&dyn Row, usize) -> Result<F, ConvertError> =
        match F::read_path(column.column_type) {
            ReadPath::Direct => F::read_exact,
            ReadPath::Name => |row: &dyn Row, ordinal: usize| F::parse_name(row.get_str(ordinal)?),
            ReadPath::Convert => |row: &dyn Row, ordinal: usize| F::convert(row.get_value(ordinal)?),
        };

    let policy = if column.nullable == Some(false) {
        NullPolicy::NotNull
    } else if F::NULLABLE {
        NullPolicy::AssignDefault
    } else {
        NullPolicy::Skip
    };

    match policy {
        NullPolicy::NotNull => Box::new(move |target: &mut T, row: &dyn Row, ordinal: usize| {
            set(target, read(row, ordinal)?);
            Ok(())
        }),
        NullPolicy::AssignDefault => {
            Box::new(move |target: &mut T, row: &dyn Row, ordinal: usize| {
                let value = if row.is_null(ordinal)? {
                    F::default()
                } else {
                    read(row, ordinal)?
                };
                set(target, value);
                Ok(())
            })
        }
        NullPolicy::Skip => Box::new(move |target: &mut T, row: &dyn Row, ordinal: usize| {
            if !row.is_null(ordinal)? {
                set(target, read(row, ordinal)?);
            }
            Ok(())
        }),
    }
}

/// A struct rows can be mapped onto.
///
/// `Default` supplies the starting value of every field a row does not set.
/// Usually implemented with [`record!`](crate::record!).
pub trait Record: Default + Send + 'static {
    fn fields() -> Vec<Field<Self>>;
}

/// Case-insensitive column name to field lookup for one record type.
pub struct PropertyMap<T> {
    fields: Vec<Field<T>>,
    index: HashMap<String, usize>,
}

static PROPERTY_MAPS: LazyLock<DashMap<TypeId, Arc<dyn Any + Send + Sync>>> =
    LazyLock::new(DashMap::new);

impl<T: Record> PropertyMap<T> {
    fn build() -> MapResult<Self> {
        let fields = T::fields();
        let mut index = HashMap::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            match index.entry(field.name.to_uppercase()) {
                Entry::Occupied(existing) => {
                    let other: &Field<T> = &fields[*existing.get()];
                    return Err(MapError::config(format!(
                        "{}: fields '{}' and '{}' map to the same column",
                        std::any::type_name::<T>(),
                        other.name,
                        field.name
                    )));
                }
                Entry::Vacant(slot) => {
                    slot.insert(i);
                }
            }
        }
        debug!(
            "Built property map for {} ({} fields)",
            std::any::type_name::<T>(),
            fields.len()
        );
        Ok(Self { fields, index })
    }

    /// The process-wide map for `T`, built on first use.
    pub fn shared() -> MapResult<Arc<Self>> {
        let key = TypeId::of::<T>();
        if let Some(found) = PROPERTY_MAPS.get(&key) {
            if let Ok(map) = Arc::downcast::<Self>(found.value().clone()) {
                return Ok(map);
            }
        }
        let built: Arc<dyn Any + Send + Sync> = Arc::new(Self::build()?);
        let winner = PROPERTY_MAPS.entry(key).or_insert(built).value().clone();
        Arc::downcast::<Self>(winner)
            .map_err(|_| MapError::config("property map registry holds a foreign type"))
    }

    /// Field matching `column`, ignoring case.
    pub fn find(&self, column: &str) -> Option<&Field<T>> {
        self.index
            .get(&column.to_uppercase())
            .map(|&i| &self.fields[i])
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Define a struct and its [`Record`] implementation.
///
/// Each field may name its column with `=> "Column"`; otherwise the field
/// identifier is the column name. Matching is case-insensitive.
#[macro_export]
macro_rules! record {
    (@column $field:ident $column:literal) => { $column };
    (@column $field:ident) => { stringify!($field) };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident : $ty:ty $(=> $column:literal)?
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $( $(#[$fmeta])* $fvis $field: $ty, )*
        }

        impl $crate::record::Record for $name {
            fn fields() -> ::std::vec::Vec<$crate::record::Field<Self>> {
                ::std::vec![
                    $(
                        $crate::record::Field::new::<$ty>(
                            $crate::record!(@column $field $($column)?),
                            |target: &mut Self, value: $ty| target.$field = value,
                        ),
                    )*
                ]
            }
        }
    };
}

/// Define a fieldless enum stored as an integer or as its variant name.
///
/// Text columns parse the variant name ignoring case (numeric text is accepted
/// too); numeric columns convert through the representation type. The enum
/// derives `Debug`, `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash` and `Default`,
/// so one variant must carry `#[default]`.
#[macro_export]
macro_rules! db_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $repr:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $value:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        #[repr($repr)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant = $value, )+
        }

        impl $name {
            /// Every variant with its name.
            pub const VARIANTS: &'static [(&'static str, $name)] =
                &[ $( (stringify!($variant), $name::$variant), )+ ];

            pub fn from_repr(value: $repr) -> ::std::option::Option<Self> {
                $( if value == $value { return ::std::option::Option::Some($name::$variant); } )+
                ::std::option::Option::None
            }

            pub fn from_name(name: &str) -> ::std::option::Option<Self> {
                let name = name.trim();
                if let ::std::result::Result::Ok(value) = name.parse::<$repr>() {
                    return Self::from_repr(value);
                }
                Self::VARIANTS
                    .iter()
                    .find(|(variant, _)| variant.eq_ignore_ascii_case(name))
                    .map(|(_, value)| *value)
            }

            fn unknown(value: ::std::string::String) -> $crate::error::ConvertError {
                $crate::error::ConvertError::UnknownVariant {
                    enum_name: stringify!($name),
                    value,
                }
            }
        }

        impl $crate::record::FieldType for $name {
            const EXACT: ::std::option::Option<$crate::value::ColumnType> =
                <$repr as $crate::record::FieldType>::EXACT;

            fn read_path(column: $crate::value::ColumnType) -> $crate::record::ReadPath {
                if column == $crate::value::ColumnType::Text {
                    $crate::record::ReadPath::Name
                } else if ::std::option::Option::Some(column) == Self::EXACT {
                    $crate::record::ReadPath::Direct
                } else {
                    $crate::record::ReadPath::Convert
                }
            }

            fn read_exact(
                row: &dyn $crate::driver::Row,
                ordinal: usize,
            ) -> ::std::result::Result<Self, $crate::error::ConvertError> {
                let raw = <$repr as $crate::record::FieldType>::read_exact(row, ordinal)?;
                Self::from_repr(raw).ok_or_else(|| Self::unknown(raw.to_string()))
            }

            fn convert(
                value: $crate::value::Value,
            ) -> ::std::result::Result<Self, $crate::error::ConvertError> {
                if let $crate::value::Value::Text(name) = &value {
                    return Self::parse_name(name);
                }
                let raw = <$repr as $crate::record::FieldType>::convert(value)?;
                Self::from_repr(raw).ok_or_else(|| Self::unknown(raw.to_string()))
            }

            fn parse_name(name: &str) -> ::std::result::Result<Self, $crate::error::ConvertError> {
                Self::from_name(name).ok_or_else(|| Self::unknown(name.to_string()))
            }
        }
    };
}
