//! Result set field descriptors.
use crate::postgres::Oid;

/// Wire format of a column value.
///
/// The V2 backend does not announce the format up front; it is discovered
/// lazily from the first row batch of that kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Text,
    Binary,
}

/// Description of one column of a result set.
///
/// Produced per result set and shared read-only by all of its rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    /// The column name.
    pub name: String,
    /// The object ID of the column's data type.
    pub type_oid: Oid,
    /// Declared byte length of the type. Negative values denote
    /// variable-width types.
    pub type_len: i16,
    /// The type modifier. The meaning is type-specific.
    pub type_modifier: i32,
    /// The format the column values arrived in.
    pub format: Format,
}
