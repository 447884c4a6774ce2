//! Column type identifiers and attributes for StrataDB.

use serde::{Deserialize, Serialize};

/// Identifier for all column types stored in a spec.
///
/// Type ids are persisted in the spec's `types` array, so the numeric
/// values are part of the storage format and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ColumnType {
    // Scalar types
    Int = 0,
    Bool = 1,
    Float = 2,

    // Variable-width types
    String = 10,
    /// Internal optimization of String; hidden from the public type.
    StringEnum = 11,
    Binary = 12,

    // Composite types
    Table = 20,
    Link = 21,
    LinkList = 22,
    BackLink = 23,
}

impl ColumnType {
    /// Number of entries this column type contributes to the sparse
    /// subspec array: Table/Link/LinkList contribute one, BackLink two,
    /// everything else zero.
    pub fn subspec_entries(&self) -> usize {
        match self {
            ColumnType::Table | ColumnType::Link | ColumnType::LinkList => 1,
            ColumnType::BackLink => 2,
            _ => 0,
        }
    }

    /// Returns true if this type stores links between tables.
    pub fn is_link_type(&self) -> bool {
        matches!(self, ColumnType::Link | ColumnType::LinkList)
    }

    /// Returns true if this type carries a subspec entry.
    pub fn has_subspec(&self) -> bool {
        self.subspec_entries() != 0
    }

    /// Returns true if columns of this type have a public name.
    /// Backlink columns are internal and unnamed.
    pub fn has_name(&self) -> bool {
        !matches!(self, ColumnType::BackLink)
    }

    /// Returns true for string-valued columns, including the enum-coded
    /// internal representation.
    pub fn is_string(&self) -> bool {
        matches!(self, ColumnType::String | ColumnType::StringEnum)
    }

    /// The public data type, hiding internal representations.
    pub fn public_type(&self) -> DataType {
        match self {
            ColumnType::Int => DataType::Int,
            ColumnType::Bool => DataType::Bool,
            ColumnType::Float => DataType::Float,
            ColumnType::String | ColumnType::StringEnum => DataType::String,
            ColumnType::Binary => DataType::Binary,
            ColumnType::Table => DataType::Table,
            ColumnType::Link => DataType::Link,
            ColumnType::LinkList => DataType::LinkList,
            ColumnType::BackLink => DataType::BackLink,
        }
    }

    /// Decodes a persisted type id.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ColumnType::Int),
            1 => Some(ColumnType::Bool),
            2 => Some(ColumnType::Float),
            10 => Some(ColumnType::String),
            11 => Some(ColumnType::StringEnum),
            12 => Some(ColumnType::Binary),
            20 => Some(ColumnType::Table),
            21 => Some(ColumnType::Link),
            22 => Some(ColumnType::LinkList),
            23 => Some(ColumnType::BackLink),
            _ => None,
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnType::Int => "INT",
            ColumnType::Bool => "BOOL",
            ColumnType::Float => "FLOAT",
            ColumnType::String => "STRING",
            ColumnType::StringEnum => "STRING_ENUM",
            ColumnType::Binary => "BINARY",
            ColumnType::Table => "TABLE",
            ColumnType::Link => "LINK",
            ColumnType::LinkList => "LINK_LIST",
            ColumnType::BackLink => "BACKLINK",
        };
        write!(f, "{}", name)
    }
}

/// Public column data type, as seen through the schema API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int,
    Bool,
    Float,
    String,
    Binary,
    Table,
    Link,
    LinkList,
    BackLink,
}

/// Per-column attribute bits, persisted in the spec's `attrs` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnAttr(u8);

impl ColumnAttr {
    /// No attributes set.
    pub const NONE: ColumnAttr = ColumnAttr(0);
    /// The column carries a search index.
    pub const INDEXED: ColumnAttr = ColumnAttr(1);
    /// The search index rejects duplicate values.
    pub const UNIQUE: ColumnAttr = ColumnAttr(2);
    /// Cells may hold null.
    pub const NULLABLE: ColumnAttr = ColumnAttr(4);
    /// Link columns with this attribute cascade row removal.
    pub const STRONG_LINKS: ColumnAttr = ColumnAttr(8);

    /// Builds an attribute set from raw persisted bits.
    pub fn from_bits(bits: u8) -> Self {
        ColumnAttr(bits)
    }

    /// Raw bits for persistence.
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Returns true if all bits of `other` are set in `self`.
    pub fn contains(&self, other: ColumnAttr) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the union of two attribute sets.
    pub fn with(&self, other: ColumnAttr) -> ColumnAttr {
        ColumnAttr(self.0 | other.0)
    }

    pub fn is_indexed(&self) -> bool {
        self.contains(ColumnAttr::INDEXED)
    }

    pub fn is_unique(&self) -> bool {
        self.contains(ColumnAttr::UNIQUE)
    }

    pub fn is_nullable(&self) -> bool {
        self.contains(ColumnAttr::NULLABLE)
    }

    pub fn is_strong_links(&self) -> bool {
        self.contains(ColumnAttr::STRONG_LINKS)
    }
}

impl Default for ColumnAttr {
    fn default() -> Self {
        ColumnAttr::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subspec_entries() {
        assert_eq!(ColumnType::Int.subspec_entries(), 0);
        assert_eq!(ColumnType::Bool.subspec_entries(), 0);
        assert_eq!(ColumnType::Float.subspec_entries(), 0);
        assert_eq!(ColumnType::String.subspec_entries(), 0);
        assert_eq!(ColumnType::Binary.subspec_entries(), 0);
        assert_eq!(ColumnType::Table.subspec_entries(), 1);
        assert_eq!(ColumnType::Link.subspec_entries(), 1);
        assert_eq!(ColumnType::LinkList.subspec_entries(), 1);
        assert_eq!(ColumnType::BackLink.subspec_entries(), 2);
    }

    #[test]
    fn test_has_name() {
        assert!(ColumnType::Int.has_name());
        assert!(ColumnType::Table.has_name());
        assert!(ColumnType::Link.has_name());
        assert!(!ColumnType::BackLink.has_name());
    }

    #[test]
    fn test_public_type_hides_string_enum() {
        assert_eq!(ColumnType::String.public_type(), DataType::String);
        assert_eq!(ColumnType::StringEnum.public_type(), DataType::String);
    }

    #[test]
    fn test_from_u8_roundtrip() {
        let all = [
            ColumnType::Int,
            ColumnType::Bool,
            ColumnType::Float,
            ColumnType::String,
            ColumnType::StringEnum,
            ColumnType::Binary,
            ColumnType::Table,
            ColumnType::Link,
            ColumnType::LinkList,
            ColumnType::BackLink,
        ];
        for t in all {
            assert_eq!(ColumnType::from_u8(t as u8), Some(t));
        }
        assert_eq!(ColumnType::from_u8(99), None);
    }

    #[test]
    fn test_attr_bits() {
        let attr = ColumnAttr::INDEXED.with(ColumnAttr::UNIQUE);
        assert!(attr.is_indexed());
        assert!(attr.is_unique());
        assert!(!attr.is_nullable());
        assert_eq!(ColumnAttr::from_bits(attr.bits()), attr);
    }

    #[test]
    fn test_attr_strong_links() {
        let attr = ColumnAttr::STRONG_LINKS;
        assert!(attr.is_strong_links());
        assert!(!ColumnAttr::NONE.is_strong_links());
    }

    #[test]
    fn test_display() {
        assert_eq!(ColumnType::Int.to_string(), "INT");
        assert_eq!(ColumnType::StringEnum.to_string(), "STRING_ENUM");
        assert_eq!(ColumnType::BackLink.to_string(), "BACKLINK");
    }

    #[test]
    fn test_serde_roundtrip() {
        let original = ColumnType::LinkList;
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: ColumnType = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }
}
