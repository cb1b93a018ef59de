use core::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Error;

/// Category of numbered entities with its own consumption set.
///
/// Top-level object kinds serialize as their lowercase tag (`"table"`,
/// `"pageextension"`, ...). Child spaces are scoped to a parent object and
/// serialize as `<parent kind>_<parent id>`, e.g. `"table_50000"` for the
/// fields of table 50000 or `"enum_50100"` for the values of enum 50100.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ObjectType {
    Codeunit,
    Enum,
    EnumExtension,
    Page,
    PageExtension,
    PermissionSet,
    PermissionSetExtension,
    Query,
    Report,
    ReportExtension,
    Table,
    TableExtension,
    XmlPort,
    /// Fields of a table.
    TableField(u64),
    /// Fields added by a table extension.
    TableExtensionField(u64),
    /// Values of an enum.
    EnumValue(u64),
    /// Values added by an enum extension.
    EnumExtensionValue(u64),
}

impl ObjectType {
    /// Every top-level kind, in tag order.
    pub const KINDS: [Self; 13] = [
        Self::Codeunit,
        Self::Enum,
        Self::EnumExtension,
        Self::Page,
        Self::PageExtension,
        Self::PermissionSet,
        Self::PermissionSetExtension,
        Self::Query,
        Self::Report,
        Self::ReportExtension,
        Self::Table,
        Self::TableExtension,
        Self::XmlPort,
    ];

    const fn tag(self) -> &'static str {
        match self {
            Self::Codeunit => "codeunit",
            Self::Enum | Self::EnumValue(_) => "enum",
            Self::EnumExtension | Self::EnumExtensionValue(_) => "enumextension",
            Self::Page => "page",
            Self::PageExtension => "pageextension",
            Self::PermissionSet => "permissionset",
            Self::PermissionSetExtension => "permissionsetextension",
            Self::Query => "query",
            Self::Report => "report",
            Self::ReportExtension => "reportextension",
            Self::Table | Self::TableField(_) => "table",
            Self::TableExtension | Self::TableExtensionField(_) => "tableextension",
            Self::XmlPort => "xmlport",
        }
    }

    /// Returns the parent object ID for child spaces.
    pub const fn parent(self) -> Option<u64> {
        match self {
            Self::TableField(id)
            | Self::TableExtensionField(id)
            | Self::EnumValue(id)
            | Self::EnumExtensionValue(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parent() {
            Some(parent) => write!(f, "{}_{parent}", self.tag()),
            None => f.write_str(self.tag()),
        }
    }
}

impl FromStr for ObjectType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || Error::InvalidIdentifier {
            value: s.to_owned(),
            reason: "unknown object type",
        };

        let lower = s.to_ascii_lowercase();
        if let Some((kind, parent)) = lower.split_once('_') {
            let parent: u64 = parent.parse().map_err(|_| unknown())?;
            return match kind {
                "table" => Ok(Self::TableField(parent)),
                "tableextension" => Ok(Self::TableExtensionField(parent)),
                "enum" => Ok(Self::EnumValue(parent)),
                "enumextension" => Ok(Self::EnumExtensionValue(parent)),
                _ => Err(unknown()),
            };
        }

        Self::KINDS
            .into_iter()
            .find(|kind| kind.tag() == lower)
            .ok_or_else(unknown)
    }
}

impl TryFrom<String> for ObjectType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ObjectType> for String {
    fn from(value: ObjectType) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn parses_kinds_case_insensitively() {
        assert_eq!("Table".parse::<ObjectType>().unwrap(), ObjectType::Table);
        assert_eq!(
            "PERMISSIONSETEXTENSION".parse::<ObjectType>().unwrap(),
            ObjectType::PermissionSetExtension
        );
        for kind in ObjectType::KINDS {
            assert_eq!(kind.to_string().parse::<ObjectType>().unwrap(), kind);
        }
    }

    #[test]
    fn parses_child_spaces() {
        assert_eq!(
            "table_50000".parse::<ObjectType>().unwrap(),
            ObjectType::TableField(50000)
        );
        assert_eq!(
            "enumextension_7".parse::<ObjectType>().unwrap(),
            ObjectType::EnumExtensionValue(7)
        );
        assert_eq!(ObjectType::EnumValue(12).to_string(), "enum_12");
    }

    #[test]
    fn rejects_unknown_types() {
        for raw in ["widget", "page_1", "table_", "table_x", ""] {
            assert!(raw.parse::<ObjectType>().is_err(), "{raw:?}");
        }
    }

    #[test]
    fn usable_as_json_map_key() {
        let mut map = BTreeMap::new();
        map.insert(ObjectType::Table, vec![1_u64]);
        map.insert(ObjectType::TableField(50000), vec![2]);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"table":[1],"table_50000":[2]}"#);
        let back: BTreeMap<ObjectType, Vec<u64>> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }
}
