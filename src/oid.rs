//! Object identifiers.
//!
//! Every entity managed by the provider is referenced by an OID of the form
//! `o:<type>:<id>[:<version>]`, for example `o:dataset:41000123` or
//! `o:dataset:41000123:17`. Neither the id nor the version may contain `:`.
//!
//! ```
//! use observe_provider::oid::{ObjectType, Oid};
//!
//! let oid: Oid = "o:dataset:42:7".parse().unwrap();
//! assert_eq!(oid.object_type, ObjectType::Dataset);
//! assert_eq!(oid.id, "42");
//! assert_eq!(oid.version.as_deref(), Some("7"));
//! assert_eq!(oid.to_string(), "o:dataset:42:7");
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ProviderError;

const OID_PREFIX: &str = "o";

/// The kinds of entity an [`Oid`] can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectType {
    /// A dataset.
    Dataset,
    /// A workspace.
    Workspace,
    /// A monitor.
    Monitor,
    /// A notification channel.
    Channel,
    /// An action attached to channels.
    ChannelAction,
    /// A board.
    Board,
    /// A folder.
    Folder,
    /// An installed app.
    App,
    /// A poller.
    Poller,
    /// A datastream.
    Datastream,
    /// A datastream ingest token.
    DatastreamToken,
    /// A bookmark.
    Bookmark,
    /// A group of bookmarks.
    BookmarkGroup,
    /// A layered setting.
    LayeredSetting,
    /// A foreign key between datasets.
    ForeignKey,
    /// A worksheet.
    Worksheet,
    /// A dashboard.
    Dashboard,
}

impl ObjectType {
    /// Every known object type.
    pub const ALL: [ObjectType; 17] = [
        ObjectType::Dataset,
        ObjectType::Workspace,
        ObjectType::Monitor,
        ObjectType::Channel,
        ObjectType::ChannelAction,
        ObjectType::Board,
        ObjectType::Folder,
        ObjectType::App,
        ObjectType::Poller,
        ObjectType::Datastream,
        ObjectType::DatastreamToken,
        ObjectType::Bookmark,
        ObjectType::BookmarkGroup,
        ObjectType::LayeredSetting,
        ObjectType::ForeignKey,
        ObjectType::Worksheet,
        ObjectType::Dashboard,
    ];

    /// The type tag used in the OID text form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Dataset => "dataset",
            ObjectType::Workspace => "workspace",
            ObjectType::Monitor => "monitor",
            ObjectType::Channel => "channel",
            ObjectType::ChannelAction => "channelAction",
            ObjectType::Board => "board",
            ObjectType::Folder => "folder",
            ObjectType::App => "app",
            ObjectType::Poller => "poller",
            ObjectType::Datastream => "datastream",
            ObjectType::DatastreamToken => "datastreamToken",
            ObjectType::Bookmark => "bookmark",
            ObjectType::BookmarkGroup => "bookmarkGroup",
            ObjectType::LayeredSetting => "layeredSetting",
            ObjectType::ForeignKey => "foreignKey",
            ObjectType::Worksheet => "worksheet",
            ObjectType::Dashboard => "dashboard",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ObjectType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ProviderError::UnknownType(s.to_string()))
    }
}

/// A typed, optionally versioned reference to a managed entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Oid {
    /// The kind of entity referenced.
    pub object_type: ObjectType,
    /// The backend id of the entity.
    pub id: String,
    /// The entity version, if pinned.
    pub version: Option<String>,
}

impl Oid {
    /// Create an unversioned OID.
    ///
    /// `id` must be non-empty and free of `:`, otherwise the formatted OID
    /// does not parse back.
    pub fn new(object_type: ObjectType, id: impl Into<String>) -> Self {
        let id = id.into();
        debug_assert!(is_valid_segment(&id), "invalid OID id {:?}", id);
        Self {
            object_type,
            id,
            version: None,
        }
    }

    /// Shorthand for a dataset OID.
    pub fn dataset(id: impl Into<String>) -> Self {
        Self::new(ObjectType::Dataset, id)
    }

    /// Pin the OID to a version. The same rules as for the id apply.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        let version = version.into();
        debug_assert!(is_valid_segment(&version), "invalid OID version {:?}", version);
        self.version = Some(version);
        self
    }

    /// Whether this OID references an entity of the given type.
    pub fn is_type(&self, object_type: ObjectType) -> bool {
        self.object_type == object_type
    }
}

fn is_valid_segment(s: &str) -> bool {
    !s.is_empty() && !s.contains(':')
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", OID_PREFIX, self.object_type, self.id)?;
        if let Some(version) = &self.version {
            write!(f, ":{}", version)?;
        }
        Ok(())
    }
}

impl FromStr for Oid {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProviderError::InvalidFormat(format!("{:?}", s));

        let parts: Vec<&str> = s.split(':').collect();
        if !(3..=4).contains(&parts.len()) || parts[0] != OID_PREFIX {
            return Err(invalid());
        }
        if parts.iter().skip(1).any(|p| p.is_empty()) {
            return Err(invalid());
        }

        Ok(Self {
            object_type: parts[1].parse()?,
            id: parts[2].to_string(),
            version: parts.get(3).map(|v| v.to_string()),
        })
    }
}

impl Serialize for Oid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Oid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unversioned() {
        let oid: Oid = "o:workspace:41000001".parse().unwrap();
        assert_eq!(oid.object_type, ObjectType::Workspace);
        assert_eq!(oid.id, "41000001");
        assert!(oid.version.is_none());
    }

    #[test]
    fn test_round_trip_all_types() {
        for object_type in ObjectType::ALL {
            let plain = Oid::new(object_type, "123");
            assert_eq!(plain.to_string().parse::<Oid>().unwrap(), plain);

            let versioned = Oid::new(object_type, "123").with_version("2024-01-01T00.00.00Z");
            assert_eq!(versioned.to_string().parse::<Oid>().unwrap(), versioned);
        }
    }

    #[test]
    fn test_camel_case_tags() {
        let oid: Oid = "o:channelAction:9".parse().unwrap();
        assert_eq!(oid.object_type, ObjectType::ChannelAction);
        assert_eq!(oid.to_string(), "o:channelAction:9");

        let oid: Oid = "o:datastreamToken:ds1abc".parse().unwrap();
        assert_eq!(oid.object_type, ObjectType::DatastreamToken);
    }

    #[test]
    fn test_reject_malformed() {
        for s in [
            "",
            "o",
            "o:dataset",
            "x:dataset:1",
            "o:dataset:",
            "o::1",
            "o:dataset:1:",
            "o:dataset:1:2:3",
            "dataset:1",
        ] {
            let err = s.parse::<Oid>().unwrap_err();
            assert!(
                matches!(err, ProviderError::InvalidFormat(_)),
                "expected InvalidFormat for {:?}, got {:?}",
                s,
                err
            );
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "invalid OID id")]
    fn test_new_rejects_colon_in_id() {
        let _ = Oid::new(ObjectType::Dataset, "1:2");
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "invalid OID version")]
    fn test_with_version_rejects_empty() {
        let _ = Oid::dataset("1").with_version("");
    }

    #[test]
    fn test_reject_unknown_type() {
        let err = "o:widget:1".parse::<Oid>().unwrap_err();
        assert!(matches!(err, ProviderError::UnknownType(t) if t == "widget"));

        // tags are case sensitive
        let err = "o:Dataset:1".parse::<Oid>().unwrap_err();
        assert!(matches!(err, ProviderError::UnknownType(_)));
    }

    #[test]
    fn test_serde_as_string() {
        let oid = Oid::dataset("42");
        let json = serde_json::to_string(&oid).unwrap();
        assert_eq!(json, "\"o:dataset:42\"");

        let back: Oid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, oid);

        assert!(serde_json::from_str::<Oid>("\"o:nope:1\"").is_err());
    }
}
