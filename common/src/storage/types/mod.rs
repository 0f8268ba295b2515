use serde::{Deserialize, Serialize};

pub mod conversation;
pub mod ingest_job;
pub mod message;
pub mod source;
pub mod text_chunk;

/// The reserved tenant chunks without an explicit tenant fall back to.
pub const DEFAULT_TENANT: &str = "demo";

pub trait StoredObject: Serialize + for<'de> Deserialize<'de> {
    fn table_name() -> &'static str;
    fn get_id(&self) -> &str;
}

/// Serde shims shared by every stored record: SurrealDB hands ids back as
/// `Thing`s and datetimes as its own type, while we keep plain strings and
/// `chrono` values in the structs.
pub mod serde_helpers {
    use chrono::{DateTime, Utc};
    use serde::de::{self, Visitor};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::fmt;
    use surrealdb::sql::Thing;

    struct FlexibleIdVisitor;

    impl<'de> Visitor<'de> for FlexibleIdVisitor {
        type Value = String;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or a Thing")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value)
        }

        fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
        where
            A: de::MapAccess<'de>,
        {
            let thing = Thing::deserialize(de::value::MapAccessDeserializer::new(map))?;
            Ok(thing.id.to_raw())
        }
    }

    pub fn deserialize_flexible_id<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(FlexibleIdVisitor)
    }

    pub fn serialize_datetime<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        Into::<surrealdb::sql::Datetime>::into(*date).serialize(serializer)
    }

    pub fn deserialize_datetime<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let dt = surrealdb::sql::Datetime::deserialize(deserializer)?;
        Ok(DateTime::<Utc>::from(dt))
    }
}

/// Declares a SurrealDB-backed record type: the named fields plus the
/// `id`/`created_at`/`updated_at` envelope and its `StoredObject` impl.
#[macro_export]
macro_rules! stored_object {
    ($name:ident, $table:expr, {$($(#[$attr:meta])* $field:ident: $ty:ty),*}) => {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Serialize};
        use $crate::storage::types::{serde_helpers, StoredObject};

        #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
        pub struct $name {
            #[serde(deserialize_with = "serde_helpers::deserialize_flexible_id")]
            pub id: String,
            #[serde(
                serialize_with = "serde_helpers::serialize_datetime",
                deserialize_with = "serde_helpers::deserialize_datetime",
                default
            )]
            pub created_at: DateTime<Utc>,
            #[serde(
                serialize_with = "serde_helpers::serialize_datetime",
                deserialize_with = "serde_helpers::deserialize_datetime",
                default
            )]
            pub updated_at: DateTime<Utc>,
            $( $(#[$attr])* pub $field: $ty),*
        }

        impl StoredObject for $name {
            fn table_name() -> &'static str {
                $table
            }

            fn get_id(&self) -> &str {
                &self.id
            }
        }
    };
}
