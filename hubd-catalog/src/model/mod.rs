//! Catalog entity models.
//!
//! Identifiers are opaque UUID strings; timestamps are UTC. Enumerated
//! columns are stored as text and decoded through `TryFrom<String>` so the
//! store can use runtime-checked queries throughout.

pub mod api;
pub mod event;
pub mod ident;
pub mod interface;
pub mod library;
pub mod rule;
pub mod source;
pub mod task;

pub use api::*;
pub use event::*;
pub use ident::valid_identifier;
pub use interface::*;
pub use library::*;
pub use rule::*;
pub use source::*;
pub use task::*;

/// A text value that matched no variant of an enumerated column.
#[derive(Debug, Clone)]
pub struct ParseEnumError {
    pub what: &'static str,
    pub value: String,
}

impl std::fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown {} value {:?}", self.what, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

/// Declare a text-backed enum with serde names, `as_str`, `Display`,
/// `FromStr` and the `TryFrom<String>` bridge used by `#[sqlx(try_from)]`.
macro_rules! str_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant, )+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( Self::$variant => $text, )+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::model::ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok(Self::$variant), )+
                    other => Err($crate::model::ParseEnumError {
                        what: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::model::ParseEnumError;

            fn try_from(s: String) -> Result<Self, <Self as TryFrom<String>>::Error> {
                s.parse()
            }
        }
    };
}

pub(crate) use str_enum;

str_enum! {
    /// Shared active/inactive switch for libraries, sources, interfaces
    /// and API entities.
    ResourceStatus {
        Active => "active",
        Inactive => "inactive",
    }
}

impl Default for ResourceStatus {
    fn default() -> Self {
        ResourceStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn str_enum_round_trip() {
        assert_eq!(ResourceStatus::Active.as_str(), "active");
        assert_eq!(
            "inactive".parse::<ResourceStatus>().unwrap(),
            ResourceStatus::Inactive
        );
        assert!("deleted".parse::<ResourceStatus>().is_err());
    }

    #[test]
    fn str_enum_serde_names() {
        let json = serde_json::to_string(&ResourceStatus::Active).unwrap();
        assert_eq!(json, "\"active\"");
    }
}
