use chrono::{DateTime, Utc};
use hubd_core::{HubError, HubResult};
use serde::{Deserialize, Serialize};

use super::ident::valid_identifier;
use super::{str_enum, ResourceStatus};

/// A basic library owns one physical schema (`name_en`) in the managed
/// store holding raw per-source tables.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BasicLibrary {
    pub id: String,
    pub name_zh: String,
    pub name_en: String,
    #[sqlx(try_from = "String")]
    pub status: ResourceStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBasicLibrary {
    pub name_zh: String,
    pub name_en: String,
}

impl CreateBasicLibrary {
    pub fn validate(&self) -> HubResult<()> {
        if self.name_zh.trim().is_empty() {
            return Err(HubError::invalid_input("name_zh", "must not be empty"));
        }
        if !valid_identifier(&self.name_en) {
            return Err(HubError::invalid_input(
                "name_en",
                "must match ^[a-z_][a-z0-9_]*$",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateBasicLibrary {
    pub name_zh: Option<String>,
    pub status: Option<ResourceStatus>,
}

str_enum! {
    ThematicStatus {
        Draft => "draft",
        Published => "published",
        Archived => "archived",
    }
}

str_enum! {
    AccessLevel {
        Public => "public",
        Internal => "internal",
        Restricted => "restricted",
    }
}

/// A thematic library owns a schema of curated tables/views exposed
/// through the access proxy once published.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ThematicLibrary {
    pub id: String,
    pub name_zh: String,
    pub name_en: String,
    pub category: String,
    pub domain: String,
    #[sqlx(try_from = "String")]
    pub access_level: AccessLevel,
    #[sqlx(try_from = "String")]
    pub status: ThematicStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateThematicLibrary {
    pub name_zh: String,
    pub name_en: String,
    pub category: String,
    pub domain: String,
    pub access_level: AccessLevel,
}

impl CreateThematicLibrary {
    pub fn validate(&self) -> HubResult<()> {
        if !valid_identifier(&self.name_en) {
            return Err(HubError::invalid_input(
                "name_en",
                "must match ^[a-z_][a-z0-9_]*$",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateThematicLibrary {
    pub name_zh: Option<String>,
    pub category: Option<String>,
    pub domain: Option<String>,
    pub access_level: Option<AccessLevel>,
    pub status: Option<ThematicStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_rejects_bad_schema_name() {
        let req = CreateBasicLibrary {
            name_zh: "运营".into(),
            name_en: "Ops-2024".into(),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn create_accepts_valid_names() {
        let req = CreateBasicLibrary {
            name_zh: "运营".into(),
            name_en: "ops_2024".into(),
        };
        assert!(req.validate().is_ok());
    }
}
