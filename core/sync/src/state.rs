//! Persisted integration state.

use tracing::warn;

use cmsbridge_common::{BearerToken, Error, Result, SpaceId};
use cmsbridge_storage::ConfigStore;

use crate::schema::Catalog;

/// Option key of the OAuth application client id.
pub const CLIENT_ID_KEY: &str = "contentful_client_id";
/// Option key of the bearer token.
pub const ACCESS_TOKEN_KEY: &str = "contentful_access_token";
/// Option key of the selected space id.
pub const SPACE_KEY: &str = "contentful_space";
/// Option key of the content type to record type map.
pub const CONTENT_TYPES_KEY: &str = "contentful_content_types";
/// Option key of the record type descriptors.
pub const RECORD_TYPES_KEY: &str = "contentful_record_types";
/// Option key set after the first successful import.
pub const IMPORTED_KEY: &str = "contentful_imported";

/// Integration state of one installation, stored as opaque options in the
/// host's config store.
#[derive(Debug, Clone, Default)]
pub struct IntegrationSettings {
    pub client_id: Option<String>,
    pub access_token: Option<BearerToken>,
    pub space: Option<SpaceId>,
    pub catalog: Catalog,
    pub imported: bool,
}

impl IntegrationSettings {
    /// Load the settings from `config`.
    ///
    /// # Errors
    /// - `Serialization` if a stored map is malformed
    /// - `InvalidInput` if the stored space id is malformed
    pub async fn load(config: &dyn ConfigStore) -> Result<Self> {
        let client_id = config
            .get(CLIENT_ID_KEY)
            .await?
            .filter(|id| !id.trim().is_empty());

        let access_token = match config.get(ACCESS_TOKEN_KEY).await? {
            Some(token) => match BearerToken::new(token) {
                Ok(token) => Some(token),
                Err(_) => {
                    warn!("Ignoring unusable stored access token");
                    None
                }
            },
            None => None,
        };

        let space = config
            .get(SPACE_KEY)
            .await?
            .filter(|space| !space.is_empty())
            .map(SpaceId::new)
            .transpose()?;

        let mut catalog = Catalog::default();
        if let Some(json) = config.get(CONTENT_TYPES_KEY).await? {
            catalog.content_types = serde_json::from_str(&json)?;
        }
        if let Some(json) = config.get(RECORD_TYPES_KEY).await? {
            catalog.record_types = serde_json::from_str(&json)?;
        }

        let imported = config.get(IMPORTED_KEY).await?.as_deref() == Some("1");

        Ok(Self {
            client_id,
            access_token,
            space,
            catalog,
            imported,
        })
    }

    /// Write every setting back to `config`. Unset values are removed.
    pub async fn save(&self, config: &dyn ConfigStore) -> Result<()> {
        set_or_remove(config, CLIENT_ID_KEY, self.client_id.as_deref()).await?;
        set_or_remove(
            config,
            ACCESS_TOKEN_KEY,
            self.access_token.as_ref().map(BearerToken::secret),
        )
        .await?;
        set_or_remove(config, SPACE_KEY, self.space.as_ref().map(SpaceId::as_str)).await?;

        config
            .set(
                CONTENT_TYPES_KEY,
                &serde_json::to_string(&self.catalog.content_types)?,
            )
            .await?;
        config
            .set(
                RECORD_TYPES_KEY,
                &serde_json::to_string(&self.catalog.record_types)?,
            )
            .await?;

        set_or_remove(config, IMPORTED_KEY, self.imported.then_some("1")).await
    }

    /// The selected space.
    ///
    /// # Errors
    /// - `Validation` if no space has been selected
    pub fn require_space(&self) -> Result<&SpaceId> {
        self.space.as_ref().ok_or_else(|| {
            Error::Validation("No space has been selected. Please select a space first.".to_string())
        })
    }

    /// The bearer token.
    ///
    /// # Errors
    /// - `Auth` if the installation is not connected
    pub fn require_token(&self) -> Result<&BearerToken> {
        self.access_token
            .as_ref()
            .ok_or_else(|| Error::Auth("No access token configured".to_string()))
    }
}

async fn set_or_remove(config: &dyn ConfigStore, key: &str, value: Option<&str>) -> Result<()> {
    match value {
        Some(value) => config.set(key, value).await,
        None => config.remove(key).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmsbridge_remote::ContentType;
    use cmsbridge_storage::MemoryConfig;
    use serde_json::json;

    #[tokio::test]
    async fn test_settings_round_trip() {
        let config = MemoryConfig::new();

        let content_type: ContentType = serde_json::from_value(json!({
            "sys": { "id": "post" },
            "name": "Post",
            "fields": [{ "id": "title", "name": "Title", "type": "Symbol" }]
        }))
        .unwrap();

        let mut settings = IntegrationSettings {
            client_id: Some("client".to_string()),
            access_token: Some(BearerToken::new("token123").unwrap()),
            space: Some(SpaceId::new("space1").unwrap()),
            imported: true,
            ..Default::default()
        };
        settings
            .catalog
            .compile_selected(&[content_type], &["post".to_string()]);
        settings.save(&config).await.unwrap();

        let loaded = IntegrationSettings::load(&config).await.unwrap();
        assert_eq!(loaded.client_id.as_deref(), Some("client"));
        assert_eq!(loaded.access_token.unwrap().secret(), "token123");
        assert_eq!(loaded.space.unwrap().as_str(), "space1");
        assert_eq!(loaded.catalog, settings.catalog);
        assert!(loaded.imported);
    }

    #[tokio::test]
    async fn test_empty_config_loads_defaults() {
        let config = MemoryConfig::new();
        let settings = IntegrationSettings::load(&config).await.unwrap();

        assert!(settings.access_token.is_none());
        assert!(matches!(settings.require_space(), Err(Error::Validation(_))));
        assert!(matches!(settings.require_token(), Err(Error::Auth(_))));
        assert!(!settings.imported);
    }

    #[tokio::test]
    async fn test_sentinel_token_is_ignored() {
        let config = MemoryConfig::new();
        config.set(ACCESS_TOKEN_KEY, "-1").await.unwrap();

        let settings = IntegrationSettings::load(&config).await.unwrap();
        assert!(settings.access_token.is_none());
    }

    #[tokio::test]
    async fn test_malformed_map_is_serialization_error() {
        let config = MemoryConfig::new();
        config.set(CONTENT_TYPES_KEY, "{not json").await.unwrap();

        let result = IntegrationSettings::load(&config).await;
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[tokio::test]
    async fn test_save_removes_cleared_values() {
        let config = MemoryConfig::new();
        let mut settings = IntegrationSettings {
            space: Some(SpaceId::new("space1").unwrap()),
            ..Default::default()
        };
        settings.save(&config).await.unwrap();

        settings.space = None;
        settings.save(&config).await.unwrap();
        assert_eq!(config.get(SPACE_KEY).await.unwrap(), None);
    }
}
