//! Sync engine facade wiring the host collaborators to the remote store.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use cmsbridge_common::{BearerToken, Error, RecordId, Result, SpaceId};
use cmsbridge_remote::{
    authorization_url, token_from_callback, AuthConfig, ClientConfig, ContentType, RemoteClient,
    Space,
};
use cmsbridge_storage::{BlobStore, ConfigStore, RecordStore};

use crate::codec::FieldValueCodec;
use crate::gate::PushGate;
use crate::import::{ImportEngine, ImportReport};
use crate::push::{PushEngine, PushReport, SkipReason};
use crate::report::Notices;
use crate::schema::CompileOutcome;
use crate::state::IntegrationSettings;

/// Configuration for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Active locale used for both decode and encode.
    pub locale: String,
    /// Page size requested from the entries endpoint. The size the server
    /// reports back drives pagination.
    pub page_size: u64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            locale: "en-US".to_string(),
            page_size: 100,
        }
    }
}

/// Result of compiling selected content types.
#[derive(Debug, Clone, Default)]
pub struct CompileReport {
    pub outcomes: Vec<CompileOutcome>,
    pub notices: Notices,
}

/// Main entry point for synchronizing one installation.
pub struct SyncEngine {
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    config: Arc<dyn ConfigStore>,
    client_config: ClientConfig,
    options: SyncOptions,
    gate: PushGate,
}

impl SyncEngine {
    /// Create a new sync engine over the host collaborators.
    pub fn new(
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        config: Arc<dyn ConfigStore>,
        client_config: ClientConfig,
        options: SyncOptions,
    ) -> Self {
        Self {
            records,
            blobs,
            config,
            client_config,
            options,
            gate: PushGate::new(),
        }
    }

    /// The push gate of this engine. Hosts may check it from their own
    /// save hooks.
    pub fn gate(&self) -> PushGate {
        self.gate.clone()
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Current persisted settings.
    pub async fn settings(&self) -> Result<IntegrationSettings> {
        IntegrationSettings::load(self.config.as_ref()).await
    }

    async fn update_settings<F>(&self, change: F) -> Result<IntegrationSettings>
    where
        F: FnOnce(&mut IntegrationSettings),
    {
        let mut settings = self.settings().await?;
        change(&mut settings);
        settings.save(self.config.as_ref()).await?;
        Ok(settings)
    }

    fn client(&self, settings: &IntegrationSettings) -> Result<RemoteClient> {
        RemoteClient::new(
            Some(settings.require_token()?.clone()),
            self.client_config.clone(),
        )
    }

    /// Store the OAuth application client id.
    ///
    /// # Errors
    /// - `Validation` if `client_id` is blank
    pub async fn set_client_id(&self, client_id: &str) -> Result<()> {
        let client_id = client_id.trim();
        if client_id.is_empty() {
            return Err(Error::Validation(
                "You need to specify your app's client id".to_string(),
            ));
        }
        self.update_settings(|s| s.client_id = Some(client_id.to_string()))
            .await?;
        Ok(())
    }

    /// URL the operator visits to grant access, plus its CSRF state.
    ///
    /// # Errors
    /// - `Validation` if no client id is stored
    pub async fn authorization_url(&self, redirect_url: &str) -> Result<(String, String)> {
        let settings = self.settings().await?;
        let client_id = settings.client_id.ok_or_else(|| {
            Error::Validation("You need to specify your app's client id".to_string())
        })?;

        authorization_url(&AuthConfig {
            client_id,
            redirect_url: redirect_url.to_string(),
        })
    }

    /// Complete the connect flow from the authorization callback.
    ///
    /// # Errors
    /// - `Auth` if the callback carries no usable token
    pub async fn connect(&self, callback: &str) -> Result<()> {
        let token = token_from_callback(callback)?;
        self.save_token(token).await
    }

    /// Store the bearer token.
    pub async fn save_token(&self, token: BearerToken) -> Result<()> {
        self.update_settings(|s| s.access_token = Some(token)).await?;
        info!("Access token stored");
        Ok(())
    }

    /// Forget the bearer token.
    pub async fn disconnect(&self) -> Result<()> {
        self.update_settings(|s| s.access_token = None).await?;
        info!("Access token removed");
        Ok(())
    }

    /// Spaces the token can access.
    pub async fn spaces(&self) -> Result<Vec<Space>> {
        let settings = self.settings().await?;
        Ok(self.client(&settings)?.spaces().await?.items)
    }

    /// Persist the space to synchronize.
    pub async fn select_space(&self, space: SpaceId) -> Result<()> {
        info!("Selecting space {}", space);
        self.update_settings(|s| s.space = Some(space)).await?;
        Ok(())
    }

    /// Content types of the selected space.
    ///
    /// # Errors
    /// - `Validation` if no space is selected
    pub async fn content_types(&self) -> Result<Vec<ContentType>> {
        let settings = self.settings().await?;
        let space = settings.require_space()?;
        Ok(self.client(&settings)?.content_types(space).await?.items)
    }

    /// Compile the selected content types into record types.
    ///
    /// # Errors
    /// - `Validation` if nothing is selected or no space is selected
    pub async fn compile_content_types(&self, selected: &[String]) -> Result<CompileReport> {
        if selected.is_empty() {
            return Err(Error::Validation(
                "Please select at least one content type".to_string(),
            ));
        }

        let mut settings = self.settings().await?;
        let space = settings.require_space()?.clone();
        let available = self.client(&settings)?.content_types(&space).await?.items;

        let outcomes = settings.catalog.compile_selected(&available, selected);
        settings.save(self.config.as_ref()).await?;

        let mut notices = Notices::new();
        for outcome in &outcomes {
            match outcome {
                CompileOutcome::Generated {
                    content_type_id,
                    record_type,
                } => notices.info(format!(
                    "Content type {} compiled as {}",
                    content_type_id, record_type
                )),
                CompileOutcome::Reused {
                    content_type_id,
                    record_type,
                } => notices.info(format!(
                    "Content type {} already compiled as {}",
                    content_type_id, record_type
                )),
                CompileOutcome::Unknown { content_type_id } => notices.warn(format!(
                    "Content type {} does not exist in space {}",
                    content_type_id, space
                )),
            }
        }

        Ok(CompileReport { outcomes, notices })
    }

    /// Import the entries of the selected content types.
    ///
    /// # Errors
    /// - `Validation` if nothing is selected or no space is selected
    /// - `Auth`, `Transport` or `Remote` if a page cannot be fetched
    pub async fn import_entries(&self, selected: &[String]) -> Result<ImportReport> {
        let settings = self.settings().await?;
        let space = settings.require_space()?;
        let client = self.client(&settings)?;
        let codec = self.codec(&client, space);

        let report = ImportEngine::new(codec, &self.gate, self.options.page_size)
            .import_entries(&settings.catalog, selected)
            .await?;

        if !settings.imported {
            self.update_settings(|s| s.imported = true).await?;
        }
        Ok(report)
    }

    /// React to a saved local record by pushing it upstream.
    ///
    /// Saves performed by the engine itself, saves of unsynchronized record
    /// types and saves before a space is selected are skipped.
    ///
    /// # Errors
    /// - `NotFound` if the record does not exist
    /// - `Auth` if the installation is not connected
    pub async fn on_record_saved(&self, id: &RecordId) -> Result<PushReport> {
        if self.gate.is_held() {
            debug!("Save of record {} comes from the engine; not pushed", id);
            return Ok(PushReport::skipped(SkipReason::GateHeld));
        }

        let record = self
            .records
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Record not found: {}", id)))?;
        let settings = self.settings().await?;

        if !settings.catalog.is_synchronized(&record.record_type) {
            return Ok(PushReport::skipped(SkipReason::NotSynchronized));
        }
        let Some(space) = settings.space.as_ref() else {
            return Ok(PushReport::skipped(SkipReason::NoSpace));
        };

        let client = self.client(&settings)?;
        let codec = self.codec(&client, space);
        PushEngine::new(codec, &self.gate)
            .push(&record, &settings.catalog)
            .await
    }

    /// Refresh a record from its remote entry before it is edited.
    ///
    /// Returns whether the record was refreshed. Every remote-side failure,
    /// a missing token included, leaves the record untouched.
    ///
    /// # Errors
    /// - `NotFound` if the record does not exist
    pub async fn resync(&self, id: &RecordId) -> Result<bool> {
        let record = self
            .records
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Record not found: {}", id)))?;
        let settings = self.settings().await?;

        if !settings.catalog.is_synchronized(&record.record_type) {
            return Ok(false);
        }
        let Some(space) = settings.space.as_ref() else {
            return Ok(false);
        };
        let Ok(client) = self.client(&settings) else {
            return Ok(false);
        };

        let codec = self.codec(&client, space);
        PushEngine::new(codec, &self.gate)
            .resync(&record, &settings.catalog)
            .await
    }

    fn codec<'a>(&'a self, client: &'a RemoteClient, space: &'a SpaceId) -> FieldValueCodec<'a> {
        FieldValueCodec::new(
            client,
            self.records.as_ref(),
            self.blobs.as_ref(),
            space,
            &self.options.locale,
        )
    }
}
