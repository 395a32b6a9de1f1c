//! Model catalog and session lifecycle.
//!
//! The catalog joins what the local service offers with what is already in
//! its cache. A `ModelSession` is the explicit handle to a loaded model that
//! callers pass into extraction and chat; nothing here keeps a process-wide
//! "selected model".

use serde::Serialize;
use tokio::sync::mpsc;

use crate::foundry::{CatalogModel, DownloadProgress, FoundryError, GenerationOptions, ModelProvider};

/// A catalog model plus whether it is in the local cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelEntry {
    pub model: CatalogModel,
    pub downloaded: bool,
}

impl ModelEntry {
    /// Alias when the catalog provides one, otherwise the full id.
    pub fn display_name(&self) -> &str {
        self.model.alias.as_deref().unwrap_or(&self.model.id)
    }

    pub fn status(&self) -> ModelStatus {
        if self.downloaded {
            ModelStatus::Downloaded
        } else {
            ModelStatus::NotDownloaded
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModelCatalog {
    entries: Vec<ModelEntry>,
}

impl ModelCatalog {
    pub fn new(models: Vec<CatalogModel>, cached_ids: &[String]) -> Self {
        let entries = models
            .into_iter()
            .map(|model| {
                let downloaded = cached_ids.iter().any(|id| *id == model.id);
                ModelEntry { model, downloaded }
            })
            .collect();
        Self { entries }
    }

    pub fn all(&self) -> &[ModelEntry] {
        &self.entries
    }

    pub fn downloaded(&self) -> impl Iterator<Item = &ModelEntry> {
        self.entries.iter().filter(|e| e.downloaded)
    }

    pub fn available_for_download(&self) -> impl Iterator<Item = &ModelEntry> {
        self.entries.iter().filter(|e| !e.downloaded)
    }

    /// Look up by exact id, then by alias.
    ///
    /// Several device variants can share an alias; a downloaded variant wins.
    pub fn find(&self, id_or_alias: &str) -> Option<&ModelEntry> {
        if let Some(entry) = self.entries.iter().find(|e| e.model.id == id_or_alias) {
            return Some(entry);
        }
        let mut by_alias = self
            .entries
            .iter()
            .filter(|e| e.model.alias.as_deref() == Some(id_or_alias));
        let first = by_alias.next()?;
        if first.downloaded {
            return Some(first);
        }
        Some(by_alias.find(|e| e.downloaded).unwrap_or(first))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lifecycle state of one model, as shown next to it in a picker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state")]
pub enum ModelStatus {
    NotDownloaded,
    Downloading { percent: f64 },
    Downloaded,
    Loading,
    Loaded,
}

impl ModelStatus {
    pub fn label(&self) -> String {
        match self {
            ModelStatus::NotDownloaded => "Not Downloaded".to_string(),
            ModelStatus::Downloading { percent } => {
                DownloadProgress { percent: *percent }.status_text()
            }
            ModelStatus::Downloaded => "Downloaded".to_string(),
            ModelStatus::Loading => "Loading...".to_string(),
            ModelStatus::Loaded => "Ready".to_string(),
        }
    }
}

/// Handle to a loaded model and the endpoint/credential that reach it.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSession {
    pub model_id: String,
    pub device_type: String,
    pub endpoint: String,
    pub api_key: String,
    pub options: GenerationOptions,
}

impl ModelSession {
    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }
}

/// Fetch the catalog and the cache listing, and join them.
pub async fn load_catalog<P>(provider: &P) -> Result<ModelCatalog, FoundryError>
where
    P: ModelProvider,
{
    let models = provider.list_catalog_models().await?;
    let cached = provider.list_cached_models().await?;
    let catalog = ModelCatalog::new(models, &cached);

    tracing::info!(
        total = catalog.len(),
        downloaded = catalog.downloaded().count(),
        "Model catalog loaded"
    );
    Ok(catalog)
}

/// Make `id_or_alias` ready for generation: download if needed, then load.
///
/// Each lifecycle step is reported on `status_tx`. Dropping the receiver
/// while a download is running cancels the download; later steps are
/// reported best-effort. The sender is dropped when this returns, so a
/// receiver loop ends on its own.
pub async fn prepare_session<P>(
    provider: &P,
    catalog: &ModelCatalog,
    id_or_alias: &str,
    status_tx: mpsc::Sender<ModelStatus>,
) -> Result<ModelSession, FoundryError>
where
    P: ModelProvider,
{
    let entry = catalog
        .find(id_or_alias)
        .ok_or_else(|| FoundryError::ModelNotFound(id_or_alias.to_string()))?;
    let model_id = entry.model.id.as_str();

    if !entry.downloaded {
        tracing::info!(model = %model_id, "Model not cached, downloading");
        download_with_status(provider, &entry.model, &status_tx).await?;
        tracing::info!(model = %model_id, "Model download complete");
        status_tx.send(ModelStatus::Downloaded).await.ok();
    }

    status_tx.send(ModelStatus::Loading).await.ok();
    provider.load_model(model_id).await?;
    status_tx.send(ModelStatus::Loaded).await.ok();
    tracing::info!(model = %model_id, device = %entry.model.device_type, "Model ready");

    Ok(ModelSession {
        model_id: model_id.to_string(),
        device_type: entry.model.device_type.clone(),
        endpoint: provider.endpoint().to_string(),
        api_key: provider.api_key().to_string(),
        options: GenerationOptions::default(),
    })
}

/// Run the download, relaying its progress as `Downloading` statuses.
async fn download_with_status<P>(
    provider: &P,
    model: &CatalogModel,
    status_tx: &mpsc::Sender<ModelStatus>,
) -> Result<(), FoundryError>
where
    P: ModelProvider,
{
    // Capacity 1 keeps the download in lockstep with the relay.
    let (progress_tx, mut progress_rx) = mpsc::channel::<DownloadProgress>(1);
    let relay = async move {
        while let Some(progress) = progress_rx.recv().await {
            let status = ModelStatus::Downloading {
                percent: progress.percent,
            };
            if status_tx.send(status).await.is_err() {
                // Dropping `progress_rx` here cancels the download.
                break;
            }
        }
    };
    let (result, ()) = tokio::join!(provider.download_model(model, progress_tx), relay);
    result
}

pub async fn release_session<P>(provider: &P, session: &ModelSession) -> Result<(), FoundryError>
where
    P: ModelProvider,
{
    provider.unload_model(&session.model_id).await?;
    tracing::info!(model = %session.model_id, "Model unloaded");
    Ok(())
}
