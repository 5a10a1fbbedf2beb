//! Notification list of the signed-in user.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::error::{Result, SyncError};
use crate::mirror::ResourceKey;
use crate::models::{parse_notifications, Notification};
use crate::sync::{RefreshOptions, ResourceOptions, ResourceRegistry, SyncedResource};

pub const NOTIFICATIONS_RESOURCE: &str = "notifications";
pub const NOTIFICATIONS_PATH: &str = "/api/v1/notifications/notifications/";

/// Cached notifications with read flags applied optimistically.
#[derive(Debug, Clone)]
pub struct Notifications {
    client: Arc<ApiClient>,
    list: SyncedResource<Vec<Notification>>,
}

impl Notifications {
    pub fn new(
        client: Arc<ApiClient>,
        registry: &ResourceRegistry,
        options: ResourceOptions,
    ) -> Result<Self> {
        let owner = client.session().owner_id();
        let key = ResourceKey::new(NOTIFICATIONS_RESOURCE, owner.as_deref())?;

        let fetch_client = Arc::clone(&client);
        let list = registry.resource(key, options, move || {
            let client = Arc::clone(&fetch_client);
            async move {
                let body = client.get_json(NOTIFICATIONS_PATH, &[]).await?;
                parse_notifications(&body)
            }
        })?;

        Ok(Self { client, list })
    }

    pub fn resource(&self) -> &SyncedResource<Vec<Notification>> {
        &self.list
    }

    /// Best known list, empty until one has been fetched or cached.
    pub fn list(&self) -> Vec<Notification> {
        self.list.get_value().unwrap_or_default()
    }

    pub fn unread_count(&self) -> usize {
        self.list
            .get_value()
            .map(|list| list.iter().filter(|n| n.is_unread()).count())
            .unwrap_or(0)
    }

    pub async fn refresh(&self, options: RefreshOptions) -> Result<Vec<Notification>> {
        self.list.refresh(options).await
    }

    /// Marks one notification as read.
    pub async fn mark_read(&self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(SyncError::InvalidRequest(
                "Notification id cannot be empty".to_string(),
            ));
        }

        self.list.update_optimistic(|list| {
            list.iter()
                .map(|n| if n.id == id { n.marked_read() } else { n.clone() })
                .collect()
        });

        let path = format!("{}{}/mark_read/", NOTIFICATIONS_PATH, id);
        self.confirm(&path).await
    }

    /// Marks every notification as read.
    pub async fn mark_all_read(&self) -> Result<()> {
        self.list
            .update_optimistic(|list| list.iter().map(Notification::marked_read).collect());

        let path = format!("{}mark_all_read/", NOTIFICATIONS_PATH);
        self.confirm(&path).await
    }

    /// Sends the mutation; on failure a forced refresh restores the server's
    /// view before the error is returned.
    async fn confirm(&self, path: &str) -> Result<()> {
        match self.client.post_empty(path).await {
            Ok(_) => {
                debug!("Confirmed {}", path);
                Ok(())
            }
            Err(e) => {
                warn!("Notification update failed: {}", e);
                if let Err(refresh_error) = self.list.refresh(RefreshOptions::forced()).await {
                    warn!("Notification refresh after failed update failed: {}", refresh_error);
                }
                Err(e)
            }
        }
    }
}
