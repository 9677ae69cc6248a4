//! Realtime Bridge
//!
//! Keeps the directory's member and invitation lists fresh by listening to
//! backend change notifications for a hub. Notifications carry no state the
//! bridge relies on; each burst simply triggers one `refresh_hub`.

use super::directory::HubDirectory;
use super::error::HubResult;
use super::gateway::{ChangeFilter, ChangeStream, RemoteGateway, Table};
use super::types::HubId;
use crate::config::RealtimeConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Background task that is aborted when dropped
struct TaskGuard(JoinHandle<()>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct RealtimeBridge {
    gateway: Arc<dyn RemoteGateway>,
    directory: Arc<HubDirectory>,
    config: RealtimeConfig,
    subscriptions: Mutex<HashMap<HubId, TaskGuard>>,
    follower: std::sync::Mutex<Option<TaskGuard>>,
    reloads: Arc<AtomicU64>,
}

impl RealtimeBridge {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        directory: Arc<HubDirectory>,
        config: RealtimeConfig,
    ) -> Self {
        Self {
            gateway,
            directory,
            config,
            subscriptions: Mutex::new(HashMap::new()),
            follower: std::sync::Mutex::new(None),
            reloads: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Listen for member and invitation changes of `hub_id`. Subscribing to
    /// an already subscribed hub does nothing.
    pub async fn subscribe(&self, hub_id: &HubId) -> HubResult<()> {
        if !self.config.enabled {
            debug!(hub_id = %hub_id, "Realtime disabled, not subscribing");
            return Ok(());
        }

        let mut subscriptions = self.subscriptions.lock().await;
        if subscriptions.contains_key(hub_id) {
            trace!(hub_id = %hub_id, "Already subscribed");
            return Ok(());
        }

        let members = self
            .gateway
            .subscribe(ChangeFilter::for_hub(Table::HubMembers, hub_id))
            .await?;
        let invitations = self
            .gateway
            .subscribe(ChangeFilter::for_hub(Table::HubInvitations, hub_id))
            .await?;

        let task = tokio::spawn(watch_hub(
            hub_id.clone(),
            members,
            invitations,
            Arc::clone(&self.directory),
            self.config.coalesce_window,
            Arc::clone(&self.reloads),
        ));
        subscriptions.insert(hub_id.clone(), TaskGuard(task));
        info!(hub_id = %hub_id, "Subscribed to hub changes");
        Ok(())
    }

    /// Stop listening to `hub_id`. Unknown hubs are ignored.
    pub async fn unsubscribe(&self, hub_id: &HubId) {
        if self.subscriptions.lock().await.remove(hub_id).is_some() {
            info!(hub_id = %hub_id, "Unsubscribed from hub changes");
        }
    }

    /// Drop every subscription and stop following the current hub
    pub async fn unsubscribe_all(&self) {
        self.stop_following();
        let dropped = std::mem::take(&mut *self.subscriptions.lock().await);
        if !dropped.is_empty() {
            info!(count = dropped.len(), "Dropped all hub subscriptions");
        }
    }

    /// Make `hub_id` the only subscribed hub, or none
    pub async fn sync_to(&self, hub_id: Option<&HubId>) -> HubResult<()> {
        let stale: Vec<HubId> = self
            .subscriptions
            .lock()
            .await
            .keys()
            .filter(|id| Some(*id) != hub_id)
            .cloned()
            .collect();
        for id in &stale {
            self.unsubscribe(id).await;
        }

        match hub_id {
            Some(id) => self.subscribe(id).await,
            None => Ok(()),
        }
    }

    /// Track the directory's current hub from now on. Calling it again
    /// replaces the previous follower.
    pub fn follow(self: &Arc<Self>) {
        if !self.config.enabled {
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let mut current = self.directory.subscribe_current_hub();
        let task = tokio::spawn(async move {
            loop {
                let hub_id = current.borrow_and_update().clone();
                let Some(bridge) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = bridge.sync_to(hub_id.as_ref()).await {
                    warn!(error = %e, "Failed to follow current hub");
                }
                drop(bridge);

                if current.changed().await.is_err() {
                    break;
                }
            }
        });

        let previous = self
            .follower
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .replace(TaskGuard(task));
        drop(previous);
    }

    pub async fn is_subscribed(&self, hub_id: &HubId) -> bool {
        self.subscriptions.lock().await.contains_key(hub_id)
    }

    pub async fn active_subscriptions(&self) -> Vec<HubId> {
        let mut ids: Vec<_> = self.subscriptions.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of reloads issued from change notifications
    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::SeqCst)
    }

    fn stop_following(&self) {
        let follower = self
            .follower
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        drop(follower);
    }
}

async fn watch_hub(
    hub_id: HubId,
    mut members: ChangeStream,
    mut invitations: ChangeStream,
    directory: Arc<HubDirectory>,
    window: Duration,
    reloads: Arc<AtomicU64>,
) {
    loop {
        let event = tokio::select! {
            event = members.recv() => event,
            event = invitations.recv() => event,
        };
        let Some(event) = event else {
            debug!(hub_id = %hub_id, "Change feed closed");
            break;
        };
        trace!(hub_id = %hub_id, table = %event.table, kind = ?event.kind, "Change received");

        if !window.is_zero() {
            tokio::time::sleep(window).await;
        }
        let mut batched = 1usize;
        while members.try_recv().is_some() {
            batched += 1;
        }
        while invitations.try_recv().is_some() {
            batched += 1;
        }

        reloads.fetch_add(1, Ordering::SeqCst);
        debug!(hub_id = %hub_id, batched, "Reloading hub after changes");
        if let Err(e) = directory.refresh_hub(&hub_id).await {
            debug!(hub_id = %hub_id, error = %e, "Realtime reload failed");
        }
    }
}
