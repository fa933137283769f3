//! AppKey Add continuation.
//!
//! Deriving the AID of a new application key is the only asynchronous step of
//! the configuration server. One derivation runs at a time: the request in
//! flight occupies the pending slot and later requests wait in FIFO order.
//! The derivation task persists the key and posts an [`AidDerived`] back to
//! the server loop, which resolves the pending slot exactly once.

use crate::crypto::{CryptoError, KeyDerivation};
use mesh_storage::{AppKeyRecord, AppKeyStore, StorageError};
use mesh_wire::{AppKeyAdd, StatusCode};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Why an AppKey Add could not be completed
#[derive(Error, Debug)]
pub enum AppKeyFailure {
    /// AID derivation failed
    #[error("AID derivation failed: {0}")]
    Derivation(#[from] CryptoError),

    /// The key could not be persisted
    #[error("persisting AppKey failed: {0}")]
    Storage(#[from] StorageError),
}

impl AppKeyFailure {
    /// Status code reported to the requester
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppKeyFailure::Derivation(_) => StatusCode::Unspecified,
            AppKeyFailure::Storage(_) => StatusCode::StorageFailure,
        }
    }
}

/// Completion posted by a derivation task
#[derive(Debug)]
pub struct AidDerived {
    /// Request the completion belongs to
    pub request_id: u64,
    /// Derived AID, or why the request failed
    pub result: Result<u8, AppKeyFailure>,
}

/// Where the AppKey Status goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyTo {
    /// Requester address
    pub src: u16,
    /// NetKey index the request arrived under
    pub netkey_index: u16,
}

/// An AppKey Add waiting for or undergoing derivation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAppKey {
    /// Continuation id
    pub request_id: u64,
    /// Parsed request
    pub request: AppKeyAdd,
    /// Reply addressing
    pub reply: ReplyTo,
}

/// Pending slot plus the queue behind it
#[derive(Debug, Default)]
pub struct AppKeyProvisioning {
    next_request_id: u64,
    pending: Option<PendingAppKey>,
    queue: VecDeque<PendingAppKey>,
}

impl AppKeyProvisioning {
    /// Create an idle provisioning slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a request. Returns it when it should start now, `None` when queued.
    pub fn submit(&mut self, request: AppKeyAdd, reply: ReplyTo) -> Option<PendingAppKey> {
        self.next_request_id += 1;
        let entry = PendingAppKey {
            request_id: self.next_request_id,
            request,
            reply,
        };

        if self.pending.is_some() {
            debug!(
                component = "appkey",
                "AppKey Add {} queued behind pending derivation",
                entry.request_id
            );
            self.queue.push_back(entry);
            return None;
        }

        self.pending = Some(entry.clone());
        Some(entry)
    }

    /// Resolve the pending request if `request_id` matches it
    pub fn complete(&mut self, request_id: u64) -> Option<PendingAppKey> {
        match &self.pending {
            Some(pending) if pending.request_id == request_id => self.pending.take(),
            _ => None,
        }
    }

    /// Move the next queued request into the free pending slot
    pub fn advance(&mut self) -> Option<PendingAppKey> {
        if self.pending.is_some() {
            return None;
        }
        let next = self.queue.pop_front()?;
        self.pending = Some(next.clone());
        Some(next)
    }

    /// Requests pending or queued
    pub fn outstanding(&self) -> usize {
        self.pending.iter().count() + self.queue.len()
    }
}

/// Derive the AID, then persist the key
pub async fn derive_and_store(
    request: &AppKeyAdd,
    crypto: &dyn KeyDerivation,
    store: &dyn AppKeyStore,
) -> Result<u8, AppKeyFailure> {
    let aid = crypto.derive_aid(&request.app_key).await?;
    store
        .store(AppKeyRecord {
            appkey_index: request.indexes.appkey_index,
            aid,
            key: request.app_key,
        })
        .await?;
    Ok(aid)
}

/// Run a derivation on its own task and post the result to `completions`
pub fn spawn_derivation(
    pending: &PendingAppKey,
    crypto: Arc<dyn KeyDerivation>,
    store: Arc<dyn AppKeyStore>,
    completions: mpsc::UnboundedSender<AidDerived>,
) {
    let request_id = pending.request_id;
    let request = pending.request.clone();

    tokio::spawn(async move {
        let result = derive_and_store(&request, crypto.as_ref(), store.as_ref()).await;
        if let Err(e) = &result {
            warn!(
                component = "appkey",
                "AppKey index 0x{:03x} not installed: {}",
                request.indexes.appkey_index,
                e
            );
        }
        if completions.send(AidDerived { request_id, result }).is_err() {
            debug!(component = "appkey", "Server gone, dropping completion {}", request_id);
        }
    });
}
