use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::backend::{BackendApi, BackendError, ContactPayload, SosTriggerRequest};
use crate::contacts::ContactStore;
use crate::model::{LatLon, UnixTimeMs};
use crate::sos::SosLogQueue;
use crate::stations::{NewStation, RescueStationDirectory};
use crate::store::{OfflineDb, StoreError};

/// user_id the backend sees for replayed (queued) SOS triggers.
const REPLAY_USER_ID: &str = "offline-sync";
const DEFAULT_RELATION: &str = "relative";

// Progress checkpoints, mirrored by the sync screen's indicator.
const PROGRESS_CONTACTS: u8 = 10;
const PROGRESS_STATIONS: u8 = 30;
const PROGRESS_SOS_START: u8 = 60;
const PROGRESS_SOS_END: u8 = 95;
const PROGRESS_DONE: u8 = 100;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("backend: {0}")]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of one pushed contact or one replayed SOS entry.
#[derive(Clone, Debug)]
pub struct ItemOutcome {
    pub id: String,
    pub ok: bool,
    pub error: Option<String>,
}

impl ItemOutcome {
    fn ok(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ok: true,
            error: None,
        }
    }

    fn failed(id: &str, error: &BackendError) -> Self {
        Self {
            id: id.to_string(),
            ok: false,
            error: Some(error.to_string()),
        }
    }
}

/// What a sync run accomplished. `pending_after > 0` is the user-visible
/// signal that not everything made it to the server.
#[derive(Clone, Debug, Default)]
pub struct SyncReport {
    pub contacts: Vec<ItemOutcome>,
    pub stations_downloaded: Option<usize>,
    pub station_error: Option<String>,
    pub sos: Vec<ItemOutcome>,
    pub pending_after: u64,
}

impl SyncReport {
    pub fn fully_synced(&self) -> bool {
        self.contacts.iter().all(|o| o.ok)
            && self.station_error.is_none()
            && self.sos.iter().all(|o| o.ok)
            && self.pending_after == 0
    }
}

/// Orchestrates a "Sync Now": push contacts, pull the station directory,
/// replay the SOS queue. Failures are isolated per step and per item; a
/// backend refusing one entry never aborts the rest. A storage failure does
/// abort the run, since offline capability itself is degraded.
pub struct SyncEngine {
    db: OfflineDb,
    backend: Arc<dyn BackendApi>,
}

impl SyncEngine {
    pub fn new(db: &OfflineDb, backend: Arc<dyn BackendApi>) -> Self {
        Self {
            db: db.clone(),
            backend,
        }
    }

    /// Runs the full sync cycle. `on_progress` receives a 0–100 percentage
    /// as the run advances. There is no cancellation: a caller wanting an
    /// early abort tracks its own flag and ignores late results.
    #[instrument(skip_all)]
    pub async fn sync_now(
        &self,
        now: UnixTimeMs,
        mut on_progress: impl FnMut(u8),
    ) -> Result<SyncReport, StoreError> {
        let mut report = SyncReport::default();

        on_progress(PROGRESS_CONTACTS);
        report.contacts = self.push_contacts().await?;

        on_progress(PROGRESS_STATIONS);
        match self.download_rescue_stations(now).await {
            Ok(count) => report.stations_downloaded = Some(count),
            Err(SyncError::Backend(e)) => {
                warn!(error = %e, "station directory pull failed, keeping previous snapshot");
                report.station_error = Some(e.to_string());
            }
            Err(SyncError::Store(e)) => return Err(e),
        }

        on_progress(PROGRESS_SOS_START);
        report.sos = self.replay_pending_sos(&mut on_progress).await?;
        report.pending_after = SosLogQueue::new(&self.db).pending_count().await?;

        on_progress(PROGRESS_DONE);
        info!(
            contacts = report.contacts.len(),
            stations = report.stations_downloaded,
            sos = report.sos.len(),
            pending_after = report.pending_after,
            "sync cycle finished"
        );
        Ok(report)
    }

    /// POSTs each locally saved contact individually. A refused contact is
    /// recorded and skipped, never fatal to the batch.
    #[instrument(skip(self))]
    pub async fn push_contacts(&self) -> Result<Vec<ItemOutcome>, StoreError> {
        let contacts = ContactStore::new(&self.db).contacts().await?;
        let mut outcomes = Vec::with_capacity(contacts.len());

        for contact in contacts {
            let relation = if contact.relation.trim().is_empty() {
                DEFAULT_RELATION.to_string()
            } else {
                contact.relation.clone()
            };
            let payload = ContactPayload {
                name: contact.name.clone(),
                phone: contact.phone.clone(),
                relation_type: relation,
                email: contact.email.clone(),
            };

            match self.backend.push_contact(&payload).await {
                Ok(()) => outcomes.push(ItemOutcome::ok(contact.id.as_str())),
                Err(e) => {
                    warn!(contact = contact.id.as_str(), error = %e, "contact push failed");
                    outcomes.push(ItemOutcome::failed(contact.id.as_str(), &e));
                }
            }
        }
        Ok(outcomes)
    }

    /// Pulls the full station directory and atomically replaces the local
    /// collection. A fetch failure leaves the previous snapshot untouched.
    #[instrument(skip(self))]
    pub async fn download_rescue_stations(&self, now: UnixTimeMs) -> Result<usize, SyncError> {
        let records = self.backend.fetch_rescue_stations().await?;

        let mut stations = Vec::with_capacity(records.len());
        for record in records {
            match LatLon::new(record.lat, record.lon) {
                Some(location) => stations.push(NewStation {
                    name: record.name,
                    kind: record.kind,
                    phone: record.phone,
                    location,
                    address: record.address,
                }),
                None => warn!(name = %record.name, "skipping station with invalid coordinates"),
            }
        }

        let count = RescueStationDirectory::new(&self.db)
            .replace_all(stations, now)
            .await?;
        Ok(count)
    }

    /// Replays pending SOS entries oldest first, one at a time so the
    /// pending→synced transition stays deterministic. Progress advances
    /// proportionally across the queue.
    #[instrument(skip_all)]
    pub async fn replay_pending_sos(
        &self,
        on_progress: &mut impl FnMut(u8),
    ) -> Result<Vec<ItemOutcome>, StoreError> {
        let queue = SosLogQueue::new(&self.db);
        let pending = queue.pending().await?;
        let total = pending.len();
        let mut outcomes = Vec::with_capacity(total);

        for (i, entry) in pending.into_iter().enumerate() {
            let request = SosTriggerRequest {
                latitude: entry.location.lat(),
                longitude: entry.location.lon(),
                user_id: REPLAY_USER_ID.to_string(),
                medical_notes: entry.medical_notes.clone().unwrap_or_default(),
                contact_email: Vec::new(),
            };

            match self.backend.trigger_sos(&request).await {
                Ok(()) => {
                    queue.mark_synced(&entry.id).await?;
                    outcomes.push(ItemOutcome::ok(entry.id.as_str()));
                }
                Err(e) => {
                    warn!(entry = entry.id.as_str(), error = %e, "sos replay failed, left pending");
                    outcomes.push(ItemOutcome::failed(entry.id.as_str(), &e));
                }
            }

            let span = u64::from(PROGRESS_SOS_END - PROGRESS_SOS_START);
            let pct = PROGRESS_SOS_START + (((i as u64 + 1) * span) / total as u64) as u8;
            on_progress(pct);
        }
        Ok(outcomes)
    }
}
