//! # Sync Orchestrator
//!
//! Moves activities from a [`RemoteSource`] into an [`ActivityStore`].
//!
//! ## Sync run
//!
//! 1. **Frontier**: read the store (no traces); the frontier is the date of the
//!    last record, or 1970-01-01 for an empty store.
//! 2. **Candidates**: list remote activities starting on or after the frontier,
//!    ascending, capped at `max_batch`. The cap applies before known ids are
//!    filtered out; a truncated listing is reported as `partial_batch` and the
//!    next run continues from the advanced frontier.
//! 3. **Filter**: drop candidates whose id is already stored.
//! 4. **Ingest**, one candidate at a time: detail, track, reduction,
//!    side-files, append. A failing candidate is logged and skipped; it was
//!    never appended, so the next run picks it up again as long as its date
//!    is not before the new frontier. Older gaps are filled with
//!    [`Syncer::sync_since`].
//!
//! Listing failures abort the run before anything is written. The frontier is
//! derived from the store, so an aborted run leaves it unchanged.
//!
//! Cancellation is checked between candidates only; an activity is either
//! fully ingested and appended or not at all.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use log::{debug, info, warn};

use crate::algorithms::reduce;
use crate::gpx::parse_track_points;
use crate::remote::normalize_payload;
use crate::store::frontier_of;
use crate::{
    ActivityId, ActivityRecord, ActivityStore, Config, Error, GpsPoint, RemoteActivityDetail,
    RemoteSource, Result,
};

/// Outcome of one sync run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Frontier the run started from.
    pub frontier: Option<NaiveDate>,
    /// Candidates listed by the remote (after the cap).
    pub candidates: usize,
    /// Candidates dropped because their id was already stored.
    pub already_known: usize,
    /// Records appended to the store.
    pub ingested: usize,
    /// Ingested records without GPS data.
    pub without_track: usize,
    /// Candidates that failed and will be retried next run.
    pub skipped: usize,
    /// The remote had more candidates than `max_batch`.
    pub partial_batch: bool,
    /// The run stopped early on request.
    pub cancelled: bool,
}

/// Result of a forced single-activity reload.
#[derive(Debug, Clone, PartialEq)]
pub enum ReloadOutcome {
    /// The stored record was replaced in place.
    Replaced(ActivityRecord),
    /// The remote no longer knows the id; nothing changed.
    RemoteMissing,
}

/// Sync orchestrator over one store and one remote source.
pub struct Syncer<S> {
    store: ActivityStore,
    source: S,
    max_batch: usize,
    tolerance: f64,
    cancel: Arc<AtomicBool>,
}

impl<S: RemoteSource> Syncer<S> {
    /// Fails with [`Error::Config`] when `config` does not validate.
    pub fn new(store: ActivityStore, source: S, config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            source,
            max_batch: config.max_batch,
            tolerance: config.simplification_tolerance,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Share a cancellation flag; setting it stops a run before the next candidate.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn store(&self) -> &ActivityStore {
        &self.store
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    // ========================================================================
    // Incremental sync
    // ========================================================================

    /// Run one incremental sync from the store's frontier.
    pub fn sync(&self) -> Result<SyncReport> {
        self.run(None)
    }

    /// Run one sync listing from `from` instead of the frontier.
    ///
    /// Known ids are still filtered out, so this only fills gaps: candidates
    /// that were skipped in an earlier run and now lie before the frontier.
    pub fn sync_since(&self, from: NaiveDate) -> Result<SyncReport> {
        self.run(Some(from))
    }

    fn run(&self, from: Option<NaiveDate>) -> Result<SyncReport> {
        let records = self.store.load_all(false)?;
        let frontier = from.unwrap_or_else(|| frontier_of(&records));
        let mut known: HashSet<ActivityId> = records.into_iter().map(|r| r.id).collect();

        info!(
            "[Syncer] Frontier {} with {} known activities",
            frontier,
            known.len()
        );

        // One extra entry tells whether the cap truncated the listing
        let mut candidates = self
            .source
            .list_activities(frontier, None, self.max_batch.saturating_add(1))
            .map_err(|e| {
                warn!("[Syncer] Listing since {} failed, aborting run: {}", frontier, e);
                e
            })?;
        candidates.sort_by(|a, b| (a.start_local, &a.id).cmp(&(b.start_local, &b.id)));

        let mut report = SyncReport {
            frontier: Some(frontier),
            partial_batch: candidates.len() > self.max_batch,
            ..SyncReport::default()
        };
        candidates.truncate(self.max_batch);
        report.candidates = candidates.len();

        info!("[Syncer] Going to process {} activities", candidates.len());
        if report.partial_batch {
            info!(
                "[Syncer] More than {} candidates at remote, the next run continues",
                self.max_batch
            );
        }

        for candidate in candidates {
            if self.cancel.load(Ordering::Relaxed) {
                info!("[Syncer] Cancelled before {}", candidate.id);
                report.cancelled = true;
                break;
            }

            let date = candidate.start_local.date();
            if known.contains(&candidate.id) {
                debug!(
                    "[Syncer] Skipping {} ({}) - already in the store",
                    candidate.id, date
                );
                report.already_known += 1;
                continue;
            }

            match self.ingest(&candidate.id) {
                Ok(Some(record)) => {
                    self.store.append(&record)?;
                    info!("[Syncer] Ingested {}", record);
                    if !record.has_track {
                        report.without_track += 1;
                    }
                    known.insert(record.id);
                    report.ingested += 1;
                }
                Ok(None) => {
                    warn!(
                        "[Syncer] Skipping {} ({}) - not found at remote",
                        candidate.id, date
                    );
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!("[Syncer] Skipping {} ({}): {}", candidate.id, date, e);
                    report.skipped += 1;
                }
            }
        }

        info!(
            "[Syncer] Sync finished: {} candidates, {} ingested, {} skipped ({} already known, {} without GPS data)",
            report.candidates,
            report.ingested,
            report.skipped,
            report.already_known,
            report.without_track
        );
        Ok(report)
    }

    /// Fetch and reduce one activity and write its side-files.
    ///
    /// `Ok(None)` when the remote does not know the id. The record is not
    /// appended here.
    fn ingest(&self, id: &ActivityId) -> Result<Option<ActivityRecord>> {
        let Some(detail) = self.fetch_detail(id)? else {
            return Ok(None);
        };

        let (raw_track, trace) = self.fetch_reduced_track(&detail);
        let record = ActivityRecord::from_detail(&detail, trace);
        self.store
            .write_side_files(&record.filename, &detail.raw, &raw_track, &record.trace)?;
        Ok(Some(record))
    }

    fn fetch_detail(&self, id: &ActivityId) -> Result<Option<RemoteActivityDetail>> {
        match self.source.fetch_detail(id)? {
            Some(detail) if &detail.id != id => Err(Error::InvalidPayload(format!(
                "detail for {} carries id {}",
                id, detail.id
            ))),
            other => Ok(other),
        }
    }

    /// Raw GPX and reduced trace; both empty when there is no usable GPS data.
    fn fetch_reduced_track(&self, detail: &RemoteActivityDetail) -> (Vec<u8>, Vec<GpsPoint>) {
        let id = &detail.id;
        let date = detail.start_local.date();

        let raw = match self.source.fetch_track(id) {
            Ok(raw) if !raw.is_empty() => raw,
            Ok(_) => {
                warn!("[Syncer] No GPS data for {} ({})", id, date);
                return (Vec::new(), Vec::new());
            }
            Err(e) => {
                warn!("[Syncer] Track fetch failed for {} ({}): {}", id, date, e);
                return (Vec::new(), Vec::new());
            }
        };

        let points = match parse_track_points(&raw) {
            Ok(points) => points,
            Err(e) => {
                warn!("[Syncer] Unreadable GPX for {} ({}): {}", id, date, e);
                return (Vec::new(), Vec::new());
            }
        };

        let reduced = reduce(&points, self.tolerance);
        if reduced.is_empty() {
            warn!("[Syncer] No coordinates for {} ({})", id, date);
            return (Vec::new(), Vec::new());
        }

        debug!(
            "[Syncer] Reduced {} from {} to {} points",
            id,
            points.len(),
            reduced.len()
        );
        (raw, reduced)
    }

    // ========================================================================
    // Forced reload
    // ========================================================================

    /// Re-fetch one activity by id and replace it in the store.
    ///
    /// Bypasses the date listing. Fails with [`Error::RecordNotFound`] when the
    /// id was never ingested. The store is not re-sorted, even if the date
    /// changed; run [`ActivityStore::resort`] afterwards in that case.
    pub fn reload(&self, id: &ActivityId) -> Result<ReloadOutcome> {
        info!("[Syncer] Reloading activity {}", id);

        let Some(detail) = self.fetch_detail(id)? else {
            warn!("[Syncer] Activity {} not found at remote, nothing changed", id);
            return Ok(ReloadOutcome::RemoteMissing);
        };

        let (raw_track, trace) = self.fetch_reduced_track(&detail);
        let record = ActivityRecord::from_detail(&detail, trace);

        self.store.replace(id, record.clone())?;
        self.store
            .write_side_files(&record.filename, &detail.raw, &raw_track, &record.trace)?;

        Ok(ReloadOutcome::Replaced(record))
    }

    // ========================================================================
    // Regeneration
    // ========================================================================

    /// Rebuild every reduced trace from the stored raw tracks.
    ///
    /// All raw tracks are checked first; a missing one aborts with
    /// [`Error::MissingSideFile`] before any trace is rewritten. The record
    /// store itself is not touched. Returns the number of traces written.
    pub fn regenerate_coordinates(&self) -> Result<usize> {
        let records: Vec<ActivityRecord> = self
            .store
            .load_all(false)?
            .into_iter()
            .filter(|r| r.has_track)
            .collect();

        info!(
            "[Syncer] Regenerating coordinates of {} activities (tolerance {})",
            records.len(),
            self.tolerance
        );

        let mut tracks = Vec::with_capacity(records.len());
        for record in &records {
            tracks.push(self.store.read_raw_track(record)?);
        }

        let mut written = 0;
        for (record, raw) in records.iter().zip(tracks) {
            let reduced = reduce(&parse_track_points(&raw)?, self.tolerance);
            if reduced.is_empty() {
                warn!(
                    "[Syncer] Raw track of {} ({}) has no points, keeping the old trace",
                    record.id, record.date
                );
                continue;
            }
            self.store.write_trace(&record.filename, &reduced)?;
            written += 1;
        }

        info!("[Syncer] Regenerated {} traces", written);
        Ok(written)
    }

    /// Rebuild the record store by re-normalizing every stored detail file.
    ///
    /// Each record keeps its `filename` and `has_track`; every other column is
    /// re-derived. A missing detail file aborts with
    /// [`Error::MissingSideFile`] before the store is rewritten. Returns the
    /// number of records written.
    pub fn regenerate_from_detail_files(&self) -> Result<usize> {
        let (_backup, records) = self.store.backup_then_load()?;

        let mut rebuilt = Vec::with_capacity(records.len());
        for record in &records {
            let detail = normalize_payload(self.store.read_detail(record)?)?;
            if detail.id != record.id {
                return Err(Error::InvalidPayload(format!(
                    "detail file {} belongs to {}",
                    record.filename, detail.id
                )));
            }

            let mut regenerated = ActivityRecord::from_detail(&detail, Vec::new());
            regenerated.has_track = record.has_track;
            regenerated.filename = record.filename.clone();
            rebuilt.push(regenerated);
        }

        self.store.rewrite(&rebuilt)?;
        info!("[Syncer] Regenerated {} records from detail files", rebuilt.len());
        Ok(rebuilt.len())
    }
}
