//! # Local Activity Store
//!
//! Flat-file record store with per-activity side-files.
//!
//! ## Layout
//!
//! ```text
//! {data_dir}/
//!   activities_list.csv                  record store (one row per activity)
//!   activities_list.csv.{timestamp}      backups, one per structural mutation
//!   json/{base}.json                     detail blob (remote payload)
//!   gpx/{base}.gpx                       raw track as fetched
//!   coordinates/{base}.csv               reduced trace (latitude,longitude)
//! ```
//!
//! `{base}` is the record's `filename` column, `{date}_{id}_{type}`.
//!
//! ## Mutation model
//!
//! Sync only ever appends rows. Everything else (`replace`, `delete`,
//! `resort`, regeneration) loads the whole table into memory after copying the
//! store file to a timestamped backup, mutates the in-memory table, and
//! replaces the store file atomically (write sibling, rename). A crash at any
//! point leaves either the old or the new table on disk plus the backup.
//!
//! The store assumes a single writer. Running two syncs against the same
//! directory at once is unsupported.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use log::{debug, info, warn};
use serde_json::Value;

use crate::algorithms::round_coordinates;
use crate::record::RecordRow;
use crate::{ActivityId, ActivityRecord, Config, Error, GpsPoint, OptionExt, Result};

const DATABASE_FILE: &str = "activities_list.csv";
const TRACE_HEADER: [&str; 2] = ["latitude", "longitude"];

/// Frontier of an empty store (1970-01-01).
pub fn epoch_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN)
}

// ============================================================================
// Paths
// ============================================================================

/// File locations of a store rooted at one data directory.
#[derive(Debug, Clone)]
pub struct StorePaths {
    pub root: PathBuf,
    pub database: PathBuf,
    pub detail_dir: PathBuf,
    pub raw_track_dir: PathBuf,
    pub trace_dir: PathBuf,
}

impl StorePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            database: root.join(DATABASE_FILE),
            detail_dir: root.join("json"),
            raw_track_dir: root.join("gpx"),
            trace_dir: root.join("coordinates"),
            root,
        }
    }

    pub fn detail_file(&self, base: &str) -> PathBuf {
        self.detail_dir.join(format!("{}.json", base))
    }

    pub fn raw_track_file(&self, base: &str) -> PathBuf {
        self.raw_track_dir.join(format!("{}.gpx", base))
    }

    pub fn trace_file(&self, base: &str) -> PathBuf {
        self.trace_dir.join(format!("{}.csv", base))
    }

    fn side_files(&self, base: &str) -> [PathBuf; 3] {
        [
            self.trace_file(base),
            self.raw_track_file(base),
            self.detail_file(base),
        ]
    }
}

/// Sync frontier of a table in store order: date of the last row, or
/// [`epoch_start`] when empty.
pub fn frontier_of(records: &[ActivityRecord]) -> NaiveDate {
    records.last().map(|r| r.date).unwrap_or_else(epoch_start)
}

// ============================================================================
// Store
// ============================================================================

/// Record store plus side-files under one data directory.
#[derive(Debug, Clone)]
pub struct ActivityStore {
    paths: StorePaths,
    coordinate_precision: u32,
}

impl ActivityStore {
    /// Open (and if needed create) a store.
    ///
    /// Creates the side-file directories and, when missing, a record store
    /// holding only the header row.
    pub fn open(paths: StorePaths, coordinate_precision: u32) -> Result<Self> {
        for dir in [&paths.root, &paths.detail_dir, &paths.raw_track_dir, &paths.trace_dir] {
            fs::create_dir_all(dir)?;
        }

        let store = Self {
            paths,
            coordinate_precision,
        };

        if !store.paths.database.exists() {
            info!(
                "[ActivityStore] Creating empty record store {}",
                store.paths.database.display()
            );
            store.write_table(&store.paths.database, &[])?;
        }

        Ok(store)
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::open(StorePaths::new(&config.data_dir), config.coordinate_precision)
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Read the full record store in file order.
    ///
    /// With `include_traces`, every `has_track` record also gets its reduced
    /// trace, rounded to the configured precision. A trace that cannot be read
    /// is a data-integrity warning: the record is returned with
    /// `has_track = false` and the load continues.
    pub fn load_all(&self, include_traces: bool) -> Result<Vec<ActivityRecord>> {
        let mut reader = csv::Reader::from_path(&self.paths.database)?;
        let mut records = Vec::new();

        for (index, row) in reader.deserialize::<RecordRow>().enumerate() {
            let mut record = row?.into_record(index + 1)?;

            if include_traces && record.has_track {
                match self.read_trace(&record.filename) {
                    Ok(trace) if !trace.is_empty() => {
                        record.trace = round_coordinates(&trace, self.coordinate_precision);
                    }
                    Ok(_) => {
                        warn!(
                            "[ActivityStore] Empty trace for {} ({}), treating as no GPS data",
                            record.id, record.date
                        );
                        record.has_track = false;
                    }
                    Err(e) => {
                        warn!(
                            "[ActivityStore] Cannot load trace for {} ({}): {}",
                            record.id, record.date, e
                        );
                        record.has_track = false;
                    }
                }
            }

            records.push(record);
        }

        debug!(
            "[ActivityStore] Loaded {} records (traces: {})",
            records.len(),
            include_traces
        );
        Ok(records)
    }

    /// Point lookup by id, without trace.
    pub fn get(&self, id: &ActivityId) -> Result<Option<ActivityRecord>> {
        Ok(self.load_all(false)?.into_iter().find(|r| &r.id == id))
    }

    /// Ids of every ingested activity.
    pub fn known_ids(&self) -> Result<HashSet<ActivityId>> {
        Ok(self.load_all(false)?.into_iter().map(|r| r.id).collect())
    }

    /// Date of the last record in store order, or [`epoch_start`].
    pub fn frontier(&self) -> Result<NaiveDate> {
        Ok(frontier_of(&self.load_all(false)?))
    }

    // ========================================================================
    // Append
    // ========================================================================

    /// Append one record at the end of the store.
    ///
    /// No re-sort happens; callers append in ascending `(date, id)` order.
    pub fn append(&self, record: &ActivityRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.paths.database)?;

        let length = file.metadata()?.len();
        if length == 0 {
            let mut writer = csv::Writer::from_writer(&mut file);
            writer.serialize(RecordRow::from(record))?;
            writer.flush()?;
        } else {
            if !ends_with_newline(&mut file, length)? {
                file.write_all(b"\n")?;
            }
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(&mut file);
            writer.serialize(RecordRow::from(record))?;
            writer.flush()?;
        }

        debug!("[ActivityStore] Appended {}", record);
        Ok(())
    }

    // ========================================================================
    // Structural mutations (backup first)
    // ========================================================================

    /// Copy the store file to a timestamped backup, then load it without traces.
    ///
    /// Every structural mutation starts here.
    pub fn backup_then_load(&self) -> Result<(PathBuf, Vec<ActivityRecord>)> {
        let backup = self.backup_path();
        info!("[ActivityStore] Creating a backup - {}", backup.display());
        fs::copy(&self.paths.database, &backup)?;

        let records = self.load_all(false)?;
        info!("[ActivityStore] Loaded {} activities", records.len());
        Ok((backup, records))
    }

    /// Replace the record with `id` by `record`.
    ///
    /// When the base filename changes (date or type differ), the old
    /// side-files are deleted; the caller writes the new ones afterwards.
    /// The store is not re-sorted. Returns the backup path.
    pub fn replace(&self, id: &ActivityId, record: ActivityRecord) -> Result<PathBuf> {
        if &record.id != id {
            return Err(Error::InvalidPayload(format!(
                "replacement for {} carries id {}",
                id, record.id
            )));
        }

        let (backup, mut records) = self.backup_then_load()?;
        let index = records
            .iter()
            .position(|r| &r.id == id)
            .ok_or_not_found(id)?;

        let old = &records[index];
        if old.filename != record.filename {
            info!(
                "[ActivityStore] Base filename of {} changed ({} -> {})",
                id, old.filename, record.filename
            );
            self.delete_side_files(&old.filename)?;
        }

        info!("[ActivityStore] Replacing {} with {}", old, record);
        records[index] = record;
        self.rewrite(&records)?;
        Ok(backup)
    }

    /// Delete the record with `id` and its side-files. Returns the backup path.
    pub fn delete(&self, id: &ActivityId) -> Result<PathBuf> {
        info!("[ActivityStore] Deleting activity {}", id);
        let (backup, mut records) = self.backup_then_load()?;
        let index = records
            .iter()
            .position(|r| &r.id == id)
            .ok_or_not_found(id)?;

        let removed = records.remove(index);
        self.rewrite(&records)?;
        self.delete_side_files(&removed.filename)?;
        Ok(backup)
    }

    /// Stable-sort the whole store by `(date, id)`. Returns the backup path.
    pub fn resort(&self) -> Result<PathBuf> {
        info!("[ActivityStore] Re-sorting the record store");
        let (backup, mut records) = self.backup_then_load()?;
        records.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        self.rewrite(&records)?;
        Ok(backup)
    }

    /// Atomically replace the store file with `records`.
    ///
    /// Only called after [`backup_then_load`](Self::backup_then_load).
    pub(crate) fn rewrite(&self, records: &[ActivityRecord]) -> Result<()> {
        let staging = self.paths.database.with_extension("csv.tmp");
        info!(
            "[ActivityStore] Writing {} records into {}",
            records.len(),
            self.paths.database.display()
        );
        self.write_table(&staging, records)?;
        fs::rename(&staging, &self.paths.database)?;
        Ok(())
    }

    fn write_table(&self, path: &Path, records: &[ActivityRecord]) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = csv::Writer::from_writer(file);
        if records.is_empty() {
            writer.write_record(RECORD_COLUMNS)?;
        }
        for record in records {
            writer.serialize(RecordRow::from(record))?;
        }
        let file = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
        file.sync_all()?;
        Ok(())
    }

    fn backup_path(&self) -> PathBuf {
        let timestamp = Local::now().format("%Y%m%d%H%M%S%3f");
        let base = format!("{}.{}", self.paths.database.display(), timestamp);
        let mut candidate = PathBuf::from(&base);
        let mut suffix = 1;
        while candidate.exists() {
            candidate = PathBuf::from(format!("{}.{}", base, suffix));
            suffix += 1;
        }
        candidate
    }

    // ========================================================================
    // Side-files
    // ========================================================================

    /// Write the side-files of one ingested activity.
    ///
    /// The detail blob is always written. Raw track and reduced trace are
    /// written when `trace` is non-empty; otherwise any stale ones under the
    /// same base are removed so `has_track = false` never leaves a trace behind.
    pub fn write_side_files(
        &self,
        base: &str,
        detail: &Value,
        raw_track: &[u8],
        trace: &[GpsPoint],
    ) -> Result<()> {
        let detail_file = self.paths.detail_file(base);
        debug!("[ActivityStore] Writing {}", detail_file.display());
        fs::write(&detail_file, serde_json::to_vec_pretty(detail)?)?;

        let raw_track_file = self.paths.raw_track_file(base);
        if trace.is_empty() {
            remove_if_exists(&raw_track_file)?;
            remove_if_exists(&self.paths.trace_file(base))?;
            return Ok(());
        }

        debug!("[ActivityStore] Writing {}", raw_track_file.display());
        fs::write(&raw_track_file, raw_track)?;
        self.write_trace(base, trace)
    }

    /// Write a reduced trace side-file.
    pub fn write_trace(&self, base: &str, trace: &[GpsPoint]) -> Result<()> {
        let trace_file = self.paths.trace_file(base);
        debug!("[ActivityStore] Writing {}", trace_file.display());

        let mut writer = csv::Writer::from_path(&trace_file)?;
        writer.write_record(TRACE_HEADER)?;
        for point in trace {
            writer.write_record([point.latitude.to_string(), point.longitude.to_string()])?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Read a reduced trace side-file, unrounded.
    pub fn read_trace(&self, base: &str) -> Result<Vec<GpsPoint>> {
        let mut reader = csv::Reader::from_path(self.paths.trace_file(base))?;
        let mut trace = Vec::new();
        for row in reader.deserialize::<(f64, f64)>() {
            let (latitude, longitude) = row?;
            trace.push(GpsPoint::new(latitude, longitude));
        }
        Ok(trace)
    }

    /// Read a record's detail blob. A missing file is [`Error::MissingSideFile`].
    pub fn read_detail(&self, record: &ActivityRecord) -> Result<Value> {
        let bytes = self.read_side_file(record, self.paths.detail_file(&record.filename))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Read a record's raw track. A missing file is [`Error::MissingSideFile`].
    pub fn read_raw_track(&self, record: &ActivityRecord) -> Result<Vec<u8>> {
        self.read_side_file(record, self.paths.raw_track_file(&record.filename))
    }

    fn read_side_file(&self, record: &ActivityRecord, path: PathBuf) -> Result<Vec<u8>> {
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::MissingSideFile {
                activity_id: record.id.clone(),
                path,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every side-file under `base`. Missing files are ignored.
    pub fn delete_side_files(&self, base: &str) -> Result<()> {
        for path in self.paths.side_files(base) {
            if path.exists() {
                info!("[ActivityStore] Deleting {}", path.display());
            }
            remove_if_exists(&path)?;
        }
        Ok(())
    }
}

const RECORD_COLUMNS: [&str; 9] = [
    "date",
    "time",
    "type",
    "duration",
    "distance",
    "activity_id",
    "name",
    "filename",
    "has_gps_data",
];

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn ends_with_newline(file: &mut File, length: u64) -> Result<bool> {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(length - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use tempfile::TempDir;

    fn open_store() -> (ActivityStore, TempDir) {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let store =
            ActivityStore::open(StorePaths::new(tmp.path()), 5).expect("failed to open store");
        (store, tmp)
    }

    fn record(id: u64, date: &str, activity_type: &str, has_track: bool) -> ActivityRecord {
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap();
        let id = ActivityId::from(id);
        ActivityRecord {
            filename: crate::record::base_filename(date, &id, activity_type),
            id,
            date,
            time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            activity_type: activity_type.to_string(),
            distance_km: 10.25,
            duration_min: 55.5,
            name: "Morning, \"quoted\" run".to_string(),
            has_track,
            trace: Vec::new(),
        }
    }

    fn sample_trace() -> Vec<GpsPoint> {
        vec![
            GpsPoint::new(50.1234567, 14.7654321),
            GpsPoint::new(50.2, 14.8),
        ]
    }

    #[test]
    fn test_open_creates_header_only_store() {
        let (store, _tmp) = open_store();
        let content = fs::read_to_string(&store.paths().database).unwrap();
        assert_eq!(
            content.trim_end(),
            "date,time,type,duration,distance,activity_id,name,filename,has_gps_data"
        );
        assert!(store.load_all(false).unwrap().is_empty());
        assert_eq!(store.frontier().unwrap(), epoch_start());
        assert!(store.paths().trace_dir.is_dir());
    }

    #[test]
    fn test_append_preserves_order_and_fields() {
        let (store, _tmp) = open_store();
        let records = vec![
            record(1, "2024-06-01", "running", false),
            record(2, "2024-06-01", "cycling", false),
            record(3, "2024-06-02", "hiking", false),
        ];
        for r in &records {
            store.append(r).unwrap();
        }

        let loaded = store.load_all(false).unwrap();
        assert_eq!(loaded, records);
        assert_eq!(store.frontier().unwrap().to_string(), "2024-06-02");
        assert_eq!(store.known_ids().unwrap().len(), 3);
        assert_eq!(
            store.get(&ActivityId::from(2)).unwrap().unwrap().activity_type,
            "cycling"
        );
        assert!(store.get(&ActivityId::from(9)).unwrap().is_none());
    }

    #[test]
    fn test_append_after_file_without_trailing_newline() {
        let (store, _tmp) = open_store();
        let header = RECORD_COLUMNS.join(",");
        fs::write(&store.paths().database, header).unwrap();

        store.append(&record(1, "2024-06-01", "running", false)).unwrap();
        assert_eq!(store.load_all(false).unwrap().len(), 1);
    }

    #[test]
    fn test_load_with_traces_rounds_coordinates() {
        let (store, _tmp) = open_store();
        let r = record(1, "2024-06-01", "running", true);
        store
            .write_side_files(
                &r.filename,
                &serde_json::json!({"activityId": 1}),
                b"<gpx/>",
                &sample_trace(),
            )
            .unwrap();
        store.append(&r).unwrap();

        let loaded = store.load_all(true).unwrap();
        assert!(loaded[0].has_track);
        assert_eq!(loaded[0].trace[0], GpsPoint::new(50.12346, 14.76543));

        // Stored trace keeps full precision
        assert_eq!(store.read_trace(&r.filename).unwrap(), sample_trace());
    }

    #[test]
    fn test_missing_trace_is_a_warning_not_an_error() {
        let (store, _tmp) = open_store();
        store.append(&record(1, "2024-06-01", "running", true)).unwrap();
        store.append(&record(2, "2024-06-02", "running", false)).unwrap();

        let loaded = store.load_all(true).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(!loaded[0].has_track);
        assert!(loaded[0].trace.is_empty());

        // The flag on disk is untouched
        assert!(store.load_all(false).unwrap()[0].has_track);
    }

    #[test]
    fn test_resort_orders_by_date_then_numeric_id() {
        let (store, _tmp) = open_store();
        store.append(&record(10, "2024-06-02", "running", false)).unwrap();
        store.append(&record(9, "2024-06-02", "running", false)).unwrap();
        store.append(&record(100, "2024-06-01", "running", false)).unwrap();

        let before = fs::read(&store.paths().database).unwrap();
        let backup = store.resort().unwrap();
        assert_eq!(fs::read(&backup).unwrap(), before);

        let ids: Vec<String> = store
            .load_all(false)
            .unwrap()
            .iter()
            .map(|r| r.id.to_string())
            .collect();
        assert_eq!(ids, vec!["100", "9", "10"]);
    }

    #[test]
    fn test_delete_removes_record_and_side_files() {
        let (store, _tmp) = open_store();
        let r = record(1, "2024-06-01", "running", true);
        store
            .write_side_files(&r.filename, &serde_json::json!({}), b"<gpx/>", &sample_trace())
            .unwrap();
        store.append(&r).unwrap();
        store.append(&record(2, "2024-06-02", "running", false)).unwrap();

        let before = fs::read(&store.paths().database).unwrap();
        let backup = store.delete(&ActivityId::from(1)).unwrap();
        assert_eq!(fs::read(&backup).unwrap(), before);

        let loaded = store.load_all(false).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, ActivityId::from(2));
        for path in store.paths().side_files(&r.filename) {
            assert!(!path.exists(), "{} should be gone", path.display());
        }
    }

    #[test]
    fn test_delete_missing_id_leaves_store_unchanged() {
        let (store, _tmp) = open_store();
        store.append(&record(1, "2024-06-01", "running", false)).unwrap();
        let before = fs::read(&store.paths().database).unwrap();

        let err = store.delete(&ActivityId::from(7)).unwrap_err();
        assert!(matches!(err, Error::RecordNotFound(id) if id.as_str() == "7"));
        assert_eq!(fs::read(&store.paths().database).unwrap(), before);
    }

    #[test]
    fn test_replace_with_changed_type_removes_old_side_files() {
        let (store, _tmp) = open_store();
        let old = record(5, "2024-06-01", "running", true);
        store
            .write_side_files(&old.filename, &serde_json::json!({}), b"<gpx/>", &sample_trace())
            .unwrap();
        store.append(&old).unwrap();

        let new = record(5, "2024-06-01", "inline_skating", false);
        let before = fs::read(&store.paths().database).unwrap();
        let backup = store.replace(&ActivityId::from(5), new.clone()).unwrap();
        assert_eq!(fs::read(&backup).unwrap(), before);

        for path in store.paths().side_files(&old.filename) {
            assert!(!path.exists());
        }
        assert_eq!(store.load_all(false).unwrap(), vec![new]);
    }

    #[test]
    fn test_replace_unknown_id_fails() {
        let (store, _tmp) = open_store();
        store.append(&record(1, "2024-06-01", "running", false)).unwrap();
        let err = store
            .replace(&ActivityId::from(2), record(2, "2024-06-01", "running", false))
            .unwrap_err();
        assert!(matches!(err, Error::RecordNotFound(_)));

        let err = store
            .replace(&ActivityId::from(1), record(2, "2024-06-01", "running", false))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPayload(_)));
    }

    #[test]
    fn test_write_side_files_without_trace_clears_stale_track() {
        let (store, _tmp) = open_store();
        let base = "2024-06-01_1_running";
        store
            .write_side_files(base, &serde_json::json!({}), b"<gpx/>", &sample_trace())
            .unwrap();
        store
            .write_side_files(base, &serde_json::json!({"v": 2}), b"", &[])
            .unwrap();

        assert!(store.paths().detail_file(base).exists());
        assert!(!store.paths().raw_track_file(base).exists());
        assert!(!store.paths().trace_file(base).exists());
    }

    #[test]
    fn test_read_detail_missing_is_reported() {
        let (store, _tmp) = open_store();
        let r = record(3, "2024-06-01", "running", false);
        let err = store.read_detail(&r).unwrap_err();
        assert!(matches!(
            err,
            Error::MissingSideFile { activity_id, .. } if activity_id.as_str() == "3"
        ));
    }

    #[test]
    fn test_backups_do_not_overwrite_each_other() {
        let (store, _tmp) = open_store();
        let (first, _) = store.backup_then_load().unwrap();
        let (second, _) = store.backup_then_load().unwrap();
        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
    }
}
