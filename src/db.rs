use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info};

use crate::models::{ScanRecord, StoredRecord};

/// What to do when a record for the same (company, location) already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Leave the stored record alone
    #[default]
    Skip,
    /// Overwrite the stored record's fields with the new scan
    Merge,
}

impl FromStr for MergePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(MergePolicy::Skip),
            "merge" | "overwrite" => Ok(MergePolicy::Merge),
            other => Err(anyhow!("Unknown merge policy '{}' (expected 'skip' or 'merge')", other)),
        }
    }
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergePolicy::Skip => write!(f, "skip"),
            MergePolicy::Merge => write!(f, "merge"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(i64),
    Updated(i64),
    Skipped(i64),
}

pub struct Database {
    conn: Mutex<Connection>,
    path: PathBuf,
    policy: MergePolicy,
}

impl Database {
    /// Open the database named by `database_url` (a path or `sqlite://` URL),
    /// or the default location under the user's data directory.
    pub fn open(database_url: Option<&str>, policy: MergePolicy) -> Result<Self> {
        let path = match database_url {
            Some(url) => PathBuf::from(strip_sqlite_scheme(url)),
            None => Self::default_path()?,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
            policy,
        })
    }

    #[cfg(test)]
    pub fn open_in_memory(policy: MergePolicy) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: PathBuf::from(":memory:"),
            policy,
        };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    fn default_path() -> Result<PathBuf> {
        // Use XDG data directory or fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "reachout") {
            Ok(proj_dirs.data_dir().join("reachout.db"))
        } else {
            Ok(PathBuf::from("reachout.db"))
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Database connection lock poisoned"))
    }

    pub fn init(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_name TEXT NOT NULL,
                company_info TEXT,
                job_description TEXT NOT NULL,
                location TEXT NOT NULL,
                listing_date TEXT NOT NULL,
                careers_page TEXT,
                emails TEXT NOT NULL DEFAULT '[]',
                scanned_pages TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (company_name, location)
            );

            CREATE INDEX IF NOT EXISTS idx_records_company ON records(company_name);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='records'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!(
                "Database not initialized. Run 'reachout init' first."
            ));
        }
        Ok(())
    }

    // --- Writes ---

    /// Insert `record`, or resolve the collision with an existing
    /// (company_name, location) according to the merge policy.
    pub fn upsert(&self, record: &ScanRecord) -> Result<UpsertOutcome> {
        let conn = self.conn()?;

        let existing = conn.query_row(
            "SELECT id FROM records WHERE company_name = ?1 AND location = ?2",
            params![record.company_name, record.location],
            |row| row.get::<_, i64>(0),
        );
        let existing = match existing {
            Ok(id) => Some(id),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        let emails = serde_json::to_string(&record.emails)?;
        let scanned_pages = serde_json::to_string(&record.scanned_pages)?;

        match (existing, self.policy) {
            (None, _) => {
                conn.execute(
                    "INSERT INTO records (company_name, company_info, job_description, location,
                                          listing_date, careers_page, emails, scanned_pages)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        record.company_name,
                        record.company_info,
                        record.job_description,
                        record.location,
                        record.listing_date,
                        record.careers_page,
                        emails,
                        scanned_pages
                    ],
                )?;
                let id = conn.last_insert_rowid();
                debug!(id, company = %record.company_name, location = %record.location, "Inserted record");
                Ok(UpsertOutcome::Inserted(id))
            }
            (Some(id), MergePolicy::Skip) => {
                info!(
                    id,
                    company = %record.company_name,
                    location = %record.location,
                    "Record already exists, skipping"
                );
                Ok(UpsertOutcome::Skipped(id))
            }
            (Some(id), MergePolicy::Merge) => {
                conn.execute(
                    "UPDATE records SET company_info = ?1, job_description = ?2, listing_date = ?3,
                                        careers_page = ?4, emails = ?5, scanned_pages = ?6,
                                        updated_at = datetime('now')
                     WHERE id = ?7",
                    params![
                        record.company_info,
                        record.job_description,
                        record.listing_date,
                        record.careers_page,
                        emails,
                        scanned_pages,
                        id
                    ],
                )?;
                debug!(id, company = %record.company_name, "Merged record");
                Ok(UpsertOutcome::Updated(id))
            }
        }
    }

    /// Upsert each record in order. A failed write is logged and reported in
    /// its slot; it never stops the rest of the batch.
    pub fn persist_batch(&self, records: &[ScanRecord]) -> Vec<Result<UpsertOutcome>> {
        records
            .iter()
            .map(|record| {
                let outcome = self.upsert(record);
                if let Err(e) = &outcome {
                    error!(
                        company = %record.company_name,
                        location = %record.location,
                        error = %e,
                        "Failed to persist record"
                    );
                }
                outcome
            })
            .collect()
    }

    // --- Reads ---

    pub fn list_records(&self, company: Option<&str>) -> Result<Vec<StoredRecord>> {
        let conn = self.conn()?;
        let mut sql = String::from(
            "SELECT id, company_name, company_info, job_description, location, listing_date,
                    careers_page, emails, scanned_pages, created_at, updated_at
             FROM records",
        );
        if company.is_some() {
            sql.push_str(" WHERE LOWER(company_name) = LOWER(?1)");
        }
        sql.push_str(" ORDER BY id");

        let mut stmt = conn.prepare(&sql)?;
        let rows = if let Some(c) = company {
            stmt.query_map([c], Self::row_to_record)?
        } else {
            stmt.query_map([], Self::row_to_record)?
        };

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list records")
    }

    pub fn get_record(&self, id: i64) -> Result<Option<StoredRecord>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            "SELECT id, company_name, company_info, job_description, location, listing_date,
                    careers_page, emails, scanned_pages, created_at, updated_at
             FROM records WHERE id = ?1",
            [id],
            Self::row_to_record,
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn count_records(&self) -> Result<i64> {
        let count = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Write every stored record to `path` as a pretty-printed JSON array.
    pub fn export_json(&self, path: &Path) -> Result<usize> {
        let records = self.list_records(None)?;
        let json = serde_json::to_string_pretty(&records)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(records.len())
    }

    /// Load a file written by `export_json` and upsert every entry under the
    /// configured policy. Ids and timestamps in the file are ignored.
    pub fn import_json(&self, path: &Path) -> Result<Vec<Result<UpsertOutcome>>> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let records: Vec<ScanRecord> = serde_json::from_str(&json)
            .with_context(|| format!("{} is not a list of records", path.display()))?;
        info!(count = records.len(), path = %path.display(), "Importing records");
        Ok(self.persist_batch(&records))
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<StoredRecord> {
        Ok(StoredRecord {
            id: row.get(0)?,
            company_name: row.get(1)?,
            company_info: row.get(2)?,
            job_description: row.get(3)?,
            location: row.get(4)?,
            listing_date: row.get(5)?,
            careers_page: row.get(6)?,
            emails: json_column(row, 7)?,
            scanned_pages: json_column(row, 8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

fn json_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn strip_sqlite_scheme(url: &str) -> &str {
    url.strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexSet;

    fn record(company: &str, location: &str, emails: &[&str]) -> ScanRecord {
        ScanRecord {
            company_name: company.to_string(),
            job_description: format!("{} is hiring", company),
            location: location.to_string(),
            listing_date: "2024-05-01T10:00:00Z".to_string(),
            company_info: Some(format!("{} | Home", company)),
            careers_page: None,
            emails: emails.iter().map(|s| s.to_string()).collect::<IndexSet<_>>(),
            scanned_pages: vec![format!("https://{}.test/", company.to_lowercase())],
        }
    }

    #[test]
    fn test_insert_then_read_back() {
        let db = Database::open_in_memory(MergePolicy::Skip).unwrap();
        let outcome = db.upsert(&record("Acme", "Pune", &["hr@acme.test"])).unwrap();
        assert!(matches!(outcome, UpsertOutcome::Inserted(_)));

        let records = db.list_records(None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].company_name, "Acme");
        assert_eq!(records[0].emails, vec!["hr@acme.test".to_string()]);
        assert_eq!(records[0].scanned_pages, vec!["https://acme.test/".to_string()]);
    }

    #[test]
    fn test_skip_policy_keeps_first_record() {
        let db = Database::open_in_memory(MergePolicy::Skip).unwrap();
        db.upsert(&record("Acme", "Pune", &["first@acme.test"])).unwrap();
        let outcome = db.upsert(&record("Acme", "Pune", &["second@acme.test"])).unwrap();

        assert!(matches!(outcome, UpsertOutcome::Skipped(_)));
        let records = db.list_records(None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].emails, vec!["first@acme.test".to_string()]);
    }

    #[test]
    fn test_merge_policy_overwrites_fields() {
        let db = Database::open_in_memory(MergePolicy::Merge).unwrap();
        db.upsert(&record("Acme", "Pune", &["first@acme.test"])).unwrap();

        let mut newer = record("Acme", "Pune", &["second@acme.test"]);
        newer.careers_page = Some("https://acme.test/careers".to_string());
        let outcome = db.upsert(&newer).unwrap();

        assert!(matches!(outcome, UpsertOutcome::Updated(_)));
        let records = db.list_records(None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].emails, vec!["second@acme.test".to_string()]);
        assert_eq!(records[0].careers_page.as_deref(), Some("https://acme.test/careers"));
    }

    #[test]
    fn test_same_company_different_location_is_distinct() {
        let db = Database::open_in_memory(MergePolicy::Skip).unwrap();
        db.upsert(&record("Acme", "Pune", &[])).unwrap();
        db.upsert(&record("Acme", "Mumbai", &[])).unwrap();
        assert_eq!(db.count_records().unwrap(), 2);
    }

    #[test]
    fn test_persist_batch_is_idempotent() {
        let db = Database::open_in_memory(MergePolicy::Skip).unwrap();
        let batch = vec![record("Acme", "Pune", &[]), record("Globex", "Delhi", &[])];

        let first = db.persist_batch(&batch[..1]);
        assert!(matches!(first[0], Ok(UpsertOutcome::Inserted(_))));

        let second = db.persist_batch(&batch);
        assert!(matches!(second[0], Ok(UpsertOutcome::Skipped(_))));
        assert!(matches!(second[1], Ok(UpsertOutcome::Inserted(_))));
        assert_eq!(db.count_records().unwrap(), 2);
    }

    #[test]
    fn test_get_record_missing() {
        let db = Database::open_in_memory(MergePolicy::Skip).unwrap();
        assert!(db.get_record(42).unwrap().is_none());
    }

    #[test]
    fn test_list_records_filters_by_company() {
        let db = Database::open_in_memory(MergePolicy::Skip).unwrap();
        db.upsert(&record("Acme", "Pune", &[])).unwrap();
        db.upsert(&record("Globex", "Delhi", &[])).unwrap();

        let records = db.list_records(Some("acme")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].company_name, "Acme");
    }

    #[test]
    fn test_export_json() {
        let db = Database::open_in_memory(MergePolicy::Skip).unwrap();
        db.upsert(&record("Acme", "Pune", &["hr@acme.test"])).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job_data.json");
        let count = db.export_json(&path).unwrap();
        assert_eq!(count, 1);

        let exported: Vec<StoredRecord> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(exported[0].company_name, "Acme");
        assert_eq!(exported[0].emails, vec!["hr@acme.test".to_string()]);
    }

    #[test]
    fn test_export_then_import() {
        let source = Database::open_in_memory(MergePolicy::Skip).unwrap();
        source.upsert(&record("Acme", "Pune", &["hr@acme.test"])).unwrap();
        source.upsert(&record("Globex", "Delhi", &[])).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job_data.json");
        source.export_json(&path).unwrap();

        let target = Database::open_in_memory(MergePolicy::Skip).unwrap();
        target.upsert(&record("Acme", "Pune", &["old@acme.test"])).unwrap();
        let outcomes = target.import_json(&path).unwrap();

        assert!(matches!(outcomes[0], Ok(UpsertOutcome::Skipped(_))));
        assert!(matches!(outcomes[1], Ok(UpsertOutcome::Inserted(_))));
        let stored = target.list_records(None).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].emails, vec!["old@acme.test".to_string()]);
        assert_eq!(stored[1].company_name, "Globex");
    }

    #[test]
    fn test_import_applies_merge_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job_data.json");
        // Minimal entries, as older dumps carry no scan metadata
        std::fs::write(
            &path,
            r#"[{"company_name": "Acme", "job_description": "Rockets", "location": "Pune",
                 "listing_date": "2024-05-01", "emails": ["new@acme.test"]}]"#,
        )
        .unwrap();

        let db = Database::open_in_memory(MergePolicy::Merge).unwrap();
        db.upsert(&record("Acme", "Pune", &["old@acme.test"])).unwrap();
        let outcomes = db.import_json(&path).unwrap();

        assert!(matches!(outcomes[0], Ok(UpsertOutcome::Updated(_))));
        let stored = db.list_records(None).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].emails, vec!["new@acme.test".to_string()]);
        assert!(stored[0].scanned_pages.is_empty());
    }

    #[test]
    fn test_import_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job_data.json");
        std::fs::write(&path, r#"{"not": "a list"}"#).unwrap();

        let db = Database::open_in_memory(MergePolicy::Skip).unwrap();
        assert!(db.import_json(&path).is_err());
        assert!(db.import_json(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("nested/records.db").display());
        let db = Database::open(Some(&url), MergePolicy::Skip).unwrap();
        assert!(db.ensure_initialized().is_err());
        db.init().unwrap();
        db.ensure_initialized().unwrap();
        assert_eq!(db.path(), &dir.path().join("nested/records.db"));
    }

    #[test]
    fn test_merge_policy_parsing() {
        assert_eq!("skip".parse::<MergePolicy>().unwrap(), MergePolicy::Skip);
        assert_eq!("MERGE".parse::<MergePolicy>().unwrap(), MergePolicy::Merge);
        assert!("replace-all".parse::<MergePolicy>().is_err());
        assert_eq!(MergePolicy::default(), MergePolicy::Skip);
    }
}
