//! Database backup, restore and backup-file housekeeping
//!
//! A backup is one JSON document:
//!
//! ```text
//! { "version": 1, "created_at": ..., "backup_type": "DatabaseOnly",
//!   "name": ..., "description": ..., "tables": { "findings": [ {row}, ... ], ... } }
//! ```
//!
//! Rows are exported with `row_to_json` and restored with
//! `json_populate_recordset`, so the document carries no schema of its own.
//! A document that covers every table depending on its own tables is restored
//! by replacement: children are deleted first and parents inserted first. A
//! partial document, such as a configuration backup, is merged instead. Its
//! rows are upserted by `id` and rows it does not mention are kept, so
//! assessments that point at restored frameworks survive.

pub mod progress;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::migrations::{dependents_outside, DATA_TABLES};
pub use progress::{registry, ProgressState, RestoreProgress};

pub const FORMAT_VERSION: u32 = 1;
const FILE_PREFIX: &str = "database_backup_";
const FILE_EXT: &str = ".json";

/// Tables exported by a configuration-only backup.
pub const CONFIGURATION_TABLES: &[&str] = &[
    "risk_matrices",
    "risk_matrix_levels",
    "risk_matrix_cells",
    "risk_level_settings",
    "compliance_frameworks",
    "compliance_controls",
    "maturity_frameworks",
    "maturity_controls",
    "reference_data",
];

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("invalid backup file name '{0}'")]
    InvalidName(String),

    #[error("invalid backup file: {0}")]
    InvalidFile(String),

    #[error("backup '{0}' not found")]
    NotFound(String),

    #[error("restore conflict: {0}")]
    Conflict(String),
}

/// How a document is written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RestoreMode {
    /// Clear each table, then insert the backed-up rows
    Replace,
    /// Upsert the backed-up rows by id, keeping everything else
    Merge,
}

impl RestoreMode {
    /// `Merge` when rows outside `tables` may reference rows inside it.
    pub fn for_tables(tables: &[&str]) -> Self {
        if dependents_outside(tables).is_empty() {
            Self::Replace
        } else {
            Self::Merge
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackupType {
    /// Every data table except user accounts
    #[default]
    DatabaseOnly,
    /// Every data table, user accounts included
    FullBackup,
    /// Matrices, settings, frameworks and reference data
    ConfigurationOnly,
}

impl BackupType {
    pub fn tables(&self) -> Vec<&'static str> {
        match self {
            Self::DatabaseOnly => DATA_TABLES.iter().copied().filter(|t| *t != "users").collect(),
            Self::FullBackup => DATA_TABLES.to_vec(),
            Self::ConfigurationOnly => DATA_TABLES
                .iter()
                .copied()
                .filter(|t| CONFIGURATION_TABLES.contains(t))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupDocument {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub backup_type: BackupType,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    pub tables: BTreeMap<String, Vec<Value>>,
}

impl BackupDocument {
    /// Check version and table names; returns the tables in restore order.
    pub fn validate(&self) -> Result<Vec<&'static str>, BackupError> {
        if self.version == 0 || self.version > FORMAT_VERSION {
            return Err(BackupError::InvalidFile(format!(
                "unsupported format version {}",
                self.version
            )));
        }
        if let Some(unknown) = self.tables.keys().find(|t| !DATA_TABLES.contains(&t.as_str())) {
            return Err(BackupError::InvalidFile(format!("unknown table '{}'", unknown)));
        }
        if self.tables.is_empty() {
            return Err(BackupError::InvalidFile("backup contains no tables".into()));
        }
        Ok(DATA_TABLES
            .iter()
            .copied()
            .filter(|t| self.tables.contains_key(*t))
            .collect())
    }

    pub fn row_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, BackupError> {
        let doc: Self = serde_json::from_slice(bytes)
            .map_err(|e| BackupError::InvalidFile(format!("not a backup document: {}", e)))?;
        doc.validate()?;
        Ok(doc)
    }
}

fn insert_sql(table: &str) -> String {
    format!(
        "INSERT INTO {t} SELECT * FROM json_populate_recordset(NULL::{t}, $1::json)",
        t = table
    )
}

/// Insert, overwriting every non-key column of rows whose id already exists.
fn upsert_sql(table: &str, columns: &[String]) -> String {
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| c.as_str() != "id")
        .map(|c| format!("\"{c}\" = EXCLUDED.\"{c}\""))
        .collect();
    if updates.is_empty() {
        return format!("{} ON CONFLICT (id) DO NOTHING", insert_sql(table));
    }
    format!("{} ON CONFLICT (id) DO UPDATE SET {}", insert_sql(table), updates.join(", "))
}

fn row_ids(rows: &[Value]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.get("id").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupResult {
    pub success: bool,
    pub file_name: Option<String>,
    pub size_bytes: Option<u64>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupInfo {
    pub file_name: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Keep `[A-Za-z0-9_-]`; an empty result becomes "backup".
pub fn sanitize_name(name: &str) -> String {
    let clean: String = name
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if clean.is_empty() {
        "backup".to_string()
    } else {
        clean
    }
}

pub fn file_name_for(name: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}{}_{}{}",
        FILE_PREFIX,
        sanitize_name(name),
        at.format("%Y%m%d_%H%M%S"),
        FILE_EXT
    )
}

/// Reject names that could leave the backup directory.
pub fn check_file_name(file_name: &str) -> Result<(), BackupError> {
    let bad = file_name.is_empty()
        || file_name.contains('/')
        || file_name.contains('\\')
        || file_name.contains("..")
        || !file_name.ends_with(FILE_EXT);
    if bad {
        return Err(BackupError::InvalidName(file_name.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct BackupService {
    pool: PgPool,
    dir: PathBuf,
    keep_days: u32,
}

impl BackupService {
    pub fn new(pool: PgPool, dir: PathBuf, keep_days: u32) -> Self {
        Self {
            pool,
            dir,
            keep_days,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, file_name: &str) -> Result<PathBuf, BackupError> {
        check_file_name(file_name)?;
        Ok(self.dir.join(file_name))
    }

    async fn existing(&self, file_name: &str) -> Result<PathBuf, BackupError> {
        let path = self.path_of(file_name)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(BackupError::NotFound(file_name.to_string()));
        }
        Ok(path)
    }

    /// Export the tables of `backup_type` into a new file.
    pub async fn create(
        &self,
        name: &str,
        description: Option<String>,
        backup_type: BackupType,
        actor: &str,
    ) -> Result<BackupResult, BackupError> {
        let now = Utc::now();
        let file_name = file_name_for(name, now);
        tracing::info!(file = %file_name, ?backup_type, "creating backup");

        let mut tables = BTreeMap::new();
        for table in backup_type.tables() {
            let sql = format!(
                "SELECT COALESCE(json_agg(row_to_json(t)), '[]'::json) FROM {} t",
                table
            );
            let rows: Value = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
            let rows = match rows {
                Value::Array(rows) => rows,
                _ => Vec::new(),
            };
            tables.insert(table.to_string(), rows);
        }

        let doc = BackupDocument {
            version: FORMAT_VERSION,
            created_at: now,
            backup_type,
            name: sanitize_name(name),
            description,
            created_by: Some(actor.to_string()),
            tables,
        };

        tokio::fs::create_dir_all(&self.dir).await?;
        let bytes = serde_json::to_vec_pretty(&doc)?;
        let path = self.path_of(&file_name)?;
        tokio::fs::write(&path, &bytes).await?;

        tracing::info!(file = %file_name, rows = doc.row_count(), size = bytes.len(), "backup written");
        Ok(BackupResult {
            success: true,
            file_name: Some(file_name),
            size_bytes: Some(bytes.len() as u64),
            message: format!("Backup '{}' created successfully", doc.name),
        })
    }

    /// Backup files, newest first.
    pub async fn list(&self) -> Result<Vec<BackupInfo>, BackupError> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if check_file_name(&file_name).is_err() {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            out.push(BackupInfo {
                file_name,
                size_bytes: meta.len(),
                created_at: meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now()),
            });
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.file_name.cmp(&a.file_name)));
        Ok(out)
    }

    pub async fn info(&self, file_name: &str) -> Result<BackupInfo, BackupError> {
        let path = self.existing(file_name).await?;
        let meta = tokio::fs::metadata(&path).await?;
        Ok(BackupInfo {
            file_name: file_name.to_string(),
            size_bytes: meta.len(),
            created_at: meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now()),
        })
    }

    pub async fn read(&self, file_name: &str) -> Result<Vec<u8>, BackupError> {
        let path = self.existing(file_name).await?;
        Ok(tokio::fs::read(&path).await?)
    }

    pub async fn delete(&self, file_name: &str) -> Result<(), BackupError> {
        let path = self.existing(file_name).await?;
        tokio::fs::remove_file(&path).await?;
        tracing::info!(file = %file_name, "backup deleted");
        Ok(())
    }

    /// Parse a stored file without restoring it.
    pub async fn validate(&self, file_name: &str) -> Result<BackupResult, BackupError> {
        let bytes = self.read(file_name).await?;
        let result = match BackupDocument::parse(&bytes) {
            Ok(doc) => BackupResult {
                success: true,
                file_name: Some(file_name.to_string()),
                size_bytes: Some(bytes.len() as u64),
                message: format!(
                    "Backup file is valid: {} tables, {} rows",
                    doc.tables.len(),
                    doc.row_count()
                ),
            },
            Err(e) => BackupResult {
                success: false,
                file_name: Some(file_name.to_string()),
                size_bytes: Some(bytes.len() as u64),
                message: e.to_string(),
            },
        };
        Ok(result)
    }

    pub async fn total_size(&self) -> Result<u64, BackupError> {
        Ok(self.list().await?.iter().map(|b| b.size_bytes).sum())
    }

    /// Delete backups older than `keep_days` (the configured value when `None`).
    pub async fn cleanup(&self, keep_days: Option<u32>) -> Result<usize, BackupError> {
        let keep_days = keep_days.unwrap_or(self.keep_days);
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(keep_days));
        let mut removed = 0;
        for backup in self.list().await? {
            if backup.created_at < cutoff {
                tokio::fs::remove_file(self.dir.join(&backup.file_name)).await?;
                removed += 1;
            }
        }
        tracing::info!(removed, keep_days, "backup cleanup");
        Ok(removed)
    }

    /// Store an uploaded file after checking it parses as a backup.
    pub async fn save_upload(&self, file_name: &str, bytes: &[u8]) -> Result<BackupInfo, BackupError> {
        let path = self.path_of(file_name)?;
        BackupDocument::parse(bytes)?;
        if tokio::fs::try_exists(&path).await? {
            return Err(BackupError::InvalidFile(format!("'{}' already exists", file_name)));
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, bytes).await?;
        tracing::info!(file = %file_name, size = bytes.len(), "backup uploaded");
        self.info(file_name).await
    }

    /// Start restoring in the background and return the progress token.
    pub async fn start_restore(&self, file_name: &str) -> Result<Uuid, BackupError> {
        self.existing(file_name).await?;
        let reg = registry();
        let id = reg.start();
        let service = self.clone();
        let file_name = file_name.to_string();
        tokio::spawn(async move {
            match service.restore(&file_name, id).await {
                Ok(rows) => {
                    tracing::info!(file = %file_name, rows, "restore completed");
                    reg.report(
                        id,
                        ProgressState::Completed,
                        "Restore completed",
                        100,
                        Some(format!("{} rows restored", rows)),
                    );
                }
                Err(e) => {
                    tracing::error!(file = %file_name, error = %e, "restore failed");
                    reg.report(id, ProgressState::Failed, "Restore failed", 100, Some(e.to_string()));
                }
            }
        });
        Ok(id)
    }

    /// Replace table contents from a backup file; returns the number of rows restored.
    pub async fn restore(&self, file_name: &str, progress_id: Uuid) -> Result<usize, BackupError> {
        let reg = registry();
        reg.report(progress_id, ProgressState::ValidatingFile, "Validating backup file", 10, None);
        let bytes = self.read(file_name).await?;

        reg.report(progress_id, ProgressState::ExtractingData, "Reading backup data", 20, None);
        let doc = BackupDocument::parse(&bytes)?;
        let order = doc.validate()?;
        tracing::info!(file = %file_name, tables = order.len(), rows = doc.row_count(), "restoring backup");

        let mode = RestoreMode::for_tables(&order);
        tracing::info!(file = %file_name, ?mode, "restore mode");

        let mut tx = self.pool.begin().await?;
        if mode == RestoreMode::Replace {
            reg.report(progress_id, ProgressState::RestoringDatabase, "Clearing existing data", 30, None);
            for table in order.iter().rev() {
                sqlx::query(&format!("DELETE FROM {}", table))
                    .execute(&mut *tx)
                    .await?;
            }
        }

        let total = order.len().max(1);
        for (i, table) in order.iter().enumerate() {
            let rows = doc.tables.get(*table).cloned().unwrap_or_default();
            let percent = 30 + (i * 50 / total) as u8;
            reg.report(
                progress_id,
                ProgressState::RestoringDatabase,
                &format!("Restoring {}", table),
                percent,
                Some(format!("{} rows", rows.len())),
            );
            if rows.is_empty() {
                continue;
            }
            let sql = match mode {
                RestoreMode::Replace => insert_sql(table),
                RestoreMode::Merge => {
                    let columns: Vec<String> = sqlx::query_scalar(
                        "SELECT column_name::text FROM information_schema.columns \
                         WHERE table_schema = current_schema() AND table_name = $1 \
                         ORDER BY ordinal_position",
                    )
                    .bind(*table)
                    .fetch_all(&mut *tx)
                    .await?;
                    upsert_sql(table, &columns)
                }
            };
            sqlx::query(&sql)
                .bind(Value::Array(rows))
                .execute(&mut *tx)
                .await
                .map_err(|e| match e.as_database_error() {
                    Some(db) if db.is_unique_violation() || db.is_foreign_key_violation() => {
                        BackupError::Conflict(format!("{}: {}", table, db.message()))
                    }
                    _ => BackupError::Db(e),
                })?;
        }

        reg.report(progress_id, ProgressState::VerifyingRestore, "Verifying row counts", 85, None);
        let mut restored = 0;
        for table in &order {
            let rows = doc.tables.get(*table).map(Vec::as_slice).unwrap_or_default();
            let expected = rows.len();
            let actual: i64 = match mode {
                RestoreMode::Replace => {
                    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
                        .fetch_one(&mut *tx)
                        .await?
                }
                RestoreMode::Merge => {
                    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {} WHERE id::text = ANY($1)", table))
                        .bind(row_ids(rows))
                        .fetch_one(&mut *tx)
                        .await?
                }
            };
            if actual as usize != expected {
                return Err(BackupError::InvalidFile(format!(
                    "{} has {} rows after restore, expected {}",
                    table, actual, expected
                )));
            }
            restored += expected;
        }
        tx.commit().await?;
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::TempDir;

    fn service(dir: &Path) -> BackupService {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        BackupService::new(pool, dir.to_path_buf(), 30)
    }

    fn doc_bytes(tables: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "version": 1,
            "created_at": "2026-01-02T03:04:05Z",
            "backup_type": "ConfigurationOnly",
            "tables": tables,
        }))
        .unwrap()
    }

    #[test]
    fn file_names() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(
            file_name_for("nightly run/../x", at),
            "database_backup_nightlyrunx_20260304_050607.json"
        );
        assert_eq!(file_name_for("!!!", at), "database_backup_backup_20260304_050607.json");
    }

    #[test]
    fn unsafe_names_rejected() {
        for bad in ["../etc/passwd.json", "a/b.json", "a\\b.json", "x.sql", ""] {
            assert!(matches!(check_file_name(bad), Err(BackupError::InvalidName(_))), "{bad}");
        }
        assert!(check_file_name("database_backup_x_20260101_000000.json").is_ok());
    }

    #[test]
    fn table_sets() {
        assert!(!BackupType::DatabaseOnly.tables().contains(&"users"));
        assert!(BackupType::FullBackup.tables().contains(&"users"));
        let config = BackupType::ConfigurationOnly.tables();
        assert_eq!(config.len(), CONFIGURATION_TABLES.len());
        assert!(!config.contains(&"findings"));
        // dependency order is kept
        let pos = |t| config.iter().position(|x| *x == t).unwrap();
        assert!(pos("risk_matrices") < pos("risk_matrix_cells"));
    }

    #[test]
    fn document_validation() {
        let ok = BackupDocument::parse(&doc_bytes(json!({
            "risk_matrix_cells": [],
            "risk_matrices": [{"id": "x"}],
        })))
        .unwrap();
        assert_eq!(ok.validate().unwrap(), vec!["risk_matrices", "risk_matrix_cells"]);
        assert_eq!(ok.row_count(), 1);

        let unknown = BackupDocument::parse(&doc_bytes(json!({ "pg_authid": [] })));
        assert!(matches!(unknown, Err(BackupError::InvalidFile(_))));

        assert!(BackupDocument::parse(b"not json").is_err());
        assert!(BackupDocument::parse(&doc_bytes(json!({}))).is_err());
    }

    #[test]
    fn restore_modes() {
        assert_eq!(RestoreMode::for_tables(&BackupType::FullBackup.tables()), RestoreMode::Replace);
        assert_eq!(RestoreMode::for_tables(&BackupType::DatabaseOnly.tables()), RestoreMode::Replace);
        assert_eq!(
            RestoreMode::for_tables(&BackupType::ConfigurationOnly.tables()),
            RestoreMode::Merge
        );
    }

    #[test]
    fn upsert_overwrites_non_key_columns() {
        let columns = vec!["id".to_string(), "name".to_string(), "function".to_string()];
        let sql = upsert_sql("maturity_controls", &columns);
        assert!(sql.starts_with("INSERT INTO maturity_controls SELECT * FROM json_populate_recordset"));
        assert!(sql.ends_with(r#"ON CONFLICT (id) DO UPDATE SET "name" = EXCLUDED."name", "function" = EXCLUDED."function""#));
        assert!(upsert_sql("t", &["id".to_string()]).ends_with("DO NOTHING"));
    }

    #[test]
    fn ids_of_rows() {
        let rows = vec![json!({"id": "a"}), json!({"name": "no id"}), json!({"id": "b"})];
        assert_eq!(row_ids(&rows), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn upload_list_delete() {
        let dir = TempDir::new().unwrap();
        let svc = service(dir.path());
        assert!(svc.list().await.unwrap().is_empty());

        let bytes = doc_bytes(json!({ "reference_data": [] }));
        let info = svc.save_upload("uploaded.json", &bytes).await.unwrap();
        assert_eq!(info.size_bytes, bytes.len() as u64);
        assert!(svc.save_upload("uploaded.json", &bytes).await.is_err());
        assert!(svc.save_upload("bad.json", b"{}").await.is_err());

        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let listed = svc.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(svc.total_size().await.unwrap(), bytes.len() as u64);
        assert!(svc.validate("uploaded.json").await.unwrap().success);

        svc.delete("uploaded.json").await.unwrap();
        assert!(matches!(
            svc.delete("uploaded.json").await,
            Err(BackupError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn cleanup_keeps_recent_files() {
        let dir = TempDir::new().unwrap();
        let svc = service(dir.path());
        svc.save_upload("recent.json", &doc_bytes(json!({ "reference_data": [] })))
            .await
            .unwrap();
        assert_eq!(svc.cleanup(None).await.unwrap(), 0);
        assert_eq!(svc.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn configuration_backup_round_trip() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = crate::db::create_pool(&url).await.unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        let dir = TempDir::new().unwrap();
        let svc = BackupService::new(pool, dir.path().to_path_buf(), 30);

        let result = svc
            .create("roundtrip", None, BackupType::ConfigurationOnly, "tester")
            .await
            .unwrap();
        let file = result.file_name.unwrap();
        assert!(svc.validate(&file).await.unwrap().success);

        let id = registry().start();
        svc.restore(&file, id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn configuration_restore_keeps_assessments() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = crate::db::create_pool(&url).await.unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        let tag = Uuid::new_v4().simple().to_string();

        let framework: Uuid = sqlx::query_scalar(
            "INSERT INTO compliance_frameworks (name, version, framework_type) \
             VALUES ($1, '1', 'Custom') RETURNING id",
        )
        .bind(format!("fw-{}", tag))
        .fetch_one(&pool)
        .await
        .unwrap();
        let control: Uuid = sqlx::query_scalar(
            "INSERT INTO compliance_controls (framework_id, control_id, title) \
             VALUES ($1, 'C-1', 'Control') RETURNING id",
        )
        .bind(framework)
        .fetch_one(&pool)
        .await
        .unwrap();
        let org: Uuid = sqlx::query_scalar("INSERT INTO business_organizations (name) VALUES ($1) RETURNING id")
            .bind(format!("org-{}", tag))
            .fetch_one(&pool)
            .await
            .unwrap();
        let assessment: Uuid = sqlx::query_scalar(
            "INSERT INTO compliance_assessments (title, assessor, framework_id, organization_id) \
             VALUES ('A', 'tester', $1, $2) RETURNING id",
        )
        .bind(framework)
        .bind(org)
        .fetch_one(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO control_assessments (compliance_assessment_id, control_id) VALUES ($1, $2)")
            .bind(assessment)
            .bind(control)
            .execute(&pool)
            .await
            .unwrap();

        let dir = TempDir::new().unwrap();
        let svc = BackupService::new(pool.clone(), dir.path().to_path_buf(), 30);
        let file = svc
            .create("config", None, BackupType::ConfigurationOnly, "tester")
            .await
            .unwrap()
            .file_name
            .unwrap();

        sqlx::query("UPDATE compliance_frameworks SET description = 'edited' WHERE id = $1")
            .bind(framework)
            .execute(&pool)
            .await
            .unwrap();

        let id = registry().start();
        svc.restore(&file, id).await.unwrap();

        let assessments: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM compliance_assessments WHERE id = $1")
                .bind(assessment)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(assessments, 1);
        let controls: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM control_assessments WHERE compliance_assessment_id = $1")
                .bind(assessment)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(controls, 1);
        let description: Option<String> =
            sqlx::query_scalar("SELECT description FROM compliance_frameworks WHERE id = $1")
                .bind(framework)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(description, None);
    }
}
