//! Get-or-create and upsert operations scoped to one transaction.
//!
//! Every get-or-create reads first and inserts on a miss. A unique-constraint
//! violation on insert means a concurrent writer created the row first, so
//! the row is re-read instead of failing the transaction.

use super::models::*;
use super::queries::{
    find_content, find_file_by_id, find_file_by_identity, find_membership, find_path, now,
    path_hash,
};
use rusqlite::{ffi, params, ErrorCode, Result, Transaction};
use tracing::{debug, trace};

pub struct UnitOfWork<'a> {
    tx: Transaction<'a>,
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && (e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

fn get_or_insert<T>(
    lookup: impl Fn() -> Result<Option<T>>,
    insert: impl FnOnce() -> Result<()>,
) -> Result<T> {
    if let Some(existing) = lookup()? {
        return Ok(existing);
    }
    match insert() {
        Ok(()) => lookup()?.ok_or(rusqlite::Error::QueryReturnedNoRows),
        Err(err) if is_unique_violation(&err) => {
            debug!("Lost insert race ({}), re-reading existing row", err);
            match lookup()? {
                Some(existing) => Ok(existing),
                None => Err(err),
            }
        }
        Err(err) => Err(err),
    }
}

impl<'a> UnitOfWork<'a> {
    pub fn new(tx: Transaction<'a>) -> Self {
        Self { tx }
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit()
    }

    pub fn rollback(self) -> Result<()> {
        self.tx.rollback()
    }

    pub fn find_path_entry(&self, full_path: &str) -> Result<Option<PathEntry>> {
        find_path(&self.tx, full_path)
    }

    /// Resolve content by (algo, hash, size), creating it on first sight.
    /// Re-observation only touches `updated_at`.
    pub fn get_or_create_content(&self, key: &ContentKey) -> Result<Content> {
        let content = get_or_insert(
            || find_content(&self.tx, key),
            || {
                let ts = now();
                self.tx
                    .execute(
                        "INSERT INTO content (algo, hash, size, created_at, updated_at) \
                         VALUES (?1, ?2, ?3, ?4, ?4)",
                        params![key.algo, key.hash, key.size, ts],
                    )
                    .map(|_| ())
            },
        )?;
        self.tx.execute(
            "UPDATE content SET updated_at = ?1 WHERE id = ?2",
            params![now(), content.id],
        )?;
        Ok(content)
    }

    /// Resolve a physical file by identity, creating it on first sight.
    pub fn get_or_create_file(&self, identity: FileIdentity) -> Result<PhysicalFile> {
        get_or_insert(
            || find_file_by_identity(&self.tx, identity),
            || {
                let ts = now();
                self.tx
                    .execute(
                        "INSERT INTO physical_files (dev, inode, created_at, updated_at) \
                         VALUES (?1, ?2, ?3, ?3)",
                        params![identity.dev, identity.inode, ts],
                    )
                    .map(|_| ())
            },
        )
    }

    /// Insert a physical file without device/inode identity.
    pub fn create_anonymous_file(&self) -> Result<PhysicalFile> {
        let ts = now();
        self.tx.execute(
            "INSERT INTO physical_files (created_at, updated_at) VALUES (?1, ?1)",
            params![ts],
        )?;
        let id = self.tx.last_insert_rowid();
        find_file_by_id(&self.tx, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_file(&self, id: i64) -> Result<Option<PhysicalFile>> {
        find_file_by_id(&self.tx, id)
    }

    /// Point the file at `content_id` and overwrite the metadata fields that
    /// are present. Absent fields keep their stored value.
    pub fn update_file(
        &self,
        file_id: i64,
        content_id: Option<i64>,
        meta: &FileMetadata,
    ) -> Result<PhysicalFile> {
        self.tx.execute(
            "UPDATE physical_files SET \
                 content_id = ?1, \
                 nlinks = COALESCE(?2, nlinks), \
                 size_bytes = COALESCE(?3, size_bytes), \
                 disk_usage = COALESCE(?4, disk_usage), \
                 mtime = COALESCE(?5, mtime), \
                 atime = COALESCE(?6, atime), \
                 ctime = COALESCE(?7, ctime), \
                 owner = COALESCE(?8, owner), \
                 \"group\" = COALESCE(?9, \"group\"), \
                 uid = COALESCE(?10, uid), \
                 gid = COALESCE(?11, gid), \
                 mode = COALESCE(?12, mode), \
                 type = COALESCE(?13, type), \
                 updated_at = ?14 \
             WHERE id = ?15",
            params![
                content_id,
                meta.nlinks,
                meta.size_bytes,
                meta.disk_usage,
                meta.mtime,
                meta.atime,
                meta.ctime,
                meta.owner,
                meta.group,
                meta.uid,
                meta.gid,
                meta.mode,
                meta.file_type,
                now(),
                file_id,
            ],
        )?;
        trace!("Updated physical file {}", file_id);
        find_file_by_id(&self.tx, file_id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    /// Bind `binding.full_path` to `file_id`, creating the path entry on first
    /// sight and overwriting its derived fields on every call.
    pub fn upsert_path_entry(&self, binding: &PathBinding, file_id: i64) -> Result<PathEntry> {
        let entry = get_or_insert(
            || find_path(&self.tx, &binding.full_path),
            || {
                let ts = now();
                self.tx
                    .execute(
                        "INSERT INTO paths \
                         (file_id, full_path, full_path_hash, dir, name, ext, is_deleted, \
                          created_at, updated_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                        params![
                            file_id,
                            binding.full_path,
                            path_hash(&binding.full_path),
                            binding.dir,
                            binding.name,
                            binding.ext,
                            binding.is_deleted,
                            ts,
                        ],
                    )
                    .map(|_| ())
            },
        )?;

        self.tx.execute(
            "UPDATE paths SET file_id = ?1, dir = ?2, name = ?3, ext = ?4, is_deleted = ?5, \
             updated_at = ?6 WHERE id = ?7",
            params![
                file_id,
                binding.dir,
                binding.name,
                binding.ext,
                binding.is_deleted,
                now(),
                entry.id,
            ],
        )?;
        find_path(&self.tx, &binding.full_path)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    /// Record `path_id` as a member of `snapshot_id`. Repeats overwrite
    /// `size_bytes` and the file reference.
    pub fn upsert_snapshot_membership(
        &self,
        snapshot_id: i64,
        file_id: i64,
        path_id: i64,
        size_bytes: i64,
    ) -> Result<SnapshotMembership> {
        let member = get_or_insert(
            || find_membership(&self.tx, snapshot_id, path_id),
            || {
                self.tx
                    .execute(
                        "INSERT INTO snapshot_files \
                         (snapshot_id, file_id, path_id, size_bytes, created_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![snapshot_id, file_id, path_id, size_bytes, now()],
                    )
                    .map(|_| ())
            },
        )?;
        self.tx.execute(
            "UPDATE snapshot_files SET file_id = ?1, size_bytes = ?2 WHERE id = ?3",
            params![file_id, size_bytes, member.id],
        )?;
        Ok(SnapshotMembership {
            file_id,
            size_bytes,
            ..member
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    #[test]
    fn test_unique_violation_detection() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        conn.execute(
            "INSERT INTO content (algo, hash, size, created_at, updated_at) \
             VALUES ('sha256', 'H', 1, 'x', 'x')",
            [],
        )
        .unwrap();
        let err = conn
            .execute(
                "INSERT INTO content (algo, hash, size, created_at, updated_at) \
                 VALUES ('sha256', 'H', 1, 'x', 'x')",
                [],
            )
            .unwrap_err();
        assert!(is_unique_violation(&err));

        let fk_err = conn
            .execute(
                "INSERT INTO paths (file_id, full_path, full_path_hash, dir, name, created_at, updated_at) \
                 VALUES (999, '/a', 'h', '/', 'a', 'x', 'x')",
                [],
            )
            .unwrap_err();
        assert!(!is_unique_violation(&fk_err));
    }

    #[test]
    fn test_get_or_insert_rereads_after_lost_race() {
        let db = Database::open_in_memory().unwrap();
        let uow = UnitOfWork::new(db.begin().unwrap());
        let key = ContentKey {
            algo: "sha256".to_string(),
            hash: "H".to_string(),
            size: 10,
        };

        // The lookup misses once, then the "concurrent" insert below makes
        // the real insert hit the unique constraint.
        let misses = std::cell::Cell::new(1);
        let content = get_or_insert(
            || {
                if misses.get() > 0 {
                    misses.set(misses.get() - 1);
                    uow.tx
                        .execute(
                            "INSERT INTO content (algo, hash, size, created_at, updated_at) \
                             VALUES ('sha256', 'H', 10, 'x', 'x')",
                            [],
                        )
                        .unwrap();
                    return Ok(None);
                }
                find_content(&uow.tx, &key)
            },
            || {
                uow.tx
                    .execute(
                        "INSERT INTO content (algo, hash, size, created_at, updated_at) \
                         VALUES ('sha256', 'H', 10, 'y', 'y')",
                        [],
                    )
                    .map(|_| ())
            },
        )
        .unwrap();
        assert_eq!(content.created_at, "x");
        uow.commit().unwrap();

        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM content", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
