use super::models::*;
use super::sqlite::Database;
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use tracing::debug;

const CONTENT_COLUMNS: &str = "id, algo, hash, size, created_at, updated_at";

const FILE_COLUMNS: &str = "id, dev, inode, content_id, nlinks, size_bytes, disk_usage, \
     mtime, atime, ctime, owner, \"group\", uid, gid, mode, type, created_at, updated_at";

const PATH_COLUMNS: &str =
    "id, file_id, full_path, full_path_hash, dir, name, ext, is_deleted, created_at, updated_at";

const MEMBERSHIP_COLUMNS: &str =
    "id, snapshot_id, file_id, path_id, size_bytes, created_at";

pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// BLAKE3 hex digest of the full path. Unique key of the `paths` table.
pub fn path_hash(full_path: &str) -> String {
    blake3::hash(full_path.as_bytes()).to_hex().to_string()
}

fn content_from_row(row: &Row) -> Result<Content> {
    Ok(Content {
        id: row.get(0)?,
        algo: row.get(1)?,
        hash: row.get(2)?,
        size: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn file_from_row(row: &Row) -> Result<PhysicalFile> {
    Ok(PhysicalFile {
        id: row.get(0)?,
        dev: row.get(1)?,
        inode: row.get(2)?,
        content_id: row.get(3)?,
        nlinks: row.get(4)?,
        size_bytes: row.get(5)?,
        disk_usage: row.get(6)?,
        mtime: row.get(7)?,
        atime: row.get(8)?,
        ctime: row.get(9)?,
        owner: row.get(10)?,
        group: row.get(11)?,
        uid: row.get(12)?,
        gid: row.get(13)?,
        mode: row.get(14)?,
        file_type: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

fn path_from_row(row: &Row) -> Result<PathEntry> {
    Ok(PathEntry {
        id: row.get(0)?,
        file_id: row.get(1)?,
        full_path: row.get(2)?,
        full_path_hash: row.get(3)?,
        dir: row.get(4)?,
        name: row.get(5)?,
        ext: row.get(6)?,
        is_deleted: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn membership_from_row(row: &Row) -> Result<SnapshotMembership> {
    Ok(SnapshotMembership {
        id: row.get(0)?,
        snapshot_id: row.get(1)?,
        file_id: row.get(2)?,
        path_id: row.get(3)?,
        size_bytes: row.get(4)?,
        created_at: row.get(5)?,
    })
}

// ── Lookups shared by the unit of work and read paths ────────

pub(crate) fn find_content(conn: &Connection, key: &ContentKey) -> Result<Option<Content>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM content WHERE algo = ?1 AND hash = ?2 AND size = ?3",
            CONTENT_COLUMNS
        ),
        params![key.algo, key.hash, key.size],
        content_from_row,
    )
    .optional()
}

pub(crate) fn find_file_by_identity(
    conn: &Connection,
    identity: FileIdentity,
) -> Result<Option<PhysicalFile>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM physical_files WHERE dev = ?1 AND inode = ?2",
            FILE_COLUMNS
        ),
        params![identity.dev, identity.inode],
        file_from_row,
    )
    .optional()
}

pub(crate) fn find_file_by_id(conn: &Connection, id: i64) -> Result<Option<PhysicalFile>> {
    conn.query_row(
        &format!("SELECT {} FROM physical_files WHERE id = ?1", FILE_COLUMNS),
        params![id],
        file_from_row,
    )
    .optional()
}

pub(crate) fn find_path(conn: &Connection, full_path: &str) -> Result<Option<PathEntry>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM paths WHERE full_path_hash = ?1 AND full_path = ?2",
            PATH_COLUMNS
        ),
        params![path_hash(full_path), full_path],
        path_from_row,
    )
    .optional()
}

pub(crate) fn find_membership(
    conn: &Connection,
    snapshot_id: i64,
    path_id: i64,
) -> Result<Option<SnapshotMembership>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM snapshot_files WHERE snapshot_id = ?1 AND path_id = ?2",
            MEMBERSHIP_COLUMNS
        ),
        params![snapshot_id, path_id],
        membership_from_row,
    )
    .optional()
}

impl Database {
    // ── Snapshots ────────────────────────────────────────────────

    pub fn create_snapshot(&self, root_path: &str, label: Option<&str>) -> Result<Snapshot> {
        let created_at = now();
        self.connection().execute(
            "INSERT INTO snapshots (root_path, label, created_at) VALUES (?1, ?2, ?3)",
            params![root_path, label, created_at],
        )?;
        let id = self.connection().last_insert_rowid();
        debug!("Created snapshot {} for root {}", id, root_path);
        Ok(Snapshot {
            id,
            root_path: root_path.to_string(),
            label: label.map(str::to_string),
            created_at,
        })
    }

    pub fn get_snapshot(&self, id: i64) -> Result<Option<Snapshot>> {
        self.connection()
            .query_row(
                "SELECT id, root_path, label, created_at FROM snapshots WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Snapshot {
                        id: row.get(0)?,
                        root_path: row.get(1)?,
                        label: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
    }

    pub fn get_snapshot_members(&self, snapshot_id: i64) -> Result<Vec<SnapshotMembership>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM snapshot_files WHERE snapshot_id = ?1 ORDER BY id",
            MEMBERSHIP_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![snapshot_id], membership_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Entity lookups ───────────────────────────────────────────

    pub fn find_content(&self, key: &ContentKey) -> Result<Option<Content>> {
        find_content(self.connection(), key)
    }

    pub fn find_physical_file(&self, dev: i64, inode: i64) -> Result<Option<PhysicalFile>> {
        find_file_by_identity(self.connection(), FileIdentity { dev, inode })
    }

    pub fn get_physical_file(&self, id: i64) -> Result<Option<PhysicalFile>> {
        find_file_by_id(self.connection(), id)
    }

    pub fn find_path_entry(&self, full_path: &str) -> Result<Option<PathEntry>> {
        find_path(self.connection(), full_path)
    }

    /// Delete a physical file by identity. Its paths and snapshot memberships
    /// go with it via ON DELETE CASCADE.
    pub fn delete_physical_file(&self, dev: i64, inode: i64) -> Result<bool> {
        let deleted = self.connection().execute(
            "DELETE FROM physical_files WHERE dev = ?1 AND inode = ?2",
            params![dev, inode],
        )?;
        debug!("Deleted {} physical file(s) for dev={} inode={}", deleted, dev, inode);
        Ok(deleted > 0)
    }

    // ── Read-side view ───────────────────────────────────────────

    /// Look up a live path in the `file_cache` view.
    pub fn lookup_cached(&self, path: &str) -> Result<Option<FileCacheRow>> {
        self.connection()
            .query_row(
                "SELECT path, algo, hash, size, mtime, dev, inode FROM file_cache WHERE path = ?1",
                params![path],
                |row| {
                    Ok(FileCacheRow {
                        path: row.get(0)?,
                        algo: row.get(1)?,
                        hash: row.get(2)?,
                        size: row.get(3)?,
                        mtime: row.get(4)?,
                        dev: row.get(5)?,
                        inode: row.get(6)?,
                    })
                },
            )
            .optional()
    }

    pub fn entity_counts(&self) -> Result<EntityCounts> {
        self.connection().query_row(
            "SELECT \
                (SELECT COUNT(*) FROM content), \
                (SELECT COUNT(*) FROM physical_files), \
                (SELECT COUNT(*) FROM paths), \
                (SELECT COUNT(*) FROM paths WHERE is_deleted = 0), \
                (SELECT COUNT(*) FROM snapshots), \
                (SELECT COUNT(*) FROM snapshot_files)",
            [],
            |row| {
                Ok(EntityCounts {
                    content: row.get(0)?,
                    physical_files: row.get(1)?,
                    paths: row.get(2)?,
                    live_paths: row.get(3)?,
                    snapshots: row.get(4)?,
                    snapshot_files: row.get(5)?,
                })
            },
        )
    }
}
