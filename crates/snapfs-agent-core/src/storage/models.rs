/// Logical content identified by (algo, hash, size).
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub id: i64,
    pub algo: String,
    pub hash: String,
    pub size: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// A filesystem inode identified by (dev, inode). Identity is absent for
/// files reported without device/inode numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalFile {
    pub id: i64,
    pub dev: Option<i64>,
    pub inode: Option<i64>,
    pub content_id: Option<i64>,
    pub nlinks: i64,
    pub size_bytes: i64,
    pub disk_usage: i64,
    pub mtime: f64,
    pub atime: f64,
    pub ctime: f64,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub uid: Option<i64>,
    pub gid: Option<i64>,
    pub mode: Option<i64>,
    pub file_type: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Namespace binding `full_path -> file`.
#[derive(Debug, Clone, PartialEq)]
pub struct PathEntry {
    pub id: i64,
    pub file_id: i64,
    pub full_path: String,
    pub full_path_hash: String,
    pub dir: String,
    pub name: String,
    pub ext: Option<String>,
    pub is_deleted: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// A labeled scan run. Never modified after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: i64,
    pub root_path: String,
    pub label: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotMembership {
    pub id: i64,
    pub snapshot_id: i64,
    pub file_id: i64,
    pub path_id: i64,
    pub size_bytes: i64,
    pub created_at: String,
}

/// One row of the read-only `file_cache` view.
#[derive(Debug, Clone, PartialEq)]
pub struct FileCacheRow {
    pub path: String,
    pub algo: String,
    pub hash: String,
    pub size: i64,
    pub mtime: f64,
    pub dev: Option<i64>,
    pub inode: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityCounts {
    pub content: i64,
    pub physical_files: i64,
    pub paths: i64,
    pub live_paths: i64,
    pub snapshots: i64,
    pub snapshot_files: i64,
}

// ── Write-side inputs ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentKey {
    pub algo: String,
    pub hash: String,
    pub size: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
    pub dev: i64,
    pub inode: i64,
}

/// Mutable physical-file metadata. `None` means "not reported": the stored
/// value is kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileMetadata {
    pub nlinks: Option<i64>,
    pub size_bytes: Option<i64>,
    pub disk_usage: Option<i64>,
    pub mtime: Option<f64>,
    pub atime: Option<f64>,
    pub ctime: Option<f64>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub uid: Option<i64>,
    pub gid: Option<i64>,
    pub mode: Option<i64>,
    pub file_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathBinding {
    pub full_path: String,
    pub dir: String,
    pub name: String,
    pub ext: Option<String>,
    pub is_deleted: bool,
}
