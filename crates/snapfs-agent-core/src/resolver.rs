//! Maps decoded events onto normalized entity mutations.
//!
//! [`resolve`] is pure: it validates the event and derives every value the
//! store needs. [`apply_event`] then issues the get-or-create/upsert requests
//! against one [`UnitOfWork`], in dependency order
//! content → physical file → path → snapshot membership.

use crate::error::Error;
use crate::event::{EventRecord, FileData};
use crate::storage::models::{ContentKey, FileIdentity, FileMetadata, PathBinding};
use crate::storage::UnitOfWork;

/// Everything needed to store one `file.upsert` event.
#[derive(Debug, Clone, PartialEq)]
pub struct FileMutation {
    /// Present only when algo, hash and size were all reported.
    pub content: Option<ContentKey>,
    pub identity: Option<FileIdentity>,
    pub metadata: FileMetadata,
    pub path: PathBinding,
    /// Size attributed to snapshot membership.
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedFile {
    pub content_id: Option<i64>,
    pub file_id: i64,
    pub path_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Applied(AppliedFile),
    /// Event kind this agent does not handle.
    Ignored,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Device and inode numbers are unsigned 64-bit, SQLite integers are
/// signed. Stored by bit pattern so values above `i64::MAX` stay distinct.
fn storage_id(value: u64) -> i64 {
    value as i64
}

/// Split a path at its last `/` into `(dir, name)`. Paths without a `/`,
/// and paths directly under the root, get `dir = "/"`. A backslash is an
/// ordinary name character.
pub fn split_path(path: &str) -> (String, String) {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return ("/".to_string(), String::new());
    }
    match trimmed.rfind('/') {
        Some(0) | None => ("/".to_string(), trimmed.trim_start_matches('/').to_string()),
        Some(idx) => (trimmed[..idx].to_string(), trimmed[idx + 1..].to_string()),
    }
}

/// Text after the last `.` of `name`, if any.
pub fn extension_of(name: &str) -> Option<String> {
    name.rfind('.')
        .map(|idx| &name[idx + 1..])
        .filter(|ext| !ext.is_empty())
        .map(str::to_string)
}

/// Validate a `file.upsert` payload and derive its mutations.
pub fn resolve(data: &FileData) -> Result<FileMutation, Error> {
    let full_path = non_empty(&data.path)
        .ok_or_else(|| Error::InvalidEvent("event has no path".to_string()))?
        .to_string();

    let (derived_dir, derived_name) = split_path(&full_path);
    let dir = non_empty(&data.dir).map(str::to_string).unwrap_or(derived_dir);
    let name = non_empty(&data.name).map(str::to_string).unwrap_or(derived_name);
    let ext = non_empty(&data.ext)
        .map(str::to_string)
        .or_else(|| extension_of(&name));

    let content = match (non_empty(&data.algo), non_empty(&data.hash), data.size) {
        (Some(algo), Some(hash), Some(size)) => Some(ContentKey {
            algo: algo.to_string(),
            hash: hash.to_string(),
            size,
        }),
        _ => None,
    };

    let identity = match (data.dev, data.inode) {
        (Some(dev), Some(inode)) => Some(FileIdentity {
            dev: storage_id(dev),
            inode: storage_id(inode),
        }),
        _ => None,
    };

    Ok(FileMutation {
        content,
        identity,
        metadata: FileMetadata {
            nlinks: data.nlinks,
            size_bytes: data.size,
            disk_usage: data.fsize_du,
            mtime: data.mtime,
            atime: data.atime,
            ctime: data.ctime,
            owner: data.owner.clone(),
            group: data.group.clone(),
            uid: data.uid,
            gid: data.gid,
            mode: data.mode,
            file_type: data.file_type.clone(),
        },
        path: PathBinding {
            full_path,
            dir,
            name,
            ext,
            is_deleted: data.is_deleted.unwrap_or(false),
        },
        size_bytes: data.size.unwrap_or(0),
    })
}

/// Store a resolved mutation inside `uow`. Nothing is committed here.
pub fn apply_mutation(
    uow: &UnitOfWork<'_>,
    mutation: &FileMutation,
    snapshot_id: Option<i64>,
) -> Result<AppliedFile, Error> {
    let content_id = match &mutation.content {
        Some(key) => Some(uow.get_or_create_content(key)?.id),
        None => None,
    };

    let file = match mutation.identity {
        Some(identity) => uow.get_or_create_file(identity)?,
        None => {
            // No inode identity: keep whatever file the path already points at.
            let bound = match uow.find_path_entry(&mutation.path.full_path)? {
                Some(entry) => uow.get_file(entry.file_id)?,
                None => None,
            };
            match bound {
                Some(file) => file,
                None => uow.create_anonymous_file()?,
            }
        }
    };
    let file = uow.update_file(file.id, content_id, &mutation.metadata)?;

    let path = uow.upsert_path_entry(&mutation.path, file.id)?;

    if let Some(snapshot_id) = snapshot_id {
        if !mutation.path.is_deleted {
            uow.upsert_snapshot_membership(snapshot_id, file.id, path.id, mutation.size_bytes)?;
        }
    }

    Ok(AppliedFile {
        content_id,
        file_id: file.id,
        path_id: path.id,
    })
}

/// Resolve and apply one event. Unknown kinds are a no-op; a missing path
/// yields [`Error::InvalidEvent`] before anything is written.
pub fn apply_event(
    uow: &UnitOfWork<'_>,
    event: &EventRecord,
    snapshot_id: Option<i64>,
) -> Result<Resolution, Error> {
    match event {
        EventRecord::FileUpsert { data } => {
            let data = data
                .as_ref()
                .ok_or_else(|| Error::InvalidEvent("event has no data".to_string()))?;
            let mutation = resolve(data)?;
            apply_mutation(uow, &mutation, snapshot_id).map(Resolution::Applied)
        }
        EventRecord::Ignored => Ok(Resolution::Ignored),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    fn file_data(path: &str) -> FileData {
        FileData {
            path: Some(path.to_string()),
            ..FileData::default()
        }
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("/a/b.txt"), ("/a".to_string(), "b.txt".to_string()));
        assert_eq!(split_path("/b.txt"), ("/".to_string(), "b.txt".to_string()));
        assert_eq!(split_path("b.txt"), ("/".to_string(), "b.txt".to_string()));
        assert_eq!(split_path("/a/b/"), ("/a".to_string(), "b".to_string()));
        assert_eq!(
            split_path(r"/data/a\b.txt"),
            ("/data".to_string(), r"a\b.txt".to_string())
        );
        assert_eq!(
            split_path(r"C:\report.pdf"),
            ("/".to_string(), r"C:\report.pdf".to_string())
        );
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("b.txt"), Some("txt".to_string()));
        assert_eq!(extension_of("archive.tar.gz"), Some("gz".to_string()));
        assert_eq!(extension_of("Makefile"), None);
        assert_eq!(extension_of("trailing."), None);
    }

    #[test]
    fn test_resolve_derives_and_defaults() {
        let mut data = file_data("/a/b.txt");
        data.size = Some(10);
        data.algo = Some("sha256".to_string());
        data.hash = Some("H".to_string());
        data.dev = Some(1);
        data.inode = Some(2);

        let m = resolve(&data).unwrap();
        assert_eq!(m.path.dir, "/a");
        assert_eq!(m.path.name, "b.txt");
        assert_eq!(m.path.ext.as_deref(), Some("txt"));
        assert!(!m.path.is_deleted);
        assert_eq!(m.identity, Some(FileIdentity { dev: 1, inode: 2 }));
        assert_eq!(
            m.content,
            Some(ContentKey {
                algo: "sha256".to_string(),
                hash: "H".to_string(),
                size: 10
            })
        );
        assert_eq!(m.size_bytes, 10);
        // Unknown stays unknown.
        assert_eq!(m.metadata.uid, None);
        assert_eq!(m.metadata.owner, None);
    }

    #[test]
    fn test_resolve_keeps_identities_above_i64_max() {
        let mut data = file_data("/big");
        data.dev = Some(u64::MAX);
        data.inode = Some(1 << 63);
        let identity = resolve(&data).unwrap().identity.unwrap();
        assert_eq!(identity.dev, -1);
        assert_eq!(identity.inode, i64::MIN);

        data.inode = Some((1 << 63) + 1);
        assert_ne!(resolve(&data).unwrap().identity.unwrap(), identity);
    }

    #[test]
    fn test_resolve_explicit_values_win() {
        let mut data = file_data("/a/b.txt");
        data.dir = Some("/elsewhere".to_string());
        data.name = Some("renamed.md".to_string());
        let m = resolve(&data).unwrap();
        assert_eq!(m.path.dir, "/elsewhere");
        assert_eq!(m.path.name, "renamed.md");
        assert_eq!(m.path.ext.as_deref(), Some("md"));

        data.ext = Some("txt".to_string());
        assert_eq!(resolve(&data).unwrap().path.ext.as_deref(), Some("txt"));
    }

    #[test]
    fn test_resolve_requires_full_content_key() {
        let mut data = file_data("/x");
        data.algo = Some("sha256".to_string());
        data.hash = Some("H".to_string());
        assert_eq!(resolve(&data).unwrap().content, None);
        assert_eq!(resolve(&data).unwrap().size_bytes, 0);
    }

    #[test]
    fn test_resolve_rejects_missing_path() {
        assert!(matches!(resolve(&FileData::default()), Err(Error::InvalidEvent(_))));
        assert!(matches!(resolve(&file_data("")), Err(Error::InvalidEvent(_))));
    }

    #[test]
    fn test_apply_event_partial_update_keeps_stored_values() {
        let db = Database::open_in_memory().unwrap();
        let mut first = file_data("/a/b.txt");
        first.dev = Some(1);
        first.inode = Some(1);
        first.mtime = Some(100.0);
        first.owner = Some("alice".to_string());
        first.uid = Some(1000);

        let uow = UnitOfWork::new(db.begin().unwrap());
        apply_event(&uow, &EventRecord::upsert(first), None).unwrap();
        uow.commit().unwrap();

        let mut second = file_data("/a/b.txt");
        second.dev = Some(1);
        second.inode = Some(1);
        second.mtime = Some(200.0);

        let uow = UnitOfWork::new(db.begin().unwrap());
        apply_event(&uow, &EventRecord::upsert(second), None).unwrap();
        uow.commit().unwrap();

        let file = db.find_physical_file(1, 1).unwrap().unwrap();
        assert_eq!(file.mtime, 200.0);
        assert_eq!(file.owner.as_deref(), Some("alice"));
        assert_eq!(file.uid, Some(1000));
        assert_eq!(file.nlinks, 1);
    }

    #[test]
    fn test_apply_event_without_identity_reuses_bound_file() {
        let db = Database::open_in_memory().unwrap();
        for mtime in [1.0, 2.0] {
            let mut data = file_data("/tmp/anon");
            data.mtime = Some(mtime);
            let uow = UnitOfWork::new(db.begin().unwrap());
            apply_event(&uow, &EventRecord::upsert(data), None).unwrap();
            uow.commit().unwrap();
        }
        let counts = db.entity_counts().unwrap();
        assert_eq!(counts.physical_files, 1);
        assert_eq!(counts.paths, 1);
        let entry = db.find_path_entry("/tmp/anon").unwrap().unwrap();
        let file = db.get_physical_file(entry.file_id).unwrap().unwrap();
        assert_eq!(file.dev, None);
        assert_eq!(file.mtime, 2.0);
    }

    #[test]
    fn test_apply_event_ignores_other_kinds() {
        let db = Database::open_in_memory().unwrap();
        let uow = UnitOfWork::new(db.begin().unwrap());
        assert_eq!(
            apply_event(&uow, &EventRecord::Ignored, None).unwrap(),
            Resolution::Ignored
        );
        assert!(matches!(
            apply_event(&uow, &EventRecord::FileUpsert { data: None }, None),
            Err(Error::InvalidEvent(_))
        ));
        uow.commit().unwrap();
        assert_eq!(db.entity_counts().unwrap().physical_files, 0);
    }
}
