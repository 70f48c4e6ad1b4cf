//! 영속화 인터페이스
//!
//! 오퍼레이터는 [`Persister`]로 체크포인트를 저장합니다.
//! 실제 저장소는 [`Database`] trait 뒤에 있으며, 오퍼레이터마다
//! [`ScopedPersister`]가 `offsets/<operator_id>` 스코프를 할당합니다.
//!
//! # 내구성
//! `set`은 메모리 캐시만 바꿉니다. `sync`가 성공한 뒤에야 이전 `set`이 내구적입니다.
//! [`FileDatabase`]는 임시 파일에 쓴 뒤 rename하므로, 쓰기는 새 상태 전체 또는 이전 상태 전체입니다.

use std::collections::{BTreeMap, HashMap};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::PersistError;

/// 오프셋 스코프 접두어
pub const OFFSETS_NAMESPACE: &str = "offsets";

/// 스코프 내부의 키-값 목록
pub type ScopeData = HashMap<String, Vec<u8>>;

// ─── Database ───────────────────────────────────────────────────────

/// 스코프 단위 키-값 저장소
///
/// 쓰기는 저장소 내부 잠금으로 직렬화됩니다.
pub trait Database: Send + Sync {
    /// 스코프의 모든 키를 읽습니다. 없으면 빈 맵입니다.
    fn load_scope(&self, scope: &str) -> Result<ScopeData, PersistError>;

    /// 스코프 전체를 원자적으로 교체합니다.
    fn store_scope(&self, scope: &str, data: &ScopeData) -> Result<(), PersistError>;

    /// 존재하는 스코프 이름 목록 (정렬됨)
    fn scopes(&self) -> Result<Vec<String>, PersistError>;

    /// 스코프를 삭제합니다. 존재했으면 `true`를 반환합니다.
    fn remove_scope(&self, scope: &str) -> Result<bool, PersistError>;
}

/// 스코프 → 키 → base64 값
#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    scopes: BTreeMap<String, BTreeMap<String, String>>,
}

/// JSON 문서 하나에 모든 스코프를 저장하는 파일 저장소
pub struct FileDatabase {
    path: PathBuf,
    document: Mutex<Document>,
}

impl FileDatabase {
    /// 파일을 열거나, 없으면 빈 저장소를 준비합니다.
    ///
    /// 파일은 첫 쓰기 때 생성됩니다.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let path = path.as_ref().to_path_buf();
        let document = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => Document::default(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| PersistError::Corrupt {
                reason: format!("{}: {e}", path.display()),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::default(),
            Err(e) => {
                return Err(PersistError::Io {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };
        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> PersistError {
        PersistError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    /// 임시 파일에 쓴 뒤 원래 경로로 rename합니다.
    fn write_document(&self, document: &Document) -> Result<(), PersistError> {
        let bytes = serde_json::to_vec_pretty(document).map_err(|e| PersistError::Encoding {
            key: "*".to_owned(),
            reason: e.to_string(),
        })?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| self.io_err(e))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| self.io_err(e))?;
        tmp.write_all(&bytes).map_err(|e| self.io_err(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_err(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_err(e.error))?;
        Ok(())
    }
}

impl Database for FileDatabase {
    fn load_scope(&self, scope: &str) -> Result<ScopeData, PersistError> {
        let doc = self.document.lock().map_err(|_| PersistError::Poisoned)?;
        let Some(entries) = doc.scopes.get(scope) else {
            return Ok(ScopeData::new());
        };
        entries
            .iter()
            .map(|(k, v)| {
                base64::engine::general_purpose::STANDARD
                    .decode(v)
                    .map(|bytes| (k.clone(), bytes))
                    .map_err(|e| PersistError::Corrupt {
                        reason: format!("scope '{scope}' key '{k}': {e}"),
                    })
            })
            .collect()
    }

    fn store_scope(&self, scope: &str, data: &ScopeData) -> Result<(), PersistError> {
        let mut doc = self.document.lock().map_err(|_| PersistError::Poisoned)?;
        let encoded = data
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    base64::engine::general_purpose::STANDARD.encode(v),
                )
            })
            .collect();
        let previous = doc.scopes.insert(scope.to_owned(), encoded);
        if let Err(e) = self.write_document(&doc) {
            // 메모리 상태도 이전으로 되돌립니다.
            match previous {
                Some(p) => doc.scopes.insert(scope.to_owned(), p),
                None => doc.scopes.remove(scope),
            };
            return Err(e);
        }
        Ok(())
    }

    fn scopes(&self) -> Result<Vec<String>, PersistError> {
        let doc = self.document.lock().map_err(|_| PersistError::Poisoned)?;
        Ok(doc.scopes.keys().cloned().collect())
    }

    fn remove_scope(&self, scope: &str) -> Result<bool, PersistError> {
        let mut doc = self.document.lock().map_err(|_| PersistError::Poisoned)?;
        let Some(previous) = doc.scopes.remove(scope) else {
            return Ok(false);
        };
        if let Err(e) = self.write_document(&doc) {
            doc.scopes.insert(scope.to_owned(), previous);
            return Err(e);
        }
        Ok(true)
    }
}

/// 메모리 저장소. 재시작 시 상태가 사라집니다.
#[derive(Default)]
pub struct MemoryDatabase {
    scopes: Mutex<BTreeMap<String, ScopeData>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Database for MemoryDatabase {
    fn load_scope(&self, scope: &str) -> Result<ScopeData, PersistError> {
        let scopes = self.scopes.lock().map_err(|_| PersistError::Poisoned)?;
        Ok(scopes.get(scope).cloned().unwrap_or_default())
    }

    fn store_scope(&self, scope: &str, data: &ScopeData) -> Result<(), PersistError> {
        let mut scopes = self.scopes.lock().map_err(|_| PersistError::Poisoned)?;
        scopes.insert(scope.to_owned(), data.clone());
        Ok(())
    }

    fn scopes(&self) -> Result<Vec<String>, PersistError> {
        let scopes = self.scopes.lock().map_err(|_| PersistError::Poisoned)?;
        Ok(scopes.keys().cloned().collect())
    }

    fn remove_scope(&self, scope: &str) -> Result<bool, PersistError> {
        let mut scopes = self.scopes.lock().map_err(|_| PersistError::Poisoned)?;
        Ok(scopes.remove(scope).is_some())
    }
}

// ─── Persister ──────────────────────────────────────────────────────

/// 오퍼레이터가 사용하는 키-바이트 저장 인터페이스
pub trait Persister: Send + Sync {
    /// 값을 조회합니다.
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// 값을 설정합니다. `sync` 전까지는 내구적이지 않습니다.
    fn set(&self, key: &str, value: Vec<u8>);

    /// 키를 삭제합니다.
    fn delete(&self, key: &str);

    /// 현재 상태를 저장소에 기록합니다.
    fn sync(&self) -> Result<(), PersistError>;

    /// 저장소에서 상태를 다시 읽어 캐시를 교체합니다.
    fn load(&self) -> Result<(), PersistError>;
}

/// 오퍼레이터 ID 스코프를 갖는 캐시 기반 Persister
pub struct ScopedPersister {
    database: Arc<dyn Database>,
    scope: String,
    cache: Mutex<ScopeData>,
}

impl ScopedPersister {
    /// `offsets/<operator_id>` 스코프로 생성합니다.
    pub fn new(database: Arc<dyn Database>, operator_id: &str) -> Self {
        Self {
            database,
            scope: offsets_scope(operator_id),
            cache: Mutex::new(ScopeData::new()),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl Persister for ScopedPersister {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.cache.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: Vec<u8>) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key.to_owned(), value);
        }
    }

    fn delete(&self, key: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(key);
        }
    }

    fn sync(&self) -> Result<(), PersistError> {
        let snapshot = self
            .cache
            .lock()
            .map_err(|_| PersistError::Poisoned)?
            .clone();
        self.database.store_scope(&self.scope, &snapshot)
    }

    fn load(&self) -> Result<(), PersistError> {
        let data = self.database.load_scope(&self.scope)?;
        *self.cache.lock().map_err(|_| PersistError::Poisoned)? = data;
        Ok(())
    }
}

/// 오퍼레이터 ID의 스코프 이름
pub fn offsets_scope(operator_id: &str) -> String {
    format!("{OFFSETS_NAMESPACE}/{operator_id}")
}

/// `offsets/` 스코프에 속한 (오퍼레이터 ID, 키) 목록
pub fn list_offsets(database: &dyn Database) -> Result<Vec<(String, String)>, PersistError> {
    let prefix = format!("{OFFSETS_NAMESPACE}/");
    let mut out = Vec::new();
    for scope in database.scopes()? {
        let Some(operator_id) = scope.strip_prefix(&prefix) else {
            continue;
        };
        let mut keys: Vec<String> = database.load_scope(&scope)?.into_keys().collect();
        keys.sort();
        out.extend(keys.into_iter().map(|k| (operator_id.to_owned(), k)));
    }
    Ok(out)
}

/// 주어진 오퍼레이터들의 오프셋을 삭제합니다. 삭제된 스코프 수를 반환합니다.
pub fn clear_offsets(database: &dyn Database, operator_ids: &[String]) -> Result<usize, PersistError> {
    let mut removed = 0;
    for id in operator_ids {
        if database.remove_scope(&offsets_scope(id))? {
            removed += 1;
        }
    }
    Ok(removed)
}

/// 모든 오프셋을 삭제합니다. 삭제된 스코프 수를 반환합니다.
pub fn clear_all_offsets(database: &dyn Database) -> Result<usize, PersistError> {
    let prefix = format!("{OFFSETS_NAMESPACE}/");
    let mut removed = 0;
    for scope in database.scopes()? {
        if scope.starts_with(&prefix) && database.remove_scope(&scope)? {
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_is_not_durable_until_sync() {
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let p = ScopedPersister::new(Arc::clone(&db), "file_input");
        p.set("knownFiles", b"state".to_vec());
        assert!(db.load_scope("offsets/file_input").unwrap().is_empty());

        p.sync().unwrap();
        let stored = db.load_scope("offsets/file_input").unwrap();
        assert_eq!(stored["knownFiles"], b"state".to_vec());
    }

    #[test]
    fn load_replaces_cache() {
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let writer = ScopedPersister::new(Arc::clone(&db), "j");
        writer.set("lastReadCursor", b"c1".to_vec());
        writer.sync().unwrap();

        let reader = ScopedPersister::new(Arc::clone(&db), "j");
        reader.set("stale", b"x".to_vec());
        reader.load().unwrap();
        assert_eq!(reader.get("lastReadCursor"), Some(b"c1".to_vec()));
        assert_eq!(reader.get("stale"), None);
    }

    #[test]
    fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offsets.db");
        {
            let db: Arc<dyn Database> = Arc::new(FileDatabase::open(&path).unwrap());
            let p = ScopedPersister::new(db, "tcp");
            p.set("k", vec![0, 255, 7]);
            p.sync().unwrap();
        }
        let db: Arc<dyn Database> = Arc::new(FileDatabase::open(&path).unwrap());
        let p = ScopedPersister::new(db, "tcp");
        p.load().unwrap();
        assert_eq!(p.get("k"), Some(vec![0, 255, 7]));
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.db");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            FileDatabase::open(&path),
            Err(PersistError::Corrupt { .. })
        ));
    }

    #[test]
    fn offsets_list_and_clear() {
        let db = MemoryDatabase::new();
        let mut data = ScopeData::new();
        data.insert("knownFiles".to_owned(), vec![1]);
        db.store_scope("offsets/a", &data).unwrap();
        db.store_scope("offsets/b", &data).unwrap();
        db.store_scope("other", &data).unwrap();

        let listed = list_offsets(&db).unwrap();
        assert_eq!(
            listed,
            vec![
                ("a".to_owned(), "knownFiles".to_owned()),
                ("b".to_owned(), "knownFiles".to_owned())
            ]
        );

        assert_eq!(clear_offsets(&db, &["a".to_owned(), "zzz".to_owned()]).unwrap(), 1);
        assert_eq!(clear_all_offsets(&db).unwrap(), 1);
        assert_eq!(db.scopes().unwrap(), vec!["other".to_owned()]);
    }
}
