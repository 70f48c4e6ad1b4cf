//! 파일 식별
//!
//! inode 대신 파일 앞부분으로 논리적 파일을 식별합니다.
//! - `FINGERPRINT_BYTES` 이상인 파일: 앞 `FINGERPRINT_BYTES` 바이트의 MD5
//! - 그보다 작은 파일: 앞부분 내용 전체. 짧은 쪽이 긴 쪽의 접두사이면 같은 파일입니다.

use std::collections::BTreeMap;
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use md5::{Digest, Md5};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::io::AsyncReadExt;

/// 지문에 사용하는 바이트 수. 저장된 상태와의 호환을 위해 바꾸지 않습니다.
pub const FINGERPRINT_BYTES: usize = 1000;

/// 체크포인트 키
pub const KNOWN_FILES_KEY: &str = "knownFiles";

/// 파일 식별자
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Identity {
    /// 작은 파일의 앞부분 내용
    SmallFileContents(#[serde(with = "b64")] Vec<u8>),
    /// 앞 `FINGERPRINT_BYTES` 바이트의 MD5
    Fingerprint(#[serde(with = "b64")] Vec<u8>),
}

impl Identity {
    /// 파일 앞부분으로 식별자를 만듭니다.
    pub fn from_head(head: &[u8]) -> Self {
        if head.len() >= FINGERPRINT_BYTES {
            Identity::Fingerprint(Md5::digest(&head[..FINGERPRINT_BYTES]).to_vec())
        } else {
            Identity::SmallFileContents(head.to_vec())
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Identity::SmallFileContents(contents) if contents.is_empty())
    }

    /// 현재 파일 앞부분이 이 식별자와 같은 논리적 파일인지 확인합니다.
    ///
    /// 작은 파일이 임계값을 넘게 자란 경우도 접두사로 비교합니다.
    pub fn matches_head(&self, head: &[u8]) -> bool {
        match self {
            Identity::SmallFileContents(contents) => {
                let n = contents.len().min(head.len());
                contents[..n] == head[..n]
            }
            Identity::Fingerprint(hash) => {
                head.len() >= FINGERPRINT_BYTES
                    && Md5::digest(&head[..FINGERPRINT_BYTES]).as_slice() == hash.as_slice()
            }
        }
    }
}

/// 추적 중인 파일 하나의 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownFile {
    pub identity: Identity,
    /// 하위 전달이 끝난 바이트 위치
    pub offset: u64,
    /// 마지막으로 읽을 때의 파일 크기
    #[serde(default)]
    pub last_seen_size: u64,
}

impl KnownFile {
    pub fn new(head: &[u8], offset: u64) -> Self {
        Self {
            identity: Identity::from_head(head),
            offset,
            last_seen_size: 0,
        }
    }
}

/// 경로 → 파일 상태
pub type KnownFiles = BTreeMap<String, KnownFile>;

/// 체크포인트 바이트를 복원합니다. 값이 없으면 빈 맵입니다.
pub fn decode_known_files(bytes: Option<&[u8]>) -> Result<KnownFiles, serde_json::Error> {
    match bytes {
        Some(bytes) => serde_json::from_slice(bytes),
        None => Ok(KnownFiles::new()),
    }
}

pub fn encode_known_files(known: &KnownFiles) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(known)
}

/// 파일 앞 최대 `FINGERPRINT_BYTES` 바이트와 현재 크기를 읽습니다.
pub async fn read_head(path: &Path) -> std::io::Result<(Vec<u8>, u64)> {
    let file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();
    let mut head = Vec::with_capacity(FINGERPRINT_BYTES);
    file.take(FINGERPRINT_BYTES as u64)
        .read_to_end(&mut head)
        .await?;
    Ok((head, size))
}

mod b64 {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}
