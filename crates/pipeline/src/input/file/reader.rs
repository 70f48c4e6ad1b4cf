//! 파일 하나를 저장된 위치부터 끝까지 읽는 리더
//!
//! 토큰 하나를 하위로 넘길 때마다 새 위치를 폴링 루프에 알립니다.
//! 끝나지 않은 마지막 토큰은 한 주기 동안 변화가 없을 때만 내보냅니다.

use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use logweave_core::error::OperatorError;
use logweave_core::value::Value;

use super::Shared;

/// 한 번에 읽는 크기
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// 리더가 폴링 루프에 보내는 상태 변경
#[derive(Debug)]
pub(super) enum FileUpdate {
    Offset { path: String, offset: u64 },
    Finished { path: String, size: Option<u64> },
}

/// 읽기 작업 하나
#[derive(Debug, Clone)]
pub(super) struct ReadJob {
    pub path: String,
    pub offset: u64,
    pub last_seen_size: u64,
}

/// 파일 인코딩
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Encoding {
    #[default]
    #[serde(rename = "utf-8", alias = "utf8", alias = "ascii", alias = "us-ascii")]
    Utf8,
    /// 유효한 UTF-8이 아니면 바이트 그대로 내보냅니다.
    #[serde(rename = "nop", alias = "")]
    Nop,
}

impl Encoding {
    pub fn decode(self, token: &[u8]) -> Value {
        match self {
            Encoding::Utf8 => Value::String(String::from_utf8_lossy(token).into_owned()),
            Encoding::Nop => match std::str::from_utf8(token) {
                Ok(text) => Value::String(text.to_owned()),
                Err(_) => Value::Bytes(token.to_vec()),
            },
        }
    }
}

/// 리더 태스크. 끝나면 항상 `Finished`를 보냅니다.
pub(super) async fn read_file(
    shared: Arc<Shared>,
    job: ReadJob,
    cancel: CancellationToken,
    updates: UnboundedSender<FileUpdate>,
) {
    let path = job.path.clone();
    let size = match read_to_end(&shared, job, &cancel, &updates).await {
        Ok(size) => Some(size),
        Err(e) => {
            warn!(path = %path, error = %e, "failed to read log file");
            None
        }
    };
    let _ = updates.send(FileUpdate::Finished { path, size });
}

async fn read_to_end(
    shared: &Shared,
    job: ReadJob,
    cancel: &CancellationToken,
    updates: &UnboundedSender<FileUpdate>,
) -> std::io::Result<u64> {
    let mut file = tokio::fs::File::open(&job.path).await?;
    let size = file.metadata().await?.len();

    let mut offset = job.offset;
    if size < offset {
        info!(path = %job.path, offset, size, "file was truncated, reading from the beginning");
        offset = 0;
        let _ = updates.send(FileUpdate::Offset {
            path: job.path.clone(),
            offset,
        });
    }
    if size == offset {
        return Ok(size);
    }

    file.seek(SeekFrom::Start(offset)).await?;
    let start_offset = offset;
    // 읽기 시작 시점의 크기까지만 읽습니다.
    let mut source = file.take(size - offset);
    let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        while let Some(split) = shared.splitter.split(&buf, false) {
            let token = buf.split_to(split.advance);
            if !emit(shared, &job.path, &token[split.token], cancel).await {
                return Ok(size);
            }
            offset += split.advance as u64;
            let _ = updates.send(FileUpdate::Offset {
                path: job.path.clone(),
                offset,
            });
        }

        if buf.len() >= shared.max_log_size {
            warn!(
                path = %job.path,
                max_log_size = shared.max_log_size,
                "log entry too large, splitting at max_log_size"
            );
            let token = buf.split_to(shared.max_log_size);
            if !emit(shared, &job.path, &token, cancel).await {
                return Ok(size);
            }
            offset += token.len() as u64;
            let _ = updates.send(FileUpdate::Offset {
                path: job.path.clone(),
                offset,
            });
            continue;
        }

        if cancel.is_cancelled() {
            return Ok(size);
        }
        let n = source.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    // 지난 주기 이후 파일도 위치도 그대로이면 남은 데이터를 마지막 토큰으로 봅니다.
    if !buf.is_empty() && offset == start_offset && size == job.last_seen_size {
        debug!(path = %job.path, bytes = buf.len(), "flushing trailing entry");
        while let Some(split) = shared.splitter.split(&buf, true) {
            let token = buf.split_to(split.advance);
            if !emit(shared, &job.path, &token[split.token], cancel).await {
                return Ok(size);
            }
            offset += split.advance as u64;
            let _ = updates.send(FileUpdate::Offset {
                path: job.path.clone(),
                offset,
            });
        }
        buf.advance(buf.len());
    }

    Ok(size)
}

/// 토큰 하나를 엔트리로 만들어 하위로 보냅니다. 위치를 전진시켜도 되면 true입니다.
async fn emit(shared: &Shared, path: &str, token: &[u8], cancel: &CancellationToken) -> bool {
    let mut entry = match shared.input.new_entry(shared.encoding.decode(token)) {
        Ok(entry) => entry,
        Err(e) => {
            warn!(path, error = %e, "failed to create entry");
            return true;
        }
    };
    if shared.include_file_name {
        let name = Path::new(path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        entry.add_label("file_name", name);
    }
    if shared.include_file_path {
        entry.add_label("file_path", path);
    }

    match shared.input.write(cancel, entry).await {
        Ok(()) => true,
        Err(OperatorError::Cancelled) => false,
        Err(_) if cancel.is_cancelled() => false,
        // 엔트리 자체의 문제는 on_error가 처리했으므로 다시 읽지 않습니다.
        Err(e) if e.is_user() => true,
        Err(e) => {
            // 위치를 유지해 다음 주기에 같은 토큰부터 다시 읽습니다.
            warn!(path, error = %e, "downstream failed, retrying from the last offset");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodings() {
        assert_eq!(Encoding::Utf8.decode(b"abc"), Value::from("abc"));
        assert_eq!(Encoding::Utf8.decode(&[0xff, b'a']), Value::from("\u{fffd}a"));
        assert_eq!(Encoding::Nop.decode(b"abc"), Value::from("abc"));
        assert_eq!(Encoding::Nop.decode(&[0xff]), Value::Bytes(vec![0xff]));

        let enc: Encoding = serde_yaml::from_str("us-ascii").unwrap();
        assert_eq!(enc, Encoding::Utf8);
        assert!(serde_yaml::from_str::<Encoding>("latin-9").is_err());
    }
}
