//! journald 입력
//!
//! `journalctl`을 JSON/UTC/follow 모드 자식 프로세스로 띄워 한 줄에 하나씩 엔트리를 읽습니다.
//! 마지막으로 읽은 커서를 `lastReadCursor` 키로 저장하고, 재시작 시 그 다음부터 읽습니다.
//! 자식 프로세스가 끝나면 `poll_interval` 후 다시 띄웁니다.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::field::Field;
use logweave_core::operator::{Operator, SharedOperator, StartContext};
use logweave_core::persist::Persister;
use logweave_core::value::Value;

use super::StartAt;
use crate::error::BuildError;
use crate::helper::{
    ConfigDuration, InputConfig, InputOperator, Workers, delegate_basic, delegate_builder,
    delegate_writer,
};
use crate::registry::{BuildContext, OperatorBuilder};

/// 커서 저장 키
pub const LAST_READ_CURSOR_KEY: &str = "lastReadCursor";

const DEFAULT_POLL_INTERVAL: ConfigDuration = ConfigDuration::from_millis(200);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournaldInputConfig {
    #[serde(flatten)]
    pub input: InputConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub files: Vec<PathBuf>,
    #[serde(default)]
    pub start_at: StartAt,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: ConfigDuration,
    #[serde(default = "default_journalctl_path")]
    pub journalctl_path: PathBuf,
}

fn default_poll_interval() -> ConfigDuration {
    DEFAULT_POLL_INTERVAL
}

fn default_journalctl_path() -> PathBuf {
    PathBuf::from("journalctl")
}

impl OperatorBuilder for JournaldInputConfig {
    delegate_builder!(input.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        Ok(vec![Arc::new(self.build_input(ctx)?)])
    }
}

impl JournaldInputConfig {
    pub fn build_input(&self, ctx: &BuildContext<'_>) -> Result<JournaldInput, BuildError> {
        if let Some(directory) = &self.directory {
            if !directory.is_dir() {
                return Err(BuildError::config(
                    "directory",
                    format!("directory does not exist: {}", directory.display()),
                ));
            }
            if !self.files.is_empty() {
                return Err(BuildError::config(
                    "files",
                    "directory and files cannot be used together",
                ));
            }
        }

        Ok(JournaldInput {
            shared: Arc::new(Shared {
                input: self.input.build(ctx, Field::root()),
                journalctl_path: self.journalctl_path.clone(),
                base_args: self.base_args(),
                start_at: self.start_at,
                poll_interval: self.poll_interval.get(),
            }),
            workers: Workers::new(),
        })
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "--utc".to_owned(),
            "--output=json".to_owned(),
            "--no-pager".to_owned(),
            "--follow".to_owned(),
        ];
        if let Some(directory) = &self.directory {
            args.push("--directory".to_owned());
            args.push(directory.display().to_string());
        }
        for file in &self.files {
            args.push("--file".to_owned());
            args.push(file.display().to_string());
        }
        args
    }
}

struct Shared {
    input: InputOperator,
    journalctl_path: PathBuf,
    base_args: Vec<String>,
    start_at: StartAt,
    poll_interval: std::time::Duration,
}

impl Shared {
    /// 커서가 있으면 그 다음부터, 없으면 `start_at`에 따라 읽습니다.
    fn args(&self, cursor: Option<&str>) -> Vec<String> {
        let mut args = self.base_args.clone();
        match (cursor, self.start_at) {
            (Some(cursor), _) => {
                args.push("--after-cursor".to_owned());
                args.push(cursor.to_owned());
            }
            (None, StartAt::Beginning) => args.push("--no-tail".to_owned()),
            (None, StartAt::End) => args.push("--lines=0".to_owned()),
        }
        args
    }
}

pub struct JournaldInput {
    shared: Arc<Shared>,
    workers: Workers,
}

impl Operator for JournaldInput {
    delegate_basic!(shared.input.basic);
    delegate_writer!(shared.input.writer);

    fn can_process(&self) -> bool {
        false
    }

    fn can_output(&self) -> bool {
        true
    }

    async fn start(&self, ctx: StartContext) -> Result<(), OperatorError> {
        ctx.persister
            .load()
            .map_err(|e| OperatorError::System(format!("failed to load journald cursor: {e}")))?;

        let cancel = self.workers.start(&ctx.cancel);
        self.workers.spawn(
            self.span(),
            follow_loop(Arc::clone(&self.shared), ctx.persister, cancel),
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), OperatorError> {
        self.workers.stop(self.span()).await;
        Ok(())
    }

    async fn process(&self, _cancel: &CancellationToken, _entry: Entry) -> Result<(), OperatorError> {
        Err(self.shared.input.cannot_process())
    }
}

async fn follow_loop(shared: Arc<Shared>, persister: Arc<dyn Persister>, cancel: CancellationToken) {
    loop {
        if let Err(e) = follow(&shared, persister.as_ref(), &cancel).await {
            warn!(error = %e, "journalctl failed");
        }
        sync_cursor(persister.as_ref());
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(shared.poll_interval) => {}
        }
    }
}

/// journalctl 한 번의 실행. 취소되거나 출력이 끝나면 반환합니다.
async fn follow(
    shared: &Shared,
    persister: &dyn Persister,
    cancel: &CancellationToken,
) -> Result<(), OperatorError> {
    let cursor = persister
        .get(LAST_READ_CURSOR_KEY)
        .and_then(|bytes| String::from_utf8(bytes).ok());
    let args = shared.args(cursor.as_deref());
    debug!(path = %shared.journalctl_path.display(), ?args, "starting journalctl");

    let mut child = Command::new(&shared.journalctl_path)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| OperatorError::System(format!("start journalctl: {e}")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| OperatorError::System("journalctl stdout is not captured".to_owned()))?;
    let mut lines = BufReader::new(stdout).lines();

    let mut sync_ticker = tokio::time::interval(shared.poll_interval);
    sync_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sync_ticker.tick() => {
                sync_cursor(persister);
                continue;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            info!("journalctl output ended");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let parsed = match parse_journal_entry(&line) {
            Ok(parsed) => parsed,
            Err(reason) => {
                warn!(reason = %reason, "failed to parse journal entry");
                continue;
            }
        };
        let mut entry = match shared.input.new_entry(parsed.record) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "failed to create entry");
                continue;
            }
        };
        entry.timestamp = parsed.timestamp;
        persister.set(LAST_READ_CURSOR_KEY, parsed.cursor.into_bytes());
        if let Err(e) = shared.input.write(cancel, entry).await {
            if matches!(e, OperatorError::Cancelled) {
                break;
            }
        }
    }

    if let Err(e) = child.kill().await {
        debug!(error = %e, "journalctl already exited");
    }
    Ok(())
}

fn sync_cursor(persister: &dyn Persister) {
    if let Err(e) = persister.sync() {
        warn!(error = %e, "failed to sync journald cursor");
    }
}

/// 파싱된 journald 레코드
#[derive(Debug, PartialEq)]
pub struct JournalEntry {
    pub record: Value,
    pub timestamp: DateTime<Utc>,
    pub cursor: String,
}

/// journalctl JSON 한 줄을 파싱합니다.
///
/// `__REALTIME_TIMESTAMP`(마이크로초 문자열)는 엔트리 시각이 되고 레코드에서 빠집니다.
/// `__CURSOR`는 레코드에 남습니다.
pub fn parse_journal_entry(line: &str) -> Result<JournalEntry, String> {
    let mut record: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(line).map_err(|e| e.to_string())?;

    let timestamp = match record.remove("__REALTIME_TIMESTAMP") {
        Some(serde_json::Value::String(text)) => {
            let micros: i64 = text
                .parse()
                .map_err(|e| format!("parse timestamp: {e}"))?;
            DateTime::from_timestamp_micros(micros)
                .ok_or_else(|| format!("timestamp out of range: {micros}"))?
        }
        Some(_) => return Err("journald field for timestamp is not a string".to_owned()),
        None => return Err("journald record missing __REALTIME_TIMESTAMP field".to_owned()),
    };

    let cursor = match record.get("__CURSOR") {
        Some(serde_json::Value::String(cursor)) => cursor.clone(),
        Some(_) => return Err("journald field for cursor is not a string".to_owned()),
        None => return Err("journald record missing __CURSOR field".to_owned()),
    };

    Ok(JournalEntry {
        record: Value::from(serde_json::Value::Object(record)),
        timestamp,
        cursor,
    })
}
