//! 파일 입력
//!
//! glob 패턴에 맞는 파일들을 주기적으로 찾아 끝까지 읽고, 재시작 후에도 이어서 읽습니다.
//!
//! # 동작
//! - `poll_interval`마다 `include`에서 `exclude`를 뺀 경로를 찾습니다.
//! - 경로마다 앞부분으로 파일을 식별합니다 ([`fingerprint`]). 처음 보는 경로가 알려진 파일과
//!   같으면 이름이 바뀐 것으로 보고 위치를 이어받습니다.
//! - 읽고 있지 않은 경로마다 리더 태스크를 띄웁니다 ([`reader`]).
//! - 알려진 파일 맵은 매 주기와 정지 시 `knownFiles` 키로 저장합니다.
//!
//! 상태 맵은 폴링 루프만 수정하며, 리더는 채널로 위치를 알립니다.

pub mod fingerprint;
pub mod reader;
pub mod split;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument as _, Span, debug, info, warn};

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::field::Field;
use logweave_core::metrics::{CHECKPOINT_FAILURES_TOTAL, FILE_READERS_ACTIVE, LABEL_OPERATOR};
use logweave_core::operator::{Operator, SharedOperator, StartContext};
use logweave_core::persist::Persister;

use self::fingerprint::{
    Identity, KNOWN_FILES_KEY, KnownFile, KnownFiles, decode_known_files, encode_known_files,
    read_head,
};
use self::reader::{Encoding, FileUpdate, ReadJob, read_file};
use self::split::{MultilineConfig, Splitter};
use super::StartAt;
use crate::error::BuildError;
use crate::helper::{
    ConfigDuration, InputConfig, InputOperator, Workers, delegate_basic, delegate_builder,
    delegate_writer,
};
use crate::registry::{BuildContext, OperatorBuilder};

pub const DEFAULT_POLL_INTERVAL: ConfigDuration = ConfigDuration::from_millis(200);
pub const DEFAULT_MAX_LOG_SIZE: usize = 1024 * 1024;
pub const DEFAULT_MAX_CONCURRENT_FILES: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInputConfig {
    #[serde(flatten)]
    pub input: InputConfig,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: ConfigDuration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiline: Option<MultilineConfig>,
    #[serde(default = "default_true")]
    pub include_file_name: bool,
    #[serde(default)]
    pub include_file_path: bool,
    #[serde(default)]
    pub start_at: StartAt,
    #[serde(default = "default_max_log_size")]
    pub max_log_size: usize,
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,
    #[serde(default)]
    pub encoding: Encoding,
}

fn default_poll_interval() -> ConfigDuration {
    DEFAULT_POLL_INTERVAL
}

fn default_true() -> bool {
    true
}

fn default_max_log_size() -> usize {
    DEFAULT_MAX_LOG_SIZE
}

fn default_max_concurrent_files() -> usize {
    DEFAULT_MAX_CONCURRENT_FILES
}

impl OperatorBuilder for FileInputConfig {
    delegate_builder!(input.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        Ok(vec![Arc::new(self.build_input(ctx)?)])
    }
}

impl FileInputConfig {
    pub fn build_input(&self, ctx: &BuildContext<'_>) -> Result<FileInput, BuildError> {
        if self.include.is_empty() {
            return Err(BuildError::config("include", "required argument is empty"));
        }
        for include in &self.include {
            glob::Pattern::new(include)?;
        }
        let exclude = self
            .exclude
            .iter()
            .map(|pattern| glob::Pattern::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;
        if self.poll_interval.get().is_zero() {
            return Err(BuildError::config("poll_interval", "must be greater than zero"));
        }
        if self.max_log_size == 0 {
            return Err(BuildError::config("max_log_size", "must be greater than zero"));
        }
        if self.max_concurrent_files == 0 {
            return Err(BuildError::config("max_concurrent_files", "must be at least 1"));
        }

        Ok(FileInput {
            shared: Arc::new(Shared {
                input: self.input.build(ctx, Field::record(["message"])),
                include: self.include.clone(),
                exclude,
                poll_interval: self.poll_interval.get(),
                splitter: Splitter::from_config(self.multiline.as_ref())?,
                encoding: self.encoding,
                start_at: self.start_at,
                max_log_size: self.max_log_size,
                max_concurrent_files: self.max_concurrent_files,
                include_file_name: self.include_file_name,
                include_file_path: self.include_file_path,
            }),
            workers: Workers::new(),
        })
    }
}

pub(crate) struct Shared {
    input: InputOperator,
    include: Vec<String>,
    exclude: Vec<glob::Pattern>,
    poll_interval: Duration,
    splitter: Splitter,
    encoding: Encoding,
    start_at: StartAt,
    max_log_size: usize,
    max_concurrent_files: usize,
    include_file_name: bool,
    include_file_path: bool,
}

pub struct FileInput {
    shared: Arc<Shared>,
    workers: Workers,
}

impl Operator for FileInput {
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
            .map_err(|e| OperatorError::System(format!("failed to load file checkpoint: {e}")))?;
        let known = decode_known_files(ctx.persister.get(KNOWN_FILES_KEY).as_deref())
            .map_err(|e| OperatorError::System(format!("failed to decode file checkpoint: {e}")))?;
        debug!(known_files = known.len(), "loaded file checkpoint");

        let cancel = self.workers.start(&ctx.cancel);
        let poller = Poller {
            shared: Arc::clone(&self.shared),
            persister: ctx.persister,
            known,
            running: HashSet::new(),
            first_poll: true,
        };
        self.workers.spawn(self.span(), poller.run(cancel));
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

// ─── Poll loop ──────────────────────────────────────────────────────

struct Poller {
    shared: Arc<Shared>,
    persister: Arc<dyn Persister>,
    known: KnownFiles,
    running: HashSet<String>,
    first_poll: bool,
}

impl Poller {
    async fn run(mut self, cancel: CancellationToken) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut readers = JoinSet::new();
        let mut ticker = tokio::time::interval(self.shared.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll(&mut readers, &tx, &cancel).await;
                    self.checkpoint();
                }
                Some(update) = rx.recv() => self.apply(update),
                Some(_) = readers.join_next(), if !readers.is_empty() => {}
            }
        }

        while readers.join_next().await.is_some() {}
        drop(tx);
        while let Some(update) = rx.recv().await {
            self.apply(update);
        }
        self.checkpoint();
    }

    async fn poll(
        &mut self,
        readers: &mut JoinSet<()>,
        updates: &mpsc::UnboundedSender<FileUpdate>,
        cancel: &CancellationToken,
    ) {
        let first_poll = std::mem::replace(&mut self.first_poll, false);
        let matches = find_files(&self.shared.include, &self.shared.exclude);
        if first_poll && matches.is_empty() {
            warn!(include = ?self.shared.include, "no files match the configured include patterns");
        }

        // 이번 주기 이전 상태에서 이동된 파일을 찾습니다.
        let previous = self.known.clone();
        for path in &matches {
            if self.running.contains(path) {
                continue;
            }
            if self.running.len() >= self.shared.max_concurrent_files {
                debug!(
                    max_concurrent_files = self.shared.max_concurrent_files,
                    "reader limit reached, deferring remaining files"
                );
                break;
            }

            let (head, size) = match read_head(Path::new(path)).await {
                Ok(head) => head,
                Err(e) => {
                    warn!(path = %path, error = %e, "failed to open file");
                    continue;
                }
            };

            let mut record = self.identify(&previous, path, &head, size, first_poll);
            if !head.is_empty() {
                record.identity = Identity::from_head(&head);
            }
            let job = ReadJob {
                path: path.clone(),
                offset: record.offset,
                last_seen_size: record.last_seen_size,
            };
            self.known.insert(path.clone(), record);
            self.running.insert(path.clone());
            metrics::gauge!(FILE_READERS_ACTIVE).increment(1.0);
            readers.spawn(
                read_file(Arc::clone(&self.shared), job, cancel.clone(), updates.clone())
                    .instrument(Span::current()),
            );
        }

        let matched: HashSet<&String> = matches.iter().collect();
        let running = &self.running;
        self.known
            .retain(|path, _| matched.contains(path) || running.contains(path));
    }

    /// 경로의 파일 상태를 정합니다.
    ///
    /// 같은 경로의 기록이 현재 내용과 맞으면 그대로, 다른 경로의 기록과 맞으면 이동으로 보고
    /// 위치를 이어받습니다. 둘 다 아니면 새 파일입니다.
    fn identify(
        &self,
        previous: &KnownFiles,
        path: &str,
        head: &[u8],
        size: u64,
        first_poll: bool,
    ) -> KnownFile {
        let own = previous.get(path);
        if let Some(record) = own {
            if record.identity.is_empty() || record.identity.matches_head(head) {
                return record.clone();
            }
        }

        if !head.is_empty() {
            let moved = previous.iter().find(|(other, record)| {
                other.as_str() != path
                    && !record.identity.is_empty()
                    && record.identity.matches_head(head)
            });
            if let Some((from, record)) = moved {
                info!(path, from = %from, offset = record.offset, "file was moved, resuming from known offset");
                return record.clone();
            }
        }

        // 처음 보는 파일은 첫 주기에만 `start_at: end`를 따릅니다.
        let from_end = self.shared.start_at == StartAt::End && first_poll && own.is_none();
        KnownFile::new(head, if from_end { size } else { 0 })
    }

    fn apply(&mut self, update: FileUpdate) {
        match update {
            FileUpdate::Offset { path, offset } => {
                if let Some(record) = self.known.get_mut(&path) {
                    record.offset = offset;
                }
            }
            FileUpdate::Finished { path, size } => {
                if self.running.remove(&path) {
                    metrics::gauge!(FILE_READERS_ACTIVE).decrement(1.0);
                }
                if let (Some(record), Some(size)) = (self.known.get_mut(&path), size) {
                    record.last_seen_size = size;
                }
            }
        }
    }

    /// 알려진 파일 맵을 저장합니다. 실패하면 다음 주기에 다시 시도합니다.
    fn checkpoint(&self) {
        let result = encode_known_files(&self.known)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                self.persister.set(KNOWN_FILES_KEY, bytes);
                self.persister.sync().map_err(|e| e.to_string())
            });
        if let Err(e) = result {
            metrics::counter!(
                CHECKPOINT_FAILURES_TOTAL,
                LABEL_OPERATOR => self.shared.input.id().to_owned()
            )
            .increment(1);
            warn!(error = %e, "failed to save file checkpoint");
        }
    }
}

/// `include` 합집합에서 `exclude`에 걸리는 경로를 뺍니다. 순서는 유지하고 중복은 제거합니다.
pub fn find_files(include: &[String], exclude: &[glob::Pattern]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    for pattern in include {
        let Ok(paths) = glob::glob(pattern) else {
            continue;
        };
        for path in paths.flatten() {
            if !path.is_file() || exclude.iter().any(|ex| ex.matches_path(&path)) {
                continue;
            }
            let path = path.to_string_lossy().into_owned();
            if seen.insert(path.clone()) {
                found.push(path);
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write as _;

    use crate::registry::Registry;
    use crate::testutil::{Collector, FailingOutput};
    use logweave_core::persist::{Database, MemoryDatabase, ScopedPersister};

    fn build(yaml: &str) -> FileInput {
        let config: FileInputConfig = serde_yaml::from_str(yaml).unwrap();
        let registry = Registry::empty();
        config.build_input(&BuildContext::new(&registry)).unwrap()
    }

    fn config_for(dir: &Path, extra: &str) -> String {
        format!(
            "type: file_input\nid: files\ninclude: ['{}/*.log']\npoll_interval: 20ms\nstart_at: beginning\noutput: out\n{extra}",
            dir.display()
        )
    }

    async fn start(op: &FileInput, db: &Arc<MemoryDatabase>) -> Arc<Collector> {
        let out = Arc::new(Collector::new("out"));
        op.set_outputs(vec![out.clone()]).unwrap();
        let database: Arc<dyn Database> = db.clone();
        op.start(StartContext {
            cancel: CancellationToken::new(),
            persister: Arc::new(ScopedPersister::new(database, "files")),
        })
        .await
        .unwrap();
        out
    }

    fn messages(entries: &[Entry]) -> Vec<String> {
        entries
            .iter()
            .map(|e| e.record.to_json()["message"].as_str().unwrap_or_default().to_owned())
            .collect()
    }

    fn append(path: &Path, data: &str) {
        let mut file = OpenOptions::new().create(true).append(true).open(path).unwrap();
        file.write_all(data.as_bytes()).unwrap();
    }

    #[test]
    fn config_validation() {
        let registry = Registry::empty();
        let ctx = BuildContext::new(&registry);

        let missing: FileInputConfig = serde_yaml::from_str("type: file_input").unwrap();
        assert!(missing.build_input(&ctx).is_err());

        let bad_glob: FileInputConfig =
            serde_yaml::from_str("type: file_input\ninclude: ['[']").unwrap();
        assert!(matches!(bad_glob.build_input(&ctx), Err(BuildError::Glob(_))));

        let bad_start: Result<FileInputConfig, _> =
            serde_yaml::from_str("type: file_input\ninclude: [a]\nstart_at: middle");
        assert!(bad_start.is_err());

        let defaults: FileInputConfig =
            serde_yaml::from_str("type: file_input\ninclude: [a]").unwrap();
        assert_eq!(defaults.poll_interval.get(), Duration::from_millis(200));
        assert_eq!(defaults.start_at, StartAt::End);
        assert!(defaults.include_file_name);
        assert_eq!(defaults.max_log_size, DEFAULT_MAX_LOG_SIZE);
    }

    #[test]
    fn find_files_applies_exclude() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.log"), "a").unwrap();
        std::fs::write(dir.path().join("b.log"), "b").unwrap();
        std::fs::create_dir(dir.path().join("c.log")).unwrap();

        let include = vec![
            format!("{}/*.log", dir.path().display()),
            format!("{}/a.log", dir.path().display()),
        ];
        let exclude = vec![glob::Pattern::new(&format!("{}/b.log", dir.path().display())).unwrap()];
        let found = find_files(&include, &exclude);
        assert_eq!(found, vec![format!("{}/a.log", dir.path().display())]);
    }

    #[tokio::test]
    async fn reads_lines_and_resumes_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "a\nb\nc\n");
        let db = Arc::new(MemoryDatabase::new());

        let op = build(&config_for(dir.path(), ""));
        let out = start(&op, &db).await;
        let entries = out.wait_for(3).await;
        op.stop().await.unwrap();
        assert_eq!(messages(&entries), vec!["a", "b", "c"]);
        assert_eq!(entries[0].labels["file_name"], "app.log");

        append(&path, "d\n");
        let op = build(&config_for(dir.path(), ""));
        let out = start(&op, &db).await;
        let entries = out.wait_for(1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        op.stop().await.unwrap();
        assert_eq!(messages(&entries), vec!["d"]);
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn rename_rotation_does_not_redeliver() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "1\n2\n");
        let db = Arc::new(MemoryDatabase::new());

        let op = build(&config_for(dir.path(), ""));
        let out = start(&op, &db).await;
        out.wait_for(2).await;

        std::fs::rename(&path, dir.path().join("app.1.log")).unwrap();
        append(&path, "3\n");

        let entries = out.wait_for(3).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        op.stop().await.unwrap();
        assert_eq!(messages(&entries), vec!["1", "2", "3"]);
        assert_eq!(out.len(), 3);
    }

    #[tokio::test]
    async fn start_at_end_skips_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "old\n");
        let db = Arc::new(MemoryDatabase::new());

        let config = config_for(dir.path(), "").replace("start_at: beginning", "start_at: end");
        let op = build(&config);
        let out = start(&op, &db).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        append(&path, "new\n");
        // 나중에 생긴 파일은 처음부터 읽습니다.
        append(&dir.path().join("late.log"), "late\n");

        let entries = out.wait_for(2).await;
        op.stop().await.unwrap();
        let mut got = messages(&entries);
        got.sort();
        assert_eq!(got, vec!["late", "new"]);
    }

    #[tokio::test]
    async fn truncation_restarts_from_beginning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "first line\nsecond line\n");
        let db = Arc::new(MemoryDatabase::new());

        let op = build(&config_for(dir.path(), ""));
        let out = start(&op, &db).await;
        out.wait_for(2).await;

        std::fs::write(&path, "first\n").unwrap();
        let entries = out.wait_for(3).await;
        op.stop().await.unwrap();
        assert_eq!(messages(&entries)[2], "first");
    }

    #[tokio::test]
    async fn partial_line_is_flushed_after_quiet_poll() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "done\npartial");
        let db = Arc::new(MemoryDatabase::new());

        let op = build(&config_for(dir.path(), "include_file_path: true"));
        let out = start(&op, &db).await;
        let entries = out.wait_for(2).await;
        op.stop().await.unwrap();
        assert_eq!(messages(&entries), vec!["done", "partial"]);
        assert_eq!(entries[1].labels["file_path"], path.display().to_string());
    }

    #[tokio::test]
    async fn multiline_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "START 1\n  at a\n  at b\nSTART 2\n");
        let db = Arc::new(MemoryDatabase::new());

        let op = build(&config_for(
            dir.path(),
            "multiline:\n  line_start_pattern: '^START'",
        ));
        let out = start(&op, &db).await;
        let entries = out.wait_for(2).await;
        op.stop().await.unwrap();
        assert_eq!(messages(&entries), vec!["START 1\n  at a\n  at b", "START 2"]);
    }

    #[tokio::test]
    async fn checkpoint_is_written_on_stop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "x\ny\n");
        let db = Arc::new(MemoryDatabase::new());

        let op = build(&config_for(dir.path(), ""));
        let out = start(&op, &db).await;
        out.wait_for(2).await;
        op.stop().await.unwrap();

        let persister = ScopedPersister::new(db.clone(), "files");
        persister.load().unwrap();
        let known = decode_known_files(persister.get(KNOWN_FILES_KEY).as_deref()).unwrap();
        let record = &known[&path.to_string_lossy().into_owned()];
        assert_eq!(record.offset, 4);
        assert!(!record.identity.is_empty());
    }

    fn persisted_offset(db: &Arc<MemoryDatabase>, path: &Path) -> u64 {
        let database: Arc<dyn Database> = db.clone();
        let persister = ScopedPersister::new(database, "files");
        persister.load().unwrap();
        let known = decode_known_files(persister.get(KNOWN_FILES_KEY).as_deref()).unwrap();
        known[&path.to_string_lossy().into_owned()].offset
    }

    async fn run_against(op: &FileInput, db: &Arc<MemoryDatabase>, output: FailingOutput) {
        op.set_outputs(vec![Arc::new(output)]).unwrap();
        let database: Arc<dyn Database> = db.clone();
        op.start(StartContext {
            cancel: CancellationToken::new(),
            persister: Arc::new(ScopedPersister::new(database, "files")),
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        op.stop().await.unwrap();
    }

    #[tokio::test]
    async fn system_error_downstream_keeps_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "a\nb\n");
        let db = Arc::new(MemoryDatabase::new());

        let op = build(&config_for(dir.path(), ""));
        run_against(&op, &db, FailingOutput::new("out")).await;
        assert_eq!(persisted_offset(&db, &path), 0);

        // 하위가 복구되면 같은 줄부터 다시 전달됩니다.
        let op = build(&config_for(dir.path(), ""));
        let out = start(&op, &db).await;
        let entries = out.wait_for(2).await;
        op.stop().await.unwrap();
        assert_eq!(messages(&entries), vec!["a", "b"]);
        assert_eq!(persisted_offset(&db, &path), 4);
    }

    #[tokio::test]
    async fn entry_error_downstream_advances_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "a\nb\n");
        let db = Arc::new(MemoryDatabase::new());

        let op = build(&config_for(dir.path(), ""));
        run_against(&op, &db, FailingOutput::rejecting("out")).await;
        assert_eq!(persisted_offset(&db, &path), 4);

        // 거부된 줄은 재시작 후에도 다시 읽지 않습니다.
        let op = build(&config_for(dir.path(), ""));
        let out = start(&op, &db).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        op.stop().await.unwrap();
        assert_eq!(out.len(), 0);
    }

    #[tokio::test]
    async fn process_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let op = build(&config_for(dir.path(), ""));
        let err = op
            .process(&CancellationToken::new(), Entry::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OperatorError::CannotProcess { .. }));
    }
}
