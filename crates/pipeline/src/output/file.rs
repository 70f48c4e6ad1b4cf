//! 파일 출력
//!
//! `start`에서 파일을 추가 모드로 열고(unix에서 권한 0660), 엔트리마다 한 줄씩 씁니다.
//! 쓰기는 내부 잠금으로 직렬화됩니다.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::operator::{Operator, SharedOperator, StartContext};

use crate::error::BuildError;
use crate::expr::ExprString;
use crate::helper::{OutputConfig, OutputOperator, delegate_basic, delegate_builder};
use crate::output::serialize_line;
use crate::registry::{BuildContext, OperatorBuilder};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOutputConfig {
    #[serde(flatten)]
    pub output: OutputConfig,
    pub path: PathBuf,
    /// 지정하면 JSON 대신 이 템플릿을 씁니다.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ExprString>,
}

impl OperatorBuilder for FileOutputConfig {
    delegate_builder!(output.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        if self.path.as_os_str().is_empty() {
            return Err(BuildError::config("path", "must not be empty"));
        }
        Ok(vec![Arc::new(FileOutput {
            output: self.output.build(ctx),
            path: self.path.clone(),
            format: self.format.clone(),
            file: Mutex::new(None),
        })])
    }
}

pub struct FileOutput {
    output: OutputOperator,
    path: PathBuf,
    format: Option<ExprString>,
    file: Mutex<Option<File>>,
}

async fn open_append(path: &PathBuf) -> std::io::Result<File> {
    let mut options = tokio::fs::OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    options.mode(0o660);
    options.open(path).await
}

impl Operator for FileOutput {
    delegate_basic!(output.basic);

    fn can_process(&self) -> bool {
        true
    }

    fn can_output(&self) -> bool {
        false
    }

    async fn start(&self, _ctx: StartContext) -> Result<(), OperatorError> {
        let file = open_append(&self.path).await.map_err(|e| {
            OperatorError::System(format!("failed to open {}: {e}", self.path.display()))
        })?;
        *self.file.lock().await = Some(file);
        tracing::debug!(path = %self.path.display(), "file output opened");
        Ok(())
    }

    async fn stop(&self) -> Result<(), OperatorError> {
        if let Some(mut file) = self.file.lock().await.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        Ok(())
    }

    async fn process(&self, _cancel: &CancellationToken, entry: Entry) -> Result<(), OperatorError> {
        let line = serialize_line(&entry, self.format.as_ref())?;

        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or_else(|| OperatorError::Closed {
            operator: self.output.id().to_owned(),
        })?;
        file.write_all(&line).await?;
        file.flush().await?;
        drop(guard);

        self.output.record_delivered();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use logweave_core::persist::{MemoryDatabase, ScopedPersister};
    use logweave_core::value::Value;
    use serde_json::json;

    fn start_ctx() -> StartContext {
        StartContext {
            cancel: CancellationToken::new(),
            persister: Arc::new(ScopedPersister::new(Arc::new(MemoryDatabase::new()), "out")),
        }
    }

    fn build(yaml: &str) -> SharedOperator {
        let config: FileOutputConfig = serde_yaml::from_str(yaml).unwrap();
        let registry = Registry::empty();
        config.build(&BuildContext::new(&registry)).unwrap().remove(0)
    }

    #[tokio::test]
    async fn appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        std::fs::write(&path, "existing\n").unwrap();

        let op = build(&format!("type: file_output\npath: {}", path.display()));
        op.start(start_ctx()).await.unwrap();
        op.process(&CancellationToken::new(), Entry::with_record(Value::from(json!({"message": "a"}))))
            .await
            .unwrap();
        op.stop().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "existing");
        assert!(lines[1].contains(r#""record":{"message":"a"}"#));
    }

    #[tokio::test]
    async fn format_template_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fmt.log");
        let op = build(&format!(
            "type: file_output\npath: {}\nformat: '{{{{ $.level }}}}: {{{{ $.message }}}}'",
            path.display()
        ));
        op.start(start_ctx()).await.unwrap();
        op.process(
            &CancellationToken::new(),
            Entry::with_record(Value::from(json!({"level": "warn", "message": "disk"}))),
        )
        .await
        .unwrap();
        op.stop().await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "warn: disk\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn new_file_is_group_writable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perm.log");
        let op = build(&format!("type: file_output\npath: {}", path.display()));
        op.start(start_ctx()).await.unwrap();
        op.stop().await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        // umask가 적용되므로 상한만 확인합니다.
        assert_eq!(mode & !0o660, 0);
    }

    #[tokio::test]
    async fn process_after_stop_is_closed() {
        let dir = tempfile::tempdir().unwrap();
        let op = build(&format!("type: file_output\npath: {}", dir.path().join("x").display()));
        op.start(start_ctx()).await.unwrap();
        op.stop().await.unwrap();
        op.stop().await.unwrap();
        let err = op.process(&CancellationToken::new(), Entry::new()).await.unwrap_err();
        assert!(matches!(err, OperatorError::Closed { .. }));
    }
}
