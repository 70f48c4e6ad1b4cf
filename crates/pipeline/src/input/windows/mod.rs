//! Windows 이벤트 로그 입력
//!
//! `poll_interval`마다 채널에서 북마크 이후 이벤트를 최대 `max_reads`개 읽어 내보냅니다.
//! 북마크는 마지막으로 처리한 `EventRecordID`이며, 채널 이름을 키로 저장합니다.
//!
//! 이벤트 조회는 [`EventSource`] 뒤에 있습니다. 기본 구현은 `wevtutil`을 사용합니다.

pub mod xml;

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::field::Field;
use logweave_core::operator::{Operator, SharedOperator, StartContext};
use logweave_core::persist::Persister;

use self::xml::{EventXml, split_events};
use super::StartAt;
use crate::error::BuildError;
use crate::helper::{
    ConfigDuration, InputConfig, InputOperator, Workers, delegate_basic, delegate_builder,
    delegate_writer,
};
use crate::registry::{BuildContext, OperatorBuilder};

const DEFAULT_MAX_READS: usize = 100;
const DEFAULT_POLL_INTERVAL: ConfigDuration = ConfigDuration::from_secs(5);

// ─── Event source ───────────────────────────────────────────────────

/// 채널에서 렌더링된 이벤트 XML을 가져오는 인터페이스
pub trait EventSource: Send + Sync + 'static {
    /// 채널의 가장 최근 레코드 ID. 이벤트가 없으면 `None`입니다.
    fn latest_record_id(
        &self,
        channel: &str,
    ) -> impl Future<Output = Result<Option<u64>, OperatorError>> + Send;

    /// `after` 이후 이벤트를 오래된 순으로 최대 `max`개 가져옵니다.
    fn read(
        &self,
        channel: &str,
        after: Option<u64>,
        max: usize,
    ) -> impl Future<Output = Result<Vec<String>, OperatorError>> + Send;
}

/// `wevtutil qe`로 이벤트를 조회하는 기본 소스
#[derive(Debug, Clone, Default)]
pub struct Wevtutil;

impl Wevtutil {
    async fn query(&self, args: &[String]) -> Result<String, OperatorError> {
        let output = Command::new("wevtutil")
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| OperatorError::System(format!("failed to run wevtutil: {e}")))?;
        if !output.status.success() {
            return Err(OperatorError::System(format!(
                "wevtutil exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl EventSource for Wevtutil {
    async fn latest_record_id(&self, channel: &str) -> Result<Option<u64>, OperatorError> {
        let args = vec![
            "qe".to_owned(),
            channel.to_owned(),
            "/f:xml".to_owned(),
            "/rd:true".to_owned(),
            "/c:1".to_owned(),
        ];
        let output = self.query(&args).await?;
        Ok(split_events(&output)
            .first()
            .and_then(|event| EventXml::parse(event).ok())
            .map(|event| event.system.record_id))
    }

    async fn read(
        &self,
        channel: &str,
        after: Option<u64>,
        max: usize,
    ) -> Result<Vec<String>, OperatorError> {
        let mut args = vec![
            "qe".to_owned(),
            channel.to_owned(),
            "/f:RenderedXml".to_owned(),
            "/rd:false".to_owned(),
            format!("/c:{max}"),
        ];
        if let Some(after) = after {
            args.push(format!("/q:*[System[(EventRecordID > {after})]]"));
        }
        let output = self.query(&args).await?;
        Ok(split_events(&output).into_iter().map(str::to_owned).collect())
    }
}

// ─── Config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogInputConfig {
    #[serde(flatten)]
    pub input: InputConfig,
    #[serde(default)]
    pub channel: String,
    #[serde(default = "default_max_reads")]
    pub max_reads: usize,
    #[serde(default)]
    pub start_at: StartAt,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: ConfigDuration,
}

fn default_max_reads() -> usize {
    DEFAULT_MAX_READS
}

fn default_poll_interval() -> ConfigDuration {
    DEFAULT_POLL_INTERVAL
}

impl OperatorBuilder for EventLogInputConfig {
    delegate_builder!(input.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        Ok(vec![Arc::new(self.build_with_source(ctx, Wevtutil)?)])
    }
}

impl EventLogInputConfig {
    pub fn build_with_source<S: EventSource>(
        &self,
        ctx: &BuildContext<'_>,
        source: S,
    ) -> Result<EventLogInput<S>, BuildError> {
        if self.channel.is_empty() {
            return Err(BuildError::config("channel", "missing required parameter"));
        }
        if self.max_reads < 1 {
            return Err(BuildError::config("max_reads", "must be greater than zero"));
        }
        if self.poll_interval.get().is_zero() {
            return Err(BuildError::config("poll_interval", "must be greater than zero"));
        }

        Ok(EventLogInput {
            shared: Arc::new(Shared {
                input: self.input.build(ctx, Field::root()),
                source,
                channel: self.channel.clone(),
                max_reads: self.max_reads,
                start_at: self.start_at,
                poll_interval: self.poll_interval.get(),
                bookmark: Mutex::new(None),
            }),
            workers: Workers::new(),
        })
    }
}

// ─── Operator ───────────────────────────────────────────────────────

struct Shared<S> {
    input: InputOperator,
    source: S,
    channel: String,
    max_reads: usize,
    start_at: StartAt,
    poll_interval: Duration,
    bookmark: Mutex<Option<u64>>,
}

pub struct EventLogInput<S = Wevtutil> {
    shared: Arc<Shared<S>>,
    workers: Workers,
}

impl<S: EventSource> Operator for EventLogInput<S> {
    delegate_basic!(shared.input.basic);
    delegate_writer!(shared.input.writer);

    fn can_process(&self) -> bool {
        false
    }

    fn can_output(&self) -> bool {
        true
    }

    async fn start(&self, ctx: StartContext) -> Result<(), OperatorError> {
        let shared = &self.shared;
        ctx.persister
            .load()
            .map_err(|e| OperatorError::System(format!("failed to load bookmark: {e}")))?;

        let mut bookmark = ctx
            .persister
            .get(&shared.channel)
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .and_then(|text| text.trim().parse::<u64>().ok());
        if bookmark.is_none() && shared.start_at == StartAt::End {
            bookmark = shared.source.latest_record_id(&shared.channel).await.map_err(|e| {
                OperatorError::System(format!("failed to open channel '{}': {e}", shared.channel))
            })?;
        }
        debug!(channel = %shared.channel, ?bookmark, "opened event log channel");
        if let Ok(mut slot) = shared.bookmark.lock() {
            *slot = bookmark;
        }

        let cancel = self.workers.start(&ctx.cancel);
        self.workers.spawn(
            self.span(),
            read_on_interval(Arc::clone(shared), ctx.persister, cancel),
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

async fn read_on_interval<S: EventSource>(
    shared: Arc<Shared<S>>,
    persister: Arc<dyn Persister>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(shared.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        // 한 번에 `max_reads`개를 넘게 쌓였으면 바로 이어서 읽습니다.
        while read_batch(&shared, persister.as_ref(), &cancel).await >= shared.max_reads {
            if cancel.is_cancelled() {
                return;
            }
        }
    }
}

/// 이벤트 한 묶음을 처리하고 읽은 개수를 반환합니다.
async fn read_batch<S: EventSource>(
    shared: &Shared<S>,
    persister: &dyn Persister,
    cancel: &CancellationToken,
) -> usize {
    let after = shared.bookmark.lock().ok().and_then(|slot| *slot);
    let events = match shared.source.read(&shared.channel, after, shared.max_reads).await {
        Ok(events) => events,
        Err(e) => {
            warn!(channel = %shared.channel, error = %e, "failed to read events from channel");
            return 0;
        }
    };

    let count = events.len();
    let mut last = after;
    for raw in events {
        let event = match EventXml::parse(&raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "failed to decode event xml");
                continue;
            }
        };
        let record_id = event.system.record_id;
        if let Err(OperatorError::Cancelled) = shared.input.write(cancel, event.to_entry()).await {
            break;
        }
        last = Some(last.map_or(record_id, |prev| prev.max(record_id)));
    }

    if last != after {
        if let Some(record_id) = last {
            if let Ok(mut slot) = shared.bookmark.lock() {
                *slot = Some(record_id);
            }
            persister.set(&shared.channel, record_id.to_string().into_bytes());
            if let Err(e) = persister.sync() {
                warn!(error = %e, "failed to sync bookmark");
            }
        }
    }
    count
}
