//! 토큰 버킷 속도 제한
//!
//! 틱마다 토큰 하나를 용량 `burst`의 채널에 넣습니다. 시작 시 `burst`개를 미리 채웁니다.
//! `process`는 토큰을 받을 때까지 호출자를 붙잡아 두므로 상류에 배압이 걸립니다.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::operator::{Operator, SharedOperator, StartContext};

use crate::error::BuildError;
use crate::helper::{
    ConfigDuration, TransformerConfig, TransformerOperator, Workers, delegate_basic,
    delegate_builder, delegate_writer,
};
use crate::registry::{BuildContext, OperatorBuilder};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(flatten)]
    pub transformer: TransformerConfig,
    /// 초당 엔트리 수
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    /// 엔트리 사이 간격
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<ConfigDuration>,
    #[serde(default)]
    pub burst: usize,
}

impl RateLimitConfig {
    fn tick_interval(&self) -> Result<Duration, BuildError> {
        match (self.rate, self.interval) {
            (Some(_), Some(_)) => Err(BuildError::config(
                "rate",
                "only one of 'rate' or 'interval' can be defined",
            )),
            (None, None) => Err(BuildError::config(
                "rate",
                "must specify either 'rate' or 'interval'",
            )),
            (Some(rate), None) if rate.is_finite() && rate > 0.0 => {
                Ok(Duration::from_secs_f64(1.0 / rate))
            }
            (Some(rate), None) => Err(BuildError::config(
                "rate",
                format!("must be a positive number, got {rate}"),
            )),
            (None, Some(interval)) if interval.get().is_zero() => {
                Err(BuildError::config("interval", "must be greater than zero"))
            }
            (None, Some(interval)) => Ok(interval.get()),
        }
    }
}

impl OperatorBuilder for RateLimitConfig {
    delegate_builder!(transformer.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        Ok(vec![Arc::new(RateLimitOperator {
            transformer: self.transformer.build(ctx),
            interval: self.tick_interval()?,
            burst: self.burst,
            tokens: Mutex::new(None),
            workers: Workers::new(),
        })])
    }
}

pub struct RateLimitOperator {
    transformer: TransformerOperator,
    interval: Duration,
    burst: usize,
    tokens: Mutex<Option<mpsc::Receiver<()>>>,
    workers: Workers,
}

impl RateLimitOperator {
    /// 토큰 하나를 기다립니다. 틱 태스크가 끝났고 남은 토큰이 없으면 `false`입니다.
    async fn take_token(&self) -> Result<bool, OperatorError> {
        let mut guard = self.tokens.lock().await;
        let rx = guard.as_mut().ok_or_else(|| OperatorError::Closed {
            operator: self.transformer.id().to_owned(),
        })?;
        Ok(rx.recv().await.is_some())
    }
}

async fn refill(tx: mpsc::Sender<()>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // 첫 틱은 즉시 완료됩니다. 버스트는 이미 채워져 있습니다.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = tx.send(()) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!("rate limit ticker stopped");
}

impl Operator for RateLimitOperator {
    delegate_basic!(transformer.basic);
    delegate_writer!(transformer.writer);

    fn can_process(&self) -> bool {
        true
    }

    fn can_output(&self) -> bool {
        true
    }

    async fn start(&self, ctx: StartContext) -> Result<(), OperatorError> {
        let (tx, rx) = mpsc::channel(self.burst.max(1));
        for _ in 0..self.burst {
            if tx.try_send(()).is_err() {
                break;
            }
        }
        *self.tokens.lock().await = Some(rx);

        let cancel = self.workers.start(&ctx.cancel);
        self.workers
            .spawn(self.transformer.basic.span(), refill(tx, self.interval, cancel));
        tracing::debug!(
            interval_ms = self.interval.as_millis() as u64,
            burst = self.burst,
            "rate limit started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), OperatorError> {
        self.workers.stop(self.transformer.basic.span()).await;
        Ok(())
    }

    async fn process(&self, cancel: &CancellationToken, entry: Entry) -> Result<(), OperatorError> {
        let acquired = tokio::select! {
            _ = cancel.cancelled() => return Err(OperatorError::Cancelled),
            acquired = self.take_token() => acquired?,
        };
        if !acquired {
            return Err(OperatorError::Closed {
                operator: self.transformer.id().to_owned(),
            });
        }
        self.transformer.writer.write(cancel, entry).await
    }
}
