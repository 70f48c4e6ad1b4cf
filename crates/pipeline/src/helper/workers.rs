//! 오퍼레이터 소유 워커 태스크 관리
//!
//! `start`에서 파이프라인 토큰의 자식 토큰을 만들고 태스크를 띄웁니다.
//! `stop`은 토큰을 취소한 뒤 제한 시간 안에 태스크 종료를 기다립니다.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

/// 정지 시 워커 종료를 기다리는 최대 시간
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// 워커 태스크 집합
#[derive(Default)]
pub struct Workers {
    cancel: Mutex<Option<CancellationToken>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Workers {
    pub fn new() -> Self {
        Self::default()
    }

    /// 자식 취소 토큰을 만들어 보관하고 반환합니다.
    pub fn start(&self, parent: &CancellationToken) -> CancellationToken {
        let token = parent.child_token();
        if let Ok(mut slot) = self.cancel.lock() {
            *slot = Some(token.clone());
        }
        token
    }

    /// 현재 토큰. `start` 전이면 이미 취소된 토큰입니다.
    pub fn token(&self) -> CancellationToken {
        match self.cancel.lock().ok().and_then(|slot| slot.clone()) {
            Some(token) => token,
            None => {
                let token = CancellationToken::new();
                token.cancel();
                token
            }
        }
    }

    /// span 안에서 태스크를 띄웁니다.
    pub fn spawn<F>(&self, span: &Span, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task.instrument(span.clone()));
        if let Ok(mut handles) = self.handles.lock() {
            handles.retain(|h| !h.is_finished());
            handles.push(handle);
        }
    }

    /// 취소 후 모든 태스크를 기다립니다. 두 번 호출해도 안전합니다.
    pub async fn stop(&self, span: &Span) {
        if let Some(token) = self.cancel.lock().ok().and_then(|mut slot| slot.take()) {
            token.cancel();
        }
        let handles: Vec<JoinHandle<()>> = match self.handles.lock() {
            Ok(mut handles) => handles.drain(..).collect(),
            Err(_) => Vec::new(),
        };

        let deadline = tokio::time::Instant::now() + STOP_TIMEOUT;
        for mut handle in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_panic() => {
                    span.in_scope(|| tracing::error!(error = %e, "worker task panicked"));
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    span.in_scope(|| tracing::warn!("worker task did not exit in time, abandoning"));
                    handle.abort();
                }
            }
        }
    }
}
