//! TCP 입력
//!
//! 줄 단위 텍스트를 수신합니다. 연결마다 태스크 하나가 읽고,
//! `max_buffer_size`를 넘는 줄을 받으면 해당 연결을 닫습니다.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument as _, debug, info, warn};

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::field::Field;
use logweave_core::operator::{Operator, SharedOperator, StartContext};

use super::tls::TlsConfig;
use super::{add_net_labels, trim_line_ending};
use crate::error::BuildError;
use crate::helper::{InputConfig, InputOperator, Workers, delegate_basic, delegate_builder, delegate_writer};
use crate::registry::{BuildContext, OperatorBuilder};

/// 허용되는 최소 버퍼 크기
pub const MIN_BUFFER_SIZE: usize = 64 * 1024;

/// 기본 최대 버퍼 크기
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;

const DEFAULT_MAX_CONNECTIONS: usize = 256;

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(100);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpInputConfig {
    #[serde(flatten)]
    pub input: InputConfig,
    #[serde(default)]
    pub listen_address: String,
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub add_labels: bool,
}

fn default_max_buffer_size() -> usize {
    DEFAULT_MAX_BUFFER_SIZE
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

impl OperatorBuilder for TcpInputConfig {
    delegate_builder!(input.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        Ok(vec![Arc::new(self.build_input(ctx)?)])
    }
}

impl TcpInputConfig {
    pub fn build_input(&self, ctx: &BuildContext<'_>) -> Result<TcpInput, BuildError> {
        if self.listen_address.is_empty() {
            return Err(BuildError::config("listen_address", "missing required parameter"));
        }
        if self.max_buffer_size < MIN_BUFFER_SIZE {
            return Err(BuildError::config(
                "max_buffer_size",
                format!("must be equal to or greater than {MIN_BUFFER_SIZE} bytes"),
            ));
        }
        if self.max_connections == 0 {
            return Err(BuildError::config("max_connections", "must be at least 1"));
        }
        let acceptor = self.tls.build_acceptor()?;

        Ok(TcpInput {
            shared: Arc::new(Shared {
                input: self.input.build(ctx, Field::record(["message"])),
                max_buffer_size: self.max_buffer_size,
                add_labels: self.add_labels,
                acceptor,
            }),
            listen_address: self.listen_address.clone(),
            max_connections: self.max_connections,
            local_addr: Mutex::new(None),
            workers: Workers::new(),
        })
    }
}

struct Shared {
    input: InputOperator,
    max_buffer_size: usize,
    add_labels: bool,
    acceptor: Option<TlsAcceptor>,
}

pub struct TcpInput {
    shared: Arc<Shared>,
    listen_address: String,
    max_connections: usize,
    local_addr: Mutex<Option<SocketAddr>>,
    workers: Workers,
}

impl TcpInput {
    /// 바인드된 주소. `start` 전이면 `None`입니다.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.lock().ok().and_then(|addr| *addr)
    }
}

impl Operator for TcpInput {
    delegate_basic!(shared.input.basic);
    delegate_writer!(shared.input.writer);

    fn can_process(&self) -> bool {
        false
    }

    fn can_output(&self) -> bool {
        true
    }

    async fn start(&self, ctx: StartContext) -> Result<(), OperatorError> {
        let listener = TcpListener::bind(&self.listen_address).await.map_err(|e| {
            OperatorError::System(format!("failed to listen on {}: {e}", self.listen_address))
        })?;
        let addr = listener.local_addr()?;
        if let Ok(mut slot) = self.local_addr.lock() {
            *slot = Some(addr);
        }
        info!(address = %addr, tls = self.shared.acceptor.is_some(), "tcp input listening");

        let cancel = self.workers.start(&ctx.cancel);
        let shared = Arc::clone(&self.shared);
        let limit = Arc::new(Semaphore::new(self.max_connections));
        self.workers
            .spawn(self.span(), accept_loop(shared, listener, limit, cancel));
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

async fn accept_loop(
    shared: Arc<Shared>,
    listener: TcpListener,
    limit: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    let mut connections = JoinSet::new();
    let mut backoff = ACCEPT_BACKOFF_MIN;

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        debug!(error = %e, "listener accept error");
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = cancel.cancelled() => break,
                        }
                        backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
                        continue;
                    }
                };
                backoff = ACCEPT_BACKOFF_MIN;

                let Ok(permit) = Arc::clone(&limit).try_acquire_owned() else {
                    warn!(peer = %peer, "max connections reached, rejecting connection");
                    continue;
                };
                debug!(peer = %peer, "received connection");

                let shared = Arc::clone(&shared);
                let cancel = cancel.clone();
                connections.spawn(
                    async move {
                        handle_connection(shared, stream, peer, cancel).await;
                        drop(permit);
                    }
                    .in_current_span(),
                );
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = cancel.cancelled() => break,
        }
    }

    while connections.join_next().await.is_some() {}
}

async fn handle_connection(shared: Arc<Shared>, stream: TcpStream, peer: SocketAddr, cancel: CancellationToken) {
    let host = match stream.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            warn!(peer = %peer, error = %e, "failed to read local address");
            return;
        }
    };

    match &shared.acceptor {
        Some(acceptor) => {
            let accepted = tokio::select! {
                result = acceptor.accept(stream) => result,
                _ = cancel.cancelled() => return,
            };
            match accepted {
                Ok(tls) => read_lines(&shared, tls, peer, host, &cancel).await,
                Err(e) => warn!(peer = %peer, error = %e, "tls handshake failed"),
            }
        }
        None => read_lines(&shared, stream, peer, host, &cancel).await,
    }
    debug!(peer = %peer, "closing connection");
}

async fn read_lines<S>(shared: &Shared, stream: S, peer: SocketAddr, host: SocketAddr, cancel: &CancellationToken)
where
    S: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line = Vec::with_capacity(1024);
    let limit = shared.max_buffer_size as u64 + 1;

    loop {
        line.clear();
        let mut limited = (&mut reader).take(limit);
        let read = tokio::select! {
            result = limited.read_until(b'\n', &mut line) => result,
            _ = cancel.cancelled() => return,
        };

        match read {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) => {
                warn!(peer = %peer, error = %e, "read error");
                return;
            }
        }
        if line.len() > shared.max_buffer_size && line.last() != Some(&b'\n') {
            warn!(
                peer = %peer,
                max_buffer_size = shared.max_buffer_size,
                "message exceeds max buffer size, closing connection"
            );
            return;
        }

        let text = String::from_utf8_lossy(trim_line_ending(&line)).into_owned();
        let mut entry = match shared.input.new_entry(text) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "failed to create entry");
                continue;
            }
        };
        if shared.add_labels {
            add_net_labels(&mut entry, "IP.TCP", peer, host);
        }
        if let Err(e) = shared.input.write(cancel, entry).await {
            warn!(error = %e, "failed to deliver entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::testutil::Collector;
    use logweave_core::persist::{MemoryDatabase, ScopedPersister};
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    fn build(yaml: &str) -> Result<TcpInput, BuildError> {
        let config: TcpInputConfig = serde_yaml::from_str(yaml).unwrap();
        let registry = Registry::empty();
        config.build_input(&BuildContext::new(&registry))
    }

    async fn started(yaml: &str) -> (TcpInput, Arc<Collector>) {
        let tcp = build(yaml).unwrap();
        let out = Arc::new(Collector::new("out"));
        tcp.set_outputs(vec![out.clone()]).unwrap();
        tcp.start(StartContext {
            cancel: CancellationToken::new(),
            persister: Arc::new(ScopedPersister::new(Arc::new(MemoryDatabase::new()), "tcp")),
        })
        .await
        .unwrap();
        (tcp, out)
    }

    #[test]
    fn config_validation() {
        assert!(build("type: tcp_input").is_err());
        assert!(build("type: tcp_input\nlisten_address: 127.0.0.1:0\nmax_buffer_size: 1024").is_err());
        assert!(build("type: tcp_input\nlisten_address: 127.0.0.1:0\nmax_connections: 0").is_err());
        assert!(build("type: tcp_input\nlisten_address: 127.0.0.1:0").is_ok());
    }

    #[tokio::test]
    async fn receives_lines_with_labels() {
        let (tcp, out) = started(
            "type: tcp_input\nlisten_address: 127.0.0.1:0\nadd_labels: true\noutput: out",
        )
        .await;

        let addr = tcp.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"first\r\nsecond\n").await.unwrap();
        client.flush().await.unwrap();

        out.wait_for(2).await;
        tcp.stop().await.unwrap();

        let entries = out.entries();
        assert_eq!(entries[0].record.to_json(), json!({"message": "first"}));
        assert_eq!(entries[1].record.to_json(), json!({"message": "second"}));
        assert_eq!(entries[0].labels["net.transport"], "IP.TCP");
        assert_eq!(entries[0].labels["net.host.port"], addr.port().to_string());
    }

    #[tokio::test]
    async fn oversized_line_closes_connection() {
        let (mut tcp, out) = (
            build("type: tcp_input\nlisten_address: 127.0.0.1:0\noutput: out").unwrap(),
            Arc::new(Collector::new("out")),
        );
        // 최소값 검증을 거치지 않고 작은 버퍼로 바꿉니다.
        if let Some(shared) = Arc::get_mut(&mut tcp.shared) {
            shared.max_buffer_size = 8;
        }
        tcp.set_outputs(vec![out.clone()]).unwrap();
        tcp.start(StartContext {
            cancel: CancellationToken::new(),
            persister: Arc::new(ScopedPersister::new(Arc::new(MemoryDatabase::new()), "tcp")),
        })
        .await
        .unwrap();

        let mut client = TcpStream::connect(tcp.local_addr().unwrap()).await.unwrap();
        client.write_all(b"ok\n0123456789abcdef\nlost\n").await.unwrap();

        out.wait_for(1).await;
        let mut buf = [0u8; 1];
        // 서버가 연결을 닫으면 EOF 또는 reset을 받습니다.
        let _ = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf)).await;
        tcp.stop().await.unwrap();

        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn stop_closes_open_connections() {
        let (tcp, _out) = started("type: tcp_input\nlisten_address: 127.0.0.1:0\noutput: out").await;
        let _client = TcpStream::connect(tcp.local_addr().unwrap()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), tcp.stop())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn process_is_rejected() {
        let tcp = build("type: tcp_input\nlisten_address: 127.0.0.1:0").unwrap();
        let err = tcp.process(&CancellationToken::new(), Entry::new()).await.unwrap_err();
        assert!(matches!(err, OperatorError::CannotProcess { .. }));
    }
}
