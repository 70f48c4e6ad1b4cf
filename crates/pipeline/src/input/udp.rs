//! UDP 입력
//!
//! 데이터그램 하나를 줄 단위로 나눠 엔트리로 만듭니다. 끝의 제어 문자는 버립니다.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::field::Field;
use logweave_core::operator::{Operator, SharedOperator, StartContext};

use super::add_net_labels;
use crate::error::BuildError;
use crate::helper::{InputConfig, InputOperator, Workers, delegate_basic, delegate_builder, delegate_writer};
use crate::registry::{BuildContext, OperatorBuilder};

/// 데이터그램 수신 버퍼 크기
const DATAGRAM_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpInputConfig {
    #[serde(flatten)]
    pub input: InputConfig,
    #[serde(default)]
    pub listen_address: String,
    #[serde(default)]
    pub add_labels: bool,
}

impl OperatorBuilder for UdpInputConfig {
    delegate_builder!(input.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        Ok(vec![Arc::new(self.build_input(ctx)?)])
    }
}

impl UdpInputConfig {
    pub fn build_input(&self, ctx: &BuildContext<'_>) -> Result<UdpInput, BuildError> {
        if self.listen_address.is_empty() {
            return Err(BuildError::config("listen_address", "missing required parameter"));
        }
        Ok(UdpInput {
            shared: Arc::new(Shared {
                input: self.input.build(ctx, Field::record(["message"])),
                add_labels: self.add_labels,
            }),
            listen_address: self.listen_address.clone(),
            local_addr: Mutex::new(None),
            workers: Workers::new(),
        })
    }
}

struct Shared {
    input: InputOperator,
    add_labels: bool,
}

pub struct UdpInput {
    shared: Arc<Shared>,
    listen_address: String,
    local_addr: Mutex<Option<SocketAddr>>,
    workers: Workers,
}

impl UdpInput {
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.lock().ok().and_then(|addr| *addr)
    }
}

impl Operator for UdpInput {
    delegate_basic!(shared.input.basic);
    delegate_writer!(shared.input.writer);

    fn can_process(&self) -> bool {
        false
    }

    fn can_output(&self) -> bool {
        true
    }

    async fn start(&self, ctx: StartContext) -> Result<(), OperatorError> {
        let socket = UdpSocket::bind(&self.listen_address).await.map_err(|e| {
            OperatorError::System(format!("failed to open connection on {}: {e}", self.listen_address))
        })?;
        let addr = socket.local_addr()?;
        if let Ok(mut slot) = self.local_addr.lock() {
            *slot = Some(addr);
        }
        info!(address = %addr, "udp input listening");

        let cancel = self.workers.start(&ctx.cancel);
        self.workers
            .spawn(self.span(), receive_loop(Arc::clone(&self.shared), socket, cancel));
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

async fn receive_loop(shared: Arc<Shared>, socket: UdpSocket, cancel: CancellationToken) {
    let host = socket.local_addr().ok();
    let mut buf = vec![0u8; DATAGRAM_BUFFER_SIZE];

    loop {
        let (n, peer) = tokio::select! {
            result = socket.recv_from(&mut buf) => match result {
                Ok(received) => received,
                Err(e) => {
                    warn!(error = %e, "failed reading messages");
                    continue;
                }
            },
            _ = cancel.cancelled() => return,
        };

        for line in split_datagram(&buf[..n]) {
            let mut entry = match shared.input.new_entry(String::from_utf8_lossy(line).into_owned()) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "failed to create entry");
                    continue;
                }
            };
            if shared.add_labels {
                if let Some(host) = host {
                    add_net_labels(&mut entry, "IP.UDP", peer, host);
                }
            }
            if let Err(e) = shared.input.write(&cancel, entry).await {
                warn!(error = %e, "failed to deliver entry");
            }
        }
    }
}

/// 끝의 제어 문자를 버리고 줄 단위로 나눕니다. 빈 줄은 건너뜁니다.
fn split_datagram(datagram: &[u8]) -> impl Iterator<Item = &[u8]> {
    let end = datagram
        .iter()
        .rposition(|b| *b >= 32)
        .map_or(0, |last| last + 1);
    datagram[..end]
        .split(|b| *b == b'\n')
        .map(super::trim_line_ending)
        .filter(|line| !line.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::testutil::Collector;
    use logweave_core::persist::{MemoryDatabase, ScopedPersister};
    use serde_json::json;

    #[test]
    fn datagram_splitting() {
        let lines: Vec<&[u8]> = split_datagram(b"a\r\nb\n\nc\n\0\0").collect();
        assert_eq!(lines, vec![&b"a"[..], &b"b"[..], &b"c"[..]]);
        assert_eq!(split_datagram(b"\n\n").count(), 0);
    }

    #[test]
    fn listen_address_is_required() {
        let config: UdpInputConfig = serde_yaml::from_str("type: udp_input").unwrap();
        let registry = Registry::empty();
        assert!(config.build_input(&BuildContext::new(&registry)).is_err());
    }

    #[tokio::test]
    async fn receives_datagrams() {
        let config: UdpInputConfig = serde_yaml::from_str(
            "type: udp_input\nlisten_address: 127.0.0.1:0\nadd_labels: true\noutput: out",
        )
        .unwrap();
        let registry = Registry::empty();
        let udp = config.build_input(&BuildContext::new(&registry)).unwrap();
        let out = Arc::new(Collector::new("out"));
        udp.set_outputs(vec![out.clone()]).unwrap();
        udp.start(StartContext {
            cancel: CancellationToken::new(),
            persister: Arc::new(ScopedPersister::new(Arc::new(MemoryDatabase::new()), "udp")),
        })
        .await
        .unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(b"hello udp\n", udp.local_addr().unwrap())
            .await
            .unwrap();

        let entries = out.wait_for(1).await;
        udp.stop().await.unwrap();

        assert_eq!(entries[0].record.to_json(), json!({"message": "hello udp"}));
        assert_eq!(entries[0].labels["net.transport"], "IP.UDP");
        assert_eq!(
            entries[0].labels["net.peer.port"],
            client.local_addr().unwrap().port().to_string()
        );
    }
}
