//! 호스트 정보 레이블
//!
//! 빌드 시점에 호스트 이름과 첫 번째 비루프백 인터페이스 주소를 한 번 조회하고,
//! 모든 엔트리에 `hostname`, `ip` 레이블로 붙입니다. 주소는 IPv4를 우선합니다.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::operator::{Operator, SharedOperator};

use crate::error::BuildError;
use crate::helper::{TransformerConfig, TransformerOperator, delegate_basic, delegate_builder, delegate_writer};
use crate::registry::{BuildContext, OperatorBuilder};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostMetadataConfig {
    #[serde(flatten)]
    pub transformer: TransformerConfig,
    #[serde(default = "enabled")]
    pub include_hostname: bool,
    #[serde(default = "enabled")]
    pub include_ip: bool,
}

fn enabled() -> bool {
    true
}

impl OperatorBuilder for HostMetadataConfig {
    delegate_builder!(transformer.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        let hostname = self.include_hostname.then(local_hostname).transpose()?;
        let ip = self.include_ip.then(local_ip).transpose()?;
        debug!(hostname = ?hostname, ip = ?ip, "resolved host metadata");
        Ok(vec![Arc::new(HostMetadata {
            transformer: self.transformer.build(ctx),
            hostname,
            ip,
        })])
    }
}

#[cfg(unix)]
fn local_hostname() -> Result<String, BuildError> {
    let name = nix::unistd::gethostname()
        .map_err(|e| BuildError::config("include_hostname", format!("get hostname: {e}")))?;
    name.into_string()
        .map_err(|_| BuildError::config("include_hostname", "hostname is not valid UTF-8"))
}

#[cfg(not(unix))]
fn local_hostname() -> Result<String, BuildError> {
    std::env::var("COMPUTERNAME")
        .map_err(|e| BuildError::config("include_hostname", format!("get hostname: {e}")))
}

#[cfg(unix)]
fn local_ip() -> Result<String, BuildError> {
    use nix::net::if_::InterfaceFlags;

    let interfaces = nix::ifaddrs::getifaddrs()
        .map_err(|e| BuildError::config("include_ip", format!("list interfaces: {e}")))?;
    let mut v6 = None;
    for interface in interfaces {
        if interface.flags.contains(InterfaceFlags::IFF_LOOPBACK)
            || !interface.flags.contains(InterfaceFlags::IFF_UP)
        {
            continue;
        }
        let Some(address) = interface.address else {
            continue;
        };
        if let Some(v4) = address.as_sockaddr_in() {
            return Ok(v4.ip().to_string());
        }
        if let Some(addr) = address.as_sockaddr_in6() {
            v6.get_or_insert_with(|| addr.ip().to_string());
        }
    }
    v6.ok_or_else(|| {
        BuildError::config(
            "include_ip",
            "no running non-loopback interface with an assigned address",
        )
    })
}

#[cfg(not(unix))]
fn local_ip() -> Result<String, BuildError> {
    Err(BuildError::config(
        "include_ip",
        "interface addresses are not available on this platform",
    ))
}

pub struct HostMetadata {
    transformer: TransformerOperator,
    hostname: Option<String>,
    ip: Option<String>,
}

impl HostMetadata {
    fn apply(&self, entry: &mut Entry) {
        if let Some(hostname) = &self.hostname {
            entry.add_label("hostname", hostname.as_str());
        }
        if let Some(ip) = &self.ip {
            entry.add_label("ip", ip.as_str());
        }
    }
}

impl Operator for HostMetadata {
    delegate_basic!(transformer.basic);
    delegate_writer!(transformer.writer);

    fn can_process(&self) -> bool {
        true
    }

    fn can_output(&self) -> bool {
        true
    }

    async fn process(&self, cancel: &CancellationToken, entry: Entry) -> Result<(), OperatorError> {
        self.transformer
            .process_with(cancel, entry, |entry| {
                self.apply(entry);
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::testutil::Collector;

    fn host_metadata(hostname: Option<&str>, ip: Option<&str>) -> (HostMetadata, Arc<Collector>) {
        let config: HostMetadataConfig =
            serde_yaml::from_str("type: host_metadata\noutput: out").unwrap();
        let registry = Registry::empty();
        let op = HostMetadata {
            transformer: config.transformer.build(&BuildContext::new(&registry)),
            hostname: hostname.map(str::to_owned),
            ip: ip.map(str::to_owned),
        };
        let out = Arc::new(Collector::new("out"));
        op.set_outputs(vec![out.clone()]).unwrap();
        (op, out)
    }

    #[test]
    fn defaults_include_everything() {
        let config: HostMetadataConfig = serde_yaml::from_str("type: host_metadata").unwrap();
        assert!(config.include_hostname);
        assert!(config.include_ip);
    }

    #[tokio::test]
    async fn labels_are_added() {
        let (op, out) = host_metadata(Some("web-1"), Some("10.0.0.5"));
        let mut entry = Entry::with_record("x");
        entry.add_label("hostname", "stale");
        op.process(&CancellationToken::new(), entry).await.unwrap();

        let got = out.entries();
        assert_eq!(got[0].labels["hostname"], "web-1");
        assert_eq!(got[0].labels["ip"], "10.0.0.5");
    }

    #[tokio::test]
    async fn disabled_parts_are_skipped() {
        let (op, out) = host_metadata(None, None);
        op.process(&CancellationToken::new(), Entry::with_record("x"))
            .await
            .unwrap();
        assert!(out.entries()[0].labels.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn hostname_is_resolved_at_build() {
        let config: HostMetadataConfig =
            serde_yaml::from_str("type: host_metadata\ninclude_ip: false").unwrap();
        let registry = Registry::empty();
        assert!(config.build(&BuildContext::new(&registry)).is_ok());
        assert!(!local_hostname().unwrap().is_empty());
    }
}
