//! 입력 오퍼레이터
//!
//! 입력은 `start`에서 워커 태스크를 띄워 외부 소스를 읽고, `write_to` 필드에 값을 담은
//! 엔트리를 하위로 보냅니다. 하위 전달 실패는 로그로만 남깁니다.

pub mod file;
pub mod generate;
pub mod http;
pub mod journald;
pub mod tcp;
pub mod tls;
pub mod udp;
pub mod windows;

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use logweave_core::entry::Entry;

/// 저장된 위치가 없을 때 읽기 시작 위치
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartAt {
    Beginning,
    #[default]
    End,
}

/// 피어와 호스트 주소 레이블을 붙입니다.
pub(crate) fn add_net_labels(entry: &mut Entry, transport: &str, peer: SocketAddr, host: SocketAddr) {
    entry.add_label("net.transport", transport);
    entry.add_label("net.peer.ip", peer.ip().to_string());
    entry.add_label("net.peer.port", peer.port().to_string());
    entry.add_label("net.host.ip", host.ip().to_string());
    entry.add_label("net.host.port", host.port().to_string());
}

/// 줄 끝의 `\r\n`을 제거합니다.
pub(crate) fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_endings_are_trimmed() {
        assert_eq!(trim_line_ending(b"a\r\n"), b"a");
        assert_eq!(trim_line_ending(b"a\n"), b"a");
        assert_eq!(trim_line_ending(b"a"), b"a");
    }

    #[test]
    fn start_at_names() {
        let start: StartAt = serde_yaml::from_str("beginning").unwrap();
        assert_eq!(start, StartAt::Beginning);
        assert_eq!(StartAt::default(), StartAt::End);
        assert!(serde_yaml::from_str::<StartAt>("middle").is_err());
    }

    #[test]
    fn net_labels() {
        let mut entry = Entry::new();
        add_net_labels(
            &mut entry,
            "IP.TCP",
            "10.0.0.1:5000".parse().unwrap(),
            "127.0.0.1:514".parse().unwrap(),
        );
        assert_eq!(entry.labels["net.peer.ip"], "10.0.0.1");
        assert_eq!(entry.labels["net.host.port"], "514");
        assert_eq!(entry.labels["net.transport"], "IP.TCP");
    }
}
