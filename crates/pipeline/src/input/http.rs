//! HTTP 입력
//!
//! `POST`/`PUT /`로 받은 JSON 객체 하나를 엔트리 하나로 만듭니다.
//! 본문의 문자열 `message`는 `record.message`로, 나머지 키는 `record.body`로 갑니다.
//!
//! | 상황 | 상태 코드 |
//! |---|---|
//! | 성공 | 201 |
//! | JSON 디코딩 실패 | 400 |
//! | 인증 실패 | 403 |
//! | 본문이 `max_body_size` 초과 | 413 |
//! | 엔트리 생성 실패 | 500 |
//! | 하위 전달 실패(시스템 에러, `write_timeout` 초과) | 500 |
//!
//! 하위가 엔트리 에러를 돌려주면 `on_error` 정책으로 처리된 것으로 보고 201을 응답합니다.
//! 인증 헤더는 `http.header.*` 레이블에 복사하지 않습니다.
//! | `GET /health` | 200 |

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{AUTHORIZATION, HeaderMap, PROXY_AUTHORIZATION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument as _, debug, info, warn};

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::field::Field;
use logweave_core::metrics::{HTTP_REQUESTS_TOTAL, LABEL_STATUS};
use logweave_core::operator::{Operator, SharedOperator, StartContext};
use logweave_core::value::{Map, Value};

use super::tls::TlsConfig;
use crate::error::BuildError;
use crate::helper::{
    ConfigDuration, InputConfig, InputOperator, Workers, delegate_basic, delegate_builder,
    delegate_writer,
};
use crate::registry::{BuildContext, OperatorBuilder};

pub const DEFAULT_TIMEOUT: ConfigDuration = ConfigDuration::from_secs(20);
pub const DEFAULT_IDLE_TIMEOUT: ConfigDuration = ConfigDuration::from_secs(60);
pub const DEFAULT_MAX_BODY_SIZE: usize = 10_000_000;

type JsonObject = serde_json::Map<String, serde_json::Value>;

/// 인증 설정. 토큰 인증과 basic 인증은 함께 쓸 수 없습니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_header: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Auth {
    None,
    Token { header: String, tokens: Vec<String> },
    Basic { username: String, password: String },
}

impl AuthConfig {
    fn build(&self) -> Result<Auth, BuildError> {
        let basic = self.username.is_some() || self.password.is_some();
        match (&self.token_header, basic) {
            (Some(_), true) => Err(BuildError::config(
                "auth",
                "token and basic authentication are mutually exclusive",
            )),
            (Some(header), false) => {
                if self.tokens.is_empty() {
                    return Err(BuildError::config(
                        "auth.tokens",
                        "at least one token is required with token_header",
                    ));
                }
                Ok(Auth::Token {
                    header: header.clone(),
                    tokens: self.tokens.clone(),
                })
            }
            (None, true) => match (&self.username, &self.password) {
                (Some(username), Some(password))
                    if !username.is_empty() && !password.is_empty() =>
                {
                    Ok(Auth::Basic {
                        username: username.clone(),
                        password: password.clone(),
                    })
                }
                _ => Err(BuildError::config(
                    "auth",
                    "username and password must both be set",
                )),
            },
            (None, false) => Ok(Auth::None),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpInputConfig {
    #[serde(flatten)]
    pub input: InputConfig,
    #[serde(default)]
    pub listen_address: String,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: ConfigDuration,
    #[serde(default = "default_timeout")]
    pub read_timeout: ConfigDuration,
    #[serde(default = "default_timeout")]
    pub write_timeout: ConfigDuration,
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_idle_timeout() -> ConfigDuration {
    DEFAULT_IDLE_TIMEOUT
}

fn default_timeout() -> ConfigDuration {
    DEFAULT_TIMEOUT
}

fn default_max_body_size() -> usize {
    DEFAULT_MAX_BODY_SIZE
}

impl OperatorBuilder for HttpInputConfig {
    delegate_builder!(input.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        Ok(vec![Arc::new(self.build_input(ctx)?)])
    }
}

impl HttpInputConfig {
    pub fn build_input(&self, ctx: &BuildContext<'_>) -> Result<HttpInput, BuildError> {
        if self.listen_address.is_empty() {
            return Err(BuildError::config("listen_address", "missing required parameter"));
        }
        if self.max_body_size < 1 {
            return Err(BuildError::config("max_body_size", "cannot be less than 1 byte"));
        }
        let auth = self.auth.build()?;
        let acceptor = self.tls.build_acceptor()?;

        Ok(HttpInput {
            shared: Arc::new(Shared {
                input: self.input.build(ctx, Field::root()),
                auth,
                max_body_size: self.max_body_size,
                read_timeout: self.read_timeout.get(),
                write_timeout: self.write_timeout.get(),
            }),
            listen_address: self.listen_address.clone(),
            idle_timeout: self.idle_timeout.get(),
            acceptor,
            local_addr: Mutex::new(None),
            workers: Workers::new(),
        })
    }
}

struct Shared {
    input: InputOperator,
    auth: Auth,
    max_body_size: usize,
    read_timeout: Duration,
    write_timeout: Duration,
}

pub struct HttpInput {
    shared: Arc<Shared>,
    listen_address: String,
    idle_timeout: Duration,
    acceptor: Option<TlsAcceptor>,
    local_addr: Mutex<Option<SocketAddr>>,
    workers: Workers,
}

impl HttpInput {
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.lock().ok().and_then(|addr| *addr)
    }
}

impl Operator for HttpInput {
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
        info!(address = %addr, tls = self.acceptor.is_some(), "http input listening");

        let cancel = self.workers.start(&ctx.cancel);
        let server = Server {
            shared: Arc::clone(&self.shared),
            acceptor: self.acceptor.clone(),
            idle_timeout: self.idle_timeout,
        };
        self.workers.spawn(self.span(), server.run(listener, cancel));
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

// ─── 서버 루프 ──────────────────────────────────────────────────────

#[derive(Clone)]
struct Server {
    shared: Arc<Shared>,
    acceptor: Option<TlsAcceptor>,
    idle_timeout: Duration,
}

impl Server {
    async fn run(self, listener: TcpListener, cancel: CancellationToken) {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, peer)) => {
                        let host = match stream.local_addr() {
                            Ok(addr) => addr,
                            Err(e) => {
                                warn!(error = %e, "failed to read local address");
                                continue;
                            }
                        };
                        let server = self.clone();
                        let cancel = cancel.clone();
                        connections.spawn(
                            async move {
                                match &server.acceptor {
                                    Some(acceptor) => match acceptor.accept(stream).await {
                                        Ok(tls) => server.serve(tls, peer, host, cancel).await,
                                        Err(e) => {
                                            debug!(peer = %peer, error = %e, "tls handshake failed")
                                        }
                                    },
                                    None => server.serve(stream, peer, host, cancel).await,
                                }
                            }
                            .in_current_span(),
                        );
                    }
                    Err(e) => {
                        debug!(error = %e, "listener accept error");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = cancel.cancelled() => break,
            }
        }
        debug!("http server shutting down");
        while connections.join_next().await.is_some() {}
    }

    async fn serve<I>(&self, io: I, peer: SocketAddr, host: SocketAddr, cancel: CancellationToken)
    where
        I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let request_cancel = cancel.clone();
        let service = service_fn(move |req: Request<Incoming>| {
            let shared = Arc::clone(&shared);
            let cancel = request_cancel.clone();
            async move {
                let response = shared.handle(req, peer, host, &cancel).await;
                Ok::<_, Infallible>(response)
            }
        });

        let conn = http1::Builder::new()
            .timer(TokioTimer::new())
            .header_read_timeout(self.idle_timeout)
            .serve_connection(TokioIo::new(io), service);
        tokio::pin!(conn);

        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    debug!(peer = %peer, error = %e, "http connection error");
                }
            }
            _ = cancel.cancelled() => {
                conn.as_mut().graceful_shutdown();
                if let Err(e) = conn.await {
                    debug!(peer = %peer, error = %e, "http connection error during shutdown");
                }
            }
        }
    }
}

// ─── 요청 처리 ──────────────────────────────────────────────────────

fn respond(status: StatusCode) -> Response<Full<Bytes>> {
    metrics::counter!(HTTP_REQUESTS_TOTAL, LABEL_STATUS => status.as_u16().to_string()).increment(1);
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

impl Shared {
    async fn handle(
        &self,
        req: Request<Incoming>,
        peer: SocketAddr,
        host: SocketAddr,
        cancel: &CancellationToken,
    ) -> Response<Full<Bytes>> {
        if !self.authorized(req.headers()) {
            debug!(peer = %peer, "invalid authentication request");
            return respond(StatusCode::FORBIDDEN);
        }

        match (req.method(), req.uri().path()) {
            (&Method::GET, "/health") => respond(StatusCode::OK),
            (&Method::POST | &Method::PUT, "/") => self.handle_entry(req, peer, host, cancel).await,
            (_, "/" | "/health") => respond(StatusCode::METHOD_NOT_ALLOWED),
            _ => respond(StatusCode::NOT_FOUND),
        }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        match &self.auth {
            Auth::None => true,
            Auth::Token { header, tokens } => headers
                .get(header.as_str())
                .and_then(|v| v.to_str().ok())
                .is_some_and(|token| tokens.iter().any(|t| t == token)),
            Auth::Basic { username, password } => basic_credentials(headers)
                .is_some_and(|(u, p)| &u == username && &p == password),
        }
    }

    async fn handle_entry(
        &self,
        req: Request<Incoming>,
        peer: SocketAddr,
        host: SocketAddr,
        cancel: &CancellationToken,
    ) -> Response<Full<Bytes>> {
        let version = format!("{:?}", req.version());
        let headers = req.headers().clone();
        let body = Limited::new(req.into_body(), self.max_body_size);
        let collected = match tokio::time::timeout(self.read_timeout, body.collect()).await {
            Ok(Ok(collected)) => collected.to_bytes(),
            Ok(Err(e)) if e.downcast_ref::<LengthLimitError>().is_some() => {
                warn!(peer = %peer, "request body too large");
                return respond(StatusCode::PAYLOAD_TOO_LARGE);
            }
            Ok(Err(e)) => {
                warn!(peer = %peer, error = %e, "failed to read request body");
                return respond(StatusCode::BAD_REQUEST);
            }
            Err(_) => {
                warn!(peer = %peer, "timed out reading request body");
                return respond(StatusCode::REQUEST_TIMEOUT);
            }
        };

        let body: JsonObject = match serde_json::from_slice(&collected) {
            Ok(body) => body,
            Err(e) => {
                warn!(peer = %peer, error = %e, "failed to decode request body");
                return respond(StatusCode::BAD_REQUEST);
            }
        };

        let mut entry = match self.input.new_entry(split_payload(body)) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(peer = %peer, error = %e, "failed to create entry");
                return respond(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };
        add_request_labels(&mut entry, peer, host, &version);
        self.add_header_labels(&mut entry, &headers);

        match tokio::time::timeout(self.write_timeout, self.input.write(cancel, entry)).await {
            Ok(Ok(())) => respond(StatusCode::CREATED),
            Ok(Err(e)) if e.is_user() => {
                debug!(peer = %peer, error = %e, "entry rejected downstream");
                respond(StatusCode::CREATED)
            }
            Ok(Err(e)) => {
                warn!(peer = %peer, error = %e, "failed to deliver entry");
                respond(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Err(_) => {
                warn!(peer = %peer, "timed out delivering entry");
                respond(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// 요청 헤더를 `http.header.<name>` 레이블로 복사합니다. 같은 이름은 쉼표로 합칩니다.
    fn add_header_labels(&self, entry: &mut Entry, headers: &HeaderMap) {
        let mut merged: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (name, value) in headers {
            if self.is_credential(name.as_str()) {
                continue;
            }
            if let Ok(value) = value.to_str() {
                merged.entry(name.as_str()).or_default().push(value);
            }
        }
        for (name, values) in merged {
            entry.add_label(format!("http.header.{name}"), values.join(","));
        }
    }

    fn is_credential(&self, name: &str) -> bool {
        if name.eq_ignore_ascii_case(AUTHORIZATION.as_str())
            || name.eq_ignore_ascii_case(PROXY_AUTHORIZATION.as_str())
        {
            return true;
        }
        match &self.auth {
            Auth::Token { header, .. } => name.eq_ignore_ascii_case(header),
            Auth::None | Auth::Basic { .. } => false,
        }
    }
}

/// `Authorization: Basic ...` 헤더를 디코딩합니다.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_owned(), pass.to_owned()))
}

/// 문자열 `message`는 최상위로, 나머지는 `body` 아래로 옮깁니다.
fn split_payload(mut body: JsonObject) -> Value {
    let mut payload = Map::new();
    if let Some(serde_json::Value::String(message)) = body.get("message") {
        payload.insert("message".into(), Value::from(message.as_str()));
        body.remove("message");
    }
    if !body.is_empty() {
        payload.insert("body".into(), Value::from(serde_json::Value::Object(body)));
    }
    Value::Map(payload)
}

fn add_request_labels(entry: &mut Entry, peer: SocketAddr, host: SocketAddr, version: &str) {
    entry.add_label("net.peer.ip", peer.ip().to_string());
    entry.add_label("net.peer.port", peer.port().to_string());
    entry.add_label("net.host.ip", host.ip().to_string());
    entry.add_label("net.host.port", host.port().to_string());
    if let Some((protocol, protocol_version)) = version.split_once('/') {
        entry.add_label("protocol", protocol);
        entry.add_label("protocol_version", protocol_version);
    }
}
