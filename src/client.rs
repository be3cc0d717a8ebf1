//! HTTP 클라이언트 모듈 — 요청 전송과 일시적 실패 재시도
//!
//! [`WireClient`]는 [`Transport`] 위에서 재시도 정책만 담당합니다.
//!
//! ## 재시도 정책
//!
//! - 최대 [`MAX_ATTEMPTS`]회 시도 (최초 시도 포함), 백오프 없음
//! - [`WbemError::Transient`]만 재시도 (연결 리셋/거부/중단, broken pipe)
//! - HTTP 상태 에러 등 나머지는 즉시 반환
//! - 예산 소진 시 마지막 사유로 [`WbemError::RetriesExhausted`] 반환
//!
//! 실제 HTTP 전송은 `client` feature의 [`HttpTransport`] (reqwest blocking)가 담당합니다.

use std::io::{self, Read};

use tracing::{debug, warn};

use crate::codec::WireRequest;
use crate::constants::MAX_ATTEMPTS;
use crate::error::{Result, WbemError};

/// 응답 본문 스트림
pub type ResponseBody = Box<dyn Read + Send>;

/// 요청 한 건을 보내고 응답 본문 스트림을 돌려주는 전송 계층
///
/// 재시도 가능한 실패는 [`WbemError::Transient`]로 보고해야 합니다.
pub trait Transport: Send {
    /// 요청을 전송합니다.
    fn send(&mut self, request: &WireRequest) -> Result<ResponseBody>;
}

/// 재시도 가능한 소켓 에러 종류인지 확인합니다.
pub fn is_transient_io(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::BrokenPipe
    )
}

/// 재시도 정책을 적용하는 전송 클라이언트
pub struct WireClient {
    transport: Box<dyn Transport>,
    max_attempts: u32,
}

impl WireClient {
    /// 기본 시도 횟수([`MAX_ATTEMPTS`])로 생성합니다.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            max_attempts: MAX_ATTEMPTS,
        }
    }

    /// 최대 시도 횟수를 바꿉니다 (최소 1).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// 최대 시도 횟수
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 요청을 전송하고 응답 본문을 반환합니다.
    ///
    /// # 에러
    ///
    /// - [`WbemError::RetriesExhausted`] — 모든 시도가 일시적 실패
    /// - 그 밖에 전송 계층이 반환한 에러 (재시도 없음)
    pub fn call(&mut self, request: &WireRequest) -> Result<ResponseBody> {
        let mut last_reason = String::new();

        for attempt in 1..=self.max_attempts {
            match self.transport.send(request) {
                Ok(body) => {
                    debug!(method = request.method, attempt, "request sent");
                    return Ok(body);
                }
                Err(WbemError::Transient { reason }) => {
                    warn!(
                        method = request.method,
                        attempt,
                        max_attempts = self.max_attempts,
                        %reason,
                        "transient transport failure"
                    );
                    last_reason = reason;
                }
                Err(err) => return Err(err),
            }
        }

        Err(WbemError::RetriesExhausted {
            attempts: self.max_attempts,
            reason: last_reason,
        })
    }
}

#[cfg(feature = "client")]
pub use http::HttpTransport;

#[cfg(feature = "client")]
mod http {
    use std::error::Error as StdError;
    use std::io;

    use reqwest::blocking::Client;

    use super::{ResponseBody, Transport, is_transient_io};
    use crate::codec::WireRequest;
    use crate::config::ConnectOptions;
    use crate::constants::{USER_AGENT, headers};
    use crate::error::{Result, WbemError};

    /// reqwest blocking 클라이언트 기반 전송 계층
    ///
    /// # 예시
    ///
    /// ```no_run
    /// use wbemdb::client::{HttpTransport, WireClient};
    /// use wbemdb::ConnectOptions;
    ///
    /// # fn example() -> wbemdb::Result<()> {
    /// let options = ConnectOptions::new("cimom.example.com").with_credentials("admin", "secret");
    /// let client = WireClient::new(Box::new(HttpTransport::new(&options)?));
    /// assert_eq!(client.max_attempts(), 5);
    /// # Ok(())
    /// # }
    /// ```
    pub struct HttpTransport {
        http: Client,
        url: String,
    }

    impl HttpTransport {
        /// 연결 설정으로 새 전송 계층을 생성합니다.
        ///
        /// `timeout`이 설정되어 있으면 요청 전체에 적용되고,
        /// `verify_certificates`가 꺼져 있으면 인증서 검증을 생략합니다.
        pub fn new(options: &ConnectOptions) -> Result<Self> {
            let mut builder = Client::builder()
                .user_agent(USER_AGENT)
                .danger_accept_invalid_certs(!options.verify_certificates);
            if let Some(timeout) = options.timeout {
                builder = builder.timeout(timeout);
            }

            Ok(Self {
                http: builder.build()?,
                url: options.url(),
            })
        }

        /// 요청 URL (`{scheme}://{host}:{port}/cimom`)
        pub fn url(&self) -> &str {
            &self.url
        }
    }

    impl Transport for HttpTransport {
        fn send(&mut self, request: &WireRequest) -> Result<ResponseBody> {
            let mut builder = self.http.post(&self.url);
            // NOTE: reqwest derives Content-Length from the body itself
            for (name, value) in request
                .headers
                .iter()
                .filter(|(name, _)| *name != headers::CONTENT_LENGTH)
            {
                builder = builder.header(*name, value.as_str());
            }

            let response = builder
                .body(request.body.clone())
                .send()
                .map_err(classify)?;

            let status = response.status();
            if !status.is_success() {
                return Err(WbemError::HttpStatus {
                    status: status.as_u16(),
                });
            }
            Ok(Box::new(response))
        }
    }

    /// 에러 원인 체인에서 첫 번째 `io::Error`의 종류를 찾습니다.
    fn io_error_kind(err: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
        let mut source = err.source();
        while let Some(cause) = source {
            if let Some(io_err) = cause.downcast_ref::<io::Error>() {
                return Some(io_err.kind());
            }
            source = cause.source();
        }
        None
    }

    fn classify(err: reqwest::Error) -> WbemError {
        match io_error_kind(&err) {
            Some(kind) if is_transient_io(kind) => WbemError::Transient {
                reason: err.to_string(),
            },
            _ => WbemError::Http(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::error::ErrorKind;

    struct Scripted {
        script: VecDeque<Result<&'static str>>,
        calls: Arc<Mutex<u32>>,
    }

    impl Transport for Scripted {
        fn send(&mut self, _request: &WireRequest) -> Result<ResponseBody> {
            *self.calls.lock().unwrap() += 1;
            match self.script.pop_front() {
                Some(Ok(body)) => Ok(Box::new(body.as_bytes())),
                Some(Err(err)) => Err(err),
                None => Err(WbemError::Transient {
                    reason: "script exhausted".to_string(),
                }),
            }
        }
    }

    fn client(script: Vec<Result<&'static str>>) -> (WireClient, Arc<Mutex<u32>>) {
        let calls = Arc::new(Mutex::new(0));
        let transport = Scripted {
            script: script.into(),
            calls: Arc::clone(&calls),
        };
        (WireClient::new(Box::new(transport)), calls)
    }

    fn request() -> WireRequest {
        WireRequest {
            method: "EnumerateInstances",
            namespace: "root/cimv2".to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    fn reset() -> WbemError {
        WbemError::Transient {
            reason: "connection reset by peer".to_string(),
        }
    }

    #[test]
    fn test_transient_failures_then_success() {
        let (mut client, calls) = client(vec![Err(reset()), Err(reset()), Ok("<CIM/>")]);
        let mut body = String::new();
        client
            .call(&request())
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "<CIM/>");
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[test]
    fn test_retries_exhausted() {
        let (mut client, calls) = client((0..5).map(|_| Err(reset())).collect());
        let err = client.call(&request()).err().unwrap();
        assert!(matches!(
            err,
            WbemError::RetriesExhausted { attempts: 5, ref reason } if reason == "connection reset by peer"
        ));
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(*calls.lock().unwrap(), 5);
    }

    #[test]
    fn test_http_error_not_retried() {
        let (mut client, calls) = client(vec![Err(WbemError::HttpStatus { status: 500 }), Ok("")]);
        let err = client.call(&request()).err().unwrap();
        assert!(matches!(err, WbemError::HttpStatus { status: 500 }));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_custom_attempt_budget() {
        let (client, _) = client(Vec::new());
        let mut client = client.with_max_attempts(0);
        assert_eq!(client.max_attempts(), 1);
        assert!(matches!(
            client.call(&request()).err().unwrap(),
            WbemError::RetriesExhausted { attempts: 1, .. }
        ));
    }

    #[test]
    fn test_transient_io_kinds() {
        assert!(is_transient_io(io::ErrorKind::ConnectionReset));
        assert!(is_transient_io(io::ErrorKind::ConnectionRefused));
        assert!(is_transient_io(io::ErrorKind::BrokenPipe));
        assert!(!is_transient_io(io::ErrorKind::TimedOut));
        assert!(!is_transient_io(io::ErrorKind::PermissionDenied));
    }
}
