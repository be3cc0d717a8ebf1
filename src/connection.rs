//! 연결 — 설정, 공유 전송 클라이언트, 실행 직렬화 락
//!
//! [`Connection`]은 복제 가능한 핸들이며, 같은 연결에서 만든 모든 커서가
//! 하나의 [`WireClient`]와 뮤텍스를 공유합니다. 쿼리 실행(요청 빌드 → 전송 → 파싱)은
//! 락을 잡은 상태에서만 진행되며, 어떤 경로로 끝나든 가드가 해제됩니다.

use std::io::BufReader;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::client::{Transport, WireClient};
use crate::codec::{ResponseContext, ResultSet, build_request, parse_response};
use crate::config::ConnectOptions;
use crate::cursor::Cursor;
use crate::error::{Result, WbemError};
use crate::query::translate;

struct Inner {
    options: ConnectOptions,
    client: Mutex<WireClient>,
    closed: AtomicBool,
}

/// WBEM 연결 핸들
///
/// # 예시
///
/// ```no_run
/// use wbemdb::{connect, ConnectOptions};
///
/// # fn example() -> wbemdb::Result<()> {
/// let conn = connect(ConnectOptions::new("cimom.example.com").with_credentials("admin", "secret"))?;
/// let mut cur = conn.cursor()?;
/// cur.execute("SELECT Name, State FROM CIM_Service WHERE Name='sshd'")?;
/// for row in cur.fetchall()? {
///     println!("{row:?}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

/// reqwest 전송 계층으로 연결합니다.
///
/// 네트워크 접속은 첫 `execute()`까지 일어나지 않습니다.
#[cfg(feature = "client")]
pub fn connect(options: ConnectOptions) -> Result<Connection> {
    let transport = crate::client::HttpTransport::new(&options)?;
    debug!(url = %options.url(), "connection configured");
    Ok(Connection::with_transport(options, transport))
}

impl Connection {
    /// 임의의 전송 계층으로 연결을 만듭니다.
    pub fn with_transport(options: ConnectOptions, transport: impl Transport + 'static) -> Self {
        Self::with_client(options, WireClient::new(Box::new(transport)))
    }

    /// 재시도 정책을 직접 구성한 클라이언트로 연결을 만듭니다.
    pub fn with_client(options: ConnectOptions, client: WireClient) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                client: Mutex::new(client),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// 이 연결에 묶인 새 커서
    pub fn cursor(&self) -> Result<Cursor> {
        self.ensure_open()?;
        Ok(Cursor::new(self.clone()))
    }

    /// 연결을 닫습니다. 이후 모든 작업은 [`WbemError::ConnectionClosed`]로 실패합니다.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            debug!(host = %self.inner.options.host, "connection closed");
        }
    }

    /// 닫혔는지 확인
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// 읽기 전용 프로토콜이므로 아무것도 하지 않습니다.
    pub fn commit(&self) -> Result<()> {
        self.ensure_open()
    }

    /// 읽기 전용 프로토콜이므로 아무것도 하지 않습니다.
    pub fn rollback(&self) -> Result<()> {
        self.ensure_open()
    }

    /// 항상 `true` (트랜잭션 없음)
    pub fn autocommit(&self) -> bool {
        true
    }

    /// 무시됩니다.
    pub fn set_autocommit(&self, _enabled: bool) -> Result<()> {
        self.ensure_open()
    }

    /// 연결 설정
    pub fn options(&self) -> &ConnectOptions {
        &self.inner.options
    }

    /// 대상 네임스페이스
    pub fn namespace(&self) -> &str {
        &self.inner.options.namespace
    }

    /// 쿼리 방언
    pub fn dialect(&self) -> Option<&str> {
        self.inner.options.dialect()
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(WbemError::ConnectionClosed);
        }
        Ok(())
    }

    /// 쿼리를 변환, 전송, 파싱합니다. 락은 전 과정 동안 유지됩니다.
    pub(crate) fn execute(&self, query: &str) -> Result<ResultSet> {
        self.ensure_open()?;

        // NOTE: the guard is held across translate/call/parse and dropped on every return
        let mut client = self
            .inner
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let options = &self.inner.options;
        let plan = translate(query, options.dialect())?;
        let request = build_request(
            &plan.operation,
            &options.namespace,
            &options.user,
            options.password(),
        )?;

        let body = client.call(&request)?;
        let ctx = ResponseContext {
            method: request.method,
            namespace: &options.namespace,
            columns: &plan.columns,
            filter: &plan.filter,
        };
        parse_response(BufReader::new(body), ctx)
    }
}
