//! WBEM 커서의 에러 타입 계층 구조를 정의합니다.
//!
//! 모든 에러는 [`WbemError`] enum으로 표현되며, [`thiserror`]를 통해
//! `Display` 및 `Error` 트레이트가 자동 구현됩니다.
//! 각 변형은 [`WbemError::kind`]로 다섯 가지 [`ErrorKind`] 중 하나로 분류됩니다.

/// 에러 종류
///
/// 호출자가 재시도/보고 정책을 결정할 때 사용하는 분류입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 쿼리 문법 오류 — 재시도하지 않음
    Syntax,
    /// XML 구조 오류 또는 서버가 반환한 프로토콜 에러
    Protocol,
    /// HTTP 에러 또는 재시도 불가능한 소켓 에러
    Transport,
    /// 재시도 가능한 일시적 소켓 에러 (내부에서만 관찰됨)
    TransientTransport,
    /// API 호출 순서 오류 (execute 전 fetch, 닫힌 연결 등)
    Usage,
}

/// WBEM 커서의 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum WbemError {
    /// 지원하지 않는 쿼리 문법
    #[error("syntax error in query: {message}")]
    Syntax { message: String },

    /// 서버가 반환한 `ERROR` 요소 (또는 code=0인 구조 에러)
    #[error("CIM protocol error (code={code}): {message}")]
    Protocol { code: u32, message: String },

    /// 기대한 엔벨로프 요소와 다른 요소가 나타남
    #[error("expecting {expected} element, got {actual}")]
    UnexpectedElement { expected: String, actual: String },

    /// `IMETHODRESPONSE`의 NAME 속성이 요청한 메서드와 다름
    #[error("expecting attribute NAME={expected}, got {actual:?}")]
    MethodMismatch { expected: String, actual: String },

    /// 엔벨로프가 닫히기 전에 응답이 끝남
    #[error("response ended before the CIM envelope was closed")]
    TruncatedResponse,

    /// XML 파싱/쓰기 에러 (quick-xml 래핑)
    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    /// 표준 I/O 에러 래핑 (응답 스트림 읽기 등)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 예기치 않은 HTTP 상태 코드
    #[error("HTTP error: {status}")]
    HttpStatus { status: u16 },

    /// 재시도 가능한 소켓 에러 (연결 리셋/거부 등)
    #[error("transient socket error: {reason}")]
    Transient { reason: String },

    /// 재시도 예산을 모두 소진함
    #[error("socket error after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },

    /// HTTP 클라이언트 에러 (reqwest 래핑)
    #[cfg(feature = "client")]
    #[error("socket error: {0}")]
    Http(#[from] reqwest::Error),

    /// execute() 없이 결과를 조회함
    #[error("no data available, execute() first")]
    NotExecuted,

    /// 닫힌 연결에서 작업을 시도함
    #[error("connection closed")]
    ConnectionClosed,

    /// 닫힌 커서에서 작업을 시도함
    #[error("cursor closed")]
    CursorClosed,

    /// 파라미터 개수 또는 치환 형식 불일치
    #[error("parameter error: {message}")]
    Parameter { message: String },

    /// 연결 문자열 파싱 실패
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),
}

impl WbemError {
    /// 에러를 [`ErrorKind`]로 분류합니다.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WbemError::Syntax { .. } => ErrorKind::Syntax,
            WbemError::Xml(quick_xml::Error::Io(_)) => ErrorKind::Transport,
            WbemError::Protocol { .. }
            | WbemError::UnexpectedElement { .. }
            | WbemError::MethodMismatch { .. }
            | WbemError::TruncatedResponse
            | WbemError::Xml(_) => ErrorKind::Protocol,
            WbemError::Io(_) | WbemError::HttpStatus { .. } | WbemError::RetriesExhausted { .. } => {
                ErrorKind::Transport
            }
            #[cfg(feature = "client")]
            WbemError::Http(_) => ErrorKind::Transport,
            WbemError::Transient { .. } => ErrorKind::TransientTransport,
            WbemError::NotExecuted
            | WbemError::ConnectionClosed
            | WbemError::CursorClosed
            | WbemError::Parameter { .. }
            | WbemError::InvalidConnectionString(_) => ErrorKind::Usage,
        }
    }

    /// 재시도 가능한 일시적 전송 에러인지 확인합니다.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransientTransport
    }

    /// 서버가 반환한 프로토콜 에러 코드와 설명을 반환합니다.
    pub fn protocol_error(&self) -> Option<(u32, &str)> {
        match self {
            WbemError::Protocol { code, message } => Some((*code, message.as_str())),
            _ => None,
        }
    }

    pub(crate) fn syntax(message: impl Into<String>) -> Self {
        WbemError::Syntax {
            message: message.into(),
        }
    }

    pub(crate) fn parameter(message: impl Into<String>) -> Self {
        WbemError::Parameter {
            message: message.into(),
        }
    }
}

/// [`WbemError`]를 사용하는 편의 Result 타입 별칭
pub type Result<T> = std::result::Result<T, WbemError>;
