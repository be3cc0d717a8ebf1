//! CIM-XML 프로토콜에서 사용하는 태그 이름, 헤더 이름, 기본값 상수 등을 정의합니다.

/// DB-API 호환 레벨
pub const API_LEVEL: &str = "2.0";

/// 스레드 안전성 레벨 (2 = 모듈과 연결은 공유 가능, 커서는 공유 불가)
pub const THREAD_SAFETY: u8 = 2;

/// 파라미터 치환 스타일 (`%s`, `%d` 형식)
pub const PARAM_STYLE: &str = "format";

/// HTTP 기본 포트
pub const DEFAULT_HTTP_PORT: u16 = 5988;

/// HTTPS 기본 포트
pub const DEFAULT_HTTPS_PORT: u16 = 5989;

/// 기본 호스트
pub const DEFAULT_HOST: &str = "localhost";

/// 기본 네임스페이스 경로
pub const DEFAULT_NAMESPACE: &str = "root/cimv2";

/// CIMOM 엔드포인트 경로
pub const CIMOM_PATH: &str = "/cimom";

/// 전송 실패 시 최대 시도 횟수 (최초 시도 포함)
pub const MAX_ATTEMPTS: u32 = 5;

/// `fetchmany()` 기본 배치 크기
pub const DEFAULT_ARRAY_SIZE: usize = 1;

/// 요청 메시지 ID
pub const MESSAGE_ID: &str = "1001";

/// CIM 버전 / DTD 버전
pub const CIM_VERSION: &str = "2.0";

/// CIM-XML 프로토콜 버전
pub const PROTOCOL_VERSION: &str = "1.0";

/// HTTP User-Agent
pub const USER_AGENT: &str = concat!("wbemdb/", env!("CARGO_PKG_VERSION"));

/// 요청 Content-Type
pub const CONTENT_TYPE: &str = "application/xml; charset=\"utf-8\"";

/// HTTP 헤더 이름
pub mod headers {
    /// 본문 타입
    pub const CONTENT_TYPE: &str = "Content-Type";
    /// 본문 길이
    pub const CONTENT_LENGTH: &str = "Content-Length";
    /// 오퍼레이션 종류 (`MethodCall`)
    pub const CIM_OPERATION: &str = "CIMOperation";
    /// 호출할 intrinsic method 이름
    pub const CIM_METHOD: &str = "CIMMethod";
    /// 대상 네임스페이스
    pub const CIM_OBJECT: &str = "CIMObject";
    /// Basic 인증
    pub const AUTHORIZATION: &str = "Authorization";
}

/// `CIMOperation` 헤더 값
pub const OPERATION_METHOD_CALL: &str = "MethodCall";

/// 응답 엔벨로프 태그 (안쪽 → 바깥쪽 순서). 마지막 원소가 가장 먼저 열려야 합니다.
pub const RESPONSE_ENVELOPE: [&str; 5] = [
    tags::IRETURNVALUE,
    tags::IMETHODRESPONSE,
    tags::SIMPLERSP,
    tags::MESSAGE,
    tags::CIM,
];

/// CIM-XML 요소 이름
pub mod tags {
    pub const CIM: &str = "CIM";
    pub const MESSAGE: &str = "MESSAGE";
    pub const SIMPLEREQ: &str = "SIMPLEREQ";
    pub const SIMPLERSP: &str = "SIMPLERSP";
    pub const IMETHODCALL: &str = "IMETHODCALL";
    pub const IMETHODRESPONSE: &str = "IMETHODRESPONSE";
    pub const IRETURNVALUE: &str = "IRETURNVALUE";
    pub const LOCALNAMESPACEPATH: &str = "LOCALNAMESPACEPATH";
    pub const NAMESPACE: &str = "NAMESPACE";
    pub const IPARAMVALUE: &str = "IPARAMVALUE";
    pub const CLASSNAME: &str = "CLASSNAME";
    pub const VALUE: &str = "VALUE";
    pub const VALUE_ARRAY: &str = "VALUE.ARRAY";
    pub const VALUE_REFERENCE: &str = "VALUE.REFERENCE";
    pub const ERROR: &str = "ERROR";
    pub const INSTANCE: &str = "INSTANCE";
    pub const INSTANCENAME: &str = "INSTANCENAME";
    pub const KEYBINDING: &str = "KEYBINDING";
    pub const KEYVALUE: &str = "KEYVALUE";
    pub const PROPERTY: &str = "PROPERTY";
    pub const PROPERTY_ARRAY: &str = "PROPERTY.ARRAY";
    pub const PROPERTY_REFERENCE: &str = "PROPERTY.REFERENCE";
    pub const QUALIFIER: &str = "QUALIFIER";
}

/// intrinsic method 이름
pub mod methods {
    /// 방언(dialect) 쿼리 패스스루
    pub const EXEC_QUERY: &str = "ExecQuery";
    /// 클래스 인스턴스 열거
    pub const ENUMERATE_INSTANCES: &str = "EnumerateInstances";
}

/// 인스턴스 이름에서 합성되는 의사 컬럼
pub mod pseudo_columns {
    /// 클래스 이름
    pub const CLASS: &str = "__CLASS";
    /// 네임스페이스
    pub const NAMESPACE: &str = "__NAMESPACE";
    /// 키 바인딩으로 합성한 객체 경로
    pub const PATH: &str = "__PATH";

    /// 서버에 PropertyList로 보내지 않는 예약 컬럼 목록
    pub const ALL: [&str; 3] = [CLASS, NAMESPACE, PATH];

    /// 이름이 예약 컬럼인지 대소문자 구분 없이 확인합니다.
    pub fn is_reserved(name: &str) -> bool {
        ALL.iter().any(|p| p.eq_ignore_ascii_case(name))
    }
}
