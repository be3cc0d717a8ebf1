//! # wbemdb
//!
//! CIM-XML/WBEM 관리 프로토콜 위의 DB-API 스타일 쿼리 커서 라이브러리.
//!
//! 제한된 `SELECT` 문을 CIM-XML intrinsic method 요청으로 변환해 HTTP로 전송하고,
//! 응답 XML 스트림을 타입이 지정된 행으로 디코딩합니다.
//!
//! ## 모듈 구조
//!
//! - [`constants`] — 태그/헤더 이름, 기본 포트, 재시도 횟수 상수
//! - [`error`] — 에러 타입 계층 구조 ([`WbemError`], [`ErrorKind`])
//! - [`types`] — CIM 타입 체계 ([`CimType`], [`ColumnType`], [`CimValue`] 등)
//! - [`field`] — 응답 텍스트 값 디코딩과 datetime 리터럴 생성
//! - [`query`] — 쿼리 변환 ([`translate`](query::translate), [`KeyFilter`](query::KeyFilter))
//! - [`wire`] — 저수준 XML I/O ([`XmlWriter`](wire::XmlWriter), [`XmlReader`](wire::XmlReader))
//! - [`codec`] — 프로토콜 코덱 (요청 빌더 + 응답 파서)
//! - [`client`] — 전송 계층과 재시도 ([`WireClient`](client::WireClient),
//!   `HttpTransport` *(feature `"client"` 활성화 시)*)
//! - [`config`] — 연결 설정 ([`ConnectOptions`])
//! - [`connection`] / [`cursor`] — DB-API 스타일 파사드
//!
//! ## 사용 예시
//!
//! ```rust
//! use wbemdb::{CimType, ColumnType, TypeGroup};
//! use wbemdb::query::translate;
//!
//! assert_eq!(CimType::from_name("uint32"), Some(CimType::UInt32));
//! assert_eq!(ColumnType::array_of(CimType::String).group(), TypeGroup::Binary);
//!
//! let plan = translate("SELECT Name FROM CIM_Fan WHERE DeviceID='FAN1'", None).unwrap();
//! assert_eq!(plan.operation.method_name(), "EnumerateInstances");
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod constants;
pub mod cursor;
pub mod error;
pub mod field;
pub mod query;
pub mod types;
pub mod wire;

// NOTE: Selective re-export — only expose commonly used types
pub use config::{ConnectOptions, Scheme};
#[cfg(feature = "client")]
pub use connection::connect;
pub use connection::Connection;
pub use constants::{API_LEVEL, PARAM_STYLE, THREAD_SAFETY};
pub use cursor::{Cursor, Param};
pub use error::{ErrorKind, Result, WbemError};
pub use field::{
    date_from_ticks, date_literal, time_from_ticks, time_literal, timestamp_from_ticks,
    timestamp_literal,
};
pub use types::{CimType, CimValue, Column, ColumnType, Row, TypeGroup};
