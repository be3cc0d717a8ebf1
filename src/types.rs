//! CIM 타입 시스템에서 공유되는 타입 정의입니다.
//!
//! [`CimType`], [`ColumnType`], [`CimValue`], [`Column`] 등 코덱과 커서 전반에서
//! 공유되는 타입을 정의합니다.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};

/// CIM 스칼라 타입 코드
///
/// WMI/WBEM에서 사용하는 `CIM_*` 타입 코드와 동일합니다.
/// 배열은 별도 타입이 아니라 [`ColumnType::array`] 플래그로 표현됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CimType {
    /// sint8 (코드 16)
    SInt8 = 16,
    /// uint8 (코드 17)
    UInt8 = 17,
    /// sint16 (코드 2)
    SInt16 = 2,
    /// uint16 (코드 18)
    UInt16 = 18,
    /// sint32 (코드 3)
    SInt32 = 3,
    /// uint32 (코드 19)
    UInt32 = 19,
    /// sint64 (코드 20)
    SInt64 = 20,
    /// uint64 (코드 21)
    UInt64 = 21,
    /// real32 (코드 4)
    Real32 = 4,
    /// real64 (코드 5)
    Real64 = 5,
    /// boolean (코드 11)
    Boolean = 11,
    /// string (코드 8)
    String = 8,
    /// datetime (코드 101) — 절대 시각 또는 interval
    DateTime = 101,
    /// reference (코드 102) — 객체 경로
    Reference = 102,
    /// char16 (코드 103)
    Char16 = 103,
    /// object (코드 13)
    Object = 13,
}

impl CimType {
    /// 모든 스칼라 타입
    pub const ALL: [CimType; 16] = [
        CimType::SInt8,
        CimType::UInt8,
        CimType::SInt16,
        CimType::UInt16,
        CimType::SInt32,
        CimType::UInt32,
        CimType::SInt64,
        CimType::UInt64,
        CimType::Real32,
        CimType::Real64,
        CimType::Boolean,
        CimType::String,
        CimType::DateTime,
        CimType::Reference,
        CimType::Char16,
        CimType::Object,
    ];

    /// 와이어 타입 이름 (예: `"uint32"`)
    pub fn name(self) -> &'static str {
        match self {
            CimType::SInt8 => "sint8",
            CimType::UInt8 => "uint8",
            CimType::SInt16 => "sint16",
            CimType::UInt16 => "uint16",
            CimType::SInt32 => "sint32",
            CimType::UInt32 => "uint32",
            CimType::SInt64 => "sint64",
            CimType::UInt64 => "uint64",
            CimType::Real32 => "real32",
            CimType::Real64 => "real64",
            CimType::Boolean => "boolean",
            CimType::String => "string",
            CimType::DateTime => "datetime",
            CimType::Reference => "reference",
            CimType::Char16 => "char16",
            CimType::Object => "object",
        }
    }

    /// 와이어 타입 이름으로 타입을 찾습니다. 알 수 없는 이름은 `None`.
    pub fn from_name(name: &str) -> Option<CimType> {
        CimType::ALL.into_iter().find(|t| t.name() == name)
    }

    /// 숫자 타입 여부
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            CimType::SInt8
                | CimType::UInt8
                | CimType::SInt16
                | CimType::UInt16
                | CimType::SInt32
                | CimType::UInt32
                | CimType::SInt64
                | CimType::UInt64
                | CimType::Real32
                | CimType::Real64
        )
    }
}

impl fmt::Display for CimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 배열 플래그 (`CIM_FLAG_ARRAY`)
pub const ARRAY_FLAG: u16 = 0x2000;

/// 컬럼 타입 — 스칼라 타입 + 배열 여부
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnType {
    /// 원소 타입
    pub base: CimType,
    /// `PROPERTY.ARRAY`에서 온 컬럼이면 `true`
    pub array: bool,
}

impl ColumnType {
    /// 스칼라 컬럼 타입
    pub const fn scalar(base: CimType) -> Self {
        Self { base, array: false }
    }

    /// 배열 컬럼 타입
    pub const fn array_of(base: CimType) -> Self {
        Self { base, array: true }
    }

    /// `CIM_*` 정수 코드 (배열이면 [`ARRAY_FLAG`]가 OR됨)
    pub fn code(self) -> u16 {
        let base = self.base as u16;
        if self.array { base | ARRAY_FLAG } else { base }
    }

    /// DB-API 타입 그룹
    pub fn group(self) -> TypeGroup {
        if self.array {
            return TypeGroup::Binary;
        }
        match self.base {
            CimType::DateTime => TypeGroup::DateTime,
            t if t.is_numeric() => TypeGroup::Number,
            _ => TypeGroup::String,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.array {
            write!(f, "{}[]", self.base)
        } else {
            write!(f, "{}", self.base)
        }
    }
}

/// DB-API 스타일 타입 그룹
///
/// - `String`: string, reference, char16, object, boolean
/// - `Binary`: 모든 배열 타입
/// - `Number`: 정수/실수 타입
/// - `DateTime`: datetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeGroup {
    String,
    Binary,
    Number,
    DateTime,
}

/// 응답에서 디코딩된 단일 값
#[derive(Debug, Clone, PartialEq)]
pub enum CimValue {
    /// NULL 또는 값 없음
    Null,
    /// boolean
    Bool(bool),
    /// 부호 있는 정수 (sint8..sint64)
    SInt(i64),
    /// 부호 없는 정수 (uint8..uint64)
    UInt(u64),
    /// 실수 (real32, real64)
    Real(f64),
    /// 문자열 (string, char16, object, reference, 변환 실패한 원문)
    String(String),
    /// 절대 시각 (UTC)
    DateTime(DateTime<Utc>),
    /// interval datetime
    Interval(TimeDelta),
    /// `PROPERTY.ARRAY` 값
    Array(Vec<CimValue>),
}

impl CimValue {
    /// null 여부 확인
    pub fn is_null(&self) -> bool {
        matches!(self, CimValue::Null)
    }

    /// 문자열 값 참조
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CimValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// 정수 값을 i64로 반환 (범위를 벗어나면 `None`)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CimValue::SInt(v) => Some(*v),
            CimValue::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// 숫자 값을 f64로 반환
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CimValue::SInt(v) => Some(*v as f64),
            CimValue::UInt(v) => Some(*v as f64),
            CimValue::Real(v) => Some(*v),
            _ => None,
        }
    }

    /// 문자열 표현
    ///
    /// NULL은 빈 문자열, 배열은 쉼표로 이은 원소 표현으로 변환됩니다.
    pub fn to_string_repr(&self) -> String {
        match self {
            CimValue::Null => String::new(),
            CimValue::Bool(v) => v.to_string(),
            CimValue::SInt(v) => v.to_string(),
            CimValue::UInt(v) => v.to_string(),
            CimValue::Real(v) => v.to_string(),
            CimValue::String(s) => s.clone(),
            CimValue::DateTime(dt) => dt.to_rfc3339(),
            CimValue::Interval(d) => d.to_string(),
            CimValue::Array(items) => items
                .iter()
                .map(CimValue::to_string_repr)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// 결과셋의 컬럼 설명 항목
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// 컬럼 이름 (서버가 보낸 대소문자 그대로)
    pub name: String,
    /// 컬럼 타입
    pub column_type: ColumnType,
}

impl Column {
    /// 새 컬럼 설명을 만듭니다.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }

    /// string 타입 컬럼 (의사 컬럼, 보이지 않은 요청 컬럼 등)
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::scalar(CimType::String))
    }
}

/// 단일 행: 컬럼 설명 순서에 맞춘 값 튜플
pub type Row = Vec<CimValue>;
