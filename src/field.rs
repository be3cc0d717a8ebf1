//! CIM 타입별 값 변환 모듈
//!
//! CIM-XML 응답의 `VALUE` 텍스트를 선언된 타입에 따라 [`CimValue`]로 변환합니다.
//!
//! ## 핵심 함수
//!
//! - [`lookup_type`] — 와이어 타입 이름 → [`CimType`] (알 수 없으면 string)
//! - [`convert_value`] — 타입별 텍스트 변환 (실패 시 원문 문자열로 대체)
//! - [`parse_datetime`] — 두 가지 datetime 와이어 포맷 디코딩
//!
//! ## 타입별 변환 규칙
//!
//! | CIM 타입 | 결과 | 실패 시 |
//! |---|---|---|
//! | sint8..sint64 | [`CimValue::SInt`] | 원문 문자열 |
//! | uint8..uint64 | [`CimValue::UInt`] | 원문 문자열 |
//! | real32, real64 | [`CimValue::Real`] | 원문 문자열 |
//! | boolean | `"true"`과 대소문자 무시 비교 | 항상 성공 (`false`) |
//! | datetime | [`CimValue::DateTime`] / [`CimValue::Interval`] | 원문 문자열 |
//! | string, char16, object, reference | [`CimValue::String`] | - |
//!
//! ## datetime 와이어 포맷
//!
//! ```text
//! 절대 시각: YYYYMMDDHHMMSS.ssssss±UUU   (UUU = UTC 오프셋, 분 단위)
//! interval : DDDDDDDDHHMMSS.ssssss:000
//! ```
//!
//! width 표기(8/16/32/64비트)는 명목상으로만 취급하며 오버플로를 검사하지 않습니다.

use chrono::{DateTime, Local, NaiveDate, TimeDelta, Utc};

use crate::types::{CimType, CimValue};

/// 와이어 타입 이름을 [`CimType`]으로 변환합니다.
///
/// 이름이 없거나 알 수 없으면 [`CimType::String`]을 반환합니다.
pub fn lookup_type(type_name: Option<&str>) -> CimType {
    type_name
        .and_then(CimType::from_name)
        .unwrap_or(CimType::String)
}

/// 선언된 타입에 따라 텍스트 값을 변환합니다.
///
/// 변환에 실패하면 파싱을 중단하지 않고 원문을 [`CimValue::String`]으로 돌려줍니다.
///
/// # 예시
///
/// ```
/// use wbemdb::field::convert_value;
/// use wbemdb::{CimType, CimValue};
///
/// assert_eq!(convert_value(CimType::UInt32, "5"), CimValue::UInt(5));
/// assert_eq!(convert_value(CimType::Boolean, "TRUE"), CimValue::Bool(true));
/// assert_eq!(
///     convert_value(CimType::SInt8, "n/a"),
///     CimValue::String("n/a".to_string())
/// );
/// ```
pub fn convert_value(cim_type: CimType, raw: &str) -> CimValue {
    let fallback = || CimValue::String(raw.to_string());
    match cim_type {
        CimType::SInt8 | CimType::SInt16 | CimType::SInt32 | CimType::SInt64 => raw
            .trim()
            .parse::<i64>()
            .map(CimValue::SInt)
            .unwrap_or_else(|_| fallback()),
        CimType::UInt8 | CimType::UInt16 | CimType::UInt32 | CimType::UInt64 => raw
            .trim()
            .parse::<u64>()
            .map(CimValue::UInt)
            .unwrap_or_else(|_| fallback()),
        CimType::Real32 | CimType::Real64 => raw
            .trim()
            .parse::<f64>()
            .map(CimValue::Real)
            .unwrap_or_else(|_| fallback()),
        CimType::Boolean => CimValue::Bool(parse_boolean(raw)),
        CimType::DateTime => parse_datetime(raw),
        CimType::String | CimType::Char16 | CimType::Object | CimType::Reference => fallback(),
    }
}

/// boolean 텍스트 변환 — `"true"`와 대소문자 무시 일치할 때만 `true`
pub fn parse_boolean(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("true")
}

/// datetime 텍스트를 디코딩합니다.
///
/// 절대 시각 포맷을 먼저 시도하고, 다음으로 interval 포맷을 시도합니다.
/// 둘 다 아니면 원문을 [`CimValue::String`]으로 반환합니다.
/// 절대 시각 모양이지만 달력상 유효하지 않은 값(13월 등)도 원문으로 남습니다.
pub fn parse_datetime(raw: &str) -> CimValue {
    if is_timestamp_shape(raw) {
        return parse_timestamp(raw)
            .map(CimValue::DateTime)
            .unwrap_or_else(|| CimValue::String(raw.to_string()));
    }
    if let Some(interval) = parse_interval(raw) {
        return CimValue::Interval(interval);
    }
    CimValue::String(raw.to_string())
}

/// 고정 폭 숫자 필드를 읽습니다. 숫자가 아닌 문자가 있으면 `None`.
fn digits(raw: &str, start: usize, end: usize) -> Option<u32> {
    let field = raw.get(start..end)?;
    if !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

fn is_timestamp_shape(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() >= 25
        && bytes[14] == b'.'
        && matches!(bytes[21], b'+' | b'-')
        && bytes[..14].iter().all(u8::is_ascii_digit)
        && bytes[15..21].iter().all(u8::is_ascii_digit)
        && bytes[22..25].iter().all(u8::is_ascii_digit)
}

/// `YYYYMMDDHHMMSS.ssssss±UUU` → UTC 시각 (오프셋만큼 빼서 정규화)
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let bytes = raw.as_bytes();
    let year = digits(raw, 0, 4)? as i32;
    let month = digits(raw, 4, 6)?;
    let day = digits(raw, 6, 8)?;
    let hour = digits(raw, 8, 10)?;
    let minute = digits(raw, 10, 12)?;
    let second = digits(raw, 12, 14)?;
    let micros = digits(raw, 15, 21)?;
    let offset = i64::from(digits(raw, 22, 25)?);
    let offset = if bytes[21] == b'-' { -offset } else { offset };

    let naive = NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_micro_opt(hour, minute, second, micros)?;
    naive
        .and_utc()
        .checked_sub_signed(TimeDelta::minutes(offset))
}

/// `DDDDDDDDHHMMSS.ssssss` → 기간
fn parse_interval(raw: &str) -> Option<TimeDelta> {
    let bytes = raw.as_bytes();
    if bytes.len() < 21 || bytes[14] != b'.' {
        return None;
    }
    let days = digits(raw, 0, 8)?;
    let hours = digits(raw, 8, 10)?;
    let minutes = digits(raw, 10, 12)?;
    let seconds = digits(raw, 12, 14)?;
    let micros = digits(raw, 15, 21)?;

    Some(
        TimeDelta::days(i64::from(days))
            + TimeDelta::hours(i64::from(hours))
            + TimeDelta::minutes(i64::from(minutes))
            + TimeDelta::seconds(i64::from(seconds))
            + TimeDelta::microseconds(i64::from(micros)),
    )
}

/// 날짜 값을 CIM datetime 리터럴로 만듭니다 (`YYYYMMDD000000.000000+000`).
pub fn date_literal(year: i32, month: u32, day: u32) -> String {
    format!("{:04}{:02}{:02}000000.000000+000", year, month, day)
}

/// 시각 값을 CIM interval 리터럴로 만듭니다 (`00000000HHMMSS.000000:000`).
pub fn time_literal(hour: u32, minute: u32, second: u32) -> String {
    format!("00000000{:02}{:02}{:02}.000000:000", hour, minute, second)
}

/// 타임스탬프 값을 CIM datetime 리터럴로 만듭니다.
pub fn timestamp_literal(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> String {
    format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}.000000+000",
        year, month, day, hour, minute, second
    )
}

/// UTC 시각을 마이크로초 정밀도의 CIM datetime 리터럴로 만듭니다.
pub fn datetime_literal(dt: &DateTime<Utc>) -> String {
    dt.format("%Y%m%d%H%M%S.%6f+000").to_string()
}

/// epoch 초 → 로컬 날짜 리터럴
pub fn date_from_ticks(ticks: i64) -> Option<String> {
    use chrono::Datelike;
    let local = local_from_ticks(ticks)?;
    Some(date_literal(local.year(), local.month(), local.day()))
}

/// epoch 초 → 로컬 시각 리터럴
pub fn time_from_ticks(ticks: i64) -> Option<String> {
    use chrono::Timelike;
    let local = local_from_ticks(ticks)?;
    Some(time_literal(local.hour(), local.minute(), local.second()))
}

/// epoch 초 → 로컬 타임스탬프 리터럴
pub fn timestamp_from_ticks(ticks: i64) -> Option<String> {
    use chrono::{Datelike, Timelike};
    let local = local_from_ticks(ticks)?;
    Some(timestamp_literal(
        local.year(),
        local.month(),
        local.day(),
        local.hour(),
        local.minute(),
        local.second(),
    ))
}

fn local_from_ticks(ticks: i64) -> Option<DateTime<Local>> {
    DateTime::from_timestamp(ticks, 0).map(|utc| utc.with_timezone(&Local))
}
