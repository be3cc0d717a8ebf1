//! 쿼리 변환 모듈 — 제한된 SELECT 문법을 CIM-XML intrinsic method 호출로 변환
//!
//! 지원 문법은 다음 하나뿐입니다 (키워드는 대소문자 무시):
//!
//! ```text
//! SELECT <props> FROM <class> [WHERE <key>=<value> [AND <key>=<value> ...]]
//! ```
//!
//! - `<props>`: `*` 또는 쉼표로 구분한 컬럼 이름 목록
//! - `<value>`: 따옴표 문자열, 숫자, `true`/`false`, 또는 식별자
//!
//! ## 요청 형태
//!
//! | 연결 설정 | 메서드 | WHERE 처리 |
//! |---|---|---|
//! | dialect 있음 | `ExecQuery` (원문 그대로 전달) | 서버 |
//! | dialect 없음 | `EnumerateInstances` (+ PropertyList) | 클라이언트 키 필터 |
//!
//! WHERE 절은 전용 토크나이저/파서로만 해석하며, 결과는 평탄한 key → literal 매핑입니다.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::constants::{methods, pseudo_columns};
use crate::error::{Result, WbemError};
use crate::field::parse_datetime;
use crate::types::CimValue;

/// 요청 컬럼 목록
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// `*` — 컬럼 제한 없음
    All,
    /// 명시적 컬럼 목록 (요청 순서 유지, 대소문자 무시 중복 제거)
    Columns(Vec<String>),
}

impl Projection {
    /// `SELECT`와 `FROM` 사이의 텍스트를 파싱합니다.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text == "*" {
            return Ok(Projection::All);
        }

        let mut columns: Vec<String> = Vec::new();
        for raw in text.split(',') {
            let name = raw.trim();
            if name.is_empty() {
                return Err(WbemError::syntax("empty column name in select list"));
            }
            if name.chars().any(char::is_whitespace) {
                return Err(WbemError::syntax(format!("invalid column name {name:?}")));
            }
            if !columns.iter().any(|c| c.eq_ignore_ascii_case(name)) {
                columns.push(name.to_string());
            }
        }
        Ok(Projection::Columns(columns))
    }

    /// 명시적 컬럼 목록 (`*`이면 `None`)
    pub fn columns(&self) -> Option<&[String]> {
        match self {
            Projection::All => None,
            Projection::Columns(columns) => Some(columns),
        }
    }

    /// 서버에 보낼 PropertyList — 예약 의사 컬럼을 제외합니다.
    ///
    /// `*`이면 `None` (PropertyList 파라미터 생략).
    pub fn property_list(&self) -> Option<Vec<String>> {
        self.columns().map(|columns| {
            columns
                .iter()
                .filter(|c| !pseudo_columns::is_reserved(c))
                .cloned()
                .collect()
        })
    }
}

/// 쿼리 문장을 구성 요소로 나눈 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// 요청 컬럼
    pub columns: Projection,
    /// 대상 클래스 이름
    pub class_name: String,
    /// WHERE 뒤의 원문 (없으면 `None`)
    pub predicate: Option<String>,
}

/// 공백으로 구분된 단어와 시작 바이트 오프셋
fn words(text: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, ch) in text.char_indices() {
        match (ch.is_whitespace(), start) {
            (true, Some(s)) => {
                out.push((s, &text[s..i]));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push((s, &text[s..]));
    }
    out
}

/// `SELECT <props> FROM <class> [WHERE <predicate>]` 문장을 나눕니다.
///
/// WHERE 절의 내용은 여기서 해석하지 않습니다 (dialect 모드에서는 서버가 처리).
///
/// # 에러
///
/// - [`WbemError::Syntax`] — 문법 불일치
pub fn parse_statement(query: &str) -> Result<Statement> {
    let ws = words(query);

    match ws.first() {
        Some((_, w)) if w.eq_ignore_ascii_case("SELECT") => {}
        _ => return Err(WbemError::syntax("query must start with SELECT")),
    }

    let from_idx = ws
        .iter()
        .skip(1)
        .position(|(_, w)| w.eq_ignore_ascii_case("FROM"))
        .map(|i| i + 1)
        .ok_or_else(|| WbemError::syntax("missing FROM clause"))?;
    if from_idx < 2 {
        return Err(WbemError::syntax("missing select list"));
    }

    let props = &query[ws[1].0..ws[from_idx].0];
    let columns = Projection::parse(props)?;

    let class_name = ws
        .get(from_idx + 1)
        .map(|(_, w)| w.to_string())
        .ok_or_else(|| WbemError::syntax("missing class name after FROM"))?;

    let predicate = match ws.get(from_idx + 2) {
        None => None,
        Some((_, w)) if w.eq_ignore_ascii_case("WHERE") => {
            let (offset, _) = ws
                .get(from_idx + 3)
                .ok_or_else(|| WbemError::syntax("missing predicate after WHERE"))?;
            Some(query[*offset..].trim().to_string())
        }
        Some((_, w)) => {
            return Err(WbemError::syntax(format!(
                "unexpected {w:?} after class name, expected WHERE"
            )));
        }
    };

    Ok(Statement {
        columns,
        class_name,
        predicate,
    })
}

/// WHERE 절의 리터럴 값
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// 따옴표 문자열 (따옴표 제거됨)
    String(String),
    /// 정수
    Integer(i64),
    /// 실수
    Real(f64),
    /// `true` / `false`
    Bool(bool),
    /// 따옴표 없는 식별자
    Ident(String),
}

impl Literal {
    /// 인스턴스 값과 일치하는지 비교합니다.
    ///
    /// 숫자끼리는 값으로, boolean끼리는 그대로, 나머지는 문자열 표현을
    /// 대소문자 무시로 비교합니다. NULL은 어떤 리터럴과도 일치하지 않습니다.
    /// datetime/interval 값은 리터럴을 CIM datetime 텍스트로 디코딩해 시각으로 비교합니다.
    pub fn matches(&self, value: &CimValue) -> bool {
        match (self, value) {
            (_, CimValue::Null) => false,
            (Literal::Integer(i), CimValue::SInt(v)) => i == v,
            (Literal::Integer(i), CimValue::UInt(v)) => u64::try_from(*i).is_ok_and(|i| i == *v),
            (Literal::Integer(i), CimValue::Real(v)) => *i as f64 == *v,
            (Literal::Real(r), v) if v.as_f64().is_some() => v.as_f64() == Some(*r),
            (Literal::Bool(b), CimValue::Bool(v)) => b == v,
            (Literal::String(s) | Literal::Ident(s), CimValue::DateTime(dt)) => {
                match parse_datetime(s.trim()) {
                    CimValue::DateTime(literal) => literal == *dt,
                    _ => s.eq_ignore_ascii_case(&dt.to_rfc3339()),
                }
            }
            (Literal::String(s) | Literal::Ident(s), CimValue::Interval(d)) => {
                match parse_datetime(s.trim()) {
                    CimValue::Interval(literal) => literal == *d,
                    _ => *s == d.to_string(),
                }
            }
            _ => self.to_string().eq_ignore_ascii_case(&value.to_string_repr()),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) | Literal::Ident(s) => f.write_str(s),
            Literal::Integer(v) => write!(f, "{v}"),
            Literal::Real(v) => write!(f, "{v}"),
            Literal::Bool(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Eq,
    Str(String),
    Number(String),
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&ch) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
        } else if ch == '=' {
            chars.next();
            tokens.push(Token::Eq);
        } else if ch == '\'' || ch == '"' {
            chars.next();
            let mut value = String::new();
            let mut closed = false;
            while let Some(c) = chars.next() {
                if c == '\\' {
                    match chars.next() {
                        Some(escaped) => value.push(escaped),
                        None => break,
                    }
                } else if c == ch {
                    closed = true;
                    break;
                } else {
                    value.push(c);
                }
            }
            if !closed {
                return Err(WbemError::syntax("unterminated string literal"));
            }
            tokens.push(Token::Str(value));
        } else if ch.is_ascii_digit() || ch == '-' || ch == '+' || ch == '.' {
            let mut number = String::new();
            number.push(ch);
            chars.next();
            while let Some(&c) = chars.peek() {
                let after_exponent = matches!(number.chars().last(), Some('e' | 'E'));
                if c.is_ascii_digit()
                    || c == '.'
                    || c == 'e'
                    || c == 'E'
                    || ((c == '-' || c == '+') && after_exponent)
                {
                    number.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Number(number));
        } else if ch.is_alphabetic() || ch == '_' {
            let mut ident = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_alphanumeric() || c == '_' {
                    ident.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident(ident));
        } else {
            return Err(WbemError::syntax(format!(
                "unsupported character {ch:?} in WHERE clause"
            )));
        }
    }
    Ok(tokens)
}

fn number_literal(text: &str) -> Result<Literal> {
    if let Ok(v) = text.parse::<i64>() {
        return Ok(Literal::Integer(v));
    }
    text.parse::<f64>()
        .map(Literal::Real)
        .map_err(|_| WbemError::syntax(format!("invalid number {text:?}")))
}

/// 키 바인딩 필터 — `key = literal` 쌍의 평탄한 목록
///
/// `EnumerateInstances`에는 서버측 조건이 없으므로, WHERE 절은 이 필터로
/// 바뀌어 응답 파싱 중 인스턴스 단위로 적용됩니다.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyFilter {
    bindings: Vec<(String, Literal)>,
}

impl KeyFilter {
    /// `k1=v1 AND k2=v2 ...` 형식의 WHERE 절을 파싱합니다.
    ///
    /// # 에러
    ///
    /// - [`WbemError::Syntax`] — `=` 이외의 연산자, `AND` 이외의 접속사, 중복 키 등
    ///
    /// # 예시
    ///
    /// ```
    /// use wbemdb::query::{KeyFilter, Literal};
    ///
    /// let filter = KeyFilter::parse("Name='sda' and Index=0").unwrap();
    /// assert_eq!(filter.get("name"), Some(&Literal::String("sda".to_string())));
    /// assert_eq!(filter.get("Index"), Some(&Literal::Integer(0)));
    /// ```
    pub fn parse(predicate: &str) -> Result<Self> {
        let mut tokens = tokenize(predicate)?.into_iter();
        let mut bindings: Vec<(String, Literal)> = Vec::new();

        loop {
            let key = match tokens.next() {
                Some(Token::Ident(key)) => key,
                other => {
                    return Err(WbemError::syntax(format!(
                        "expected key name in WHERE clause, got {other:?}"
                    )));
                }
            };
            if tokens.next() != Some(Token::Eq) {
                return Err(WbemError::syntax(format!(
                    "only key=value comparisons are supported (near {key:?})"
                )));
            }
            let literal = match tokens.next() {
                Some(Token::Str(s)) => Literal::String(s),
                Some(Token::Number(n)) => number_literal(&n)?,
                Some(Token::Ident(id)) if id.eq_ignore_ascii_case("true") => Literal::Bool(true),
                Some(Token::Ident(id)) if id.eq_ignore_ascii_case("false") => Literal::Bool(false),
                Some(Token::Ident(id)) => Literal::Ident(id),
                other => {
                    return Err(WbemError::syntax(format!(
                        "expected value for {key:?}, got {other:?}"
                    )));
                }
            };
            if bindings.iter().any(|(k, _)| k.eq_ignore_ascii_case(&key)) {
                return Err(WbemError::syntax(format!("duplicate key {key:?}")));
            }
            bindings.push((key, literal));

            match tokens.next() {
                None => break,
                Some(Token::Ident(word)) if word.eq_ignore_ascii_case("AND") => continue,
                Some(other) => {
                    return Err(WbemError::syntax(format!(
                        "expected AND between conditions, got {other:?}"
                    )));
                }
            }
        }

        Ok(Self { bindings })
    }

    /// 필터가 비어 있는지 확인
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// 조건 개수
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// 키로 리터럴을 찾습니다 (대소문자 무시).
    pub fn get(&self, key: &str) -> Option<&Literal> {
        self.bindings
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    /// `(key, literal)` 쌍 순회
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Literal)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// 인스턴스가 모든 조건을 만족하는지 확인합니다.
    ///
    /// `instance`의 키는 대문자로 정규화되어 있어야 합니다.
    /// 키가 없으면 불일치로 봅니다.
    pub fn matches(&self, instance: &HashMap<String, CimValue>) -> bool {
        self.bindings.iter().all(|(key, literal)| {
            instance
                .get(&key.to_uppercase())
                .is_some_and(|value| literal.matches(value))
        })
    }
}

/// 서버에 보낼 intrinsic method 호출
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// 방언 쿼리 패스스루
    ExecQuery {
        /// 쿼리 원문
        query: String,
        /// 쿼리 언어 (예: `WQL`, `CQL`)
        dialect: String,
    },
    /// 클래스 인스턴스 열거
    EnumerateInstances {
        /// 대상 클래스
        class_name: String,
        /// PropertyList (`None`이면 생략)
        property_list: Option<Vec<String>>,
    },
}

impl Operation {
    /// intrinsic method 이름
    pub fn method_name(&self) -> &'static str {
        match self {
            Operation::ExecQuery { .. } => methods::EXEC_QUERY,
            Operation::EnumerateInstances { .. } => methods::ENUMERATE_INSTANCES,
        }
    }
}

/// 변환 결과 — 요청 + 응답 해석에 필요한 컬럼/필터 정보
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// 보낼 요청
    pub operation: Operation,
    /// 요청 컬럼
    pub columns: Projection,
    /// 클라이언트측 키 필터 (dialect 모드에서는 항상 비어 있음)
    pub filter: KeyFilter,
}

/// 쿼리를 요청 형태로 변환합니다.
///
/// - `dialect`가 있으면 `ExecQuery` 패스스루 (필터 없음)
/// - 없으면 `EnumerateInstances` + WHERE → [`KeyFilter`]
///
/// # 예시
///
/// ```
/// use wbemdb::query::{translate, Operation, Projection};
///
/// let plan = translate("SELECT * FROM CIM_DiskDrive", None).unwrap();
/// assert_eq!(plan.columns, Projection::All);
/// assert!(plan.filter.is_empty());
/// assert_eq!(
///     plan.operation,
///     Operation::EnumerateInstances {
///         class_name: "CIM_DiskDrive".to_string(),
///         property_list: None,
///     }
/// );
/// ```
pub fn translate(query: &str, dialect: Option<&str>) -> Result<QueryPlan> {
    let statement = parse_statement(query)?;

    let plan = match dialect.filter(|d| !d.is_empty()) {
        Some(dialect) => QueryPlan {
            operation: Operation::ExecQuery {
                query: query.to_string(),
                dialect: dialect.to_string(),
            },
            columns: statement.columns,
            filter: KeyFilter::default(),
        },
        None => {
            let filter = match statement.predicate.as_deref() {
                Some(predicate) => KeyFilter::parse(predicate)?,
                None => KeyFilter::default(),
            };
            QueryPlan {
                operation: Operation::EnumerateInstances {
                    class_name: statement.class_name,
                    property_list: statement.columns.property_list(),
                },
                columns: statement.columns,
                filter,
            }
        }
    };

    debug!(
        method = plan.operation.method_name(),
        filter_keys = plan.filter.len(),
        "translated query"
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_select_star() {
        let plan = translate("SELECT * FROM C", None).unwrap();
        assert_eq!(plan.columns, Projection::All);
        assert!(plan.filter.is_empty());
        assert_eq!(
            plan.operation,
            Operation::EnumerateInstances {
                class_name: "C".to_string(),
                property_list: None,
            }
        );
    }

    #[test]
    fn test_select_columns_with_where() {
        let plan = translate("SELECT a, b FROM C WHERE k='x'", None).unwrap();
        assert_eq!(
            plan.columns,
            Projection::Columns(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(plan.filter.len(), 1);
        assert_eq!(plan.filter.get("k"), Some(&Literal::String("x".to_string())));
    }

    #[test]
    fn test_keywords_case_insensitive() {
        let st = parse_statement("  select Name from Win32_Service where State = 'Running'").unwrap();
        assert_eq!(st.class_name, "Win32_Service");
        assert_eq!(st.predicate.as_deref(), Some("State = 'Running'"));
    }

    #[test]
    fn test_columns_deduplicated_in_request_order() {
        let p = Projection::parse("b, a ,B,c").unwrap();
        assert_eq!(
            p,
            Projection::Columns(vec!["b".to_string(), "a".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn test_property_list_excludes_pseudo_columns() {
        let plan = translate("SELECT Name, __PATH, __class FROM C", None).unwrap();
        match plan.operation {
            Operation::EnumerateInstances { property_list, .. } => {
                assert_eq!(property_list, Some(vec!["Name".to_string()]));
            }
            other => panic!("unexpected operation {other:?}"),
        }
        // NOTE: pseudo columns still shape the description
        assert_eq!(plan.columns.columns().map(<[String]>::len), Some(3));
    }

    #[test]
    fn test_dialect_passthrough() {
        let query = "SELECT Name FROM CIM_Process WHERE Handle LIKE '1%'";
        let plan = translate(query, Some("WQL")).unwrap();
        assert_eq!(
            plan.operation,
            Operation::ExecQuery {
                query: query.to_string(),
                dialect: "WQL".to_string(),
            }
        );
        assert!(plan.filter.is_empty());
        assert_eq!(plan.operation.method_name(), "ExecQuery");
    }

    #[test]
    fn test_empty_dialect_means_enumeration() {
        let plan = translate("SELECT * FROM C", Some("")).unwrap();
        assert_eq!(plan.operation.method_name(), "EnumerateInstances");
    }

    #[test]
    fn test_syntax_errors() {
        for query in [
            "",
            "DELETE FROM C",
            "SELECT FROM C",
            "SELECT a",
            "SELECT a FROM",
            "SELECT a FROM C ORDER BY a",
            "SELECT a FROM C WHERE",
            "SELECT a,,b FROM C",
        ] {
            let err = translate(query, None).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Syntax, "query {query:?}");
        }
    }

    #[test]
    fn test_predicate_literals() {
        let f = KeyFilter::parse(
            "Name=\"a b\" AND Index=-3 and Ratio=0.5 AND Enabled=TRUE AND Kind=Disk",
        )
        .unwrap();
        assert_eq!(f.get("NAME"), Some(&Literal::String("a b".to_string())));
        assert_eq!(f.get("index"), Some(&Literal::Integer(-3)));
        assert_eq!(f.get("Ratio"), Some(&Literal::Real(0.5)));
        assert_eq!(f.get("Enabled"), Some(&Literal::Bool(true)));
        assert_eq!(f.get("Kind"), Some(&Literal::Ident("Disk".to_string())));
        assert_eq!(f.len(), 5);
    }

    #[test]
    fn test_predicate_escaped_quote() {
        let f = KeyFilter::parse(r"Name='it\'s'").unwrap();
        assert_eq!(f.get("Name"), Some(&Literal::String("it's".to_string())));
    }

    #[test]
    fn test_predicate_rejects_expressions() {
        for predicate in [
            "Name",
            "Name=",
            "Name>'a'",
            "Name='a' OR Id=1",
            "Name='a' Id=1",
            "Name='unterminated",
            "__import__('os')",
            "Name=1 AND Name=2",
            "Id=1.2.3",
        ] {
            let err = KeyFilter::parse(predicate).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Syntax, "predicate {predicate:?}");
        }
    }

    #[test]
    fn test_where_error_is_syntax_only_in_enumeration_mode() {
        let query = "SELECT * FROM C WHERE Name LIKE 'x%'";
        assert!(translate(query, None).is_err());
        assert!(translate(query, Some("CQL")).is_ok());
    }

    #[test]
    fn test_literal_matches() {
        assert!(Literal::Integer(5).matches(&CimValue::UInt(5)));
        assert!(!Literal::Integer(-5).matches(&CimValue::UInt(5)));
        assert!(Literal::Integer(5).matches(&CimValue::SInt(5)));
        assert!(Literal::Real(1.0).matches(&CimValue::Real(1.0)));
        assert!(Literal::Bool(true).matches(&CimValue::Bool(true)));
        assert!(Literal::String("SDA".to_string()).matches(&CimValue::String("sda".to_string())));
        assert!(Literal::String("9".to_string()).matches(&CimValue::UInt(9)));
        assert!(!Literal::String("9".to_string()).matches(&CimValue::UInt(5)));
        assert!(!Literal::String(String::new()).matches(&CimValue::Null));
    }

    #[test]
    fn test_literal_matches_datetime_wire_text() {
        use chrono::{TimeDelta, TimeZone, Utc};

        let installed = CimValue::DateTime(Utc.with_ymd_and_hms(2013, 1, 1, 12, 0, 0).unwrap());
        let f = KeyFilter::parse("InstallDate='20130101120000.000000+000'").unwrap();
        let mut instance = HashMap::new();
        instance.insert("INSTALLDATE".to_string(), installed.clone());
        assert!(f.matches(&instance));

        // 같은 시각, 다른 오프셋
        let same = Literal::String("20130101130000.000000+060".to_string());
        assert!(same.matches(&installed));
        let other = Literal::String("20130101120001.000000+000".to_string());
        assert!(!other.matches(&installed));
        let rfc = Literal::String("2013-01-01T12:00:00+00:00".to_string());
        assert!(rfc.matches(&installed));

        let uptime = CimValue::Interval(TimeDelta::days(1) + TimeDelta::seconds(5));
        assert!(Literal::String("00000001000005.000000:000".to_string()).matches(&uptime));
        assert!(!Literal::String("00000001000006.000000:000".to_string()).matches(&uptime));
    }

    #[test]
    fn test_filter_matches_instance() {
        let f = KeyFilter::parse("DeviceID='C:' AND Index=1").unwrap();
        let mut instance = HashMap::new();
        instance.insert("DEVICEID".to_string(), CimValue::String("c:".to_string()));
        instance.insert("INDEX".to_string(), CimValue::UInt(1));
        assert!(f.matches(&instance));

        instance.insert("INDEX".to_string(), CimValue::UInt(2));
        assert!(!f.matches(&instance));

        instance.remove("INDEX");
        assert!(!f.matches(&instance));
    }
}
