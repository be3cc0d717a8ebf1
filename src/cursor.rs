//! 커서 — 쿼리 실행과 행 버퍼 조회
//!
//! ## 파라미터 치환
//!
//! `execute_with`는 파라미터를 정확히 하나 받아 `%` 형식으로 쿼리에 치환합니다.
//!
//! | 지정자 | 의미 |
//! |---|---|
//! | `%s` | 값 그대로 |
//! | `%d`, `%i` | 정수 |
//! | `%f` | 소수점 6자리 실수 |
//! | `%r` | 문자열이면 작은따옴표로 감싼 리터럴 |
//! | `%%` | `%` 문자 |

use std::collections::VecDeque;
use std::fmt;

use crate::connection::Connection;
use crate::constants::DEFAULT_ARRAY_SIZE;
use crate::error::{Result, WbemError};
use crate::types::{Column, Row};

/// 쿼리 치환 파라미터
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Str(String),
    Int(i64),
    Real(f64),
    Bool(bool),
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Str(s) => f.write_str(s),
            Param::Int(v) => write!(f, "{v}"),
            Param::Real(v) => write!(f, "{v}"),
            Param::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Param::Str(value.to_string())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Param::Str(value)
    }
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Param::Int(value)
    }
}

impl From<i32> for Param {
    fn from(value: i32) -> Self {
        Param::Int(value.into())
    }
}

impl From<u32> for Param {
    fn from(value: u32) -> Self {
        Param::Int(value.into())
    }
}

impl From<f64> for Param {
    fn from(value: f64) -> Self {
        Param::Real(value)
    }
}

impl From<bool> for Param {
    fn from(value: bool) -> Self {
        Param::Bool(value)
    }
}

impl Param {
    fn as_integer(&self) -> Result<i64> {
        match self {
            Param::Int(v) => Ok(*v),
            Param::Real(v) => Ok(v.trunc() as i64),
            Param::Bool(v) => Ok(i64::from(*v)),
            Param::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| WbemError::parameter(format!("%d format requires a number, got {s:?}"))),
        }
    }

    fn as_real(&self) -> Result<f64> {
        match self {
            Param::Int(v) => Ok(*v as f64),
            Param::Real(v) => Ok(*v),
            Param::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
            Param::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| WbemError::parameter(format!("%f format requires a number, got {s:?}"))),
        }
    }

    fn repr(&self) -> String {
        match self {
            Param::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            other => other.to_string(),
        }
    }
}

/// 쿼리 텍스트에 파라미터 하나를 치환합니다.
///
/// 변환 지정자가 정확히 하나여야 합니다 (`%%` 제외).
///
/// # 예시
///
/// ```
/// use wbemdb::cursor::{format_query, Param};
///
/// let q = format_query("SELECT * FROM C WHERE Name=%r", &Param::from("it's")).unwrap();
/// assert_eq!(q, r"SELECT * FROM C WHERE Name='it\'s'");
/// ```
pub fn format_query(query: &str, param: &Param) -> Result<String> {
    let mut out = String::with_capacity(query.len() + 16);
    let mut conversions = 0;
    let mut chars = query.chars();

    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        let spec = chars
            .next()
            .ok_or_else(|| WbemError::parameter("incomplete format at end of query"))?;
        if spec == '%' {
            out.push('%');
            continue;
        }

        conversions += 1;
        if conversions > 1 {
            return Err(WbemError::parameter("not enough parameters for format string"));
        }
        match spec {
            's' => out.push_str(&param.to_string()),
            'd' | 'i' => out.push_str(&param.as_integer()?.to_string()),
            'f' => out.push_str(&format!("{:.6}", param.as_real()?)),
            'r' => out.push_str(&param.repr()),
            other => {
                return Err(WbemError::parameter(format!(
                    "unsupported format character {other:?}"
                )));
            }
        }
    }

    if conversions == 0 {
        return Err(WbemError::parameter(
            "not all parameters converted during formatting",
        ));
    }
    Ok(out)
}

/// 쿼리 커서
///
/// 한 번의 `execute`가 응답 전체를 행 큐에 버퍼링하고,
/// `fetch*` 메서드가 큐 앞에서부터 꺼냅니다.
pub struct Cursor {
    connection: Option<Connection>,
    description: Option<Vec<Column>>,
    rows: VecDeque<Row>,
    rownumber: Option<usize>,
    /// 반복자가 에러를 한 번 돌려준 뒤 멈췄는지 (다음 execute에서 해제)
    iter_stopped: bool,
    /// `fetchmany(None)`의 배치 크기
    pub arraysize: usize,
}

impl Cursor {
    pub(crate) fn new(connection: Connection) -> Self {
        Self {
            connection: Some(connection),
            description: None,
            rows: VecDeque::new(),
            rownumber: None,
            iter_stopped: false,
            arraysize: DEFAULT_ARRAY_SIZE,
        }
    }

    /// 커서가 속한 연결 (닫힌 커서면 `None`)
    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    fn open_connection(&self) -> Result<&Connection> {
        let connection = self.connection.as_ref().ok_or(WbemError::CursorClosed)?;
        connection.ensure_open()?;
        Ok(connection)
    }

    fn check_executed(&self) -> Result<()> {
        self.open_connection()?;
        if self.description.is_none() {
            return Err(WbemError::NotExecuted);
        }
        Ok(())
    }

    /// 쿼리를 실행하고 결과를 버퍼링합니다.
    ///
    /// 이전 결과(설명, 행, 위치)는 실행 전에 지워집니다.
    ///
    /// # 에러
    ///
    /// - [`WbemError::Syntax`] — 지원하지 않는 쿼리
    /// - 전송/프로토콜 에러 ([`crate::ErrorKind`] 참고)
    /// - [`WbemError::CursorClosed`], [`WbemError::ConnectionClosed`]
    pub fn execute(&mut self, query: &str) -> Result<()> {
        self.description = None;
        self.rows.clear();
        self.rownumber = None;
        self.iter_stopped = false;

        let result = self.open_connection()?.execute(query)?;
        self.description = Some(result.description);
        self.rows = result.rows;
        self.rownumber = Some(0);
        Ok(())
    }

    /// 파라미터 하나를 `%` 형식으로 치환한 뒤 실행합니다.
    ///
    /// # 에러
    ///
    /// - [`WbemError::Parameter`] — 파라미터가 하나가 아니거나 형식이 맞지 않음
    pub fn execute_with(&mut self, query: &str, params: &[Param]) -> Result<()> {
        self.open_connection()?;
        let [param] = params else {
            return Err(WbemError::parameter(format!(
                "execute takes exactly one parameter ({} given)",
                params.len()
            )));
        };
        let query = format_query(query, param)?;
        self.execute(&query)
    }

    /// 파라미터마다 한 번씩 실행합니다. 마지막 실행 결과만 남습니다.
    pub fn executemany<P, I>(&mut self, query: &str, params: I) -> Result<()>
    where
        P: Into<Param>,
        I: IntoIterator<Item = P>,
    {
        for param in params {
            self.execute_with(query, &[param.into()])?;
        }
        Ok(())
    }

    /// 컬럼 설명 (실행 전이면 `None`)
    pub fn description(&self) -> Option<&[Column]> {
        self.description.as_deref()
    }

    /// 현재 버퍼에 남은 행 수
    pub fn rowcount(&self) -> usize {
        self.rows.len()
    }

    /// 지금까지 꺼낸 행 수 (실행 전이면 `None`)
    pub fn rownumber(&self) -> Option<usize> {
        self.rownumber
    }

    /// 다음 행 하나 (없으면 `None`)
    pub fn fetchone(&mut self) -> Result<Option<Row>> {
        self.check_executed()?;
        let row = self.rows.pop_front();
        if row.is_some() {
            self.rownumber = self.rownumber.map(|n| n + 1);
        }
        Ok(row)
    }

    /// 최대 `size`개 (기본 [`arraysize`](Self::arraysize))
    pub fn fetchmany(&mut self, size: Option<usize>) -> Result<Vec<Row>> {
        self.check_executed()?;
        let size = size.filter(|n| *n > 0).unwrap_or(self.arraysize);
        let take = size.min(self.rows.len());
        let rows: Vec<Row> = self.rows.drain(..take).collect();
        self.rownumber = self.rownumber.map(|n| n + rows.len());
        Ok(rows)
    }

    /// 남은 행 전부
    pub fn fetchall(&mut self) -> Result<Vec<Row>> {
        self.check_executed()?;
        let rows: Vec<Row> = self.rows.drain(..).collect();
        self.rownumber = self.rownumber.map(|n| n + rows.len());
        Ok(rows)
    }

    /// 결과셋은 항상 하나뿐이므로 `false`
    pub fn nextset(&mut self) -> Result<bool> {
        self.check_executed()?;
        Ok(false)
    }

    pub fn setinputsizes(&mut self, _sizes: &[usize]) -> Result<()> {
        self.check_executed()
    }

    pub fn setoutputsize(&mut self, _size: usize, _column: Option<usize>) -> Result<()> {
        self.check_executed()
    }

    /// 커서를 닫습니다. 연결은 닫히지 않습니다.
    pub fn close(&mut self) {
        self.description = None;
        self.rows.clear();
        self.rownumber = None;
        self.connection = None;
    }

    /// 닫혔는지 확인
    pub fn is_closed(&self) -> bool {
        self.connection.is_none()
    }
}

/// 행을 하나씩 꺼냅니다. 사용 오류(미실행, 닫힘)는 한 번만 `Some(Err(..))`로
/// 돌려주고 이후에는 `None`으로 끝납니다.
impl Iterator for Cursor {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.iter_stopped {
            return None;
        }
        match self.fetchone() {
            Ok(row) => row.map(Ok),
            Err(err) => {
                self.iter_stopped = true;
                Some(Err(err))
            }
        }
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("closed", &self.is_closed())
            .field("description", &self.description)
            .field("buffered", &self.rows.len())
            .field("rownumber", &self.rownumber)
            .field("arraysize", &self.arraysize)
            .finish()
    }
}
