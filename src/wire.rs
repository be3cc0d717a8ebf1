//! 저수준 XML I/O 모듈 — CIM-XML 요소 쓰기/읽기
//!
//! [`XmlWriter`]는 메모리 버퍼에 요소를 순차적으로 쓰고,
//! [`XmlReader`]는 [`BufRead`] 스트림에서 소유권을 가진 [`XmlEvent`]를 하나씩 꺼냅니다.
//!
//! 둘 다 [`quick_xml`] 위의 얇은 래퍼입니다. 엔티티 이스케이프/언이스케이프는
//! quick-xml이 처리하므로 호출자는 항상 평문 문자열만 다룹니다.

use std::borrow::Cow;
use std::fmt::Display;
use std::io::{self, BufRead};
use std::sync::Arc;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::error::{Result, WbemError};

/// XML 디코딩 실패를 프로토콜 에러로 변환합니다.
fn malformed(err: impl Display) -> WbemError {
    WbemError::Protocol {
        code: 0,
        message: format!("malformed XML: {err}"),
    }
}

/// 읽기 실패를 분류합니다. 소켓 I/O 실패는 XML 에러가 아니라 전송 에러입니다.
fn read_failure(err: quick_xml::Error) -> WbemError {
    match err {
        quick_xml::Error::Io(shared) => WbemError::Io(
            Arc::try_unwrap(shared)
                .unwrap_or_else(|shared| io::Error::new(shared.kind(), shared.to_string())),
        ),
        other => WbemError::Xml(other),
    }
}

/// 메모리 버퍼에 CIM-XML 요소를 순차적으로 씁니다.
///
/// # 예시
///
/// ```
/// use wbemdb::wire::XmlWriter;
///
/// let mut w = XmlWriter::new();
/// w.start("CIM", &[("CIMVERSION", "2.0")]).unwrap();
/// w.text_element("VALUE", &[], "a<b").unwrap();
/// w.end("CIM").unwrap();
/// assert_eq!(
///     String::from_utf8(w.into_bytes()).unwrap(),
///     r#"<CIM CIMVERSION="2.0"><VALUE>a&lt;b</VALUE></CIM>"#
/// );
/// ```
pub struct XmlWriter {
    inner: Writer<Vec<u8>>,
}

impl XmlWriter {
    /// 빈 버퍼로 새 라이터를 생성합니다.
    pub fn new() -> Self {
        Self {
            inner: Writer::new(Vec::new()),
        }
    }

    /// `<?xml version="1.0" encoding="utf-8"?>` 선언을 씁니다.
    pub fn write_declaration(&mut self) -> Result<()> {
        self.inner
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
        Ok(())
    }

    /// 여는 태그
    pub fn start(&mut self, tag: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let element = BytesStart::new(tag).with_attributes(attrs.iter().copied());
        self.inner.write_event(Event::Start(element))?;
        Ok(())
    }

    /// 닫는 태그
    pub fn end(&mut self, tag: &str) -> Result<()> {
        self.inner.write_event(Event::End(BytesEnd::new(tag)))?;
        Ok(())
    }

    /// 내용 없는 요소 (`<TAG .../>`)
    pub fn empty(&mut self, tag: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let element = BytesStart::new(tag).with_attributes(attrs.iter().copied());
        self.inner.write_event(Event::Empty(element))?;
        Ok(())
    }

    /// 텍스트 노드 (이스케이프됨)
    pub fn text(&mut self, text: &str) -> Result<()> {
        self.inner.write_event(Event::Text(BytesText::new(text)))?;
        Ok(())
    }

    /// `<TAG attrs>text</TAG>`
    pub fn text_element(&mut self, tag: &str, attrs: &[(&str, &str)], text: &str) -> Result<()> {
        self.start(tag, attrs)?;
        self.text(text)?;
        self.end(tag)
    }

    /// 지금까지 쓴 바이트를 반환합니다.
    pub fn into_bytes(self) -> Vec<u8> {
        self.inner.into_inner()
    }
}

impl Default for XmlWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// 여는 태그의 이름과 속성
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// 태그 이름
    pub name: String,
    attributes: Vec<(String, String)>,
}

impl Element {
    /// 속성 값을 찾습니다 (이름은 대소문자 구분).
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn from_bytes(start: &BytesStart<'_>) -> Result<Self> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(malformed)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value().map_err(malformed)?.into_owned();
            attributes.push((key, value));
        }
        Ok(Self { name, attributes })
    }
}

/// [`XmlReader`]가 돌려주는 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlEvent {
    /// 여는 태그 (`<X/>`는 `Start` 다음 `End`로 분리됨)
    Start(Element),
    /// 닫는 태그
    End(String),
    /// 텍스트 또는 CDATA (언이스케이프됨)
    Text(String),
    /// 스트림 끝
    Eof,
}

/// [`BufRead`] 스트림에서 XML 이벤트를 순차적으로 읽습니다.
///
/// 주석, 처리 명령, 선언, DOCTYPE은 건너뜁니다.
pub struct XmlReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    pending_end: Option<String>,
}

impl<R: BufRead> XmlReader<R> {
    /// 스트림으로부터 새 리더를 생성합니다.
    pub fn new(source: R) -> Self {
        Self {
            reader: Reader::from_reader(source),
            buf: Vec::new(),
            pending_end: None,
        }
    }

    /// 다음 이벤트를 읽습니다.
    ///
    /// # 에러
    ///
    /// - [`WbemError::Xml`] — 잘 구성되지 않은 XML (닫는 태그 불일치 등)
    /// - [`WbemError::Io`] — 본문 스트림 읽기 실패
    pub fn next_event(&mut self) -> Result<XmlEvent> {
        if let Some(name) = self.pending_end.take() {
            return Ok(XmlEvent::End(name));
        }

        loop {
            self.buf.clear();
            let event = match self
                .reader
                .read_event_into(&mut self.buf)
                .map_err(read_failure)?
            {
                Event::Start(start) => XmlEvent::Start(Element::from_bytes(&start)?),
                Event::Empty(start) => {
                    let element = Element::from_bytes(&start)?;
                    self.pending_end = Some(element.name.clone());
                    XmlEvent::Start(element)
                }
                Event::End(end) => {
                    XmlEvent::End(String::from_utf8_lossy(end.name().as_ref()).into_owned())
                }
                Event::Text(text) => {
                    let text: Cow<'_, str> = text.unescape().map_err(malformed)?;
                    XmlEvent::Text(text.into_owned())
                }
                Event::CData(data) => XmlEvent::Text(String::from_utf8_lossy(&data).into_owned()),
                Event::Eof => XmlEvent::Eof,
                _ => continue,
            };
            return Ok(event);
        }
    }
}
