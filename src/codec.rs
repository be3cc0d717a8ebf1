//! 프로토콜 코덱 모듈 — CIM-XML 요청 빌더 + 응답 파서
//!
//! ## 요청 빌더
//!
//! - [`build_request_body`] — intrinsic method 호출 XML 문서
//! - [`build_request`] — 본문 + HTTP 헤더 묶음 ([`WireRequest`])
//!
//! ## 응답 파서
//!
//! - [`parse_response`] — 스트림을 한 번 훑으며 엔벨로프 검증, 인스턴스 조립,
//!   키 필터 적용, 컬럼 설명 확정까지 처리
//!
//! 응답 엔벨로프는 다음 순서로 열려야 합니다:
//!
//! ```text
//! CIM > MESSAGE > SIMPLERSP > IMETHODRESPONSE(NAME=<method>) > IRETURNVALUE
//! ```
//!
//! 엔벨로프 위치에 `ERROR` 요소가 오면 그 CODE/DESCRIPTION으로
//! [`WbemError::Protocol`]을 반환합니다.

use std::collections::{HashMap, VecDeque};
use std::io::BufRead;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, trace};

use crate::constants::{
    CIM_VERSION, CONTENT_TYPE, MESSAGE_ID, OPERATION_METHOD_CALL, PROTOCOL_VERSION,
    RESPONSE_ENVELOPE, headers, pseudo_columns, tags,
};
use crate::error::{Result, WbemError};
use crate::field::{convert_value, lookup_type};
use crate::query::{KeyFilter, Operation, Projection};
use crate::types::{CimType, CimValue, Column, ColumnType, Row};
use crate::wire::{Element, XmlEvent, XmlReader, XmlWriter};

/// 전송 계층에 넘기는 완성된 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRequest {
    /// intrinsic method 이름
    pub method: &'static str,
    /// 대상 네임스페이스
    pub namespace: String,
    /// HTTP 헤더 (이름, 값)
    pub headers: Vec<(&'static str, String)>,
    /// XML 본문
    pub body: Vec<u8>,
}

impl WireRequest {
    /// 헤더 값을 찾습니다 (이름은 대소문자 무시).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn write_iparam_value(writer: &mut XmlWriter, name: &str, value: &str) -> Result<()> {
    writer.start(tags::IPARAMVALUE, &[("NAME", name)])?;
    writer.text_element(tags::VALUE, &[], value)?;
    writer.end(tags::IPARAMVALUE)
}

fn write_params(writer: &mut XmlWriter, operation: &Operation) -> Result<()> {
    match operation {
        Operation::ExecQuery { query, dialect } => {
            write_iparam_value(writer, "Query", query)?;
            write_iparam_value(writer, "QueryLanguage", dialect)?;
        }
        Operation::EnumerateInstances {
            class_name,
            property_list,
        } => {
            writer.start(tags::IPARAMVALUE, &[("NAME", "ClassName")])?;
            writer.empty(tags::CLASSNAME, &[("NAME", class_name.as_str())])?;
            writer.end(tags::IPARAMVALUE)?;
            write_iparam_value(writer, "IncludeQualifiers", "FALSE")?;
            write_iparam_value(writer, "LocalOnly", "FALSE")?;
            if let Some(properties) = property_list {
                writer.start(tags::IPARAMVALUE, &[("NAME", "PropertyList")])?;
                writer.start(tags::VALUE_ARRAY, &[])?;
                for property in properties {
                    writer.text_element(tags::VALUE, &[], property)?;
                }
                writer.end(tags::VALUE_ARRAY)?;
                writer.end(tags::IPARAMVALUE)?;
            }
        }
    }
    Ok(())
}

/// intrinsic method 호출 XML 문서를 빌드합니다.
///
/// 네임스페이스는 `/`로 나눠 세그먼트마다 `NAMESPACE` 요소 하나씩 씁니다.
///
/// # 예시
///
/// ```
/// use wbemdb::codec::build_request_body;
/// use wbemdb::query::Operation;
///
/// let op = Operation::ExecQuery {
///     query: "SELECT * FROM CIM_Fan".to_string(),
///     dialect: "WQL".to_string(),
/// };
/// let body = String::from_utf8(build_request_body(&op, "root/cimv2").unwrap()).unwrap();
/// assert!(body.contains(r#"<IMETHODCALL NAME="ExecQuery">"#));
/// assert!(body.contains(r#"<NAMESPACE NAME="root"/><NAMESPACE NAME="cimv2"/>"#));
/// ```
pub fn build_request_body(operation: &Operation, namespace: &str) -> Result<Vec<u8>> {
    let mut writer = XmlWriter::new();
    writer.write_declaration()?;
    writer.start(
        tags::CIM,
        &[("CIMVERSION", CIM_VERSION), ("DTDVERSION", CIM_VERSION)],
    )?;
    writer.start(
        tags::MESSAGE,
        &[("ID", MESSAGE_ID), ("PROTOCOLVERSION", PROTOCOL_VERSION)],
    )?;
    writer.start(tags::SIMPLEREQ, &[])?;
    writer.start(tags::IMETHODCALL, &[("NAME", operation.method_name())])?;

    writer.start(tags::LOCALNAMESPACEPATH, &[])?;
    for segment in namespace.split('/').filter(|s| !s.is_empty()) {
        writer.empty(tags::NAMESPACE, &[("NAME", segment)])?;
    }
    writer.end(tags::LOCALNAMESPACEPATH)?;

    write_params(&mut writer, operation)?;

    writer.end(tags::IMETHODCALL)?;
    writer.end(tags::SIMPLEREQ)?;
    writer.end(tags::MESSAGE)?;
    writer.end(tags::CIM)?;
    Ok(writer.into_bytes())
}

/// 본문과 헤더를 갖춘 요청을 빌드합니다.
///
/// `Authorization` 헤더는 `user`가 비어 있지 않을 때만 추가됩니다.
pub fn build_request(
    operation: &Operation,
    namespace: &str,
    user: &str,
    password: &str,
) -> Result<WireRequest> {
    let body = build_request_body(operation, namespace)?;
    let method = operation.method_name();

    let mut request_headers = vec![
        (headers::CONTENT_TYPE, CONTENT_TYPE.to_string()),
        (headers::CONTENT_LENGTH, body.len().to_string()),
        (headers::CIM_OPERATION, OPERATION_METHOD_CALL.to_string()),
        (headers::CIM_METHOD, method.to_string()),
        (headers::CIM_OBJECT, namespace.to_string()),
    ];
    if !user.is_empty() {
        let token = STANDARD.encode(format!("{user}:{password}"));
        request_headers.push((headers::AUTHORIZATION, format!("Basic {token}")));
    }

    Ok(WireRequest {
        method,
        namespace: namespace.to_string(),
        headers: request_headers,
        body,
    })
}

/// 응답 해석에 필요한 요청측 정보
#[derive(Debug, Clone, Copy)]
pub struct ResponseContext<'a> {
    /// 요청한 intrinsic method 이름
    pub method: &'a str,
    /// 연결의 네임스페이스 (`__NAMESPACE` 값)
    pub namespace: &'a str,
    /// 요청 컬럼
    pub columns: &'a Projection,
    /// 클라이언트측 키 필터
    pub filter: &'a KeyFilter,
}

/// 파싱 결과 — 확정된 컬럼 설명과 행 큐
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    /// 컬럼 설명
    pub description: Vec<Column>,
    /// 필터를 통과한 행 (수신 순서)
    pub rows: VecDeque<Row>,
}

/// 진행 중인 프로퍼티
struct PropertyState {
    name: String,
    cim_type: CimType,
    array: bool,
    value: Option<CimValue>,
    items: Option<Vec<CimValue>>,
}

/// 진행 중인 키 바인딩
struct KeyState {
    name: String,
    value_type: String,
    value: Option<String>,
}

impl KeyState {
    fn render(&self) -> String {
        let value = self.value.as_deref().unwrap_or_default();
        if self.value_type == "string" {
            format!("{}=\"{}\"", self.name, value)
        } else {
            format!("{}={}", self.name, value)
        }
    }
}

/// `VALUE.REFERENCE` 안에서 조립 중인 객체 경로
#[derive(Default)]
struct PathBuilder {
    namespace: Vec<String>,
    class_name: String,
    bindings: Vec<String>,
    key: Option<KeyState>,
}

impl PathBuilder {
    fn render(&self) -> String {
        let mut path = String::new();
        if !self.namespace.is_empty() {
            path.push_str(&self.namespace.join("/"));
            path.push(':');
        }
        path.push_str(&render_path(&self.class_name, &self.bindings));
        path
    }
}

/// `Class.k1="v1",k2=v2` (키가 없으면 클래스 이름만)
fn render_path(class_name: &str, bindings: &[String]) -> String {
    if bindings.is_empty() {
        class_name.to_string()
    } else {
        format!("{}.{}", class_name, bindings.join(","))
    }
}

struct ResponseParser<'a> {
    ctx: ResponseContext<'a>,
    /// 아직 열리지 않은 엔벨로프 태그 (끝에서부터 pop)
    expected: Vec<&'static str>,
    /// 열린 엔벨로프 태그
    entered: Vec<&'static str>,
    /// IRETURNVALUE 안쪽 요소 깊이
    body_depth: usize,
    finished: bool,

    description: Vec<Column>,
    frozen: bool,
    rows: VecDeque<Row>,

    instance: HashMap<String, CimValue>,
    instance_class: String,
    bindings: Vec<String>,
    property: Option<PropertyState>,
    key: Option<KeyState>,
    references: Vec<PathBuilder>,
    qualifier_depth: usize,
    text: Option<String>,
}

impl<'a> ResponseParser<'a> {
    fn new(ctx: ResponseContext<'a>) -> Self {
        Self {
            ctx,
            expected: RESPONSE_ENVELOPE.to_vec(),
            entered: Vec::with_capacity(RESPONSE_ENVELOPE.len()),
            body_depth: 0,
            finished: false,
            description: Vec::new(),
            frozen: false,
            rows: VecDeque::new(),
            instance: HashMap::new(),
            instance_class: String::new(),
            bindings: Vec::new(),
            property: None,
            key: None,
            references: Vec::new(),
            qualifier_depth: 0,
            text: None,
        }
    }

    fn start(&mut self, element: Element) -> Result<()> {
        if let Some(tag) = self.expected.pop() {
            return self.enter_envelope(tag, &element);
        }
        // NOTE: body content is only allowed inside an open IRETURNVALUE
        if self.body_depth == 0 && self.entered.last() != Some(&tags::IRETURNVALUE) {
            let open = self.entered.last().copied().unwrap_or(tags::CIM);
            return Err(WbemError::UnexpectedElement {
                expected: format!("/{open}"),
                actual: element.name,
            });
        }
        self.body_depth += 1;

        if element.name == tags::QUALIFIER {
            self.qualifier_depth += 1;
            return Ok(());
        }
        if self.qualifier_depth > 0 {
            return Ok(());
        }

        match element.name.as_str() {
            tags::VALUE | tags::KEYVALUE => {
                self.text = Some(String::new());
                if element.name == tags::KEYVALUE {
                    let value_type = element.attribute("VALUETYPE").unwrap_or("string");
                    if let Some(key) = self.current_key() {
                        key.value_type = value_type.to_string();
                    }
                }
            }
            tags::VALUE_ARRAY => {
                if let Some(property) = self.property.as_mut() {
                    property.items = Some(Vec::new());
                }
            }
            tags::VALUE_REFERENCE => self.references.push(PathBuilder::default()),
            tags::NAMESPACE => {
                if let Some(path) = self.references.last_mut() {
                    let segment = element.attribute("NAME").unwrap_or_default();
                    path.namespace.push(segment.to_string());
                }
            }
            tags::INSTANCENAME => {
                let class_name = element.attribute("CLASSNAME").unwrap_or_default();
                if let Some(path) = self.references.last_mut() {
                    path.class_name = class_name.to_string();
                } else {
                    self.instance_class = class_name.to_string();
                    self.bindings.clear();
                    self.instance.insert(
                        pseudo_columns::CLASS.to_string(),
                        CimValue::String(class_name.to_string()),
                    );
                    self.instance.insert(
                        pseudo_columns::NAMESPACE.to_string(),
                        CimValue::String(self.ctx.namespace.to_string()),
                    );
                }
            }
            tags::KEYBINDING => {
                let key = KeyState {
                    name: element.attribute("NAME").unwrap_or_default().to_string(),
                    value_type: "string".to_string(),
                    value: None,
                };
                match self.references.last_mut() {
                    Some(path) => path.key = Some(key),
                    None => self.key = Some(key),
                }
            }
            tags::PROPERTY | tags::PROPERTY_ARRAY | tags::PROPERTY_REFERENCE => {
                self.start_property(&element);
            }
            _ => {}
        }
        Ok(())
    }

    fn enter_envelope(&mut self, tag: &'static str, element: &Element) -> Result<()> {
        if element.name == tag {
            if tag == tags::IMETHODRESPONSE {
                let name = element.attribute("NAME").unwrap_or_default();
                if name != self.ctx.method {
                    return Err(WbemError::MethodMismatch {
                        expected: self.ctx.method.to_string(),
                        actual: name.to_string(),
                    });
                }
            }
            self.entered.push(tag);
            return Ok(());
        }
        if element.name == tags::ERROR {
            let code = element
                .attribute("CODE")
                .and_then(|c| c.trim().parse::<u32>().ok())
                .unwrap_or(0);
            let message = element
                .attribute("DESCRIPTION")
                .map(str::to_string)
                .unwrap_or_else(|| format!("Error code {code}"));
            return Err(WbemError::Protocol { code, message });
        }
        Err(WbemError::UnexpectedElement {
            expected: tag.to_string(),
            actual: element.name.clone(),
        })
    }

    fn start_property(&mut self, element: &Element) {
        let name = element.attribute("NAME").unwrap_or_default().to_string();
        let array = element.name == tags::PROPERTY_ARRAY;
        let cim_type = if element.name == tags::PROPERTY_REFERENCE {
            CimType::Reference
        } else {
            lookup_type(element.attribute("TYPE"))
        };

        if !self.frozen {
            let column_type = if array {
                ColumnType::array_of(cim_type)
            } else {
                ColumnType::scalar(cim_type)
            };
            self.description.push(Column::new(name.clone(), column_type));
        }

        self.property = Some(PropertyState {
            name,
            cim_type,
            array,
            value: None,
            items: None,
        });
    }

    fn current_key(&mut self) -> Option<&mut KeyState> {
        match self.references.last_mut() {
            Some(path) => path.key.as_mut(),
            None => self.key.as_mut(),
        }
    }

    fn text(&mut self, content: &str) {
        if self.qualifier_depth > 0 {
            return;
        }
        if let Some(text) = self.text.as_mut() {
            text.push_str(content);
        }
    }

    fn end(&mut self, name: &str) -> Result<()> {
        if self.body_depth == 0 {
            return self.leave_envelope(name);
        }
        self.body_depth -= 1;

        if name == tags::QUALIFIER {
            self.qualifier_depth = self.qualifier_depth.saturating_sub(1);
            return Ok(());
        }
        if self.qualifier_depth > 0 {
            return Ok(());
        }

        match name {
            tags::VALUE => self.end_value(),
            tags::KEYVALUE => {
                let text = self.text.take().unwrap_or_default();
                if !text.trim().is_empty() {
                    if let Some(key) = self.current_key() {
                        key.value = Some(text);
                    }
                }
            }
            tags::KEYBINDING => {
                let bound = match self.references.last_mut() {
                    Some(path) => path.key.take().map(|k| (k.render(), true)),
                    None => self.key.take().map(|k| (k.render(), false)),
                };
                match bound {
                    Some((rendered, true)) => {
                        if let Some(path) = self.references.last_mut() {
                            path.bindings.push(rendered);
                        }
                    }
                    Some((rendered, false)) => self.bindings.push(rendered),
                    None => {}
                }
            }
            tags::VALUE_REFERENCE => self.end_reference(),
            tags::INSTANCENAME if self.references.is_empty() => {
                let path = render_path(&self.instance_class, &self.bindings);
                self.instance
                    .insert(pseudo_columns::PATH.to_string(), CimValue::String(path));
                self.bindings.clear();
            }
            tags::PROPERTY | tags::PROPERTY_ARRAY | tags::PROPERTY_REFERENCE => {
                if let Some(property) = self.property.take() {
                    let value = match (property.array, property.items) {
                        (true, Some(items)) => CimValue::Array(items),
                        (true, None) => CimValue::Null,
                        (false, _) => property.value.unwrap_or(CimValue::Null),
                    };
                    self.instance.insert(property.name.to_uppercase(), value);
                }
            }
            tags::INSTANCE => self.end_instance(),
            _ => {}
        }
        Ok(())
    }

    fn end_value(&mut self) {
        let Some(text) = self.text.take() else {
            return;
        };
        if !self.references.is_empty() || text.trim().is_empty() {
            return;
        }
        let Some(property) = self.property.as_mut() else {
            return;
        };
        let value = if text == "NULL" {
            CimValue::Null
        } else {
            convert_value(property.cim_type, &text)
        };
        match property.items.as_mut() {
            Some(items) => items.push(value),
            None => property.value = Some(value),
        }
    }

    fn end_reference(&mut self) {
        let Some(path) = self.references.pop() else {
            return;
        };
        let rendered = path.render();

        let key = match self.references.last_mut() {
            Some(parent) => parent.key.as_mut(),
            None => self.key.as_mut(),
        };
        if let Some(key) = key {
            key.value_type = "reference".to_string();
            key.value = Some(rendered);
            return;
        }

        if let Some(property) = self.property.as_mut() {
            let value = CimValue::String(rendered);
            match property.items.as_mut() {
                Some(items) => items.push(value),
                None => property.value = Some(value),
            }
        }
    }

    fn end_instance(&mut self) {
        if !self.frozen {
            self.freeze_description();
        }

        let instance = std::mem::take(&mut self.instance);
        if !self.ctx.filter.matches(&instance) {
            trace!(
                class = %self.instance_class,
                "instance dropped by key filter"
            );
            return;
        }

        let row: Row = self
            .description
            .iter()
            .map(|column| {
                instance
                    .get(&column.name.to_uppercase())
                    .cloned()
                    .unwrap_or(CimValue::Null)
            })
            .collect();
        trace!(
            class = %self.instance_class,
            columns = row.len(),
            "row emitted"
        );
        self.rows.push_back(row);
    }

    fn freeze_description(&mut self) {
        match self.ctx.columns.columns() {
            Some(requested) => {
                self.description = requested
                    .iter()
                    .map(|name| {
                        self.description
                            .iter()
                            .find(|c| c.name.eq_ignore_ascii_case(name))
                            .cloned()
                            .unwrap_or_else(|| Column::string(name.clone()))
                    })
                    .collect();
            }
            None => {
                self.description
                    .extend(pseudo_columns::ALL.iter().map(|name| Column::string(*name)));
            }
        }
        self.frozen = true;
    }

    fn leave_envelope(&mut self, name: &str) -> Result<()> {
        // NOTE: an empty IMETHODRESPONSE (no IRETURNVALUE) is a valid void result
        if self.expected.len() > 1 {
            return Err(WbemError::UnexpectedElement {
                expected: self.expected.last().copied().unwrap_or_default().to_string(),
                actual: format!("/{name}"),
            });
        }
        match self.entered.pop() {
            Some(tag) if tag == name => {
                if tag == tags::IMETHODRESPONSE {
                    self.expected.clear();
                }
                if self.entered.is_empty() {
                    self.finished = true;
                }
                Ok(())
            }
            Some(tag) => Err(WbemError::UnexpectedElement {
                expected: format!("/{tag}"),
                actual: format!("/{name}"),
            }),
            None => Err(WbemError::UnexpectedElement {
                expected: tags::CIM.to_string(),
                actual: format!("/{name}"),
            }),
        }
    }

    /// 인스턴스가 하나도 없으면 요청 컬럼(또는 빈 목록)으로 설명을 확정합니다.
    fn finish(mut self) -> ResultSet {
        if !self.frozen {
            self.description = self
                .ctx
                .columns
                .columns()
                .map(|requested| requested.iter().map(|n| Column::string(n.clone())).collect())
                .unwrap_or_default();
        }
        ResultSet {
            description: self.description,
            rows: self.rows,
        }
    }
}

/// 응답 스트림을 파싱합니다.
///
/// 스트림은 앞에서부터 한 번만 읽히며, `</CIM>` 이후의 바이트는 읽지 않습니다.
///
/// # 에러
///
/// - [`WbemError::UnexpectedElement`] — 엔벨로프 순서 위반
/// - [`WbemError::MethodMismatch`] — `IMETHODRESPONSE` NAME 불일치
/// - [`WbemError::Protocol`] — 서버 `ERROR` 요소
/// - [`WbemError::TruncatedResponse`] — 엔벨로프가 닫히기 전에 스트림 끝
/// - [`WbemError::Xml`] — 잘못된 XML
pub fn parse_response<R: BufRead>(source: R, ctx: ResponseContext<'_>) -> Result<ResultSet> {
    let mut reader = XmlReader::new(source);
    let mut parser = ResponseParser::new(ctx);

    while !parser.finished {
        match reader.next_event()? {
            XmlEvent::Start(element) => parser.start(element)?,
            XmlEvent::End(name) => parser.end(&name)?,
            XmlEvent::Text(content) => parser.text(&content),
            XmlEvent::Eof => return Err(WbemError::TruncatedResponse),
        }
    }

    let result = parser.finish();
    debug!(
        method = ctx.method,
        columns = result.description.len(),
        rows = result.rows.len(),
        "parsed response"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::query::translate;

    fn envelope(method: &str, body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<CIM CIMVERSION="2.0" DTDVERSION="2.0">
<MESSAGE ID="1001" PROTOCOLVERSION="1.0">
<SIMPLERSP>
<IMETHODRESPONSE NAME="{method}">
<IRETURNVALUE>
{body}
</IRETURNVALUE>
</IMETHODRESPONSE>
</SIMPLERSP>
</MESSAGE>
</CIM>"#
        )
    }

    /// "row emitted" 이벤트 수를 세는 레이어
    #[derive(Clone, Default)]
    struct RowEvents(std::sync::Arc<std::sync::atomic::AtomicUsize>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for RowEvents {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            struct Message(String);
            impl tracing::field::Visit for Message {
                fn record_debug(
                    &mut self,
                    field: &tracing::field::Field,
                    value: &dyn std::fmt::Debug,
                ) {
                    if field.name() == "message" {
                        self.0 = format!("{value:?}");
                    }
                }
            }

            let mut message = Message(String::new());
            event.record(&mut message);
            if message.0 == "row emitted" {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }
    }

    const DISK_INSTANCE: &str = r#"
<VALUE.NAMEDINSTANCE>
<INSTANCENAME CLASSNAME="CIM_DiskDrive">
<KEYBINDING NAME="DeviceID"><KEYVALUE VALUETYPE="string">sda</KEYVALUE></KEYBINDING>
<KEYBINDING NAME="Index"><KEYVALUE VALUETYPE="numeric">0</KEYVALUE></KEYBINDING>
</INSTANCENAME>
<INSTANCE CLASSNAME="CIM_DiskDrive">
<QUALIFIER NAME="Description" TYPE="string"><VALUE>ignored</VALUE></QUALIFIER>
<PROPERTY NAME="DeviceID" TYPE="string"><VALUE>sda</VALUE></PROPERTY>
<PROPERTY NAME="Size" TYPE="uint64">
<QUALIFIER NAME="Units" TYPE="string"><VALUE>Bytes</VALUE></QUALIFIER>
<VALUE>500107862016</VALUE>
</PROPERTY>
<PROPERTY NAME="Caption" TYPE="string"></PROPERTY>
<PROPERTY.ARRAY NAME="Capabilities" TYPE="uint16">
<VALUE.ARRAY><VALUE>3</VALUE><VALUE>4</VALUE></VALUE.ARRAY>
</PROPERTY.ARRAY>
</INSTANCE>
</VALUE.NAMEDINSTANCE>"#;

    fn parse(query: &str, method: &str, xml: &str) -> Result<ResultSet> {
        let plan = translate(query, None)?;
        let ctx = ResponseContext {
            method,
            namespace: "root/cimv2",
            columns: &plan.columns,
            filter: &plan.filter,
        };
        parse_response(xml.as_bytes(), ctx)
    }

    #[test]
    fn test_build_enumerate_request_body() {
        let op = Operation::EnumerateInstances {
            class_name: "CIM_DiskDrive".to_string(),
            property_list: Some(vec!["Name".to_string(), "Size".to_string()]),
        };
        let body = String::from_utf8(build_request_body(&op, "root/cimv2").unwrap()).unwrap();
        assert!(body.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
        assert!(body.contains(
            r#"<CIM CIMVERSION="2.0" DTDVERSION="2.0"><MESSAGE ID="1001" PROTOCOLVERSION="1.0"><SIMPLEREQ><IMETHODCALL NAME="EnumerateInstances">"#
        ));
        assert!(body.contains(r#"<CLASSNAME NAME="CIM_DiskDrive"/>"#));
        assert!(body.contains(
            r#"<IPARAMVALUE NAME="IncludeQualifiers"><VALUE>FALSE</VALUE></IPARAMVALUE>"#
        ));
        assert!(body.contains(r#"<IPARAMVALUE NAME="LocalOnly"><VALUE>FALSE</VALUE></IPARAMVALUE>"#));
        assert!(body.contains(
            r#"<IPARAMVALUE NAME="PropertyList"><VALUE.ARRAY><VALUE>Name</VALUE><VALUE>Size</VALUE></VALUE.ARRAY></IPARAMVALUE>"#
        ));
        assert!(body.ends_with("</IMETHODCALL></SIMPLEREQ></MESSAGE></CIM>"));
    }

    #[test]
    fn test_build_enumerate_without_property_list() {
        let op = Operation::EnumerateInstances {
            class_name: "C".to_string(),
            property_list: None,
        };
        let body = String::from_utf8(build_request_body(&op, "interop").unwrap()).unwrap();
        assert!(!body.contains("PropertyList"));
        assert!(body.contains(r#"<LOCALNAMESPACEPATH><NAMESPACE NAME="interop"/></LOCALNAMESPACEPATH>"#));
    }

    #[test]
    fn test_build_exec_query_escapes_query() {
        let op = Operation::ExecQuery {
            query: "SELECT * FROM C WHERE A < 3".to_string(),
            dialect: "WQL".to_string(),
        };
        let body = String::from_utf8(build_request_body(&op, "root/cimv2").unwrap()).unwrap();
        assert!(body.contains(
            r#"<IPARAMVALUE NAME="Query"><VALUE>SELECT * FROM C WHERE A &lt; 3</VALUE></IPARAMVALUE>"#
        ));
        assert!(body.contains(r#"<IPARAMVALUE NAME="QueryLanguage"><VALUE>WQL</VALUE></IPARAMVALUE>"#));
    }

    #[test]
    fn test_build_request_headers() {
        let op = Operation::EnumerateInstances {
            class_name: "C".to_string(),
            property_list: None,
        };
        let req = build_request(&op, "root/cimv2", "admin", "secret").unwrap();
        assert_eq!(req.header("content-type"), Some("application/xml; charset=\"utf-8\""));
        assert_eq!(req.header("Content-Length"), Some(req.body.len().to_string().as_str()));
        assert_eq!(req.header("CIMOperation"), Some("MethodCall"));
        assert_eq!(req.header("CIMMethod"), Some("EnumerateInstances"));
        assert_eq!(req.header("CIMObject"), Some("root/cimv2"));
        // base64("admin:secret")
        assert_eq!(req.header("Authorization"), Some("Basic YWRtaW46c2VjcmV0"));
    }

    #[test]
    fn test_build_request_without_user_has_no_auth() {
        let op = Operation::EnumerateInstances {
            class_name: "C".to_string(),
            property_list: None,
        };
        let req = build_request(&op, "root/cimv2", "", "ignored").unwrap();
        assert_eq!(req.header("Authorization"), None);
    }

    #[test]
    fn test_parse_select_star() {
        let xml = envelope("EnumerateInstances", DISK_INSTANCE);
        let rs = parse("SELECT * FROM CIM_DiskDrive", "EnumerateInstances", &xml).unwrap();

        let names: Vec<&str> = rs.description.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            ["DeviceID", "Size", "Caption", "Capabilities", "__CLASS", "__NAMESPACE", "__PATH"]
        );
        assert_eq!(
            rs.description[1].column_type,
            ColumnType::scalar(CimType::UInt64)
        );
        assert_eq!(
            rs.description[3].column_type,
            ColumnType::array_of(CimType::UInt16)
        );

        assert_eq!(rs.rows.len(), 1);
        let row = &rs.rows[0];
        assert_eq!(row[0], CimValue::String("sda".to_string()));
        assert_eq!(row[1], CimValue::UInt(500_107_862_016));
        assert_eq!(row[2], CimValue::Null);
        assert_eq!(row[3], CimValue::Array(vec![CimValue::UInt(3), CimValue::UInt(4)]));
        assert_eq!(row[4], CimValue::String("CIM_DiskDrive".to_string()));
        assert_eq!(row[5], CimValue::String("root/cimv2".to_string()));
        assert_eq!(
            row[6],
            CimValue::String("CIM_DiskDrive.DeviceID=\"sda\",Index=0".to_string())
        );
    }

    #[test]
    fn test_parse_requested_columns_order_and_backfill() {
        let xml = envelope("EnumerateInstances", DISK_INSTANCE);
        let rs = parse(
            "SELECT size, Missing, __PATH FROM CIM_DiskDrive",
            "EnumerateInstances",
            &xml,
        )
        .unwrap();
        assert_eq!(rs.description[0], Column::new("Size", ColumnType::scalar(CimType::UInt64)));
        assert_eq!(rs.description[1], Column::string("Missing"));
        assert_eq!(rs.description[2], Column::string("__PATH"));
        assert_eq!(
            rs.rows[0],
            vec![
                CimValue::UInt(500_107_862_016),
                CimValue::Null,
                CimValue::String("CIM_DiskDrive.DeviceID=\"sda\",Index=0".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_key_filter() {
        let two = format!("{DISK_INSTANCE}{}", DISK_INSTANCE.replace(">sda<", ">sdb<"));
        let xml = envelope("EnumerateInstances", &two);

        let rs = parse(
            "SELECT DeviceID FROM CIM_DiskDrive WHERE DeviceID='SDB'",
            "EnumerateInstances",
            &xml,
        )
        .unwrap();
        assert_eq!(rs.rows.len(), 1);
        assert_eq!(rs.rows[0][0], CimValue::String("sdb".to_string()));

        let rs = parse(
            "SELECT DeviceID FROM CIM_DiskDrive WHERE Size=1",
            "EnumerateInstances",
            &xml,
        )
        .unwrap();
        assert!(rs.rows.is_empty());
        // NOTE: description is still frozen from the first (dropped) instance
        assert_eq!(rs.description, vec![Column::string("DeviceID")]);
    }

    #[test]
    fn test_parse_traces_each_emitted_row() {
        use tracing_subscriber::layer::SubscriberExt;

        let two = format!("{DISK_INSTANCE}{}", DISK_INSTANCE.replace(">sda<", ">sdb<"));
        let xml = envelope("EnumerateInstances", &two);
        let events = RowEvents::default();
        let subscriber = tracing_subscriber::registry().with(events.clone());

        let rs = tracing::subscriber::with_default(subscriber, || {
            parse(
                "SELECT DeviceID FROM CIM_DiskDrive WHERE DeviceID='sda'",
                "EnumerateInstances",
                &xml,
            )
        })
        .unwrap();
        assert_eq!(rs.rows.len(), 1);
        assert_eq!(events.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parse_rejects_elements_after_return_value() {
        let tail = r#"<IRETURNVALUE></IRETURNVALUE>"#;
        let xml = envelope("EnumerateInstances", DISK_INSTANCE)
            .replace("</IRETURNVALUE>\n", &format!("</IRETURNVALUE>{tail}"));
        let err = parse("SELECT * FROM C", "EnumerateInstances", &xml).unwrap_err();
        assert!(matches!(
            err,
            WbemError::UnexpectedElement { ref expected, ref actual }
                if expected == "/IMETHODRESPONSE" && actual == "IRETURNVALUE"
        ));

        let xml = envelope("EnumerateInstances", "")
            .replace("</IRETURNVALUE>\n", r#"</IRETURNVALUE><ERROR CODE="1"/>"#);
        let err = parse("SELECT * FROM C", "EnumerateInstances", &xml).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(matches!(err, WbemError::UnexpectedElement { .. }));

        let xml = r#"<CIM><MESSAGE><SIMPLERSP><IMETHODRESPONSE NAME="EnumerateInstances"></IMETHODRESPONSE><VALUE>x</VALUE></SIMPLERSP></MESSAGE></CIM>"#;
        let err = parse("SELECT * FROM C", "EnumerateInstances", xml).unwrap_err();
        assert!(matches!(err, WbemError::UnexpectedElement { .. }));
    }

    #[test]
    fn test_parse_empty_result_description() {
        let xml = envelope("EnumerateInstances", "");
        let rs = parse("SELECT a, b FROM C", "EnumerateInstances", &xml).unwrap();
        assert!(rs.rows.is_empty());
        assert_eq!(rs.description, vec![Column::string("a"), Column::string("b")]);

        let rs = parse("SELECT * FROM C", "EnumerateInstances", &xml).unwrap();
        assert!(rs.description.is_empty());
    }

    #[test]
    fn test_parse_void_response() {
        let xml = r#"<CIM CIMVERSION="2.0" DTDVERSION="2.0"><MESSAGE ID="1001" PROTOCOLVERSION="1.0"><SIMPLERSP><IMETHODRESPONSE NAME="EnumerateInstances"/></SIMPLERSP></MESSAGE></CIM>"#;
        let rs = parse("SELECT * FROM C", "EnumerateInstances", xml).unwrap();
        assert!(rs.rows.is_empty());
    }

    #[test]
    fn test_parse_null_text_and_whitespace() {
        let body = r#"<VALUE.NAMEDINSTANCE><INSTANCENAME CLASSNAME="C"/>
<INSTANCE CLASSNAME="C">
<PROPERTY NAME="A" TYPE="string"><VALUE>NULL</VALUE></PROPERTY>
<PROPERTY NAME="B" TYPE="sint32"><VALUE>   </VALUE></PROPERTY>
<PROPERTY NAME="C" TYPE="boolean"><VALUE>TRUE</VALUE></PROPERTY>
<PROPERTY NAME="D" TYPE="sint8"><VALUE>-4</VALUE></PROPERTY>
</INSTANCE></VALUE.NAMEDINSTANCE>"#;
        let xml = envelope("EnumerateInstances", body);
        let rs = parse("SELECT A, B, C, D, __PATH FROM C", "EnumerateInstances", &xml).unwrap();
        assert_eq!(
            rs.rows[0],
            vec![
                CimValue::Null,
                CimValue::Null,
                CimValue::Bool(true),
                CimValue::SInt(-4),
                CimValue::String("C".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_reference_property() {
        let body = r#"<VALUE.NAMEDINSTANCE>
<INSTANCENAME CLASSNAME="CIM_SystemDevice">
<KEYBINDING NAME="PartComponent"><VALUE.REFERENCE><INSTANCEPATH>
<NAMESPACEPATH><HOST>srv</HOST><LOCALNAMESPACEPATH><NAMESPACE NAME="root"/><NAMESPACE NAME="cimv2"/></LOCALNAMESPACEPATH></NAMESPACEPATH>
<INSTANCENAME CLASSNAME="CIM_Fan"><KEYBINDING NAME="ID"><KEYVALUE VALUETYPE="numeric">1</KEYVALUE></KEYBINDING></INSTANCENAME>
</INSTANCEPATH></VALUE.REFERENCE></KEYBINDING>
</INSTANCENAME>
<INSTANCE CLASSNAME="CIM_SystemDevice">
<PROPERTY.REFERENCE NAME="PartComponent" REFERENCECLASS="CIM_Fan"><VALUE.REFERENCE>
<INSTANCENAME CLASSNAME="CIM_Fan"><KEYBINDING NAME="ID"><KEYVALUE VALUETYPE="numeric">1</KEYVALUE></KEYBINDING></INSTANCENAME>
</VALUE.REFERENCE></PROPERTY.REFERENCE>
</INSTANCE></VALUE.NAMEDINSTANCE>"#;
        let xml = envelope("EnumerateInstances", body);
        let rs = parse("SELECT * FROM CIM_SystemDevice", "EnumerateInstances", &xml).unwrap();
        assert_eq!(
            rs.description[0],
            Column::new("PartComponent", ColumnType::scalar(CimType::Reference))
        );
        let row = &rs.rows[0];
        assert_eq!(row[0], CimValue::String("CIM_Fan.ID=1".to_string()));
        assert_eq!(row[1], CimValue::String("CIM_SystemDevice".to_string()));
        assert_eq!(
            row[3],
            CimValue::String("CIM_SystemDevice.PartComponent=root/cimv2:CIM_Fan.ID=1".to_string())
        );
    }

    #[test]
    fn test_parse_error_element() {
        let xml = r#"<CIM CIMVERSION="2.0" DTDVERSION="2.0"><MESSAGE ID="1001" PROTOCOLVERSION="1.0"><SIMPLERSP><IMETHODRESPONSE NAME="EnumerateInstances"><ERROR CODE="5" DESCRIPTION="Access denied"/></IMETHODRESPONSE></SIMPLERSP></MESSAGE></CIM>"#;
        let err = parse("SELECT * FROM C", "EnumerateInstances", xml).unwrap_err();
        assert_eq!(err.protocol_error(), Some((5, "Access denied")));
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_parse_error_element_default_description() {
        let xml = r#"<CIM><MESSAGE><SIMPLERSP><IMETHODRESPONSE NAME="EnumerateInstances"><ERROR CODE="6"/></IMETHODRESPONSE></SIMPLERSP></MESSAGE></CIM>"#;
        let err = parse("SELECT * FROM C", "EnumerateInstances", xml).unwrap_err();
        assert_eq!(err.protocol_error(), Some((6, "Error code 6")));
    }

    #[test]
    fn test_parse_unexpected_root() {
        let err = parse("SELECT * FROM C", "EnumerateInstances", "<FOO/>").unwrap_err();
        assert!(matches!(
            err,
            WbemError::UnexpectedElement { ref expected, ref actual } if expected == "CIM" && actual == "FOO"
        ));
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_parse_method_mismatch() {
        let xml = envelope("ExecQuery", "");
        let err = parse("SELECT * FROM C", "EnumerateInstances", &xml).unwrap_err();
        assert!(matches!(err, WbemError::MethodMismatch { .. }));
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_parse_truncated() {
        let xml = r#"<CIM><MESSAGE><SIMPLERSP><IMETHODRESPONSE NAME="EnumerateInstances"><IRETURNVALUE>"#;
        let err = parse("SELECT * FROM C", "EnumerateInstances", xml).unwrap_err();
        assert!(matches!(err, WbemError::TruncatedResponse));
    }

    #[test]
    fn test_parse_premature_envelope_close() {
        let err = parse("SELECT * FROM C", "EnumerateInstances", "<CIM></CIM>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_parse_stops_after_envelope() {
        let xml = format!("{}<garbage", envelope("EnumerateInstances", ""));
        assert!(parse("SELECT * FROM C", "EnumerateInstances", &xml).is_ok());
    }
}
