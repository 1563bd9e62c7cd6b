//! SOAP envelope parsing and the runtime message types.
//!
//! Uses quick-xml which is safe against XXE by default (doesn't expand
//! entities); a prelude scan rejects DOCTYPE/entity declarations outright.

use crate::config::{ReaderLimits, SoapVersion};
use crate::error::{EndpointError, FaultKind};
use crate::value::Value;
use quick_xml::events::Event;
use quick_xml::Reader;

/// SOAP namespace URIs.
pub const SOAP_11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP_12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const WSA_NS: &str = "http://www.w3.org/2005/08/addressing";
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

impl SoapVersion {
    /// Envelope namespace for this version.
    pub fn namespace(&self) -> &'static str {
        match self {
            SoapVersion::Soap11 => SOAP_11_NS,
            SoapVersion::Soap12 => SOAP_12_NS,
        }
    }

    /// Content type this version speaks on the wire.
    pub fn media_type(&self) -> &'static str {
        match self {
            SoapVersion::Soap11 => "text/xml",
            SoapVersion::Soap12 => "application/soap+xml",
        }
    }
}

/// A parsed XML element subtree.
///
/// The body of a request envelope is materialized once into this shape; the
/// argument binder walks it instead of re-reading the stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlNode {
    /// Local element name
    pub name: String,
    /// Resolved namespace URI
    pub namespace: Option<String>,
    /// Attributes as written (qualified name, unescaped value)
    pub attributes: Vec<(String, String)>,
    /// Child elements in document order
    pub children: Vec<XmlNode>,
    /// Concatenated text content
    pub text: String,
}

impl XmlNode {
    /// First child with the given local name.
    pub fn child(&self, local: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == local)
    }

    /// Attribute value matched by local name (prefix ignored).
    pub fn attr_local(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == local || k.ends_with(&format!(":{}", local)))
            .map(|(_, v)| v.as_str())
    }

    /// Local part of the `xsi:type` attribute, if present.
    pub fn xsi_type(&self) -> Option<&str> {
        self.attr_local("type")
            .map(|t| t.rsplit(':').next().unwrap_or(t))
    }

    fn must_understand(&self) -> bool {
        matches!(self.attr_local("mustUnderstand"), Some("1") | Some("true"))
    }
}

/// A non-addressing SOAP header element.
#[derive(Debug, Clone)]
pub struct HeaderEntry {
    pub name: String,
    pub namespace: Option<String>,
    pub must_understand: bool,
    pub node: XmlNode,
}

/// A parsed request envelope.
#[derive(Debug)]
pub struct Envelope {
    /// SOAP version the envelope was parsed at
    pub version: SoapVersion,
    /// Header elements, WS-Addressing fields lifted out
    pub headers: Vec<HeaderEntry>,
    /// wsa:Action, when the envelope carried one
    pub action: Option<String>,
    pub message_id: Option<String>,
    pub reply_to: Option<String>,
    pub relates_to: Option<String>,
    body: Option<XmlNode>,
    body_taken: bool,
}

impl Envelope {
    /// Whether the body carries no elements.
    pub fn is_empty(&self) -> bool {
        self.body
            .as_ref()
            .map(|b| b.children.is_empty())
            .unwrap_or(true)
    }

    /// Take the body contents. May be called at most once per request.
    pub fn take_body(&mut self) -> Result<Option<XmlNode>, EndpointError> {
        if self.body_taken {
            return Err(EndpointError::Internal(
                "envelope body already consumed".to_string(),
            ));
        }
        self.body_taken = true;
        Ok(self.body.take().filter(|b| !b.children.is_empty()))
    }

    /// Peek the first body element's local name without consuming the body.
    pub fn body_root_name(&self) -> Option<&str> {
        self.body
            .as_ref()
            .and_then(|b| b.children.first())
            .map(|c| c.name.as_str())
    }
}

/// Parse raw bytes as a SOAP envelope at the given version.
pub fn parse_envelope(
    data: &[u8],
    version: SoapVersion,
    limits: &ReaderLimits,
) -> Result<Envelope, EndpointError> {
    if data.len() > limits.max_body_bytes {
        return Err(EndpointError::MalformedEnvelope(format!(
            "request body size {} exceeds maximum {}",
            data.len(),
            limits.max_body_bytes
        )));
    }

    let xml = decode_text(data)?;
    check_xxe_prelude(&xml)?;

    let root = build_tree(&xml, limits)?;
    if root.name != "Envelope" {
        return Err(EndpointError::MalformedEnvelope(format!(
            "document root is '{}', expected Envelope",
            root.name
        )));
    }
    let expected_ns = version.namespace();
    match root.namespace.as_deref() {
        Some(ns) if ns == expected_ns => {}
        Some(ns) => {
            return Err(EndpointError::MalformedEnvelope(format!(
                "envelope namespace '{}' does not match negotiated SOAP version",
                ns
            )))
        }
        None => {
            return Err(EndpointError::MalformedEnvelope(
                "envelope element carries no namespace".to_string(),
            ))
        }
    }

    let mut headers = Vec::new();
    let mut action = None;
    let mut message_id = None;
    let mut reply_to = None;
    let mut relates_to = None;

    if let Some(header) = root
        .children
        .iter()
        .find(|c| c.name == "Header" && c.namespace.as_deref() == Some(expected_ns))
    {
        if subtree_size(header) > limits.max_envelope_size {
            return Err(EndpointError::MalformedEnvelope(format!(
                "header section exceeds the {} byte window",
                limits.max_envelope_size
            )));
        }
        for entry in &header.children {
            if entry.namespace.as_deref() == Some(WSA_NS) {
                let text = entry.text.trim().to_string();
                match entry.name.as_str() {
                    "Action" => action = Some(text),
                    "MessageID" => message_id = Some(text),
                    "RelatesTo" => relates_to = Some(text),
                    "ReplyTo" => {
                        // wsa:ReplyTo wraps an Address endpoint reference
                        let address = entry
                            .child("Address")
                            .map(|a| a.text.trim().to_string())
                            .unwrap_or(text);
                        reply_to = Some(address);
                    }
                    _ => headers.push(HeaderEntry {
                        name: entry.name.clone(),
                        namespace: entry.namespace.clone(),
                        must_understand: entry.must_understand(),
                        node: entry.clone(),
                    }),
                }
            } else {
                headers.push(HeaderEntry {
                    name: entry.name.clone(),
                    namespace: entry.namespace.clone(),
                    must_understand: entry.must_understand(),
                    node: entry.clone(),
                });
            }
        }
    }

    let body = root
        .children
        .iter()
        .find(|c| c.name == "Body" && c.namespace.as_deref() == Some(expected_ns))
        .cloned();
    if body.is_none() {
        return Err(EndpointError::MalformedEnvelope(
            "envelope carries no Body element".to_string(),
        ));
    }

    Ok(Envelope {
        version,
        headers,
        action,
        message_id,
        reply_to,
        relates_to,
        body,
        body_taken: false,
    })
}

/// Decode the request bytes as UTF-8, or UTF-16 when a BOM announces it.
fn decode_text(data: &[u8]) -> Result<String, EndpointError> {
    if data.len() >= 2 && data[0] == 0xFF && data[1] == 0xFE {
        return decode_utf16(&data[2..], u16::from_le_bytes);
    }
    if data.len() >= 2 && data[0] == 0xFE && data[1] == 0xFF {
        return decode_utf16(&data[2..], u16::from_be_bytes);
    }
    std::str::from_utf8(data)
        .map(|s| s.to_string())
        .map_err(|e| EndpointError::MalformedEnvelope(format!("invalid UTF-8: {}", e)))
}

fn decode_utf16(data: &[u8], combine: fn([u8; 2]) -> u16) -> Result<String, EndpointError> {
    if data.len() % 2 != 0 {
        return Err(EndpointError::MalformedEnvelope(
            "odd-length UTF-16 payload".to_string(),
        ));
    }
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| combine([c[0], c[1]]))
        .collect();
    String::from_utf16(&units)
        .map_err(|e| EndpointError::MalformedEnvelope(format!("invalid UTF-16: {}", e)))
}

/// Approximate serialized size of a subtree, used for the header window.
fn subtree_size(node: &XmlNode) -> usize {
    node.name.len()
        + node.text.len()
        + node
            .attributes
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum::<usize>()
        + node.children.iter().map(subtree_size).sum::<usize>()
}

/// Reject DOCTYPE and entity declarations before parsing.
fn check_xxe_prelude(xml: &str) -> Result<(), EndpointError> {
    if xml.contains("<!DOCTYPE") || xml.contains("<!doctype") {
        return Err(EndpointError::MalformedEnvelope(
            "DOCTYPE declarations are not allowed".to_string(),
        ));
    }
    if xml.contains("<!ENTITY") || xml.contains("<!entity") {
        return Err(EndpointError::MalformedEnvelope(
            "entity declarations are not allowed".to_string(),
        ));
    }
    Ok(())
}

/// In-scope namespace bindings for one open element.
#[derive(Debug, Clone, Default)]
struct NsScope {
    default_ns: Option<String>,
    prefixes: Vec<(String, String)>,
}

impl NsScope {
    fn resolve(&self, prefix: Option<&str>) -> Option<String> {
        match prefix {
            None => self.default_ns.clone(),
            Some("xml") => Some("http://www.w3.org/XML/1998/namespace".to_string()),
            Some(p) => self
                .prefixes
                .iter()
                .rev()
                .find(|(name, _)| name == p)
                .map(|(_, uri)| uri.clone()),
        }
    }
}

/// Build the element tree for a whole document.
fn build_tree(xml: &str, limits: &ReaderLimits) -> Result<XmlNode, EndpointError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut scopes: Vec<NsScope> = vec![NsScope::default()];
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                if stack.len() as u32 >= limits.max_depth {
                    return Err(EndpointError::MalformedEnvelope(format!(
                        "element nesting exceeds maximum depth {}",
                        limits.max_depth
                    )));
                }
                let (node, scope) = open_element(e, scopes.last().unwrap())?;
                stack.push(node);
                scopes.push(scope);
            }
            Ok(Event::Empty(ref e)) => {
                let (node, _) = open_element(e, scopes.last().unwrap())?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Ok(node),
                }
            }
            Ok(Event::End(_)) => {
                scopes.pop();
                let node = stack.pop().ok_or_else(|| {
                    EndpointError::MalformedEnvelope("unbalanced end tag".to_string())
                })?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Ok(node),
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().map_err(|e| {
                    EndpointError::MalformedEnvelope(format!("text decode error: {}", e))
                })?;
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text);
                }
            }
            Ok(Event::CData(ref e)) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(e));
                }
            }
            Ok(Event::Eof) => {
                return Err(EndpointError::MalformedEnvelope(
                    "no root element found".to_string(),
                ))
            }
            Err(e) => {
                return Err(EndpointError::MalformedEnvelope(format!(
                    "XML parse error: {}",
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }
}

fn open_element(
    e: &quick_xml::events::BytesStart,
    parent_scope: &NsScope,
) -> Result<(XmlNode, NsScope), EndpointError> {
    let mut scope = parent_scope.clone();
    let mut attributes = Vec::new();

    for attr in e.attributes() {
        let attr = attr.map_err(|e| {
            EndpointError::MalformedEnvelope(format!("attribute parse error: {}", e))
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| {
                EndpointError::MalformedEnvelope(format!("attribute decode error: {}", e))
            })?
            .to_string();

        if key == "xmlns" {
            scope.default_ns = Some(value.clone());
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            scope.prefixes.push((prefix.to_string(), value.clone()));
        }
        attributes.push((key, value));
    }

    let qname = String::from_utf8_lossy(e.name().as_ref()).to_string();
    let (prefix, local) = match qname.split_once(':') {
        Some((p, l)) => (Some(p.to_string()), l.to_string()),
        None => (None, qname),
    };
    let namespace = scope.resolve(prefix.as_deref());

    Ok((
        XmlNode {
            name: local,
            namespace,
            attributes,
            children: Vec::new(),
            text: String::new(),
        },
        scope,
    ))
}

/// A side-channel record attached to a response envelope by user code to
/// override HTTP response fields. Applied uniformly for success and fault.
#[derive(Debug, Clone, Default)]
pub struct HttpOverride {
    pub status: Option<u16>,
    pub reason: Option<String>,
    pub headers: Vec<(String, String)>,
}

/// A SOAP header to emit on the response.
#[derive(Debug, Clone)]
pub struct ReplyHeader {
    pub name: String,
    pub namespace: Option<String>,
    pub must_understand: bool,
    pub value: Value,
}

/// The response message under construction.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub version: SoapVersion,
    /// Emit WS-Addressing headers for the fields below
    pub addressed: bool,
    /// Response action; mirrored into the SOAPAction HTTP header
    pub action: Option<String>,
    /// WS-Addressing RelatesTo (request MessageID)
    pub relates_to: Option<String>,
    /// WS-Addressing To (request ReplyTo address)
    pub to: Option<String>,
    pub headers: Vec<ReplyHeader>,
    pub body: ResponseBody,
    pub http: Option<HttpOverride>,
}

impl ResponseEnvelope {
    pub fn new(version: SoapVersion, body: ResponseBody) -> Self {
        Self {
            version,
            addressed: false,
            action: None,
            relates_to: None,
            to: None,
            headers: Vec::new(),
            body,
            http: None,
        }
    }
}

/// Response body shapes the encoder knows how to serialize.
#[derive(Debug, Clone)]
pub enum ResponseBody {
    /// No body (one-way acknowledgements)
    Empty,
    /// Wrapped operation response: `<{wrapper}><{result_element}>..</>..out values..</>`
    Operation {
        wrapper: String,
        namespace: String,
        result_element: String,
        result: Value,
        out_values: Vec<(String, Value)>,
    },
    /// Message-contract response: record fields inside (or instead of) a wrapper
    Contract {
        wrapped: bool,
        wrapper: String,
        namespace: String,
        value: Value,
    },
    /// A version-correct SOAP fault
    Fault(FaultDetail),
}

/// Payload of a fault body.
#[derive(Debug, Clone)]
pub struct FaultDetail {
    pub kind: FaultKind,
    pub reason: String,
}
