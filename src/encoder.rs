//! Message encoders: SOAP version + text encoding + reader limits.
//!
//! An endpoint owns one or more encoders in declared order; the first whose
//! content-type predicate accepts the request is chosen, and the first is
//! the default when none match.

use crate::config::{AddressingVersion, EncoderConfig, ReaderLimits, SoapVersion, WriteEncoding};
use crate::envelope::{
    parse_envelope, Envelope, FaultDetail, ResponseBody, ResponseEnvelope, WSA_NS,
};
use crate::error::EndpointError;
use crate::value::Value;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::collections::HashMap;

/// Namespace used for machine-readable fault detail codes.
pub const FAULT_DETAIL_NS: &str = "urn:soap-endpoint:fault";

/// Output formatting knobs passed down from the endpoint options.
#[derive(Debug, Clone, Default)]
pub struct WriteFormat {
    pub omit_xml_declaration: bool,
    pub indent_xml: bool,
    /// Namespace URI -> preferred prefix
    pub prefixes: HashMap<String, String>,
}

/// A message encoder bound to one SOAP version.
#[derive(Debug, Clone)]
pub struct MessageEncoder {
    config: EncoderConfig,
}

impl MessageEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    pub fn version(&self) -> SoapVersion {
        self.config.version
    }

    pub fn addressing(&self) -> AddressingVersion {
        self.config.addressing
    }

    pub fn limits(&self) -> &ReaderLimits {
        &self.config.reader_limits
    }

    /// Content-type predicate for encoder selection.
    pub fn accepts_content_type(&self, content_type: &str) -> bool {
        let ct = content_type.to_lowercase();
        match self.config.version {
            SoapVersion::Soap11 => ct.contains("text/xml") || ct.contains("application/xml"),
            SoapVersion::Soap12 => ct.contains("application/soap+xml"),
        }
    }

    /// Content type for responses when the request did not carry one.
    pub fn default_content_type(&self) -> String {
        format!("{}; charset=utf-8", self.config.version.media_type())
    }

    /// Parse a request body into an envelope at this encoder's version.
    pub fn read(&self, data: &[u8]) -> Result<Envelope, EndpointError> {
        parse_envelope(data, self.config.version, &self.config.reader_limits)
    }

    /// Serialize a response envelope.
    pub fn write(
        &self,
        envelope: &ResponseEnvelope,
        format: &WriteFormat,
    ) -> Result<Vec<u8>, EndpointError> {
        let mut writer = if format.indent_xml {
            Writer::new_with_indent(Vec::new(), b' ', 2)
        } else {
            Writer::new(Vec::new())
        };

        if !format.omit_xml_declaration {
            let label = match self.config.write_encoding {
                WriteEncoding::Utf8 => "utf-8",
                WriteEncoding::Utf16 => "utf-16",
            };
            writer
                .write_event(Event::Decl(BytesDecl::new("1.0", Some(label), None)))
                .map_err(write_err)?;
        }

        let ns = envelope.version.namespace();
        let soap_prefix = format
            .prefixes
            .get(ns)
            .map(|p| p.as_str())
            .unwrap_or("soap")
            .to_string();
        let envelope_tag = format!("{}:Envelope", soap_prefix);

        let mut start = BytesStart::new(envelope_tag.as_str());
        start.push_attribute((format!("xmlns:{}", soap_prefix).as_str(), ns));
        if envelope.addressed {
            start.push_attribute(("xmlns:wsa", WSA_NS));
        }
        writer.write_event(Event::Start(start)).map_err(write_err)?;

        if envelope.addressed || !envelope.headers.is_empty() {
            self.write_header(&mut writer, envelope, &soap_prefix)?;
        }
        self.write_body(&mut writer, envelope, &soap_prefix)?;

        writer
            .write_event(Event::End(BytesEnd::new(envelope_tag.as_str())))
            .map_err(write_err)?;

        let bytes = writer.into_inner();
        match self.config.write_encoding {
            WriteEncoding::Utf8 => Ok(bytes),
            WriteEncoding::Utf16 => {
                let text = String::from_utf8(bytes)
                    .map_err(|e| EndpointError::ResponseWrite(e.to_string()))?;
                let mut out = vec![0xFF, 0xFE];
                for unit in text.encode_utf16() {
                    out.extend_from_slice(&unit.to_le_bytes());
                }
                Ok(out)
            }
        }
    }

    fn write_header(
        &self,
        writer: &mut Writer<Vec<u8>>,
        envelope: &ResponseEnvelope,
        soap_prefix: &str,
    ) -> Result<(), EndpointError> {
        let tag = format!("{}:Header", soap_prefix);
        writer
            .write_event(Event::Start(BytesStart::new(tag.as_str())))
            .map_err(write_err)?;

        if envelope.addressed {
            if let Some(action) = &envelope.action {
                write_text_element(writer, "wsa:Action", action)?;
            }
            if let Some(relates_to) = &envelope.relates_to {
                write_text_element(writer, "wsa:RelatesTo", relates_to)?;
            }
            if let Some(to) = &envelope.to {
                write_text_element(writer, "wsa:To", to)?;
            }
        }

        for header in &envelope.headers {
            let mut start = BytesStart::new(header.name.as_str());
            if let Some(ns) = &header.namespace {
                start.push_attribute(("xmlns", ns.as_str()));
            }
            if header.must_understand {
                start.push_attribute((format!("{}:mustUnderstand", soap_prefix).as_str(), "1"));
            }
            writer.write_event(Event::Start(start)).map_err(write_err)?;
            write_value_content(writer, &header.value)?;
            writer
                .write_event(Event::End(BytesEnd::new(header.name.as_str())))
                .map_err(write_err)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new(tag.as_str())))
            .map_err(write_err)?;
        Ok(())
    }

    fn write_body(
        &self,
        writer: &mut Writer<Vec<u8>>,
        envelope: &ResponseEnvelope,
        soap_prefix: &str,
    ) -> Result<(), EndpointError> {
        let tag = format!("{}:Body", soap_prefix);
        match &envelope.body {
            ResponseBody::Empty => {
                writer
                    .write_event(Event::Empty(BytesStart::new(tag.as_str())))
                    .map_err(write_err)?;
                return Ok(());
            }
            _ => {
                writer
                    .write_event(Event::Start(BytesStart::new(tag.as_str())))
                    .map_err(write_err)?;
            }
        }

        match &envelope.body {
            ResponseBody::Empty => unreachable!(),
            ResponseBody::Operation {
                wrapper,
                namespace,
                result_element,
                result,
                out_values,
            } => {
                let mut start = BytesStart::new(wrapper.as_str());
                start.push_attribute(("xmlns", namespace.as_str()));
                writer.write_event(Event::Start(start)).map_err(write_err)?;
                if !matches!(result, Value::Null) {
                    write_value_element(writer, result_element, None, result)?;
                }
                for (name, value) in out_values {
                    write_value_element(writer, name, None, value)?;
                }
                writer
                    .write_event(Event::End(BytesEnd::new(wrapper.as_str())))
                    .map_err(write_err)?;
            }
            ResponseBody::Contract {
                wrapped,
                wrapper,
                namespace,
                value,
            } => {
                if *wrapped {
                    let mut start = BytesStart::new(wrapper.as_str());
                    start.push_attribute(("xmlns", namespace.as_str()));
                    writer.write_event(Event::Start(start)).map_err(write_err)?;
                    write_value_content(writer, value)?;
                    writer
                        .write_event(Event::End(BytesEnd::new(wrapper.as_str())))
                        .map_err(write_err)?;
                } else if let Value::Record { fields, .. } = value {
                    for (name, field) in fields {
                        write_value_element(writer, name, Some(namespace), field)?;
                    }
                } else {
                    write_value_element(writer, wrapper, Some(namespace), value)?;
                }
            }
            ResponseBody::Fault(detail) => {
                self.write_fault(writer, detail, soap_prefix)?;
            }
        }

        writer
            .write_event(Event::End(BytesEnd::new(tag.as_str())))
            .map_err(write_err)?;
        Ok(())
    }

    fn write_fault(
        &self,
        writer: &mut Writer<Vec<u8>>,
        detail: &FaultDetail,
        soap_prefix: &str,
    ) -> Result<(), EndpointError> {
        let fault_tag = format!("{}:Fault", soap_prefix);
        writer
            .write_event(Event::Start(BytesStart::new(fault_tag.as_str())))
            .map_err(write_err)?;

        match self.config.version {
            SoapVersion::Soap11 => {
                let code = if detail.kind.is_sender_fault() {
                    format!("{}:Client", soap_prefix)
                } else {
                    format!("{}:Server", soap_prefix)
                };
                write_text_element(writer, "faultcode", &code)?;
                write_text_element(writer, "faultstring", &detail.reason)?;
                writer
                    .write_event(Event::Start(BytesStart::new("detail")))
                    .map_err(write_err)?;
                write_fault_code(writer, detail)?;
                writer
                    .write_event(Event::End(BytesEnd::new("detail")))
                    .map_err(write_err)?;
            }
            SoapVersion::Soap12 => {
                let value = if detail.kind.is_sender_fault() {
                    format!("{}:Sender", soap_prefix)
                } else {
                    format!("{}:Receiver", soap_prefix)
                };
                let code_tag = format!("{}:Code", soap_prefix);
                let value_tag = format!("{}:Value", soap_prefix);
                writer
                    .write_event(Event::Start(BytesStart::new(code_tag.as_str())))
                    .map_err(write_err)?;
                write_text_element(writer, &value_tag, &value)?;
                writer
                    .write_event(Event::End(BytesEnd::new(code_tag.as_str())))
                    .map_err(write_err)?;

                let reason_tag = format!("{}:Reason", soap_prefix);
                writer
                    .write_event(Event::Start(BytesStart::new(reason_tag.as_str())))
                    .map_err(write_err)?;
                let text_tag = format!("{}:Text", soap_prefix);
                let mut text_start = BytesStart::new(text_tag.as_str());
                text_start.push_attribute(("xml:lang", "en"));
                writer
                    .write_event(Event::Start(text_start))
                    .map_err(write_err)?;
                writer
                    .write_event(Event::Text(BytesText::new(&detail.reason)))
                    .map_err(write_err)?;
                writer
                    .write_event(Event::End(BytesEnd::new(text_tag.as_str())))
                    .map_err(write_err)?;
                writer
                    .write_event(Event::End(BytesEnd::new(reason_tag.as_str())))
                    .map_err(write_err)?;

                let detail_tag = format!("{}:Detail", soap_prefix);
                writer
                    .write_event(Event::Start(BytesStart::new(detail_tag.as_str())))
                    .map_err(write_err)?;
                write_fault_code(writer, detail)?;
                writer
                    .write_event(Event::End(BytesEnd::new(detail_tag.as_str())))
                    .map_err(write_err)?;
            }
        }

        writer
            .write_event(Event::End(BytesEnd::new(fault_tag.as_str())))
            .map_err(write_err)?;
        Ok(())
    }
}

/// Select the encoder for an incoming content type.
///
/// Declared order wins; an empty or unrecognized content type falls back to
/// the first encoder.
pub fn select_encoder<'a>(
    encoders: &'a [MessageEncoder],
    content_type: &str,
) -> &'a MessageEncoder {
    encoders
        .iter()
        .find(|e| !content_type.is_empty() && e.accepts_content_type(content_type))
        .unwrap_or(&encoders[0])
}

/// Extract the `action` parameter from a SOAP 1.2 content type.
pub fn action_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("action") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

fn write_err<E: std::fmt::Display>(e: E) -> EndpointError {
    EndpointError::ResponseWrite(e.to_string())
}

fn write_text_element(
    writer: &mut Writer<Vec<u8>>,
    tag: &str,
    text: &str,
) -> Result<(), EndpointError> {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .map_err(write_err)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(write_err)?;
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .map_err(write_err)?;
    Ok(())
}

fn write_fault_code(
    writer: &mut Writer<Vec<u8>>,
    detail: &FaultDetail,
) -> Result<(), EndpointError> {
    let mut start = BytesStart::new("code");
    start.push_attribute(("xmlns", FAULT_DETAIL_NS));
    writer.write_event(Event::Start(start)).map_err(write_err)?;
    writer
        .write_event(Event::Text(BytesText::new(detail.kind.as_str())))
        .map_err(write_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("code")))
        .map_err(write_err)?;
    Ok(())
}

/// Write one named element carrying a value.
fn write_value_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    namespace: Option<&str>,
    value: &Value,
) -> Result<(), EndpointError> {
    let mut start = BytesStart::new(name);
    if let Some(ns) = namespace {
        start.push_attribute(("xmlns", ns));
    }
    if matches!(value, Value::Null) {
        writer.write_event(Event::Empty(start)).map_err(write_err)?;
        return Ok(());
    }
    writer.write_event(Event::Start(start)).map_err(write_err)?;
    write_value_content(writer, value)?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(write_err)?;
    Ok(())
}

/// Write a value's content inside an already-open element.
fn write_value_content(writer: &mut Writer<Vec<u8>>, value: &Value) -> Result<(), EndpointError> {
    match value {
        Value::Null => Ok(()),
        Value::List(items) => {
            for item in items {
                let name = match item {
                    Value::Record { type_name, .. } => type_name.as_str(),
                    _ => "item",
                };
                write_value_element(writer, name, None, item)?;
            }
            Ok(())
        }
        Value::Record { fields, .. } => {
            for (name, field) in fields {
                write_value_element(writer, name, None, field)?;
            }
            Ok(())
        }
        scalar => {
            let text = scalar.to_xml_text().unwrap_or_default();
            writer
                .write_event(Event::Text(BytesText::new(&text)))
                .map_err(write_err)
        }
    }
}
