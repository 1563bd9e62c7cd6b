//! Configuration types for the SOAP endpoint.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main configuration for a SOAP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointOptions {
    /// URL path this endpoint answers on (e.g. "/Service.svc")
    pub path: String,

    /// Compare the request path case-insensitively
    pub case_insensitive_path: bool,

    /// Serializer used by the argument binder and response body writer
    pub serializer: SoapSerializer,

    /// Omit the `<?xml ...?>` declaration on responses
    pub omit_xml_declaration: bool,

    /// Indent response XML
    pub indent_xml: bool,

    /// Serve metadata over plain HTTP GET
    pub http_get_enabled: bool,

    /// Serve metadata over HTTPS GET
    pub https_get_enabled: bool,

    /// Advisory flag reflected in generated metadata only
    pub use_basic_authentication: bool,

    /// Encoder configurations in negotiation order; empty means one default
    pub encoders: Vec<EncoderConfig>,

    /// Optional file-backed metadata
    pub wsdl_files: Option<WsdlFileOptions>,

    /// Preferred XML namespace prefixes (namespace URI -> prefix)
    pub namespace_prefix_overrides: HashMap<String, String>,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            path: "/Service.svc".to_string(),
            case_insensitive_path: false,
            serializer: SoapSerializer::DataContract,
            omit_xml_declaration: true,
            indent_xml: false,
            http_get_enabled: true,
            https_get_enabled: true,
            use_basic_authentication: false,
            encoders: Vec::new(),
            wsdl_files: None,
            namespace_prefix_overrides: HashMap::new(),
        }
    }
}

impl EndpointOptions {
    /// Encoder configs with the single-default fallback applied.
    pub fn effective_encoders(&self) -> Vec<EncoderConfig> {
        if self.encoders.is_empty() {
            vec![EncoderConfig::default()]
        } else {
            self.encoders.clone()
        }
    }
}

/// Serializer strategy for parameters and response bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SoapSerializer {
    /// Namespace-strict binding with declared-namespace fallback
    #[default]
    DataContract,
    /// Local-name binding, namespace-lax
    XmlSerializer,
}

/// Per-encoder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// SOAP version this encoder speaks
    pub version: SoapVersion,

    /// WS-Addressing version
    pub addressing: AddressingVersion,

    /// Text encoding for response bodies
    pub write_encoding: WriteEncoding,

    /// Reader limits applied while parsing request envelopes
    pub reader_limits: ReaderLimits,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            version: SoapVersion::Soap11,
            addressing: AddressingVersion::None,
            write_encoding: WriteEncoding::Utf8,
            reader_limits: ReaderLimits::default(),
        }
    }
}

/// SOAP versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SoapVersion {
    /// SOAP 1.1 (namespace: http://schemas.xmlsoap.org/soap/envelope/)
    #[serde(rename = "1.1")]
    #[default]
    Soap11,
    /// SOAP 1.2 (namespace: http://www.w3.org/2003/05/soap-envelope)
    #[serde(rename = "1.2")]
    Soap12,
}

/// WS-Addressing versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AddressingVersion {
    /// No addressing headers
    #[default]
    None,
    /// WS-Addressing 1.0 (namespace: http://www.w3.org/2005/08/addressing)
    #[serde(rename = "ws-addressing-1.0")]
    WsAddressing10,
}

/// Text encoding used when writing responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WriteEncoding {
    #[default]
    Utf8,
    /// UTF-16LE with BOM
    Utf16,
}

/// Limits applied while reading request envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderLimits {
    /// Size window the header section must fit within (bytes)
    pub max_envelope_size: usize,

    /// Maximum element nesting depth
    pub max_depth: u32,

    /// Maximum request body size accepted from the transport (bytes)
    pub max_body_bytes: usize,
}

impl Default for ReaderLimits {
    fn default() -> Self {
        Self {
            max_envelope_size: 65_536, // 64KB window
            max_depth: 32,
            max_body_bytes: 4 * 1_048_576, // 4MB
        }
    }
}

/// File-backed metadata configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WsdlFileOptions {
    /// Filesystem root the folders below are resolved against
    pub app_path: String,

    /// Virtual path prefix reflected in emitted documents
    pub virtual_path: String,

    /// Replacement for the `soap:address` location in the served WSDL
    pub url_override: Option<String>,

    /// Folder and file mapping for this service
    pub mapping: WsdlMapping,
}

/// Folder/file mapping for file-backed metadata.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WsdlMapping {
    /// Folder containing XSD schemas served via `?xsd&name=...`
    pub schema_folder: String,

    /// Folder containing the WSDL document
    pub wsdl_folder: String,

    /// WSDL filename served via `?wsdl`
    pub wsdl_file: String,
}
