//! Metadata emission: generated WSDL from the service model, and
//! file-backed WSDL/XSD serving with a path traversal defense.
//!
//! The generator is deliberately thin; it emits a well-formed WSDL 1.1
//! document straight off the metadata table.

use crate::config::{EndpointOptions, SoapVersion, WsdlFileOptions};
use crate::error::EndpointError;
use crate::model::{OperationDescription, ServiceDescription};
use crate::value::{ComplexType, TypeInfo};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const WSDL_NS: &str = "http://schemas.xmlsoap.org/wsdl/";
const WSDL_SOAP_11_NS: &str = "http://schemas.xmlsoap.org/wsdl/soap/";
const WSDL_SOAP_12_NS: &str = "http://schemas.xmlsoap.org/wsdl/soap12/";
const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema";
const SOAP_HTTP_TRANSPORT: &str = "http://schemas.xmlsoap.org/soap/http";

/// Generate a WSDL document for the service.
pub fn generate_wsdl(
    service: &ServiceDescription,
    options: &EndpointOptions,
    soap_version: SoapVersion,
    base_url: &str,
) -> Result<String, EndpointError> {
    let target_ns = service
        .contracts
        .first()
        .map(|c| c.namespace.clone())
        .unwrap_or_else(|| "http://tempuri.org/".to_string());
    let tns_prefix = options
        .namespace_prefix_overrides
        .get(&target_ns)
        .map(|p| p.as_str())
        .unwrap_or("tns");
    let soap_wsdl_ns = match soap_version {
        SoapVersion::Soap11 => WSDL_SOAP_11_NS,
        SoapVersion::Soap12 => WSDL_SOAP_12_NS,
    };

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    let mut definitions = BytesStart::new("wsdl:definitions");
    definitions.push_attribute(("name", service.name.as_str()));
    definitions.push_attribute(("targetNamespace", target_ns.as_str()));
    definitions.push_attribute(("xmlns:wsdl", WSDL_NS));
    definitions.push_attribute(("xmlns:soap", soap_wsdl_ns));
    definitions.push_attribute(("xmlns:xs", XSD_NS));
    definitions.push_attribute((format!("xmlns:{}", tns_prefix).as_str(), target_ns.as_str()));
    writer.write_event(Event::Start(definitions)).map_err(gen_err)?;

    if options.use_basic_authentication {
        write_text(
            &mut writer,
            "wsdl:documentation",
            "This service requires HTTP Basic authentication.",
        )?;
    }

    write_types(&mut writer, service, &target_ns)?;
    write_messages(&mut writer, service, tns_prefix)?;
    write_port_types(&mut writer, service, tns_prefix)?;
    write_bindings(&mut writer, service, tns_prefix)?;
    write_service(&mut writer, service, tns_prefix, base_url)?;

    writer
        .write_event(Event::End(BytesEnd::new("wsdl:definitions")))
        .map_err(gen_err)?;

    String::from_utf8(writer.into_inner()).map_err(|e| EndpointError::Internal(e.to_string()))
}

fn write_types(
    writer: &mut Writer<Vec<u8>>,
    service: &ServiceDescription,
    target_ns: &str,
) -> Result<(), EndpointError> {
    writer
        .write_event(Event::Start(BytesStart::new("wsdl:types")))
        .map_err(gen_err)?;

    let mut schema = BytesStart::new("xs:schema");
    schema.push_attribute(("targetNamespace", target_ns));
    schema.push_attribute(("elementFormDefault", "qualified"));
    writer.write_event(Event::Start(schema)).map_err(gen_err)?;

    // Request/response elements per operation
    for contract in &service.contracts {
        for op in &contract.operations {
            write_request_element(writer, op)?;
            if !op.is_one_way {
                write_response_element(writer, op)?;
            }
        }
    }

    // Complex type declarations, each emitted once
    for ct in collect_complex_types(service).values() {
        write_complex_type(writer, ct)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("xs:schema")))
        .map_err(gen_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("wsdl:types")))
        .map_err(gen_err)?;
    Ok(())
}

fn write_request_element(
    writer: &mut Writer<Vec<u8>>,
    op: &OperationDescription,
) -> Result<(), EndpointError> {
    let mut element = BytesStart::new("xs:element");
    element.push_attribute(("name", op.name.as_str()));
    writer.write_event(Event::Start(element)).map_err(gen_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("xs:complexType")))
        .map_err(gen_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("xs:sequence")))
        .map_err(gen_err)?;

    for param in op.in_parameters().filter(|p| !p.is_context) {
        write_schema_element(writer, &param.name, &param.ty)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("xs:sequence")))
        .map_err(gen_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("xs:complexType")))
        .map_err(gen_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("xs:element")))
        .map_err(gen_err)?;
    Ok(())
}

fn write_response_element(
    writer: &mut Writer<Vec<u8>>,
    op: &OperationDescription,
) -> Result<(), EndpointError> {
    let mut element = BytesStart::new("xs:element");
    let name = op.response_wrapper();
    element.push_attribute(("name", name.as_str()));
    writer.write_event(Event::Start(element)).map_err(gen_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("xs:complexType")))
        .map_err(gen_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("xs:sequence")))
        .map_err(gen_err)?;

    if let Some(ty) = &op.return_type {
        write_schema_element(writer, &op.result_element(), ty)?;
    }
    for param in op.out_parameters() {
        write_schema_element(writer, &param.name, &param.ty)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("xs:sequence")))
        .map_err(gen_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("xs:complexType")))
        .map_err(gen_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("xs:element")))
        .map_err(gen_err)?;
    Ok(())
}

fn write_schema_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    ty: &TypeInfo,
) -> Result<(), EndpointError> {
    let mut element = BytesStart::new("xs:element");
    element.push_attribute(("name", name));
    let type_name = ty.xsd_name();
    element.push_attribute(("type", type_name.as_str()));
    if matches!(ty, TypeInfo::List(_)) {
        element.push_attribute(("minOccurs", "0"));
        element.push_attribute(("maxOccurs", "unbounded"));
    }
    writer.write_event(Event::Empty(element)).map_err(gen_err)?;
    Ok(())
}

fn write_complex_type(
    writer: &mut Writer<Vec<u8>>,
    ct: &ComplexType,
) -> Result<(), EndpointError> {
    let mut start = BytesStart::new("xs:complexType");
    start.push_attribute(("name", ct.name.as_str()));
    writer.write_event(Event::Start(start)).map_err(gen_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("xs:sequence")))
        .map_err(gen_err)?;
    for field in &ct.fields {
        write_schema_element(writer, &field.name, &field.ty)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("xs:sequence")))
        .map_err(gen_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("xs:complexType")))
        .map_err(gen_err)?;
    Ok(())
}

/// Every complex type reachable from parameters, returns, or known types.
fn collect_complex_types(service: &ServiceDescription) -> BTreeMap<String, Arc<ComplexType>> {
    let mut found = BTreeMap::new();
    for contract in &service.contracts {
        for op in &contract.operations {
            for param in &op.parameters {
                if !param.is_context {
                    collect_from_type(&param.ty, &mut found);
                }
            }
            if let Some(ty) = &op.return_type {
                collect_from_type(ty, &mut found);
            }
            for kt in &op.known_types {
                collect_from_arc(kt, &mut found);
            }
        }
    }
    found
}

fn collect_from_type(ty: &TypeInfo, found: &mut BTreeMap<String, Arc<ComplexType>>) {
    match ty {
        TypeInfo::List(inner) => collect_from_type(inner, found),
        TypeInfo::Complex(ct) => collect_from_arc(ct, found),
        _ => {}
    }
}

fn collect_from_arc(ct: &Arc<ComplexType>, found: &mut BTreeMap<String, Arc<ComplexType>>) {
    if found.insert(ct.name.clone(), ct.clone()).is_none() {
        for field in &ct.fields {
            collect_from_type(&field.ty, found);
        }
    }
}

fn write_messages(
    writer: &mut Writer<Vec<u8>>,
    service: &ServiceDescription,
    tns: &str,
) -> Result<(), EndpointError> {
    for contract in &service.contracts {
        for op in &contract.operations {
            write_message(writer, &format!("{}SoapIn", op.name), &format!("{}:{}", tns, op.name))?;
            if !op.is_one_way {
                write_message(
                    writer,
                    &format!("{}SoapOut", op.name),
                    &format!("{}:{}", tns, op.response_wrapper()),
                )?;
            }
        }
    }
    Ok(())
}

fn write_message(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    element: &str,
) -> Result<(), EndpointError> {
    let mut message = BytesStart::new("wsdl:message");
    message.push_attribute(("name", name));
    writer.write_event(Event::Start(message)).map_err(gen_err)?;
    let mut part = BytesStart::new("wsdl:part");
    part.push_attribute(("name", "parameters"));
    part.push_attribute(("element", element));
    writer.write_event(Event::Empty(part)).map_err(gen_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("wsdl:message")))
        .map_err(gen_err)?;
    Ok(())
}

fn write_port_types(
    writer: &mut Writer<Vec<u8>>,
    service: &ServiceDescription,
    tns: &str,
) -> Result<(), EndpointError> {
    for contract in &service.contracts {
        let mut port_type = BytesStart::new("wsdl:portType");
        port_type.push_attribute(("name", contract.name.as_str()));
        writer.write_event(Event::Start(port_type)).map_err(gen_err)?;

        for op in &contract.operations {
            let mut operation = BytesStart::new("wsdl:operation");
            operation.push_attribute(("name", op.name.as_str()));
            writer.write_event(Event::Start(operation)).map_err(gen_err)?;

            let mut input = BytesStart::new("wsdl:input");
            let in_msg = format!("{}:{}SoapIn", tns, op.name);
            input.push_attribute(("message", in_msg.as_str()));
            writer.write_event(Event::Empty(input)).map_err(gen_err)?;

            if !op.is_one_way {
                let mut output = BytesStart::new("wsdl:output");
                let out_msg = format!("{}:{}SoapOut", tns, op.name);
                output.push_attribute(("message", out_msg.as_str()));
                writer.write_event(Event::Empty(output)).map_err(gen_err)?;
            }

            writer
                .write_event(Event::End(BytesEnd::new("wsdl:operation")))
                .map_err(gen_err)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("wsdl:portType")))
            .map_err(gen_err)?;
    }
    Ok(())
}

fn write_bindings(
    writer: &mut Writer<Vec<u8>>,
    service: &ServiceDescription,
    tns: &str,
) -> Result<(), EndpointError> {
    for contract in &service.contracts {
        let mut binding = BytesStart::new("wsdl:binding");
        let binding_name = format!("{}Binding", contract.name);
        binding.push_attribute(("name", binding_name.as_str()));
        let port_ref = format!("{}:{}", tns, contract.name);
        binding.push_attribute(("type", port_ref.as_str()));
        writer.write_event(Event::Start(binding)).map_err(gen_err)?;

        let mut soap_binding = BytesStart::new("soap:binding");
        soap_binding.push_attribute(("transport", SOAP_HTTP_TRANSPORT));
        soap_binding.push_attribute(("style", "document"));
        writer.write_event(Event::Empty(soap_binding)).map_err(gen_err)?;

        for op in &contract.operations {
            let mut operation = BytesStart::new("wsdl:operation");
            operation.push_attribute(("name", op.name.as_str()));
            writer.write_event(Event::Start(operation)).map_err(gen_err)?;

            let mut soap_op = BytesStart::new("soap:operation");
            soap_op.push_attribute(("soapAction", op.soap_action.as_str()));
            soap_op.push_attribute(("style", "document"));
            writer.write_event(Event::Empty(soap_op)).map_err(gen_err)?;

            writer
                .write_event(Event::Start(BytesStart::new("wsdl:input")))
                .map_err(gen_err)?;
            let mut body = BytesStart::new("soap:body");
            body.push_attribute(("use", "literal"));
            writer.write_event(Event::Empty(body)).map_err(gen_err)?;
            writer
                .write_event(Event::End(BytesEnd::new("wsdl:input")))
                .map_err(gen_err)?;

            if !op.is_one_way {
                writer
                    .write_event(Event::Start(BytesStart::new("wsdl:output")))
                    .map_err(gen_err)?;
                let mut body = BytesStart::new("soap:body");
                body.push_attribute(("use", "literal"));
                writer.write_event(Event::Empty(body)).map_err(gen_err)?;
                writer
                    .write_event(Event::End(BytesEnd::new("wsdl:output")))
                    .map_err(gen_err)?;
            }

            writer
                .write_event(Event::End(BytesEnd::new("wsdl:operation")))
                .map_err(gen_err)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("wsdl:binding")))
            .map_err(gen_err)?;
    }
    Ok(())
}

fn write_service(
    writer: &mut Writer<Vec<u8>>,
    service: &ServiceDescription,
    tns: &str,
    base_url: &str,
) -> Result<(), EndpointError> {
    let mut svc = BytesStart::new("wsdl:service");
    svc.push_attribute(("name", service.name.as_str()));
    writer.write_event(Event::Start(svc)).map_err(gen_err)?;

    for contract in &service.contracts {
        let mut port = BytesStart::new("wsdl:port");
        let port_name = format!("{}Port", contract.name);
        port.push_attribute(("name", port_name.as_str()));
        let binding_ref = format!("{}:{}Binding", tns, contract.name);
        port.push_attribute(("binding", binding_ref.as_str()));
        writer.write_event(Event::Start(port)).map_err(gen_err)?;

        let mut address = BytesStart::new("soap:address");
        address.push_attribute(("location", base_url));
        writer.write_event(Event::Empty(address)).map_err(gen_err)?;

        writer
            .write_event(Event::End(BytesEnd::new("wsdl:port")))
            .map_err(gen_err)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("wsdl:service")))
        .map_err(gen_err)?;
    Ok(())
}

fn write_text(
    writer: &mut Writer<Vec<u8>>,
    tag: &str,
    text: &str,
) -> Result<(), EndpointError> {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .map_err(gen_err)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(gen_err)?;
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .map_err(gen_err)?;
    Ok(())
}

fn gen_err<E: std::fmt::Display>(e: E) -> EndpointError {
    EndpointError::Internal(format!("WSDL generation failed: {}", e))
}

/// Serve the configured WSDL file, substituting the service location when
/// an URL override is configured.
pub async fn read_wsdl_file(options: &WsdlFileOptions) -> Result<String, EndpointError> {
    let path = PathBuf::from(&options.app_path)
        .join(&options.mapping.wsdl_folder)
        .join(&options.mapping.wsdl_file);
    let content = tokio::fs::read_to_string(&path).await?;
    Ok(match &options.url_override {
        Some(url) => rewrite_locations(&content, url),
        None => content,
    })
}

/// Serve one XSD from the configured schema folder.
///
/// The `name` value must equal its filename-only projection and contain
/// `.xsd`; anything else is rejected before touching the filesystem.
pub async fn read_xsd_file(
    options: &WsdlFileOptions,
    name: &str,
) -> Result<String, EndpointError> {
    let file_name = Path::new(name).file_name().and_then(|f| f.to_str());
    if file_name != Some(name) {
        return Err(EndpointError::InvalidArgument(format!(
            "schema name '{}' is not a plain file name",
            name
        )));
    }
    if !name.contains(".xsd") {
        return Err(EndpointError::InvalidArgument(format!(
            "schema name '{}' is not an .xsd file",
            name
        )));
    }

    let path = PathBuf::from(&options.app_path)
        .join(&options.mapping.schema_folder)
        .join(name);
    Ok(tokio::fs::read_to_string(&path).await?)
}

/// Replace every `location="..."` value with the override URL.
fn rewrite_locations(wsdl: &str, url: &str) -> String {
    const NEEDLE: &str = "location=\"";
    let mut out = String::with_capacity(wsdl.len());
    let mut rest = wsdl;
    while let Some(idx) = rest.find(NEEDLE) {
        let value_start = idx + NEEDLE.len();
        out.push_str(&rest[..value_start]);
        match rest[value_start..].find('"') {
            Some(end) => {
                out.push_str(url);
                rest = &rest[value_start + end..];
            }
            None => {
                rest = &rest[value_start..];
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WsdlMapping;
    use crate::model::{ContractBuilder, OperationBuilder, OperationReply, ServiceDescription};

    fn sample_service() -> Arc<ServiceDescription> {
        let order = ComplexType::new("Order", "http://ns")
            .field("Id", TypeInfo::Int)
            .field("Sku", TypeInfo::String)
            .into_arc();
        ServiceDescription::builder("OrderService")
            .contract(
                ContractBuilder::new("Orders", "http://ns")
                    .operation(
                        OperationBuilder::new("GetOrder")
                            .input("id", TypeInfo::Int)
                            .returns(TypeInfo::Complex(order))
                            .handle(|_req| async { Ok(OperationReply::empty()) }),
                    )
                    .operation(
                        OperationBuilder::new("Ping")
                            .one_way()
                            .handle(|_req| async { Ok(OperationReply::empty()) }),
                    ),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_generated_wsdl_structure() {
        let service = sample_service();
        let wsdl = generate_wsdl(
            &service,
            &EndpointOptions::default(),
            SoapVersion::Soap11,
            "http://localhost/svc",
        )
        .unwrap();

        assert!(wsdl.contains("<wsdl:definitions"));
        assert!(wsdl.contains(r#"targetNamespace="http://ns""#));
        assert!(wsdl.contains(r#"<xs:element name="GetOrder">"#));
        assert!(wsdl.contains(r#"<xs:element name="GetOrderResponse">"#));
        assert!(wsdl.contains(r#"<xs:complexType name="Order">"#));
        assert!(wsdl.contains(r#"<wsdl:portType name="Orders">"#));
        assert!(wsdl.contains(r#"soapAction="http://ns/Orders/GetOrder""#));
        assert!(wsdl.contains(r#"<soap:address location="http://localhost/svc"/>"#));
    }

    #[test]
    fn test_one_way_operation_has_no_output() {
        let service = sample_service();
        let wsdl = generate_wsdl(
            &service,
            &EndpointOptions::default(),
            SoapVersion::Soap11,
            "http://localhost/svc",
        )
        .unwrap();
        assert!(wsdl.contains("PingSoapIn"));
        assert!(!wsdl.contains("PingSoapOut"));
        assert!(!wsdl.contains("PingResponse"));
    }

    #[test]
    fn test_basic_auth_advisory_reflected() {
        let service = sample_service();
        let options = EndpointOptions {
            use_basic_authentication: true,
            ..Default::default()
        };
        let wsdl = generate_wsdl(&service, &options, SoapVersion::Soap11, "http://l/svc").unwrap();
        assert!(wsdl.contains("Basic authentication"));
    }

    #[test]
    fn test_prefix_override_applied() {
        let service = sample_service();
        let mut options = EndpointOptions::default();
        options
            .namespace_prefix_overrides
            .insert("http://ns".to_string(), "ord".to_string());
        let wsdl = generate_wsdl(&service, &options, SoapVersion::Soap11, "http://l/svc").unwrap();
        assert!(wsdl.contains(r#"xmlns:ord="http://ns""#));
        assert!(wsdl.contains("ord:GetOrderSoapIn"));
    }

    #[test]
    fn test_soap_12_binding_namespace() {
        let service = sample_service();
        let wsdl = generate_wsdl(
            &service,
            &EndpointOptions::default(),
            SoapVersion::Soap12,
            "http://l/svc",
        )
        .unwrap();
        assert!(wsdl.contains(WSDL_SOAP_12_NS));
    }

    #[test]
    fn test_rewrite_locations() {
        let wsdl = r#"<soap:address location="http://old/one"/><soap:address location="http://old/two"/>"#;
        let rewritten = rewrite_locations(wsdl, "http://new/svc");
        assert_eq!(
            rewritten,
            r#"<soap:address location="http://new/svc"/><soap:address location="http://new/svc"/>"#
        );
    }

    fn file_options(dir: &Path) -> WsdlFileOptions {
        WsdlFileOptions {
            app_path: dir.to_string_lossy().to_string(),
            virtual_path: String::new(),
            url_override: None,
            mapping: WsdlMapping {
                schema_folder: "schemas".to_string(),
                wsdl_folder: "wsdl".to_string(),
                wsdl_file: "svc.wsdl".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_xsd_traversal_rejected_before_read() {
        let options = file_options(Path::new("/nonexistent"));
        let err = read_xsd_file(&options, "../etc/passwd").await.unwrap_err();
        assert!(matches!(err, EndpointError::InvalidArgument(_)));

        let err = read_xsd_file(&options, "/etc/passwd.xsd").await.unwrap_err();
        assert!(matches!(err, EndpointError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_xsd_requires_xsd_extension() {
        let options = file_options(Path::new("/nonexistent"));
        let err = read_xsd_file(&options, "schema.txt").await.unwrap_err();
        assert!(matches!(err, EndpointError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_file_backed_wsdl_with_url_override() {
        let dir = std::env::temp_dir().join(format!("wsdl-test-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(dir.join("wsdl")).await.unwrap();
        tokio::fs::write(
            dir.join("wsdl").join("svc.wsdl"),
            r#"<wsdl:definitions><soap:address location="http://placeholder"/></wsdl:definitions>"#,
        )
        .await
        .unwrap();

        let mut options = file_options(&dir);
        options.url_override = Some("http://public.example.org/svc".to_string());
        let wsdl = read_wsdl_file(&options).await.unwrap();
        assert!(wsdl.contains(r#"location="http://public.example.org/svc""#));
        assert!(!wsdl.contains("placeholder"));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_xsd_served_from_schema_folder() {
        let dir = std::env::temp_dir().join(format!("xsd-test-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(dir.join("schemas")).await.unwrap();
        tokio::fs::write(dir.join("schemas").join("types.xsd"), "<xs:schema/>")
            .await
            .unwrap();

        let options = file_options(&dir);
        let xsd = read_xsd_file(&options, "types.xsd").await.unwrap();
        assert_eq!(xsd, "<xs:schema/>");

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
