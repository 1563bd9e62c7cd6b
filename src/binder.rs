//! Argument binding: decoding an envelope body (and headers, for message
//! contracts) into the positional argument list of an operation.

use crate::config::SoapSerializer;
use crate::envelope::{HeaderEntry, XmlNode};
use crate::error::EndpointError;
use crate::model::{
    ContractDescription, MessageContractInfo, OperationDescription, ParameterDescription,
    RequestContext,
};
use crate::value::{ComplexType, TypeInfo, Value};
use std::sync::Arc;

/// Produce the positional argument array for an operation, sized to its
/// full parameter arity.
///
/// `body` is the envelope Body element (children are the body parts), or
/// `None` when the envelope was empty.
pub fn bind_arguments(
    op: &OperationDescription,
    contract: &ContractDescription,
    body: Option<&XmlNode>,
    headers: &[HeaderEntry],
    serializer: SoapSerializer,
    ctx: &RequestContext,
) -> Result<Vec<Value>, EndpointError> {
    let mut args = vec![Value::Null; op.parameters.len()];

    match (&op.message_contract, body) {
        (Some(info), _) => bind_message_contract(op, info, body, headers, &mut args)?,
        (None, Some(body)) => bind_parameters(op, contract, body, serializer, &mut args)?,
        (None, None) => {}
    }

    if op.message_contract.is_none() {
        for param in op.parameters.iter().filter(|p| p.is_context) {
            args[param.index] = ctx.to_value();
        }
    }

    apply_out_defaults(op, &mut args);
    Ok(args)
}

/// Fill every still-empty Out slot with a type-appropriate zero value.
/// Running this twice over the same array produces the same result.
pub fn apply_out_defaults(op: &OperationDescription, args: &mut [Value]) {
    for param in op.out_parameters() {
        if matches!(args[param.index], Value::Null) {
            args[param.index] = param.ty.default_value();
        }
    }
}

/// Non-message-contract binding: walk body elements against In parameters.
fn bind_parameters(
    op: &OperationDescription,
    contract: &ContractDescription,
    body: &XmlNode,
    serializer: SoapSerializer,
    args: &mut [Value],
) -> Result<(), EndpointError> {
    use crate::model::OperationStyle;

    // Wrapped and RPC requests nest the parts inside `<op-name xmlns=ns>`;
    // bare requests put them directly under Body.
    let elements: &[XmlNode] = match op.style {
        OperationStyle::DocumentBare => &body.children,
        _ => match body.children.first() {
            Some(wrapper) => &wrapper.children,
            None => return Ok(()),
        },
    };

    let serializer = op.serializer.unwrap_or(serializer);
    let mut previous: Option<usize> = None;

    for element in elements {
        let matched = op
            .parameters
            .iter()
            .filter(|p| p.direction.is_input() && !p.is_context)
            .find(|p| element_matches(element, p, &contract.namespace, serializer));

        let param = match matched {
            Some(p) => p,
            None => continue, // unknown element, skip and keep walking
        };

        // Guard against ill-formed streams that would otherwise loop forever
        if previous == Some(param.index) {
            break;
        }
        previous = Some(param.index);

        args[param.index] = decode_value(element, &param.ty, &op.known_types).map_err(|e| {
            EndpointError::Binding(format!("parameter '{}': {}", param.name, e))
        })?;
    }

    Ok(())
}

/// Element/parameter match. DataContract requires the contract namespace,
/// retrying against the parameter's own declared namespace as a fallback;
/// XmlSerializer matches on local name alone.
fn element_matches(
    element: &XmlNode,
    param: &ParameterDescription,
    contract_ns: &str,
    serializer: SoapSerializer,
) -> bool {
    if element.name != param.name {
        return false;
    }
    match serializer {
        SoapSerializer::XmlSerializer => true,
        SoapSerializer::DataContract => match element.namespace.as_deref() {
            None => true,
            Some(ns) => ns == contract_ns || Some(ns) == param.namespace.as_deref(),
        },
    }
}

/// Message-contract binding: exactly one In parameter receives a record
/// assembled from matching SOAP headers and ordered body members.
fn bind_message_contract(
    op: &OperationDescription,
    info: &MessageContractInfo,
    body: Option<&XmlNode>,
    headers: &[HeaderEntry],
    args: &mut [Value],
) -> Result<(), EndpointError> {
    let param = op
        .parameters
        .iter()
        .find(|p| p.direction.is_input())
        .ok_or_else(|| {
            EndpointError::Binding(format!(
                "message contract operation '{}' has no input parameter",
                op.name
            ))
        })?;

    let mut fields: Vec<(String, Value)> = Vec::new();

    for member in &info.headers {
        let wanted = member.header_name.as_deref().unwrap_or(&member.member);
        let value = headers
            .iter()
            .find(|h| h.name == wanted || h.name == member.member)
            .map(|h| decode_value(&h.node, &member.ty, &op.known_types))
            .transpose()
            .map_err(|e| {
                EndpointError::Binding(format!("header member '{}': {}", member.member, e))
            })?
            .unwrap_or_else(|| member.ty.default_value());
        fields.push((member.member.clone(), value));
    }

    // Wrapped contracts read past the wrapper start element; bare contracts
    // bind members straight off the Body. The wrapper element's own name is
    // not checked, so wrapped RPC requests take this same path.
    let content: &[XmlNode] = match body {
        None => &[],
        Some(body) => {
            if info.is_wrapped {
                match body.children.first() {
                    Some(wrapper) => &wrapper.children,
                    None => &[],
                }
            } else {
                &body.children
            }
        }
    };

    let mut parts: Vec<&crate::model::BodyMember> = info.body_parts.iter().collect();
    parts.sort_by_key(|m| m.order);

    for member in parts {
        let value = content
            .iter()
            .find(|c| c.name == member.member)
            .map(|c| decode_value(c, &member.ty, &op.known_types))
            .transpose()
            .map_err(|e| {
                EndpointError::Binding(format!("body member '{}': {}", member.member, e))
            })?
            .unwrap_or_else(|| member.ty.default_value());
        fields.push((member.member.clone(), value));
    }

    args[param.index] = Value::Record {
        type_name: info.type_name.clone(),
        fields,
    };
    Ok(())
}

/// Decode one element into a value of the declared type, honoring
/// `xsi:nil` and `xsi:type` polymorphism against the known-types set.
pub fn decode_value(
    node: &XmlNode,
    ty: &TypeInfo,
    known_types: &[Arc<ComplexType>],
) -> Result<Value, EndpointError> {
    if matches!(node.attr_local("nil"), Some("true") | Some("1")) {
        return Ok(Value::Null);
    }

    match ty {
        TypeInfo::List(inner) => {
            let mut items = Vec::with_capacity(node.children.len());
            for child in &node.children {
                items.push(decode_value(child, inner, known_types)?);
            }
            Ok(Value::List(items))
        }
        TypeInfo::Complex(declared) => {
            let actual = node
                .xsi_type()
                .and_then(|name| known_types.iter().find(|k| k.name == name))
                .unwrap_or(declared);
            let mut fields = Vec::with_capacity(actual.fields.len());
            for field in &actual.fields {
                let value = match node.child(&field.name) {
                    Some(child) => decode_value(child, &field.ty, known_types)?,
                    None => field.ty.default_value(),
                };
                fields.push((field.name.clone(), value));
            }
            Ok(Value::Record {
                type_name: actual.name.clone(),
                fields,
            })
        }
        scalar => scalar.parse_text(&node.text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReaderLimits;
    use crate::config::SoapVersion;
    use crate::envelope::parse_envelope;
    use crate::model::{
        BodyMember, ContractBuilder, HeaderMember, OperationBuilder, OperationReply,
        OperationStyle,
    };

    fn parse_body(xml: &str) -> (XmlNode, Vec<HeaderEntry>) {
        let mut envelope =
            parse_envelope(xml.as_bytes(), SoapVersion::Soap11, &ReaderLimits::default()).unwrap();
        let headers = envelope.headers.clone();
        let body = envelope.take_body().unwrap().expect("body present");
        (body, headers)
    }

    fn add_contract() -> ContractDescription {
        ContractBuilder::new("Calculator", "http://ns")
            .operation(
                OperationBuilder::new("Add")
                    .input("a", TypeInfo::Int)
                    .input("b", TypeInfo::String)
                    .handle(|_req| async { Ok(OperationReply::empty()) }),
            )
            .build()
            .unwrap()
    }

    fn envelope_for(body_inner: &str) -> String {
        format!(
            r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body>{}</soap:Body></soap:Envelope>"#,
            body_inner
        )
    }

    #[test]
    fn test_bind_ordered_parameters() {
        let contract = add_contract();
        let op = &contract.operations[0];
        let (body, headers) =
            parse_body(&envelope_for(r#"<Add xmlns="http://ns"><a>1</a><b>x</b></Add>"#));
        let args = bind_arguments(
            op,
            &contract,
            Some(&body),
            &headers,
            SoapSerializer::DataContract,
            &RequestContext::default(),
        )
        .unwrap();
        assert_eq!(args, vec![Value::Int(1), Value::String("x".to_string())]);
    }

    #[test]
    fn test_bind_inverted_order_succeeds() {
        let contract = add_contract();
        let op = &contract.operations[0];
        let (body, headers) =
            parse_body(&envelope_for(r#"<Add xmlns="http://ns"><b>x</b><a>1</a></Add>"#));
        let args = bind_arguments(
            op,
            &contract,
            Some(&body),
            &headers,
            SoapSerializer::DataContract,
            &RequestContext::default(),
        )
        .unwrap();
        assert_eq!(args, vec![Value::Int(1), Value::String("x".to_string())]);
    }

    #[test]
    fn test_unknown_elements_skipped() {
        let contract = add_contract();
        let op = &contract.operations[0];
        let (body, headers) = parse_body(&envelope_for(
            r#"<Add xmlns="http://ns"><junk>?</junk><a>5</a><extra/><b>y</b></Add>"#,
        ));
        let args = bind_arguments(
            op,
            &contract,
            Some(&body),
            &headers,
            SoapSerializer::DataContract,
            &RequestContext::default(),
        )
        .unwrap();
        assert_eq!(args, vec![Value::Int(5), Value::String("y".to_string())]);
    }

    #[test]
    fn test_repeated_parameter_breaks_loop() {
        let contract = add_contract();
        let op = &contract.operations[0];
        // The second <a> matches the immediately previous parameter index,
        // so the loop stops before reaching <b>.
        let (body, headers) = parse_body(&envelope_for(
            r#"<Add xmlns="http://ns"><a>1</a><a>2</a><b>x</b></Add>"#,
        ));
        let args = bind_arguments(
            op,
            &contract,
            Some(&body),
            &headers,
            SoapSerializer::DataContract,
            &RequestContext::default(),
        )
        .unwrap();
        assert_eq!(args[0], Value::Int(1));
        assert_eq!(args[1], Value::Null);
    }

    #[test]
    fn test_namespace_fallback_to_parameter_namespace() {
        let contract = ContractBuilder::new("Svc", "http://ns")
            .operation(
                OperationBuilder::new("Op")
                    .input_ns("part", TypeInfo::String, "http://other")
                    .handle(|_req| async { Ok(OperationReply::empty()) }),
            )
            .build()
            .unwrap();
        let op = &contract.operations[0];
        let (body, headers) = parse_body(&envelope_for(
            r#"<Op xmlns="http://ns"><part xmlns="http://other">v</part></Op>"#,
        ));
        let args = bind_arguments(
            op,
            &contract,
            Some(&body),
            &headers,
            SoapSerializer::DataContract,
            &RequestContext::default(),
        )
        .unwrap();
        assert_eq!(args[0], Value::String("v".to_string()));
    }

    #[test]
    fn test_foreign_namespace_rejected_under_data_contract() {
        let contract = add_contract();
        let op = &contract.operations[0];
        let (body, headers) = parse_body(&envelope_for(
            r#"<Add xmlns="http://ns"><a xmlns="http://elsewhere">1</a><b>x</b></Add>"#,
        ));
        let args = bind_arguments(
            op,
            &contract,
            Some(&body),
            &headers,
            SoapSerializer::DataContract,
            &RequestContext::default(),
        )
        .unwrap();
        // 'a' does not bind; 'b' still does
        assert_eq!(args[0], Value::Null);
        assert_eq!(args[1], Value::String("x".to_string()));
    }

    #[test]
    fn test_xml_serializer_is_namespace_lax() {
        let contract = add_contract();
        let op = &contract.operations[0];
        let (body, headers) = parse_body(&envelope_for(
            r#"<Add xmlns="http://ns"><a xmlns="http://elsewhere">1</a><b>x</b></Add>"#,
        ));
        let args = bind_arguments(
            op,
            &contract,
            Some(&body),
            &headers,
            SoapSerializer::XmlSerializer,
            &RequestContext::default(),
        )
        .unwrap();
        assert_eq!(args[0], Value::Int(1));
    }

    #[test]
    fn test_bare_style_binds_body_children() {
        let contract = ContractBuilder::new("Svc", "http://ns")
            .operation(
                OperationBuilder::new("Op")
                    .style(OperationStyle::DocumentBare)
                    .input("a", TypeInfo::Int)
                    .handle(|_req| async { Ok(OperationReply::empty()) }),
            )
            .build()
            .unwrap();
        let op = &contract.operations[0];
        let (body, headers) = parse_body(&envelope_for(r#"<a xmlns="http://ns">3</a>"#));
        let args = bind_arguments(
            op,
            &contract,
            Some(&body),
            &headers,
            SoapSerializer::DataContract,
            &RequestContext::default(),
        )
        .unwrap();
        assert_eq!(args[0], Value::Int(3));
    }

    #[test]
    fn test_no_body_yields_defaults_only() {
        let contract = ContractBuilder::new("Svc", "http://ns")
            .operation(
                OperationBuilder::new("Op")
                    .input("a", TypeInfo::Int)
                    .output("code", TypeInfo::Guid)
                    .handle(|_req| async { Ok(OperationReply::empty()) }),
            )
            .build()
            .unwrap();
        let op = &contract.operations[0];
        let args = bind_arguments(
            op,
            &contract,
            None,
            &[],
            SoapSerializer::DataContract,
            &RequestContext::default(),
        )
        .unwrap();
        assert_eq!(args[0], Value::Null);
        assert_eq!(args[1], Value::Guid(uuid::Uuid::nil()));
    }

    #[test]
    fn test_out_defaulting_is_idempotent() {
        let contract = ContractBuilder::new("Svc", "http://ns")
            .operation(
                OperationBuilder::new("Op")
                    .output("s", TypeInfo::String)
                    .output("list", TypeInfo::List(Box::new(TypeInfo::Int)))
                    .output("id", TypeInfo::Guid)
                    .handle(|_req| async { Ok(OperationReply::empty()) }),
            )
            .build()
            .unwrap();
        let op = &contract.operations[0];
        let mut args = vec![Value::Null, Value::Null, Value::Null];
        apply_out_defaults(op, &mut args);
        let first = args.clone();
        apply_out_defaults(op, &mut args);
        assert_eq!(args, first);
        assert_eq!(args[0], Value::String(String::new()));
        assert_eq!(args[1], Value::List(Vec::new()));
        assert_eq!(args[2], Value::Guid(uuid::Uuid::nil()));
    }

    #[test]
    fn test_context_parameter_filled() {
        let contract = ContractBuilder::new("Svc", "http://ns")
            .operation(
                OperationBuilder::new("Op")
                    .input("a", TypeInfo::Int)
                    .context_input("ctx")
                    .handle(|_req| async { Ok(OperationReply::empty()) }),
            )
            .build()
            .unwrap();
        let op = &contract.operations[0];
        let (body, headers) = parse_body(&envelope_for(r#"<Op xmlns="http://ns"><a>1</a></Op>"#));
        let ctx = RequestContext {
            method: "POST".to_string(),
            uri: "/svc".to_string(),
            content_type: "text/xml".to_string(),
            soap_action: None,
        };
        let args = bind_arguments(
            op,
            &contract,
            Some(&body),
            &headers,
            SoapSerializer::DataContract,
            &ctx,
        )
        .unwrap();
        assert_eq!(args[0], Value::Int(1));
        assert_eq!(
            args[1].field("Method"),
            Some(&Value::String("POST".to_string()))
        );
    }

    #[test]
    fn test_binding_error_names_parameter() {
        let contract = add_contract();
        let op = &contract.operations[0];
        let (body, headers) =
            parse_body(&envelope_for(r#"<Add xmlns="http://ns"><a>oops</a></Add>"#));
        let err = bind_arguments(
            op,
            &contract,
            Some(&body),
            &headers,
            SoapSerializer::DataContract,
            &RequestContext::default(),
        )
        .unwrap_err();
        assert!(format!("{}", err).contains("'a'"));
    }

    #[test]
    fn test_complex_decoding_with_known_types() {
        let shape = ComplexType::new("Shape", "http://ns")
            .field("name", TypeInfo::String)
            .into_arc();
        let circle = ComplexType::new("Circle", "http://ns")
            .field("name", TypeInfo::String)
            .field("radius", TypeInfo::Double)
            .into_arc();
        let contract = ContractBuilder::new("Svc", "http://ns")
            .operation(
                OperationBuilder::new("Draw")
                    .input("shape", TypeInfo::Complex(shape))
                    .known_type(circle)
                    .handle(|_req| async { Ok(OperationReply::empty()) }),
            )
            .build()
            .unwrap();
        let op = &contract.operations[0];
        let (body, headers) = parse_body(&envelope_for(
            r#"<Draw xmlns="http://ns"><shape xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:type="Circle"><name>c</name><radius>2.5</radius></shape></Draw>"#,
        ));
        let args = bind_arguments(
            op,
            &contract,
            Some(&body),
            &headers,
            SoapSerializer::DataContract,
            &RequestContext::default(),
        )
        .unwrap();
        match &args[0] {
            Value::Record { type_name, .. } => assert_eq!(type_name, "Circle"),
            other => panic!("unexpected value: {:?}", other),
        }
        assert_eq!(args[0].field("radius"), Some(&Value::Double(2.5)));
    }

    #[test]
    fn test_message_contract_binding() {
        let contract = ContractBuilder::new("Svc", "http://ns")
            .operation(
                OperationBuilder::new("Submit")
                    .message_contract(MessageContractInfo {
                        is_wrapped: true,
                        wrapper_name: "SubmitRequest".to_string(),
                        wrapper_namespace: "http://ns".to_string(),
                        type_name: "SubmitRequest".to_string(),
                        headers: vec![HeaderMember {
                            member: "Ticket".to_string(),
                            header_name: None,
                            namespace: None,
                            must_understand: false,
                            ty: TypeInfo::String,
                        }],
                        body_parts: vec![
                            BodyMember {
                                member: "Second".to_string(),
                                order: 2,
                                ty: TypeInfo::String,
                            },
                            BodyMember {
                                member: "First".to_string(),
                                order: 1,
                                ty: TypeInfo::Int,
                            },
                        ],
                    })
                    .input("request", TypeInfo::String)
                    .handle(|_req| async { Ok(OperationReply::empty()) }),
            )
            .build()
            .unwrap();
        let op = &contract.operations[0];

        let xml = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Header><Ticket xmlns="http://ns">T-9</Ticket></soap:Header>
  <soap:Body><SubmitRequest xmlns="http://ns"><First>1</First><Second>two</Second></SubmitRequest></soap:Body>
</soap:Envelope>"#;
        let (body, headers) = parse_body(xml);
        let args = bind_arguments(
            op,
            &contract,
            Some(&body),
            &headers,
            SoapSerializer::DataContract,
            &RequestContext::default(),
        )
        .unwrap();

        let record = &args[0];
        assert_eq!(
            record.field("Ticket"),
            Some(&Value::String("T-9".to_string()))
        );
        assert_eq!(record.field("First"), Some(&Value::Int(1)));
        assert_eq!(
            record.field("Second"),
            Some(&Value::String("two".to_string()))
        );
    }

    #[test]
    fn test_message_contract_missing_members_defaulted() {
        let contract = ContractBuilder::new("Svc", "http://ns")
            .operation(
                OperationBuilder::new("Submit")
                    .message_contract(MessageContractInfo {
                        is_wrapped: false,
                        wrapper_name: String::new(),
                        wrapper_namespace: "http://ns".to_string(),
                        type_name: "BareRequest".to_string(),
                        headers: Vec::new(),
                        body_parts: vec![BodyMember {
                            member: "Count".to_string(),
                            order: 1,
                            ty: TypeInfo::Int,
                        }],
                    })
                    .input("request", TypeInfo::String)
                    .handle(|_req| async { Ok(OperationReply::empty()) }),
            )
            .build()
            .unwrap();
        let op = &contract.operations[0];
        let (body, headers) = parse_body(&envelope_for(r#"<Unrelated xmlns="http://ns"/>"#));
        let args = bind_arguments(
            op,
            &contract,
            Some(&body),
            &headers,
            SoapSerializer::DataContract,
            &RequestContext::default(),
        )
        .unwrap();
        assert_eq!(args[0].field("Count"), Some(&Value::Int(0)));
    }

    #[test]
    fn test_xsi_nil_becomes_null() {
        let contract = add_contract();
        let op = &contract.operations[0];
        let (body, headers) = parse_body(&envelope_for(
            r#"<Add xmlns="http://ns"><a xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:nil="true"/><b>x</b></Add>"#,
        ));
        let args = bind_arguments(
            op,
            &contract,
            Some(&body),
            &headers,
            SoapSerializer::DataContract,
            &RequestContext::default(),
        )
        .unwrap();
        assert_eq!(args[0], Value::Null);
    }

    #[test]
    fn test_list_decoding() {
        let contract = ContractBuilder::new("Svc", "http://ns")
            .operation(
                OperationBuilder::new("Sum")
                    .input("values", TypeInfo::List(Box::new(TypeInfo::Int)))
                    .handle(|_req| async { Ok(OperationReply::empty()) }),
            )
            .build()
            .unwrap();
        let op = &contract.operations[0];
        let (body, headers) = parse_body(&envelope_for(
            r#"<Sum xmlns="http://ns"><values><int>1</int><int>2</int><int>3</int></values></Sum>"#,
        ));
        let args = bind_arguments(
            op,
            &contract,
            Some(&body),
            &headers,
            SoapSerializer::DataContract,
            &RequestContext::default(),
        )
        .unwrap();
        assert_eq!(
            args[0],
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
    }
}
