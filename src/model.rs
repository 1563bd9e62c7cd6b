//! The service model: a reflective description of contracts, operations,
//! and parameters, built once at endpoint construction and shared immutably
//! across requests.
//!
//! Rather than inspecting user types at request time, everything the
//! dispatcher and binder need is declared up front through the builders
//! here and consumed as plain data.

use crate::config::SoapSerializer;
use crate::envelope::{HeaderEntry, HttpOverride, ReplyHeader};
use crate::error::EndpointError;
use crate::value::{ComplexType, TypeInfo, Value};
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// Request-scoped service state, produced by a [`crate::dispatch::ServiceFactory`].
pub type ServiceInstance = Arc<dyn std::any::Any + Send + Sync>;

/// The dispatch method reference of an operation.
pub type OperationHandler = Arc<
    dyn Fn(OperationRequest) -> BoxFuture<'static, Result<OperationReply, EndpointError>>
        + Send
        + Sync,
>;

/// Adapt an async closure into an [`OperationHandler`].
pub fn handler<F, Fut>(f: F) -> OperationHandler
where
    F: Fn(OperationRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<OperationReply, EndpointError>> + Send + 'static,
{
    Arc::new(move |req| Box::pin(f(req)))
}

/// Ambient description of the HTTP request an operation runs under.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub method: String,
    pub uri: String,
    pub content_type: String,
    pub soap_action: Option<String>,
}

impl RequestContext {
    /// The record a context-flagged parameter receives.
    pub fn to_value(&self) -> Value {
        Value::Record {
            type_name: "RequestContext".to_string(),
            fields: vec![
                ("Method".to_string(), Value::String(self.method.clone())),
                ("Uri".to_string(), Value::String(self.uri.clone())),
                (
                    "ContentType".to_string(),
                    Value::String(self.content_type.clone()),
                ),
                (
                    "SoapAction".to_string(),
                    match &self.soap_action {
                        Some(a) => Value::String(a.clone()),
                        None => Value::Null,
                    },
                ),
            ],
        }
    }
}

/// What an operation handler receives.
pub struct OperationRequest {
    /// Positional arguments produced by the binder, full arity
    pub arguments: Vec<Value>,
    /// Request envelope headers (addressing fields already lifted)
    pub headers: Vec<HeaderEntry>,
    pub context: RequestContext,
    /// Request-scoped service state from the factory
    pub instance: ServiceInstance,
}

/// What an operation handler returns.
#[derive(Debug, Clone, Default)]
pub struct OperationReply {
    pub return_value: Value,
    /// Out/ref parameter values by parameter name
    pub out_values: BTreeMap<String, Value>,
    /// Members to emit as SOAP headers on the response
    pub headers: Vec<ReplyHeader>,
    /// Optional HTTP response overrides
    pub http: Option<HttpOverride>,
}

impl OperationReply {
    pub fn returning(value: Value) -> Self {
        Self {
            return_value: value,
            ..Default::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_out(mut self, name: impl Into<String>, value: Value) -> Self {
        self.out_values.insert(name.into(), value);
        self
    }

    pub fn with_header(mut self, header: ReplyHeader) -> Self {
        self.headers.push(header);
        self
    }

    pub fn with_http(mut self, http: HttpOverride) -> Self {
        self.http = Some(http);
        self
    }
}

/// Parameter passing direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    InOut,
}

impl Direction {
    pub fn is_input(&self) -> bool {
        matches!(self, Direction::In | Direction::InOut)
    }

    pub fn is_output(&self) -> bool {
        matches!(self, Direction::Out | Direction::InOut)
    }
}

/// One positional parameter of an operation.
#[derive(Debug, Clone)]
pub struct ParameterDescription {
    pub index: usize,
    pub name: String,
    /// Falls back to the contract namespace when absent
    pub namespace: Option<String>,
    pub direction: Direction,
    pub ty: TypeInfo,
    /// Receives the ambient request context instead of body content
    pub is_context: bool,
}

/// Message layout of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStyle {
    /// Body members inside a wrapper named after the operation
    DocumentWrapped,
    /// Body members as direct body children
    DocumentBare,
    /// RPC style: wrapper named after the operation, parameters inside
    Rpc,
    /// A single parameter models the whole envelope
    MessageContract { wrapped: bool },
}

/// Header member of a message contract.
#[derive(Debug, Clone)]
pub struct HeaderMember {
    /// Member (field) name on the contract record
    pub member: String,
    /// Explicit header element name; member name when absent
    pub header_name: Option<String>,
    /// Explicit namespace; contract namespace when absent
    pub namespace: Option<String>,
    pub must_understand: bool,
    pub ty: TypeInfo,
}

/// Body member of a message contract, bound in ascending order.
#[derive(Debug, Clone)]
pub struct BodyMember {
    pub member: String,
    pub order: i32,
    pub ty: TypeInfo,
}

/// Shape of a message-contract parameter.
#[derive(Debug, Clone)]
pub struct MessageContractInfo {
    pub is_wrapped: bool,
    pub wrapper_name: String,
    pub wrapper_namespace: String,
    pub type_name: String,
    pub headers: Vec<HeaderMember>,
    pub body_parts: Vec<BodyMember>,
}

/// One dispatchable operation.
pub struct OperationDescription {
    pub name: String,
    pub soap_action: String,
    pub reply_action: String,
    pub handler: OperationHandler,
    pub parameters: Vec<ParameterDescription>,
    pub is_one_way: bool,
    pub style: OperationStyle,
    /// Declared return shape, surfaced in generated metadata
    pub return_type: Option<TypeInfo>,
    /// Per-operation serializer override
    pub serializer: Option<SoapSerializer>,
    /// Types consulted for `xsi:type` polymorphic deserialization
    pub known_types: Vec<Arc<ComplexType>>,
    pub message_contract: Option<MessageContractInfo>,
}

impl std::fmt::Debug for OperationDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationDescription")
            .field("name", &self.name)
            .field("soap_action", &self.soap_action)
            .field("reply_action", &self.reply_action)
            .field("is_one_way", &self.is_one_way)
            .field("style", &self.style)
            .field("parameters", &self.parameters.len())
            .finish()
    }
}

impl OperationDescription {
    pub fn in_parameters(&self) -> impl Iterator<Item = &ParameterDescription> {
        self.parameters.iter().filter(|p| p.direction.is_input())
    }

    pub fn out_parameters(&self) -> impl Iterator<Item = &ParameterDescription> {
        self.parameters.iter().filter(|p| p.direction.is_output())
    }

    /// Wrapper element name for the response body.
    pub fn response_wrapper(&self) -> String {
        format!("{}Response", self.name)
    }

    /// Result element name inside the response wrapper.
    pub fn result_element(&self) -> String {
        format!("{}Result", self.name)
    }
}

/// A service contract: named operation group under one target namespace.
#[derive(Debug)]
pub struct ContractDescription {
    pub name: String,
    pub namespace: String,
    pub operations: Vec<Arc<OperationDescription>>,
}

/// The whole service: ordered contracts, built once, immutable afterwards.
#[derive(Debug)]
pub struct ServiceDescription {
    pub name: String,
    pub contracts: Vec<Arc<ContractDescription>>,
}

impl ServiceDescription {
    pub fn builder(name: impl Into<String>) -> ServiceBuilder {
        ServiceBuilder {
            name: name.into(),
            contracts: Vec::new(),
        }
    }
}

/// Builder for [`ServiceDescription`].
pub struct ServiceBuilder {
    name: String,
    contracts: Vec<ContractBuilder>,
}

impl ServiceBuilder {
    pub fn contract(mut self, contract: ContractBuilder) -> Self {
        self.contracts.push(contract);
        self
    }

    pub fn build(self) -> Result<Arc<ServiceDescription>, EndpointError> {
        let mut contracts = Vec::new();
        for builder in self.contracts {
            contracts.push(Arc::new(builder.build()?));
        }
        Ok(Arc::new(ServiceDescription {
            name: self.name,
            contracts,
        }))
    }
}

/// Builder for [`ContractDescription`].
pub struct ContractBuilder {
    name: String,
    namespace: String,
    operations: Vec<OperationBuilder>,
}

impl ContractBuilder {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            operations: Vec::new(),
        }
    }

    pub fn operation(mut self, operation: OperationBuilder) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn build(self) -> Result<ContractDescription, EndpointError> {
        let mut operations = Vec::new();
        for builder in self.operations {
            operations.push(Arc::new(builder.build(&self.name, &self.namespace)?));
        }

        // SOAP actions must be unique within a contract after trimming
        let mut seen = std::collections::HashSet::new();
        for op in &operations {
            let trimmed = crate::dispatch::trim_action(&op.soap_action);
            if !seen.insert(trimmed.to_string()) {
                return Err(EndpointError::Internal(format!(
                    "duplicate SOAP action '{}' in contract '{}'",
                    op.soap_action, self.name
                )));
            }
        }

        Ok(ContractDescription {
            name: self.name,
            namespace: self.namespace,
            operations,
        })
    }
}

/// Builder for [`OperationDescription`].
pub struct OperationBuilder {
    name: String,
    soap_action: Option<String>,
    reply_action: Option<String>,
    handler: Option<OperationHandler>,
    parameters: Vec<ParameterDescription>,
    is_one_way: bool,
    style: OperationStyle,
    return_type: Option<TypeInfo>,
    serializer: Option<SoapSerializer>,
    known_types: Vec<Arc<ComplexType>>,
    message_contract: Option<MessageContractInfo>,
}

impl OperationBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            soap_action: None,
            reply_action: None,
            handler: None,
            parameters: Vec::new(),
            is_one_way: false,
            style: OperationStyle::DocumentWrapped,
            return_type: None,
            serializer: None,
            known_types: Vec::new(),
            message_contract: None,
        }
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.soap_action = Some(action.into());
        self
    }

    pub fn reply_action(mut self, action: impl Into<String>) -> Self {
        self.reply_action = Some(action.into());
        self
    }

    pub fn one_way(mut self) -> Self {
        self.is_one_way = true;
        self
    }

    pub fn style(mut self, style: OperationStyle) -> Self {
        self.style = style;
        self
    }

    pub fn serializer(mut self, serializer: SoapSerializer) -> Self {
        self.serializer = Some(serializer);
        self
    }

    pub fn returns(mut self, ty: TypeInfo) -> Self {
        self.return_type = Some(ty);
        self
    }

    pub fn known_type(mut self, ty: Arc<ComplexType>) -> Self {
        self.known_types.push(ty);
        self
    }

    /// A message contract operation: exactly one In parameter models the
    /// whole envelope.
    pub fn message_contract(mut self, info: MessageContractInfo) -> Self {
        self.style = OperationStyle::MessageContract {
            wrapped: info.is_wrapped,
        };
        self.message_contract = Some(info);
        self
    }

    pub fn input(self, name: impl Into<String>, ty: TypeInfo) -> Self {
        self.param(name, ty, Direction::In, None, false)
    }

    pub fn input_ns(self, name: impl Into<String>, ty: TypeInfo, ns: impl Into<String>) -> Self {
        self.param(name, ty, Direction::In, Some(ns.into()), false)
    }

    pub fn output(self, name: impl Into<String>, ty: TypeInfo) -> Self {
        self.param(name, ty, Direction::Out, None, false)
    }

    pub fn in_out(self, name: impl Into<String>, ty: TypeInfo) -> Self {
        self.param(name, ty, Direction::InOut, None, false)
    }

    /// An In parameter that receives the ambient request context.
    pub fn context_input(self, name: impl Into<String>) -> Self {
        self.param(
            name,
            TypeInfo::Complex(
                ComplexType::new("RequestContext", "urn:soap-endpoint:context").into_arc(),
            ),
            Direction::In,
            None,
            true,
        )
    }

    fn param(
        mut self,
        name: impl Into<String>,
        ty: TypeInfo,
        direction: Direction,
        namespace: Option<String>,
        is_context: bool,
    ) -> Self {
        let index = self.parameters.len();
        self.parameters.push(ParameterDescription {
            index,
            name: name.into(),
            namespace,
            direction,
            ty,
            is_context,
        });
        self
    }

    pub fn handle<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(OperationRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<OperationReply, EndpointError>> + Send + 'static,
    {
        self.handler = Some(handler(f));
        self
    }

    fn build(
        self,
        contract_name: &str,
        contract_ns: &str,
    ) -> Result<OperationDescription, EndpointError> {
        let handler = self.handler.ok_or_else(|| {
            EndpointError::Internal(format!("operation '{}' has no handler", self.name))
        })?;

        if matches!(self.style, OperationStyle::MessageContract { .. }) {
            let inputs = self.parameters.iter().filter(|p| p.direction.is_input());
            if inputs.count() != 1 {
                return Err(EndpointError::Internal(format!(
                    "message contract operation '{}' must declare exactly one input",
                    self.name
                )));
            }
        }

        let soap_action = self.soap_action.unwrap_or_else(|| {
            format!(
                "{}/{}/{}",
                contract_ns.trim_end_matches('/'),
                contract_name,
                self.name
            )
        });
        let reply_action = self
            .reply_action
            .unwrap_or_else(|| format!("{}Response", soap_action));

        Ok(OperationDescription {
            name: self.name,
            soap_action,
            reply_action,
            handler,
            parameters: self.parameters,
            is_one_way: self.is_one_way,
            style: self.style,
            return_type: self.return_type,
            serializer: self.serializer,
            known_types: self.known_types,
            message_contract: self.message_contract,
        })
    }
}
