//! The operation dispatcher: the per-request pipeline from envelope read
//! through response write, with filter interposition and fault routing.
//!
//! Observable ordering within one request: request filters, inspectors
//! (AfterReceiveRequest), operation match, instance, binding, model-binding
//! filters, action filters, tuners, invocation, response assembly,
//! inspectors (BeforeSendReply, reverse), write, response filters (reverse).
//! Response filters run in reverse on every exit path including faults.

use crate::binder::bind_arguments;
use crate::config::{AddressingVersion, SoapSerializer};
use crate::encoder::{action_from_content_type, select_encoder, MessageEncoder, WriteFormat};
use crate::envelope::{Envelope, HeaderEntry, ResponseBody, ResponseEnvelope};
use crate::error::EndpointError;
use crate::fault::to_fault;
use crate::model::{
    ContractDescription, OperationDescription, OperationReply, OperationRequest, RequestContext,
    ServiceDescription, ServiceInstance,
};
use crate::value::Value;
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Correlation state carried from AfterReceiveRequest to BeforeSendReply.
pub type Correlation = Box<dyn Any + Send>;

/// Per-request mutable state exposed to filters.
pub struct OperationContext {
    pub request: RequestContext,
    /// The request envelope; present once reading succeeded
    pub envelope: Option<Envelope>,
    pub contract: Option<Arc<ContractDescription>>,
    pub operation: Option<Arc<OperationDescription>>,
    /// Bound positional arguments; filled after binding
    pub arguments: Vec<Value>,
    pub instance: Option<ServiceInstance>,
    /// The response under construction; response filters may replace it
    pub response: Option<ResponseEnvelope>,
}

impl OperationContext {
    fn new(request: RequestContext) -> Self {
        Self {
            request,
            envelope: None,
            contract: None,
            operation: None,
            arguments: Vec::new(),
            instance: None,
            response: None,
        }
    }
}

/// A unidirectional interceptor around the request and response phases.
/// `before` hooks run in declared order, `after` hooks in reverse.
#[async_trait]
pub trait SoapFilter: Send + Sync {
    async fn before(&self, _ctx: &mut OperationContext) -> Result<(), EndpointError> {
        Ok(())
    }
    async fn after(&self, _ctx: &mut OperationContext) -> Result<(), EndpointError> {
        Ok(())
    }
}

/// A bidirectional interceptor producing a correlation value on receive and
/// consuming it on send. BeforeSendReply runs in reverse declared order,
/// each inspector receiving its own correlation value back.
#[async_trait]
pub trait MessageInspector: Send + Sync {
    async fn after_receive(
        &self,
        envelope: &Envelope,
        ctx: &RequestContext,
    ) -> Result<Correlation, EndpointError>;

    async fn before_send(&self, response: &mut ResponseEnvelope, correlation: Correlation);
}

/// Hook run immediately after argument binding, before action filters.
#[async_trait]
pub trait ModelBindingFilter: Send + Sync {
    async fn bound(&self, ctx: &mut OperationContext) -> Result<(), EndpointError>;
}

/// Hook run after model-binding filters, before tuners.
#[async_trait]
pub trait ActionFilter: Send + Sync {
    async fn invoke(&self, ctx: &mut OperationContext) -> Result<(), EndpointError>;
}

/// Pre-invocation hook that may adjust the service instance or arguments.
#[async_trait]
pub trait OperationTuner: Send + Sync {
    async fn tune(
        &self,
        instance: &ServiceInstance,
        operation: &OperationDescription,
        arguments: &mut Vec<Value>,
    ) -> Result<(), EndpointError>;
}

/// Request-scoped provider of the user service instance.
#[async_trait]
pub trait ServiceFactory: Send + Sync {
    async fn create(&self, ctx: &RequestContext) -> Result<ServiceInstance, EndpointError>;
}

/// Default factory for services with no per-request state.
pub struct UnitServiceFactory;

#[async_trait]
impl ServiceFactory for UnitServiceFactory {
    async fn create(&self, _ctx: &RequestContext) -> Result<ServiceInstance, EndpointError> {
        Ok(Arc::new(()))
    }
}

/// Capability for pushing the request envelope's headers into the service
/// instance before invocation. Absent sink means no-op.
pub trait ContextSink: Send + Sync {
    fn install(&self, instance: &ServiceInstance, headers: &[HeaderEntry]);
}

/// Transport-agnostic response produced by the dispatcher.
#[derive(Debug)]
pub struct SoapResponse {
    pub status: u16,
    pub reason: Option<String>,
    pub content_type: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// The dispatcher. Shared immutably across requests.
pub struct Dispatcher {
    pub(crate) service: Arc<ServiceDescription>,
    pub(crate) encoders: Vec<MessageEncoder>,
    pub(crate) serializer: SoapSerializer,
    pub(crate) write_format: WriteFormat,
    pub(crate) filters: Vec<Arc<dyn SoapFilter>>,
    pub(crate) inspectors: Vec<Arc<dyn MessageInspector>>,
    pub(crate) model_filters: Vec<Arc<dyn ModelBindingFilter>>,
    pub(crate) action_filters: Vec<Arc<dyn ActionFilter>>,
    pub(crate) tuners: Vec<Arc<dyn OperationTuner>>,
    pub(crate) factory: Arc<dyn ServiceFactory>,
    pub(crate) context_sink: Option<Arc<dyn ContextSink>>,
}

impl Dispatcher {
    pub fn new(
        service: Arc<ServiceDescription>,
        encoders: Vec<MessageEncoder>,
        serializer: SoapSerializer,
        write_format: WriteFormat,
    ) -> Self {
        assert!(!encoders.is_empty(), "at least one encoder is required");
        Self {
            service,
            encoders,
            serializer,
            write_format,
            filters: Vec::new(),
            inspectors: Vec::new(),
            model_filters: Vec::new(),
            action_filters: Vec::new(),
            tuners: Vec::new(),
            factory: Arc::new(UnitServiceFactory),
            context_sink: None,
        }
    }

    /// Run the full pipeline for one request body.
    pub async fn dispatch(&self, request: RequestContext, body: &[u8]) -> SoapResponse {
        let encoder = select_encoder(&self.encoders, &request.content_type);
        let response_content_type = if request.content_type.is_empty() {
            encoder.default_content_type()
        } else {
            // SOAP responses and faults mirror the request encoding
            request.content_type.clone()
        };

        let mut ctx = OperationContext::new(request);
        let mut status: u16 = 200;
        let mut one_way = false;

        match self.run_pipeline(encoder, body, &mut ctx, &mut one_way).await {
            Ok(()) => {}
            Err(err) => {
                warn!(
                    code = err.kind().as_str(),
                    error = %err,
                    uri = %ctx.request.uri,
                    "dispatch failed, translating to fault"
                );
                let (fault, fault_status) = to_fault(
                    &err,
                    encoder.version(),
                    encoder.addressing(),
                    ctx.envelope.as_ref(),
                    None,
                );
                ctx.response = Some(fault);
                status = fault_status;
                one_way = false;
            }
        }

        // Response filters run in reverse on every exit path. A failure here
        // becomes a fault that overwrites the response envelope so later
        // stages observe it; subsequent failures are swallowed after logging.
        for filter in self.filters.iter().rev() {
            if let Err(err) = filter.after(&mut ctx).await {
                warn!(code = err.kind().as_str(), error = %err, "response filter failed");
                let (fault, fault_status) = to_fault(
                    &err,
                    encoder.version(),
                    encoder.addressing(),
                    ctx.envelope.as_ref(),
                    None,
                );
                ctx.response = Some(fault);
                status = fault_status;
                one_way = false;
            }
        }

        if one_way {
            return SoapResponse {
                status: 202,
                reason: None,
                content_type: None,
                headers: Vec::new(),
                body: Vec::new(),
            };
        }

        let envelope = ctx.response.take().unwrap_or_else(|| {
            ResponseEnvelope::new(encoder.version(), ResponseBody::Empty)
        });
        self.finish(envelope, status, encoder, response_content_type)
    }

    async fn run_pipeline(
        &self,
        encoder: &MessageEncoder,
        body: &[u8],
        ctx: &mut OperationContext,
        one_way: &mut bool,
    ) -> Result<(), EndpointError> {
        // Start -> EnvRead
        let envelope = encoder.read(body)?;
        ctx.envelope = Some(envelope);

        // EnvRead -> Filtered
        for filter in &self.filters {
            filter.before(ctx).await?;
        }

        // Filtered -> Resolved: action, then AfterReceiveRequest in order,
        // one correlation per inspector
        let action = self.resolve_action(ctx);
        debug!(action = %action, uri = %ctx.request.uri, "resolved SOAP action");

        let mut correlations = Vec::with_capacity(self.inspectors.len());
        for inspector in &self.inspectors {
            let envelope = ctx.envelope.as_ref().expect("envelope read");
            correlations.push(inspector.after_receive(envelope, &ctx.request).await?);
        }

        // Resolved -> Matched
        let (contract, operation) = self
            .match_operation(&action)
            .ok_or_else(|| EndpointError::NoOperation(action.clone()))?;
        ctx.contract = Some(contract.clone());
        ctx.operation = Some(operation.clone());

        // Matched: instance, binding, filter chain, invocation
        let instance = self.factory.create(&ctx.request).await?;
        {
            let envelope = ctx.envelope.as_ref().expect("envelope read");
            if let Some(sink) = &self.context_sink {
                sink.install(&instance, &envelope.headers);
            }
        }
        ctx.instance = Some(instance);

        let headers: Vec<HeaderEntry> =
            ctx.envelope.as_ref().expect("envelope read").headers.clone();
        let body_node = ctx
            .envelope
            .as_mut()
            .expect("envelope read")
            .take_body()?;
        ctx.arguments = bind_arguments(
            &operation,
            &contract,
            body_node.as_ref(),
            &headers,
            self.serializer,
            &ctx.request,
        )?;

        for filter in &self.model_filters {
            filter.bound(ctx).await?;
        }
        for filter in &self.action_filters {
            filter.invoke(ctx).await?;
        }
        for tuner in &self.tuners {
            let instance = ctx.instance.clone().expect("instance resolved");
            tuner.tune(&instance, &operation, &mut ctx.arguments).await?;
        }

        let reply = (operation.handler)(OperationRequest {
            arguments: ctx.arguments.clone(),
            headers,
            context: ctx.request.clone(),
            instance: ctx.instance.clone().expect("instance resolved"),
        })
        .await?;

        // Invoked
        if operation.is_one_way {
            *one_way = true;
            return Ok(());
        }

        let mut response = self.build_response(
            &operation,
            &contract,
            reply,
            ctx.envelope.as_ref().expect("envelope read"),
            encoder,
        );

        // BeforeSendReply in reverse, each with its own correlation
        for (inspector, correlation) in self
            .inspectors
            .iter()
            .zip(correlations.into_iter())
            .rev()
        {
            inspector.before_send(&mut response, correlation).await;
        }

        ctx.response = Some(response);
        Ok(())
    }

    /// Resolve the incoming action: transport header (quotes stripped), then
    /// the content-type `action` parameter, then the envelope's wsa:Action,
    /// then the body root element name.
    fn resolve_action(&self, ctx: &OperationContext) -> String {
        if let Some(action) = &ctx.request.soap_action {
            let action = trim_action(action);
            if !action.is_empty() {
                return action.to_string();
            }
        }
        if let Some(action) = action_from_content_type(&ctx.request.content_type) {
            if !action.is_empty() {
                return action;
            }
        }
        if let Some(envelope) = &ctx.envelope {
            if let Some(action) = &envelope.action {
                if !action.is_empty() {
                    return action.clone();
                }
            }
            if let Some(root) = envelope.body_root_name() {
                return root.to_string();
            }
        }
        String::new()
    }

    /// SOAP action matching, first hit wins:
    /// 1. declared action equals the incoming action exactly;
    /// 2. operation name equals the trimmed incoming action;
    /// 3. incoming action equals the trimmed operation name;
    /// 4. trimmed incoming equals the trimmed-and-cleared declared action.
    fn match_operation(
        &self,
        incoming: &str,
    ) -> Option<(Arc<ContractDescription>, Arc<OperationDescription>)> {
        let trimmed = trim_action(incoming);

        for contract in &self.service.contracts {
            for op in &contract.operations {
                if op.soap_action == incoming {
                    return Some((contract.clone(), op.clone()));
                }
            }
        }
        for contract in &self.service.contracts {
            for op in &contract.operations {
                if op.name == trimmed {
                    return Some((contract.clone(), op.clone()));
                }
            }
        }
        for contract in &self.service.contracts {
            for op in &contract.operations {
                if incoming == trim_action(&op.name) {
                    return Some((contract.clone(), op.clone()));
                }
            }
        }
        for contract in &self.service.contracts {
            for op in &contract.operations {
                if trimmed == trim_and_clear(&op.soap_action) {
                    return Some((contract.clone(), op.clone()));
                }
            }
        }
        None
    }

    fn build_response(
        &self,
        operation: &OperationDescription,
        contract: &ContractDescription,
        reply: OperationReply,
        request: &Envelope,
        encoder: &MessageEncoder,
    ) -> ResponseEnvelope {
        use crate::model::OperationStyle;

        let body = match (operation.style, &reply.return_value) {
            (OperationStyle::MessageContract { wrapped }, Value::Record { type_name, .. }) => {
                ResponseBody::Contract {
                    wrapped,
                    wrapper: type_name.clone(),
                    namespace: contract.namespace.clone(),
                    value: reply.return_value.clone(),
                }
            }
            _ => {
                // Out/ref values in parameter declaration order, any extras
                // the handler added after them
                let mut out_values: Vec<(String, Value)> = Vec::new();
                let mut remaining = reply.out_values.clone();
                for param in operation.out_parameters() {
                    if let Some(value) = remaining.remove(&param.name) {
                        out_values.push((param.name.clone(), value));
                    }
                }
                out_values.extend(remaining.into_iter());

                ResponseBody::Operation {
                    wrapper: operation.response_wrapper(),
                    namespace: contract.namespace.clone(),
                    result_element: operation.result_element(),
                    result: reply.return_value.clone(),
                    out_values,
                }
            }
        };

        let mut response = ResponseEnvelope::new(encoder.version(), body);
        response.action = Some(operation.reply_action.clone());
        if encoder.addressing() == AddressingVersion::WsAddressing10 {
            response.addressed = true;
            response.relates_to = request.message_id.clone();
            response.to = request.reply_to.clone();
        }
        response.headers = reply.headers;
        response.http = reply.http;
        response
    }

    fn finish(
        &self,
        envelope: ResponseEnvelope,
        status: u16,
        encoder: &MessageEncoder,
        content_type: String,
    ) -> SoapResponse {
        let body = match encoder.write(&envelope, &self.write_format) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(error = %err, "response serialization failed");
                return SoapResponse {
                    status: 500,
                    reason: None,
                    content_type: Some("text/plain".to_string()),
                    headers: Vec::new(),
                    body: b"response serialization failed".to_vec(),
                };
            }
        };

        let mut response = SoapResponse {
            status,
            reason: None,
            content_type: Some(content_type),
            headers: vec![(
                "SOAPAction".to_string(),
                envelope.action.clone().unwrap_or_default(),
            )],
            body,
        };

        // User-attached HTTP overrides apply uniformly, success and fault
        if let Some(http) = &envelope.http {
            if let Some(status) = http.status {
                response.status = status;
            }
            if let Some(reason) = &http.reason {
                response.reason = Some(reason.clone());
            }
            response.headers.extend(http.headers.iter().cloned());
        }

        response
    }
}

/// Strip surrounding whitespace and quotes from an action string.
pub fn trim_action(action: &str) -> &str {
    action.trim().trim_matches('"').trim()
}

/// Trim plus strip of a leading namespace URI prefix.
pub fn trim_and_clear(action: &str) -> &str {
    let trimmed = trim_action(action);
    let cleared = trimmed.rsplit('/').next().unwrap_or(trimmed);
    cleared.rsplit('#').next().unwrap_or(cleared)
}
