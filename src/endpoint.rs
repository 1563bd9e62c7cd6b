//! The endpoint router: path matching, metadata GET handling, and handoff
//! to the operation dispatcher. Requests for any other path are forwarded
//! to the next handler unchanged.

use crate::config::EndpointOptions;
use crate::dispatch::{
    ActionFilter, ContextSink, Dispatcher, MessageInspector, ModelBindingFilter, OperationTuner,
    ServiceFactory, SoapFilter, SoapResponse,
};
use crate::encoder::{select_encoder, MessageEncoder, WriteFormat};
use crate::error::EndpointError;
use crate::model::{RequestContext, ServiceDescription};
use crate::wsdl::{generate_wsdl, read_wsdl_file, read_xsd_file};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::{header, Method, StatusCode};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Hook that may rewrite a trailing segment of the request path before
/// endpoint matching.
pub type PathTuner = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// A configured SOAP endpoint. Shared immutably across requests.
pub struct SoapEndpoint {
    options: EndpointOptions,
    service: Arc<ServiceDescription>,
    dispatcher: Dispatcher,
    path_tuner: Option<PathTuner>,
}

/// Axum middleware entry point; wire with
/// `axum::middleware::from_fn_with_state(endpoint, soap_endpoint_middleware)`.
pub async fn soap_endpoint_middleware(
    State(endpoint): State<Arc<SoapEndpoint>>,
    req: Request,
    next: Next,
) -> Response {
    endpoint.handle(req, next).await
}

impl SoapEndpoint {
    pub fn builder(
        service: Arc<ServiceDescription>,
        options: EndpointOptions,
    ) -> SoapEndpointBuilder {
        SoapEndpointBuilder::new(service, options)
    }

    pub fn options(&self) -> &EndpointOptions {
        &self.options
    }

    pub fn service(&self) -> &Arc<ServiceDescription> {
        &self.service
    }

    /// Handle one request, forwarding non-matching paths to `next`.
    pub async fn handle(&self, req: Request, next: Next) -> Response {
        let path = req.uri().path().to_string();
        let path = match &self.path_tuner {
            Some(tuner) => tuner(&path),
            None => path,
        };

        let matches = if self.options.case_insensitive_path {
            path.eq_ignore_ascii_case(&self.options.path)
        } else {
            path == self.options.path
        };
        if !matches {
            return next.run(req).await;
        }

        match self.serve(req).await {
            Ok(response) => response,
            Err(EndpointError::InvalidArgument(message)) => {
                warn!(error = %message, "rejected metadata request");
                plain_response(StatusCode::BAD_REQUEST, message)
            }
            Err(err) => {
                // Log at critical severity and surface the failure so outer
                // middleware observes it
                error!(error = %err, path = %path, "unhandled endpoint failure");
                plain_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        }
    }

    async fn serve(&self, req: Request) -> Result<Response, EndpointError> {
        let method = req.method().clone();
        let uri = req.uri().to_string();
        let query = req.uri().query().unwrap_or("").to_string();
        let content_type = header_value(&req, header::CONTENT_TYPE);
        let scheme = request_scheme(&req);

        if method == Method::GET {
            let get_enabled = if scheme == "https" {
                self.options.https_get_enabled
            } else {
                self.options.http_get_enabled
            };
            if !get_enabled {
                debug!(scheme = %scheme, "metadata GET disabled for scheme");
                return Ok(plain_response(
                    StatusCode::FORBIDDEN,
                    "metadata over GET is disabled".to_string(),
                ));
            }

            let params = parse_query(&query);
            let has_key = |key: &str| params.iter().any(|(k, _)| k == key);

            // `wsdl` wins over `xsd` when both keys are present; an empty
            // content type also means metadata, but only once `xsd` had its
            // chance
            let serves_xsd = !has_key("wsdl")
                && has_key("xsd")
                && self.options.wsdl_files.is_some();

            if serves_xsd {
                let files = self.options.wsdl_files.as_ref().expect("mapping configured");
                let name = params
                    .iter()
                    .find(|(k, _)| k == "name")
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default();
                let xsd = read_xsd_file(files, &name).await?;
                return Ok(xml_response(xsd));
            }

            if has_key("wsdl") || content_type.is_empty() {
                let wsdl = match &self.options.wsdl_files {
                    Some(files) if !files.mapping.wsdl_file.is_empty() => {
                        read_wsdl_file(files).await?
                    }
                    _ => {
                        let base_url = self.base_url(&req, &scheme);
                        let version = self.dispatcher.encoders[0].version();
                        generate_wsdl(&self.service, &self.options, version, &base_url)?
                    }
                };
                return Ok(xml_response(wsdl));
            }
        }

        // Everything else is a SOAP operation
        let soap_action = header_value(&req, header::HeaderName::from_static("soapaction"));
        let ctx = RequestContext {
            method: method.to_string(),
            uri,
            content_type: content_type.clone(),
            soap_action: if soap_action.is_empty() {
                None
            } else {
                Some(soap_action)
            },
        };

        let encoder = select_encoder(&self.dispatcher.encoders, &content_type);
        let limit = encoder.limits().max_body_bytes;
        let body = match axum::body::to_bytes(req.into_body(), limit).await {
            Ok(bytes) => bytes.to_vec(),
            Err(err) => {
                // An unreadable or oversized body reaches the dispatcher as
                // an empty envelope and faults as malformed
                warn!(error = %err, "request body read failed");
                Vec::new()
            }
        };

        let response = self.dispatcher.dispatch(ctx, &body).await;
        Ok(into_http_response(response))
    }

    fn base_url(&self, req: &Request, scheme: &str) -> String {
        let host = header_value(req, header::HOST);
        let host = if host.is_empty() {
            "localhost".to_string()
        } else {
            host
        };
        format!("{}://{}{}", scheme, host, self.options.path)
    }
}

fn header_value(req: &Request, name: impl header::AsHeaderName) -> String {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn request_scheme(req: &Request) -> String {
    let forwarded = header_value(req, header::HeaderName::from_static("x-forwarded-proto"));
    if !forwarded.is_empty() {
        return forwarded.to_lowercase();
    }
    req.uri()
        .scheme_str()
        .unwrap_or("http")
        .to_lowercase()
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

fn plain_response(status: StatusCode, message: String) -> Response {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}

fn xml_response(body: String) -> Response {
    let mut response = Response::new(Body::from(body));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/xml;charset=UTF-8"),
    );
    response
}

fn into_http_response(soap: SoapResponse) -> Response {
    let mut builder = Response::builder().status(soap.status);
    if let Some(content_type) = &soap.content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    for (name, value) in &soap.headers {
        builder = builder.header(name, value);
    }
    builder.body(Body::from(soap.body)).unwrap_or_else(|err| {
        error!(error = %err, "response assembly failed");
        plain_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "response assembly failed".to_string(),
        )
    })
}

/// Builder for [`SoapEndpoint`].
pub struct SoapEndpointBuilder {
    options: EndpointOptions,
    service: Arc<ServiceDescription>,
    filters: Vec<Arc<dyn SoapFilter>>,
    inspectors: Vec<Arc<dyn MessageInspector>>,
    model_filters: Vec<Arc<dyn ModelBindingFilter>>,
    action_filters: Vec<Arc<dyn ActionFilter>>,
    tuners: Vec<Arc<dyn OperationTuner>>,
    factory: Option<Arc<dyn ServiceFactory>>,
    context_sink: Option<Arc<dyn ContextSink>>,
    path_tuner: Option<PathTuner>,
}

impl SoapEndpointBuilder {
    fn new(service: Arc<ServiceDescription>, options: EndpointOptions) -> Self {
        Self {
            options,
            service,
            filters: Vec::new(),
            inspectors: Vec::new(),
            model_filters: Vec::new(),
            action_filters: Vec::new(),
            tuners: Vec::new(),
            factory: None,
            context_sink: None,
            path_tuner: None,
        }
    }

    pub fn filter(mut self, filter: Arc<dyn SoapFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn inspector(mut self, inspector: Arc<dyn MessageInspector>) -> Self {
        self.inspectors.push(inspector);
        self
    }

    /// The model bounder hook, run right after argument binding.
    pub fn model_bounder(mut self, filter: Arc<dyn ModelBindingFilter>) -> Self {
        self.model_filters.push(filter);
        self
    }

    pub fn action_filter(mut self, filter: Arc<dyn ActionFilter>) -> Self {
        self.action_filters.push(filter);
        self
    }

    pub fn tuner(mut self, tuner: Arc<dyn OperationTuner>) -> Self {
        self.tuners.push(tuner);
        self
    }

    pub fn factory(mut self, factory: Arc<dyn ServiceFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn context_sink(mut self, sink: Arc<dyn ContextSink>) -> Self {
        self.context_sink = Some(sink);
        self
    }

    pub fn path_tuner(mut self, tuner: PathTuner) -> Self {
        self.path_tuner = Some(tuner);
        self
    }

    pub fn build(self) -> Arc<SoapEndpoint> {
        let encoders: Vec<MessageEncoder> = self
            .options
            .effective_encoders()
            .into_iter()
            .map(MessageEncoder::new)
            .collect();
        let write_format = WriteFormat {
            omit_xml_declaration: self.options.omit_xml_declaration,
            indent_xml: self.options.indent_xml,
            prefixes: self.options.namespace_prefix_overrides.clone(),
        };

        let mut dispatcher = Dispatcher::new(
            self.service.clone(),
            encoders,
            self.options.serializer,
            write_format,
        );
        dispatcher.filters = self.filters;
        dispatcher.inspectors = self.inspectors;
        dispatcher.model_filters = self.model_filters;
        dispatcher.action_filters = self.action_filters;
        dispatcher.tuners = self.tuners;
        if let Some(factory) = self.factory {
            dispatcher.factory = factory;
        }
        dispatcher.context_sink = self.context_sink;

        Arc::new(SoapEndpoint {
            options: self.options,
            service: self.service,
            dispatcher,
            path_tuner: self.path_tuner,
        })
    }
}
