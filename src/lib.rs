//! SOAP 1.1/1.2 endpoint middleware for axum services.
//!
//! Accepts HTTP requests carrying SOAP envelopes, dispatches them to
//! operations declared on a service description, and returns either a SOAP
//! response envelope or a SOAP fault. Requests for any other path are
//! forwarded to the next handler unchanged.
//!
//! # Features
//!
//! - SOAP 1.1 and 1.2 with content-type negotiation across encoders
//! - Document (wrapped/bare), RPC, and message-contract body styles
//! - Positional argument binding from a startup-time metadata table
//! - Filters, message inspectors, and tuners with well-defined ordering
//! - Uniform fault translation with version-correct fault envelopes
//! - WSDL/XSD metadata over GET, generated or file-backed
//! - Optional WS-Addressing 1.0 response headers
//!
//! # Example
//!
//! ```ignore
//! use soap_endpoint::endpoint::{soap_endpoint_middleware, SoapEndpoint};
//! use soap_endpoint::model::{ContractBuilder, OperationBuilder, OperationReply, ServiceDescription};
//! use soap_endpoint::value::{TypeInfo, Value};
//!
//! let service = ServiceDescription::builder("Calculator")
//!     .contract(
//!         ContractBuilder::new("Calculator", "http://tempuri.org/").operation(
//!             OperationBuilder::new("Add")
//!                 .input("a", TypeInfo::Int)
//!                 .input("b", TypeInfo::Int)
//!                 .returns(TypeInfo::Int)
//!                 .handle(|req| async move {
//!                     let (a, b) = match (&req.arguments[0], &req.arguments[1]) {
//!                         (Value::Int(a), Value::Int(b)) => (*a, *b),
//!                         _ => (0, 0),
//!                     };
//!                     Ok(OperationReply::returning(Value::Int(a + b)))
//!                 }),
//!         ),
//!     )
//!     .build()?;
//!
//! let endpoint = SoapEndpoint::builder(service, Default::default()).build();
//! let app = axum::Router::new()
//!     .layer(axum::middleware::from_fn_with_state(endpoint, soap_endpoint_middleware));
//! ```

pub mod binder;
pub mod config;
pub mod dispatch;
pub mod encoder;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod fault;
pub mod model;
pub mod value;
pub mod wsdl;

pub use config::{EndpointOptions, SoapSerializer, SoapVersion};
pub use endpoint::{soap_endpoint_middleware, SoapEndpoint};
pub use error::{EndpointError, FaultKind};
pub use model::{OperationReply, ServiceDescription};
pub use value::{TypeInfo, Value};
