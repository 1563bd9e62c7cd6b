//! Fault translation: any failure in the dispatch pipeline becomes a
//! version-correct SOAP fault envelope plus HTTP response fields.

use crate::config::{AddressingVersion, SoapVersion};
use crate::envelope::{Envelope, FaultDetail, ResponseBody, ResponseEnvelope};
use crate::error::EndpointError;

/// Default HTTP status for faults.
pub const DEFAULT_FAULT_STATUS: u16 = 500;

/// Convert a pipeline error into a fault envelope and HTTP status.
///
/// The fault mirrors the request: the caller sends it back at the request's
/// content type, and under WS-Addressing 1.0 RelatesTo is copied from the
/// request MessageID and To from its ReplyTo. The fault action is
/// intentionally left unset. One layer of invocation-site wrapping is
/// removed so clients see the user error's message.
pub fn to_fault(
    error: &EndpointError,
    version: SoapVersion,
    addressing: AddressingVersion,
    request: Option<&Envelope>,
    status: Option<u16>,
) -> (ResponseEnvelope, u16) {
    let error = unwrap_invocation(error);
    let detail = FaultDetail {
        kind: error.kind(),
        reason: error.to_string(),
    };

    let mut envelope = ResponseEnvelope::new(version, ResponseBody::Fault(detail));
    if addressing == AddressingVersion::WsAddressing10 {
        envelope.addressed = true;
        if let Some(request) = request {
            envelope.relates_to = request.message_id.clone();
            envelope.to = request.reply_to.clone();
        }
    }

    (envelope, status.unwrap_or(DEFAULT_FAULT_STATUS))
}

/// Remove exactly one layer of invocation-site wrapping.
fn unwrap_invocation(error: &EndpointError) -> &EndpointError {
    match error {
        EndpointError::Invocation {
            source: Some(inner),
            ..
        } => inner,
        other => other,
    }
}
