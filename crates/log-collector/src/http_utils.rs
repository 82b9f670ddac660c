// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    header,
    http::{self, response::Builder, HeaderMap},
    Response, StatusCode,
};
use tracing::{debug, error};

/// Response body type used across the collector.
pub type Body = Full<Bytes>;

/// Every response, success or failure, carries the permissive CORS
/// headers; the configured origin list is informational only.
pub fn with_cors(builder: Builder) -> Builder {
    builder
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(header::ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS")
        .header(header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type")
}

/// Does two things:
/// 1. Logs the given message. A success status code (within 200-299)
///    will cause a debug log to be written, otherwise error will be
///    written.
/// 2. Returns the given message as the plain-text response body with
///    the given status code.
pub fn log_and_create_http_response(
    message: &str,
    status: StatusCode,
) -> http::Result<Response<Body>> {
    if status.is_success() {
        debug!("{message}");
    } else {
        error!("{message}");
    }
    with_cors(Response::builder().status(status)).body(Body::from(message.to_owned()))
}

/// Takes a request's header map, and verifies that the
/// "content-length" and/or "Transfer-Encoding" header is present,
/// valid, and less than the given max_content_length.
///
/// Will return None if no issues are found. Otherwise logs an error
/// (with the given prefix) and returns an HTTP Response with the
/// appropriate error status code.
pub fn verify_request_content_length(
    header_map: &HeaderMap,
    max_content_length: usize,
    error_message_prefix: &str,
) -> Option<http::Result<Response<Body>>> {
    let content_length_header = match header_map.get(header::CONTENT_LENGTH) {
        Some(res) => res,
        None => {
            if header_map.get(header::TRANSFER_ENCODING).is_some() {
                return None;
            }
            return Some(log_and_create_http_response(
                &format!(
                    "{error_message_prefix}: Missing Content-Length and Transfer-Encoding header"
                ),
                StatusCode::LENGTH_REQUIRED,
            ));
        }
    };
    let content_length = match content_length_header
        .to_str()
        .ok()
        .and_then(|header| header.parse::<usize>().ok())
    {
        Some(res) => res,
        None => {
            return Some(log_and_create_http_response(
                &format!("{error_message_prefix}: Invalid Content-Length header"),
                StatusCode::BAD_REQUEST,
            ));
        }
    };
    if content_length > max_content_length {
        return Some(log_and_create_http_response(
            &format!("{error_message_prefix}: Payload too large"),
            StatusCode::PAYLOAD_TOO_LARGE,
        ));
    }
    None
}
