//! Request dispatch for the uplink listener.
//!
//! `POST` on any path is logged and acknowledged with `{"code":0}`, which
//! is what the uplink client waits for before dropping the record from its
//! queue. Every other method is refused with `501`.

use std::borrow::Cow;
use std::fmt::Display;

use header::{self, HeaderValue};
use method::Method;
use status::StatusCode;
use Request;
use Response;

/// Body of the acknowledgement, sent byte for byte
pub const ACK_BODY: &[u8] = br#"{"code":0}"#;

/// Dispatch a request by method
pub fn handle(request: Request) -> Response<Vec<u8>> {
    match *request.method() {
        Method::POST => {
            info!("{}", receipt_line(request.target(), request.body()));
            acknowledgement()
        }
        ref method => not_implemented(method),
    }
}

/// `200 OK` with the JSON acknowledgement
pub fn acknowledgement() -> Response<Vec<u8>> {
    let mut resp = Response::new(ACK_BODY.to_vec());
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    resp
}

fn not_implemented(method: &Method) -> Response<Vec<u8>> {
    let body = if *method == Method::HEAD {
        vec![]
    } else {
        format!("Unsupported method ('{}')", method).into_bytes()
    };
    let mut resp = Response::new(body);
    *resp.status_mut() = StatusCode::NOT_IMPLEMENTED;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}

/// The one log line written per received `POST`.
///
/// The body is decoded lossily, invalid UTF-8 shows up as U+FFFD. Line
/// breaks are escaped so a multi-line payload still fits on one line.
pub fn receipt_line<T: Display>(target: T, body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    format!("Received POST {}: {}", target, single_line(&text))
}

fn single_line<'a>(text: &'a str) -> Cow<'a, str> {
    if !text.contains(|c: char| c == '\r' || c == '\n') {
        return Cow::Borrowed(text);
    }
    Cow::Owned(text.replace('\r', "\\r").replace('\n', "\\n"))
}
