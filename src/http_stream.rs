use std::borrow::Cow;

use http::header::{self, HeaderMap};

use errors::*;
use RawTarget;
use RequestHead;

/// Max number of headers accepted on a single request
const MAX_HEADERS: usize = 100;

/// Max number of bytes buffered while waiting for the end of the request head
const MAX_HEAD_LEN: usize = 16 * 1024;

/// Pull the body length out of `Content-Length`.
///
/// A missing, negative or otherwise unparsable value means the request
/// carries no body. When the header is repeated, the first one wins.
pub fn content_length(headers: &HeaderMap) -> usize {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0)
}

/// Percent-encode the bytes of a request target that `http::Uri` refuses.
///
/// Clients put all sorts of things on the request line (raw UTF-8, `<`,
/// backticks); they are still valid requests to acknowledge.
pub fn encode_target<'a>(raw: &'a str) -> Cow<'a, str> {
    fn keep(b: u8) -> bool {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' => true,
            b'-' | b'.' | b'_' | b'~' | b'%' => true,
            b'/' | b'?' | b':' | b'@' => true,
            b'!' | b'$' | b'&' | b'\'' | b'(' | b')' | b'*' | b'+' | b',' | b';' | b'=' => true,
            _ => false,
        }
    }
    if raw.bytes().all(keep) {
        return Cow::Borrowed(raw);
    }
    let mut encoded = String::with_capacity(raw.len() * 3);
    for b in raw.bytes() {
        if keep(b) {
            encoded.push(b as char);
        } else {
            encoded.push_str(&format!("%{:02X}", b));
        }
    }
    Cow::Owned(encoded)
}

/// Accumulates the bytes read off a stream until a full request
/// (head + `Content-Length` bytes of body) is available.
///
/// `read_buf` holds the head followed by the body, `headers_length`
/// marks where the body starts once the head has been parsed.
pub struct HttpStreamReader {
    pub read_buf: Vec<u8>,
    pub headers_length: usize,
    content_length: usize,
    head: Option<RequestHead>,
}
impl HttpStreamReader {
    pub fn new() -> Self {
        Self {
            read_buf: Vec::with_capacity(1024),
            headers_length: 0,
            content_length: 0,
            head: None,
        }
    }

    pub fn receive_chunk(&mut self, chunk: &[u8]) {
        self.read_buf.extend_from_slice(chunk);
    }

    /// Returns `Some` once the head is parsed and the body is complete.
    ///
    /// With `eof` set the peer won't send anything more, so a parsed head
    /// is handed out with whatever part of the body made it. Bytes past
    /// the declared body length are dropped.
    pub fn try_build_request(&mut self, eof: bool) -> Result<Option<RequestHead>> {
        if self.head.is_none() && !self.parse_head()? {
            return Ok(None);
        }
        let received = self.read_buf.len() - self.headers_length;
        if received >= self.content_length {
            self.read_buf
                .truncate(self.headers_length + self.content_length);
            return Ok(self.head.take());
        }
        if eof {
            debug!(
                "body truncated, expected {} bytes, received {}",
                self.content_length, received
            );
            return Ok(self.head.take());
        }
        Ok(None)
    }

    /// Try parsing the request line and headers out of `read_buf`.
    /// Returns `false` while the head is still incomplete.
    fn parse_head(&mut self) -> Result<bool> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        let len = match req.parse(&self.read_buf)? {
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial => {
                if self.read_buf.len() > MAX_HEAD_LEN {
                    bail!(ErrorKind::RequestHeadTooLarge(self.read_buf.len()));
                }
                return Ok(false);
            }
        };

        // a complete parse always carries a method, path and version
        let version = match req.version {
            Some(0) => http::Version::HTTP_10,
            _ => http::Version::HTTP_11,
        };
        let target = req.path.unwrap_or("/");
        let mut builder = http::Request::builder()
            .method(req.method.unwrap_or_default())
            .uri(&*encode_target(target))
            .version(version)
            .extension(RawTarget(target.to_string()));
        for hdr in req.headers.iter() {
            builder = builder.header(hdr.name, hdr.value);
        }
        let head = builder.body(())?;

        self.content_length = content_length(head.headers());
        self.headers_length = len;
        self.head = Some(head);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(*k, header::HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn content_length_defaults_to_zero() {
        assert_eq!(content_length(&headers(&[])), 0);
        assert_eq!(content_length(&headers(&[("content-length", "abc")])), 0);
        assert_eq!(content_length(&headers(&[("content-length", "-5")])), 0);
        assert_eq!(content_length(&headers(&[("content-length", "")])), 0);
    }

    #[test]
    fn content_length_parses_first_value() {
        assert_eq!(content_length(&headers(&[("content-length", "13")])), 13);
        assert_eq!(content_length(&headers(&[("content-length", " 7 ")])), 7);
        assert_eq!(
            content_length(&headers(&[("content-length", "4"), ("content-length", "9")])),
            4
        );
    }

    #[test]
    fn waits_for_complete_head() {
        let mut reader = HttpStreamReader::new();
        reader.receive_chunk(b"POST /uplink HTTP/1.1\r\nHost: x\r\n");
        assert!(reader.try_build_request(false).unwrap().is_none());
        reader.receive_chunk(b"\r\n");
        let head = reader.try_build_request(false).unwrap().unwrap();
        assert_eq!(head.method(), http::Method::POST);
        assert_eq!(head.uri().path(), "/uplink");
        assert_eq!(&reader.read_buf[reader.headers_length..], b"");
    }

    #[test]
    fn waits_for_declared_body() {
        let mut reader = HttpStreamReader::new();
        reader.receive_chunk(b"POST /uplink HTTP/1.1\r\nContent-Length: 13\r\n\r\n{\"temp\"");
        assert!(reader.try_build_request(false).unwrap().is_none());
        reader.receive_chunk(b":21.5}trailing");
        let head = reader.try_build_request(false).unwrap().unwrap();
        assert_eq!(head.version(), http::Version::HTTP_11);
        assert_eq!(
            &reader.read_buf[reader.headers_length..],
            b"{\"temp\":21.5}"
        );
    }

    #[test]
    fn hands_out_truncated_body_at_eof() {
        let mut reader = HttpStreamReader::new();
        reader.receive_chunk(b"POST /uplink HTTP/1.0\r\nContent-Length: 100\r\n\r\nshort");
        assert!(reader.try_build_request(false).unwrap().is_none());
        let head = reader.try_build_request(true).unwrap().unwrap();
        assert_eq!(head.version(), http::Version::HTTP_10);
        assert_eq!(&reader.read_buf[reader.headers_length..], b"short");
    }

    #[test]
    fn incomplete_head_at_eof_yields_nothing() {
        let mut reader = HttpStreamReader::new();
        assert!(reader.try_build_request(true).unwrap().is_none());
        reader.receive_chunk(b"POST /upl");
        assert!(reader.try_build_request(true).unwrap().is_none());
    }

    #[test]
    fn encodes_targets_uri_refuses() {
        assert_eq!(encode_target("/uplink?dev=7&x=%20"), "/uplink?dev=7&x=%20");
        assert_eq!(encode_target("/a<b>"), "/a%3Cb%3E");
        assert_eq!(encode_target("/a`b"), "/a%60b");
        assert_eq!(encode_target("/上传"), "/%E4%B8%8A%E4%BC%A0");
    }

    #[test]
    fn keeps_raw_target_next_to_uri() {
        let mut reader = HttpStreamReader::new();
        reader.receive_chunk("POST /上传?a=<1> HTTP/1.1\r\n\r\n".as_bytes());
        let head = reader.try_build_request(false).unwrap().unwrap();
        assert_eq!(head.uri().path(), "/%E4%B8%8A%E4%BC%A0");
        assert_eq!(
            head.extensions().get::<RawTarget>().map(|t| t.0.as_str()),
            Some("/上传?a=<1>")
        );
    }

    #[test]
    fn accepts_many_headers() {
        let mut reader = HttpStreamReader::new();
        reader.receive_chunk(b"POST /uplink HTTP/1.1\r\n");
        for i in 0..90 {
            reader.receive_chunk(format!("X-Field-{}: {}\r\n", i, i).as_bytes());
        }
        reader.receive_chunk(b"Content-Length: 2\r\n\r\n{}");
        let head = reader.try_build_request(false).unwrap().unwrap();
        assert_eq!(head.headers().len(), 91);
        assert_eq!(&reader.read_buf[reader.headers_length..], b"{}");
    }

    #[test]
    fn rejects_garbage() {
        let mut reader = HttpStreamReader::new();
        reader.receive_chunk(b"\x00\x01\x02 not http\r\n\r\n");
        assert!(reader.try_build_request(false).is_err());
    }

    #[test]
    fn rejects_oversized_head() {
        let mut reader = HttpStreamReader::new();
        reader.receive_chunk(b"POST /uplink HTTP/1.1\r\n");
        let filler = format!("X-Filler: {}\r\n", "a".repeat(1024));
        for _ in 0..20 {
            reader.receive_chunk(filler.as_bytes());
        }
        match reader.try_build_request(false) {
            Err(Error(ErrorKind::RequestHeadTooLarge(_), _)) => {}
            other => panic!("expected RequestHeadTooLarge, got {:?}", other.map(|_| ())),
        }
    }
}
