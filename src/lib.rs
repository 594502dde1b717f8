/*!
## uplink_ack

Diagnostic HTTP listener for uplink clients. Every `POST` gets its body
printed and is answered with `200 {"code":0}`.

## Basic Example

```rust,no_run,edition2018
# extern crate uplink_ack;
# fn run() -> Result<(), Box<dyn ::std::error::Error>> {
let config = uplink_ack::Config::default();
uplink_ack::Server::bind(&config)?
    .tcp_nodelay(true)
    .start(uplink_ack::ack::handle)?;
# Ok(())
# }
# fn main() {}
```

Any other handler with the signature `Fn(Request) -> Response<Vec<u8>>`
can be served the same way.
*/

#![recursion_limit = "1024"]
#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;
extern crate http;
extern crate httparse;
extern crate mio;
extern crate slab;

pub mod ack;
pub mod config;
mod errors;
mod http_stream;

pub use http::header;
pub use http::method;
pub use http::status;
pub use http::uri;
pub use http::version;
use mio::net::{TcpListener, TcpStream};
use std::io::{self, Read, Write};
use std::net::SocketAddr;

pub use config::Config;
pub use errors::*;
use http_stream::HttpStreamReader;

/// Re-exported `http::Response` for constructing return responses in handlers
pub use http::Response;
use mio::event::Event;
use mio::{Interest, Token};

/// Token of the listening socket, connections use their slab key + 1
const LISTENER: Token = Token(0);

/// Internal `http::Response` wrapper with helpers for constructing the bytes
/// that needs to be written back a Stream
struct ResponseWrapper {
    inner: http::Response<Vec<u8>>,
    header_data: Vec<u8>,
}
impl ResponseWrapper {
    fn new(inner: http::Response<Vec<u8>>) -> Self {
        Self {
            inner,
            header_data: Vec::with_capacity(256),
        }
    }

    /// Every connection carries a single exchange, so the response always
    /// announces its length and that the connection is going away.
    fn serialize_headers(&mut self) {
        {
            let body_len = self.inner.body().len();
            let hdrs = self.inner.headers_mut();
            hdrs.insert(
                header::SERVER,
                header::HeaderValue::from_static("uplink-ack (rust)"),
            );
            hdrs.insert(header::CONTENT_LENGTH, header::HeaderValue::from(body_len));
            hdrs.insert(header::CONNECTION, header::HeaderValue::from_static("close"));
        }
        let status = self.inner.status();
        let s = format!(
            "HTTP/1.1 {} {}\r\n",
            status.as_str(),
            status.canonical_reason().unwrap_or("Unsupported Status")
        );
        self.header_data.extend_from_slice(s.as_bytes());

        for (key, value) in self.inner.headers().iter() {
            self.header_data.extend_from_slice(key.as_str().as_bytes());
            self.header_data.extend_from_slice(b": ");
            self.header_data.extend_from_slice(value.as_bytes());
            self.header_data.extend_from_slice(b"\r\n");
        }
        self.header_data.extend_from_slice(b"\r\n");
    }
}
impl std::ops::Deref for ResponseWrapper {
    type Target = http::Response<Vec<u8>>;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Represent everything about a request except its (possible) body
type RequestHead = http::Request<()>;

/// Request target exactly as it appeared on the request line, kept in the
/// request extensions since the `Uri` may carry a percent-encoded copy
#[derive(Debug, Clone)]
struct RawTarget(String);

/// `Request` received and used by handlers. Wraps & `deref`s to an `http::Request`
/// and patches `Request::body` to return the correct slice of bytes from the
/// `HttpStreamReader.read_buf`
pub struct Request {
    inner: http::Request<Vec<u8>>,
    body_start: usize,
}
impl Request {
    pub fn body(&self) -> &[u8] {
        &self.inner.body()[self.body_start..]
    }

    /// The request target as the client sent it
    pub fn target(&self) -> &str {
        match self.inner.extensions().get::<RawTarget>() {
            Some(raw) => &raw.0,
            None => self
                .inner
                .uri()
                .path_and_query()
                .map(|p| p.as_str())
                .unwrap_or("/"),
        }
    }
}
impl std::ops::Deref for Request {
    type Target = http::Request<Vec<u8>>;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
impl std::ops::DerefMut for Request {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

fn bad_request() -> Response<Vec<u8>> {
    let mut resp = Response::new(b"bad request".to_vec());
    *resp.status_mut() = status::StatusCode::BAD_REQUEST;
    resp
}

/// A single accepted client socket and the exchange happening on it
struct Connection {
    stream: TcpStream,
    reader: HttpStreamReader,
    response: Option<ResponseWrapper>,
    bytes_written: usize,
}
impl Connection {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            reader: HttpStreamReader::new(),
            response: None,
            bytes_written: 0,
        }
    }

    /// Drain the socket into the reader. Returns `true` once the peer
    /// will not send anything more.
    fn fill(&mut self, token: Token) -> bool {
        let mut buf = [0; 1024];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => break true,
                Ok(n) => {
                    self.reader.receive_chunk(&buf[..n]);
                    debug!("{:?} - Read {} bytes", token, n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break false,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => break true,
                Err(e) => {
                    error!(
                        "{:?} - Encountered error while reading from socket: {:?}",
                        token, e
                    );
                    break true;
                }
            }
        }
    }

    /// Write as much of the pending response as the socket takes.
    /// Returns `true` once there is nothing left to write.
    fn flush_response(&mut self, token: Token) -> bool {
        let resp = match self.response {
            Some(ref resp) => resp,
            None => return false,
        };
        let header_data_len = resp.header_data.len();
        let total_len = header_data_len + resp.body().len();
        loop {
            let (data, start) = if self.bytes_written < header_data_len {
                (&resp.header_data[..], self.bytes_written)
            } else if self.bytes_written < total_len {
                (&resp.body()[..], self.bytes_written - header_data_len)
            } else {
                debug!("{:?} - flushing", token);
                // the os finishes sending whatever is still buffered
                self.stream.flush().ok();
                return true;
            };
            match self.stream.write(&data[start..]) {
                Ok(0) => {
                    debug!("{:?} - Peer stopped accepting data", token);
                    return true;
                }
                Ok(n) => {
                    self.bytes_written += n;
                    debug!("{:?} - Wrote {} bytes", token, n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return false,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(
                        "{:?} - Encountered error while writing to socket: {:?}",
                        token, e
                    );
                    return true;
                }
            }
        }
    }

    /// Advance this connection on a readiness event. Returns `false` when
    /// the connection is finished and should be dropped.
    fn on_event<F>(&mut self, event: &Event, func: &F) -> bool
    where
        F: Fn(Request) -> Response<Vec<u8>>,
    {
        let token = event.token();
        if event.is_readable() && self.response.is_none() {
            let eof = self.fill(token);
            let resp = match self.reader.try_build_request(eof) {
                Ok(Some(head)) => {
                    debug!("Begin processing the response for token {:?}", token);
                    let (parts, _) = head.into_parts();
                    let body = std::mem::replace(&mut self.reader.read_buf, vec![]);
                    func(Request {
                        inner: http::Request::from_parts(parts, body),
                        body_start: self.reader.headers_length,
                    })
                }
                Ok(None) if eof => {
                    debug!("{:?} - Stream closed. Killing socket.", token);
                    return false;
                }
                Ok(None) => return true,
                Err(e) => {
                    error!("{:?} - Encountered error while parsing: {}", token, e);
                    bad_request()
                }
            };
            let mut resp = ResponseWrapper::new(resp);
            resp.serialize_headers();
            self.response = Some(resp);
        }
        if self.response.is_some() {
            return !self.flush_response(token);
        }
        !(event.is_read_closed() && event.is_write_closed())
    }
}

pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    server_name: String,
    no_delay: bool,
}
impl Server {
    /// Bind a new `Server` on `addr`, an `ip:port` literal.
    ///
    /// The address is never looked up, host names are rejected.
    pub fn new(addr: &str) -> Result<Self> {
        let addr: SocketAddr = addr.parse()?;
        Self::bind_addr(addr)
    }

    /// Bind a new `Server` on the address and port from `config`
    pub fn bind(config: &Config) -> Result<Self> {
        Self::bind_addr(config.socket_addr())
    }

    fn bind_addr(addr: SocketAddr) -> Result<Self> {
        let listener =
            std::net::TcpListener::bind(addr).chain_err(|| ErrorKind::BindFailed(addr))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener: TcpListener::from_std(listener),
            local_addr,
            server_name: config::server_name(&addr.ip()),
            no_delay: false,
        })
    }

    /// Address the listener actually bound, with the real port when `0` was asked for
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Name this server goes by, taken from the literal bind address.
    /// The wildcard address is reported as `localhost`.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Configure `tcp_nodelay` setting for each accepted socket.
    /// Default: `false`
    ///
    /// When set, the Nagle algorithm is disabled and the (tiny)
    /// acknowledgement goes out as soon as it is written.
    pub fn tcp_nodelay(&mut self, no_delay: bool) -> &mut Self {
        self.no_delay = no_delay;
        self
    }

    /// Start the server using the given handler function.
    ///
    /// Blocks forever, handling one request at a time. Only failures of the
    /// poll itself are returned, errors on a connection just drop it.
    pub fn start<F>(&mut self, func: F) -> Result<()>
    where
        F: 'static + Fn(Request) -> Response<Vec<u8>>,
    {
        let mut connections = slab::Slab::with_capacity(64);
        let mut poll = mio::Poll::new()?;
        poll.registry()
            .register(&mut self.listener, LISTENER, Interest::READABLE)?;

        info!(
            "** Listening on {} (server name: {}), press Ctrl+C to stop **",
            self.local_addr, self.server_name
        );

        let mut events = mio::Events::with_capacity(256);
        loop {
            if let Err(e) = poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }
            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept(&poll, &mut connections)?,
                    token => {
                        let key = token.0 - 1;
                        let open = match connections.get_mut(key) {
                            Some(conn) => conn.on_event(event, &func),
                            None => continue,
                        };
                        if !open {
                            debug!("{:?} - Done, killing socket", token);
                            let mut conn: Connection = connections.remove(key);
                            poll.registry().deregister(&mut conn.stream)?;
                        }
                    }
                }
            }
        }
    }

    /// Accept every pending connection and register it with `poll`
    fn accept(&self, poll: &mio::Poll, connections: &mut slab::Slab<Connection>) -> Result<()> {
        loop {
            match self.listener.accept() {
                Ok((mut stream, addr)) => {
                    debug!("opened socket to: {:?}", addr);
                    if self.no_delay {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("unable to set TCP_NODELAY for {:?}: {:?}", addr, e);
                        }
                    }
                    let entry = connections.vacant_entry();
                    let token = Token(entry.key() + 1);
                    poll.registry().register(
                        &mut stream,
                        token,
                        Interest::READABLE | Interest::WRITABLE,
                    )?;
                    entry.insert(Connection::new(stream));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Encountered error while accepting the connection: {:?}", e);
                    return Ok(());
                }
            }
        }
    }
}
