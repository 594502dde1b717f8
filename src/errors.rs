error_chain! {
    foreign_links {
        Io(::std::io::Error);
        AddrParse(::std::net::AddrParseError);
        Http(::http::Error);
        HttpParse(::httparse::Error);
    }
    errors {
        BindFailed(addr: ::std::net::SocketAddr) {
            description("unable to bind listening socket")
            display("unable to bind listening socket on {}", addr)
        }
        InvalidConfig(key: String, value: String) {
            description("invalid configuration value")
            display("invalid value for {}: {:?}", key, value)
        }
        RequestHeadTooLarge(len: usize) {
            description("request head too large")
            display("request head exceeds the limit, {} bytes buffered without completing", len)
        }
    }
}
