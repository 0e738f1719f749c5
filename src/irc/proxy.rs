/// PROXY protocol v1 header (HAProxy text form).
///
/// `PROXY TCP4 <src> <dst> <sport> <dport>\r\n`, `TCP6` likewise, or
/// `PROXY UNKNOWN ...\r\n`. When enabled the header is mandatory and is read
/// before anything else on the socket, TLS included.
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Longest legal v1 header, terminator included.
pub const MAX_HEADER: usize = 107;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no PROXY header within {0:?}")]
    Timeout(Duration),
    #[error("PROXY header longer than {MAX_HEADER} bytes")]
    TooLong,
    #[error("malformed PROXY header: {0}")]
    Malformed(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Parse a complete header line (with `\r\n`).
///
/// `Ok(None)` for `UNKNOWN`: the socket's own address stays in effect.
pub fn parse_v1(header: &str) -> Result<Option<SocketAddr>, ProxyError> {
    let line = header
        .strip_suffix("\r\n")
        .ok_or(ProxyError::Malformed("missing CRLF"))?;
    let mut fields = line.split(' ');
    if fields.next() != Some("PROXY") {
        return Err(ProxyError::Malformed("missing PROXY signature"));
    }

    let family = fields.next();
    let want_v4 = match family {
        Some("UNKNOWN") => return Ok(None),
        Some("TCP4") => true,
        Some("TCP6") => false,
        _ => return Err(ProxyError::Malformed("unknown protocol family")),
    };

    let rest: Vec<&str> = fields.collect();
    let [src, dst, sport, dport] = rest[..] else {
        return Err(ProxyError::Malformed("wrong number of fields"));
    };
    let src: IpAddr = src
        .parse()
        .map_err(|_| ProxyError::Malformed("bad source address"))?;
    let dst: IpAddr = dst
        .parse()
        .map_err(|_| ProxyError::Malformed("bad destination address"))?;
    if src.is_ipv4() != want_v4 || dst.is_ipv4() != want_v4 {
        return Err(ProxyError::Malformed("address does not match family"));
    }
    let port: u16 = sport
        .parse()
        .map_err(|_| ProxyError::Malformed("bad source port"))?;
    dport
        .parse::<u16>()
        .map_err(|_| ProxyError::Malformed("bad destination port"))?;

    Ok(Some(SocketAddr::new(src, port)))
}

/// Read the header byte by byte so nothing after it is consumed.
async fn read_line<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String, ProxyError> {
    let mut buf = Vec::with_capacity(MAX_HEADER);
    while !buf.ends_with(b"\r\n") {
        if buf.len() == MAX_HEADER {
            return Err(ProxyError::TooLong);
        }
        buf.push(stream.read_u8().await?);
    }
    String::from_utf8(buf).map_err(|_| ProxyError::Malformed("not ASCII"))
}

/// Read and parse the header, giving up after `limit`.
pub async fn read_header<S: AsyncRead + Unpin>(
    stream: &mut S,
    limit: Duration,
) -> Result<Option<SocketAddr>, ProxyError> {
    let line = tokio::time::timeout(limit, read_line(stream))
        .await
        .map_err(|_| ProxyError::Timeout(limit))??;
    parse_v1(&line)
}
