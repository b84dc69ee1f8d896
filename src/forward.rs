//! Races candidate servers, and within each server races every resolved
//! address/transport combination, to find a KDC (or kpasswd server) that
//! answers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use crate::resolver::working::WorkingServerMap;
use crate::server_uri::{ServerUri, Transport};

#[derive(Debug, Error)]
pub enum Error {
    #[error("no servers configured or discovered for this realm")]
    NoServers,
    #[error("all candidate servers failed to answer")]
    AllServersFailed,
}

/// Per-address budget before trying the next candidate address.
const ADDRESS_TIMEOUT: Duration = Duration::from_secs(2);
/// Extra time granted to a TCP attempt once it has connected (the
/// "writable" event), to send the request and read the reply.
const TCP_REPLY_EXTENSION: Duration = Duration::from_secs(10);
/// Final grace period, after every address has been tried once, for any
/// attempt still in flight.
const SENTINEL_TIMEOUT: Duration = Duration::from_secs(15);

const MAX_REQUEST_SIZE: usize = 128 * 1024;

#[derive(Clone, Copy)]
struct Attempt {
    addr: SocketAddr,
    transport: Transport,
}

/// Tries every candidate server in order, returning the first reply. On
/// success the working-server memo is updated; on total failure every
/// attempted server is marked broken.
pub async fn forward(request: &[u8], candidates: &[ServerUri], working: &WorkingServerMap, realm: &str) -> Result<Vec<u8>, Error> {
    if candidates.is_empty() {
        return Err(Error::NoServers);
    }

    for server in candidates {
        match try_server(request, server).await {
            Some(reply) => {
                working.mark_working(realm, server);
                return Ok(reply);
            }
            None => working.mark_broken(realm, server),
        }
    }

    Err(Error::AllServersFailed)
}

async fn try_server(request: &[u8], server: &ServerUri) -> Option<Vec<u8>> {
    let addrs = match tokio::net::lookup_host((server.host(), server.port())).await {
        Ok(addrs) => addrs.collect::<Vec<_>>(),
        Err(err) => {
            tracing::debug!(server = %server, error = %err, "name resolution failed");
            return None;
        }
    };

    race_addrs(&addrs, server, request).await
}

/// Races every resolved address/transport combination for one server.
/// UDP sockets opened for earlier addresses are kept alive and re-sent to
/// every time a new address attempt starts, mirroring the original
/// proxy's `rsocks`-to-`wsocks` requeue on each `select()` iteration: a
/// UDP server that's merely slow to answer keeps getting retransmissions
/// instead of being abandoned the moment a later address is tried.
async fn race_addrs(addrs: &[SocketAddr], server: &ServerUri, request: &[u8]) -> Option<Vec<u8>> {
    let attempts = build_attempts(addrs, server);
    if attempts.is_empty() {
        return None;
    }

    let (tx, mut rx) = tokio::sync::mpsc::channel::<Option<Vec<u8>>>(attempts.len());
    let mut handles = Vec::with_capacity(attempts.len());
    let mut udp_sockets: Vec<Arc<UdpSocket>> = Vec::new();

    for attempt in attempts {
        resend_udp(&udp_sockets, request).await;

        match attempt.transport {
            Transport::Udp => {
                if let Some(socket) = open_and_send_udp(attempt.addr, request).await {
                    let socket = Arc::new(socket);
                    let recv_socket = socket.clone();
                    let tx = tx.clone();
                    handles.push(tokio::spawn(async move {
                        let outcome = recv_udp_reply(recv_socket).await;
                        let _ = tx.send(outcome).await;
                    }));
                    udp_sockets.push(socket);
                }
            }
            Transport::Tcp | Transport::Any => {
                let tx = tx.clone();
                let request = request.to_vec();
                handles.push(tokio::spawn(async move {
                    let outcome = run_tcp_attempt(attempt.addr, &request).await;
                    let _ = tx.send(outcome).await;
                }));
            }
        }

        tokio::select! {
            biased;
            Some(outcome) = rx.recv() => {
                if let Some(reply) = outcome {
                    abort_all(&handles);
                    return Some(reply);
                }
            }
            () = tokio::time::sleep(ADDRESS_TIMEOUT) => {}
        }
    }
    drop(tx);

    let sentinel = tokio::time::sleep(SENTINEL_TIMEOUT);
    tokio::pin!(sentinel);
    loop {
        tokio::select! {
            biased;
            maybe = rx.recv() => match maybe {
                Some(Some(reply)) => {
                    abort_all(&handles);
                    return Some(reply);
                }
                Some(None) => continue,
                None => break,
            },
            () = &mut sentinel => break,
        }
    }

    abort_all(&handles);
    None
}

fn abort_all(handles: &[tokio::task::JoinHandle<()>]) {
    for handle in handles {
        handle.abort();
    }
}

/// Expands resolved addresses into transport attempts, TCP before UDP, and
/// skips transports the server URI's scheme didn't pin.
fn build_attempts(addrs: &[SocketAddr], server: &ServerUri) -> Vec<Attempt> {
    let mut tcp = Vec::new();
    let mut udp = Vec::new();

    for &addr in addrs {
        if server.allows_tcp() {
            tcp.push(Attempt { addr, transport: Transport::Tcp });
        }
        if server.allows_udp() {
            udp.push(Attempt { addr, transport: Transport::Udp });
        }
    }

    tcp.extend(udp);
    tcp
}

async fn run_tcp_attempt(addr: SocketAddr, request: &[u8]) -> Option<Vec<u8>> {
    let connect = tokio::time::timeout(ADDRESS_TIMEOUT, TcpStream::connect(addr)).await;
    let mut stream = match connect {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            tracing::debug!(%addr, error = %err, "TCP connect failed");
            return None;
        }
        Err(_) => return None,
    };

    let exchange = async {
        stream.write_all(request).await.ok()?;
        read_tcp_reply(&mut stream).await
    };

    tokio::time::timeout(TCP_REPLY_EXTENSION, exchange).await.ok().flatten()
}

/// Binds, connects and sends the initial datagram for a new UDP address
/// attempt. The caller keeps the returned socket open so later address
/// attempts can re-send the same request on it.
async fn open_and_send_udp(addr: SocketAddr, request: &[u8]) -> Option<UdpSocket> {
    let bind_addr: SocketAddr = if addr.is_ipv6() { "[::]:0".parse().unwrap() } else { "0.0.0.0:0".parse().unwrap() };

    let socket = UdpSocket::bind(bind_addr).await.ok()?;
    socket.connect(addr).await.ok()?;

    // UDP carries the raw Kerberos message; the 4-byte length prefix is an
    // artifact of the proxy envelope and TCP framing only.
    let payload = request.get(4..)?;
    socket.send(payload).await.ok()?;
    Some(socket)
}

/// Re-sends the request on every still-open UDP socket from earlier
/// address attempts. Per-socket failures are logged and otherwise
/// ignored; a dead socket's own receive task will simply never complete.
async fn resend_udp(sockets: &[Arc<UdpSocket>], request: &[u8]) {
    let Some(payload) = request.get(4..) else {
        return;
    };
    for socket in sockets {
        if let Err(err) = socket.send(payload).await {
            tracing::debug!(error = %err, "UDP resend failed");
        }
    }
}

/// Waits for a reply on an already-sent UDP socket. No internal timeout:
/// the caller aborts this task once the overall per-server budget
/// ([`SENTINEL_TIMEOUT`]) elapses or another attempt answers first.
async fn recv_udp_reply(socket: Arc<UdpSocket>) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; MAX_REQUEST_SIZE];
    let n = socket.recv(&mut buf).await.ok()?;

    let mut framed = Vec::with_capacity(n + 4);
    framed.extend_from_slice(&(n as u32).to_be_bytes());
    framed.extend_from_slice(&buf[..n]);
    Some(framed)
}

/// Reads a length-prefixed TCP reply, taking the fast path when a single
/// read yields the whole frame and otherwise reassembling across reads.
/// Rejects a declared length over the maximum request size, or a payload
/// that overruns it, as a fatal framing error.
async fn read_tcp_reply(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];

    loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return if buf.is_empty() { None } else { Some(buf) };
        }

        buf.extend_from_slice(&chunk[..n]);

        if buf.len() >= 4 {
            let declared = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
            if declared > MAX_REQUEST_SIZE {
                return None;
            }
            if buf.len() == declared + 4 {
                return Some(buf);
            }
            if buf.len() > declared + 4 {
                return None;
            }
        }
    }
}
