//! Socket helpers: listener setup and peer name lookup.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::ffi::CStr;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::debug;

/// Size of the host buffer handed to `getnameinfo` (glibc's NI_MAXHOST).
const HOST_BUF_LEN: usize = 1025;

/// Resolved identity of the other end of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerName {
    pub address: IpAddr,
    pub host: String,
}

impl PeerName {
    /// Name a peer by its address only.
    pub fn numeric(address: IpAddr) -> Self {
        Self {
            address,
            host: address.to_string(),
        }
    }

    /// Look up the host name of `address`, falling back to the textual
    /// address when the lookup fails or `resolve` is off.
    pub async fn lookup(address: IpAddr, resolve: bool) -> Self {
        if !resolve {
            return Self::numeric(address);
        }

        match tokio::task::spawn_blocking(move || reverse_lookup(address)).await {
            Ok(Ok(host)) => Self { address, host },
            Ok(Err(e)) => {
                debug!(%address, error = %e, "Reverse lookup failed");
                Self::numeric(address)
            }
            Err(e) => {
                debug!(%address, error = %e, "Reverse lookup task failed");
                Self::numeric(address)
            }
        }
    }
}

impl fmt::Display for PeerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.host)
    }
}

/// Bind a TCP listener on `listen` with the given accept backlog.
///
/// `listen` may name a host; each resolved address is tried in turn.
pub async fn bind(listen: &str, backlog: u32) -> io::Result<TcpListener> {
    let mut last_err = None;

    for addr in tokio::net::lookup_host(listen).await? {
        match create_listener(addr, backlog) {
            Ok(listener) => return TcpListener::from_std(listener),
            Err(e) => {
                debug!(%addr, error = %e, "Bind attempt failed");
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("'{listen}' did not resolve to any address"),
        )
    }))
}

/// Create a non-blocking listening socket with an explicit backlog.
fn create_listener(addr: SocketAddr, backlog: u32) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;

    Ok(socket.into())
}

/// Await `op`, failing with `TimedOut` if `limit` elapses first.
///
/// `None` waits forever.
pub async fn with_timeout<T, F>(limit: Option<Duration>, op: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, op).await.map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("timed out after {}ms", limit.as_millis()),
            )
        })?,
        None => op.await,
    }
}

/// Blocking reverse DNS lookup of `address`.
fn reverse_lookup(address: IpAddr) -> io::Result<String> {
    let sockaddr = SockAddr::from(SocketAddr::new(address, 0));
    let mut host = [0 as libc::c_char; HOST_BUF_LEN];

    // SAFETY: `sockaddr` is a valid socket address of the reported length and
    // `host` is a writable buffer of the length passed in.
    let rc = unsafe {
        libc::getnameinfo(
            sockaddr.as_ptr() as *const libc::sockaddr,
            sockaddr.len() as libc::socklen_t,
            host.as_mut_ptr(),
            HOST_BUF_LEN as libc::socklen_t,
            std::ptr::null_mut(),
            0,
            libc::NI_NAMEREQD,
        )
    };

    if rc == libc::EAI_SYSTEM {
        return Err(io::Error::last_os_error());
    }
    if rc != 0 {
        // SAFETY: gai_strerror returns a pointer to a static NUL-terminated string.
        let reason = unsafe { CStr::from_ptr(libc::gai_strerror(rc)) };
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            reason.to_string_lossy().into_owned(),
        ));
    }

    // SAFETY: on success getnameinfo wrote a NUL-terminated string into `host`.
    let name = unsafe { CStr::from_ptr(host.as_ptr()) };
    Ok(name.to_string_lossy().into_owned())
}
