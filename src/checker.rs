//! Single-host certificate probe.
//!
//! [`Checker::check`] normalizes a task into a URL, dials it, completes a TLS
//! handshake and inspects the leaf certificate's notAfter. Every failure is
//! folded into the returned [`CheckResult`]; nothing here can fail a run.
//!
//! Peer verification is disabled on the TLS context: expired, self-signed and
//! mismatched certificates all complete the handshake so their expiry can be
//! read. See the crate-level docs on what `OK` does and does not mean.

use std::borrow::Cow;
use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::debug;
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::error::ErrorStack;
use openssl::ssl::{Ssl, SslContext, SslMethod, SslVerifyMode};
use url::{Host, Url};

use crate::error::CheckError;
use crate::{CheckResult, CheckStatus, CheckTask};

const DEFAULT_SCHEME: &str = "https://";

/// Port used when the task does not name one.
pub const DEFAULT_PORT: u16 = 443;

/// Reusable probe sharing one TLS context across all checks of a run.
pub struct Checker {
    context: SslContext,
}

impl Checker {
    /// Builds the shared TLS client context with peer verification off.
    pub fn new() -> Result<Checker, ErrorStack> {
        let mut context = SslContext::builder(SslMethod::tls())?;
        context.set_verify(SslVerifyMode::NONE);
        Ok(Checker {
            context: context.build(),
        })
    }

    /// Checks one task, giving up on network I/O once `deadline` passes.
    ///
    /// ```no_run
    /// # use std::time::{Duration, Instant};
    /// # use tlsbatch::{Checker, CheckTask};
    /// let checker = Checker::new().unwrap();
    /// let task = CheckTask::new("github.com").unwrap();
    /// let result = checker.check(&task, Instant::now() + Duration::from_secs(5));
    /// println!("{} {}", result.status, result.validity_expire_rfc3339());
    /// ```
    pub fn check(&self, task: &CheckTask, deadline: Instant) -> CheckResult {
        let url = task.as_str().to_string();
        let target = match Target::parse(task.as_str()) {
            Ok(target) => target,
            Err(err) => return report(url, String::new(), None, Err(err), None),
        };
        if target.hostname.is_empty() {
            return report(
                url,
                target.hostname,
                Some(target.port),
                Err(CheckError::HostNotSet),
                None,
            );
        }

        let (outcome, expire) = match self.leaf_not_after(&target, deadline) {
            Ok(not_after) if not_after < Utc::now() => {
                (Err(CheckError::ValidityExpired), Some(not_after))
            }
            Ok(not_after) => (Ok(()), Some(not_after)),
            Err(err) => (Err(err), None),
        };
        report(url, target.hostname, Some(target.port), outcome, expire)
    }

    fn leaf_not_after(
        &self,
        target: &Target,
        deadline: Instant,
    ) -> Result<DateTime<Utc>, CheckError> {
        let stream = DeadlineStream {
            inner: dial(target, deadline)?,
            deadline,
        };

        let mut ssl = Ssl::new(&self.context)?;
        if target.sni {
            ssl.set_hostname(&target.hostname)?;
        }
        let stream = ssl.connect(stream)?;

        let leaf = stream
            .ssl()
            .peer_certificate()
            .ok_or(CheckError::CertNotFound)?;
        asn1_to_utc(leaf.not_after())
    }
}

fn report(
    url: String,
    hostname: String,
    port: Option<u16>,
    outcome: Result<(), CheckError>,
    validity_expire: Option<DateTime<Utc>>,
) -> CheckResult {
    let (status, description) = match outcome {
        Ok(()) => (CheckStatus::Ok, String::new()),
        Err(err) => (CheckStatus::Bad, err.to_string()),
    };
    CheckResult {
        url,
        hostname,
        port,
        status,
        description,
        validity_expire,
    }
}

/// Host and port a task resolves to.
#[derive(Debug, PartialEq, Eq)]
struct Target {
    hostname: String,
    port: u16,
    /// Only DNS names go into the SNI extension
    sni: bool,
}

impl Target {
    fn parse(raw: &str) -> Result<Target, CheckError> {
        let normalized = if raw.contains("://") {
            Cow::Borrowed(raw)
        } else {
            Cow::Owned(format!("{}{}", DEFAULT_SCHEME, raw))
        };
        let parsed = match Url::parse(&normalized) {
            Ok(parsed) => parsed,
            // "https://" and "https://:8443" carry no host at all
            Err(url::ParseError::EmptyHost) => {
                return Ok(Target {
                    hostname: String::new(),
                    port: explicit_port(&normalized).unwrap_or(DEFAULT_PORT),
                    sni: false,
                })
            }
            Err(err) => return Err(err.into()),
        };

        let (hostname, sni) = match parsed.host() {
            Some(Host::Domain(domain)) => (domain.to_string(), true),
            Some(Host::Ipv4(addr)) => (addr.to_string(), false),
            Some(Host::Ipv6(addr)) => (addr.to_string(), false),
            None => (String::new(), false),
        };
        // Url::port() hides a port equal to the scheme default, e.g. http://host:80
        let port = parsed
            .port()
            .or_else(|| explicit_port(&normalized))
            .unwrap_or(DEFAULT_PORT);

        Ok(Target {
            hostname,
            port,
            sni,
        })
    }

    fn address(&self) -> String {
        if self.hostname.contains(':') {
            format!("[{}]:{}", self.hostname, self.port)
        } else {
            format!("{}:{}", self.hostname, self.port)
        }
    }
}

fn explicit_port(url: &str) -> Option<u16> {
    let rest = &url[url.find("://")? + 3..];
    let authority = rest.split(['/', '?', '#']).next()?;
    let host_port = authority.rsplit('@').next()?;
    let port = match host_port.rfind(']') {
        Some(end) => host_port[end + 1..].strip_prefix(':')?,
        None => host_port.rsplit_once(':')?.1,
    };
    port.parse().ok()
}

fn dial(target: &Target, deadline: Instant) -> Result<TcpStream, CheckError> {
    let dial_error = |source: io::Error| CheckError::Dial {
        address: target.address(),
        source,
    };

    let addresses = resolve(target, deadline).map_err(dial_error)?;

    let mut last_error = io::Error::new(io::ErrorKind::NotFound, "no addresses resolved");
    for address in addresses {
        let timeout = remaining(deadline).ok_or_else(|| dial_error(deadline_exceeded()))?;
        match TcpStream::connect_timeout(&address, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                debug!("Connect to {} failed: {}", address, err);
                last_error = err;
            }
        }
    }
    Err(dial_error(last_error))
}

/// Resolves the target on a helper thread so a stuck resolver cannot hold the
/// worker past its deadline. A lookup that overruns is abandoned; its thread
/// exits once the system resolver gives up.
fn resolve(target: &Target, deadline: Instant) -> io::Result<Vec<SocketAddr>> {
    if let Ok(ip) = target.hostname.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, target.port)]);
    }
    let timeout = remaining(deadline).ok_or_else(deadline_exceeded)?;

    let (tx, rx) = mpsc::channel();
    let host = (target.hostname.clone(), target.port);
    thread::Builder::new()
        .name("resolver".to_string())
        .spawn(move || {
            let resolved: io::Result<Vec<SocketAddr>> =
                host.to_socket_addrs().map(Iterator::collect);
            let _ = tx.send(resolved);
        })?;
    match rx.recv_timeout(timeout) {
        Ok(resolved) => resolved,
        Err(_) => Err(deadline_exceeded()),
    }
}

/// TCP stream that re-arms its socket timeouts from a fixed deadline before
/// every read and write, so a peer trickling bytes cannot stretch the
/// handshake past it.
#[derive(Debug)]
struct DeadlineStream {
    inner: TcpStream,
    deadline: Instant,
}

impl Read for DeadlineStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let left = remaining(self.deadline).ok_or_else(deadline_exceeded)?;
        self.inner.set_read_timeout(Some(left))?;
        self.inner.read(buf)
    }
}

impl Write for DeadlineStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let left = remaining(self.deadline).ok_or_else(deadline_exceeded)?;
        self.inner.set_write_timeout(Some(left))?;
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn remaining(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|left| !left.is_zero())
}

fn deadline_exceeded() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "deadline exceeded")
}

fn asn1_to_utc(time: &Asn1TimeRef) -> Result<DateTime<Utc>, CheckError> {
    let unreadable = |reason: String| CheckError::CertificateTime { reason };
    let epoch = Asn1Time::from_unix(0).map_err(|e| unreadable(e.to_string()))?;
    let diff = epoch.diff(time).map_err(|e| unreadable(e.to_string()))?;
    let secs = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::from_timestamp(secs, 0).ok_or_else(|| unreadable(time.to_string()))
}
