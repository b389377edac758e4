//! Local TLS endpoints for tests that must not depend on the internet.

#![allow(dead_code)]

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::ssl::{SslAcceptor, SslMethod};
use openssl::x509::{X509Builder, X509NameBuilder, X509};

pub const DAY: i64 = 86_400;

/// Self-signed certificate valid from `not_before` to `not_after` (unix seconds).
pub fn self_signed(not_before: i64, not_after: i64) -> (PKey<Private>, X509) {
    let rsa = Rsa::generate(2048).unwrap();
    let pkey = PKey::from_rsa(rsa).unwrap();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();

    let mut serial = BigNum::new().unwrap();
    serial.rand(128, MsbOption::MAYBE_ZERO, false).unwrap();
    let serial = serial.to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();

    let mut name_builder = X509NameBuilder::new().unwrap();
    name_builder.append_entry_by_text("O", "tlsbatch test").unwrap();
    name_builder.append_entry_by_text("CN", "localhost").unwrap();
    let name = name_builder.build();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();

    builder
        .set_not_before(&Asn1Time::from_unix(not_before).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::from_unix(not_after).unwrap())
        .unwrap();
    builder.set_pubkey(&pkey).unwrap();
    builder.sign(&pkey, MessageDigest::sha256()).unwrap();

    (pkey, builder.build())
}

/// TLS server on 127.0.0.1 presenting a certificate that expires at `not_after`.
///
/// Serves connections until the test process exits.
pub fn tls_server(not_after: DateTime<Utc>) -> u16 {
    let now = Utc::now().timestamp();
    let not_before = (now - 30 * DAY).min(not_after.timestamp() - DAY);
    let (pkey, cert) = self_signed(not_before, not_after.timestamp());

    let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
    acceptor.set_private_key(&pkey).unwrap();
    acceptor.set_certificate(&cert).unwrap();
    acceptor.check_private_key().unwrap();
    let acceptor = acceptor.build();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let acceptor = acceptor.clone();
            thread::spawn(move || {
                if let Ok(mut tls) = acceptor.accept(stream) {
                    let _ = tls.shutdown();
                }
            });
        }
    });
    port
}

/// TCP server that accepts and then never speaks, stalling any handshake.
pub fn silent_server(hold: Duration) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            thread::spawn(move || {
                thread::sleep(hold);
                drop(stream);
            });
        }
    });
    port
}

/// TCP server that opens a TLS handshake record and then feeds its body one
/// byte per `interval`, so every single read succeeds but the handshake
/// never completes.
pub fn trickle_server(interval: Duration) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for mut stream in listener.incoming().flatten() {
            thread::spawn(move || {
                // handshake record, TLS 1.2, 64 byte body
                if stream.write_all(&[0x16, 0x03, 0x03, 0x00, 0x40]).is_err() {
                    return;
                }
                for _ in 0..64 {
                    thread::sleep(interval);
                    if stream.write_all(&[0x02]).is_err() {
                        return;
                    }
                }
            });
        }
    });
    port
}

/// TCP server that hangs up as soon as a client connects.
pub fn hangup_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    });
    port
}

/// A port on 127.0.0.1 with nothing listening.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    // make sure the port is really closed before handing it out
    assert!(TcpStream::connect(("127.0.0.1", port)).is_err());
    port
}

pub fn days_from_now(days: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(Utc::now().timestamp() + days * DAY, 0).unwrap()
}
