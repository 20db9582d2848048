//! Discovery (component E, spec §4.5): a single-shot LAN broadcast,
//! independent of any [`crate::session::DeviceSession`].

use tokio::net::UdpSocket;
use tokio::time::{timeout, Duration};

use crate::error::Result;
use crate::udp::DeviceIdentity;
use crate::validate;

/// Default broadcast collection window.
pub const DEFAULT_TIMEOUT_MS: u64 = 3000;
/// Default hello string, identical to the UDP engine's default password.
pub const DEFAULT_PASSWORD: &str = "HF-A11ASSISTHREAD";

fn parse_reply(text: &str) -> Option<DeviceIdentity> {
    let mut parts = text.trim().splitn(3, ',');
    let ip = parts.next()?.parse().ok()?;
    let mac = parts.next()?.to_lowercase().replace('-', ":");
    let model = parts.next()?.to_string();
    Some(DeviceIdentity { ip, mac, model })
}

/// Broadcast `password` (or [`DEFAULT_PASSWORD`]) to `255.255.255.255:port`
/// and collect every non-echo reply until `timeout_ms` (or
/// [`DEFAULT_TIMEOUT_MS`]) elapses. Never errors on an empty result — the
/// returned list may simply be empty.
pub async fn discover(
    password: Option<&str>,
    port: u16,
    timeout_ms: Option<u64>,
) -> Result<Vec<DeviceIdentity>> {
    let password = password.unwrap_or(DEFAULT_PASSWORD);
    validate::udp_password(password)?;

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_broadcast(true)?;
    socket
        .send_to(password.as_bytes(), ("255.255.255.255", port))
        .await?;

    let duration = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
    let mut found = Vec::new();
    let collect = async {
        let mut buf = [0u8; 2048];
        loop {
            let Ok((n, _from)) = socket.recv_from(&mut buf).await else {
                break;
            };
            if &buf[..n] == password.as_bytes() {
                continue; // our own broadcast echo
            }
            if let Some(identity) = parse_reply(&String::from_utf8_lossy(&buf[..n])) {
                found.push(identity);
            }
        }
    };
    // Expiry is the normal way this loop ends; an error here is not ours.
    let _ = timeout(duration, collect).await;
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_reply() {
        let id = parse_reply("1.2.3.4,AA-BB-CC-DD-EE-FF,MODELX").unwrap();
        assert_eq!(id.ip.to_string(), "1.2.3.4");
        assert_eq!(id.mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(id.model, "MODELX");
    }

    #[test]
    fn rejects_malformed_reply() {
        assert!(parse_reply("not a reply").is_none());
        assert!(parse_reply("1.2.3.4").is_none());
    }
}
