//! UDP Session Engine (component B, spec §4.2): the command-mode handshake,
//! the AT request/response catalog, and the WiFi-scan multi-line reader.
//!
//! The whole handshake-to-ack cycle for a single exchange runs under one
//! `tokio::sync::Mutex` lock, which is what gives the "at most one AT
//! exchange in flight" rule (spec §5) for free — a second caller's
//! `run_command` simply waits for the lock.

use std::net::{IpAddr, SocketAddr};

use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::error::{hello_from_unexpected_host, Result, UfoError};
use crate::validate::{ClientAuth, ClientEncryption};
use crate::wire::{decode_at_response, AtRequest, AtResponse};

/// Build the literal `AT+WSKEY=...` argument list for a validated
/// `(auth, encryption, passphrase)` triple. Kept separate from
/// [`UdpEngine::set_wifi_client_auth`] so the exact wire strings — including
/// the `WEP-H`/`WEP-A` hyphen `{:?}` formatting would otherwise drop — can be
/// tested without a socket.
fn client_auth_wire_args(auth: ClientAuth, encryption: ClientEncryption, passphrase: Option<&str>) -> Vec<String> {
    let mut args = vec![auth.wire_str().to_string(), encryption.wire_str().to_string()];
    if let Some(p) = passphrase {
        args.push(p.to_string());
    }
    args
}

const RECV_BUF_LEN: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UdpState {
    Idle,
    HelloSent,
    CommandMode,
    Closing,
}

/// `(ip, mac, model)` as established by the hello exchange (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceIdentity {
    pub ip: IpAddr,
    pub mac: String,
    pub model: String,
}

fn parse_identity(reply: &str, configured_host: IpAddr) -> Result<DeviceIdentity> {
    let mut parts = reply.trim().splitn(3, ',');
    let ip_str = parts
        .next()
        .ok_or_else(|| UfoError::protocol("hello reply missing ip field"))?;
    let mac = parts
        .next()
        .ok_or_else(|| UfoError::protocol("hello reply missing mac field"))?;
    let model = parts
        .next()
        .ok_or_else(|| UfoError::protocol("hello reply missing model field"))?;

    let ip: IpAddr = ip_str
        .parse()
        .map_err(|_| UfoError::protocol(format!("hello reply ip {ip_str:?} is not valid")))?;

    let unspecified = ip.is_unspecified();
    if ip != configured_host && !unspecified {
        return Err(hello_from_unexpected_host(configured_host, ip));
    }

    Ok(DeviceIdentity {
        ip,
        mac: mac.to_lowercase().replace('-', ":"),
        model: model.to_string(),
    })
}

struct Inner {
    state: UdpState,
    password: String,
    /// Set once the sibling TCP engine hit a fatal fault and the device
    /// session killed this side along with it (spec §4.4/§7); distinct from
    /// `state` which only tracks the handshake's own transient phases.
    dead: Option<String>,
}

/// Owns a single bound UDP endpoint for AT-command exchanges with one host.
pub struct UdpEngine {
    socket: UdpSocket,
    host: IpAddr,
    remote_port: u16,
    inner: Mutex<Inner>,
}

impl UdpEngine {
    /// Bind (on `local_addr`, or any free port if `None`) and sit in `Idle`.
    pub async fn connect(
        host: IpAddr,
        remote_port: u16,
        local_addr: Option<SocketAddr>,
        password: String,
    ) -> Result<Self> {
        let bind_addr = local_addr.unwrap_or_else(|| match host {
            IpAddr::V4(_) => "0.0.0.0:0".parse().unwrap(),
            IpAddr::V6(_) => "[::]:0".parse().unwrap(),
        });
        let socket = UdpSocket::bind(bind_addr).await?;
        Ok(Self {
            socket,
            host,
            remote_port,
            inner: Mutex::new(Inner {
                state: UdpState::Idle,
                password,
                dead: None,
            }),
        })
    }

    /// True once this engine has been forced dead, either by its own fault
    /// or by the device session killing it after the TCP sibling died.
    pub async fn is_dead(&self) -> bool {
        self.inner.lock().await.dead.is_some()
    }

    /// Force this engine into a permanently dead state. A no-op if already
    /// dead, so the original reason is never overwritten.
    pub async fn kill(&self, reason: String) {
        let mut inner = self.inner.lock().await;
        if inner.dead.is_none() {
            inner.dead = Some(reason);
            inner.state = UdpState::Closing;
        }
    }

    fn remote(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.remote_port)
    }

    async fn send_literal(&self, text: &str) -> Result<()> {
        self.socket.send_to(text.as_bytes(), self.remote()).await?;
        Ok(())
    }

    async fn recv_text(&self) -> Result<String> {
        let mut buf = [0u8; RECV_BUF_LEN];
        let (n, _from) = self.socket.recv_from(&mut buf).await?;
        Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
    }

    /// Idle -> HelloSent -> CommandMode. Must be called with `inner` locked.
    async fn enter_command_mode(&self, inner: &mut Inner) -> Result<DeviceIdentity> {
        if let Some(reason) = &inner.dead {
            return Err(UfoError::protocol(format!("udp engine is dead: {reason}")));
        }
        self.send_literal(&inner.password).await?;
        inner.state = UdpState::HelloSent;

        let reply = self.recv_text().await?;
        let identity = parse_identity(&reply, self.host)?;

        self.send_literal("+ok").await?;
        inner.state = UdpState::CommandMode;
        Ok(identity)
    }

    async fn leave_command_mode(&self, inner: &mut Inner) -> Result<()> {
        self.send_literal("AT+Q\r").await?;
        inner.state = UdpState::Idle;
        Ok(())
    }

    /// `command_mode()`: establish the handshake and return the
    /// device's self-reported identity, per spec §4.2.
    pub async fn command_mode(&self) -> Result<DeviceIdentity> {
        let mut inner = self.inner.lock().await;
        self.enter_command_mode(&mut inner).await
    }

    /// `end_command()`: return to Idle.
    pub async fn end_command(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.leave_command_mode(&mut inner).await
    }

    /// Run one full `command_mode -> send -> recv -> end_command` cycle for
    /// a single AT request (spec §4.2). Holding `inner` for the whole
    /// exchange enforces the one-in-flight rule.
    pub async fn run_command(&self, request: AtRequest) -> Result<AtResponse> {
        let mut inner = self.inner.lock().await;
        self.enter_command_mode(&mut inner).await?;
        self.send_literal(&request.encode()).await?;
        let raw = self.recv_text().await?;
        self.leave_command_mode(&mut inner).await?;
        decode_at_response(&raw)
    }

    fn get(&self, cmd: &str) -> AtRequest {
        AtRequest::get(cmd)
    }

    fn set(&self, cmd: &str, args: Vec<String>) -> AtRequest {
        AtRequest::set(cmd, args)
    }

    pub async fn module_version(&self) -> Result<AtResponse> {
        self.run_command(self.get("VER")).await
    }

    pub async fn ntp_server(&self) -> Result<AtResponse> {
        self.run_command(self.get("NTPSER")).await
    }

    pub async fn set_ntp_server(&self, ip: &str) -> Result<AtResponse> {
        crate::validate::ipv4("ntp server", ip)?;
        self.run_command(self.set("NTPSER", vec![ip.to_string()])).await
    }

    pub async fn udp_password(&self) -> Result<AtResponse> {
        self.run_command(self.get("ASWD")).await
    }

    /// Setting the password also updates the value this engine sends on
    /// subsequent hello handshakes.
    pub async fn set_udp_password(&self, password: &str) -> Result<AtResponse> {
        crate::validate::udp_password(password)?;
        let mut inner = self.inner.lock().await;
        self.enter_command_mode(&mut inner).await?;
        self.send_literal(&AtRequest::set("ASWD", vec![password.to_string()]).encode())
            .await?;
        let raw = self.recv_text().await?;
        self.leave_command_mode(&mut inner).await?;
        inner.password = password.to_string();
        decode_at_response(&raw)
    }

    pub async fn tcp_server(&self) -> Result<AtResponse> {
        self.run_command(self.get("NETP")).await
    }

    /// `protocol, role, port, ip`; changing the port is terminal for the
    /// session (spec §4.2) — the Device Session tears down after a
    /// successful set.
    pub async fn set_tcp_server(
        &self,
        protocol: &str,
        role: &str,
        port: u16,
        ip: &str,
    ) -> Result<AtResponse> {
        crate::validate::ipv4("tcp server ip", ip)?;
        self.run_command(self.set(
            "NETP",
            vec![protocol.to_string(), role.to_string(), port.to_string(), ip.to_string()],
        ))
        .await
    }

    pub async fn wifi_auto_switch(&self) -> Result<AtResponse> {
        self.run_command(self.get("MDCH")).await
    }

    pub async fn set_wifi_auto_switch(&self, value: &str) -> Result<AtResponse> {
        self.run_command(self.set("MDCH", vec![value.to_string()])).await
    }

    pub async fn wifi_mode(&self) -> Result<AtResponse> {
        self.run_command(self.get("WMODE")).await
    }

    pub async fn set_wifi_mode(&self, mode: &str) -> Result<AtResponse> {
        self.run_command(self.set("WMODE", vec![mode.to_string()])).await
    }

    /// `AT+WSCAN\r`: the only multi-line response in the catalog. Ignores
    /// the header line, accumulates comma-list lines, stops at `\r\n\r\n`.
    pub async fn wifi_scan(&self) -> Result<Vec<Vec<String>>> {
        let mut inner = self.inner.lock().await;
        self.enter_command_mode(&mut inner).await?;
        self.send_literal(&AtRequest::get("WSCAN").encode()).await?;

        let mut accumulated = String::new();
        loop {
            accumulated.push_str(&self.recv_text().await?);
            if accumulated.ends_with("\r\n\r\n") {
                break;
            }
        }
        self.leave_command_mode(&mut inner).await?;

        let mut lines: Vec<&str> = accumulated.trim_end_matches("\r\n\r\n").lines().collect();
        if !lines.is_empty() {
            lines.remove(0); // header/column-names line
        }
        Ok(lines
            .into_iter()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.split(',').map(|s| s.trim().to_string()).collect())
            .collect())
    }

    pub async fn wifi_ap_ip(&self) -> Result<AtResponse> {
        self.run_command(self.get("LANN")).await
    }

    pub async fn set_wifi_ap_ip(&self, ip: &str, mask: &str) -> Result<AtResponse> {
        crate::validate::ipv4("ap ip", ip)?;
        crate::validate::ipv4("ap mask", mask)?;
        self.run_command(self.set("LANN", vec![ip.to_string(), mask.to_string()])).await
    }

    pub async fn wifi_ap_broadcast(&self) -> Result<AtResponse> {
        self.run_command(self.get("WAP")).await
    }

    pub async fn set_wifi_ap_broadcast(&self, band: &str, ssid: &str, channel: i32) -> Result<AtResponse> {
        crate::validate::ssid(ssid)?;
        let channel = crate::validate::ap_channel(channel);
        self.run_command(self.set(
            "WAP",
            vec![band.to_string(), ssid.to_string(), format!("CH{channel}")],
        ))
        .await
    }

    pub async fn wifi_ap_auth(&self) -> Result<AtResponse> {
        self.run_command(self.get("WAKEY")).await
    }

    pub async fn set_wifi_ap_auth(&self, passphrase: Option<&str>) -> Result<AtResponse> {
        let args = match crate::validate::ap_passphrase(passphrase)? {
            None => vec!["OPEN".to_string(), "NONE".to_string()],
            Some(p) => vec!["WPA2PSK".to_string(), "AES".to_string(), p.to_string()],
        };
        self.run_command(self.set("WAKEY", args)).await
    }

    pub async fn wifi_ap_led(&self) -> Result<AtResponse> {
        self.run_command(self.get("WALKIND")).await
    }

    pub async fn set_wifi_ap_led(&self, on: bool) -> Result<AtResponse> {
        self.run_command(self.set("WALKIND", vec![if on { "on" } else { "off" }.to_string()]))
            .await
    }

    pub async fn wifi_ap_dhcp(&self) -> Result<AtResponse> {
        self.run_command(self.get("WADHCP")).await
    }

    /// `start`/`end` are sent as the two distinct values provided — a
    /// previously conflated revision of this call was a bug, not intended
    /// behavior (spec §9).
    pub async fn set_wifi_ap_dhcp(&self, start: i32, end: i32) -> Result<AtResponse> {
        let start = crate::validate::dhcp_octet(start);
        let end = crate::validate::dhcp_octet(end);
        self.run_command(self.set("WADHCP", vec!["on".to_string(), start.to_string(), end.to_string()]))
            .await
    }

    pub async fn disable_wifi_ap_dhcp(&self) -> Result<AtResponse> {
        self.run_command(self.set("WADHCP", vec!["off".to_string()])).await
    }

    pub async fn wifi_client_ap_info(&self) -> Result<AtResponse> {
        self.run_command(self.get("WSLK")).await
    }

    pub async fn wifi_client_ap_signal(&self) -> Result<AtResponse> {
        self.run_command(self.get("WSLQ")).await
    }

    pub async fn wifi_client_ip(&self) -> Result<AtResponse> {
        self.run_command(self.get("WANN")).await
    }

    pub async fn set_wifi_client_ip_dhcp(&self) -> Result<AtResponse> {
        self.run_command(self.set("WANN", vec!["DHCP".to_string()])).await
    }

    pub async fn set_wifi_client_ip_static(&self, ip: &str, mask: &str, gateway: &str) -> Result<AtResponse> {
        crate::validate::ipv4("client ip", ip)?;
        crate::validate::ipv4("client mask", mask)?;
        crate::validate::ipv4("client gateway", gateway)?;
        self.run_command(self.set(
            "WANN",
            vec!["static".to_string(), ip.to_string(), mask.to_string(), gateway.to_string()],
        ))
        .await
    }

    pub async fn wifi_client_ssid(&self) -> Result<AtResponse> {
        self.run_command(self.get("WSSSID")).await
    }

    pub async fn set_wifi_client_ssid(&self, ssid: &str) -> Result<AtResponse> {
        crate::validate::ssid(ssid)?;
        self.run_command(self.set("WSSSID", vec![ssid.to_string()])).await
    }

    pub async fn wifi_client_auth(&self) -> Result<AtResponse> {
        self.run_command(self.get("WSKEY")).await
    }

    pub async fn set_wifi_client_auth(
        &self,
        auth: &str,
        encryption: &str,
        passphrase: Option<&str>,
    ) -> Result<AtResponse> {
        let (auth, encryption, passphrase) = crate::validate::client_auth(auth, encryption, passphrase)?;
        self.run_command(self.set("WSKEY", client_auth_wire_args(auth, encryption, passphrase)))
            .await
    }

    /// `Z`: no response is read; the session is expected to die.
    pub async fn reboot(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.enter_command_mode(&mut inner).await?;
        self.send_literal(&AtRequest::get("Z").encode()).await?;
        inner.state = UdpState::Closing;
        Ok(())
    }

    /// `RELD`: expects the literal reply `rebooting...`; the session is
    /// expected to die regardless of what the device actually sent back.
    pub async fn factory_reset(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.enter_command_mode(&mut inner).await?;
        self.send_literal(&AtRequest::get("RELD").encode()).await?;
        let raw = self.recv_text().await?;
        inner.state = UdpState::Closing;
        if raw.trim() != "rebooting..." {
            return Err(UfoError::protocol(format!(
                "unexpected reply to factory reset: {raw:?}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_identity_accepts_configured_host() {
        let host: IpAddr = "1.2.3.4".parse().unwrap();
        let id = parse_identity("1.2.3.4,AA-BB-CC-DD-EE-FF,MODELX", host).unwrap();
        assert_eq!(id.ip, host);
        assert_eq!(id.mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(id.model, "MODELX");
    }

    #[test]
    fn parse_identity_accepts_unspecified_host() {
        let host: IpAddr = "1.2.3.4".parse().unwrap();
        let id = parse_identity("0.0.0.0,AA-BB-CC-DD-EE-FF,MODELX", host).unwrap();
        assert_eq!(id.ip, "0.0.0.0".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn parse_identity_rejects_unexpected_host() {
        let host: IpAddr = "1.2.3.4".parse().unwrap();
        assert!(parse_identity("9.9.9.9,AA-BB-CC-DD-EE-FF,MODELX", host).is_err());
    }

    #[test]
    fn client_auth_wire_args_keeps_the_wep_hyphen() {
        assert_eq!(
            client_auth_wire_args(ClientAuth::Shared, ClientEncryption::WepH, Some("secretpw")),
            vec!["SHARED".to_string(), "WEP-H".to_string(), "secretpw".to_string()]
        );
        assert_eq!(
            client_auth_wire_args(ClientAuth::Open, ClientEncryption::WepA, None),
            vec!["OPEN".to_string(), "WEP-A".to_string()]
        );
        assert_eq!(
            client_auth_wire_args(ClientAuth::Open, ClientEncryption::None, None),
            vec!["OPEN".to_string(), "NONE".to_string()]
        );
        assert_eq!(
            client_auth_wire_args(ClientAuth::Wpa2Psk, ClientEncryption::Aes, Some("12345678")),
            vec!["WPA2PSK".to_string(), "AES".to_string(), "12345678".to_string()]
        );
    }

    #[tokio::test]
    async fn kill_marks_the_engine_dead_and_rejects_further_commands() {
        let engine = UdpEngine::connect("127.0.0.1".parse().unwrap(), 0, None, "pw".to_string())
            .await
            .unwrap();
        assert!(!engine.is_dead().await);
        engine.kill("sibling tcp engine died".to_string()).await;
        assert!(engine.is_dead().await);

        let err = engine.command_mode().await.unwrap_err();
        assert!(err.to_string().contains("sibling tcp engine died"));

        // killing an already-dead engine must not overwrite the original reason
        engine.kill("a different reason".to_string()).await;
        let err = engine.command_mode().await.unwrap_err();
        assert!(err.to_string().contains("sibling tcp engine died"));
    }
}
