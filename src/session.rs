//! Device Session (component D, spec §4.4): owns one UDP engine and one TCP
//! engine for a single device, exposes the high-level API, and coordinates
//! teardown so that one side's fatal fault brings the other down with it.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use log::info;
use tokio::sync::{mpsc, Mutex};

use crate::catalog::{Builtin, CustomMode, RgbStep};
use crate::error::{Result, UfoError};
use crate::tcp::TcpEngine;
use crate::udp::{DeviceIdentity, UdpEngine};
use crate::validate;
use crate::wire::{self, AtResponse, DeviceStatus};

/// Default UDP password advertised by stock firmware.
pub const DEFAULT_UDP_PASSWORD: &str = "HF-A11ASSISTHREAD";
/// Default UDP command port.
pub const DEFAULT_UDP_PORT: u16 = 48899;
/// Default TCP data port.
pub const DEFAULT_TCP_PORT: u16 = 5577;

/// Immutable-after-construction session configuration (spec §3).
#[derive(Debug, Clone)]
pub struct DeviceSessionConfig {
    pub host: IpAddr,
    pub udp_password: String,
    pub udp_port: u16,
    pub tcp_port: u16,
    pub local_udp_addr: Option<SocketAddr>,
    /// Disables Nagle on the TCP channel when `true` (the default).
    pub immediate: bool,
    /// Gates the vestigial `_time` frame (spec §4.3, §9). Default off.
    pub send_time_sync: bool,
}

impl DeviceSessionConfig {
    pub fn new(host: IpAddr) -> Self {
        Self {
            host,
            udp_password: DEFAULT_UDP_PASSWORD.to_string(),
            udp_port: DEFAULT_UDP_PORT,
            tcp_port: DEFAULT_TCP_PORT,
            local_udp_addr: None,
            immediate: true,
            send_time_sync: false,
        }
    }
}

enum SideDeadEvent {
    Udp(Option<String>),
    Tcp(Option<String>),
}

struct TeardownState {
    rx: mpsc::Receiver<SideDeadEvent>,
    udp_dead: Option<Option<String>>,
    tcp_dead: Option<Option<String>>,
    fired: bool,
}

struct Teardown {
    tx: mpsc::Sender<SideDeadEvent>,
    state: Mutex<TeardownState>,
}

impl Teardown {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(4);
        Self {
            tx,
            state: Mutex::new(TeardownState {
                rx,
                udp_dead: None,
                tcp_dead: None,
                fired: false,
            }),
        }
    }

    /// Record a side's death and, once both sides have reported, return the
    /// aggregate disconnect error to deliver (fires exactly once).
    async fn note(&self, event: SideDeadEvent) -> Option<Option<UfoError>> {
        self.tx.send(event).await.ok();
        let mut state = self.state.lock().await;
        while let Ok(ev) = state.rx.try_recv() {
            match ev {
                SideDeadEvent::Udp(e) => state.udp_dead = Some(e),
                SideDeadEvent::Tcp(e) => state.tcp_dead = Some(e),
            }
        }
        if state.fired {
            return None;
        }
        if state.udp_dead.is_none() || state.tcp_dead.is_none() {
            return None;
        }
        state.fired = true;
        let udp_msg = state.udp_dead.clone().flatten();
        let tcp_msg = state.tcp_dead.clone().flatten();
        if udp_msg.is_none() && tcp_msg.is_none() {
            return Some(None);
        }
        let udp_err = udp_msg.map(UfoError::protocol);
        let tcp_err = tcp_msg.map(UfoError::protocol);
        Some(Some(UfoError::disconnect(
            udp_err,
            tcp_err,
            "device session disconnected",
        )))
    }
}

/// A live connection to one UFO device: one UDP engine, one TCP engine, and
/// the coordination glue between them (spec §4.4).
pub struct DeviceSession {
    config: DeviceSessionConfig,
    udp: UdpEngine,
    tcp: TcpEngine,
    teardown: Teardown,
    dead: AtomicBool,
    on_disconnect: Mutex<Option<Box<dyn FnMut(Option<UfoError>) + Send>>>,
}

impl DeviceSession {
    /// `connect()`: UDP bind → prove reachability via a command-mode round
    /// trip → TCP connect. Any failure leaves nothing half-open.
    pub async fn connect(config: DeviceSessionConfig) -> Result<Self> {
        let udp = UdpEngine::connect(
            config.host,
            config.udp_port,
            config.local_udp_addr,
            config.udp_password.clone(),
        )
        .await?;
        udp.command_mode().await?;
        udp.end_command().await?;

        let tcp = TcpEngine::connect(config.host, config.tcp_port, config.immediate).await?;

        info!("device session established with {}", config.host);

        Ok(Self {
            config,
            udp,
            tcp,
            teardown: Teardown::new(),
            dead: AtomicBool::new(false),
            on_disconnect: Mutex::new(None),
        })
    }

    /// Register the callback invoked exactly once when the session dies,
    /// either explicitly (via [`DeviceSession::disconnect`]) or because a
    /// fatal fault tore down both engines.
    pub async fn on_disconnect(&self, callback: impl FnMut(Option<UfoError>) + Send + 'static) {
        *self.on_disconnect.lock().await = Some(Box::new(callback));
    }

    async fn fire_if_ready(&self, aggregate: Option<Option<UfoError>>) {
        if let Some(err) = aggregate {
            self.dead.store(true, Ordering::SeqCst);
            if let Some(cb) = self.on_disconnect.lock().await.as_mut() {
                cb(err);
            }
        }
    }

    async fn note_udp_dead(&self, err: Option<String>) {
        let aggregate = self.teardown.note(SideDeadEvent::Udp(err)).await;
        self.fire_if_ready(aggregate).await;
    }

    async fn note_tcp_dead(&self, err: Option<String>) {
        let aggregate = self.teardown.note(SideDeadEvent::Tcp(err)).await;
        self.fire_if_ready(aggregate).await;
    }

    fn check_alive(&self) -> Result<()> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(UfoError::protocol("device session is already dead"));
        }
        Ok(())
    }

    /// Run a UDP operation, routing a fatal error into the teardown ledger
    /// and actively killing the TCP sibling — a fatal fault on one side must
    /// poison the other immediately rather than wait for it to fail on its
    /// own (spec §4.4/§7, Invariant 1: no half-alive state).
    async fn guard_udp<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                let msg = e.to_string();
                if !self.tcp.is_dead().await {
                    self.tcp.kill(msg.clone()).await;
                }
                self.note_udp_dead(Some(msg.clone())).await;
                self.note_tcp_dead(Some(msg)).await;
            }
        }
        result
    }

    async fn guard_tcp<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                let msg = e.to_string();
                if !self.udp.is_dead().await {
                    self.udp.kill(msg.clone()).await;
                }
                self.note_tcp_dead(Some(msg.clone())).await;
                self.note_udp_dead(Some(msg)).await;
            }
        }
        result
    }

    /// `disconnect()`: explicit, clean teardown of both sides.
    pub async fn disconnect(&self) {
        self.note_udp_dead(None).await;
        self.note_tcp_dead(None).await;
    }

    // --- power / color / programs -----------------------------------

    pub async fn turn_on(&self) -> Result<()> {
        self.check_alive()?;
        self.guard_tcp(self.tcp.send(&wire::POWER_ON).await).await
    }

    pub async fn turn_off(&self) -> Result<()> {
        self.check_alive()?;
        self.guard_tcp(self.tcp.send(&wire::POWER_OFF).await).await
    }

    pub async fn set_power(&self, on: bool) -> Result<()> {
        if on {
            self.turn_on().await
        } else {
            self.turn_off().await
        }
    }

    pub async fn toggle(&self) -> Result<()> {
        let status = self.status().await?;
        self.set_power(!status.on).await
    }

    pub async fn set_color(&self, red: i32, green: i32, blue: i32, white: i32) -> Result<()> {
        self.check_alive()?;
        let frame = wire::encode_color(red, green, blue, white);
        self.guard_tcp(self.tcp.send(&frame).await).await
    }

    async fn set_channel(&self, pick: impl Fn(&DeviceStatus) -> (i32, i32, i32, i32)) -> Result<()> {
        let (r, g, b, w) = pick(&self.status().await?);
        self.set_color(r, g, b, w).await
    }

    pub async fn set_red(&self, value: i32, solo: bool) -> Result<()> {
        if solo {
            self.set_color(value, 0, 0, 0).await
        } else {
            self.set_channel(|s| (value, s.green as i32, s.blue as i32, s.white as i32)).await
        }
    }

    pub async fn set_green(&self, value: i32, solo: bool) -> Result<()> {
        if solo {
            self.set_color(0, value, 0, 0).await
        } else {
            self.set_channel(|s| (s.red as i32, value, s.blue as i32, s.white as i32)).await
        }
    }

    pub async fn set_blue(&self, value: i32, solo: bool) -> Result<()> {
        if solo {
            self.set_color(0, 0, value, 0).await
        } else {
            self.set_channel(|s| (s.red as i32, s.green as i32, value, s.white as i32)).await
        }
    }

    pub async fn set_white(&self, value: i32, solo: bool) -> Result<()> {
        if solo {
            self.set_color(0, 0, 0, value).await
        } else {
            self.set_channel(|s| (s.red as i32, s.green as i32, s.blue as i32, value)).await
        }
    }

    pub async fn set_builtin(&self, name: &str, speed: i32) -> Result<()> {
        self.check_alive()?;
        let builtin = Builtin::from_name(name)
            .ok_or_else(|| UfoError::validation(format!("unknown builtin function {name:?}")))?;
        let frame = wire::encode_builtin(builtin, speed)?;
        self.guard_tcp(self.tcp.send(&frame).await).await
    }

    pub async fn set_custom(&self, mode: &str, speed: i32, steps: &[RgbStep]) -> Result<()> {
        self.check_alive()?;
        let mode = CustomMode::from_name(mode)
            .ok_or_else(|| UfoError::validation(format!("unknown custom mode {mode:?}")))?;
        let frame = wire::encode_custom(mode, speed, steps);
        self.guard_tcp(self.tcp.send(&frame).await).await
    }

    /// Shorthand for `set_builtin("noFunction", 0)` — freezes current output.
    pub async fn freeze_output(&self) -> Result<()> {
        self.check_alive()?;
        self.guard_tcp(self.tcp.send(&wire::freeze_payload()).await).await
    }

    /// Shorthand for `set_color(0, 0, 0, 0)`.
    pub async fn zero_output(&self) -> Result<()> {
        self.set_color(0, 0, 0, 0).await
    }

    pub async fn status(&self) -> Result<DeviceStatus> {
        self.check_alive()?;
        self.guard_tcp(self.tcp.status().await).await
    }

    // --- UDP command catalog, delegated 1:1 -------------------------

    pub async fn module_version(&self) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.module_version().await).await
    }

    pub async fn ntp_server(&self) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.ntp_server().await).await
    }

    pub async fn set_ntp_server(&self, ip: &str) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.set_ntp_server(ip).await).await
    }

    pub async fn udp_password(&self) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.udp_password().await).await
    }

    pub async fn set_udp_password(&self, password: &str) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.set_udp_password(password).await).await
    }

    pub async fn tcp_server(&self) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.tcp_server().await).await
    }

    /// Changing the TCP server port is terminal for the session once the
    /// device acknowledges it (spec §4.2); the session is torn down after a
    /// successful set regardless of caller follow-up.
    pub async fn set_tcp_server(&self, protocol: &str, role: &str, port: i32, ip: &str) -> Result<AtResponse> {
        self.check_alive()?;
        let port = validate::tcp_port(port);
        let response = self
            .guard_udp(self.udp.set_tcp_server(protocol, role, port, ip).await)
            .await?;
        self.disconnect().await;
        Ok(response)
    }

    pub async fn wifi_auto_switch(&self) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.wifi_auto_switch().await).await
    }

    pub async fn set_wifi_auto_switch(&self, value: &str) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.set_wifi_auto_switch(value).await).await
    }

    pub async fn wifi_mode(&self) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.wifi_mode().await).await
    }

    pub async fn set_wifi_mode(&self, mode: &str) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.set_wifi_mode(mode).await).await
    }

    pub async fn wifi_scan(&self) -> Result<Vec<Vec<String>>> {
        self.check_alive()?;
        self.guard_udp(self.udp.wifi_scan().await).await
    }

    pub async fn wifi_ap_ip(&self) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.wifi_ap_ip().await).await
    }

    pub async fn set_wifi_ap_ip(&self, ip: &str, mask: &str) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.set_wifi_ap_ip(ip, mask).await).await
    }

    pub async fn wifi_ap_broadcast(&self) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.wifi_ap_broadcast().await).await
    }

    pub async fn set_wifi_ap_broadcast(&self, band: &str, ssid: &str, channel: i32) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.set_wifi_ap_broadcast(band, ssid, channel).await).await
    }

    pub async fn wifi_ap_auth(&self) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.wifi_ap_auth().await).await
    }

    pub async fn set_wifi_ap_auth(&self, passphrase: Option<&str>) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.set_wifi_ap_auth(passphrase).await).await
    }

    pub async fn wifi_ap_led(&self) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.wifi_ap_led().await).await
    }

    pub async fn set_wifi_ap_led(&self, on: bool) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.set_wifi_ap_led(on).await).await
    }

    pub async fn wifi_ap_dhcp(&self) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.wifi_ap_dhcp().await).await
    }

    pub async fn set_wifi_ap_dhcp(&self, start: i32, end: i32) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.set_wifi_ap_dhcp(start, end).await).await
    }

    pub async fn disable_wifi_ap_dhcp(&self) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.disable_wifi_ap_dhcp().await).await
    }

    pub async fn wifi_client_ap_info(&self) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.wifi_client_ap_info().await).await
    }

    pub async fn wifi_client_ap_signal(&self) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.wifi_client_ap_signal().await).await
    }

    pub async fn wifi_client_ip(&self) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.wifi_client_ip().await).await
    }

    pub async fn set_wifi_client_ip_dhcp(&self) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.set_wifi_client_ip_dhcp().await).await
    }

    pub async fn set_wifi_client_ip_static(&self, ip: &str, mask: &str, gateway: &str) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.set_wifi_client_ip_static(ip, mask, gateway).await).await
    }

    pub async fn wifi_client_ssid(&self) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.wifi_client_ssid().await).await
    }

    pub async fn set_wifi_client_ssid(&self, ssid: &str) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.set_wifi_client_ssid(ssid).await).await
    }

    pub async fn wifi_client_auth(&self) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.wifi_client_auth().await).await
    }

    pub async fn set_wifi_client_auth(&self, auth: &str, encryption: &str, passphrase: Option<&str>) -> Result<AtResponse> {
        self.check_alive()?;
        self.guard_udp(self.udp.set_wifi_client_auth(auth, encryption, passphrase).await).await
    }

    async fn maybe_send_time_sync(&self) -> Result<()> {
        if !self.config.send_time_sync {
            return Ok(());
        }
        let (year, month, day, hour, minute, second) = current_utc_datetime();
        let frame = wire::encode_time_sync(year, month, day, hour, minute, second);
        self.tcp.send(&frame).await
    }

    /// `reboot()`: tears the session down after the device acknowledges.
    pub async fn reboot(&self) -> Result<()> {
        self.check_alive()?;
        self.maybe_send_time_sync().await?;
        self.guard_udp(self.udp.reboot().await).await?;
        self.disconnect().await;
        Ok(())
    }

    /// `factory_reset()`: tears the session down after the device
    /// acknowledges with `rebooting...`.
    pub async fn factory_reset(&self) -> Result<()> {
        self.check_alive()?;
        self.maybe_send_time_sync().await?;
        self.guard_udp(self.udp.factory_reset().await).await?;
        self.disconnect().await;
        Ok(())
    }
}

/// Identity returned by the one reachability round trip performed during
/// [`DeviceSession::connect`]; exposed for callers who want it without a
/// separate discovery pass.
pub type SessionIdentity = DeviceIdentity;

fn civil_from_unix_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

/// UTC wall-clock fields for the vestigial `_time` frame. The source field
/// this frame is named after is local time; this crate has no timezone
/// database dependency in its stack, so it sends UTC instead — acceptable
/// for a frame whose device-side effect is unknown (spec §4.3, §9).
fn current_utc_datetime() -> (u16, u8, u8, u8, u8, u8) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = now.as_secs() as i64;
    let days = secs.div_euclid(86400);
    let time_of_day = secs.rem_euclid(86400);
    let (y, m, d) = civil_from_unix_days(days);
    let hour = (time_of_day / 3600) as u8;
    let minute = ((time_of_day % 3600) / 60) as u8;
    let second = (time_of_day % 60) as u8;
    (y as u16, m as u8, d as u8, hour, minute, second)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::net::TcpListener;

    #[test]
    fn civil_date_matches_known_epoch_offsets() {
        assert_eq!(civil_from_unix_days(0), (1970, 1, 1));
        assert_eq!(civil_from_unix_days(18_262), (2020, 1, 1));
        assert_eq!(civil_from_unix_days(18_321), (2020, 2, 29));
        assert_eq!(civil_from_unix_days(19_905), (2024, 7, 1));
    }

    /// A loopback TCP engine and a bound (never-dialed-into) UDP engine,
    /// wired into a `DeviceSession` the way `connect()` would, but without
    /// needing a real UFO device to talk AT commands to.
    async fn session_with_live_engines() -> DeviceSession {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let tcp = TcpEngine::connect(addr.ip(), addr.port(), true).await.unwrap();
        let udp = UdpEngine::connect(addr.ip(), 0, None, "pw".to_string()).await.unwrap();

        DeviceSession {
            config: DeviceSessionConfig::new(addr.ip()),
            udp,
            tcp,
            teardown: Teardown::new(),
            dead: AtomicBool::new(false),
            on_disconnect: Mutex::new(None),
        }
    }

    /// A fatal fault on one side must poison the other immediately — not
    /// wait for it to independently fail — and fire the disconnect callback
    /// exactly once (spec §4.4/§7, Invariant 1).
    #[tokio::test]
    async fn fatal_udp_fault_kills_the_tcp_sibling_and_fires_disconnect_once() {
        let session = session_with_live_engines().await;

        let fired = Arc::new(AtomicBool::new(false));
        let fired_in_callback = fired.clone();
        session
            .on_disconnect(move |_| {
                fired_in_callback.store(true, Ordering::SeqCst);
            })
            .await;

        let fatal: Result<()> = Err(UfoError::protocol("simulated udp fault"));
        session.guard_udp(fatal).await.unwrap_err();

        assert!(session.udp.is_dead().await);
        assert!(session.tcp.is_dead().await);
        assert!(session.dead.load(Ordering::SeqCst));
        assert!(fired.load(Ordering::SeqCst));
        assert!(session.check_alive().is_err());
    }

    #[tokio::test]
    async fn fatal_tcp_fault_kills_the_udp_sibling_and_fires_disconnect_once() {
        let session = session_with_live_engines().await;

        let fired = Arc::new(AtomicBool::new(false));
        let fired_in_callback = fired.clone();
        session
            .on_disconnect(move |_| {
                fired_in_callback.store(true, Ordering::SeqCst);
            })
            .await;

        let fatal: Result<()> = Err(UfoError::Transport(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "simulated tcp fault",
        )));
        session.guard_tcp(fatal).await.unwrap_err();

        assert!(session.tcp.is_dead().await);
        assert!(session.udp.is_dead().await);
        assert!(session.dead.load(Ordering::SeqCst));
        assert!(fired.load(Ordering::SeqCst));
    }

    /// A non-fatal error (an AT error or a validation error) must not tear
    /// the session down.
    #[tokio::test]
    async fn non_fatal_error_does_not_poison_either_side() {
        let session = session_with_live_engines().await;

        let non_fatal: Result<()> = Err(UfoError::validation("bad input"));
        session.guard_udp(non_fatal).await.unwrap_err();

        assert!(!session.udp.is_dead().await);
        assert!(!session.tcp.is_dead().await);
        assert!(!session.dead.load(Ordering::SeqCst));
    }
}
