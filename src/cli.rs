//! CLI front-end (component H, spec §4.8): `clap`-derived subcommands
//! mapping 1:1 onto the [`crate::session::DeviceSession`] API.

use std::env;
use std::net::IpAddr;

use clap::{Parser, Subcommand};

use crate::catalog::RgbStep;
use crate::error::{Result, UfoError};
use crate::session::{DeviceSession, DeviceSessionConfig};
use crate::wire::AtResponse;

const ADDRESS_ENV_VAR: &str = "LUFO_ADDRESS";

#[derive(Debug, Parser)]
#[command(name = "wifi-ufo", about = "Control a LEDENET-style WiFi RGBW controller")]
pub struct Cli {
    /// Device address. Falls back to the LUFO_ADDRESS environment variable.
    #[arg(long, global = true)]
    pub ufo: Option<IpAddr>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Broadcast for devices on the local network.
    Discover {
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    Status,
    On,
    Off,
    Toggle,
    Rgbw {
        red: i32,
        green: i32,
        blue: i32,
        white: i32,
    },
    Red {
        value: i32,
        #[arg(long)]
        solo: bool,
    },
    Green {
        value: i32,
        #[arg(long)]
        solo: bool,
    },
    Blue {
        value: i32,
        #[arg(long)]
        solo: bool,
    },
    White {
        value: i32,
        #[arg(long)]
        solo: bool,
    },
    Function {
        name: String,
        speed: i32,
    },
    Custom {
        mode: String,
        speed: i32,
        /// Steps as `r,g,b` triples.
        #[arg(value_parser = parse_step)]
        steps: Vec<RgbStep>,
    },
    Zero,
    Freeze,
    Version,
    Ntp {
        server: Option<String>,
    },
    Password {
        password: Option<String>,
    },
    Port {
        port: Option<i32>,
        #[arg(long, default_value = "TCP")]
        protocol: String,
        #[arg(long, default_value = "Server")]
        role: String,
        #[arg(long)]
        ip: Option<String>,
    },
    WifiScan,
    WifiAutoSwitch {
        value: Option<String>,
    },
    WifiMode {
        mode: Option<String>,
    },
    WifiApIp {
        ip: Option<String>,
        mask: Option<String>,
    },
    WifiApBroadcast {
        band: Option<String>,
        ssid: Option<String>,
        channel: Option<i32>,
    },
    WifiApAuth {
        passphrase: Option<String>,
        #[arg(long)]
        open: bool,
    },
    WifiApLed {
        on: Option<bool>,
    },
    WifiApDhcp {
        start: Option<i32>,
        end: Option<i32>,
        #[arg(long)]
        off: bool,
    },
    WifiClientApInfo,
    WifiClientApSignal,
    WifiClientIp {
        ip: Option<String>,
        mask: Option<String>,
        gateway: Option<String>,
    },
    WifiClientSsid {
        ssid: Option<String>,
    },
    WifiClientAuth {
        auth: Option<String>,
        encryption: Option<String>,
        passphrase: Option<String>,
    },
    Reboot,
    FactoryReset,
}

fn parse_step(s: &str) -> std::result::Result<RgbStep, String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 3 {
        return Err(format!("step {s:?} must be of the form r,g,b"));
    }
    let parse_one = |p: &str| p.trim().parse::<i32>().map_err(|_| format!("{p:?} is not a number"));
    let r = parse_one(parts[0])?.clamp(0, 255) as u8;
    let g = parse_one(parts[1])?.clamp(0, 255) as u8;
    let b = parse_one(parts[2])?.clamp(0, 255) as u8;
    Ok(RgbStep { red: r, green: g, blue: b })
}

fn resolve_address(cli: &Cli) -> Result<IpAddr> {
    if let Some(ip) = cli.ufo {
        return Ok(ip);
    }
    env::var(ADDRESS_ENV_VAR)
        .ok()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| {
            UfoError::validation(format!(
                "no device address given: pass --ufo or set {ADDRESS_ENV_VAR}"
            ))
        })
}

fn prompt_if_missing(value: Option<String>, prompt: &str) -> Result<String> {
    match value {
        Some(v) => Ok(v),
        None => rpassword::prompt_password(prompt)
            .map_err(|e| UfoError::validation(format!("failed to read {prompt}: {e}"))),
    }
}

#[cfg(feature = "serde")]
fn emit_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| UfoError::protocol(format!("failed to serialize response: {e}")))?;
    println!("{text}");
    Ok(())
}

fn emit_at_response(response: &AtResponse) {
    match response {
        AtResponse::Void => println!("ok"),
        AtResponse::Scalar(s) => println!("{s}"),
        AtResponse::List(items) => println!("{}", items.join(",")),
        AtResponse::Error(code) => println!("error: {code}"),
    }
}

/// Run one invocation of the CLI to completion. The binary is responsible
/// for parsing argv into a [`Cli`] and initializing logging before calling
/// this; `run` owns only the Device Session lifecycle and output shape.
pub async fn run(cli: Cli) -> Result<()> {
    if let Command::Discover { password, timeout_ms } = &cli.command {
        let found = crate::discovery::discover(password.as_deref(), crate::session::DEFAULT_UDP_PORT, *timeout_ms)
            .await?;
        #[cfg(feature = "serde")]
        return emit_json(&found);
        #[cfg(not(feature = "serde"))]
        {
            for id in &found {
                println!("{} {} {}", id.ip, id.mac, id.model);
            }
            return Ok(());
        }
    }

    let host = resolve_address(&cli)?;
    let session = DeviceSession::connect(DeviceSessionConfig::new(host)).await?;

    match cli.command {
        Command::Discover { .. } => unreachable!("handled above"),
        Command::Status => {
            let status = session.status().await?;
            #[cfg(feature = "serde")]
            emit_json(&status)?;
            #[cfg(not(feature = "serde"))]
            println!("{status:?}");
        }
        Command::On => session.turn_on().await?,
        Command::Off => session.turn_off().await?,
        Command::Toggle => session.toggle().await?,
        Command::Rgbw { red, green, blue, white } => session.set_color(red, green, blue, white).await?,
        Command::Red { value, solo } => session.set_red(value, solo).await?,
        Command::Green { value, solo } => session.set_green(value, solo).await?,
        Command::Blue { value, solo } => session.set_blue(value, solo).await?,
        Command::White { value, solo } => session.set_white(value, solo).await?,
        Command::Function { name, speed } => session.set_builtin(&name, speed).await?,
        Command::Custom { mode, speed, steps } => session.set_custom(&mode, speed, &steps).await?,
        Command::Zero => session.zero_output().await?,
        Command::Freeze => session.freeze_output().await?,
        Command::Version => emit_at_response(&session.module_version().await?),
        Command::Ntp { server } => match server {
            Some(s) => emit_at_response(&session.set_ntp_server(&s).await?),
            None => emit_at_response(&session.ntp_server().await?),
        },
        Command::Password { password } => {
            let password = prompt_if_missing(password, "UDP password: ")?;
            emit_at_response(&session.set_udp_password(&password).await?)
        }
        Command::Port { port, protocol, role, ip } => match port {
            Some(p) => {
                let ip = ip.ok_or_else(|| UfoError::validation("--ip is required when setting the port"))?;
                emit_at_response(&session.set_tcp_server(&protocol, &role, p, &ip).await?)
            }
            None => emit_at_response(&session.tcp_server().await?),
        },
        Command::WifiScan => {
            let results = session.wifi_scan().await?;
            #[cfg(feature = "serde")]
            emit_json(&results)?;
            #[cfg(not(feature = "serde"))]
            for row in results {
                println!("{}", row.join(","));
            }
        }
        Command::WifiAutoSwitch { value } => match value {
            Some(v) => emit_at_response(&session.set_wifi_auto_switch(&v).await?),
            None => emit_at_response(&session.wifi_auto_switch().await?),
        },
        Command::WifiMode { mode } => match mode {
            Some(m) => emit_at_response(&session.set_wifi_mode(&m).await?),
            None => emit_at_response(&session.wifi_mode().await?),
        },
        Command::WifiApIp { ip, mask } => match (ip, mask) {
            (Some(ip), Some(mask)) => emit_at_response(&session.set_wifi_ap_ip(&ip, &mask).await?),
            _ => emit_at_response(&session.wifi_ap_ip().await?),
        },
        Command::WifiApBroadcast { band, ssid, channel } => match (band, ssid, channel) {
            (Some(band), Some(ssid), Some(channel)) => {
                emit_at_response(&session.set_wifi_ap_broadcast(&band, &ssid, channel).await?)
            }
            _ => emit_at_response(&session.wifi_ap_broadcast().await?),
        },
        Command::WifiApAuth { passphrase, open } => {
            if open {
                emit_at_response(&session.set_wifi_ap_auth(None).await?)
            } else if let Some(p) = passphrase {
                emit_at_response(&session.set_wifi_ap_auth(Some(&p)).await?)
            } else {
                emit_at_response(&session.wifi_ap_auth().await?)
            }
        }
        Command::WifiApLed { on } => match on {
            Some(on) => emit_at_response(&session.set_wifi_ap_led(on).await?),
            None => emit_at_response(&session.wifi_ap_led().await?),
        },
        Command::WifiApDhcp { start, end, off } => {
            if off {
                emit_at_response(&session.disable_wifi_ap_dhcp().await?)
            } else if let (Some(start), Some(end)) = (start, end) {
                emit_at_response(&session.set_wifi_ap_dhcp(start, end).await?)
            } else {
                emit_at_response(&session.wifi_ap_dhcp().await?)
            }
        }
        Command::WifiClientApInfo => emit_at_response(&session.wifi_client_ap_info().await?),
        Command::WifiClientApSignal => emit_at_response(&session.wifi_client_ap_signal().await?),
        Command::WifiClientIp { ip, mask, gateway } => match (ip, mask, gateway) {
            (Some(ip), Some(mask), Some(gateway)) => {
                emit_at_response(&session.set_wifi_client_ip_static(&ip, &mask, &gateway).await?)
            }
            (None, None, None) => emit_at_response(&session.wifi_client_ip().await?),
            _ => emit_at_response(&session.set_wifi_client_ip_dhcp().await?),
        },
        Command::WifiClientSsid { ssid } => match ssid {
            Some(s) => emit_at_response(&session.set_wifi_client_ssid(&s).await?),
            None => emit_at_response(&session.wifi_client_ssid().await?),
        },
        Command::WifiClientAuth { auth, encryption, passphrase } => match (auth, encryption) {
            (Some(auth), Some(encryption)) => {
                emit_at_response(&session.set_wifi_client_auth(&auth, &encryption, passphrase.as_deref()).await?)
            }
            _ => emit_at_response(&session.wifi_client_auth().await?),
        },
        Command::Reboot => session.reboot().await?,
        Command::FactoryReset => session.factory_reset().await?,
    }

    Ok(())
}
