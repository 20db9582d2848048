//! Boundary checks (component G, spec §6/§4.7). Every function here runs
//! synchronously before anything touches a socket; numeric fields instead
//! use the infallible `clamp_u8`/`clamp` helpers in [`crate::wire`] and
//! never appear in this module.

use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::{bad_ip, UfoError, Result};

/// Parse `value` as an IPv4 address, naming `field` in the error on failure.
pub fn ipv4(field: &str, value: &str) -> Result<Ipv4Addr> {
    Ipv4Addr::from_str(value).map_err(|_| bad_ip(field, value))
}

/// `1..20` ASCII characters.
pub fn udp_password(value: &str) -> Result<&str> {
    if value.is_empty() || value.len() > 20 || !value.is_ascii() {
        return Err(UfoError::validation(format!(
            "UDP password must be 1-20 ASCII characters, got {} bytes",
            value.len()
        )));
    }
    Ok(value)
}

/// Clamped `0..=65535`; infallible, kept here (rather than in `wire`) since
/// it is a session-configuration concern, not a wire-field concern.
pub fn tcp_port(value: i32) -> u16 {
    value.clamp(0, 65535) as u16
}

/// `<=32` characters; the empty string is a legal SSID.
pub fn ssid(value: &str) -> Result<&str> {
    if value.chars().count() > 32 {
        return Err(UfoError::validation(format!(
            "SSID must be at most 32 characters, got {}",
            value.chars().count()
        )));
    }
    Ok(value)
}

/// Clamped `1..=11`.
pub fn ap_channel(value: i32) -> u8 {
    value.clamp(1, 11) as u8
}

/// `None` (open network) or `8..63` characters.
pub fn ap_passphrase(value: Option<&str>) -> Result<Option<&str>> {
    match value {
        None => Ok(None),
        Some(p) if (8..=63).contains(&p.chars().count()) => Ok(Some(p)),
        Some(p) => Err(UfoError::validation(format!(
            "AP passphrase must be 8-63 characters, got {}",
            p.chars().count()
        ))),
    }
}

/// Clamped `0..=254`, used for both DHCP range endpoints.
pub fn dhcp_octet(value: i32) -> u8 {
    value.clamp(0, 254) as u8
}

/// Client WiFi authentication mode (spec §6 cross-constraint table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuth {
    Open,
    Shared,
    WpaPsk,
    Wpa2Psk,
}

impl ClientAuth {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(Self::Open),
            "SHARED" => Some(Self::Shared),
            "WPAPSK" => Some(Self::WpaPsk),
            "WPA2PSK" => Some(Self::Wpa2Psk),
            _ => None,
        }
    }

    /// The literal token sent on the wire in an `AT+WSKEY=...` argument.
    pub fn wire_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Shared => "SHARED",
            Self::WpaPsk => "WPAPSK",
            Self::Wpa2Psk => "WPA2PSK",
        }
    }
}

/// Client WiFi encryption mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEncryption {
    None,
    WepH,
    WepA,
    Tkip,
    Aes,
}

impl ClientEncryption {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "NONE" => Some(Self::None),
            "WEP-H" => Some(Self::WepH),
            "WEP-A" => Some(Self::WepA),
            "TKIP" => Some(Self::Tkip),
            "AES" => Some(Self::Aes),
            _ => None,
        }
    }

    /// The literal token sent on the wire in an `AT+WSKEY=...` argument.
    /// Not `Debug`-derivable: `WepH`/`WepA` must keep their hyphen
    /// (`"WEP-H"`/`"WEP-A"`), which `{:?}` formatting would drop.
    pub fn wire_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::WepH => "WEP-H",
            Self::WepA => "WEP-A",
            Self::Tkip => "TKIP",
            Self::Aes => "AES",
        }
    }
}

/// Validate the `(auth, encryption, passphrase)` triple per spec §6:
/// `OPEN` pairs only with `{NONE, WEP-H, WEP-A}`; `SHARED` only with
/// `{WEP-H, WEP-A}`; `WPAPSK`/`WPA2PSK` only with `{TKIP, AES}`; a
/// passphrase is required exactly when encryption is not `NONE`, and is
/// itself checked by [`ap_passphrase`]'s length rule.
pub fn client_auth<'a>(
    auth: &str,
    encryption: &str,
    passphrase: Option<&'a str>,
) -> Result<(ClientAuth, ClientEncryption, Option<&'a str>)> {
    let auth = ClientAuth::parse(auth)
        .ok_or_else(|| UfoError::validation(format!("unknown client auth mode {auth:?}")))?;
    let encryption = ClientEncryption::parse(encryption)
        .ok_or_else(|| UfoError::validation(format!("unknown client encryption mode {encryption:?}")))?;

    let compatible = match auth {
        ClientAuth::Open => matches!(
            encryption,
            ClientEncryption::None | ClientEncryption::WepH | ClientEncryption::WepA
        ),
        ClientAuth::Shared => matches!(encryption, ClientEncryption::WepH | ClientEncryption::WepA),
        ClientAuth::WpaPsk | ClientAuth::Wpa2Psk => {
            matches!(encryption, ClientEncryption::Tkip | ClientEncryption::Aes)
        }
    };
    if !compatible {
        return Err(UfoError::validation(format!(
            "auth {auth:?} is not compatible with encryption {encryption:?}"
        )));
    }

    if encryption == ClientEncryption::None {
        if passphrase.is_some() {
            return Err(UfoError::validation(
                "a passphrase must not be supplied for an open (NONE) network".to_string(),
            ));
        }
        Ok((auth, encryption, None))
    } else {
        let checked = ap_passphrase(passphrase)?.ok_or_else(|| {
            UfoError::validation("a passphrase is required for this encryption mode".to_string())
        })?;
        Ok((auth, encryption, Some(checked)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_accepts_and_rejects() {
        assert!(ipv4("ntp", "1.2.3.4").is_ok());
        assert!(ipv4("ntp", "not-an-ip").is_err());
    }

    #[test]
    fn udp_password_bounds() {
        assert!(udp_password("").is_err());
        assert!(udp_password(&"a".repeat(20)).is_ok());
        assert!(udp_password(&"a".repeat(21)).is_err());
    }

    #[test]
    fn tcp_port_clamps() {
        assert_eq!(tcp_port(-1), 0);
        assert_eq!(tcp_port(70000), 65535);
        assert_eq!(tcp_port(5577), 5577);
    }

    #[test]
    fn ssid_length() {
        assert!(ssid(&"a".repeat(32)).is_ok());
        assert!(ssid(&"a".repeat(33)).is_err());
    }

    #[test]
    fn ap_channel_clamps() {
        assert_eq!(ap_channel(0), 1);
        assert_eq!(ap_channel(20), 11);
        assert_eq!(ap_channel(6), 6);
    }

    #[test]
    fn ap_passphrase_bounds() {
        assert!(ap_passphrase(None).is_ok());
        assert!(ap_passphrase(Some("short")).is_err());
        assert!(ap_passphrase(Some(&"a".repeat(8))).is_ok());
        assert!(ap_passphrase(Some(&"a".repeat(64))).is_err());
    }

    #[test]
    fn dhcp_octet_clamps() {
        assert_eq!(dhcp_octet(-5), 0);
        assert_eq!(dhcp_octet(300), 254);
    }

    #[test]
    fn client_auth_cross_constraints() {
        assert!(client_auth("OPEN", "AES", None).is_err());
        assert!(client_auth("OPEN", "NONE", None).is_ok());
        assert!(client_auth("SHARED", "AES", Some("12345678")).is_err());
        assert!(client_auth("SHARED", "WEP-H", Some("12345678")).is_ok());
        assert!(client_auth("WPA2PSK", "AES", Some("12345678")).is_ok());
        assert!(client_auth("WPA2PSK", "NONE", None).is_err());
        assert!(client_auth("WPA2PSK", "AES", None).is_err());
    }

    #[test]
    fn client_auth_rejects_unknown_modes() {
        assert!(client_auth("BOGUS", "AES", Some("12345678")).is_err());
        assert!(client_auth("OPEN", "BOGUS", None).is_err());
    }

    #[test]
    fn wire_str_keeps_the_hyphen_wep_tokens_debug_formatting_would_drop() {
        assert_eq!(ClientEncryption::WepH.wire_str(), "WEP-H");
        assert_eq!(ClientEncryption::WepA.wire_str(), "WEP-A");
        assert_eq!(ClientEncryption::None.wire_str(), "NONE");
        assert_eq!(ClientEncryption::Tkip.wire_str(), "TKIP");
        assert_eq!(ClientEncryption::Aes.wire_str(), "AES");
        assert_eq!(ClientAuth::Open.wire_str(), "OPEN");
        assert_eq!(ClientAuth::Shared.wire_str(), "SHARED");
        assert_eq!(ClientAuth::WpaPsk.wire_str(), "WPAPSK");
        assert_eq!(ClientAuth::Wpa2Psk.wire_str(), "WPA2PSK");
    }
}
