//! Wire Codec (component A): TCP command framing/checksum, the 14-byte
//! status decoder, and the UDP AT-command envelope. Pure byte-in/byte-out —
//! nothing in this module touches a socket, which is what makes it
//! exhaustively unit-testable against the literal byte sequences in spec §8.

use byteorder::{LittleEndian, WriteBytesExt};

use crate::catalog::{Builtin, CustomMode, RgbStep, CUSTOM_STEP_COUNT, NULL_STEP};
use crate::error::{Result, UfoError};

/// The local-flag byte placed second-to-last in most TCP frames. Its
/// counterpart `0xF0` ("remote") would route through a vendor cloud and is
/// never used here.
const LOCAL_FLAG: u8 = 0x0F;

/// `71 23 0F A3` — already framed.
pub const POWER_ON: [u8; 4] = [0x71, 0x23, LOCAL_FLAG, 0xA3];
/// `71 24 0F A4` — already framed.
pub const POWER_OFF: [u8; 4] = [0x71, 0x24, LOCAL_FLAG, 0xA4];
/// `81 8A 8B 96` — device-mandated, carries no local flag or checksum.
pub const STATUS_REQUEST: [u8; 4] = [0x81, 0x8A, 0x8B, 0x96];

const STATUS_FRAME_LEN: usize = 14;
const STATUS_HEADER: u8 = 0x81;

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Append the local flag and checksum to `payload`, producing a new buffer.
/// `payload` is never mutated in place (spec §4.1).
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2);
    out.extend_from_slice(payload);
    out.push(LOCAL_FLAG);
    let sum = checksum(&out);
    out.push(sum);
    out
}

/// Clamp an arbitrary input into `0..=255` at the byte boundary. Used for
/// every color/step field per Invariant 2 — out-of-range numeric input is
/// always clamped, never rejected.
pub fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

fn clamp_range(value: i32, lo: i32, hi: i32) -> i32 {
    value.clamp(lo, hi)
}

/// `31 RR GG BB WW 00`, framed to 8 bytes.
pub fn encode_color(red: i32, green: i32, blue: i32, white: i32) -> Vec<u8> {
    let payload = [
        0x31,
        clamp_u8(red),
        clamp_u8(green),
        clamp_u8(blue),
        clamp_u8(white),
        0x00,
    ];
    frame(&payload)
}

/// `61 ID SPEED`, framed to 5 bytes. `speed` is the API's 0 (slow)..100
/// (fast) value; the wire byte is `100 - clamp(speed, 0, 100)`.
///
/// Returns an error if `builtin` is one of the two reserved, non-selectable
/// entries (`noFunction`, `postReset`); callers use [`freeze_payload`] for
/// the one legitimate use of `noFunction`.
pub fn encode_builtin(builtin: Builtin, speed: i32) -> Result<Vec<u8>> {
    if builtin.is_reserved() {
        return Err(UfoError::validation(format!(
            "{} is reserved and cannot be selected directly",
            builtin.name()
        )));
    }
    Ok(encode_builtin_unchecked(builtin, speed))
}

fn encode_builtin_unchecked(builtin: Builtin, speed: i32) -> Vec<u8> {
    let wire_speed = 100 - clamp_range(speed, 0, 100);
    let payload = [0x61, builtin.byte(), wire_speed as u8];
    frame(&payload)
}

/// Shorthand for `noFunction, 0` — freezes the current output (spec §4.4).
pub fn freeze_payload() -> Vec<u8> {
    encode_builtin_unchecked(Builtin::NoFunction, 0)
}

/// Build the exactly-16-entry step list per spec §4.1:
/// 1. strip every null-step sentinel,
/// 2. clamp remaining RGB,
/// 3. truncate to 16,
/// 4. right-pad with the null step.
fn normalize_steps(steps: &[RgbStep]) -> [RgbStep; CUSTOM_STEP_COUNT] {
    let mut real: Vec<RgbStep> = steps
        .iter()
        .filter(|s| **s != NULL_STEP)
        .map(|s| RgbStep {
            red: clamp_u8(s.red as i32),
            green: clamp_u8(s.green as i32),
            blue: clamp_u8(s.blue as i32),
        })
        .collect();
    real.truncate(CUSTOM_STEP_COUNT);
    let mut out = [NULL_STEP; CUSTOM_STEP_COUNT];
    out[..real.len()].copy_from_slice(&real);
    out
}

/// `51` + sixteen 4-byte step records + speed byte + mode byte + `FF`,
/// framed to 70 bytes.
pub fn encode_custom(mode: CustomMode, speed: i32, steps: &[RgbStep]) -> Vec<u8> {
    let normalized = normalize_steps(steps);

    let mut payload = Vec::with_capacity(1 + CUSTOM_STEP_COUNT * 4 + 3);
    payload.push(0x51);
    for step in &normalized {
        payload.push(step.red);
        payload.push(step.green);
        payload.push(step.blue);
        payload.push(0x00);
    }
    let wire_speed = (30 - clamp_range(speed, 0, 30)) + 1;
    payload.push(wire_speed as u8);
    payload.push(mode.byte());
    payload.push(0xFF);

    frame(&payload)
}

/// The vestigial `_time` TCP frame (spec §4.3): `10 YY YY MM DD hh mm ss 07 00`,
/// where `YY YY` is the little-endian current year. Sending this frame is
/// gated behind [`crate::session::DeviceSessionConfig::send_time_sync`]; it
/// is not part of the framed checksum family above (no local flag/checksum
/// is appended — the device treats it as fixed-length, not AT-framed).
pub fn encode_time_sync(
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    out.push(0x10);
    out.write_u16::<LittleEndian>(year).expect("Vec writes never fail");
    out.push(month);
    out.push(day);
    out.push(hour);
    out.push(minute);
    out.push(second);
    out.push(0x07);
    out.push(0x00);
    out
}

/// The output mode reported in a decoded status frame (spec §3). Displays
/// (and, with the `serde` feature, serializes) as `static`/`custom`/`other`
/// or `function:<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Static,
    Custom,
    Other,
    Function(String),
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static => write!(f, "static"),
            Self::Custom => write!(f, "custom"),
            Self::Other => write!(f, "other"),
            Self::Function(name) => write!(f, "function:{name}"),
        }
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Mode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Mode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "static" => Self::Static,
            "custom" => Self::Custom,
            "other" => Self::Other,
            other => match other.strip_prefix("function:") {
                Some(name) => Self::Function(name.to_string()),
                None => return Err(serde::de::Error::custom(format!("unrecognized mode {other:?}"))),
            },
        })
    }
}

/// A decoded 14-byte status frame (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceStatus {
    pub raw: [u8; STATUS_FRAME_LEN],
    pub on: bool,
    pub mode: Mode,
    /// Present only for `Custom` and `Function` modes.
    pub speed: Option<u8>,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub white: u8,
}

/// Decode exactly 14 bytes into a [`DeviceStatus`], verifying the header and
/// checksum per spec §4.1.
pub fn decode_status(bytes: &[u8]) -> Result<DeviceStatus> {
    if bytes.len() != STATUS_FRAME_LEN {
        return Err(UfoError::protocol(format!(
            "status frame must be {STATUS_FRAME_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    if bytes[0] != STATUS_HEADER {
        return Err(UfoError::protocol(format!(
            "header mismatch: expected 0x{STATUS_HEADER:02X}, got 0x{:02X}",
            bytes[0]
        )));
    }
    let expected_checksum = checksum(&bytes[0..13]);
    if expected_checksum != bytes[13] {
        return Err(UfoError::protocol(format!(
            "checksum mismatch: computed 0x{expected_checksum:02X}, frame says 0x{:02X}",
            bytes[13]
        )));
    }

    let on = match bytes[2] {
        0x23 => true,
        0x24 => false,
        other => {
            return Err(UfoError::protocol(format!(
                "impossible power byte 0x{other:02X}"
            )))
        }
    };

    let (mode, speed) = match bytes[3] {
        0x62 => (Mode::Other, None),
        0x61 => (Mode::Static, None),
        0x60 => {
            let speed = 30i32.saturating_sub(bytes[5] as i32 - 1).clamp(0, 30) as u8;
            (Mode::Custom, Some(speed))
        }
        other => match Builtin::from_byte(other) {
            Some(b) => {
                let speed = (100i32 - bytes[5] as i32).clamp(0, 100) as u8;
                (Mode::Function(b.name().to_string()), Some(speed))
            }
            None => {
                return Err(UfoError::protocol(format!(
                    "unknown mode byte 0x{other:02X}"
                )))
            }
        },
    };

    let mut raw = [0u8; STATUS_FRAME_LEN];
    raw.copy_from_slice(bytes);

    Ok(DeviceStatus {
        raw,
        on,
        mode,
        speed,
        red: bytes[6],
        green: bytes[7],
        blue: bytes[8],
        white: bytes[9],
    })
}

/// Whether a wire frame ends in a valid `(0x0F, checksum)` pair and the
/// overall byte sum is therefore `0 mod 256` — a universal invariant from
/// spec §8, exposed for tests and for defensive assertions in the engines.
pub fn frame_checksum_holds(frame: &[u8]) -> bool {
    !frame.is_empty() && checksum(frame) == 0
}

/// An AT-command request as sent on the UDP wire (spec §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtRequest {
    /// Wire text is the raw string itself — used for the hello and the
    /// hello-ack.
    Literal(String),
    /// `AT+<cmd><suffix>` (getter) or `AT+<cmd>=a,b,...<suffix>` (setter).
    Wrapped { cmd: String, args: Vec<String> },
}

impl AtRequest {
    pub fn literal(s: impl Into<String>) -> Self {
        Self::Literal(s.into())
    }

    pub fn get(cmd: impl Into<String>) -> Self {
        Self::Wrapped {
            cmd: cmd.into(),
            args: Vec::new(),
        }
    }

    pub fn set(cmd: impl Into<String>, args: Vec<String>) -> Self {
        Self::Wrapped {
            cmd: cmd.into(),
            args,
        }
    }

    /// Render the exact bytes placed on the wire.
    pub fn encode(&self) -> String {
        match self {
            Self::Literal(s) => s.clone(),
            Self::Wrapped { cmd, args } if args.is_empty() => format!("AT+{cmd}\r"),
            Self::Wrapped { cmd, args } => format!("AT+{cmd}={}\r", args.join(",")),
        }
    }
}

/// A parsed AT-command response (spec §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtResponse {
    /// `+ok` with no payload.
    Void,
    /// `+ok=value`, already trimmed.
    Scalar(String),
    /// `+ok=a,b,c`, split on `,`.
    List(Vec<String>),
    /// `+ERR=<code>`.
    Error(i32),
}

/// Strip the `+ok`/`+ok=` prefix and the `\r\n\r\n` suffix, trim, and split
/// on `,` when more than one value is present. `+ERR=<code>` responses parse
/// to [`AtResponse::Error`] regardless of `expect_list`.
pub fn decode_at_response(raw: &str) -> Result<AtResponse> {
    let body = raw.trim_end_matches("\r\n\r\n").trim();

    if let Some(rest) = body.strip_prefix("+ERR") {
        let code_str = rest.trim_start_matches('=').trim();
        let code: i32 = code_str
            .parse()
            .map_err(|_| UfoError::protocol(format!("unparseable AT error code: {rest:?}")))?;
        return Ok(AtResponse::Error(code));
    }

    let body = body
        .strip_prefix("+ok")
        .ok_or_else(|| UfoError::protocol(format!("unrecognized AT response: {raw:?}")))?;

    let payload = body.strip_prefix('=').unwrap_or(body).trim();
    if payload.is_empty() {
        return Ok(AtResponse::Void);
    }

    if payload.contains(',') {
        Ok(AtResponse::List(
            payload.split(',').map(|s| s.trim().to_string()).collect(),
        ))
    } else {
        Ok(AtResponse::Scalar(payload.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CustomMode;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn frame_invariant_holds_for_arbitrary_payloads() {
        for payload in [&b""[..], &b"\x31\x00\x00\x00\x00\x00"[..], &b"\x61\x26\x19"[..]] {
            let f = frame(payload);
            assert_eq!(f.len(), payload.len() + 2);
            assert_eq!(f[f.len() - 2], LOCAL_FLAG);
            assert!(frame_checksum_holds(&f));
        }
    }

    #[test]
    fn power_constants_match_spec() {
        assert_eq!(POWER_ON, [0x71, 0x23, 0x0F, 0xA3]);
        assert_eq!(POWER_OFF, [0x71, 0x24, 0x0F, 0xA4]);
        assert_eq!(STATUS_REQUEST, [0x81, 0x8A, 0x8B, 0x96]);
    }

    #[test]
    fn rgbw_clamp_scenario() {
        let f = encode_color(256, -1, 256, -1);
        assert_eq!(hex(&f), "31 FF 00 FF 00 00 0F 3E");
    }

    #[test]
    fn builtin_encode_scenario() {
        let f = encode_builtin(Builtin::RedGradualChange, 75).unwrap();
        assert_eq!(hex(&f), "61 26 19 0F AF");

        let f = encode_builtin(Builtin::RedGradualChange, 101).unwrap();
        assert_eq!(hex(&f), "61 26 00 0F 96");
    }

    #[test]
    fn builtin_rejects_reserved_selection() {
        assert!(encode_builtin(Builtin::NoFunction, 0).is_err());
        assert!(encode_builtin(Builtin::PostReset, 0).is_err());
    }

    #[test]
    fn custom_padding_and_strip_scenario() {
        let steps = [
            NULL_STEP,
            RgbStep { red: 255, green: 0, blue: 0 },
            RgbStep { red: 0, green: 255, blue: 0 },
            RgbStep { red: 0, green: 0, blue: 255 },
        ];
        let f = encode_custom(CustomMode::Strobe, 30, &steps);
        assert_eq!(f.len(), 70);

        let payload = &f[1..f.len() - 2]; // skip leading 0x51, trailing flag+checksum
        let step_bytes = &payload[0..16 * 4];
        assert_eq!(
            hex(&step_bytes[0..12]),
            "FF 00 00 00 00 FF 00 00 00 00 FF 00"
        );
        for chunk in step_bytes[12..].chunks(4) {
            assert_eq!(hex(chunk), "01 02 03 00");
        }
        let tail = &payload[16 * 4..];
        assert_eq!(hex(tail), "01 3C FF");
        assert_eq!(hex(&f[f.len() - 2..]), "0F E7");
    }

    #[test]
    fn status_decode_static_scenario() {
        let bytes = [
            0x81, 0x04, 0x23, 0x61, 0x21, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0x03, 0x00, 0x00, 0x29,
        ];
        let status = decode_status(&bytes).unwrap();
        assert!(status.on);
        assert_eq!(status.mode, Mode::Static);
        assert_eq!(status.speed, None);
        assert_eq!((status.red, status.green, status.blue, status.white), (255, 255, 255, 255));
    }

    #[test]
    fn status_decode_function_scenario() {
        let mut bytes = [
            0x81, 0x04, 0x23, 0x25, 0x21, 0x00, 0x10, 0x20, 0x30, 0x40, 0x03, 0x00, 0x00, 0x00,
        ];
        let sum = checksum(&bytes[0..13]);
        bytes[13] = sum;
        let status = decode_status(&bytes).unwrap();
        assert_eq!(status.mode, Mode::Function("sevenColorCrossFade".to_string()));
        assert_eq!(status.speed, Some(100));
    }

    #[test]
    fn status_decode_rejects_bad_header_and_checksum() {
        let mut bytes = [0u8; 14];
        bytes[0] = 0x00;
        assert!(decode_status(&bytes).is_err());

        bytes[0] = 0x81;
        bytes[2] = 0x23;
        bytes[3] = 0x61;
        bytes[13] = 0xFF; // deliberately wrong
        assert!(decode_status(&bytes).is_err());
    }

    #[test]
    fn builtin_speed_round_trip() {
        for s in [-10, 0, 1, 50, 99, 100, 150] {
            let f = encode_builtin(Builtin::RedGradualChange, s).unwrap();
            let wire_speed = f[2];
            let decoded = (100i32 - wire_speed as i32).clamp(0, 100);
            assert_eq!(decoded, s.clamp(0, 100));
        }
    }

    #[test]
    fn custom_speed_round_trip() {
        for s in [-5, 0, 1, 15, 29, 30, 99] {
            let f = encode_custom(CustomMode::Gradual, s, &[]);
            let wire_speed = f[f.len() - 4];
            let decoded = 30i32.saturating_sub(wire_speed as i32 - 1).clamp(0, 30);
            assert_eq!(decoded, s.clamp(0, 30));
        }
    }

    #[test]
    fn at_request_encoding() {
        assert_eq!(AtRequest::literal("HF-A11ASSISTHREAD").encode(), "HF-A11ASSISTHREAD");
        assert_eq!(AtRequest::literal("+ok").encode(), "+ok");
        assert_eq!(AtRequest::get("VER").encode(), "AT+VER\r");
        assert_eq!(
            AtRequest::set("NTPSER", vec!["1.2.3.4".to_string()]).encode(),
            "AT+NTPSER=1.2.3.4\r"
        );
    }

    #[test]
    fn at_response_decoding() {
        assert_eq!(decode_at_response("+ok\r\n\r\n").unwrap(), AtResponse::Void);
        assert_eq!(
            decode_at_response("+ok=1.2.3.4\r\n\r\n").unwrap(),
            AtResponse::Scalar("1.2.3.4".to_string())
        );
        assert_eq!(
            decode_at_response("+ok=a,b,c\r\n\r\n").unwrap(),
            AtResponse::List(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
        assert_eq!(decode_at_response("+ERR=-4\r\n\r\n").unwrap(), AtResponse::Error(-4));
    }

    #[test]
    fn mode_display_matches_spec_textual_form() {
        assert_eq!(Mode::Static.to_string(), "static");
        assert_eq!(Mode::Custom.to_string(), "custom");
        assert_eq!(Mode::Other.to_string(), "other");
        assert_eq!(
            Mode::Function("sevenColorCrossFade".to_string()).to_string(),
            "function:sevenColorCrossFade"
        );
    }

    #[test]
    fn time_sync_frame_layout() {
        let f = encode_time_sync(2026, 8, 1, 12, 30, 0);
        assert_eq!(f[0], 0x10);
        assert_eq!(u16::from_le_bytes([f[1], f[2]]), 2026);
        assert_eq!(&f[3..], &[8, 1, 12, 30, 0, 0x07, 0x00]);
    }
}
