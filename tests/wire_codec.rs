//! Byte-exact integration tests against the public wire codec API, in the
//! style of the teacher's `tests/frame.rs`.

use wifi_ufo::catalog::{Builtin, CustomMode, RgbStep, NULL_STEP};
use wifi_ufo::wire;

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join(" ")
}

#[test]
fn power_and_status_constants() {
    assert_eq!(hex(&wire::POWER_ON), "71 23 0F A3");
    assert_eq!(hex(&wire::POWER_OFF), "71 24 0F A4");
    assert_eq!(hex(&wire::STATUS_REQUEST), "81 8A 8B 96");
}

#[test]
fn rgbw_out_of_range_values_clamp_before_transmission() {
    let frame = wire::encode_color(256, -1, 256, -1);
    assert_eq!(hex(&frame), "31 FF 00 FF 00 00 0F 3E");
}

#[test]
fn builtin_function_select_inverts_speed_and_clamps() {
    let frame = wire::encode_builtin(Builtin::RedGradualChange, 75).unwrap();
    assert_eq!(hex(&frame), "61 26 19 0F AF");

    let frame = wire::encode_builtin(Builtin::RedGradualChange, 150).unwrap();
    assert_eq!(hex(&frame), "61 26 00 0F 96");
}

#[test]
fn custom_program_strips_null_steps_and_pads_to_sixteen() {
    let steps = [
        NULL_STEP,
        RgbStep { red: 255, green: 0, blue: 0 },
        RgbStep { red: 0, green: 255, blue: 0 },
        RgbStep { red: 0, green: 0, blue: 255 },
    ];
    let frame = wire::encode_custom(CustomMode::Strobe, 30, &steps);
    assert_eq!(frame.len(), 70);
    assert_eq!(hex(&frame[frame.len() - 2..]), "0F E7");
}

#[test]
fn status_frame_round_trips_a_static_white_snapshot() {
    let bytes = [
        0x81, 0x04, 0x23, 0x61, 0x21, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0x03, 0x00, 0x00, 0x29,
    ];
    let status = wire::decode_status(&bytes).unwrap();
    assert!(status.on);
    assert_eq!(status.mode.to_string(), "static");
    assert_eq!((status.red, status.green, status.blue, status.white), (255, 255, 255, 255));
}

#[test]
fn status_frame_with_bad_checksum_is_rejected() {
    let bytes = [0x81, 0, 0x23, 0x61, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xFF];
    assert!(wire::decode_status(&bytes).is_err());
}
