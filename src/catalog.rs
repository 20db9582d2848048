//! Process-wide read-only protocol tables: the builtin function catalog, the
//! custom-program mode bytes, and the null-step sentinel (spec §3).

/// A builtin lighting function, as selectable through [`crate::wire::encode_builtin`]
/// or reported back in a decoded status frame.
///
/// `NoFunction` and `PostReset` are reserved: they are never constructed by a
/// caller selecting a function, only observed in decoded status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Builtin {
    SevenColorCrossFade,
    RedGradualChange,
    GreenGradualChange,
    BlueGradualChange,
    YellowGradualChange,
    CyanGradualChange,
    PurpleGradualChange,
    WhiteGradualChange,
    RedGreenCrossFade,
    RedBlueCrossFade,
    GreenBlueCrossFade,
    SevenColorStrobeFlash,
    RedStrobeFlash,
    GreenStrobeFlash,
    BlueStrobeFlash,
    YellowStrobeFlash,
    CyanStrobeFlash,
    PurpleStrobeFlash,
    WhiteStrobeFlash,
    SevenColorJumpingChange,
    /// Reserved: freeze-in-place only, never caller-selectable.
    NoFunction,
    /// Reserved: internal post-reset marker, never caller-selectable.
    PostReset,
}

/// `(name, wire byte, variant)` table, ordered by wire byte. This is the
/// single source of truth for name<->byte lookups in both directions.
const TABLE: &[(&str, u8, Builtin)] = &[
    ("sevenColorCrossFade", 0x25, Builtin::SevenColorCrossFade),
    ("redGradualChange", 0x26, Builtin::RedGradualChange),
    ("greenGradualChange", 0x27, Builtin::GreenGradualChange),
    ("blueGradualChange", 0x28, Builtin::BlueGradualChange),
    ("yellowGradualChange", 0x29, Builtin::YellowGradualChange),
    ("cyanGradualChange", 0x2A, Builtin::CyanGradualChange),
    ("purpleGradualChange", 0x2B, Builtin::PurpleGradualChange),
    ("whiteGradualChange", 0x2C, Builtin::WhiteGradualChange),
    ("redGreenCrossFade", 0x2D, Builtin::RedGreenCrossFade),
    ("redBlueCrossFade", 0x2E, Builtin::RedBlueCrossFade),
    ("greenBlueCrossFade", 0x2F, Builtin::GreenBlueCrossFade),
    ("sevenColorStrobeFlash", 0x30, Builtin::SevenColorStrobeFlash),
    ("redStrobeFlash", 0x31, Builtin::RedStrobeFlash),
    ("greenStrobeFlash", 0x32, Builtin::GreenStrobeFlash),
    ("blueStrobeFlash", 0x33, Builtin::BlueStrobeFlash),
    ("yellowStrobeFlash", 0x34, Builtin::YellowStrobeFlash),
    ("cyanStrobeFlash", 0x35, Builtin::CyanStrobeFlash),
    ("purpleStrobeFlash", 0x36, Builtin::PurpleStrobeFlash),
    ("whiteStrobeFlash", 0x37, Builtin::WhiteStrobeFlash),
    (
        "sevenColorJumpingChange",
        0x38,
        Builtin::SevenColorJumpingChange,
    ),
    ("noFunction", 0x61, Builtin::NoFunction),
    ("postReset", 0x63, Builtin::PostReset),
];

impl Builtin {
    /// Look up a builtin by its symbolic name (spec §3 catalog). Callers are
    /// expected to reject `noFunction`/`postReset` themselves if selection
    /// (as opposed to display) is being performed; see [`Builtin::is_reserved`].
    pub fn from_name(name: &str) -> Option<Self> {
        TABLE.iter().find(|(n, _, _)| *n == name).map(|(_, _, v)| *v)
    }

    /// Look up a builtin by its wire byte, as seen in a decoded status frame.
    pub fn from_byte(byte: u8) -> Option<Self> {
        TABLE.iter().find(|(_, b, _)| *b == byte).map(|(_, _, v)| *v)
    }

    /// The wire byte identifying this function.
    pub fn byte(self) -> u8 {
        TABLE.iter().find(|(_, _, v)| *v == self).unwrap().1
    }

    /// The symbolic name used in the API and in decoded `function:<name>` modes.
    pub fn name(self) -> &'static str {
        TABLE.iter().find(|(_, _, v)| *v == self).unwrap().0
    }

    /// `noFunction` and `postReset` may appear in decoded status but must
    /// never be accepted as a caller's selection.
    pub fn is_reserved(self) -> bool {
        matches!(self, Self::NoFunction | Self::PostReset)
    }
}

/// The three custom-program playback modes (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum CustomMode {
    Gradual,
    Jumping,
    Strobe,
}

impl CustomMode {
    pub fn byte(self) -> u8 {
        match self {
            Self::Gradual => 0x3A,
            Self::Jumping => 0x3B,
            Self::Strobe => 0x3C,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x3A => Some(Self::Gradual),
            0x3B => Some(Self::Jumping),
            0x3C => Some(Self::Strobe),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Gradual => "gradual",
            Self::Jumping => "jumping",
            Self::Strobe => "strobe",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "gradual" => Some(Self::Gradual),
            "jumping" => Some(Self::Jumping),
            "strobe" => Some(Self::Strobe),
            _ => None,
        }
    }
}

/// An RGB triple used in a custom program step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RgbStep {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

/// The sentinel step used to pad a custom program to 16 steps; never
/// transmitted mid-sequence (spec §3, §4.1).
pub const NULL_STEP: RgbStep = RgbStep {
    red: 1,
    green: 2,
    blue: 3,
};

/// A custom step list always has exactly this many 4-byte records on the wire.
pub const CUSTOM_STEP_COUNT: usize = 16;
