//! Client library for LEDENET-style WiFi RGBW "UFO" lighting controllers.
//!
//! A device exposes two coexisting channels: a broadcast-capable UDP
//! AT-command channel for configuration and discovery ([`udp`], [`discovery`])
//! and a binary TCP channel for real-time light output ([`tcp`]). A
//! [`session::DeviceSession`] owns one of each for a single device and
//! presents them as one coherent, fail-together unit.
//!
//! ```no_run
//! # async fn run() -> wifi_ufo::error::Result<()> {
//! use wifi_ufo::session::{DeviceSession, DeviceSessionConfig};
//!
//! let config = DeviceSessionConfig::new("192.168.1.50".parse().unwrap());
//! let session = DeviceSession::connect(config).await?;
//! session.set_color(255, 0, 128, 0).await?;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod discovery;
pub mod error;
pub mod session;
pub mod tcp;
pub mod udp;
pub mod validate;
pub mod wire;

#[cfg(feature = "cli")]
pub mod cli;

pub use error::{Result, UfoError};
pub use session::{DeviceSession, DeviceSessionConfig};
pub use udp::DeviceIdentity;
