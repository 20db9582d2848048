//! TCP Stream Engine (component C, spec §4.3): the long-lived binary
//! connection, its 14-byte reassembly buffer, and the auto-reconnect policy
//! that distinguishes an idle peer close from a genuine socket fault.

use std::net::IpAddr;

use log::{debug, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::error::{Result, UfoError};
use crate::wire::{decode_status, DeviceStatus, STATUS_REQUEST};

const STATUS_FRAME_LEN: usize = 14;

enum TcpState {
    Connected(TcpStream),
    /// Torn down by a genuine socket fault; never silently resurrected.
    Dead(String),
}

/// Owns a single TCP connection to one device's real-time channel.
pub struct TcpEngine {
    host: IpAddr,
    port: u16,
    immediate: bool,
    state: Mutex<TcpState>,
}

async fn dial(host: IpAddr, port: u16, immediate: bool) -> Result<TcpStream> {
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(immediate)?;
    Ok(stream)
}

impl TcpEngine {
    pub async fn connect(host: IpAddr, port: u16, immediate: bool) -> Result<Self> {
        let stream = dial(host, port, immediate).await?;
        Ok(Self {
            host,
            port,
            immediate,
            state: Mutex::new(TcpState::Connected(stream)),
        })
    }

    /// True once a genuine socket fault has torn this engine down for good.
    pub async fn is_dead(&self) -> bool {
        matches!(&*self.state.lock().await, TcpState::Dead(_))
    }

    /// Force this engine into its dead state, e.g. because the sibling UDP
    /// engine hit a fatal fault and the device session is tearing down both
    /// sides together (spec §4.4/§7). A no-op if already dead.
    pub async fn kill(&self, reason: String) {
        let mut guard = self.state.lock().await;
        if !matches!(&*guard, TcpState::Dead(_)) {
            *guard = TcpState::Dead(reason);
        }
    }

    /// Write a fully-framed command (or one of the three raw constants from
    /// [`crate::wire`]) to the wire. Does not wait for any reply.
    pub async fn send(&self, frame: &[u8]) -> Result<()> {
        let mut guard = self.state.lock().await;
        match &mut *guard {
            TcpState::Connected(stream) => match stream.write_all(frame).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    let err = UfoError::from(e);
                    warn!("tcp write failed, session is now dead: {err}");
                    *guard = TcpState::Dead(err.to_string());
                    Err(err)
                }
            },
            TcpState::Dead(msg) => Err(UfoError::protocol(format!("tcp engine is dead: {msg}"))),
        }
    }

    /// Send a status request and decode the resulting 14-byte frame. Only
    /// one status exchange is in flight at a time (the lock held across the
    /// whole call is what enforces that, mirroring [`crate::udp::UdpEngine`]).
    pub async fn status(&self) -> Result<DeviceStatus> {
        let mut guard = self.state.lock().await;
        self.write_locked(&mut guard, &STATUS_REQUEST).await?;
        let bytes = self.read_status_frame(&mut guard).await?;
        decode_status(&bytes)
    }

    async fn write_locked(&self, guard: &mut TcpState, bytes: &[u8]) -> Result<()> {
        match guard {
            TcpState::Connected(stream) => match stream.write_all(bytes).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    let err = UfoError::from(e);
                    warn!("tcp write failed, session is now dead: {err}");
                    *guard = TcpState::Dead(err.to_string());
                    Err(err)
                }
            },
            TcpState::Dead(msg) => Err(UfoError::protocol(format!("tcp engine is dead: {msg}"))),
        }
    }

    /// Reads into the 14-byte reassembly buffer. A zero-length read with no
    /// prior recorded error is an idle close: the socket is rebuilt
    /// transparently and the read resumes. Any read error is fatal.
    async fn read_status_frame(&self, guard: &mut TcpState) -> Result<[u8; STATUS_FRAME_LEN]> {
        loop {
            let stream = match guard {
                TcpState::Connected(stream) => stream,
                TcpState::Dead(msg) => {
                    return Err(UfoError::protocol(format!("tcp engine is dead: {msg}")))
                }
            };

            let mut buf = [0u8; STATUS_FRAME_LEN];
            let mut index = 0;
            let closed_idle = loop {
                if index >= STATUS_FRAME_LEN {
                    break false;
                }
                match stream.read(&mut buf[index..]).await {
                    Ok(0) => break true,
                    Ok(n) => index += n,
                    Err(e) => {
                        let err = UfoError::from(e);
                        warn!("tcp read failed, session is now dead: {err}");
                        *guard = TcpState::Dead(err.to_string());
                        return Err(err);
                    }
                }
            };

            if closed_idle {
                debug!("tcp peer closed idle connection, reconnecting");
                let fresh = dial(self.host, self.port, self.immediate).await?;
                *guard = TcpState::Connected(fresh);
                continue;
            }

            return Ok(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_on_dead_engine_is_rejected_without_touching_the_wire() {
        let engine = TcpEngine {
            host: "127.0.0.1".parse().unwrap(),
            port: 0,
            immediate: true,
            state: Mutex::new(TcpState::Dead("simulated fault".to_string())),
        };
        let err = engine.send(&[0x71, 0x23, 0x0F, 0xA3]).await.unwrap_err();
        assert!(err.to_string().contains("simulated fault"));
        assert!(engine.is_dead().await);
    }

    #[tokio::test]
    async fn kill_poisons_a_live_engine_and_is_idempotent() {
        let engine = TcpEngine {
            host: "127.0.0.1".parse().unwrap(),
            port: 0,
            immediate: true,
            state: Mutex::new(TcpState::Dead("first reason".to_string())),
        };
        assert!(engine.is_dead().await);
        // killing an already-dead engine must not overwrite the original reason
        engine.kill("second reason".to_string()).await;
        let err = engine.send(&[]).await.unwrap_err();
        assert!(err.to_string().contains("first reason"));
    }
}
