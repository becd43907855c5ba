//! TUN/TAP device abstraction layer
//!
//! Wraps the tun-rs crate. Layer-2 TAP is the default on Linux; TUN_MODE
//! selects a layer-3 TUN device. Addresses and routes are left to the
//! TUN_UP_SCRIPT.

use std::ops::Deref;

use async_trait::async_trait;
use tokio::process::Command;
use tun_rs::{AsyncDevice, DeviceBuilder};

use crate::config::TunnelSettings;
use crate::error::{SaltTunError, TunnelError};

/// A virtual network device the session driver relays packets for
#[async_trait]
pub trait TunnelDevice: Send + Sync {
    /// Interface name
    fn name(&self) -> &str;

    /// Read one packet
    async fn read(&self, buf: &mut [u8]) -> Result<usize, SaltTunError>;

    /// Write one packet
    async fn write(&self, packet: &[u8]) -> Result<usize, SaltTunError>;
}

/// Async TUN/TAP device
pub struct TunDevice {
    /// The underlying async device
    device: AsyncDevice,
    /// Device name (e.g., "tap0", "tun0", "utun5")
    name: String,
}

/// Device framing once platform limits are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DeviceLayout {
    /// Layer-3 TUN instead of layer-2 TAP
    tun: bool,
    /// Prefix packets with the 4-byte packet information header
    packet_information: bool,
}

impl DeviceLayout {
    fn from_settings(settings: &TunnelSettings) -> Self {
        let linux = cfg!(target_os = "linux");
        if !linux && !settings.tun_mode {
            tracing::warn!("TAP mode is only available on Linux, creating a TUN device");
        }
        if !linux && settings.use_pi {
            tracing::warn!("USE_PI is only honoured on Linux, packets carry no packet information");
        }

        Self {
            tun: settings.tun_mode || !linux,
            packet_information: settings.use_pi && linux,
        }
    }
}

impl TunDevice {
    /// Create the device described by the settings
    pub fn create(settings: &TunnelSettings) -> Result<Self, SaltTunError> {
        // Check for required privileges first
        check_privileges()?;

        let layout = DeviceLayout::from_settings(settings);

        let mut builder = DeviceBuilder::new();
        if let Some(name) = &settings.interface {
            builder = builder.name(name);
        }

        #[cfg(target_os = "linux")]
        {
            let layer = if layout.tun {
                tun_rs::Layer::L3
            } else {
                tun_rs::Layer::L2
            };
            builder = builder
                .layer(layer)
                .packet_information(layout.packet_information);
        }

        let device = builder.build_async().map_err(|e| TunnelError::CreateFailed {
            reason: e.to_string(),
        })?;

        let name = device.deref().name().map_err(|e| TunnelError::CreateFailed {
            reason: format!("Failed to get device name: {}", e),
        })?;

        tracing::info!(
            "Created {} device: {}{}",
            if layout.tun { "TUN" } else { "TAP" },
            name,
            if layout.packet_information {
                " (with packet information)"
            } else {
                ""
            }
        );

        Ok(Self { device, name })
    }
}

#[async_trait]
impl TunnelDevice for TunDevice {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, SaltTunError> {
        self.device.recv(buf).await.map_err(|e| {
            TunnelError::ReadFailed {
                reason: e.to_string(),
            }
            .into()
        })
    }

    async fn write(&self, packet: &[u8]) -> Result<usize, SaltTunError> {
        self.device.send(packet).await.map_err(|e| {
            TunnelError::WriteFailed {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

/// Run TUN_UP_SCRIPT through the shell once the device exists
///
/// The device name is exported as INTERFACE. A non-zero exit is logged;
/// failure to spawn the shell is an error.
pub async fn run_up_script(script: &str, interface: &str) -> Result<(), SaltTunError> {
    tracing::info!("Running TUN_UP_SCRIPT for {}", interface);

    let status = Command::new("sh")
        .arg("-c")
        .arg(script)
        .env("INTERFACE", interface)
        .status()
        .await
        .map_err(|e| TunnelError::UpScriptFailed {
            reason: e.to_string(),
        })?;

    if !status.success() {
        tracing::warn!("TUN_UP_SCRIPT exited with {}", status);
    }
    Ok(())
}

/// Check for required privileges to create TUN devices
fn check_privileges() -> Result<(), SaltTunError> {
    #[cfg(unix)]
    {
        // On Unix, we need root or CAP_NET_ADMIN
        if unsafe { libc::geteuid() } != 0 {
            #[cfg(target_os = "linux")]
            {
                // Device creation fails with a clear error if the capability is missing
                tracing::warn!("Running without root. Device creation may fail.");
                tracing::warn!("Either run with sudo or grant CAP_NET_ADMIN:");
                tracing::warn!("  sudo setcap cap_net_admin=eip ./salttun");
            }

            #[cfg(target_os = "macos")]
            {
                return Err(TunnelError::InsufficientPrivileges {
                    message: "Root privileges required on macOS. Run with sudo.".to_string(),
                }
                .into());
            }
        }
    }

    Ok(())
}
