//! Typed views over a [`ConfigSource`]

use std::str::FromStr;

use super::parser::{load_private_key, parse_hex_key};
use super::ConfigSource;
use crate::crypto::x25519::{self, KEY_LEN};
use crate::error::ConfigError;

/// UDP port used when LOCAL_PORT / REMOTE_PORT are not set
pub const DEFAULT_PORT: u16 = 2998;

/// Parse an optional setting with `FromStr`
pub(crate) fn lookup_parsed<T: FromStr>(
    source: &dyn ConfigSource,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match source.lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
    }
}

/// Interpret a numeric flag the way `atoi(value) != 0` would for sane input
fn lookup_flag(source: &dyn ConfigSource, key: &str) -> Result<bool, ConfigError> {
    Ok(lookup_parsed::<i64>(source, key)?.unwrap_or(0) != 0)
}

/// Long-term identity keys shared by the keyed protocols
#[derive(Clone)]
pub struct IdentityKeys {
    /// The peer's long-term public key (PUBLIC_KEY)
    pub peer_public: [u8; KEY_LEN],
    /// Our long-term private key (PRIVATE_KEY or PRIVATE_KEY_FILE)
    pub private: [u8; KEY_LEN],
}

impl IdentityKeys {
    /// Load PUBLIC_KEY and PRIVATE_KEY / PRIVATE_KEY_FILE
    pub fn load(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let peer_public = source
            .lookup("PUBLIC_KEY")
            .ok_or(ConfigError::MissingField {
                field: "PUBLIC_KEY".to_string(),
            })
            .and_then(|value| parse_hex_key(&value, "PUBLIC_KEY"))?;

        let private = if let Some(value) = source.lookup("PRIVATE_KEY") {
            parse_hex_key(&value, "PRIVATE_KEY")?
        } else if let Some(path) = source.lookup("PRIVATE_KEY_FILE") {
            load_private_key(path)?
        } else {
            return Err(ConfigError::MissingField {
                field: "PRIVATE_KEY".to_string(),
            });
        };

        Ok(Self {
            peer_public,
            private,
        })
    }

    /// Our own long-term public key
    pub fn own_public(&self) -> [u8; KEY_LEN] {
        x25519::public_key(&self.private)
    }

    /// The ROLE override, if configured
    pub fn role_override(source: &dyn ConfigSource) -> Result<Option<bool>, ConfigError> {
        Ok(lookup_parsed::<i64>(source, "ROLE")?.map(|role| role != 0))
    }
}

impl std::fmt::Debug for IdentityKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeys")
            .field("peer_public", &hex::encode(self.peer_public))
            .finish_non_exhaustive()
    }
}

/// Device and socket settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSettings {
    /// Device name (INTERFACE)
    pub interface: Option<String>,
    /// Layer-3 TUN instead of layer-2 TAP (TUN_MODE)
    pub tun_mode: bool,
    /// Packet information header (USE_PI, TUN mode only)
    pub use_pi: bool,
    /// Command run once the device exists (TUN_UP_SCRIPT)
    pub up_script: Option<String>,
    /// Local bind address (LOCAL_ADDRESS)
    pub local_address: Option<String>,
    /// Local bind port (LOCAL_PORT)
    pub local_port: u16,
    /// Remote address (REMOTE_ADDRESS)
    pub remote_address: Option<String>,
    /// Remote port (REMOTE_PORT)
    pub remote_port: u16,
    /// Follow the peer's source address (REMOTE_FLOAT)
    pub remote_float: bool,
    /// Verbose logging (DEBUG)
    pub debug: bool,
}

impl TunnelSettings {
    /// Read all device and socket settings
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let tun_mode = lookup_flag(source, "TUN_MODE")?;
        let use_pi = tun_mode && lookup_flag(source, "USE_PI")?;

        Ok(Self {
            interface: source.lookup("INTERFACE").filter(|s| !s.is_empty()),
            tun_mode,
            use_pi,
            up_script: source.lookup("TUN_UP_SCRIPT").filter(|s| !s.is_empty()),
            local_address: source.lookup("LOCAL_ADDRESS").filter(|s| !s.is_empty()),
            local_port: lookup_parsed(source, "LOCAL_PORT")?.unwrap_or(DEFAULT_PORT),
            remote_address: source.lookup("REMOTE_ADDRESS").filter(|s| !s.is_empty()),
            remote_port: lookup_parsed(source, "REMOTE_PORT")?.unwrap_or(DEFAULT_PORT),
            remote_float: source.is_set("REMOTE_FLOAT"),
            debug: source.is_set("DEBUG"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapSource;

    #[test]
    fn test_defaults() {
        let settings = TunnelSettings::from_source(&MapSource::new()).unwrap();

        assert_eq!(settings.local_port, DEFAULT_PORT);
        assert_eq!(settings.remote_port, DEFAULT_PORT);
        assert!(!settings.tun_mode);
        assert!(!settings.use_pi);
        assert!(!settings.remote_float);
        assert!(settings.remote_address.is_none());
    }

    #[test]
    fn test_use_pi_requires_tun_mode() {
        let tap = MapSource::new().with("USE_PI", "1");
        assert!(!TunnelSettings::from_source(&tap).unwrap().use_pi);

        let tun = MapSource::new().with("USE_PI", "1").with("TUN_MODE", "1");
        let settings = TunnelSettings::from_source(&tun).unwrap();
        assert!(settings.tun_mode);
        assert!(settings.use_pi);
    }

    #[test]
    fn test_invalid_port() {
        let source = MapSource::new().with("LOCAL_PORT", "seventy");
        assert!(matches!(
            TunnelSettings::from_source(&source),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_identity_keys() {
        let source = MapSource::new()
            .with("PUBLIC_KEY", "11".repeat(32))
            .with("PRIVATE_KEY", "22".repeat(32));

        let keys = IdentityKeys::load(&source).unwrap();
        assert_eq!(keys.peer_public, [0x11; 32]);
        assert_eq!(keys.private, [0x22; 32]);
        assert_eq!(keys.own_public(), x25519::public_key(&[0x22; 32]));
    }

    #[test]
    fn test_identity_keys_missing() {
        let no_public = MapSource::new().with("PRIVATE_KEY", "22".repeat(32));
        assert!(matches!(
            IdentityKeys::load(&no_public),
            Err(ConfigError::MissingField { .. })
        ));

        let no_private = MapSource::new().with("PUBLIC_KEY", "11".repeat(32));
        assert!(matches!(
            IdentityKeys::load(&no_private),
            Err(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn test_role_override() {
        assert_eq!(IdentityKeys::role_override(&MapSource::new()).unwrap(), None);
        let one = MapSource::new().with("ROLE", "1");
        assert_eq!(IdentityKeys::role_override(&one).unwrap(), Some(true));
        let zero = MapSource::new().with("ROLE", "0");
        assert_eq!(IdentityKeys::role_override(&zero).unwrap(), Some(false));
    }
}
