//! Name-to-implementation lookup for the PROTOCOL setting

use std::fmt;
use std::str::FromStr;

use crate::config::ConfigSource;
use crate::error::{ConfigError, Result};
use crate::protocol::nacl0::Nacl0Protocol;
use crate::protocol::nacltai::NaclTaiProtocol;
use crate::protocol::raw::RawProtocol;
use crate::protocol::salty::SaltyProtocol;
use crate::protocol::{Context, Protocol};

/// The protocols this build knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolKind {
    Raw,
    Nacl0,
    NaclTai,
    Salty,
}

/// Used when PROTOCOL is unset but a private key is configured
const KEYED_DEFAULT: ProtocolKind = ProtocolKind::Nacl0;

impl ProtocolKind {
    /// Every registered protocol
    pub const ALL: [ProtocolKind; 4] = [
        ProtocolKind::Raw,
        ProtocolKind::Nacl0,
        ProtocolKind::NaclTai,
        ProtocolKind::Salty,
    ];

    /// Registry name
    pub fn name(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Nacl0 => "nacl0",
            Self::NaclTai => "nacltai",
            Self::Salty => "salty",
        }
    }

    /// Look up a protocol by registry name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Pick the protocol for a configuration
    ///
    /// An explicit PROTOCOL must name a registered protocol. Without one, a
    /// configured private key selects `nacl0`, and otherwise the insecure
    /// `raw` protocol is used.
    pub fn select(source: &dyn ConfigSource) -> std::result::Result<Self, ConfigError> {
        if let Some(name) = source.lookup("PROTOCOL") {
            return Self::from_name(name.trim())
                .ok_or(ConfigError::UnknownProtocol { name });
        }

        if source.is_set("PRIVATE_KEY") || source.is_set("PRIVATE_KEY_FILE") {
            tracing::warn!("PROTOCOL not specified, using {} protocol", KEYED_DEFAULT);
            return Ok(KEYED_DEFAULT);
        }

        tracing::warn!("Neither PROTOCOL nor PRIVATE_KEY specified, using insecure raw protocol");
        Ok(Self::Raw)
    }

    /// Construct and initialise the protocol
    pub fn build(
        self,
        source: &dyn ConfigSource,
        ctx: &mut Context,
    ) -> Result<Box<dyn Protocol>> {
        tracing::info!("Initializing {} protocol...", self);
        Ok(match self {
            Self::Raw => Box::new(RawProtocol::new()),
            Self::Nacl0 => Box::new(Nacl0Protocol::from_config(source)?),
            Self::NaclTai => Box::new(NaclTaiProtocol::from_config(source, ctx)?),
            Self::Salty => Box::new(SaltyProtocol::from_config(source, ctx)?),
        })
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProtocolKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| ConfigError::UnknownProtocol {
            name: s.to_string(),
        })
    }
}
