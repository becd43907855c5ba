//! Configuration lookup for the tunnel
//!
//! Every setting is a named string looked up through a [`ConfigSource`].
//! Sources are layered (command line pairs, a `KEY=VALUE` file, the process
//! environment) and handed to the code that needs them; nothing reads a
//! process-wide accessor.

mod parser;
mod settings;
mod sources;

pub use parser::{load_private_key, parse_config_file, parse_config_str, parse_hex_key};
pub(crate) use settings::lookup_parsed;
pub use settings::{IdentityKeys, TunnelSettings, DEFAULT_PORT};
pub use sources::{EnvSource, IfupdownSource, LayeredSource, MapSource};

/// A key-value configuration provider
pub trait ConfigSource: Send + Sync {
    /// Look up a setting by name
    fn lookup(&self, name: &str) -> Option<String>;

    /// Whether a setting is present at all
    fn is_set(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }
}
