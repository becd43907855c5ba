//! Configuration file and key material parsing
//!
//! Config files hold one `NAME=VALUE` setting per line, using the same names
//! as the environment:
//!
//! ```text
//! # salty tunnel to the office
//! PROTOCOL=salty
//! REMOTE_ADDRESS=198.51.100.7
//! PRIVATE_KEY_FILE=/etc/salttun/office.key
//! ```

use std::path::Path;

use super::MapSource;
use crate::crypto::x25519::KEY_LEN;
use crate::error::ConfigError;

/// Parse a configuration file from disk
pub fn parse_config_file<P: AsRef<Path>>(path: P) -> Result<MapSource, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound {
                path: path.display().to_string(),
            }
        } else {
            ConfigError::Io(e)
        }
    })?;
    parse_config_str(&content)
}

/// Parse configuration from a string
pub fn parse_config_str(content: &str) -> Result<MapSource, ConfigError> {
    let mut source = MapSource::new();

    for (line_num, line) in content.lines().enumerate() {
        let line_num = line_num + 1; // 1-indexed
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((name, value)) = line.split_once('=') else {
            return Err(ConfigError::ParseError {
                line: line_num,
                message: format!("Expected 'NAME=VALUE', got: {}", line),
            });
        };

        let name = name.trim();
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(ConfigError::ParseError {
                line: line_num,
                message: format!("Invalid setting name: {}", name),
            });
        }

        source.insert(name, unquote(value.trim()));
    }

    Ok(source)
}

/// Strip one pair of matching surrounding quotes
fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Parse a hex-encoded 32-byte key
pub fn parse_hex_key(value: &str, field_name: &str) -> Result<[u8; KEY_LEN], ConfigError> {
    let value = value.trim();
    if value.len() != 2 * KEY_LEN {
        return Err(ConfigError::InvalidKey {
            field: field_name.to_string(),
        });
    }

    let bytes = hex::decode(value).map_err(|_| ConfigError::InvalidKey {
        field: field_name.to_string(),
    })?;

    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Load a private key file: either 32 raw bytes or 64 hex characters
pub fn load_private_key<P: AsRef<Path>>(path: P) -> Result<[u8; KEY_LEN], ConfigError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound {
                path: path.display().to_string(),
            }
        } else {
            ConfigError::Io(e)
        }
    })?;

    if bytes.len() == KEY_LEN {
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        return Ok(key);
    }

    let text = std::str::from_utf8(&bytes).map_err(|_| ConfigError::InvalidKey {
        field: "PRIVATE_KEY_FILE".to_string(),
    })?;
    parse_hex_key(text, "PRIVATE_KEY_FILE")
}
