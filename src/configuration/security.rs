//! Connection security settings.
//!
//! Supports the Kafka security protocols and SASL mechanisms, and renders
//! them as client settings.
//!
//! # Example
//!
//! ```rust
//! use ksession::configuration::security::{SecurityProtocol, SaslMechanism};
//!
//! let protocol: SecurityProtocol = "sasl_ssl".parse().unwrap();
//! assert_eq!(protocol.as_str(), "SASL_SSL");
//!
//! let mechanism: SaslMechanism = "scram-sha-512".parse().unwrap();
//! assert_eq!(mechanism.as_str(), "SCRAM-SHA-512");
//! ```

use std::str::FromStr;

use crate::error::ConfigError;

/// Setting keys whose values must never be printed.
pub const SECRET_SETTINGS: &[&str] = &["sasl.password", "ssl.key.password"];

/// Security protocol for Kafka connection.
///
/// Determines how the client connects to Kafka brokers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SecurityProtocol {
    /// No encryption or authentication.
    #[default]
    Plaintext,
    /// TLS encryption without SASL.
    Ssl,
    /// SASL authentication without TLS.
    SaslPlaintext,
    /// SASL authentication with TLS encryption.
    SaslSsl,
}

impl SecurityProtocol {
    /// Returns the Kafka configuration string for this protocol.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plaintext => "PLAINTEXT",
            Self::Ssl => "SSL",
            Self::SaslPlaintext => "SASL_PLAINTEXT",
            Self::SaslSsl => "SASL_SSL",
        }
    }

    /// Returns true when the protocol authenticates with SASL.
    pub fn uses_sasl(&self) -> bool {
        matches!(self, Self::SaslPlaintext | Self::SaslSsl)
    }
}

impl FromStr for SecurityProtocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PLAINTEXT" => Ok(Self::Plaintext),
            "SSL" => Ok(Self::Ssl),
            "SASL_PLAINTEXT" => Ok(Self::SaslPlaintext),
            "SASL_SSL" => Ok(Self::SaslSsl),
            _ => Err(ConfigError::InvalidSecurityProtocol(s.to_string())),
        }
    }
}

/// SASL authentication mechanism.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SaslMechanism {
    /// PLAIN mechanism (username/password in clear text).
    Plain,
    /// SCRAM-SHA-256 mechanism (recommended).
    #[default]
    ScramSha256,
    /// SCRAM-SHA-512 mechanism.
    ScramSha512,
}

impl SaslMechanism {
    /// Returns the Kafka configuration string for this mechanism.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::ScramSha256 => "SCRAM-SHA-256",
            Self::ScramSha512 => "SCRAM-SHA-512",
        }
    }
}

impl FromStr for SaslMechanism {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Ok(Self::Plain),
            "SCRAM-SHA-256" => Ok(Self::ScramSha256),
            "SCRAM-SHA-512" => Ok(Self::ScramSha512),
            _ => Err(ConfigError::InvalidSaslMechanism(s.to_string())),
        }
    }
}

/// SASL credentials and mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslConfig {
    /// Authentication mechanism to use.
    pub mechanism: SaslMechanism,
    /// SASL username.
    pub username: String,
    /// SASL password.
    pub password: String,
}

/// Paths to certificates for TLS connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SslConfig {
    /// Path to CA certificate file.
    pub ca_location: Option<String>,
    /// Path to client certificate file (for mTLS).
    pub certificate_location: Option<String>,
    /// Path to client key file (for mTLS).
    pub key_location: Option<String>,
}

/// Complete connection security settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecuritySettings {
    /// Protocol used to reach the brokers.
    pub protocol: SecurityProtocol,
    /// SASL settings, required for SASL protocols.
    pub sasl: Option<SaslConfig>,
    /// TLS settings.
    pub ssl: Option<SslConfig>,
}

impl SecuritySettings {
    /// Checks that SASL protocols come with credentials.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingConfig` when a SASL protocol is selected
    /// without SASL credentials.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol.uses_sasl() && self.sasl.is_none() {
            return Err(ConfigError::MissingConfig(format!(
                "SASL credentials are required for {}",
                self.protocol.as_str()
            )));
        }
        Ok(())
    }

    /// Appends the client settings for this security configuration.
    pub fn write_settings(&self, settings: &mut Vec<(String, String)>) {
        settings.push((
            "security.protocol".to_string(),
            self.protocol.as_str().to_string(),
        ));

        if let Some(sasl) = &self.sasl {
            settings.push((
                "sasl.mechanism".to_string(),
                sasl.mechanism.as_str().to_string(),
            ));
            settings.push(("sasl.username".to_string(), sasl.username.clone()));
            settings.push(("sasl.password".to_string(), sasl.password.clone()));
        }

        if let Some(ssl) = &self.ssl {
            if let Some(ca) = &ssl.ca_location {
                settings.push(("ssl.ca.location".to_string(), ca.clone()));
            }
            if let Some(cert) = &ssl.certificate_location {
                settings.push(("ssl.certificate.location".to_string(), cert.clone()));
            }
            if let Some(key) = &ssl.key_location {
                settings.push(("ssl.key.location".to_string(), key.clone()));
            }
        }
    }
}

/// Replaces secret setting values with a mask.
pub fn mask_secrets(settings: &[(String, String)]) -> Vec<(String, String)> {
    settings
        .iter()
        .map(|(key, value)| {
            if SECRET_SETTINGS.contains(&key.as_str()) {
                (key.clone(), "********".to_string())
            } else {
                (key.clone(), value.clone())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_security_protocol_as_str() {
        assert_eq!(SecurityProtocol::Plaintext.as_str(), "PLAINTEXT");
        assert_eq!(SecurityProtocol::Ssl.as_str(), "SSL");
        assert_eq!(SecurityProtocol::SaslPlaintext.as_str(), "SASL_PLAINTEXT");
        assert_eq!(SecurityProtocol::SaslSsl.as_str(), "SASL_SSL");
    }

    #[test]
    fn test_security_protocol_parse() {
        assert_eq!(
            "sasl_plaintext".parse::<SecurityProtocol>().unwrap(),
            SecurityProtocol::SaslPlaintext
        );
        assert!(matches!(
            "tls".parse::<SecurityProtocol>(),
            Err(ConfigError::InvalidSecurityProtocol(_))
        ));
    }

    #[test]
    fn test_sasl_mechanism_parse() {
        assert_eq!("PLAIN".parse::<SaslMechanism>().unwrap(), SaslMechanism::Plain);
        assert!(matches!(
            "GSSAPI".parse::<SaslMechanism>(),
            Err(ConfigError::InvalidSaslMechanism(_))
        ));
    }

    #[test]
    fn test_validate_requires_sasl_credentials() {
        let settings = SecuritySettings {
            protocol: SecurityProtocol::SaslSsl,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::MissingConfig(_))
        ));
    }

    #[test]
    fn test_write_settings() {
        let settings = SecuritySettings {
            protocol: SecurityProtocol::SaslSsl,
            sasl: Some(SaslConfig {
                mechanism: SaslMechanism::ScramSha256,
                username: "user".to_string(),
                password: "pass".to_string(),
            }),
            ssl: Some(SslConfig {
                ca_location: Some("/path/to/ca.pem".to_string()),
                ..Default::default()
            }),
        };

        let mut out = Vec::new();
        settings.write_settings(&mut out);
        let map: HashMap<_, _> = out.into_iter().collect();

        assert_eq!(map.get("security.protocol").unwrap(), "SASL_SSL");
        assert_eq!(map.get("sasl.mechanism").unwrap(), "SCRAM-SHA-256");
        assert_eq!(map.get("sasl.username").unwrap(), "user");
        assert_eq!(map.get("sasl.password").unwrap(), "pass");
        assert_eq!(map.get("ssl.ca.location").unwrap(), "/path/to/ca.pem");
        assert!(!map.contains_key("ssl.key.location"));
    }

    #[test]
    fn test_mask_secrets() {
        let settings = vec![
            ("sasl.username".to_string(), "user".to_string()),
            ("sasl.password".to_string(), "pass".to_string()),
        ];
        let masked = mask_secrets(&settings);
        assert_eq!(masked[0].1, "user");
        assert_eq!(masked[1].1, "********");
    }
}
