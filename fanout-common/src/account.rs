use std::fmt::{self, Debug, Display};

use serde::{Deserialize, Serialize};

/// How the connection to an account's relay is secured
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityMode {
    /// TLS from the first byte (usually port 465)
    Implicit,
    /// Plain connection upgraded with `STARTTLS` (usually port 587)
    #[default]
    StartTls,
    /// No transport security. Only sensible for local relays and tests.
    None,
}

impl Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Implicit => "implicit-tls",
            Self::StartTls => "starttls",
            Self::None => "none",
        })
    }
}

/// One outbound sending identity.
///
/// `identity` is the login user and doubles as the `From` address. It must be
/// unique within a pool.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub identity: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub security: SecurityMode,
    /// Display name used in the `From` header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Account {
    pub fn new(identity: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            identity: identity.into(),
            host: host.into(),
            port,
            secret: String::new(),
            security: SecurityMode::default(),
            display_name: None,
        }
    }

    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    #[must_use]
    pub const fn with_security(mut self, security: SecurityMode) -> Self {
        self.security = security;
        self
    }

    /// `true` when the relay expects `AUTH`
    #[inline]
    pub const fn has_credentials(&self) -> bool {
        !self.secret.is_empty()
    }
}

// The secret must never end up in logs.
impl Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("identity", &self.identity)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secret", &"<redacted>")
            .field("security", &self.security)
            .field("display_name", &self.display_name)
            .finish()
    }
}

impl Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.identity, self.host, self.port)
    }
}
