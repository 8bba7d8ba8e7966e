//! XMPP addresses (RFC 7622).
//!
//! Only the structural rules are enforced: separator handling, part lengths,
//! the localpart's forbidden characters and bracketed IPv6 domains. PRECIS
//! profile mapping is left to the server.

use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Longest allowed localpart, domainpart or resourcepart, in bytes.
pub const MAX_PART_LEN: usize = 1023;

const LOCALPART_FORBIDDEN: &[char] = &['"', '&', '\'', '/', ':', '<', '>', '@'];

/// Errors from parsing or building a [`Jid`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JidError {
    #[error("the resourcepart must be larger than 0 bytes")]
    EmptyResource,

    #[error("the localpart must be larger than 0 bytes")]
    EmptyLocalpart,

    #[error("the domainpart must be between 1 and {MAX_PART_LEN} bytes")]
    DomainLength,

    #[error("the {part} must be smaller than {} bytes", MAX_PART_LEN + 1)]
    TooLong { part: &'static str },

    #[error("the localpart contains forbidden character {0:?}")]
    ForbiddenCharacter(char),

    #[error("the domainpart is not a valid IPv6 address")]
    InvalidIpv6,
}

/// An XMPP address: `[localpart@]domainpart[/resourcepart]`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Jid {
    local: Option<String>,
    domain: String,
    resource: Option<String>,
}

impl Jid {
    /// Parse a JID from its string form.
    ///
    /// The string is split on the first `/` and then on the first `@`, before
    /// any other processing. A trailing `.` on the domainpart is dropped and
    /// the domainpart is lowercased.
    pub fn parse(s: &str) -> Result<Self, JidError> {
        let (head, resource) = match s.split_once('/') {
            Some((_, "")) => return Err(JidError::EmptyResource),
            Some((head, resource)) => (head, Some(resource)),
            None => (s, None),
        };

        let (local, domain) = match head.split_once('@') {
            Some(("", _)) => return Err(JidError::EmptyLocalpart),
            Some((local, domain)) => (Some(local), domain),
            None => (None, head),
        };

        Self::new(local, domain, resource)
    }

    /// Build a JID from its parts, applying the same checks as [`Jid::parse`].
    pub fn new(
        local: Option<&str>,
        domain: &str,
        resource: Option<&str>,
    ) -> Result<Self, JidError> {
        let domain = domain.strip_suffix('.').unwrap_or(domain);

        if let Some(local) = local {
            if local.is_empty() {
                return Err(JidError::EmptyLocalpart);
            }
            if local.len() > MAX_PART_LEN {
                return Err(JidError::TooLong { part: "localpart" });
            }
            if let Some(c) = local.chars().find(|c| LOCALPART_FORBIDDEN.contains(c)) {
                return Err(JidError::ForbiddenCharacter(c));
            }
        }

        if let Some(resource) = resource {
            if resource.is_empty() {
                return Err(JidError::EmptyResource);
            }
            if resource.len() > MAX_PART_LEN {
                return Err(JidError::TooLong {
                    part: "resourcepart",
                });
            }
        }

        if domain.is_empty() || domain.len() > MAX_PART_LEN {
            return Err(JidError::DomainLength);
        }
        if let Some(inner) = domain
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
        {
            inner
                .parse::<Ipv6Addr>()
                .map_err(|_| JidError::InvalidIpv6)?;
        }

        Ok(Self {
            local: local.map(str::to_string),
            domain: domain.to_lowercase(),
            resource: resource.map(str::to_string),
        })
    }

    pub fn localpart(&self) -> Option<&str> {
        self.local.as_deref()
    }

    pub fn domainpart(&self) -> &str {
        &self.domain
    }

    pub fn resourcepart(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// Whether this JID has no resourcepart.
    pub fn is_bare(&self) -> bool {
        self.resource.is_none()
    }

    /// The JID without its resourcepart.
    pub fn bare(&self) -> Jid {
        Jid {
            local: self.local.clone(),
            domain: self.domain.clone(),
            resource: None,
        }
    }

    /// The same account with the given resourcepart.
    pub fn with_resource(&self, resource: &str) -> Result<Jid, JidError> {
        Jid::new(self.localpart(), &self.domain, Some(resource))
    }

    /// Whether `other` is addressed by this JID.
    ///
    /// A bare JID matches every resource of the same account; a full JID
    /// only matches itself.
    pub fn matches(&self, other: &Jid) -> bool {
        if self.is_bare() {
            self.local == other.local && self.domain == other.domain
        } else {
            self == other
        }
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(local) = &self.local {
            write!(f, "{local}@")?;
        }
        f.write_str(&self.domain)?;
        if let Some(resource) = &self.resource {
            write!(f, "/{resource}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Jid").field(&self.to_string()).finish()
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Jid::parse(s)
    }
}

impl TryFrom<String> for Jid {
    type Error = JidError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Jid::parse(&s)
    }
}

impl From<Jid> for String {
    fn from(jid: Jid) -> Self {
        jid.to_string()
    }
}
