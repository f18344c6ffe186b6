use std::fmt;

use serde::Serialize;

use super::store::UserStore;

/// An optional store capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Email,
    Lockout,
    Login,
    Password,
    Role,
    SecurityStamp,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::Email,
        Capability::Lockout,
        Capability::Login,
        Capability::Password,
        Capability::Role,
        Capability::SecurityStamp,
    ];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Email => "email",
            Capability::Lockout => "lockout",
            Capability::Login => "login",
            Capability::Password => "password",
            Capability::Role => "role",
            Capability::SecurityStamp => "security stamp",
        };
        write!(f, "{}", name)
    }
}

/// The set of capabilities a store exposes, detected once when the manager is built
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities(u8);

impl Capabilities {
    pub fn empty() -> Self {
        Self(0)
    }

    /// Ask the store's capability accessors
    pub fn detect(store: &dyn UserStore) -> Self {
        let mut capabilities = Self::empty();
        if store.email_store().is_some() {
            capabilities.insert(Capability::Email);
        }
        if store.lockout_store().is_some() {
            capabilities.insert(Capability::Lockout);
        }
        if store.login_store().is_some() {
            capabilities.insert(Capability::Login);
        }
        if store.password_store().is_some() {
            capabilities.insert(Capability::Password);
        }
        if store.role_store().is_some() {
            capabilities.insert(Capability::Role);
        }
        if store.security_stamp_store().is_some() {
            capabilities.insert(Capability::SecurityStamp);
        }
        capabilities
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0 |= capability.bit();
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.contains(*c))
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut capabilities = Self::empty();
        for capability in iter {
            capabilities.insert(capability);
        }
        capabilities
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|c| c.to_string()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
