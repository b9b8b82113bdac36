//! Admission checks for inbound invites, direct messages and calls
//!
//! The gate holds no state of its own. Each check reads a snapshot of the
//! user's `PrivacyPolicy` and the contact view, and runs before anything is
//! created or delivered. Rejections are silent: nothing is echoed back to
//! the sender.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Who may start a direct conversation or send an invite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DmPolicy {
    #[default]
    Everyone,
    /// Only peers already referenced by a room
    ContactsOnly,
}

impl fmt::Display for DmPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DmPolicy::Everyone => write!(f, "everyone"),
            DmPolicy::ContactsOnly => write!(f, "contacts"),
        }
    }
}

impl std::str::FromStr for DmPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "everyone" | "all" => Ok(DmPolicy::Everyone),
            "contacts" | "contacts-only" | "contactsonly" => Ok(DmPolicy::ContactsOnly),
            other => Err(format!("unknown dm policy: {}", other)),
        }
    }
}

/// The user's privacy preferences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyPolicy {
    pub allow_calls: bool,
    pub dm_policy: DmPolicy,
}

impl Default for PrivacyPolicy {
    fn default() -> Self {
        Self {
            allow_calls: true,
            dm_policy: DmPolicy::Everyone,
        }
    }
}

/// Read-only view of which peers count as contacts
pub trait ContactView {
    /// A peer is a contact when any room references it
    fn is_contact(&self, peer_id: &str) -> bool;
}

/// Why the gate turned something away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotAContact,
    CallsDisabled,
}

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Reject(Rejection),
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        self == Admission::Admit
    }
}

fn admit_from(policy: &PrivacyPolicy, contacts: &dyn ContactView, peer_id: &str) -> Admission {
    match policy.dm_policy {
        DmPolicy::Everyone => Admission::Admit,
        DmPolicy::ContactsOnly if contacts.is_contact(peer_id) => Admission::Admit,
        DmPolicy::ContactsOnly => Admission::Reject(Rejection::NotAContact),
    }
}

/// Check an inbound invite against its host
pub fn admit_invite(
    policy: &PrivacyPolicy,
    contacts: &dyn ContactView,
    host_peer_id: &str,
) -> Admission {
    let admission = admit_from(policy, contacts, host_peer_id);
    if !admission.is_admitted() {
        debug!("Invite from {} rejected: not a contact", host_peer_id);
    }
    admission
}

/// Check the first direct message from a peer
pub fn admit_direct_message(
    policy: &PrivacyPolicy,
    contacts: &dyn ContactView,
    sender: &str,
) -> Admission {
    let admission = admit_from(policy, contacts, sender);
    if !admission.is_admitted() {
        debug!("Direct message from {} rejected: not a contact", sender);
    }
    admission
}

/// Check an inbound call offer. Runs before any local media is touched.
pub fn admit_call(policy: &PrivacyPolicy, caller: &str) -> Admission {
    if policy.allow_calls {
        Admission::Admit
    } else {
        debug!("Call from {} rejected: calls disabled", caller);
        Admission::Reject(Rejection::CallsDisabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct Contacts(HashSet<&'static str>);

    impl ContactView for Contacts {
        fn is_contact(&self, peer_id: &str) -> bool {
            self.0.contains(peer_id)
        }
    }

    fn contacts(peers: &[&'static str]) -> Contacts {
        Contacts(peers.iter().copied().collect())
    }

    #[test]
    fn test_default_policy_is_open() {
        let policy = PrivacyPolicy::default();
        assert!(policy.allow_calls);
        assert_eq!(policy.dm_policy, DmPolicy::Everyone);

        let none = contacts(&[]);
        assert!(admit_direct_message(&policy, &none, "turtle-x").is_admitted());
        assert!(admit_invite(&policy, &none, "turtle-x").is_admitted());
        assert!(admit_call(&policy, "turtle-x").is_admitted());
    }

    #[test]
    fn test_contacts_only_rejects_strangers() {
        let policy = PrivacyPolicy {
            allow_calls: true,
            dm_policy: DmPolicy::ContactsOnly,
        };
        let known = contacts(&["turtle-friend"]);

        assert_eq!(
            admit_direct_message(&policy, &known, "turtle-stranger"),
            Admission::Reject(Rejection::NotAContact)
        );
        assert_eq!(
            admit_invite(&policy, &known, "turtle-stranger"),
            Admission::Reject(Rejection::NotAContact)
        );
        assert!(admit_direct_message(&policy, &known, "turtle-friend").is_admitted());
        assert!(admit_invite(&policy, &known, "turtle-friend").is_admitted());
    }

    #[test]
    fn test_calls_disabled() {
        let policy = PrivacyPolicy {
            allow_calls: false,
            dm_policy: DmPolicy::Everyone,
        };
        assert_eq!(
            admit_call(&policy, "turtle-x"),
            Admission::Reject(Rejection::CallsDisabled)
        );
    }

    #[test]
    fn test_dm_policy_parsing() {
        assert_eq!("contacts".parse::<DmPolicy>(), Ok(DmPolicy::ContactsOnly));
        assert_eq!("Everyone".parse::<DmPolicy>(), Ok(DmPolicy::Everyone));
        assert!("friends".parse::<DmPolicy>().is_err());
        assert_eq!(DmPolicy::ContactsOnly.to_string(), "contacts");
    }
}
