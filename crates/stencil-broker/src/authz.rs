//! Authorization gate.
//!
//! The engine asks the gate whether a user may perform a verb on a named
//! object of a kind in a namespace. Every check is made for the caller of
//! the current request against the current object.

use std::fmt;

use stencil_core::{AuthzConfig, AuthzRule, DefaultPolicy, UserInfo};
use tracing::{debug, warn};

use crate::error::{BrokerError, BrokerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Create,
    Update,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::Delete => "delete",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The object an authorization check is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceAttributes {
    pub verb: Verb,
    pub kind: String,
    /// Empty for cluster-scoped kinds.
    pub namespace: String,
    pub name: String,
}

impl ResourceAttributes {
    pub fn new(verb: Verb, kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            verb,
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny { reason: String },
}

/// Capability check consulted before every read or write the engine makes
/// on behalf of a user.
pub trait AuthorizationGate: Send + Sync + fmt::Debug {
    fn authorize(&self, user: &UserInfo, attrs: &ResourceAttributes) -> PolicyDecision;
}

/// Allows everything. For development and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AuthorizationGate for AllowAll {
    fn authorize(&self, _user: &UserInfo, _attrs: &ResourceAttributes) -> PolicyDecision {
        PolicyDecision::Allow
    }
}

/// Denies everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl AuthorizationGate for DenyAll {
    fn authorize(&self, _user: &UserInfo, _attrs: &ResourceAttributes) -> PolicyDecision {
        PolicyDecision::Deny {
            reason: "authorization denied (deny-all mode)".to_string(),
        }
    }
}

/// First-match allow rules with a configurable fallback.
#[derive(Debug, Clone, Default)]
pub struct RuleGate {
    rules: Vec<AuthzRule>,
    default: DefaultPolicy,
}

impl RuleGate {
    pub fn new(default: DefaultPolicy) -> Self {
        Self {
            rules: Vec::new(),
            default,
        }
    }

    pub fn from_config(config: &AuthzConfig) -> Self {
        Self {
            rules: config.rules.clone(),
            default: config.default,
        }
    }

    pub fn with_rule(mut self, rule: AuthzRule) -> Self {
        self.rules.push(rule);
        self
    }

    fn rule_matches(rule: &AuthzRule, user: &UserInfo, attrs: &ResourceAttributes) -> bool {
        let subject = (!user.is_anonymous() && matches_any(&rule.users, &user.username))
            || (!user.is_anonymous() && rule.groups.iter().any(|g| g == "*"))
            || user.groups.iter().any(|g| rule.groups.contains(g));
        subject
            && matches_any(&rule.verbs, attrs.verb.as_str())
            && matches_any(&rule.kinds, &attrs.kind)
            && matches_any(&rule.namespaces, &attrs.namespace)
    }
}

fn matches_any(patterns: &[String], value: &str) -> bool {
    patterns.iter().any(|p| p == "*" || p == value)
}

impl AuthorizationGate for RuleGate {
    fn authorize(&self, user: &UserInfo, attrs: &ResourceAttributes) -> PolicyDecision {
        if self
            .rules
            .iter()
            .any(|rule| Self::rule_matches(rule, user, attrs))
        {
            return PolicyDecision::Allow;
        }
        match self.default {
            DefaultPolicy::Allow => PolicyDecision::Allow,
            DefaultPolicy::Deny => PolicyDecision::Deny {
                reason: "no rule grants this access".to_string(),
            },
        }
    }
}

/// Consult the gate and turn a denial into `BrokerError::Forbidden`.
pub fn authorize(
    gate: &dyn AuthorizationGate,
    user: &UserInfo,
    attrs: &ResourceAttributes,
) -> BrokerResult<()> {
    match gate.authorize(user, attrs) {
        PolicyDecision::Allow => {
            debug!(
                user = %user.username,
                verb = %attrs.verb,
                kind = %attrs.kind,
                namespace = %attrs.namespace,
                name = %attrs.name,
                "authorized"
            );
            Ok(())
        }
        PolicyDecision::Deny { reason } => {
            warn!(
                user = %user.username,
                verb = %attrs.verb,
                kind = %attrs.kind,
                namespace = %attrs.namespace,
                name = %attrs.name,
                %reason,
                "authorization denied"
            );
            Err(BrokerError::Forbidden {
                user: user.username.clone(),
                verb: attrs.verb.to_string(),
                kind: attrs.kind.clone(),
                namespace: attrs.namespace.clone(),
                name: attrs.name.clone(),
                reason,
            })
        }
    }
}
