//! Access policy for portal resources.
//!
//! Every entry point resolves the caller into an [`Actor`] and asks
//! [`authorize`] before touching data. Session handling itself lives outside
//! this crate.

use crate::error::{PortalError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    AccountRep,
    Client,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "admin" => Some(Role::Admin),
            "account_rep" | "accountrep" | "rep" => Some(Role::AccountRep),
            "client" => Some(Role::Client),
            _ => None,
        }
    }
}

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: Role,
    /// GA properties the caller is assigned to (own for clients, book of business for reps)
    pub ga_property_ids: HashSet<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: id.into(), role, ga_property_ids: HashSet::new() }
    }

    pub fn with_properties<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ga_property_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    fn is_assigned(&self, ga_property_id: &str) -> bool {
        self.ga_property_ids.contains(ga_property_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource<'a> {
    GaProperty(&'a str),
    Campaigns,
    RecipientSync,
    LlmQueries,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
    Delete,
    Execute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

pub fn authorize(actor: &Actor, resource: Resource<'_>, action: Action) -> Decision {
    use Action::*;
    use Resource::*;

    let allowed = match (actor.role, resource, action) {
        (Role::Admin, _, _) => true,

        (Role::AccountRep, GaProperty(id), Read | Write) => actor.is_assigned(id),
        (Role::AccountRep, GaProperty(_), Delete | Execute) => false,
        (Role::AccountRep, Campaigns, Read) => true,
        (Role::AccountRep, RecipientSync, Execute) => true,
        (Role::AccountRep, LlmQueries, Read | Write) => true,
        (Role::AccountRep, _, _) => false,

        (Role::Client, GaProperty(id), Read) => actor.is_assigned(id),
        (Role::Client, LlmQueries, Read | Write) => true,
        (Role::Client, _, _) => false,
    };

    if allowed {
        Decision::Allow
    } else {
        Decision::Deny(format!("{:?} {} may not {:?} {:?}", actor.role, actor.id, action, resource))
    }
}

/// [`authorize`] as a `Result`, for use with `?`.
pub fn ensure(actor: &Actor, resource: Resource<'_>, action: Action) -> Result<()> {
    match authorize(actor, resource, action) {
        Decision::Allow => Ok(()),
        Decision::Deny(reason) => Err(PortalError::Forbidden(reason)),
    }
}
