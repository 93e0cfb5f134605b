//! Role registry for marketplace parties.
//!
//! Parties self-register; a party may hold several roles globally, but a
//! single model still requires its trainers, validators, buyer and
//! aggregator to be distinct (enforced at model creation).

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{MarketError, MarketResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role { DataOwner, FederatedAggregator, ModelBuyer }

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::DataOwner => "data_owner",
            Role::FederatedAggregator => "federated_aggregator",
            Role::ModelBuyer => "model_buyer",
        }
    }
}

#[derive(Default)]
pub struct RoleRegistry {
    entries: RwLock<HashMap<String, HashSet<Role>>>,
}

impl RoleRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn set_data_owner(&self, caller: &str, party: &str) -> MarketResult<()> { self.register(caller, party, Role::DataOwner) }
    pub fn set_federated_aggregator(&self, caller: &str, party: &str) -> MarketResult<()> { self.register(caller, party, Role::FederatedAggregator) }
    pub fn set_model_buyer(&self, caller: &str, party: &str) -> MarketResult<()> { self.register(caller, party, Role::ModelBuyer) }

    fn register(&self, caller: &str, party: &str, role: Role) -> MarketResult<()> {
        if caller != party {
            return Err(MarketError::unauthorized(caller, "register a role for another party"));
        }
        let inserted = self.entries.write().entry(party.to_string()).or_default().insert(role);
        if inserted { info!(party, role = role.as_str(), "role_registered"); }
        Ok(())
    }

    pub fn has_role(&self, party: &str, role: Role) -> bool {
        self.entries.read().get(party).map(|r| r.contains(&role)).unwrap_or(false)
    }

    pub fn require(&self, party: &str, role: Role, action: &'static str) -> MarketResult<()> {
        if self.has_role(party, role) { Ok(()) } else { Err(MarketError::unauthorized(party, action)) }
    }
}
