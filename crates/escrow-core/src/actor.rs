//! # Actors
//!
//! Every ledger operation is performed by an `Actor`: an identity plus a
//! role. Authentication happens upstream; the engine only decides what an
//! already-identified actor may do.

use serde::{Deserialize, Serialize};

use crate::error::EscrowError;
use crate::identity::PartyId;

/// Coarse role of an actor. Whether a participant acts as buyer or supplier
/// is decided per escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A marketplace user; buyer or supplier depending on the escrow.
    Participant,
    /// Platform operator with override rights.
    Admin,
    /// Dispute mediator.
    Mediator,
    /// The engine itself (scheduler sweeps, gateway callbacks).
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Participant => "participant",
            Self::Admin => "admin",
            Self::Mediator => "mediator",
            Self::System => "system",
        }
    }

    /// Parse a role name, case-insensitively.
    pub fn parse(s: &str) -> Result<Self, EscrowError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "participant" => Ok(Self::Participant),
            "admin" => Ok(Self::Admin),
            "mediator" => Ok(Self::Mediator),
            "system" => Ok(Self::System),
            other => Err(EscrowError::Validation(format!("unknown role: {other:?}"))),
        }
    }

    /// Admins and mediators.
    pub fn is_staff(&self) -> bool {
        matches!(self, Self::Admin | Self::Mediator)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An identified caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: PartyId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: PartyId, role: Role) -> Self {
        Self { id, role }
    }

    pub fn participant(id: PartyId) -> Self {
        Self::new(id, Role::Participant)
    }

    pub fn admin(id: PartyId) -> Self {
        Self::new(id, Role::Admin)
    }

    pub fn mediator(id: PartyId) -> Self {
        Self::new(id, Role::Mediator)
    }

    /// The engine's own identity.
    pub fn system() -> Self {
        Self::new(PartyId::system(), Role::System)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SYSTEM_ACTOR_ID;

    #[test]
    fn test_role_parse_roundtrip() {
        for role in [Role::Participant, Role::Admin, Role::Mediator, Role::System] {
            assert_eq!(Role::parse(role.as_str()).unwrap(), role);
        }
        assert_eq!(Role::parse(" ADMIN ").unwrap(), Role::Admin);
        assert!(Role::parse("root").is_err());
    }

    #[test]
    fn test_staff_roles() {
        assert!(Role::Admin.is_staff());
        assert!(Role::Mediator.is_staff());
        assert!(!Role::Participant.is_staff());
        assert!(!Role::System.is_staff());
    }

    #[test]
    fn test_system_actor() {
        let actor = Actor::system();
        assert_eq!(actor.id.as_str(), SYSTEM_ACTOR_ID);
        assert_eq!(actor.role, Role::System);
    }
}
