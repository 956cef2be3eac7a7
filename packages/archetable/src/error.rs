//! Errors returned by storage operations.
//!
//! All of these are recoverable: the caller decides whether a failed lookup
//! skips an entity or is a scripting bug. Broken internal invariants are not
//! represented here, they panic.

use crate::command_buffer::PendingEntity;
use crate::entity::EntityID;

/// The error type for entity and component operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The identifier was never issued, has been deleted, or is stale.
    #[error("entity {0:?} is not alive")]
    UnknownEntity(EntityID),

    /// The entity already has a component of this type.
    #[error("entity {entity:?} already has a `{component}` component")]
    DuplicateComponent {
        entity: EntityID,
        component: &'static str,
    },

    /// The entity has no component of this type.
    #[error("entity {entity:?} has no `{component}` component")]
    ComponentNotPresent {
        entity: EntityID,
        component: &'static str,
    },

    /// A command named a pending entity issued by another command buffer,
    /// or by an earlier run of the same one.
    #[error("pending entity {0:?} does not belong to this command buffer run")]
    UnknownPendingEntity(PendingEntity),
}

impl Error {
    /// Return the entity this error refers to, if it had been created.
    pub fn entity(&self) -> Option<EntityID> {
        match self {
            Error::UnknownEntity(entity) => Some(*entity),
            Error::DuplicateComponent { entity, .. } => Some(*entity),
            Error::ComponentNotPresent { entity, .. } => Some(*entity),
            Error::UnknownPendingEntity(_) => None,
        }
    }
}

/// Shorthand for results of storage operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
