//! An archetype-based entity component system.
//!
//! Entities are generational IDs. Their components live in tables, one per
//! distinct set of component types, stored column by column. Systems walk
//! matching tables through a `Query` and defer structural changes to a
//! `CommandBuffer`.

pub use archetype::Signature;
pub use command_buffer::{CommandBuffer, CommandFailure, PendingEntity, RunSummary, Target};
pub use component::{
    Component,
    ComponentRegistration,
    ComponentRegistry,
    ComponentTypeID,
    Teardown,
};
pub use component_data::{Bundle, ComponentValue, ComponentValueRef, IntoBundle};
pub use config::StorageConfig;
pub use entity::{EntityAllocator, EntityID};
pub use error::{Error, Result};
pub use query::{Query, RowMut, RowRef};
pub use storage::{ArchetypeStorage, EntityLocation, EntityMut};
pub use system::{
    BoxSystem,
    ForEach,
    Frame,
    System,
    SystemGroup,
    SystemToken,
};
pub use table::{Table, TableId};

pub mod component;
pub mod component_data;
mod entity;
mod error;
pub mod archetype;

mod config;
pub mod table;
pub mod storage;
pub mod query;

mod command_buffer;

pub mod system;
