pub mod entity;
pub mod error;
pub mod model;

pub use entity::{Entity, EntityKind, PropValue};
pub use error::{RegistryError, RegistryResult};
pub use model::{AttrType, Attribute, GroupModel, Model, ResourceModel};
