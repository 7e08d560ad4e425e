pub mod object;
pub mod ownership;
pub mod shared;

pub use object::{NamespaceFilter, NamespacedName, Object, ObjectKey, ObjectKind};
pub use shared::Shared;
