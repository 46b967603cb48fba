pub mod class;
pub mod code;
pub mod context;
pub mod heap;
pub mod instance;
pub mod layout;
pub mod location;
pub mod special;
pub mod value;

pub use class::Class;
pub use code::{CodeRef, CompiledBlock, CompiledMethod};
pub use context::{ActivationId, ContextState};
pub use heap::{Closure, CodeInfo, Heap, HeapObject, ObjectRef};
pub use instance::{FieldWrite, Instance};
pub use layout::Layout;
pub use location::{FieldKind, Location, Pool, BOOL_POOL_LIMIT, PRIMITIVE_POOL_LIMIT};
pub use special::SpecialObjects;
pub use value::Value;
