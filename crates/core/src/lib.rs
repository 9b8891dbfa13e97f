pub mod error;
pub mod field_value;
pub mod identifiers;
pub mod ids;
pub mod operations;
pub mod record;
pub mod tuple;

pub use error::CoreError;
pub use field_value::FieldValue;
pub use identifiers::{Aci, Pni, ServiceId};
pub use ids::*;
pub use operations::{IdentityOp, JournalEntry};
pub use record::Record;
pub use tuple::IdentityTuple;
