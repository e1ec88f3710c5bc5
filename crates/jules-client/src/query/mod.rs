//! Local Query Engine (JQL): filter/select/order over cached sessions and
//! activities without a round trip to the server.

mod engine;
mod schema;
mod types;

pub use engine::{activity_to_record, run, session_to_record, validate};
pub(crate) use engine::summarize;
pub use schema::{computed_fields, field_kind, is_known_field, FieldKind};
pub use types::{FilterOp, Order, QueryRequest, QuerySource, WhereClause};
