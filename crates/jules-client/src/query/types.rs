use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySource {
    Sessions,
    Activities,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    Eq(Value),
    Neq(Value),
    Gt(Value),
    Lt(Value),
    Gte(Value),
    Lte(Value),
    Contains(String),
    In(Vec<Value>),
    Exists(bool),
}

#[derive(Debug, Clone)]
pub struct WhereClause {
    /// dot-path (or the special key `search`) to filter operator.
    pub field: String,
    pub op: FilterOp,
}

#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub from: Option<QuerySource>,
    pub select: Vec<String>,
    pub where_clauses: Vec<WhereClause>,
    pub order: Option<Order>,
    pub limit: Option<i64>,
    pub offset: Option<usize>,
    pub start_after: Option<String>,
    pub start_at: Option<String>,
}
