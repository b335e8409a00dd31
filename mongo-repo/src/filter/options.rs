use bson::Document;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub(crate) fn as_i32(self) -> i32 {
        match self {
            Direction::Asc => 1,
            Direction::Desc => -1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Order {
    pub field: String,
    pub direction: Direction,
}

/// Sort, pagination and projection as handed over by the filter parser.
/// Integers stay signed here; the compiler rejects negatives.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub order: Vec<Order>,
    pub skip: Option<i64>,
    /// `None` means unbounded.
    pub limit: Option<i64>,
    /// Field name and whether it is included (`true`) or excluded.
    pub fields: Vec<(String, bool)>,
}

/// Native options produced by the compiler, consumed by the driver.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompiledOptions {
    pub sort: Option<Document>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
    pub projection: Option<Document>,
}

/// Native query document plus options.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompiledQuery {
    pub query: Document,
    pub options: CompiledOptions,
}
