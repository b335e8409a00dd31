mod compiler;
mod condition;
mod options;

pub use compiler::FilterCompiler;
pub use condition::{Condition, FieldCondition, Operator, and, field, nor, or};
pub use options::{CompiledOptions, CompiledQuery, Direction, Order, QueryOptions};

/// A condition tree with its query options, as accepted by the repository.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    pub condition: Condition,
    pub options: QueryOptions,
}

impl Filter {
    pub fn new(condition: Condition) -> Self {
        Self {
            condition,
            options: QueryOptions::default(),
        }
    }

    /// Matches every document.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn order(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.options.order.push(Order {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn skip(mut self, skip: i64) -> Self {
        self.options.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.options.limit = Some(limit);
        self
    }

    pub fn include(mut self, field: impl Into<String>) -> Self {
        self.options.fields.push((field.into(), true));
        self
    }

    pub fn exclude(mut self, field: impl Into<String>) -> Self {
        self.options.fields.push((field.into(), false));
        self
    }
}

impl From<Condition> for Filter {
    fn from(condition: Condition) -> Self {
        Filter::new(condition)
    }
}
