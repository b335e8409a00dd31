use bson::Bson;

/// A declarative filter. Combinators hold ordered children; leaves name one
/// top-level field and an operator.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Nor(Vec<Condition>),
    Field { name: String, op: Operator },
}

/// Leaf operators. Operands are passed to the engine untouched.
#[derive(Clone, Debug, PartialEq)]
pub enum Operator {
    Eq(Bson),
    Neq(Bson),
    Gt(Bson),
    Gte(Bson),
    Lt(Bson),
    Lte(Bson),
    Inq(Vec<Bson>),
    Nin(Vec<Bson>),
    Between(Bson, Bson),
    Exists(bool),
    Like(String),
    NLike(String),
    ILike(String),
    NILike(String),
    Regexp { pattern: String, options: String },
    Not(Box<Operator>),
}

impl Default for Condition {
    fn default() -> Self {
        Condition::all()
    }
}

impl Condition {
    /// The empty tree; matches every document.
    pub fn all() -> Self {
        Condition::And(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Condition::And(children) | Condition::Or(children) | Condition::Nor(children) => {
                children.is_empty()
            }
            Condition::Field { .. } => false,
        }
    }

    /// Conjunction of `self` and `other`, skipping empty sides.
    pub fn and(self, other: Condition) -> Condition {
        match (self.is_empty(), other.is_empty()) {
            (true, _) => other,
            (_, true) => self,
            _ => Condition::And(vec![self, other]),
        }
    }

    pub fn or(self, other: Condition) -> Condition {
        Condition::Or(vec![self, other])
    }
}

pub fn and(conditions: impl IntoIterator<Item = Condition>) -> Condition {
    Condition::And(conditions.into_iter().collect())
}

pub fn or(conditions: impl IntoIterator<Item = Condition>) -> Condition {
    Condition::Or(conditions.into_iter().collect())
}

pub fn nor(conditions: impl IntoIterator<Item = Condition>) -> Condition {
    Condition::Nor(conditions.into_iter().collect())
}

/// Starts a leaf condition on `name`.
pub fn field(name: impl Into<String>) -> FieldCondition {
    FieldCondition { name: name.into() }
}

pub struct FieldCondition {
    name: String,
}

impl FieldCondition {
    #[inline]
    pub fn op(self, op: Operator) -> Condition {
        Condition::Field {
            name: self.name,
            op,
        }
    }

    pub fn eq(self, value: impl Into<Bson>) -> Condition {
        self.op(Operator::Eq(value.into()))
    }

    pub fn neq(self, value: impl Into<Bson>) -> Condition {
        self.op(Operator::Neq(value.into()))
    }

    pub fn gt(self, value: impl Into<Bson>) -> Condition {
        self.op(Operator::Gt(value.into()))
    }

    pub fn gte(self, value: impl Into<Bson>) -> Condition {
        self.op(Operator::Gte(value.into()))
    }

    pub fn lt(self, value: impl Into<Bson>) -> Condition {
        self.op(Operator::Lt(value.into()))
    }

    pub fn lte(self, value: impl Into<Bson>) -> Condition {
        self.op(Operator::Lte(value.into()))
    }

    pub fn inq<V: Into<Bson>>(self, values: impl IntoIterator<Item = V>) -> Condition {
        self.op(Operator::Inq(values.into_iter().map(Into::into).collect()))
    }

    pub fn nin<V: Into<Bson>>(self, values: impl IntoIterator<Item = V>) -> Condition {
        self.op(Operator::Nin(values.into_iter().map(Into::into).collect()))
    }

    /// Inclusive on both ends.
    pub fn between(self, low: impl Into<Bson>, high: impl Into<Bson>) -> Condition {
        self.op(Operator::Between(low.into(), high.into()))
    }

    pub fn exists(self, exists: bool) -> Condition {
        self.op(Operator::Exists(exists))
    }

    pub fn like(self, pattern: impl Into<String>) -> Condition {
        self.op(Operator::Like(pattern.into()))
    }

    pub fn nlike(self, pattern: impl Into<String>) -> Condition {
        self.op(Operator::NLike(pattern.into()))
    }

    pub fn ilike(self, pattern: impl Into<String>) -> Condition {
        self.op(Operator::ILike(pattern.into()))
    }

    pub fn nilike(self, pattern: impl Into<String>) -> Condition {
        self.op(Operator::NILike(pattern.into()))
    }

    pub fn regexp(self, pattern: impl Into<String>, options: impl Into<String>) -> Condition {
        self.op(Operator::Regexp {
            pattern: pattern.into(),
            options: options.into(),
        })
    }

    pub fn not(self, op: Operator) -> Condition {
        self.op(Operator::Not(Box::new(op)))
    }
}
