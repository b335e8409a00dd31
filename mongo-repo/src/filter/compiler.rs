use bson::{Bson, Document, doc};

use crate::{
    Error,
    error::Result,
    filter::{
        Condition, Filter, Operator,
        options::{CompiledOptions, CompiledQuery, QueryOptions},
    },
    schema::SchemaIndex,
};

/// Translates condition trees into native query documents, resolving every
/// field reference against one schema. Holds no state of its own.
#[derive(Clone, Copy, Debug)]
pub struct FilterCompiler<'a> {
    schema: &'a SchemaIndex,
}

impl<'a> FilterCompiler<'a> {
    pub fn new(schema: &'a SchemaIndex) -> Self {
        Self { schema }
    }

    pub fn compile(&self, filter: &Filter) -> Result<CompiledQuery> {
        let query = self.compile_condition(&filter.condition)?;
        let options = self.compile_options(&filter.options)?;
        log::debug!("compiled {} filter: {} {:?}", self.schema.model(), query, options);
        Ok(CompiledQuery { query, options })
    }

    pub fn compile_condition(&self, condition: &Condition) -> Result<Document> {
        match condition {
            Condition::And(children) => self.combine("$and", children),
            Condition::Or(children) => self.combine("$or", children),
            Condition::Nor(children) => self.combine("$nor", children),
            Condition::Field { name, op } => {
                let info = self.schema.resolve(name)?;
                let mut leaf = Document::new();
                leaf.insert(info.storage_name.clone(), compile_operator(op));
                Ok(leaf)
            }
        }
    }

    fn combine(&self, operator: &str, children: &[Condition]) -> Result<Document> {
        if children.is_empty() {
            return Ok(Document::new());
        }
        let compiled = children
            .iter()
            .map(|child| self.compile_condition(child).map(Bson::Document))
            .collect::<Result<Vec<_>>>()?;
        let mut combined = Document::new();
        combined.insert(operator, compiled);
        Ok(combined)
    }

    pub fn compile_options(&self, options: &QueryOptions) -> Result<CompiledOptions> {
        let skip = options
            .skip
            .map(|skip| {
                u64::try_from(skip).map_err(|_| {
                    Error::InvalidPagination(format!("skip must be non-negative, got {skip}"))
                })
            })
            .transpose()?;
        if let Some(limit) = options.limit.filter(|limit| *limit < 0) {
            return Err(Error::InvalidPagination(format!(
                "limit must be non-negative, got {limit}"
            )));
        }

        let sort = if options.order.is_empty() {
            None
        } else {
            let mut sort = Document::new();
            for order in &options.order {
                let info = self.schema.resolve(&order.field)?;
                // 同一字段重复排序时以第一次出现为准
                if sort.contains_key(&info.storage_name) {
                    log::debug!("ignoring repeated sort on {}", order.field);
                    continue;
                }
                sort.insert(info.storage_name.clone(), order.direction.as_i32());
            }
            Some(sort)
        };

        let projection = if options.fields.is_empty() {
            None
        } else {
            let include = options.fields[0].1;
            let mut projection = Document::new();
            for (name, included) in &options.fields {
                if *included != include {
                    return Err(Error::MixedProjection);
                }
                let info = self.schema.resolve(name)?;
                projection.insert(info.storage_name.clone(), i32::from(include));
            }
            Some(projection)
        };

        Ok(CompiledOptions {
            sort,
            skip,
            limit: options.limit,
            projection,
        })
    }
}

fn compile_operator(op: &Operator) -> Document {
    match op {
        Operator::Eq(value) => doc! { "$eq": value.clone() },
        Operator::Neq(value) => doc! { "$ne": value.clone() },
        Operator::Gt(value) => doc! { "$gt": value.clone() },
        Operator::Gte(value) => doc! { "$gte": value.clone() },
        Operator::Lt(value) => doc! { "$lt": value.clone() },
        Operator::Lte(value) => doc! { "$lte": value.clone() },
        Operator::Inq(values) => doc! { "$in": values.clone() },
        Operator::Nin(values) => doc! { "$nin": values.clone() },
        Operator::Between(low, high) => doc! { "$gte": low.clone(), "$lte": high.clone() },
        Operator::Exists(exists) => doc! { "$exists": *exists },
        Operator::Like(pattern) => regex(pattern, ""),
        Operator::ILike(pattern) => regex(pattern, "i"),
        Operator::NLike(pattern) => doc! { "$not": regex(pattern, "") },
        Operator::NILike(pattern) => doc! { "$not": regex(pattern, "i") },
        Operator::Regexp { pattern, options } => regex(pattern, options),
        Operator::Not(inner) => doc! { "$not": compile_operator(inner) },
    }
}

fn regex(pattern: &str, options: &str) -> Document {
    let mut document = doc! { "$regex": pattern };
    if !options.is_empty() {
        document.insert("$options", options);
    }
    document
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        filter::{Direction, and, field, or},
        model::FieldDescriptor,
    };

    fn schema() -> SchemaIndex {
        SchemaIndex::build(
            "Asset",
            &[
                FieldDescriptor::new("id", "_id", "Option<ObjectId>"),
                FieldDescriptor::new("name", "name", "Option<String>"),
                FieldDescriptor::new("type", "type", "Option<String>"),
                FieldDescriptor::new("referenceId", "reference_id", "Option<String>"),
                FieldDescriptor::new("dataTTL", "dataTTL", "Option<f64>"),
                FieldDescriptor::new("config", "_config", "Option<AssetConfig>"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn empty_tree_matches_everything() {
        let schema = schema();
        let compiled = FilterCompiler::new(&schema).compile(&Filter::all()).unwrap();
        assert_eq!(compiled.query, Document::new());
        assert_eq!(compiled.options, CompiledOptions::default());

        let empty_or = FilterCompiler::new(&schema)
            .compile_condition(&or([]))
            .unwrap();
        assert_eq!(empty_or, Document::new());
    }

    #[test]
    fn leaves_map_to_native_operators() {
        let schema = schema();
        let compiler = FilterCompiler::new(&schema);
        let condition = and([
            field("name").like("^pump"),
            field("referenceId").inq(["a", "b"]),
            field("dataTTL").between(1.0, 10.0),
            field("type").not(Operator::Eq("sensor".into())),
            field("name").nilike("test"),
        ]);
        assert_eq!(
            compiler.compile_condition(&condition).unwrap(),
            doc! {
                "$and": [
                    { "name": { "$regex": "^pump" } },
                    { "reference_id": { "$in": ["a", "b"] } },
                    { "dataTTL": { "$gte": 1.0, "$lte": 10.0 } },
                    { "type": { "$not": { "$eq": "sensor" } } },
                    { "name": { "$not": { "$regex": "test", "$options": "i" } } }
                ]
            }
        );
    }

    #[test]
    fn nested_reference_fails_anywhere_in_tree() {
        let schema = schema();
        let compiler = FilterCompiler::new(&schema);
        let deep = or([
            field("name").eq("a"),
            and([field("type").eq("b"), field("config.status").exists(true)]),
        ]);
        let err = compiler.compile(&Filter::new(deep)).unwrap_err();
        assert!(matches!(err, Error::NestedField(ref path) if path == "config.status"));
        assert_eq!(err.to_string(), "can not query on nested fields: config.status");
    }

    #[test]
    fn unknown_field_aborts() {
        let schema = schema();
        let err = FilterCompiler::new(&schema)
            .compile(&Filter::new(field("nope").eq(1)))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownField(_)));
    }

    #[test]
    fn compilation_is_deterministic() {
        let schema = schema();
        let filter = Filter::new(or([
            field("name").eq("x"),
            field("dataTTL").gt(3),
            field("id").exists(true),
        ]))
        .order("name", Direction::Asc)
        .order("dataTTL", Direction::Desc)
        .skip(1)
        .limit(2)
        .include("name");
        let first = FilterCompiler::new(&schema).compile(&filter).unwrap();
        let second = FilterCompiler::new(&schema).compile(&filter).unwrap();
        assert_eq!(
            bson::to_vec(&first.query).unwrap(),
            bson::to_vec(&second.query).unwrap()
        );
        assert_eq!(first, second);
    }

    #[test]
    fn options_resolve_storage_names_in_order() {
        let schema = schema();
        let filter = Filter::all()
            .order("referenceId", Direction::Desc)
            .order("name", Direction::Asc)
            .skip(5)
            .limit(0)
            .exclude("config")
            .exclude("referenceId");
        let compiled = FilterCompiler::new(&schema).compile(&filter).unwrap();
        let sort = compiled.options.sort.unwrap();
        assert_eq!(sort.keys().collect::<Vec<_>>(), ["reference_id", "name"]);
        assert_eq!(sort, doc! { "reference_id": -1, "name": 1 });
        assert_eq!(compiled.options.skip, Some(5));
        assert_eq!(compiled.options.limit, Some(0));
        assert_eq!(
            compiled.options.projection,
            Some(doc! { "_config": 0, "reference_id": 0 })
        );
    }

    #[test]
    fn repeated_sort_field_keeps_first_direction() {
        let schema = schema();
        let filter = Filter::all()
            .order("name", Direction::Asc)
            .order("referenceId", Direction::Desc)
            .order("name", Direction::Desc)
            .order("reference_id", Direction::Asc);
        let compiled = FilterCompiler::new(&schema).compile(&filter).unwrap();
        assert_eq!(
            compiled.options.sort,
            Some(doc! { "name": 1, "reference_id": -1 })
        );
    }

    #[test]
    fn rejects_negative_pagination_and_mixed_projection() {
        let schema = schema();
        let compiler = FilterCompiler::new(&schema);
        assert!(matches!(
            compiler.compile(&Filter::all().skip(-1)),
            Err(Error::InvalidPagination(_))
        ));
        assert!(matches!(
            compiler.compile(&Filter::all().limit(-3)),
            Err(Error::InvalidPagination(_))
        ));
        assert!(matches!(
            compiler.compile(&Filter::all().include("name").exclude("type")),
            Err(Error::MixedProjection)
        ));
    }
}
