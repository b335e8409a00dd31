use bson::{Bson, DateTime, Document};
use serde::Serialize;

use crate::{
    Error,
    error::Result,
    lifecycle::{
        CREATED_FIELD, CreatedStamp, DELETED_FIELD, LifecyclePolicy, MODIFIED_FIELD,
        OperationContext,
    },
};

const OPERATOR_MARKER: char = '$';
const SET: &str = "$set";
const CURRENT_DATE: &str = "$currentDate";
const SET_ON_INSERT: &str = "$setOnInsert";
const RENAME: &str = "$rename";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateStyle {
    /// `{ field: value, .. }`, an implicit `$set`.
    Fields,
    /// `{ $op: { field: operand }, .. }`.
    Operators,
}

/// A caller-supplied update, not yet classified.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateSpec(Document);

impl UpdateSpec {
    pub fn new(document: Document) -> Self {
        Self(document)
    }

    /// Serializes a model or a partial struct into a field-style update.
    pub fn from_value<S: Serialize>(value: &S) -> Result<Self> {
        Ok(Self(bson::to_document(value)?))
    }

    pub fn document(&self) -> &Document {
        &self.0
    }

    /// Classifies the top-level keys. An empty update counts as operator-style
    /// with no operators.
    pub fn style(&self) -> Result<UpdateStyle> {
        let (mut fields, mut operators) = (false, false);
        for key in self.0.keys() {
            if key.starts_with(OPERATOR_MARKER) {
                operators = true;
            } else {
                fields = true;
            }
        }
        match (fields, operators) {
            (true, true) => Err(Error::MixedUpdate),
            (true, false) => Ok(UpdateStyle::Fields),
            _ => Ok(UpdateStyle::Operators),
        }
    }
}

impl From<Document> for UpdateSpec {
    fn from(document: Document) -> Self {
        Self(document)
    }
}

/// Normalizes update specs into one update document and is the only writer
/// of lifecycle fields on the update path.
#[derive(Clone, Copy, Debug)]
pub struct UpdateCompiler {
    policy: LifecyclePolicy,
}

impl UpdateCompiler {
    pub fn new(policy: LifecyclePolicy) -> Self {
        Self { policy }
    }

    /// `now` is only written by `$setOnInsert`; every other timestamp is
    /// left to the engine through `$currentDate`.
    pub fn compile(
        &self,
        spec: &UpdateSpec,
        context: OperationContext,
        now: DateTime,
    ) -> Result<Document> {
        let (mut update, mut set) = match spec.style()? {
            UpdateStyle::Fields => (Document::new(), spec.0.clone()),
            UpdateStyle::Operators => {
                let mut update = spec.0.clone();
                let set = match update.remove(SET) {
                    Some(set) => into_bucket(SET, set)?,
                    None => Document::new(),
                };
                (update, set)
            }
        };

        self.strip_owned(SET, &mut set);
        let mut operators = Document::new();
        for (operator, operand) in update {
            let mut bucket = into_bucket(&operator, operand)?;
            self.strip_owned(&operator, &mut bucket);
            if !bucket.is_empty() {
                operators.insert(operator, bucket);
            }
        }
        update = operators;

        if !set.is_empty() {
            update.insert(SET, set);
        }

        if self.policy.is_active() {
            let mut current_date = match update.remove(CURRENT_DATE) {
                Some(current_date) => into_bucket(CURRENT_DATE, current_date)?,
                None => Document::new(),
            };
            if self.policy.tracks_modified() {
                current_date.insert(MODIFIED_FIELD, true);
            }
            if self.policy.tracks_deleted() && context.soft_delete {
                current_date.insert(DELETED_FIELD, true);
            }
            if self.policy.tracks_created() && context.created == CreatedStamp::Restamp {
                current_date.insert(CREATED_FIELD, true);
            }
            if !current_date.is_empty() {
                update.insert(CURRENT_DATE, current_date);
            }
        }

        if self.policy.tracks_created() && context.created == CreatedStamp::OnInsert {
            let mut set_on_insert = match update.remove(SET_ON_INSERT) {
                Some(set_on_insert) => into_bucket(SET_ON_INSERT, set_on_insert)?,
                None => Document::new(),
            };
            set_on_insert.insert(CREATED_FIELD, now);
            update.insert(SET_ON_INSERT, set_on_insert);
        }

        if update.is_empty() {
            return Err(Error::EmptyUpdate);
        }
        log::debug!("compiled update: {}", update);
        Ok(update)
    }

    fn strip_owned(&self, operator: &str, bucket: &mut Document) {
        for field in self.policy.owned_fields() {
            if bucket.remove(field).is_some() {
                log::warn!(
                    "ignoring caller write to {field} in {operator}; the repository manages it"
                );
            }
        }
        if operator == RENAME {
            let targets: Vec<String> = bucket
                .iter()
                .filter(|(_, target)| {
                    matches!(target, Bson::String(target) if self.policy.owns(target))
                })
                .map(|(source, _)| source.clone())
                .collect();
            for source in targets {
                log::warn!("ignoring rename of {source} onto a managed field");
                bucket.remove(&source);
            }
        }
    }
}

fn into_bucket(operator: &str, operand: Bson) -> Result<Document> {
    match operand {
        Bson::Document(bucket) => Ok(bucket),
        _ => Err(Error::InvalidUpdate(operator.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn compile(
        policy: LifecyclePolicy,
        spec: Document,
        context: OperationContext,
    ) -> Result<Document> {
        UpdateCompiler::new(policy).compile(
            &UpdateSpec::new(spec),
            context,
            DateTime::from_millis(0),
        )
    }

    #[test]
    fn mixed_styles_are_rejected() {
        let err = compile(
            LifecyclePolicy::none(),
            doc! { "name": "x", "$inc": { "count": 1 } },
            OperationContext::update(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::MixedUpdate));
    }

    #[test]
    fn field_style_becomes_set() {
        let update = compile(
            LifecyclePolicy::none(),
            doc! { "name": "pump", "enabled": true },
            OperationContext::update(),
        )
        .unwrap();
        assert_eq!(update, doc! { "$set": { "name": "pump", "enabled": true } });
    }

    #[test]
    fn operator_style_passes_other_operators_through() {
        let update = compile(
            LifecyclePolicy::new(false, true, false),
            doc! { "$inc": { "count": 1 }, "$set": { "name": "pump" } },
            OperationContext::update(),
        )
        .unwrap();
        assert_eq!(
            update,
            doc! {
                "$inc": { "count": 1 },
                "$set": { "name": "pump" },
                "$currentDate": { "modified": true },
            }
        );
    }

    #[test]
    fn lifecycle_fields_are_never_caller_controlled() {
        let update = compile(
            LifecyclePolicy::all(),
            doc! {
                "$set": { "created": 1, "modified": 2, "deleted": 3 },
                "$unset": { "deleted": "" },
                "$currentDate": { "created": true, "deleted": true },
                "$rename": { "legacy": "created", "old": "new" },
            },
            OperationContext::update(),
        )
        .unwrap();
        assert_eq!(
            update,
            doc! {
                "$rename": { "old": "new" },
                "$currentDate": { "modified": true },
            }
        );
    }

    #[test]
    fn empty_set_is_omitted() {
        let update = compile(
            LifecyclePolicy::new(false, true, false),
            doc! { "modified": "forged" },
            OperationContext::update(),
        )
        .unwrap();
        assert_eq!(update, doc! { "$currentDate": { "modified": true } });
        assert!(!update.contains_key("$set"));
    }

    #[test]
    fn soft_delete_stamps_deleted() {
        let update = compile(
            LifecyclePolicy::all(),
            Document::new(),
            OperationContext::soft_delete(),
        )
        .unwrap();
        assert_eq!(
            update,
            doc! { "$currentDate": { "modified": true, "deleted": true } }
        );
    }

    #[test]
    fn upsert_stamps_created_on_insert_only() {
        let update = compile(
            LifecyclePolicy::all(),
            doc! { "name": "pump", "created": "forged" },
            OperationContext::upsert(),
        )
        .unwrap();
        assert_eq!(
            update,
            doc! {
                "$set": { "name": "pump" },
                "$currentDate": { "modified": true },
                "$setOnInsert": { "created": DateTime::from_millis(0) },
            }
        );
    }

    #[test]
    fn plain_update_never_stamps_created() {
        let update = compile(
            LifecyclePolicy::new(true, false, false),
            doc! { "name": "pump" },
            OperationContext::update(),
        )
        .unwrap();
        assert_eq!(update, doc! { "$set": { "name": "pump" } });
    }

    #[test]
    fn restamp_is_explicit() {
        let update = compile(
            LifecyclePolicy::new(true, false, false),
            doc! { "name": "pump" },
            OperationContext::restamp_created(),
        )
        .unwrap();
        assert_eq!(
            update,
            doc! { "$set": { "name": "pump" }, "$currentDate": { "created": true } }
        );
    }

    #[test]
    fn malformed_operand_and_empty_update() {
        assert!(matches!(
            compile(LifecyclePolicy::none(), doc! { "$set": 1 }, OperationContext::update()),
            Err(Error::InvalidUpdate(op)) if op == "$set"
        ));
        assert!(matches!(
            compile(LifecyclePolicy::none(), Document::new(), OperationContext::update()),
            Err(Error::EmptyUpdate)
        ));
    }
}
