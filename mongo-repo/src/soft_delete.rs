use bson::{Bson, DateTime, Document, doc};

use crate::{
    error::Result,
    lifecycle::{DELETED_FIELD, LifecyclePolicy, OperationContext},
    update::{UpdateCompiler, UpdateSpec},
};

/// Hides soft-deleted documents from reads and turns deletes into
/// timestamp updates. Inert unless the policy tracks deletion.
#[derive(Clone, Copy, Debug)]
pub struct SoftDeleteRewriter {
    policy: LifecyclePolicy,
}

impl SoftDeleteRewriter {
    pub fn new(policy: LifecyclePolicy) -> Self {
        Self { policy }
    }

    pub fn is_enabled(&self) -> bool {
        self.policy.tracks_deleted()
    }

    /// Matches documents whose marker is not a genuine timestamp: absent,
    /// null, or anything else.
    pub fn visibility_predicate() -> Document {
        let mut predicate = Document::new();
        predicate.insert(DELETED_FIELD, doc! { "$not": { "$type": "date" } });
        predicate
    }

    pub fn rewrite_query(&self, query: Document) -> Document {
        if !self.is_enabled() {
            return query;
        }
        if query.is_empty() {
            return Self::visibility_predicate();
        }
        let clauses = vec![
            Bson::Document(query),
            Bson::Document(Self::visibility_predicate()),
        ];
        doc! { "$and": clauses }
    }

    /// The update replacing a physical delete, or `None` when deletes stay
    /// physical.
    pub fn rewrite_delete(&self, now: DateTime) -> Result<Option<Document>> {
        if !self.is_enabled() {
            return Ok(None);
        }
        UpdateCompiler::new(self.policy)
            .compile(&UpdateSpec::default(), OperationContext::soft_delete(), now)
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_rewriter_is_identity() {
        let rewriter = SoftDeleteRewriter::new(LifecyclePolicy::new(true, true, false));
        let query = doc! { "name": { "$eq": "a" } };
        assert_eq!(rewriter.rewrite_query(query.clone()), query);
        assert_eq!(rewriter.rewrite_delete(DateTime::now()).unwrap(), None);
    }

    #[test]
    fn queries_are_intersected_with_visibility() {
        let rewriter = SoftDeleteRewriter::new(LifecyclePolicy::all());
        assert_eq!(
            rewriter.rewrite_query(Document::new()),
            doc! { "deleted": { "$not": { "$type": "date" } } }
        );
        assert_eq!(
            rewriter.rewrite_query(doc! { "name": { "$eq": "a" } }),
            doc! {
                "$and": [
                    { "name": { "$eq": "a" } },
                    { "deleted": { "$not": { "$type": "date" } } }
                ]
            }
        );
    }

    #[test]
    fn delete_becomes_timestamp_update() {
        let rewriter = SoftDeleteRewriter::new(LifecyclePolicy::new(false, false, true));
        assert_eq!(
            rewriter.rewrite_delete(DateTime::now()).unwrap(),
            Some(doc! { "$currentDate": { "deleted": true } })
        );
    }
}
