use bson::{Bson, DateTime, Document};

use crate::lifecycle::{CREATED_FIELD, DELETED_FIELD, LifecyclePolicy, MODIFIED_FIELD};

/// Stamps lifecycle fields onto a document about to be inserted.
#[derive(Clone, Copy, Debug)]
pub struct InsertCompiler {
    policy: LifecyclePolicy,
}

impl InsertCompiler {
    pub fn new(policy: LifecyclePolicy) -> Self {
        Self { policy }
    }

    pub fn compile(&self, mut document: Document, now: DateTime) -> Document {
        if self.policy.tracks_created() {
            document.insert(CREATED_FIELD, now);
        }
        if self.policy.tracks_modified() {
            document.insert(MODIFIED_FIELD, now);
        }
        // 新文档一律可见
        if self.policy.tracks_deleted() {
            document.insert(DELETED_FIELD, Bson::Null);
        }
        document
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn injects_fields_per_policy() {
        let now = DateTime::from_millis(1_700_000_000_000);
        let document = InsertCompiler::new(LifecyclePolicy::all())
            .compile(doc! { "name": "pump", "created": "forged" }, now);
        assert_eq!(
            document,
            doc! { "name": "pump", "created": now, "modified": now, "deleted": null }
        );
    }

    #[test]
    fn untracked_fields_pass_through() {
        let document = InsertCompiler::new(LifecyclePolicy::none())
            .compile(doc! { "name": "pump", "created": "kept" }, DateTime::now());
        assert_eq!(document, doc! { "name": "pump", "created": "kept" });
    }
}
