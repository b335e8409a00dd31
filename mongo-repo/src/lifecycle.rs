use bson::{Bson, DateTime, Document};

pub const CREATED_FIELD: &str = "created";
pub const MODIFIED_FIELD: &str = "modified";
pub const DELETED_FIELD: &str = "deleted";

/// Which bookkeeping fields a repository owns. Fixed at construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LifecyclePolicy {
    created: bool,
    modified: bool,
    deleted: bool,
}

impl LifecyclePolicy {
    pub const fn new(created: bool, modified: bool, deleted: bool) -> Self {
        Self {
            created,
            modified,
            deleted,
        }
    }

    pub const fn all() -> Self {
        Self::new(true, true, true)
    }

    pub const fn none() -> Self {
        Self::new(false, false, false)
    }

    pub fn tracks_created(&self) -> bool {
        self.created
    }

    pub fn tracks_modified(&self) -> bool {
        self.modified
    }

    pub fn tracks_deleted(&self) -> bool {
        self.deleted
    }

    pub fn is_active(&self) -> bool {
        self.created || self.modified || self.deleted
    }

    /// Fields callers may never write directly.
    pub fn owned_fields(&self) -> impl Iterator<Item = &'static str> {
        [
            (self.created, CREATED_FIELD),
            (self.modified, MODIFIED_FIELD),
            (self.deleted, DELETED_FIELD),
        ]
        .into_iter()
        .filter_map(|(owned, field)| owned.then_some(field))
    }

    pub fn owns(&self, field: &str) -> bool {
        self.owned_fields().any(|owned| owned == field)
    }
}

/// How the creation timestamp is treated by an update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CreatedStamp {
    /// Left untouched.
    #[default]
    Never,
    /// Written only if the update inserts a new document (upsert).
    OnInsert,
    /// Overwritten with the current time on the matched document.
    Restamp,
}

/// The lifecycle transition an update performs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OperationContext {
    pub created: CreatedStamp,
    pub soft_delete: bool,
}

impl OperationContext {
    /// In-place update of existing documents.
    pub fn update() -> Self {
        Self::default()
    }

    /// Update that may take the insert branch.
    pub fn upsert() -> Self {
        Self {
            created: CreatedStamp::OnInsert,
            ..Self::default()
        }
    }

    /// Delete rewritten as a timestamp update.
    pub fn soft_delete() -> Self {
        Self {
            soft_delete: true,
            ..Self::default()
        }
    }

    pub fn restamp_created() -> Self {
        Self {
            created: CreatedStamp::Restamp,
            ..Self::default()
        }
    }
}

/// State of the soft-delete marker of a stored document.
#[derive(Clone, Debug, PartialEq)]
pub enum Deletion {
    /// Field absent or null.
    Live,
    Deleted(DateTime),
    /// Populated with something that is not a timestamp. Still visible.
    Malformed(Bson),
}

impl Deletion {
    pub fn of(document: &Document) -> Self {
        match document.get(DELETED_FIELD) {
            None | Some(Bson::Null) => Deletion::Live,
            Some(Bson::DateTime(at)) => Deletion::Deleted(*at),
            Some(other) => Deletion::Malformed(other.clone()),
        }
    }

    pub fn is_visible(&self) -> bool {
        !matches!(self, Deletion::Deleted(_))
    }

    pub fn deleted_at(&self) -> Option<DateTime> {
        match self {
            Deletion::Deleted(at) => Some(*at),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn owned_fields_follow_toggles() {
        let policy = LifecyclePolicy::new(true, false, true);
        assert_eq!(policy.owned_fields().collect::<Vec<_>>(), ["created", "deleted"]);
        assert!(policy.owns("deleted"));
        assert!(!policy.owns("modified"));
        assert!(!LifecyclePolicy::none().is_active());
    }

    #[test]
    fn deletion_states() {
        let now = DateTime::now();
        assert_eq!(Deletion::of(&doc! {}), Deletion::Live);
        assert_eq!(Deletion::of(&doc! { "deleted": null }), Deletion::Live);
        assert_eq!(Deletion::of(&doc! { "deleted": now }), Deletion::Deleted(now));
        let malformed = Deletion::of(&doc! { "deleted": "yesterday" });
        assert!(malformed.is_visible());
        assert_eq!(malformed.deleted_at(), None);
        assert!(!Deletion::Deleted(now).is_visible());
    }
}
