mod eval;
mod memory;
mod mongo;

use std::future::Future;

use bson::{Bson, Document};

use crate::{error::Result, filter::CompiledOptions};

pub use memory::MemoryDriver;
pub use mongo::MongoDriver;

/// Counts reported by an update.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
    /// Id of the document created by an upsert, if one was.
    pub upserted_id: Option<Bson>,
}

/// Executes compiled documents against a store. Implementations own
/// transport and must be cheap to clone.
pub trait Driver: Clone + Send + Sync + 'static {
    fn find(
        &self,
        collection: &str,
        query: Document,
        options: CompiledOptions,
    ) -> impl Future<Output = Result<Vec<Document>>> + Send;

    fn find_one(
        &self,
        collection: &str,
        query: Document,
        options: CompiledOptions,
    ) -> impl Future<Output = Result<Option<Document>>> + Send;

    /// Returns the id of the stored document.
    fn insert_one(
        &self,
        collection: &str,
        document: Document,
    ) -> impl Future<Output = Result<Bson>> + Send;

    fn update_one(
        &self,
        collection: &str,
        query: Document,
        update: Document,
        upsert: bool,
    ) -> impl Future<Output = Result<UpdateOutcome>> + Send;

    fn update_many(
        &self,
        collection: &str,
        query: Document,
        update: Document,
    ) -> impl Future<Output = Result<UpdateOutcome>> + Send;

    /// Returns the document as it is after the update.
    fn find_one_and_update(
        &self,
        collection: &str,
        query: Document,
        update: Document,
        options: CompiledOptions,
        upsert: bool,
    ) -> impl Future<Output = Result<Option<Document>>> + Send;

    fn delete_one(
        &self,
        collection: &str,
        query: Document,
    ) -> impl Future<Output = Result<u64>> + Send;

    fn delete_many(
        &self,
        collection: &str,
        query: Document,
    ) -> impl Future<Output = Result<u64>> + Send;

    fn count(&self, collection: &str, query: Document)
    -> impl Future<Output = Result<u64>> + Send;
}
