use std::{future::Future, marker::PhantomData, sync::Arc};

use async_stream::try_stream;
use bson::{Bson, DateTime, Document};
use futures::Stream;

use crate::{
    Error, Model,
    config::RepositoryOptions,
    datasource::Datasource,
    driver::{Driver, UpdateOutcome},
    error::Result,
    filter::{CompiledQuery, Filter, FilterCompiler, field},
    insert::InsertCompiler,
    lifecycle::{Deletion, LifecyclePolicy, OperationContext},
    schema::{ID_FIELD, SchemaIndex},
    soft_delete::SoftDeleteRewriter,
    update::{UpdateCompiler, UpdateSpec},
};

const PAGE_SIZE: u64 = 128;

/// Typed CRUD over one collection. Sequences the compilers and hands their
/// output to the driver; every driver call runs under the configured
/// deadline.
pub struct Repository<T, D> {
    options: RepositoryOptions,
    policy: LifecyclePolicy,
    schema: Arc<SchemaIndex>,
    driver: D,
    collection: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T, D: Clone> Clone for Repository<T, D> {
    fn clone(&self) -> Self {
        Self {
            options: self.options,
            policy: self.policy,
            schema: self.schema.clone(),
            driver: self.driver.clone(),
            collection: self.collection,
            _marker: PhantomData,
        }
    }
}

impl<T: Model, D: Driver> Repository<T, D> {
    /// Registers `T` on the datasource and binds to its connector.
    pub fn new(datasource: &mut Datasource<D>, options: RepositoryOptions) -> Result<Self> {
        let driver = datasource.register_model::<T>()?.driver().clone();
        Self::with_driver(driver, options)
    }

    pub fn with_driver(driver: D, options: RepositoryOptions) -> Result<Self> {
        Ok(Self {
            options,
            policy: options.policy(),
            schema: Arc::new(SchemaIndex::of::<T>()?),
            driver,
            collection: T::collection_name(),
            _marker: PhantomData,
        })
    }

    pub fn schema(&self) -> &SchemaIndex {
        &self.schema
    }

    pub fn policy(&self) -> LifecyclePolicy {
        self.policy
    }

    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    pub fn collection_name(&self) -> &'static str {
        self.collection
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    async fn call<R>(&self, operation: impl Future<Output = Result<R>>) -> Result<R> {
        tokio::time::timeout(self.options.timeout, operation)
            .await
            .map_err(|_| Error::Timeout(self.options.timeout))?
    }

    /// Compiles `filter` and hides soft-deleted documents.
    pub fn compile(&self, filter: &Filter) -> Result<CompiledQuery> {
        let mut compiled = FilterCompiler::new(&self.schema).compile(filter)?;
        compiled.query = SoftDeleteRewriter::new(self.policy).rewrite_query(compiled.query);
        Ok(compiled)
    }

    fn compile_update(&self, update: &UpdateSpec, context: OperationContext) -> Result<Document> {
        UpdateCompiler::new(self.policy).compile(update, context, DateTime::now())
    }

    fn model_document(model: &T) -> Result<Document> {
        let mut document = bson::to_document(model)?;
        if matches!(document.get(ID_FIELD), Some(Bson::Null)) {
            document.remove(ID_FIELD);
        }
        Ok(document)
    }

    fn decode(document: Document) -> Result<T> {
        Ok(bson::from_document(document)?)
    }

    pub async fn find(&self, filter: impl Into<Filter>) -> Result<Vec<T>> {
        let compiled = self.compile(&filter.into())?;
        self.call(self.driver.find(self.collection, compiled.query, compiled.options))
            .await?
            .into_iter()
            .map(Self::decode)
            .collect()
    }

    /// Pages through the results instead of loading them at once.
    pub fn find_stream(&self, filter: Filter) -> impl Stream<Item = Result<T>> + Send + '_ {
        try_stream! {
            let compiled = self.compile(&filter)?;
            let mut skip = compiled.options.skip.unwrap_or(0);
            let mut remaining = compiled
                .options
                .limit
                .filter(|limit| *limit > 0)
                .map(|limit| limit as u64);
            loop {
                let page = remaining.map_or(PAGE_SIZE, |remaining| remaining.min(PAGE_SIZE));
                if page == 0 {
                    break;
                }
                let mut options = compiled.options.clone();
                options.skip = Some(skip);
                options.limit = Some(page as i64);

                let documents = self
                    .call(self.driver.find(self.collection, compiled.query.clone(), options))
                    .await?;
                let len = documents.len() as u64;
                for document in documents {
                    yield Self::decode(document)?;
                }

                skip += len;
                if let Some(remaining) = remaining.as_mut() {
                    *remaining -= len;
                }
                if len < page {
                    break;
                }
            }
        }
    }

    /// `Ok(None)` when nothing matches.
    pub async fn find_one(&self, filter: impl Into<Filter>) -> Result<Option<T>> {
        let compiled = self.compile(&filter.into())?;
        self.call(self.driver.find_one(self.collection, compiled.query, compiled.options))
            .await?
            .map(Self::decode)
            .transpose()
    }

    pub async fn find_by_id(
        &self,
        id: impl Into<Bson>,
        filter: impl Into<Filter>,
    ) -> Result<Option<T>> {
        let mut filter = filter.into();
        filter.condition = field(ID_FIELD).eq(id).and(filter.condition);
        self.find_one(filter).await
    }

    /// Reads including soft-deleted documents.
    pub async fn find_with_deleted(&self, filter: impl Into<Filter>) -> Result<Vec<T>> {
        let compiled = FilterCompiler::new(&self.schema).compile(&filter.into())?;
        self.call(self.driver.find(self.collection, compiled.query, compiled.options))
            .await?
            .into_iter()
            .map(Self::decode)
            .collect()
    }

    pub async fn find_one_with_deleted(&self, filter: impl Into<Filter>) -> Result<Option<T>> {
        let compiled = FilterCompiler::new(&self.schema).compile(&filter.into())?;
        self.call(self.driver.find_one(self.collection, compiled.query, compiled.options))
            .await?
            .map(Self::decode)
            .transpose()
    }

    /// Soft-delete state of a document, found regardless of visibility.
    pub async fn deletion(&self, id: impl Into<Bson>) -> Result<Option<Deletion>> {
        let compiled =
            FilterCompiler::new(&self.schema).compile(&Filter::new(field(ID_FIELD).eq(id)))?;
        let document = self
            .call(self.driver.find_one(self.collection, compiled.query, compiled.options))
            .await?;
        Ok(document.as_ref().map(Deletion::of))
    }

    /// Stores `model` and returns its id.
    pub async fn insert(&self, model: &T) -> Result<Bson> {
        let document = InsertCompiler::new(self.policy)
            .compile(Self::model_document(model)?, DateTime::now());
        self.call(self.driver.insert_one(self.collection, document))
            .await
    }

    /// Stores `model` and reads it back.
    pub async fn create(&self, model: &T) -> Result<T> {
        let id = self.insert(model).await?;
        self.find_by_id(id, Filter::all())
            .await?
            .ok_or(Error::NotFound)
    }

    /// Applies `model` to the first match, inserting it when nothing
    /// matches, and returns the stored document.
    pub async fn find_one_or_create(&self, filter: impl Into<Filter>, model: &T) -> Result<T> {
        let compiled = self.compile(&filter.into())?;
        let update = UpdateSpec::new(Self::model_document(model)?);
        let update = self.compile_update(&update, OperationContext::upsert())?;
        self.call(self.driver.find_one_and_update(
            self.collection,
            compiled.query,
            update,
            compiled.options,
            true,
        ))
        .await?
        .map(Self::decode)
        .transpose()?
        .ok_or(Error::NotFound)
    }

    /// Updates the first match or inserts; `created` is stamped only when
    /// the insert branch is taken.
    pub async fn upsert(
        &self,
        filter: impl Into<Filter>,
        update: impl Into<UpdateSpec>,
    ) -> Result<UpdateOutcome> {
        let compiled = self.compile(&filter.into())?;
        let update = self.compile_update(&update.into(), OperationContext::upsert())?;
        self.call(self.driver.update_one(self.collection, compiled.query, update, true))
            .await
    }

    /// Fails with [`Error::NotFound`] when nothing matches.
    pub async fn update_one(
        &self,
        filter: impl Into<Filter>,
        update: impl Into<UpdateSpec>,
    ) -> Result<()> {
        let compiled = self.compile(&filter.into())?;
        let update = self.compile_update(&update.into(), OperationContext::update())?;
        let outcome = self
            .call(self.driver.update_one(self.collection, compiled.query, update, false))
            .await?;
        if outcome.matched == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    pub async fn update_by_id(
        &self,
        id: impl Into<Bson>,
        update: impl Into<UpdateSpec>,
    ) -> Result<()> {
        self.update_one(field(ID_FIELD).eq(id), update).await
    }

    /// Returns the updated document, or `None` when nothing matches.
    pub async fn find_one_and_update(
        &self,
        filter: impl Into<Filter>,
        update: impl Into<UpdateSpec>,
    ) -> Result<Option<T>> {
        let compiled = self.compile(&filter.into())?;
        let update = self.compile_update(&update.into(), OperationContext::update())?;
        self.call(self.driver.find_one_and_update(
            self.collection,
            compiled.query,
            update,
            compiled.options,
            false,
        ))
        .await?
        .map(Self::decode)
        .transpose()
    }

    /// Returns the number of modified documents.
    pub async fn update_many(
        &self,
        filter: impl Into<Filter>,
        update: impl Into<UpdateSpec>,
    ) -> Result<u64> {
        let compiled = self.compile(&filter.into())?;
        let update = self.compile_update(&update.into(), OperationContext::update())?;
        let outcome = self
            .call(self.driver.update_many(self.collection, compiled.query, update))
            .await?;
        Ok(outcome.modified)
    }

    pub async fn count(&self, filter: impl Into<Filter>) -> Result<u64> {
        let compiled = self.compile(&filter.into())?;
        self.call(self.driver.count(self.collection, compiled.query))
            .await
    }

    pub async fn exists(&self, id: impl Into<Bson>) -> Result<bool> {
        let compiled = self.compile(&Filter::new(field(ID_FIELD).eq(id)).include(ID_FIELD))?;
        let document = self
            .call(self.driver.find_one(self.collection, compiled.query, compiled.options))
            .await?;
        Ok(document.is_some())
    }

    /// Soft-deletes when the policy tracks deletion, removes otherwise.
    /// Fails with [`Error::NotFound`] when nothing matches.
    pub async fn delete_one(&self, filter: impl Into<Filter>) -> Result<()> {
        let compiled = self.compile(&filter.into())?;
        let rewritten = SoftDeleteRewriter::new(self.policy).rewrite_delete(DateTime::now())?;
        let affected = match rewritten {
            Some(update) => {
                self.call(self.driver.update_one(self.collection, compiled.query, update, false))
                    .await?
                    .matched
            }
            None => {
                self.call(self.driver.delete_one(self.collection, compiled.query))
                    .await?
            }
        };
        if affected == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    pub async fn delete_by_id(&self, id: impl Into<Bson>) -> Result<()> {
        self.delete_one(field(ID_FIELD).eq(id)).await
    }

    /// Returns how many documents were deleted.
    pub async fn delete_many(&self, filter: impl Into<Filter>) -> Result<u64> {
        let compiled = self.compile(&filter.into())?;
        let rewritten = SoftDeleteRewriter::new(self.policy).rewrite_delete(DateTime::now())?;
        match rewritten {
            Some(update) => Ok(self
                .call(self.driver.update_many(self.collection, compiled.query, update))
                .await?
                .modified),
            None => {
                self.call(self.driver.delete_many(self.collection, compiled.query))
                    .await
            }
        }
    }
}
