use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection, Database,
    options::{FindOneAndUpdateOptions, FindOneOptions, FindOptions, ReturnDocument},
};

use crate::{
    config::ConnectorOptions,
    driver::{Driver, UpdateOutcome},
    error::Result,
    filter::CompiledOptions,
};

/// Driver over the official MongoDB client.
#[derive(Clone, Debug)]
pub struct MongoDriver {
    client: Client,
    database: Database,
}

impl MongoDriver {
    pub fn new(client: Client, database: Database) -> Self {
        Self { client, database }
    }

    /// Opens a client for `options` and checks it with a ping.
    pub async fn connect(options: &ConnectorOptions) -> Result<Self> {
        options.validate()?;
        let client = Client::with_uri_str(&options.uri).await?;
        let database = client.database(&options.database);
        let driver = Self { client, database };
        driver.ping().await?;
        log::info!("connector {} connected to {}", options.name, options.database);
        Ok(driver)
    }

    pub async fn ping(&self) -> Result<()> {
        self.database.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    pub async fn shutdown(self) {
        self.client.shutdown().await;
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection::<Document>(name)
    }
}

impl Driver for MongoDriver {
    async fn find(
        &self,
        collection: &str,
        query: Document,
        options: CompiledOptions,
    ) -> Result<Vec<Document>> {
        let mut find_options = FindOptions::default();
        find_options.sort = options.sort;
        find_options.skip = options.skip;
        find_options.limit = options.limit;
        find_options.projection = options.projection;

        let cursor = self
            .collection(collection)
            .find(query)
            .with_options(find_options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn find_one(
        &self,
        collection: &str,
        query: Document,
        options: CompiledOptions,
    ) -> Result<Option<Document>> {
        let mut find_options = FindOneOptions::default();
        find_options.sort = options.sort;
        find_options.skip = options.skip;
        find_options.projection = options.projection;

        Ok(self
            .collection(collection)
            .find_one(query)
            .with_options(find_options)
            .await?)
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<Bson> {
        let result = self.collection(collection).insert_one(document).await?;
        Ok(result.inserted_id)
    }

    async fn update_one(
        &self,
        collection: &str,
        query: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateOutcome> {
        let result = self
            .collection(collection)
            .update_one(query, update)
            .upsert(upsert)
            .await?;
        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn update_many(
        &self,
        collection: &str,
        query: Document,
        update: Document,
    ) -> Result<UpdateOutcome> {
        let result = self
            .collection(collection)
            .update_many(query, update)
            .await?;
        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        query: Document,
        update: Document,
        options: CompiledOptions,
        upsert: bool,
    ) -> Result<Option<Document>> {
        let mut update_options = FindOneAndUpdateOptions::default();
        update_options.upsert = Some(upsert);
        update_options.return_document = Some(ReturnDocument::After);
        update_options.sort = options.sort;
        update_options.projection = options.projection;

        Ok(self
            .collection(collection)
            .find_one_and_update(query, update)
            .with_options(update_options)
            .await?)
    }

    async fn delete_one(&self, collection: &str, query: Document) -> Result<u64> {
        let result = self.collection(collection).delete_one(query).await?;
        Ok(result.deleted_count)
    }

    async fn delete_many(&self, collection: &str, query: Document) -> Result<u64> {
        let result = self.collection(collection).delete_many(query).await?;
        Ok(result.deleted_count)
    }

    async fn count(&self, collection: &str, query: Document) -> Result<u64> {
        Ok(self.collection(collection).count_documents(query).await?)
    }
}
