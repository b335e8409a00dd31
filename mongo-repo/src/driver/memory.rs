use std::{collections::HashMap, sync::Arc};

use bson::{Bson, DateTime, Document};
use parking_lot::RwLock;

use crate::{
    Error,
    driver::{Driver, UpdateOutcome, eval},
    error::Result,
    filter::CompiledOptions,
};

type Collections = HashMap<String, Vec<Document>>;

/// Thread-safe in-memory store. Documents keep insertion order, which is the
/// natural order used to break sort ties.
#[derive(Clone, Debug, Default)]
pub struct MemoryDriver {
    collections: Arc<RwLock<Collections>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw contents of a collection, ignoring any query rewriting.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn drop_collection(&self, collection: &str) {
        self.collections.write().remove(collection);
    }

    fn select(
        documents: &[Document],
        query: &Document,
        options: &CompiledOptions,
    ) -> Result<Vec<Document>> {
        let mut selected = Vec::new();
        for document in documents {
            if eval::matches(document, query)? {
                selected.push(document.clone());
            }
        }
        if let Some(sort) = &options.sort {
            eval::sort(&mut selected, sort);
        }
        let skip = options.skip.unwrap_or(0) as usize;
        let limit = match options.limit {
            Some(limit) if limit > 0 => limit as usize,
            _ => usize::MAX,
        };
        Ok(selected
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|document| match &options.projection {
                Some(projection) => eval::project(document, projection),
                None => document,
            })
            .collect())
    }

    fn first_match(
        documents: &[Document],
        query: &Document,
        sort: Option<&Document>,
    ) -> Result<Option<usize>> {
        let mut positions = Vec::new();
        for (position, document) in documents.iter().enumerate() {
            if eval::matches(document, query)? {
                positions.push(position);
            }
        }
        if let Some(sort) = sort {
            positions.sort_by(|left, right| {
                eval::compare_documents(&documents[*left], &documents[*right], sort)
            });
        }
        Ok(positions.first().copied())
    }

    fn upsert_insert(
        documents: &mut Vec<Document>,
        query: &Document,
        update: &Document,
    ) -> Result<Bson> {
        let mut document = eval::upsert_seed(query);
        eval::apply_update(&mut document, update, true, DateTime::now())?;
        let id = eval::ensure_id(&mut document);
        log::trace!("memory upsert inserted {}", document);
        documents.push(document);
        Ok(id)
    }

    /// Computes the updated copy of `document`. The stored document is left
    /// untouched so a failing operator never leaves it half-updated.
    fn updated(document: &Document, update: &Document) -> Result<Document> {
        let mut updated = document.clone();
        eval::apply_update(&mut updated, update, false, DateTime::now())?;
        Ok(updated)
    }

    /// Replaces `document` with `updated`, reporting whether anything changed.
    fn commit(document: &mut Document, updated: Document) -> bool {
        let modified = *document != updated;
        *document = updated;
        modified
    }
}

impl Driver for MemoryDriver {
    async fn find(
        &self,
        collection: &str,
        query: Document,
        options: CompiledOptions,
    ) -> Result<Vec<Document>> {
        let collections = self.collections.read();
        let documents = collections.get(collection).map(Vec::as_slice).unwrap_or_default();
        Self::select(documents, &query, &options)
    }

    async fn find_one(
        &self,
        collection: &str,
        query: Document,
        mut options: CompiledOptions,
    ) -> Result<Option<Document>> {
        options.limit = Some(1);
        let collections = self.collections.read();
        let documents = collections.get(collection).map(Vec::as_slice).unwrap_or_default();
        Ok(Self::select(documents, &query, &options)?.into_iter().next())
    }

    async fn insert_one(&self, collection: &str, mut document: Document) -> Result<Bson> {
        let id = eval::ensure_id(&mut document);
        let mut collections = self.collections.write();
        let documents = collections.entry(collection.to_string()).or_default();
        if documents.iter().any(|existing| existing.get("_id") == Some(&id)) {
            return Err(Error::driver(format!("duplicate key {id} in {collection}")));
        }
        log::trace!("memory insert into {collection}: {document}");
        documents.push(document);
        Ok(id)
    }

    async fn update_one(
        &self,
        collection: &str,
        query: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateOutcome> {
        let mut collections = self.collections.write();
        let documents = collections.entry(collection.to_string()).or_default();
        match Self::first_match(documents, &query, None)? {
            Some(position) => {
                let updated = Self::updated(&documents[position], &update)?;
                let modified = Self::commit(&mut documents[position], updated);
                Ok(UpdateOutcome {
                    matched: 1,
                    modified: u64::from(modified),
                    upserted_id: None,
                })
            }
            None if upsert => {
                let id = Self::upsert_insert(documents, &query, &update)?;
                Ok(UpdateOutcome {
                    upserted_id: Some(id),
                    ..UpdateOutcome::default()
                })
            }
            None => Ok(UpdateOutcome::default()),
        }
    }

    async fn update_many(
        &self,
        collection: &str,
        query: Document,
        update: Document,
    ) -> Result<UpdateOutcome> {
        let mut collections = self.collections.write();
        let mut outcome = UpdateOutcome::default();
        let Some(documents) = collections.get_mut(collection) else {
            return Ok(outcome);
        };
        // 先全部计算，全部成功后再写回
        let mut pending = Vec::new();
        for (position, document) in documents.iter().enumerate() {
            if eval::matches(document, &query)? {
                pending.push((position, Self::updated(document, &update)?));
            }
        }
        for (position, updated) in pending {
            outcome.matched += 1;
            if Self::commit(&mut documents[position], updated) {
                outcome.modified += 1;
            }
        }
        Ok(outcome)
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        query: Document,
        update: Document,
        options: CompiledOptions,
        upsert: bool,
    ) -> Result<Option<Document>> {
        let mut collections = self.collections.write();
        let documents = collections.entry(collection.to_string()).or_default();
        let position = match Self::first_match(documents, &query, options.sort.as_ref())? {
            Some(position) => {
                let updated = Self::updated(&documents[position], &update)?;
                Self::commit(&mut documents[position], updated);
                position
            }
            None if upsert => {
                Self::upsert_insert(documents, &query, &update)?;
                documents.len() - 1
            }
            None => return Ok(None),
        };
        let document = documents[position].clone();
        Ok(Some(match &options.projection {
            Some(projection) => eval::project(document, projection),
            None => document,
        }))
    }

    async fn delete_one(&self, collection: &str, query: Document) -> Result<u64> {
        let mut collections = self.collections.write();
        let Some(documents) = collections.get_mut(collection) else {
            return Ok(0);
        };
        match Self::first_match(documents, &query, None)? {
            Some(position) => {
                documents.remove(position);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_many(&self, collection: &str, query: Document) -> Result<u64> {
        let mut collections = self.collections.write();
        let Some(documents) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let mut doomed = Vec::with_capacity(documents.len());
        for document in documents.iter() {
            doomed.push(eval::matches(document, &query)?);
        }
        let deleted = doomed.iter().filter(|doomed| **doomed).count() as u64;
        let mut doomed = doomed.into_iter();
        documents.retain(|_| !doomed.next().unwrap_or(false));
        Ok(deleted)
    }

    async fn count(&self, collection: &str, query: Document) -> Result<u64> {
        let collections = self.collections.read();
        let mut count = 0;
        for document in collections.get(collection).into_iter().flatten() {
            if eval::matches(document, &query)? {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    const COLLECTION: &str = "pumps";

    async fn seeded(documents: Vec<Document>) -> MemoryDriver {
        let driver = MemoryDriver::new();
        for document in documents {
            driver.insert_one(COLLECTION, document).await.unwrap();
        }
        driver
    }

    #[tokio::test]
    async fn failed_update_leaves_document_untouched() {
        let driver = seeded(vec![doc! { "_id": 1, "name": "x" }]).await;

        let result = driver
            .update_one(
                COLLECTION,
                doc! { "_id": 1 },
                doc! { "$set": { "a": 1 }, "$inc": { "name": 1 } },
                false,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(driver.documents(COLLECTION), vec![doc! { "_id": 1, "name": "x" }]);

        let result = driver
            .find_one_and_update(
                COLLECTION,
                doc! { "_id": 1 },
                doc! { "$set": { "a": 1 }, "$inc": { "name": 1 } },
                CompiledOptions::default(),
                false,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(driver.documents(COLLECTION), vec![doc! { "_id": 1, "name": "x" }]);
    }

    #[tokio::test]
    async fn update_many_applies_all_or_nothing() {
        let driver = seeded(vec![
            doc! { "_id": 1, "n": 1 },
            doc! { "_id": 2, "n": "two" },
            doc! { "_id": 3, "n": 3 },
        ])
        .await;

        let result = driver
            .update_many(COLLECTION, doc! {}, doc! { "$inc": { "n": 1 } })
            .await;
        assert!(result.is_err());
        assert_eq!(
            driver.documents(COLLECTION),
            vec![
                doc! { "_id": 1, "n": 1 },
                doc! { "_id": 2, "n": "two" },
                doc! { "_id": 3, "n": 3 },
            ]
        );

        let outcome = driver
            .update_many(COLLECTION, doc! { "_id": { "$ne": 2 } }, doc! { "$inc": { "n": 1 } })
            .await
            .unwrap();
        assert_eq!((outcome.matched, outcome.modified), (2, 2));
    }

    #[tokio::test]
    async fn overflowing_inc_keeps_the_store_usable() {
        let driver = seeded(vec![
            doc! { "_id": 1, "n": i32::MAX },
            doc! { "_id": 2, "n": i64::MAX },
        ])
        .await;

        let outcome = driver
            .update_one(COLLECTION, doc! { "_id": 1 }, doc! { "$inc": { "n": 1 } }, false)
            .await
            .unwrap();
        assert_eq!(outcome.modified, 1);

        let err = driver
            .update_one(COLLECTION, doc! { "_id": 2 }, doc! { "$inc": { "n": 1 } }, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Driver(_)));

        let widened = i64::from(i32::MAX) + 1;
        assert_eq!(
            driver.documents(COLLECTION),
            vec![
                doc! { "_id": 1, "n": widened },
                doc! { "_id": 2, "n": i64::MAX },
            ]
        );
        assert_eq!(driver.count(COLLECTION, doc! {}).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn find_one_and_update_follows_sort() {
        let driver = seeded(vec![
            doc! { "_id": 1, "rank": 2 },
            doc! { "_id": 2, "rank": 5 },
            doc! { "_id": 3, "rank": 1 },
        ])
        .await;
        let options = CompiledOptions {
            sort: Some(doc! { "rank": -1.0 }),
            ..CompiledOptions::default()
        };

        let updated = driver
            .find_one_and_update(
                COLLECTION,
                doc! {},
                doc! { "$set": { "picked": true } },
                options,
                false,
            )
            .await
            .unwrap();
        let picked = updated.and_then(|document| document.get("_id").cloned());
        assert_eq!(picked, Some(Bson::Int32(2)));
    }
}
