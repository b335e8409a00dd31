use mongo_repo::{FieldDescriptor, FieldType, Fields, Model, SchemaIndex, all_models};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Fields)]
struct Audit {
    #[serde(rename = "by")]
    author: String,
    revision: u32,
}

#[derive(Debug, Serialize, Deserialize, Model)]
#[model(name = "Article", collection = "articles", plural = "Articles", connector = "cms")]
struct Article {
    #[serde(rename = "_id")]
    id: String,
    #[model(name = "headline")]
    #[serde(rename = "h")]
    title: String,
    #[serde(flatten)]
    audit: Audit,
    #[serde(skip)]
    cache: Option<String>,
    #[model(skip)]
    #[serde(default)]
    scratch: Vec<u8>,
    tags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Model)]
#[serde(rename_all = "camelCase")]
struct SensorReading {
    #[serde(rename = "_id")]
    id: i64,
    reference_id: String,
    #[serde(rename(serialize = "ttl", deserialize = "ttl"))]
    data_ttl: f64,
}

#[test]
fn fields_follow_serde_names() {
    assert_eq!(
        Article::fields(),
        vec![
            FieldDescriptor::new("id", "_id", "String"),
            FieldDescriptor::new("headline", "h", "String"),
            FieldDescriptor::new("author", "by", "String"),
            FieldDescriptor::new("revision", "revision", "u32"),
            FieldDescriptor::new("tags", "tags", "Vec < String >"),
        ]
    );
}

#[test]
fn model_attributes() {
    assert_eq!(Article::model_name(), "Article");
    assert_eq!(Article::collection_name(), "articles");
    assert_eq!(Article::plural_model_name(), "Articles");
    assert_eq!(Article::connector_name(), "cms");

    assert_eq!(SensorReading::model_name(), "SensorReading");
    assert_eq!(SensorReading::collection_name(), "SensorReading");
    assert_eq!(SensorReading::plural_model_name(), "SensorReadings");
    assert_eq!(SensorReading::connector_name(), "default");
}

#[test]
fn rename_all_applies_to_storage_names() {
    let storage: Vec<_> = SensorReading::fields()
        .into_iter()
        .map(|field| (field.name, field.storage_name))
        .collect();
    assert_eq!(
        storage,
        vec![("id", "_id"), ("reference_id", "referenceId"), ("data_ttl", "ttl")]
    );
}

#[test]
fn schema_index_from_derived_fields() {
    let schema = SchemaIndex::of::<Article>().unwrap();
    assert_eq!(schema.model(), "Article");
    assert_eq!(schema.resolve("headline").unwrap().storage_name, "h");
    assert_eq!(schema.resolve("h").unwrap().storage_name, "h");
    assert_eq!(schema.resolve("tags").unwrap().field_type, FieldType::Array);
    assert!(schema.resolve("cache").is_err());
    assert!(schema.resolve("scratch").is_err());
}

#[test]
fn derived_models_are_collected() {
    let models = all_models();
    let article = models.get("Article").expect("Article is registered");
    assert_eq!(article.collection_name, "articles");
    assert_eq!(article.connector_name, "cms");
    assert_eq!((article.fields)().len(), 5);
    assert!(models.contains_key("SensorReading"));
}
