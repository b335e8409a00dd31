use std::collections::HashMap;

use serde::{Serialize, de::DeserializeOwned};

/// Raw description of one top-level field, as emitted by `#[derive(Model)]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Name used in filters.
    pub name: &'static str,
    /// Name of the key in the stored document.
    pub storage_name: &'static str,
    /// Declared Rust type, stringified.
    pub rust_type: &'static str,
}

impl FieldDescriptor {
    pub const fn new(
        name: &'static str,
        storage_name: &'static str,
        rust_type: &'static str,
    ) -> Self {
        Self {
            name,
            storage_name,
            rust_type,
        }
    }
}

/// Types whose top-level fields can be listed. Flattened structs contribute
/// their own fields to the enclosing model.
pub trait Fields {
    fn fields() -> Vec<FieldDescriptor>;
}

/// A document type stored in one collection.
pub trait Model: Fields + Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {
    /// Collection the documents live in.
    fn collection_name() -> &'static str;

    fn model_name() -> &'static str;

    fn plural_model_name() -> &'static str;

    /// Name of the datasource connector serving this model.
    fn connector_name() -> &'static str;
}

// 模型元信息
pub struct ModelMeta {
    pub model_name: &'static str,
    pub collection_name: &'static str,
    pub connector_name: &'static str,
    pub fields: fn() -> Vec<FieldDescriptor>,
}

impl std::fmt::Debug for ModelMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ModelMeta {{ model: {}, collection: {}, connector: {}, fields: {:?} }}",
            self.model_name,
            self.collection_name,
            self.connector_name,
            (self.fields)().iter().map(|f| f.name).collect::<Vec<_>>()
        )
    }
}

inventory::collect!(ModelMeta);

/// Every model derived in the final binary, keyed by model name.
pub fn all_models() -> HashMap<&'static str, &'static ModelMeta> {
    inventory::iter::<ModelMeta>()
        .map(|meta| (meta.model_name, meta))
        .collect()
}
