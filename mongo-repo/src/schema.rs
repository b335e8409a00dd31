use std::collections::BTreeMap;

use crate::{
    Error, Model,
    error::Result,
    model::FieldDescriptor,
};

pub const ID_FIELD: &str = "_id";
pub(crate) const PATH_SEPARATOR: char = '.';

/// Storage type of a field, derived from its declared Rust type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    String,
    Int32,
    Int64,
    Double,
    Boolean,
    DateTime,
    ObjectId,
    Array,
    Document,
    Any,
}

impl FieldType {
    /// Classifies a stringified Rust type such as `Option < Vec < String > >`.
    pub fn classify(rust_type: &str) -> Self {
        let compact: String = rust_type.chars().filter(|c| !c.is_whitespace()).collect();
        let mut ty = compact.as_str();
        loop {
            let inner = ["Option<", "Box<", "std::option::Option<"]
                .iter()
                .find_map(|wrapper| ty.strip_prefix(wrapper))
                .and_then(|rest| rest.strip_suffix('>'));
            match inner {
                Some(inner) => ty = inner,
                None => break,
            }
        }

        let base = ty.split('<').next().unwrap_or(ty);
        match base.rsplit("::").next().unwrap_or(base) {
            "String" | "&str" | "&'staticstr" | "str" => FieldType::String,
            "i8" | "i16" | "i32" | "u8" | "u16" => FieldType::Int32,
            "i64" | "u32" | "u64" | "isize" | "usize" => FieldType::Int64,
            "f32" | "f64" => FieldType::Double,
            "bool" => FieldType::Boolean,
            "DateTime" | "SystemTime" => FieldType::DateTime,
            "ObjectId" => FieldType::ObjectId,
            "Bson" => FieldType::Any,
            "Vec" | "VecDeque" | "HashSet" | "BTreeSet" => FieldType::Array,
            _ if ty.starts_with('[') => FieldType::Array,
            _ => FieldType::Document,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldInfo {
    pub storage_name: String,
    pub field_type: FieldType,
}

/// Logical field name to storage name and type, for the top level of one
/// model. Nested paths are never indexed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaIndex {
    model: String,
    fields: BTreeMap<String, FieldInfo>,
    by_storage: BTreeMap<String, String>,
}

impl SchemaIndex {
    pub fn of<T: Model>() -> Result<Self> {
        Self::build(T::model_name(), &T::fields())
    }

    /// Builds the index in one pass. Fails when no field is discoverable or a
    /// logical or storage name appears twice.
    pub fn build(model: &str, descriptors: &[FieldDescriptor]) -> Result<Self> {
        if descriptors.is_empty() {
            return Err(Error::InvalidSchema(
                model.to_string(),
                "no fields discoverable".to_string(),
            ));
        }

        let mut fields = BTreeMap::new();
        let mut by_storage = BTreeMap::new();
        for descriptor in descriptors {
            let info = FieldInfo {
                storage_name: descriptor.storage_name.to_string(),
                field_type: FieldType::classify(descriptor.rust_type),
            };
            if fields.insert(descriptor.name.to_string(), info).is_some() {
                return Err(Error::InvalidSchema(
                    model.to_string(),
                    format!("duplicate field {}", descriptor.name),
                ));
            }
            if by_storage
                .insert(descriptor.storage_name.to_string(), descriptor.name.to_string())
                .is_some()
            {
                return Err(Error::InvalidSchema(
                    model.to_string(),
                    format!("duplicate storage name {}", descriptor.storage_name),
                ));
            }
        }

        // The engine always assigns `_id`, declared or not.
        if !by_storage.contains_key(ID_FIELD) && !fields.contains_key(ID_FIELD) {
            fields.insert(
                ID_FIELD.to_string(),
                FieldInfo {
                    storage_name: ID_FIELD.to_string(),
                    field_type: FieldType::ObjectId,
                },
            );
            by_storage.insert(ID_FIELD.to_string(), ID_FIELD.to_string());
        }

        Ok(Self {
            model: model.to_string(),
            fields,
            by_storage,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldInfo)> {
        self.fields.iter().map(|(name, info)| (name.as_str(), info))
    }

    /// Resolves a field reference by logical name, falling back to the
    /// storage name. Paths into embedded documents are rejected.
    pub fn resolve(&self, name: &str) -> Result<&FieldInfo> {
        if name.contains(PATH_SEPARATOR) {
            return Err(Error::NestedField(name.to_string()));
        }
        if let Some(info) = self.fields.get(name) {
            return Ok(info);
        }
        self.by_storage
            .get(name)
            .and_then(|logical| self.fields.get(logical))
            .ok_or_else(|| Error::UnknownField(name.to_string()))
    }
}
