//! Type registry
//!
//! Built once at startup through [`TypeRegistryBuilder`] and immutable after
//! [`TypeRegistryBuilder::build`]. The orchestrators receive it by `Arc`; there
//! is no global registry.

use crate::error::WriteError;
use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;
use tempora_core::{
    ConstructError, NamedArguments, ObjectSnapshot, RegistryError, TemporalObject, TypeName,
    TypeSchema, Value, ValueType,
};
use tracing::debug;

/// Collects schemas before validation
#[derive(Debug, Default)]
pub struct TypeRegistryBuilder {
    schemas: Vec<TypeSchema>,
}

impl TypeRegistryBuilder {
    /// Empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a [`TemporalObject`] type
    pub fn register<T: TemporalObject>(self) -> Self {
        self.register_schema(T::schema())
    }

    /// Register a bare schema
    pub fn register_schema(mut self, schema: TypeSchema) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Validate every schema and freeze the registry
    ///
    /// # Errors
    ///
    /// - `DuplicateType` if a type name was registered twice
    /// - `DuplicateAttribute` if a schema declares an attribute twice
    /// - `EmptySchema` if a schema declares no attributes
    pub fn build(self) -> Result<TypeRegistry, RegistryError> {
        let mut types = FxHashMap::default();
        for schema in self.schemas {
            if schema.attributes.is_empty() {
                return Err(RegistryError::EmptySchema(schema.name));
            }
            let mut seen = FxHashSet::default();
            for attr in &schema.attributes {
                if !seen.insert(attr.name.as_str()) {
                    return Err(RegistryError::DuplicateAttribute {
                        type_name: schema.name.clone(),
                        attribute: attr.name.clone(),
                    });
                }
            }
            if types.contains_key(&schema.name) {
                return Err(RegistryError::DuplicateType(schema.name));
            }
            debug!(target: "tempora::registry", type_name = %schema.name, attributes = schema.attributes.len(), "registered type");
            types.insert(schema.name.clone(), schema);
        }
        Ok(TypeRegistry { types })
    }
}

/// Immutable map from type name to schema
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: FxHashMap<TypeName, TypeSchema>,
}

impl TypeRegistry {
    /// Start building a registry
    pub fn builder() -> TypeRegistryBuilder {
        TypeRegistryBuilder::new()
    }

    /// Schema of a registered type
    pub fn schema(&self, type_name: &TypeName) -> Option<&TypeSchema> {
        self.types.get(type_name)
    }

    /// Whether the type is registered
    pub fn contains(&self, type_name: &TypeName) -> bool {
        self.types.contains_key(type_name)
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Declared type of an attribute
    pub fn attribute_type(&self, type_name: &TypeName, attribute: &str) -> Option<ValueType> {
        self.schema(type_name)?
            .attribute(attribute)
            .map(|a| a.value_type)
    }

    /// Check a snapshot against its schema before construction
    ///
    /// Every required attribute must be present and non-null, and every
    /// present value must conform to its declared type.
    pub fn check_arguments(
        schema: &TypeSchema,
        snapshot: &ObjectSnapshot,
    ) -> Result<(), ConstructError> {
        for attr in &schema.attributes {
            match snapshot.get(&attr.name) {
                Some(value) if !value.conforms_to(attr.value_type) => {
                    return Err(ConstructError::TypeMismatch {
                        type_name: schema.name.clone(),
                        attribute: attr.name.clone(),
                        expected: attr.value_type,
                        actual: value.value_type(),
                    });
                }
                Some(value) if attr.required && value.is_null() => {
                    return Err(missing(schema, &attr.name));
                }
                None if attr.required => return Err(missing(schema, &attr.name)),
                _ => {}
            }
        }
        Ok(())
    }

    /// Build a typed object from a snapshot
    pub fn construct<T: TemporalObject>(
        &self,
        snapshot: &ObjectSnapshot,
    ) -> Result<T, ConstructError> {
        let schema = T::schema();
        Self::check_arguments(&schema, snapshot)?;
        T::construct(&NamedArguments::new(snapshot))
    }

    /// Check attribute values a writer is about to persist
    pub fn validate_facts(
        &self,
        type_name: &TypeName,
        facts: &[(String, Value)],
    ) -> Result<(), WriteError> {
        let schema = self
            .schema(type_name)
            .ok_or_else(|| WriteError::UnregisteredType(type_name.clone()))?;
        for (attribute, value) in facts {
            let def = schema
                .attribute(attribute)
                .ok_or_else(|| WriteError::UnknownAttribute {
                    type_name: type_name.clone(),
                    attribute: attribute.clone(),
                })?;
            if !value.conforms_to(def.value_type) {
                return Err(WriteError::AttributeTypeMismatch {
                    type_name: type_name.clone(),
                    attribute: attribute.clone(),
                    expected: def.value_type,
                    actual: value.value_type(),
                });
            }
        }
        Ok(())
    }
}

fn missing(schema: &TypeSchema, attribute: &str) -> ConstructError {
    ConstructError::MissingAttribute {
        type_name: schema.name.clone(),
        attribute: attribute.to_string(),
    }
}
