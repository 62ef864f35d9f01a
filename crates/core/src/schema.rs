//! Type schemas and constructor arguments
//!
//! Each object type declares its attributes once, up front, as a
//! [`TypeSchema`]. The registry validates schemas at startup, the writer uses
//! them to type-check facts, and the reader uses them to type-check
//! [`NamedArguments`] before handing them to the type's constructor.

use crate::error::ConstructError;
use crate::snapshot::ObjectSnapshot;
use crate::temporal::Span;
use crate::types::{EntityId, EntityRef, TypeName};
use crate::value::{Value, ValueType};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Declared attribute of a type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDef {
    /// Attribute name
    pub name: String,
    /// Declared value type
    pub value_type: ValueType,
    /// Whether construction fails when the attribute is absent
    pub required: bool,
}

/// Attribute layout of one object type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSchema {
    /// Registered type name
    pub name: TypeName,
    /// Attributes in declaration order
    pub attributes: Vec<AttributeDef>,
    /// Whether snapshots of this type may be cached
    pub cacheable: bool,
}

impl TypeSchema {
    /// Start building a schema
    pub fn builder(name: impl Into<TypeName>) -> TypeSchemaBuilder {
        TypeSchemaBuilder {
            schema: TypeSchema {
                name: name.into(),
                attributes: Vec::new(),
                cacheable: true,
            },
        }
    }

    /// Look up an attribute definition
    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Attributes that hold entity references
    pub fn relations(&self) -> impl Iterator<Item = &AttributeDef> {
        self.attributes
            .iter()
            .filter(|a| a.value_type == ValueType::Entity)
    }
}

/// Builder for [`TypeSchema`]
#[derive(Debug, Clone)]
pub struct TypeSchemaBuilder {
    schema: TypeSchema,
}

impl TypeSchemaBuilder {
    /// Declare a required attribute
    pub fn required(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.schema.attributes.push(AttributeDef {
            name: name.into(),
            value_type,
            required: true,
        });
        self
    }

    /// Declare an optional attribute
    pub fn optional(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.schema.attributes.push(AttributeDef {
            name: name.into(),
            value_type,
            required: false,
        });
        self
    }

    /// Set whether snapshots may be cached (default: true)
    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.schema.cacheable = cacheable;
        self
    }

    /// Finish the schema
    pub fn build(self) -> TypeSchema {
        self.schema
    }
}

// ============================================================================
// Named arguments
// ============================================================================

/// Attribute values handed to a type's constructor
///
/// Accessors fail with [`ConstructError`] so constructors can use `?`
/// throughout.
#[derive(Debug, Clone, Copy)]
pub struct NamedArguments<'a> {
    snapshot: &'a ObjectSnapshot,
}

impl<'a> NamedArguments<'a> {
    /// Wrap a snapshot
    pub fn new(snapshot: &'a ObjectSnapshot) -> Self {
        Self { snapshot }
    }

    /// Entity being constructed
    pub fn entity_id(&self) -> EntityId {
        self.snapshot.entity
    }

    /// Type being constructed
    pub fn type_name(&self) -> &TypeName {
        &self.snapshot.type_name
    }

    /// Derived valid window of the snapshot
    pub fn valid(&self) -> Span {
        self.snapshot.valid
    }

    /// Derived database window of the snapshot
    pub fn database(&self) -> Span {
        self.snapshot.database
    }

    /// Raw value of an attribute, `None` when absent
    pub fn get(&self, attribute: &str) -> Option<&'a Value> {
        self.snapshot.attributes.get(attribute)
    }

    /// Whether the attribute is present and not null
    pub fn has(&self, attribute: &str) -> bool {
        self.get(attribute).map_or(false, |v| !v.is_null())
    }

    /// Resolved related snapshot of a relation attribute
    pub fn related(&self, attribute: &str) -> Option<&'a ObjectSnapshot> {
        self.snapshot.related.get(attribute)
    }

    /// String attribute
    pub fn string(&self, attribute: &str) -> Result<String, ConstructError> {
        self.typed(attribute, ValueType::String, |v| v.as_str().map(str::to_string))
    }

    /// Integer attribute
    pub fn int(&self, attribute: &str) -> Result<i64, ConstructError> {
        self.typed(attribute, ValueType::Int, Value::as_int)
    }

    /// Float attribute
    pub fn float(&self, attribute: &str) -> Result<f64, ConstructError> {
        self.typed(attribute, ValueType::Float, Value::as_float)
    }

    /// Boolean attribute
    pub fn bool(&self, attribute: &str) -> Result<bool, ConstructError> {
        self.typed(attribute, ValueType::Bool, Value::as_bool)
    }

    /// Date attribute
    pub fn date(&self, attribute: &str) -> Result<NaiveDate, ConstructError> {
        self.typed(attribute, ValueType::Date, Value::as_date)
    }

    /// Timestamp attribute
    pub fn timestamp(&self, attribute: &str) -> Result<DateTime<Utc>, ConstructError> {
        self.typed(attribute, ValueType::Timestamp, Value::as_timestamp)
    }

    /// Entity reference attribute
    pub fn entity(&self, attribute: &str) -> Result<EntityRef, ConstructError> {
        self.typed(attribute, ValueType::Entity, |v| v.as_entity().cloned())
    }

    fn typed<T>(
        &self,
        attribute: &str,
        expected: ValueType,
        extract: impl Fn(&Value) -> Option<T>,
    ) -> Result<T, ConstructError> {
        let value = match self.get(attribute) {
            Some(v) if !v.is_null() => v,
            _ => {
                return Err(ConstructError::MissingAttribute {
                    type_name: self.snapshot.type_name.clone(),
                    attribute: attribute.to_string(),
                })
            }
        };
        extract(value).ok_or_else(|| ConstructError::TypeMismatch {
            type_name: self.snapshot.type_name.clone(),
            attribute: attribute.to_string(),
            expected,
            actual: value.value_type(),
        })
    }
}
