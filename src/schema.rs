//! Entity metadata consumed by the compiler.
//!
//! The compiler never decides how entities map to tables. It asks a
//! [`SchemaResolver`] for an [`EntityMetadata`] by name and reads the table,
//! the identity columns, and the mapping of every field. [`InMemorySchema`]
//! is a ready-made resolver that can be built in code or loaded from JSON:
//!
//! ```json
//! {
//!   "entities": [{
//!     "name": "Order",
//!     "table": { "name": "orders", "cache_timeout_ms": 1000 },
//!     "id": ["id"],
//!     "fields": [
//!       { "name": "id", "kind": "column", "column": "id" },
//!       { "name": "customer", "kind": "many_to_one", "target": "Customer", "columns": ["customer_id"] }
//!     ]
//!   }]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Cache timeout assumed for tables that do not configure one.
pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_millis(250);

fn default_cache_timeout() -> Duration {
    DEFAULT_CACHE_TIMEOUT
}

pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    #[serde(
        rename = "cache_timeout_ms",
        with = "millis",
        default = "default_cache_timeout"
    )]
    pub cache_timeout: Duration,
    #[serde(default)]
    pub read_only: bool,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Table {
            name: name.into(),
            cache_timeout: DEFAULT_CACHE_TIMEOUT,
            read_only: false,
        }
    }

    pub fn with_cache_timeout(mut self, timeout: Duration) -> Self {
        self.cache_timeout = timeout;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn cache_timeout(&self) -> Duration {
        self.cache_timeout
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// How one entity field is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    /// A plain column of the entity's table.
    Column { column: String },
    /// A to-one relationship. `columns` are foreign-key columns of this
    /// entity's table, pairwise matching the target's identity columns.
    ManyToOne { target: String, columns: Vec<String> },
    /// A collection stored in the target's table. `columns` are foreign-key
    /// columns of the target table, pairwise matching this entity's identity.
    OneToMany { target: String, columns: Vec<String> },
    /// A collection stored in an association table.
    ManyToMany {
        target: String,
        association: Table,
        /// Association columns referencing this entity's identity.
        source_columns: Vec<String>,
        /// Association columns referencing the target's identity.
        target_columns: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
}

/// Column and value identifying rows of one entity in a shared table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discriminator {
    pub column: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMetadata {
    pub name: String,
    pub table: Table,
    /// Names of the identity fields, in key order.
    pub id: Vec<String>,
    pub fields: Vec<Field>,
    #[serde(default)]
    pub discriminator: Option<Discriminator>,
}

impl EntityMetadata {
    pub fn new(name: impl Into<String>, table: Table) -> Self {
        EntityMetadata {
            name: name.into(),
            table,
            id: Vec::new(),
            fields: Vec::new(),
            discriminator: None,
        }
    }

    pub fn with_id(mut self, field: &str, column: &str) -> Self {
        self.id.push(field.to_string());
        self.with_column(field, column)
    }

    pub fn with_column(mut self, field: &str, column: &str) -> Self {
        self.fields.push(Field {
            name: field.to_string(),
            kind: FieldKind::Column {
                column: column.to_string(),
            },
        });
        self
    }

    pub fn with_many_to_one(mut self, field: &str, target: &str, columns: &[&str]) -> Self {
        self.fields.push(Field {
            name: field.to_string(),
            kind: FieldKind::ManyToOne {
                target: target.to_string(),
                columns: to_strings(columns),
            },
        });
        self
    }

    pub fn with_one_to_many(mut self, field: &str, target: &str, columns: &[&str]) -> Self {
        self.fields.push(Field {
            name: field.to_string(),
            kind: FieldKind::OneToMany {
                target: target.to_string(),
                columns: to_strings(columns),
            },
        });
        self
    }

    pub fn with_many_to_many(
        mut self,
        field: &str,
        target: &str,
        association: Table,
        source_columns: &[&str],
        target_columns: &[&str],
    ) -> Self {
        self.fields.push(Field {
            name: field.to_string(),
            kind: FieldKind::ManyToMany {
                target: target.to_string(),
                association,
                source_columns: to_strings(source_columns),
                target_columns: to_strings(target_columns),
            },
        });
        self
    }

    pub fn with_discriminator(mut self, column: &str, value: &str) -> Self {
        self.discriminator = Some(Discriminator {
            column: column.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldKind> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.kind)
    }

    /// Columns holding the identity, in key order.
    pub fn id_columns(&self) -> Vec<String> {
        self.id
            .iter()
            .filter_map(|name| self.field(name))
            .flat_map(|kind| match kind {
                FieldKind::Column { column } => vec![column.clone()],
                FieldKind::ManyToOne { columns, .. } => columns.clone(),
                _ => Vec::new(),
            })
            .collect()
    }

    /// Every column stored in the entity's own table: identity first, then
    /// the remaining fields in declaration order.
    pub fn load_columns(&self) -> Vec<String> {
        let mut columns = self.id_columns();
        for field in &self.fields {
            let owned: &[String] = match &field.kind {
                FieldKind::Column { column } => std::slice::from_ref(column),
                FieldKind::ManyToOne { columns, .. } => columns,
                _ => &[],
            };
            for column in owned {
                if !columns.contains(column) {
                    columns.push(column.clone());
                }
            }
        }
        columns
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Outcome of resolving a `SELECT NEW` class name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassLookup {
    Found(String),
    Ambiguous(Vec<String>),
    Missing,
}

/// Source of entity metadata. Lookups must be safe to run concurrently with
/// other compilations; the compiler only ever reads through this trait.
pub trait SchemaResolver {
    fn lookup_schema(&self, name: &str) -> Option<Arc<EntityMetadata>>;

    /// Resolve the class named by `SELECT NEW`. The default accepts any name.
    fn resolve_class(&self, name: &str) -> ClassLookup {
        ClassLookup::Found(name.to_string())
    }
}

impl<R: SchemaResolver + ?Sized> SchemaResolver for &R {
    fn lookup_schema(&self, name: &str) -> Option<Arc<EntityMetadata>> {
        (**self).lookup_schema(name)
    }

    fn resolve_class(&self, name: &str) -> ClassLookup {
        (**self).resolve_class(name)
    }
}

impl<R: SchemaResolver + ?Sized> SchemaResolver for Arc<R> {
    fn lookup_schema(&self, name: &str) -> Option<Arc<EntityMetadata>> {
        (**self).lookup_schema(name)
    }

    fn resolve_class(&self, name: &str) -> ClassLookup {
        (**self).resolve_class(name)
    }
}

#[derive(Debug, Deserialize)]
struct SchemaDocument {
    entities: Vec<EntityMetadata>,
    #[serde(default)]
    classes: Vec<String>,
}

/// A [`SchemaResolver`] over a fixed set of entities.
#[derive(Debug, Clone, Default)]
pub struct InMemorySchema {
    entities: HashMap<String, Arc<EntityMetadata>>,
    classes: Vec<String>,
}

impl InMemorySchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity: EntityMetadata) -> Self {
        self.entities.insert(entity.name.clone(), Arc::new(entity));
        self
    }

    /// Register a class that `SELECT NEW` may construct. Once any class is
    /// registered, unregistered names are rejected.
    pub fn with_class(mut self, class: &str) -> Self {
        self.classes.push(class.to_string());
        self
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let document: SchemaDocument = serde_json::from_str(text)?;
        let mut schema = InMemorySchema::new();
        for entity in document.entities {
            schema = schema.with_entity(entity);
        }
        schema.classes = document.classes;
        Ok(schema)
    }
}

impl SchemaResolver for InMemorySchema {
    fn lookup_schema(&self, name: &str) -> Option<Arc<EntityMetadata>> {
        if let Some(entity) = self.entities.get(name) {
            return Some(entity.clone());
        }
        // Qualified names resolve by their last segment.
        let (_, tail) = name.rsplit_once('.')?;
        self.entities.get(tail).cloned()
    }

    fn resolve_class(&self, name: &str) -> ClassLookup {
        if self.classes.is_empty() {
            return ClassLookup::Found(name.to_string());
        }
        if self.classes.iter().any(|c| c == name) {
            return ClassLookup::Found(name.to_string());
        }
        let suffix = format!(".{name}");
        let candidates: Vec<String> = self
            .classes
            .iter()
            .filter(|c| c.ends_with(&suffix))
            .cloned()
            .collect();
        match candidates.len() {
            0 => ClassLookup::Missing,
            1 => ClassLookup::Found(candidates[0].clone()),
            _ => ClassLookup::Ambiguous(candidates),
        }
    }
}
