//! Entity descriptors: per-type compiled mapping from record fields to table
//! columns.
//!
//! A [`TableDescriptor`] is built once per entity type from the type's
//! declarative metadata and cached for the process lifetime. It holds the
//! column list in declaration order (that order fixes SQL column order and
//! parameter order), the identifier and concurrency-token columns, and the
//! precomputed statement templates. Descriptors are immutable after
//! construction and shared without locking.
//!
//! Value extraction goes through [`Entity::column_value`], a hand-written
//! index-based accessor per entity type. Repeated use is O(columns) with no
//! per-call metadata scan.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::error::{DalError, DalResult};
use crate::models::{Row, Value};

/// Metadata for one mapped column.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    /// Record field name.
    pub field: &'static str,
    /// Table column name.
    pub column: &'static str,
    /// Part of the row identifier (composite keys declare several).
    pub identifier: bool,
    /// Row version column used for optimistic compare-and-swap updates.
    pub concurrency_token: bool,
    /// References another entity's identifier.
    pub foreign_ref: bool,
}

impl ColumnSpec {
    /// Plain data column.
    pub fn new(field: &'static str, column: &'static str) -> Self {
        Self {
            field,
            column,
            identifier: false,
            concurrency_token: false,
            foreign_ref: false,
        }
    }

    /// Mark this column as (part of) the identifier.
    pub fn identifier(mut self) -> Self {
        self.identifier = true;
        self
    }

    /// Mark this column as the concurrency token.
    pub fn concurrency_token(mut self) -> Self {
        self.concurrency_token = true;
        self
    }

    /// Mark this column as a foreign reference.
    pub fn foreign_ref(mut self) -> Self {
        self.foreign_ref = true;
        self
    }
}

/// Declarative metadata supplied by an entity type.
///
/// The column list must be deterministic: repeated calls to
/// [`Entity::meta`] return identical output for the same type. Types built
/// from a supertype chain list base columns first; later fields never
/// reorder earlier ones.
#[derive(Debug, Clone)]
pub struct EntityMeta {
    pub table: &'static str,
    pub columns: Vec<ColumnSpec>,
    /// Explicit opt-out for tables without an identifier. Absent this flag,
    /// a type with zero identifier columns fails descriptor construction.
    pub no_identifier: bool,
}

impl EntityMeta {
    pub fn new(table: &'static str, columns: Vec<ColumnSpec>) -> Self {
        Self {
            table,
            columns,
            no_identifier: false,
        }
    }

    /// Declare that this type intentionally maps a table with no identifier.
    pub fn without_identifier(mut self) -> Self {
        self.no_identifier = true;
        self
    }
}

/// A typed record mapped to a relational table.
///
/// Implementations are the "compiled accessor" for the type: `column_value`
/// is a hand-written match over declaration-order indices, so extraction
/// never walks metadata at call time.
pub trait Entity: Send + Sync + Sized + 'static {
    /// Declarative metadata. Must be deterministic.
    fn meta() -> EntityMeta;

    /// Convert a raw row into a typed record. Rows produced by this crate's
    /// select templates carry `<table>_<column>` names; the [`Row`] getters
    /// map NULL cells to zero-equivalents.
    fn hydrate(row: &Row) -> DalResult<Self>;

    /// Value of the column at `index` in declaration order.
    fn column_value(&self, index: usize) -> Value;

    /// Write a provider-generated key into the identifier field. Only called
    /// for keys > 0 on the auto-increment insert path.
    fn set_generated_key(&mut self, _key: i64) {}

    /// Current concurrency-token value, when a token column is declared.
    fn token_value(&self) -> Option<i64> {
        None
    }

    /// Rollback hook for the token field: restores the pre-attempt value
    /// after a lost optimistic update.
    fn set_token_value(&mut self, _value: i64) {}
}

/// Immutable per-type mapping: columns, identifier layout, statement
/// templates. Safe for concurrent reuse without locking.
#[derive(Debug)]
pub struct TableDescriptor {
    table: String,
    columns: Vec<ColumnSpec>,
    identifier_indices: Vec<usize>,
    non_identifier_indices: Vec<usize>,
    token_index: Option<usize>,
    insert_template: Option<String>,
    update_by_id_template: Option<String>,
    delete_by_id_template: Option<String>,
    select_columns: String,
}

impl TableDescriptor {
    /// Build a descriptor from entity metadata. Mapping-rule violations are
    /// configuration errors raised here, at first use, never later.
    pub fn build(meta: EntityMeta) -> DalResult<Self> {
        if meta.table.trim().is_empty() {
            return Err(DalError::configuration("table name not set"));
        }
        if meta.columns.is_empty() {
            return Err(DalError::configuration(format!(
                "no columns mapped for table '{}'",
                meta.table
            )));
        }
        let mut seen: Vec<&str> = Vec::with_capacity(meta.columns.len());
        for spec in &meta.columns {
            if spec.column.trim().is_empty() {
                return Err(DalError::configuration(format!(
                    "field '{}' on table '{}' has no column name",
                    spec.field, meta.table
                )));
            }
            if seen.contains(&spec.column) {
                return Err(DalError::configuration(format!(
                    "duplicate column '{}' on table '{}'",
                    spec.column, meta.table
                )));
            }
            seen.push(spec.column);
        }

        let identifier_indices: Vec<usize> = meta
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.identifier)
            .map(|(i, _)| i)
            .collect();
        let non_identifier_indices: Vec<usize> = meta
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.identifier)
            .map(|(i, _)| i)
            .collect();
        if identifier_indices.is_empty() && !meta.no_identifier {
            return Err(DalError::configuration(format!(
                "no identifier column for table '{}' and no explicit opt-out",
                meta.table
            )));
        }
        if !identifier_indices.is_empty() && meta.no_identifier {
            return Err(DalError::configuration(format!(
                "table '{}' declares identifier columns together with the no-identifier opt-out",
                meta.table
            )));
        }

        let token_indices: Vec<usize> = meta
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.concurrency_token)
            .map(|(i, _)| i)
            .collect();
        if token_indices.len() > 1 {
            return Err(DalError::configuration(format!(
                "more than one concurrency-token column on table '{}'",
                meta.table
            )));
        }
        let token_index = token_indices.first().copied();
        if let Some(i) = token_index {
            if meta.columns[i].identifier {
                return Err(DalError::configuration(format!(
                    "concurrency-token column '{}' on table '{}' cannot be an identifier",
                    meta.columns[i].column, meta.table
                )));
            }
        }

        let table = meta.table.to_string();
        let select_columns = meta
            .columns
            .iter()
            .map(|c| format!("{}.{} as {}_{}", table, c.column, table, c.column))
            .collect::<Vec<_>>()
            .join(",");

        let insert_template = Some(build_insert(&table, &meta.columns, true));
        let (update_by_id_template, delete_by_id_template) = if identifier_indices.is_empty() {
            (None, None)
        } else {
            let id_predicate = id_predicate(&meta.columns, &identifier_indices);
            let sets = non_identifier_indices
                .iter()
                .map(|&i| format!("{}=?", meta.columns[i].column))
                .collect::<Vec<_>>()
                .join(",");
            (
                Some(format!(
                    "update {} set {} where {}",
                    table, sets, id_predicate
                )),
                Some(format!("delete from {} where {}", table, id_predicate)),
            )
        };

        Ok(Self {
            table,
            columns: meta.columns,
            identifier_indices,
            non_identifier_indices,
            token_index,
            insert_template,
            update_by_id_template,
            delete_by_id_template,
            select_columns,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// All mapped columns in declaration order.
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Identifier columns in declaration order.
    pub fn identifier_columns(&self) -> Vec<&ColumnSpec> {
        self.identifier_indices
            .iter()
            .map(|&i| &self.columns[i])
            .collect()
    }

    pub(crate) fn identifier_indices(&self) -> &[usize] {
        &self.identifier_indices
    }

    pub(crate) fn non_identifier_indices(&self) -> &[usize] {
        &self.non_identifier_indices
    }

    pub fn token_column(&self) -> Option<&ColumnSpec> {
        self.token_index.map(|i| &self.columns[i])
    }

    pub(crate) fn token_index(&self) -> Option<usize> {
        self.token_index
    }

    /// Select list with every column aliased `<table>_<column>`, which keeps
    /// multi-table projections unambiguous.
    pub fn select_columns(&self) -> &str {
        &self.select_columns
    }

    /// Aliased name of one column, as it appears in result rows.
    pub fn full_column(&self, column: &str) -> String {
        format!("{}_{}", self.table, column)
    }

    pub(crate) fn insert_template(&self) -> &str {
        self.insert_template.as_deref().unwrap_or_default()
    }

    pub(crate) fn update_by_id_template(&self) -> Option<&str> {
        self.update_by_id_template.as_deref()
    }

    pub(crate) fn delete_by_id_template(&self) -> Option<&str> {
        self.delete_by_id_template.as_deref()
    }

    /// Predicate over the identifier columns, `id=?` or
    /// `id=? and id2=?` for composite keys.
    pub(crate) fn identifier_predicate(&self) -> DalResult<String> {
        if self.identifier_indices.is_empty() {
            return Err(DalError::configuration(format!(
                "table '{}' has no identifier columns",
                self.table
            )));
        }
        Ok(id_predicate(&self.columns, &self.identifier_indices))
    }

    /// True when the type maps exactly one identifier column whose current
    /// value is numeric (or NULL), the only shape eligible for generated-key
    /// capture.
    pub(crate) fn single_numeric_identifier<T: Entity>(&self, entity: &T) -> Option<i64> {
        if self.identifier_indices.len() != 1 {
            return None;
        }
        match entity.column_value(self.identifier_indices[0]) {
            Value::Null => Some(0),
            Value::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Parameter values for insert, in column declaration order. With
    /// `include_identifier` false the identifier values are omitted to match
    /// the identifier-less insert template.
    pub fn insert_values<T: Entity>(&self, entity: &T, include_identifier: bool) -> Vec<Value> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| include_identifier || !c.identifier)
            .map(|(i, _)| entity.column_value(i))
            .collect()
    }

    /// Parameter values for the full-row update template: non-identifier
    /// columns in declaration order, then the identifier values.
    pub fn update_values<T: Entity>(&self, entity: &T) -> Vec<Value> {
        let mut values: Vec<Value> = self
            .non_identifier_indices
            .iter()
            .map(|&i| entity.column_value(i))
            .collect();
        values.extend(self.identifier_values(entity));
        values
    }

    /// Identifier values alone, in declaration order.
    pub fn identifier_values<T: Entity>(&self, entity: &T) -> Vec<Value> {
        self.identifier_indices
            .iter()
            .map(|&i| entity.column_value(i))
            .collect()
    }
}

fn build_insert(table: &str, columns: &[ColumnSpec], include_identifier: bool) -> String {
    let cols = columns
        .iter()
        .filter(|c| include_identifier || !c.identifier)
        .map(|c| c.column)
        .collect::<Vec<_>>();
    let placeholders = vec!["?"; cols.len()].join(",");
    format!(
        "insert into {}({}) values({})",
        table,
        cols.join(","),
        placeholders
    )
}

fn id_predicate(columns: &[ColumnSpec], identifier_indices: &[usize]) -> String {
    identifier_indices
        .iter()
        .map(|&i| format!("{}=?", columns[i].column))
        .collect::<Vec<_>>()
        .join(" and ")
}

type Registry = RwLock<HashMap<TypeId, Arc<TableDescriptor>>>;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Get or build the descriptor for an entity type.
///
/// Idempotent and thread-safe. Concurrent first callers may race to build;
/// the race is benign because descriptors built from the same deterministic
/// metadata are equivalent and immutable, and only one is ever published.
pub fn descriptor<T: Entity>() -> DalResult<Arc<TableDescriptor>> {
    let registry = REGISTRY.get_or_init(|| RwLock::new(HashMap::new()));
    if let Some(found) = registry.read().unwrap().get(&TypeId::of::<T>()) {
        return Ok(Arc::clone(found));
    }
    // Build outside the write lock so one slow build never serializes
    // unrelated types.
    let built = Arc::new(TableDescriptor::build(T::meta())?);
    let mut map = registry.write().unwrap();
    Ok(Arc::clone(
        map.entry(TypeId::of::<T>()).or_insert(built),
    ))
}
