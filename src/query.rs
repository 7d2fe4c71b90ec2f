//! Typed operation surface.
//!
//! One `Query` value per process, holding the router. Every operation takes
//! the unit of work's [`RoutingContext`]: reads resolve through slave-mode
//! and sticky-replica rules, writes always target the master. Statement text
//! comes from the per-type descriptor plus caller fragments; parameters come
//! from the descriptor's extraction helpers, so no operation scans metadata
//! at call time.

use std::sync::Arc;

use tracing::debug;

use crate::db::{DataSourceRouter, RoutingContext};
use crate::error::{DalError, DalResult};
use crate::models::{Row, Value};
use crate::schema::{self, Entity, InsertMode, TableDescriptor, sql};

/// Outcome of an identifier-scoped update.
///
/// A lost optimistic update is a normal result, not an error: missing row
/// and stale token are reported identically, and the caller owns any retry
/// policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Exactly one row changed.
    Applied,
    /// Zero rows changed: the identifier did not exist or the concurrency
    /// token no longer matched.
    Lost,
    /// Nothing differed from the snapshot; no statement was issued.
    NoChange,
}

impl UpdateOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, Self::Applied)
    }

    /// Affected-row count the outcome stands for.
    pub fn rows(&self) -> u64 {
        match self {
            Self::Applied => 1,
            Self::Lost | Self::NoChange => 0,
        }
    }
}

/// High-level typed operations over the routed providers.
#[derive(Debug, Clone)]
pub struct Query {
    router: Arc<DataSourceRouter>,
}

impl Query {
    pub fn new(router: Arc<DataSourceRouter>) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Arc<DataSourceRouter> {
        &self.router
    }

    /// `select count(*) from <table> <after_from>`.
    pub async fn count<T: Entity>(
        &self,
        cx: &mut RoutingContext,
        after_from: &str,
        values: &[Value],
    ) -> DalResult<i64> {
        let descriptor = schema::descriptor::<T>()?;
        let statement = sql::count(&descriptor, after_from);
        let rows = self.fetch(cx, &statement, values).await?;
        scalar_i64(&rows, &statement)
    }

    /// Count with a single `in (?,...)` predicate. An empty membership set
    /// short-circuits to zero without touching a provider.
    pub async fn count_in_values<T: Entity>(
        &self,
        cx: &mut RoutingContext,
        after_from: &str,
        in_column: &str,
        values: &[Value],
        in_values: &[Value],
    ) -> DalResult<i64> {
        if in_values.is_empty() {
            return Ok(0);
        }
        let fragment = in_fragment(after_from, in_column, in_values.len(), None)?;
        let params = concat_params(values, in_values);
        self.count::<T>(cx, &fragment, &params).await
    }

    /// Select a list of typed records.
    pub async fn list<T: Entity>(
        &self,
        cx: &mut RoutingContext,
        after_from: &str,
        values: &[Value],
    ) -> DalResult<Vec<T>> {
        let descriptor = schema::descriptor::<T>()?;
        let statement = sql::list(&descriptor, after_from);
        let rows = self.fetch(cx, &statement, values).await?;
        rows.iter().map(T::hydrate).collect()
    }

    /// List with a single `in (?,...)` predicate and an optional fragment
    /// after the predicate (order by, group by). An empty membership set
    /// short-circuits to an empty list without touching a provider.
    pub async fn list_in_values<T: Entity>(
        &self,
        cx: &mut RoutingContext,
        after_from: &str,
        in_column: &str,
        after_where: Option<&str>,
        values: &[Value],
        in_values: &[Value],
    ) -> DalResult<Vec<T>> {
        if in_values.is_empty() {
            return Ok(Vec::new());
        }
        let fragment = in_fragment(after_from, in_column, in_values.len(), after_where)?;
        let params = concat_params(values, in_values);
        self.list::<T>(cx, &fragment, &params).await
    }

    /// Paged list with a MySQL-style `limit <begin>,<size>` tail.
    pub async fn page<T: Entity>(
        &self,
        cx: &mut RoutingContext,
        after_from: &str,
        begin: u64,
        size: u64,
        values: &[Value],
    ) -> DalResult<Vec<T>> {
        let descriptor = schema::descriptor::<T>()?;
        let statement = sql::page(&descriptor, after_from, begin, size);
        let rows = self.fetch(cx, &statement, values).await?;
        rows.iter().map(T::hydrate).collect()
    }

    /// Select a single record. More than one matching row is an integrity
    /// violation.
    pub async fn obj<T: Entity>(
        &self,
        cx: &mut RoutingContext,
        after_from: &str,
        values: &[Value],
    ) -> DalResult<Option<T>> {
        let descriptor = schema::descriptor::<T>()?;
        let statement = sql::list(&descriptor, after_from);
        let rows = self.fetch(cx, &statement, values).await?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(Some(T::hydrate(&rows[0])?)),
            n => Err(DalError::integrity(format!(
                "expected at most 1 row, query returned {} (statement: {})",
                n, statement
            ))),
        }
    }

    /// Select by identifier value(s).
    pub async fn by_ids<T: Entity>(
        &self,
        cx: &mut RoutingContext,
        ids: &[Value],
    ) -> DalResult<Option<T>> {
        self.by_ids_inner(cx, ids, false).await
    }

    /// Select by identifier value(s) with `for update` row locking. Locking
    /// reads always target the master: a lock taken on a replica protects
    /// nothing.
    pub async fn by_ids_for_update<T: Entity>(
        &self,
        cx: &mut RoutingContext,
        ids: &[Value],
    ) -> DalResult<Option<T>> {
        self.by_ids_inner(cx, ids, true).await
    }

    async fn by_ids_inner<T: Entity>(
        &self,
        cx: &mut RoutingContext,
        ids: &[Value],
        for_update: bool,
    ) -> DalResult<Option<T>> {
        let descriptor = schema::descriptor::<T>()?;
        check_id_arity(&descriptor, ids)?;
        let statement = sql::list(&descriptor, &sql::by_ids_predicate(&descriptor, for_update)?);
        let rows = if for_update {
            debug!(unit_of_work = %cx.id(), sql = %statement, "Executing locking read on master");
            let mut handle = self.router.checkout_write(cx).await?;
            handle.query(&statement, ids).await?
        } else {
            self.fetch(cx, &statement, ids).await?
        };
        match rows.len() {
            0 => Ok(None),
            1 => Ok(Some(T::hydrate(&rows[0])?)),
            n => Err(DalError::integrity(format!(
                "identifier matched {} rows (statement: {})",
                n, statement
            ))),
        }
    }

    /// Insert one record.
    ///
    /// Types with a single numeric identifier currently at zero (or NULL)
    /// take the auto-increment path: the identifier column is omitted, the
    /// provider-generated key is captured, written back when positive, and
    /// returned. Any other shape does a full insert and returns `None`.
    pub async fn insert<T: Entity>(
        &self,
        cx: &mut RoutingContext,
        entity: &mut T,
    ) -> DalResult<Option<i64>> {
        self.insert_with(cx, entity, InsertMode::Insert).await
    }

    /// `replace into` variant of [`Query::insert`].
    pub async fn replace<T: Entity>(
        &self,
        cx: &mut RoutingContext,
        entity: &mut T,
    ) -> DalResult<Option<i64>> {
        self.insert_with(cx, entity, InsertMode::Replace).await
    }

    /// `insert ignore into` variant of [`Query::insert`].
    pub async fn insert_ignore<T: Entity>(
        &self,
        cx: &mut RoutingContext,
        entity: &mut T,
    ) -> DalResult<Option<i64>> {
        self.insert_with(cx, entity, InsertMode::InsertIgnore).await
    }

    /// Insert with an explicit statement flavor.
    pub async fn insert_with<T: Entity>(
        &self,
        cx: &mut RoutingContext,
        entity: &mut T,
        mode: InsertMode,
    ) -> DalResult<Option<i64>> {
        let descriptor = schema::descriptor::<T>()?;
        let generate_key = matches!(
            descriptor.single_numeric_identifier(entity),
            Some(current) if current <= 0
        );
        let statement = sql::insert(&descriptor, !generate_key, mode);
        let params = descriptor.insert_values(entity, !generate_key);
        debug!(
            unit_of_work = %cx.id(),
            sql = %statement,
            params = params.len(),
            "Executing insert"
        );
        let mut handle = self.router.checkout_write(cx).await?;
        if generate_key {
            let key = handle.execute_returning_key(&statement, &params).await?;
            if key > 0 {
                entity.set_generated_key(key);
                return Ok(Some(key));
            }
            return Ok(None);
        }
        handle.execute(&statement, &params).await?;
        Ok(None)
    }

    /// Insert several records as one provider-level batch.
    ///
    /// Generated keys are assigned back in input order, but only when the
    /// provider returns exactly one key per input row; on any count mismatch
    /// the identifiers are left untouched and the batch still succeeds.
    pub async fn batch_insert<T: Entity>(
        &self,
        cx: &mut RoutingContext,
        entities: &mut [T],
    ) -> DalResult<()> {
        if entities.is_empty() {
            return Err(DalError::invalid_input(
                "batch insert needs at least one record",
            ));
        }
        let descriptor = schema::descriptor::<T>()?;
        let statement = sql::insert(&descriptor, true, InsertMode::Insert);
        let param_sets: Vec<Vec<Value>> = entities
            .iter()
            .map(|e| descriptor.insert_values(e, true))
            .collect();
        debug!(
            unit_of_work = %cx.id(),
            sql = %statement,
            batch = param_sets.len(),
            "Executing batch insert"
        );
        let mut handle = self.router.checkout_write(cx).await?;
        let keys = handle
            .execute_batch_returning_keys(&statement, &param_sets)
            .await?;
        if descriptor.identifier_columns().len() != 1 {
            return Ok(());
        }
        if keys.len() != entities.len() {
            debug!(
                expected = entities.len(),
                returned = keys.len(),
                "Generated-key count mismatch; identifiers left untouched"
            );
            return Ok(());
        }
        for (entity, key) in entities.iter_mut().zip(keys) {
            let eligible = matches!(
                descriptor.single_numeric_identifier(entity),
                Some(current) if current <= 0
            );
            if eligible && key > 0 {
                entity.set_generated_key(key);
            }
        }
        Ok(())
    }

    /// Full-row update by identifier.
    pub async fn update<T: Entity>(
        &self,
        cx: &mut RoutingContext,
        entity: &T,
    ) -> DalResult<UpdateOutcome> {
        self.update_snapshot(cx, entity, None).await
    }

    /// Minimal update: only columns whose value differs from `snapshot` are
    /// written. With no snapshot this is a full-row update. When nothing
    /// changed, no statement is issued and [`UpdateOutcome::NoChange`] is
    /// returned.
    pub async fn update_snapshot<T: Entity>(
        &self,
        cx: &mut RoutingContext,
        entity: &T,
        snapshot: Option<&T>,
    ) -> DalResult<UpdateOutcome> {
        let descriptor = schema::descriptor::<T>()?;
        let Some(segment) = schema::diff(&descriptor, entity, snapshot, false)? else {
            debug!(unit_of_work = %cx.id(), table = descriptor.table(), "No columns changed; update skipped");
            return Ok(UpdateOutcome::NoChange);
        };
        self.run_update(cx, &descriptor, segment.sql_seg, segment.values)
            .await
    }

    /// Optimistic update guarded by the concurrency token: a row-level
    /// compare-and-swap. On a lost update (or a provider failure) the
    /// speculative in-memory token bump is rolled back, so the caller's
    /// instance still carries its pre-attempt token.
    pub async fn cas_update<T: Entity>(
        &self,
        cx: &mut RoutingContext,
        entity: &mut T,
        snapshot: Option<&T>,
    ) -> DalResult<UpdateOutcome> {
        let descriptor = schema::descriptor::<T>()?;
        let Some(segment) = schema::diff(&descriptor, entity, snapshot, true)? else {
            return Ok(UpdateOutcome::NoChange);
        };
        let prior_token = entity.token_value();
        if let Some(token) = prior_token {
            entity.set_token_value(token + 1);
        }
        let result = self
            .run_update(cx, &descriptor, segment.sql_seg, segment.values)
            .await;
        match &result {
            Ok(UpdateOutcome::Applied) => {}
            _ => {
                if let Some(token) = prior_token {
                    entity.set_token_value(token);
                }
            }
        }
        result
    }

    /// Update with a caller-supplied `set ... [where ...]` fragment. Not
    /// identifier-scoped: the raw affected-row count comes back.
    pub async fn update_fragment<T: Entity>(
        &self,
        cx: &mut RoutingContext,
        set_fragment: &str,
        values: &[Value],
    ) -> DalResult<u64> {
        let descriptor = schema::descriptor::<T>()?;
        let statement = sql::update(&descriptor, set_fragment);
        self.execute(cx, &statement, values).await
    }

    /// Batched fragment update, one parameter set per row.
    pub async fn batch_update<T: Entity>(
        &self,
        cx: &mut RoutingContext,
        set_fragment: &str,
        value_sets: &[Vec<Value>],
    ) -> DalResult<Vec<u64>> {
        let descriptor = schema::descriptor::<T>()?;
        let statement = sql::update(&descriptor, set_fragment);
        self.execute_batch(cx, &statement, value_sets).await
    }

    /// Delete one record by its identifier values.
    pub async fn delete_entity<T: Entity>(
        &self,
        cx: &mut RoutingContext,
        entity: &T,
    ) -> DalResult<u64> {
        let descriptor = schema::descriptor::<T>()?;
        let ids = descriptor.identifier_values(entity);
        for (value, spec) in ids.iter().zip(descriptor.identifier_columns()) {
            if value.is_null() {
                return Err(DalError::integrity(format!(
                    "identifier column '{}' on table '{}' is null at write time",
                    spec.column,
                    descriptor.table()
                )));
            }
        }
        self.delete_by_ids_inner(cx, &descriptor, &ids).await
    }

    /// Delete by identifier value(s).
    pub async fn delete_by_ids<T: Entity>(
        &self,
        cx: &mut RoutingContext,
        ids: &[Value],
    ) -> DalResult<u64> {
        let descriptor = schema::descriptor::<T>()?;
        check_id_arity(&descriptor, ids)?;
        self.delete_by_ids_inner(cx, &descriptor, ids).await
    }

    async fn delete_by_ids_inner(
        &self,
        cx: &mut RoutingContext,
        descriptor: &TableDescriptor,
        ids: &[Value],
    ) -> DalResult<u64> {
        let statement = sql::delete_by_id(descriptor)?;
        let affected = self.execute(cx, &statement, ids).await?;
        if affected > 1 {
            return Err(DalError::integrity(format!(
                "identifier-scoped delete affected {} rows (statement: {})",
                affected, statement
            )));
        }
        Ok(affected)
    }

    /// Delete with a caller-supplied predicate fragment.
    pub async fn delete_where<T: Entity>(
        &self,
        cx: &mut RoutingContext,
        after_from: &str,
        values: &[Value],
    ) -> DalResult<u64> {
        let descriptor = schema::descriptor::<T>()?;
        let statement = sql::delete(&descriptor, after_from);
        self.execute(cx, &statement, values).await
    }

    /// Batched predicate delete, one parameter set per row.
    pub async fn batch_delete<T: Entity>(
        &self,
        cx: &mut RoutingContext,
        after_from: &str,
        value_sets: &[Vec<Value>],
    ) -> DalResult<Vec<u64>> {
        let descriptor = schema::descriptor::<T>()?;
        let statement = sql::delete(&descriptor, after_from);
        self.execute_batch(cx, &statement, value_sets).await
    }

    async fn run_update(
        &self,
        cx: &mut RoutingContext,
        descriptor: &TableDescriptor,
        sql_seg: String,
        values: Vec<Value>,
    ) -> DalResult<UpdateOutcome> {
        let statement = sql::update(descriptor, &sql_seg);
        let affected = self.execute(cx, &statement, &values).await?;
        match affected {
            1 => Ok(UpdateOutcome::Applied),
            0 => Ok(UpdateOutcome::Lost),
            n => Err(DalError::integrity(format!(
                "identifier-scoped update affected {} rows (statement: {})",
                n, statement
            ))),
        }
    }

    async fn fetch(
        &self,
        cx: &mut RoutingContext,
        statement: &str,
        values: &[Value],
    ) -> DalResult<Vec<Row>> {
        debug!(
            unit_of_work = %cx.id(),
            sql = %statement,
            params = values.len(),
            "Executing query"
        );
        let mut handle = self.router.checkout_read(cx).await?;
        handle.query(statement, values).await
    }

    async fn execute(
        &self,
        cx: &mut RoutingContext,
        statement: &str,
        values: &[Value],
    ) -> DalResult<u64> {
        debug!(
            unit_of_work = %cx.id(),
            sql = %statement,
            params = values.len(),
            "Executing write"
        );
        let mut handle = self.router.checkout_write(cx).await?;
        handle.execute(statement, values).await
    }

    async fn execute_batch(
        &self,
        cx: &mut RoutingContext,
        statement: &str,
        value_sets: &[Vec<Value>],
    ) -> DalResult<Vec<u64>> {
        debug!(
            unit_of_work = %cx.id(),
            sql = %statement,
            batch = value_sets.len(),
            "Executing batch write"
        );
        let mut handle = self.router.checkout_write(cx).await?;
        handle.execute_batch(statement, value_sets).await
    }
}

/// Compose `<after_from> and <column> in (?,...)` the way callers write
/// predicates: no after-from means the in-clause opens the where.
fn in_fragment(
    after_from: &str,
    in_column: &str,
    count: usize,
    after_where: Option<&str>,
) -> DalResult<String> {
    let clause = sql::in_clause(in_column, count)?;
    let mut fragment = if after_from.trim().is_empty() {
        format!("where {}", clause)
    } else {
        format!("{} and {}", after_from.trim(), clause)
    };
    if let Some(tail) = after_where {
        let tail = tail.trim();
        if !tail.is_empty() {
            fragment.push(' ');
            fragment.push_str(tail);
        }
    }
    Ok(fragment)
}

fn concat_params(values: &[Value], in_values: &[Value]) -> Vec<Value> {
    let mut params = Vec::with_capacity(values.len() + in_values.len());
    params.extend_from_slice(values);
    params.extend_from_slice(in_values);
    params
}

fn check_id_arity(descriptor: &TableDescriptor, ids: &[Value]) -> DalResult<()> {
    let expected = descriptor.identifier_columns().len();
    if expected == 0 {
        return Err(DalError::configuration(format!(
            "table '{}' has no identifier columns",
            descriptor.table()
        )));
    }
    if ids.len() != expected {
        return Err(DalError::invalid_input(format!(
            "table '{}' declares {} identifier column(s), {} value(s) given",
            descriptor.table(),
            expected,
            ids.len()
        )));
    }
    Ok(())
}

fn scalar_i64(rows: &[Row], statement: &str) -> DalResult<i64> {
    let row = rows
        .first()
        .ok_or_else(|| DalError::hydration("scalar query returned no rows", statement))?;
    match row.value_at(0) {
        Some(Value::Int(v)) => Ok(*v),
        Some(other) => Err(DalError::hydration(
            format!("scalar query returned {}", other.type_name()),
            statement,
        )),
        None => Err(DalError::hydration("scalar query returned an empty row", statement)),
    }
}
