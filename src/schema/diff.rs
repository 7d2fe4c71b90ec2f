//! Snapshot-diff engine for minimal updates.
//!
//! Compares two instances of the same type column-by-column (value equality,
//! never identity) and produces the smallest `set ... where ...` fragment
//! that brings the stored row in line with the current instance. With the
//! concurrency token enabled the fragment becomes a row-level
//! compare-and-swap: the token is bumped in SQL and the prior value is bound
//! into the predicate.

use crate::error::{DalError, DalResult};
use crate::models::Value;
use crate::schema::{Entity, TableDescriptor};

/// A finished update fragment plus its bound values in order: changed
/// columns' new values, identifier values, then the token's current value
/// when the token is in play.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateSegment {
    pub sql_seg: String,
    pub values: Vec<Value>,
}

/// Compute the minimal update segment for `current` against `snapshot`.
///
/// - No snapshot: full-row update over all non-identifier columns.
/// - Snapshot present: changed columns only. Zero changed columns without
///   the token returns `None`; the caller must skip execution and report
///   zero affected rows without touching a connection.
/// - `use_token`: the token column is set to `<token>+1` (even when nothing
///   else changed) and `and <token>=?` guards the predicate.
pub fn diff<T: Entity>(
    descriptor: &TableDescriptor,
    current: &T,
    snapshot: Option<&T>,
    use_token: bool,
) -> DalResult<Option<UpdateSegment>> {
    let token_index = if use_token {
        match descriptor.token_index() {
            Some(i) => Some(i),
            None => {
                return Err(DalError::configuration(format!(
                    "table '{}' has no concurrency-token column",
                    descriptor.table()
                )));
            }
        }
    } else {
        None
    };

    let changed: Vec<usize> = descriptor
        .non_identifier_indices()
        .iter()
        .copied()
        .filter(|&i| Some(i) != token_index)
        .filter(|&i| match snapshot {
            None => true,
            Some(snap) => current.column_value(i) != snap.column_value(i),
        })
        .collect();

    if changed.is_empty() && !use_token {
        return Ok(None);
    }

    let identifier_indices = descriptor.identifier_indices();
    if identifier_indices.is_empty() {
        return Err(DalError::configuration(format!(
            "table '{}' has no identifier columns",
            descriptor.table()
        )));
    }

    let columns = descriptor.columns();
    let mut sets: Vec<String> = changed
        .iter()
        .map(|&i| format!("{}=?", columns[i].column))
        .collect();
    if let Some(i) = token_index {
        let token = columns[i].column;
        sets.push(format!("{}={}+1", token, token));
    }

    let mut values: Vec<Value> = changed.iter().map(|&i| current.column_value(i)).collect();
    for &i in identifier_indices {
        let id_value = current.column_value(i);
        if id_value.is_null() {
            return Err(DalError::integrity(format!(
                "identifier column '{}' on table '{}' is null at write time",
                columns[i].column,
                descriptor.table()
            )));
        }
        values.push(id_value);
    }

    let mut predicate = descriptor.identifier_predicate()?;
    if let Some(i) = token_index {
        predicate.push_str(&format!(" and {}=?", columns[i].column));
        values.push(current.column_value(i));
    }

    Ok(Some(UpdateSegment {
        sql_seg: format!("set {} where {}", sets.join(","), predicate),
        values,
    }))
}
