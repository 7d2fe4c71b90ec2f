//! Statement-text builders.
//!
//! Pure functions combining a [`TableDescriptor`] with caller-supplied
//! fragments ("after-from" / "set" strings). No caching beyond what the
//! descriptor precomputes; callers pass fragments verbatim, so the only
//! validation here is structural (e.g. an in-clause needs at least one
//! placeholder).

use crate::error::{DalError, DalResult};
use crate::schema::TableDescriptor;

/// Insert statement flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    Insert,
    Replace,
    InsertIgnore,
}

impl InsertMode {
    fn verb(self) -> &'static str {
        match self {
            Self::Insert => "insert into",
            Self::Replace => "replace into",
            Self::InsertIgnore => "insert ignore into",
        }
    }
}

fn append_fragment(mut sql: String, fragment: &str) -> String {
    let fragment = fragment.trim();
    if !fragment.is_empty() {
        sql.push(' ');
        sql.push_str(fragment);
    }
    sql
}

/// `select count(*) from <table> <after_from>`
pub fn count(descriptor: &TableDescriptor, after_from: &str) -> String {
    append_fragment(
        format!("select count(*) from {}", descriptor.table()),
        after_from,
    )
}

/// `select <aliased columns> from <table> <after_from>`
pub fn list(descriptor: &TableDescriptor, after_from: &str) -> String {
    append_fragment(
        format!(
            "select {} from {}",
            descriptor.select_columns(),
            descriptor.table()
        ),
        after_from,
    )
}

/// List statement with a MySQL-style `limit <begin>,<size>` tail.
pub fn page(descriptor: &TableDescriptor, after_from: &str, begin: u64, size: u64) -> String {
    format!("{} limit {},{}", list(descriptor, after_from), begin, size)
}

/// Insert statement. With `include_identifier` false the identifier columns
/// are omitted from both the column list and the placeholder list, which is
/// the auto-increment generated-key path.
pub fn insert(descriptor: &TableDescriptor, include_identifier: bool, mode: InsertMode) -> String {
    if include_identifier && mode == InsertMode::Insert {
        return descriptor.insert_template().to_string();
    }
    let cols: Vec<&str> = descriptor
        .columns()
        .iter()
        .filter(|c| include_identifier || !c.identifier)
        .map(|c| c.column)
        .collect();
    let placeholders = vec!["?"; cols.len()].join(",");
    format!(
        "{} {}({}) values({})",
        mode.verb(),
        descriptor.table(),
        cols.join(","),
        placeholders
    )
}

/// `update <table> <set_fragment>`; the fragment is caller- or
/// diff-engine-supplied and carries its own `set`/`where` text.
pub fn update(descriptor: &TableDescriptor, set_fragment: &str) -> String {
    append_fragment(format!("update {}", descriptor.table()), set_fragment)
}

/// Full-row update template: every non-identifier column, identifier
/// predicate in the tail.
pub fn update_by_id(descriptor: &TableDescriptor) -> DalResult<String> {
    descriptor
        .update_by_id_template()
        .map(str::to_string)
        .ok_or_else(|| no_identifier(descriptor))
}

/// `delete from <table> <after_from>`
pub fn delete(descriptor: &TableDescriptor, after_from: &str) -> String {
    append_fragment(format!("delete from {}", descriptor.table()), after_from)
}

/// `delete from <table> where <identifier predicate>`
pub fn delete_by_id(descriptor: &TableDescriptor) -> DalResult<String> {
    descriptor
        .delete_by_id_template()
        .map(str::to_string)
        .ok_or_else(|| no_identifier(descriptor))
}

/// Identifier predicate for select-by-id, optionally locking the row.
pub fn by_ids_predicate(descriptor: &TableDescriptor, for_update: bool) -> DalResult<String> {
    let predicate = descriptor.identifier_predicate()?;
    if for_update {
        Ok(format!("where {} for update", predicate))
    } else {
        Ok(format!("where {}", predicate))
    }
}

/// `<column> in (?,?,...)` with exactly `count` placeholders.
///
/// A zero count is invalid: callers must short-circuit empty membership
/// sets to a zero-result outcome before any SQL is built.
pub fn in_clause(column: &str, count: usize) -> DalResult<String> {
    if count == 0 {
        return Err(DalError::invalid_input(format!(
            "in-clause for column '{}' needs at least one value",
            column
        )));
    }
    Ok(format!("{} in ({})", column, vec!["?"; count].join(",")))
}

fn no_identifier(descriptor: &TableDescriptor) -> DalError {
    DalError::configuration(format!(
        "table '{}' has no identifier columns",
        descriptor.table()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSpec, EntityMeta};

    fn user_descriptor() -> TableDescriptor {
        TableDescriptor::build(EntityMeta::new(
            "testuser",
            vec![
                ColumnSpec::new("userid", "userid").identifier(),
                ColumnSpec::new("nick", "nick"),
                ColumnSpec::new("money", "money"),
            ],
        ))
        .unwrap()
    }

    #[test]
    fn test_count_and_list() {
        let d = user_descriptor();
        assert_eq!(
            count(&d, "where nick=?"),
            "select count(*) from testuser where nick=?"
        );
        assert_eq!(count(&d, ""), "select count(*) from testuser");
        assert_eq!(
            list(&d, "where money>? order by userid desc"),
            "select testuser.userid as testuser_userid,testuser.nick as testuser_nick,\
             testuser.money as testuser_money from testuser where money>? order by userid desc"
        );
    }

    #[test]
    fn test_page_appends_limit() {
        let d = user_descriptor();
        let sql = page(&d, "where money>?", 20, 10);
        assert!(sql.ends_with("where money>? limit 20,10"));
    }

    #[test]
    fn test_insert_modes() {
        let d = user_descriptor();
        assert_eq!(
            insert(&d, true, InsertMode::Insert),
            "insert into testuser(userid,nick,money) values(?,?,?)"
        );
        assert_eq!(
            insert(&d, false, InsertMode::Insert),
            "insert into testuser(nick,money) values(?,?)"
        );
        assert_eq!(
            insert(&d, true, InsertMode::Replace),
            "replace into testuser(userid,nick,money) values(?,?,?)"
        );
        assert_eq!(
            insert(&d, true, InsertMode::InsertIgnore),
            "insert ignore into testuser(userid,nick,money) values(?,?,?)"
        );
    }

    #[test]
    fn test_update_and_delete() {
        let d = user_descriptor();
        assert_eq!(
            update(&d, "set nick=? where userid=?"),
            "update testuser set nick=? where userid=?"
        );
        assert_eq!(
            delete(&d, "where money<?"),
            "delete from testuser where money<?"
        );
        assert_eq!(
            delete_by_id(&d).unwrap(),
            "delete from testuser where userid=?"
        );
        assert_eq!(
            update_by_id(&d).unwrap(),
            "update testuser set nick=?,money=? where userid=?"
        );
    }

    #[test]
    fn test_by_ids_predicate_for_update() {
        let d = user_descriptor();
        assert_eq!(by_ids_predicate(&d, false).unwrap(), "where userid=?");
        assert_eq!(
            by_ids_predicate(&d, true).unwrap(),
            "where userid=? for update"
        );
    }

    #[test]
    fn test_in_clause() {
        assert_eq!(in_clause("userid", 3).unwrap(), "userid in (?,?,?)");
        assert!(matches!(
            in_clause("userid", 0),
            Err(DalError::InvalidInput { .. })
        ));
    }
}
