// SQL Dialect Handling
// Placeholder rewriting, pagination and catalog queries per engine

use crate::db::traits::DatabaseError;
use crate::db::types::DatabaseType;

/// Scan state shared by the helpers that must ignore quoted text
struct Scanner<'a> {
    chars: std::str::CharIndices<'a>,
    quote: Option<char>,
}

impl<'a> Scanner<'a> {
    fn new(sql: &'a str) -> Self {
        Self {
            chars: sql.char_indices(),
            quote: None,
        }
    }
}

impl Iterator for Scanner<'_> {
    /// (byte offset, char, inside a quoted literal or identifier)
    type Item = (usize, char, bool);

    fn next(&mut self) -> Option<Self::Item> {
        let (idx, c) = self.chars.next()?;
        match self.quote {
            // a doubled quote closes and immediately reopens the literal
            Some(q) if c == q => {
                self.quote = None;
                Some((idx, c, true))
            }
            Some(_) => Some((idx, c, true)),
            None if c == '\'' || c == '"' || c == '`' => {
                self.quote = Some(c);
                Some((idx, c, true))
            }
            None => Some((idx, c, false)),
        }
    }
}

/// Rewrite positional `?` placeholders into the engine's native form
pub fn rewrite_placeholders(sql: &str, engine: DatabaseType) -> String {
    let prefix = match engine {
        DatabaseType::Postgres => "$",
        DatabaseType::Mssql => "@P",
        _ => return sql.to_string(),
    };

    let mut out = String::with_capacity(sql.len() + 8);
    let mut position = 0;
    for (_, c, quoted) in Scanner::new(sql) {
        if c == '?' && !quoted {
            position += 1;
            out.push_str(prefix);
            out.push_str(&position.to_string());
        } else {
            out.push(c);
        }
    }
    out
}

/// Byte offset of the last top-level occurrence of `keyword` (case-insensitive),
/// outside of quotes and parentheses.
fn find_top_level_keyword(sql: &str, keyword: &str) -> Option<usize> {
    let upper = sql.to_ascii_uppercase();
    let keyword = keyword.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    let mut depth = 0i32;
    let mut found = None;

    for (idx, c, quoted) in Scanner::new(sql) {
        if quoted {
            continue;
        }
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ if depth == 0 && upper[idx..].starts_with(&keyword) => {
                let before_ok = idx == 0 || !is_word_byte(bytes[idx - 1]);
                let end = idx + keyword.len();
                let after_ok = end >= bytes.len() || !is_word_byte(bytes[end]);
                if before_ok && after_ok {
                    found = Some(idx);
                }
            }
            _ => {}
        }
    }
    found
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn trim_statement(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

fn find_order_by(sql: &str) -> Option<usize> {
    let order = find_top_level_keyword(sql, "ORDER")?;
    sql[order + 5..]
        .trim_start()
        .to_ascii_uppercase()
        .starts_with("BY")
        .then_some(order)
}

/// Wrap a query so it returns one page of rows.
///
/// Without a `limit` the page runs from `skip` to the last row.
pub fn paginate(sql: &str, engine: DatabaseType, limit: Option<u64>, skip: u64) -> String {
    let sql = trim_statement(sql);
    match engine {
        DatabaseType::Mssql => {
            let ordered = if find_order_by(sql).is_some() {
                sql.to_string()
            } else {
                format!("{} ORDER BY (SELECT NULL)", sql)
            };
            match limit {
                Some(limit) => {
                    format!("{} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY", ordered, skip, limit)
                }
                None => format!("{} OFFSET {} ROWS", ordered, skip),
            }
        }
        DatabaseType::Firebird => match limit {
            Some(limit) => format!("SELECT FIRST {} SKIP {} * FROM ({}) AS t", limit, skip, sql),
            None => format!("SELECT SKIP {} * FROM ({}) AS t", skip, sql),
        },
        DatabaseType::Sqlite | DatabaseType::Mysql | DatabaseType::Postgres => {
            // OFFSET is only valid after a LIMIT on SQLite and MySQL
            let bound = match (limit, engine) {
                (Some(limit), _) => limit.to_string(),
                (None, DatabaseType::Sqlite) => "-1".to_string(),
                (None, DatabaseType::Mysql) => u64::MAX.to_string(),
                (None, _) => "ALL".to_string(),
            };
            if find_top_level_keyword(sql, "LIMIT").is_some() {
                format!("SELECT * FROM ({}) AS t LIMIT {} OFFSET {}", sql, bound, skip)
            } else {
                format!("{} LIMIT {} OFFSET {}", sql, bound, skip)
            }
        }
    }
}

/// Query counting every row `sql` would return, ignoring its ordering
pub fn count_query(sql: &str) -> String {
    let sql = trim_statement(sql);
    let unordered = match find_order_by(sql) {
        Some(idx) => sql[..idx].trim_end(),
        None => sql,
    };
    format!("SELECT count(*) AS count_records FROM ({}) AS t", unordered)
}

/// Catalog lookup taking the table name as its only `?` parameter
pub fn table_exists_query(engine: DatabaseType) -> &'static str {
    match engine {
        DatabaseType::Sqlite => {
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?"
        }
        DatabaseType::Postgres => {
            "SELECT table_name FROM information_schema.tables WHERE lower(table_name) = lower(?)"
        }
        DatabaseType::Mysql => {
            "SELECT table_name FROM information_schema.tables WHERE table_schema = DATABASE() AND table_name = ?"
        }
        DatabaseType::Mssql => {
            "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_NAME = ?"
        }
        DatabaseType::Firebird => {
            "SELECT RDB$RELATION_NAME FROM RDB$RELATIONS WHERE TRIM(RDB$RELATION_NAME) = UPPER(?)"
        }
    }
}

/// Table and column names are spliced into SQL, so only plain identifiers pass
pub fn validate_identifier(name: &str) -> Result<&str, DatabaseError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        }
        _ => false,
    };
    if valid && !name.ends_with('.') {
        Ok(name)
    } else {
        Err(DatabaseError::InvalidIdentifier(name.to_string()))
    }
}

pub fn insert_statement(table: &str, columns: &[&str]) -> String {
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders
    )
}

pub fn update_statement(table: &str, columns: &[&str], key: &str) -> String {
    let assignments = columns
        .iter()
        .map(|c| format!("{} = ?", c))
        .collect::<Vec<_>>()
        .join(", ");
    format!("UPDATE {} SET {} WHERE {} = ?", table, assignments, key)
}

pub fn delete_statement(table: &str, key: &str) -> String {
    format!("DELETE FROM {} WHERE {} = ?", table, key)
}

pub fn next_id_query(table: &str, column: &str) -> String {
    format!("SELECT max({}) AS max_id FROM {}", column, table)
}
