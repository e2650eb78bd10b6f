//! Parsing of `CREATE INDEX` statements stored on collections

use once_cell::sync::Lazy;
use regex::Regex;

static INDEX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)^\s*create\s+(unique\s+)?\s*index\s*(if\s+not\s+exists\s+)?(\S*)\s+on\s+(\S*)\s*\(([\s\S]*?)\)(?:\s*where\s+([\s\S]*))?\s*;?\s*$"#,
    )
    .unwrap()
});

static INDEX_COLUMN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)^\s*(.+?)(?:\s+collate\s+(\w+))?(?:\s+(asc|desc))?\s*$"#).unwrap()
});

/// One indexed column or expression
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexColumn {
    pub name: String,
    pub collate: String,
    pub sort: String,
}

/// Components of a single `CREATE [UNIQUE] INDEX` statement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedIndex {
    pub unique: bool,
    pub optional: bool,
    pub schema_name: String,
    pub index_name: String,
    pub table_name: String,
    pub columns: Vec<IndexColumn>,
    pub where_clause: String,
}

impl ParsedIndex {
    /// Parse an index statement. Unparseable input yields an invalid (empty) index.
    pub fn parse(statement: &str) -> Self {
        let Some(caps) = INDEX_RE.captures(statement) else {
            return Self::default();
        };

        let mut index = Self {
            unique: caps.get(1).is_some(),
            optional: caps.get(2).is_some(),
            ..Self::default()
        };

        let name = trim_quotes(caps.get(3).map_or("", |m| m.as_str()));
        match name.split_once('.') {
            Some((schema, index_name)) => {
                index.schema_name = trim_quotes(schema).to_string();
                index.index_name = trim_quotes(index_name).to_string();
            }
            None => index.index_name = name.to_string(),
        }

        index.table_name = trim_quotes(caps.get(4).map_or("", |m| m.as_str())).to_string();

        let raw_columns = caps.get(5).map_or("", |m| m.as_str());
        for raw in split_columns(raw_columns) {
            let Some(col) = INDEX_COLUMN_RE.captures(&raw) else {
                continue;
            };
            let name = trim_quotes(col.get(1).map_or("", |m| m.as_str()).trim());
            if name.is_empty() {
                continue;
            }
            index.columns.push(IndexColumn {
                name: name.to_string(),
                collate: col.get(2).map_or("", |m| m.as_str()).to_string(),
                sort: col
                    .get(3)
                    .map_or(String::new(), |m| m.as_str().to_uppercase()),
            });
        }

        index.where_clause = caps
            .get(6)
            .map_or("", |m| m.as_str())
            .trim()
            .trim_end_matches(';')
            .trim()
            .to_string();

        index
    }

    /// An index needs a name, a table and at least one column
    pub fn is_valid(&self) -> bool {
        !self.index_name.is_empty() && !self.table_name.is_empty() && !self.columns.is_empty()
    }

    /// Render back into a `CREATE INDEX` statement (empty when invalid)
    pub fn build(&self) -> String {
        self.build_quoted(|ident| format!("`{}`", ident))
    }

    /// Same as [`ParsedIndex::build`] with identifiers quoted by `quote`
    pub fn build_quoted(&self, quote: impl Fn(&str) -> String) -> String {
        if !self.is_valid() {
            return String::new();
        }

        let mut sql = String::from("CREATE ");
        if self.unique {
            sql.push_str("UNIQUE ");
        }
        sql.push_str("INDEX ");
        if self.optional {
            sql.push_str("IF NOT EXISTS ");
        }
        if !self.schema_name.is_empty() {
            sql.push_str(&format!("{}.", quote(&self.schema_name)));
        }
        sql.push_str(&format!(
            "{} ON {} (",
            quote(&self.index_name),
            quote(&self.table_name)
        ));

        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|col| {
                let mut out = if col.name.contains('(') || col.name.contains(' ') {
                    col.name.clone()
                } else {
                    quote(&col.name)
                };
                if !col.collate.is_empty() {
                    out.push_str(&format!(" COLLATE {}", col.collate));
                }
                if !col.sort.is_empty() {
                    out.push(' ');
                    out.push_str(&col.sort);
                }
                out
            })
            .collect();
        sql.push_str(&columns.join(", "));
        sql.push(')');

        if !self.where_clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.where_clause);
        }

        sql
    }
}

fn trim_quotes(value: &str) -> &str {
    value.trim_matches(|c| matches!(c, '`' | '"' | '\'' | '[' | ']'))
}

// Split on top-level commas only; expressions like `lower(a, b)` stay whole
fn split_columns(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();

    for c in raw.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }

    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_parse_full_statement() {
        let idx = ParsedIndex::parse(
            "CREATE UNIQUE INDEX IF NOT EXISTS `_abc_email_idx` ON `users` (`email` COLLATE NOCASE DESC) WHERE `email` != ''",
        );
        assert!(idx.unique);
        assert!(idx.optional);
        assert_eq!(idx.index_name, "_abc_email_idx");
        assert_eq!(idx.table_name, "users");
        assert_eq!(
            idx.columns,
            vec![IndexColumn {
                name: "email".into(),
                collate: "NOCASE".into(),
                sort: "DESC".into(),
            }]
        );
        assert_eq!(idx.where_clause, "`email` != ''");
    }

    #[test]
    fn test_parse_schema_and_multiple_columns() {
        let idx = ParsedIndex::parse("create index main.idx_a on posts (a, lower(b, c))");
        assert_eq!(idx.schema_name, "main");
        assert_eq!(idx.index_name, "idx_a");
        assert_eq!(idx.columns.len(), 2);
        assert_eq!(idx.columns[1].name, "lower(b, c)");
    }

    #[test_case("" ; "empty")]
    #[test_case("select 1" ; "not an index")]
    #[test_case("CREATE INDEX idx ON posts ()" ; "no columns")]
    fn test_invalid(statement: &str) {
        let idx = ParsedIndex::parse(statement);
        assert!(!idx.is_valid());
        assert_eq!(idx.build(), "");
    }

    #[test]
    fn test_build() {
        let idx = ParsedIndex::parse("CREATE INDEX idx_title ON posts (title ASC)");
        assert_eq!(idx.build(), "CREATE INDEX `idx_title` ON `posts` (`title` ASC)");
        assert_eq!(
            idx.build_quoted(|ident| format!("\"{}\"", ident)),
            "CREATE INDEX \"idx_title\" ON \"posts\" (\"title\" ASC)"
        );
    }
}
