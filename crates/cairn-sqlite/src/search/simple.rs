use super::{json_path, AllowedFields, FieldResolver, ResolverResult, SelectQuery};
use crate::dialect::Dialect;
use crate::error::{SqliteError, SqliteResult};
use cairn_core::utils::columnify;

/// Resolver for plain tables without relations.
///
/// `a` resolves to the column `a`; `a.b.0` reads the JSON path `b[0]`
/// out of column `a`.
#[derive(Debug, Clone)]
pub struct SimpleFieldResolver {
    allowed_fields: AllowedFields,
    dialect: Dialect,
}

impl SimpleFieldResolver {
    /// `allowed_fields` entries are literal names or `^...$` regular expressions
    pub fn new<S: AsRef<str>>(allowed_fields: impl IntoIterator<Item = S>) -> SqliteResult<Self> {
        Ok(Self {
            allowed_fields: AllowedFields::new(allowed_fields)?,
            dialect: Dialect::default(),
        })
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }
}

impl FieldResolver for SimpleFieldResolver {
    fn resolve(&mut self, field: &str) -> SqliteResult<ResolverResult> {
        if !self.allowed_fields.is_allowed(field) {
            return Err(SqliteError::Resolve(format!("failed to resolve field {:?}", field)));
        }

        let parts: Vec<&str> = field.split('.').collect();
        let column = format!("[[{}]]", columnify(parts[0]));
        if parts.len() == 1 {
            return Ok(ResolverResult::identifier(column));
        }

        Ok(ResolverResult {
            identifier: self.dialect.json_extract(&column, &json_path(&parts[1..])),
            no_coalesce: true,
            ..ResolverResult::default()
        })
    }

    fn update_query(&self, _query: &mut SelectQuery) {}

    fn dialect(&self) -> Dialect {
        self.dialect
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::build_filter;

    #[test]
    fn test_plain_column() {
        let mut resolver = SimpleFieldResolver::new([r"^\w+$"]).expect("Failed to build resolver");
        let result = resolver.resolve("title").expect("Failed to resolve");
        assert_eq!(result.identifier, "[[title]]");
        assert!(!result.no_coalesce);
    }

    #[test]
    fn test_json_path() {
        let mut resolver = SimpleFieldResolver::new([r"^data\.[\w.]+$"]).expect("Failed to build resolver");
        let result = resolver.resolve("data.items.0.name").expect("Failed to resolve");
        assert!(result.identifier.contains("'$.items[0].name'"));
        assert!(result.no_coalesce);
    }

    #[test]
    fn test_disallowed_field() {
        let mut resolver = SimpleFieldResolver::new(["title"]).expect("Failed to build resolver");
        assert!(matches!(resolver.resolve("secret"), Err(SqliteError::Resolve(_))));
        assert!(build_filter("secret = 1", &mut resolver).is_err());
    }
}
