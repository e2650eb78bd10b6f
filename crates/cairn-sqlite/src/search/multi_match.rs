use super::{Join, Params};
use crate::dialect::Dialect;

/// Correlated subquery yielding every value a multi-valued path can take
/// for the current row of the main query.
///
/// It repeats the main query's join chain under shadow aliases and is
/// correlated back to the main row through the id column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiMatchSubquery {
    pub base_table_alias: String,
    pub from_table: String,
    pub from_table_alias: String,
    pub value_identifier: String,
    pub joins: Vec<Join>,
    /// Extra conditions on the shadow rows, AND-ed onto the correlation
    pub conditions: Vec<String>,
    pub params: Params,
}

impl MultiMatchSubquery {
    /// `SELECT <value> AS multiMatchValue FROM ... WHERE <shadow>.id = <base>.id`.
    /// Its params are merged into `params`.
    pub fn build(&self, dialect: Dialect, params: &mut Params) -> String {
        if self.base_table_alias.is_empty()
            || self.from_table.is_empty()
            || self.from_table_alias.is_empty()
        {
            return "SELECT NULL AS [[multiMatchValue]] WHERE 0 = 1".to_string();
        }

        params.extend(self.params.clone());

        let joins: Vec<String> = self.joins.iter().map(|j| j.build(dialect)).collect();

        let mut sql = format!(
            "SELECT {} AS [[multiMatchValue]] FROM {{{{{}}}}} [[{}]] {} WHERE [[{}.id]] = [[{}.id]]",
            self.value_identifier,
            self.from_table,
            self.from_table_alias,
            joins.join(" "),
            self.from_table_alias,
            self.base_table_alias
        );
        for condition in &self.conditions {
            sql.push_str(&format!(" AND ({})", condition));
        }
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_correlates_on_id() {
        let sub = MultiMatchSubquery {
            base_table_alias: "posts".to_string(),
            from_table: "posts".to_string(),
            from_table_alias: "__mm_posts".to_string(),
            value_identifier: "[[__mm_posts_tags.name]]".to_string(),
            joins: vec![Join::new(
                "{{tags}}",
                "__mm_posts_tags",
                Some("[[__mm_posts_tags.id]] = [[__mm_posts.tags]]".to_string()),
            )],
            params: Params::from([("p1".to_string(), json!(1))]),
            ..MultiMatchSubquery::default()
        };

        let mut params = Params::new();
        let sql = sub.build(Dialect::Sqlite, &mut params);
        assert_eq!(
            sql,
            "SELECT [[__mm_posts_tags.name]] AS [[multiMatchValue]] FROM {{posts}} [[__mm_posts]] LEFT JOIN {{tags}} [[__mm_posts_tags]] ON [[__mm_posts_tags.id]] = [[__mm_posts.tags]] WHERE [[__mm_posts.id]] = [[posts.id]]"
        );
        assert_eq!(params["p1"], json!(1));
    }

    #[test]
    fn test_conditions_restrict_shadow_rows() {
        let sub = MultiMatchSubquery {
            base_table_alias: "posts".to_string(),
            from_table: "posts".to_string(),
            from_table_alias: "__mm_posts".to_string(),
            value_identifier: "[[__mm_posts_coauthors.email]]".to_string(),
            conditions: vec!["[[__mm_posts_coauthors.emailVisibility]] = TRUE".to_string()],
            ..MultiMatchSubquery::default()
        };

        let mut params = Params::new();
        let sql = sub.build(Dialect::Sqlite, &mut params);
        assert!(sql.ends_with(
            "WHERE [[__mm_posts.id]] = [[posts.id]] AND ([[__mm_posts_coauthors.emailVisibility]] = TRUE)"
        ));
    }

    #[test]
    fn test_incomplete_subquery_matches_nothing() {
        let mut params = Params::new();
        let sql = MultiMatchSubquery::default().build(Dialect::Sqlite, &mut params);
        assert!(sql.contains("0 = 1"));
    }
}
