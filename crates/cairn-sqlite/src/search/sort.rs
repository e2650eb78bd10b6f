use super::FieldResolver;
use crate::error::{SqliteError, SqliteResult};

/// Sort key selecting a random order
pub const RANDOM_SORT_KEY: &str = "@random";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub name: String,
    pub direction: SortDirection,
}

impl SortField {
    /// Parse `-created,+title,@random`. A leading `-` sorts descending.
    pub fn parse_list(sort: &str) -> Vec<SortField> {
        sort.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| {
                let (direction, name) = match s.strip_prefix('-') {
                    Some(rest) => (SortDirection::Desc, rest),
                    None => (SortDirection::Asc, s.strip_prefix('+').unwrap_or(s)),
                };
                let name = name.trim();
                (!name.is_empty()).then(|| SortField {
                    name: name.to_string(),
                    direction,
                })
            })
            .collect()
    }

    /// ORDER BY term for this field
    pub fn build(&self, resolver: &mut dyn FieldResolver) -> SqliteResult<String> {
        if self.name == RANDOM_SORT_KEY {
            return Ok("RANDOM()".to_string());
        }

        let result = resolver.resolve(&self.name)?;
        if !result.params.is_empty() || result.identifier.is_empty() || result.identifier == "NULL" {
            return Err(SqliteError::Filter(format!(
                "invalid sort field {:?}",
                self.name
            )));
        }

        let direction = match self.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        Ok(format!("{} {}", result.identifier, direction))
    }
}
