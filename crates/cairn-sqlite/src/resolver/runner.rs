use super::RecordFieldResolver;
use crate::error::{SqliteError, SqliteResult};
use crate::search::{json_path, Join, MultiMatchSubquery, Params, ResolverResult};
use cairn_core::schema::{
    base_model_field_names, FIELD_NAME_COLLECTION_ID, FIELD_NAME_COLLECTION_NAME, FIELD_NAME_CREATED,
    FIELD_NAME_EMAIL, FIELD_NAME_EMAIL_VISIBILITY, FIELD_NAME_ID, FIELD_NAME_UPDATED,
    FIELD_NAME_USERNAME, FIELD_NAME_VERIFIED,
};
use cairn_core::utils::{columnify, random_string, to_unique_string_slice};
use cairn_core::{Collection, FieldType, SchemaField};
use serde_json::Value;
use std::sync::Arc;

/// `@request.auth.*` keys read straight from the auth record
const PLAIN_REQUEST_AUTH_FIELDS: [&str; 9] = [
    FIELD_NAME_ID,
    FIELD_NAME_COLLECTION_ID,
    FIELD_NAME_COLLECTION_NAME,
    FIELD_NAME_USERNAME,
    FIELD_NAME_EMAIL,
    FIELD_NAME_EMAIL_VISIBILITY,
    FIELD_NAME_VERIFIED,
    FIELD_NAME_CREATED,
    FIELD_NAME_UPDATED,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Modifier {
    Isset,
    Each,
    Length,
}

/// Split `name:modifier`. Segments without exactly one `:` carry no modifier.
pub(super) fn split_modifier(combined: &str) -> SqliteResult<(&str, Option<Modifier>)> {
    let parts: Vec<&str> = combined.split(':').collect();
    if parts.len() != 2 {
        return Ok((combined, None));
    }

    let modifier = match parts[1] {
        "isset" => Modifier::Isset,
        "each" => Modifier::Each,
        "length" => Modifier::Length,
        _ => {
            return Err(SqliteError::Resolve(format!(
                "unknown modifier in {:?}",
                combined
            )))
        }
    };
    Ok((parts[0], Some(modifier)))
}

fn table(name: &str) -> String {
    format!("{{{{{}}}}}", columnify(name))
}

fn resolvable_system_field_names(collection: &Collection) -> Vec<&'static str> {
    let mut names = base_model_field_names().to_vec();
    if collection.is_auth() {
        names.extend([
            FIELD_NAME_USERNAME,
            FIELD_NAME_VERIFIED,
            FIELD_NAME_EMAIL_VISIBILITY,
            FIELD_NAME_EMAIL,
        ]);
    }
    names
}

/// `[[alias.id]] IN ({:p1}, {:p2})` with freshly named params
fn id_in(alias: &str, ids: &[String], prefix: &str) -> (String, Params) {
    let mut params = Params::new();
    let placeholders: Vec<String> = ids
        .iter()
        .map(|id| {
            let name = format!("{}{}", prefix, random_string(6));
            params.insert(name.clone(), Value::String(id.clone()));
            format!("{{:{}}}", name)
        })
        .collect();
    (format!("[[{}.id]] IN ({})", alias, placeholders.join(", ")), params)
}

/// Single-use resolution of one field path.
///
/// Walks the path segment by segment, registering joins on the resolver and
/// mirroring each hop into the multi-match subquery.
pub(super) struct Runner<'r, 'a> {
    resolver: &'r mut RecordFieldResolver<'a>,
    field_name: String,
    active_props: Vec<String>,
    active_collection_name: String,
    active_table_alias: String,
    allow_hidden_fields: bool,
    nullify_missing_field: bool,
    with_multi_match: bool,
    multi_match_active_table_alias: String,
    multi_match: MultiMatchSubquery,
}

impl<'r, 'a> Runner<'r, 'a> {
    pub(super) fn new(resolver: &'r mut RecordFieldResolver<'a>, field_name: &str) -> Self {
        let active_props: Vec<String> = field_name.split('.').map(str::to_string).collect();
        let root = active_props.first().map(String::as_str).unwrap_or_default();
        let is_system_path = root == "@collection" || root == "@request";
        let nullify_missing_field = root == "@request";

        let active_collection_name = resolver.base_collection.name.clone();
        let active_table_alias = columnify(&active_collection_name);
        let multi_match = MultiMatchSubquery {
            base_table_alias: active_table_alias.clone(),
            from_table: columnify(&active_collection_name),
            from_table_alias: format!("__mm_{}", active_table_alias),
            ..MultiMatchSubquery::default()
        };

        Self {
            allow_hidden_fields: resolver.allow_hidden_fields || is_system_path,
            resolver,
            field_name: field_name.to_string(),
            active_props,
            active_collection_name,
            active_table_alias,
            nullify_missing_field,
            with_multi_match: false,
            multi_match_active_table_alias: multi_match.from_table_alias.clone(),
            multi_match,
        }
    }

    pub(super) fn run(self) -> SqliteResult<ResolverResult> {
        let allowed = &self.resolver.allowed_fields;
        if !allowed.is_empty() && !allowed.is_allowed(&self.field_name) {
            return Err(self.failed());
        }

        match self.active_props[0].as_str() {
            "@collection" => self.process_collection_field(),
            "@request" => self.process_request_field(),
            _ => self.process_active_props(),
        }
    }

    fn failed(&self) -> SqliteError {
        SqliteError::Resolve(format!("failed to resolve field {:?}", self.field_name))
    }

    /// `@collection.name[:alias].rest`
    fn process_collection_field(mut self) -> SqliteResult<ResolverResult> {
        if self.active_props.len() < 3 {
            return Err(SqliteError::Resolve(format!(
                "invalid @collection field path in {:?}",
                self.field_name
            )));
        }

        let (name, alias) = match self.active_props[1].split_once(':') {
            Some((name, alias)) => (name.to_string(), Some(alias.to_string())),
            None => (self.active_props[1].clone(), None),
        };
        let collection = self.resolver.load_collection(&name).map_err(|_| {
            SqliteError::Resolve(format!(
                "failed to load collection {:?} from field path {:?}",
                name, self.field_name
            ))
        })?;

        self.active_collection_name = collection.name.clone();
        self.active_table_alias = match alias.filter(|a| !a.is_empty()) {
            Some(alias) => columnify(&format!("__collection_alias_{}", alias)),
            None => columnify(&format!("__collection_{}", collection.name)),
        };
        self.with_multi_match = true;

        self.resolver.register_join(Join::new(
            table(&collection.name),
            self.active_table_alias.clone(),
            None,
        ));

        self.multi_match_active_table_alias = format!("__mm{}", self.active_table_alias);
        self.multi_match.joins.push(Join::new(
            table(&collection.name),
            self.multi_match_active_table_alias.clone(),
            None,
        ));

        self.active_props.drain(..2);
        self.process_active_props()
    }

    fn process_request_field(self) -> SqliteResult<ResolverResult> {
        if self.resolver.request_info.is_none() {
            return Ok(ResolverResult::null());
        }

        if self.field_name.starts_with("@request.auth.") {
            return self.process_request_auth_field();
        }

        if self.field_name.starts_with("@request.data.") && self.active_props.len() > 2 {
            let (name, modifier) = split_modifier(&self.active_props[2])?;
            let field = self.resolver.base_collection.schema.get_field_by_name(name).cloned();

            if let Some(field) = field {
                let arrayable = field.field_type().is_arrayable();
                let single_segment = self.active_props.len() == 3;

                if field.field_type() == FieldType::Relation && self.active_props.len() > 3 {
                    return self.process_request_data_relation(&field);
                }
                if arrayable && single_segment && modifier == Some(Modifier::Each) {
                    return self.process_request_data_each(&field);
                }
                if arrayable && single_segment && modifier == Some(Modifier::Length) {
                    let count = self.request_data_items(&field.name).len();
                    return Ok(ResolverResult::identifier(count.to_string()));
                }
            }
        }

        self.resolver.resolve_static_request_field(&self.active_props[1..])
    }

    fn process_request_auth_field(mut self) -> SqliteResult<ResolverResult> {
        if self.active_props.len() == 3 {
            let (name, _) = split_modifier(&self.active_props[2])?;
            if PLAIN_REQUEST_AUTH_FIELDS.contains(&name) {
                return self.resolver.resolve_static_request_field(&self.active_props[1..]);
            }
        }

        let Some(auth) = self
            .resolver
            .request_info
            .as_ref()
            .and_then(|info| info.auth_record.as_ref())
        else {
            return Ok(ResolverResult::null());
        };
        let collection = Arc::clone(auth.collection());
        let auth_id = Value::String(auth.get_string(FIELD_NAME_ID));

        if !self
            .resolver
            .loaded_collections
            .iter()
            .any(|c| c.base.id == collection.base.id)
        {
            self.resolver.loaded_collections.push(Arc::clone(&collection));
        }

        self.active_collection_name = collection.name.clone();
        self.active_table_alias = format!("__auth_{}", columnify(&collection.name));

        let placeholder = format!("auth{}", random_string(5));
        self.resolver.register_join(Join::new(
            table(&collection.name),
            self.active_table_alias.clone(),
            Some(format!("[[{}.id]] = {{:{}}}", self.active_table_alias, placeholder)),
        ));
        self.resolver.join_params.insert(placeholder.clone(), auth_id.clone());

        self.multi_match_active_table_alias = format!("__mm_{}", self.active_table_alias);
        let mm_placeholder = format!("mm{}", placeholder);
        self.multi_match.joins.push(Join::new(
            table(&collection.name),
            self.multi_match_active_table_alias.clone(),
            Some(format!(
                "[[{}.id]] = {{:{}}}",
                self.multi_match_active_table_alias, mm_placeholder
            )),
        ));
        self.multi_match.params.insert(mm_placeholder, auth_id);

        self.active_props.drain(..2);
        self.process_active_props()
    }

    fn request_data_items(&self, name: &str) -> Vec<String> {
        self.resolver
            .request_info
            .as_ref()
            .and_then(|info| info.data.get(name))
            .map(to_unique_string_slice)
            .unwrap_or_default()
    }

    /// `@request.data.field:each` over the submitted list
    fn process_request_data_each(mut self, field: &SchemaField) -> SqliteResult<ResolverResult> {
        let items = self.request_data_items(&field.name);
        let raw = Value::String(serde_json::to_string(&items)?);
        let dialect = self.resolver.dialect;

        let placeholder = format!("dataEach{}", random_string(4));
        let je_alias = format!("__dataEach_{}_je", columnify(&field.name));
        self.resolver.register_join(Join::new(
            dialect.json_each(&format!("{{:{}}}", placeholder)),
            je_alias.clone(),
            None,
        ));
        self.resolver.join_params.insert(placeholder.clone(), raw.clone());

        let mut result = ResolverResult::identifier(format!("[[{}.value]]", je_alias));

        if field.is_multiple() {
            self.with_multi_match = true;
        }

        if self.with_multi_match {
            let mm_placeholder = format!("mm{}", placeholder);
            let mm_alias = format!("__mm{}", je_alias);
            self.multi_match.joins.push(Join::new(
                dialect.json_each(&format!("{{:{}}}", mm_placeholder)),
                mm_alias.clone(),
                None,
            ));
            self.multi_match.params.insert(mm_placeholder, raw);
            self.multi_match.value_identifier = format!("[[{}.value]]", mm_alias);
            result.multi_match = Some(self.multi_match);
        }

        Ok(result)
    }

    /// `@request.data.rel.rest` joins the submitted related ids
    fn process_request_data_relation(mut self, field: &SchemaField) -> SqliteResult<ResolverResult> {
        let Some(options) = field.options.as_relation() else {
            return Err(SqliteError::Resolve(format!(
                "field {:?} is not a valid relation",
                field.name
            )));
        };
        let related = self.resolver.load_collection(&options.collection_id).map_err(|_| {
            SqliteError::Resolve(format!(
                "failed to load collection {:?} from data field {:?}",
                options.collection_id, field.name
            ))
        })?;

        let ids = self.request_data_items(&field.name);
        if ids.is_empty() {
            return Ok(ResolverResult::null());
        }

        self.active_collection_name = related.name.clone();
        self.active_table_alias = columnify(&format!("__data_{}_{}", related.name, field.name));

        let (on, params) = id_in(&self.active_table_alias, &ids, "data");
        self.resolver.register_join(Join::new(
            table(&related.name),
            self.active_table_alias.clone(),
            Some(on),
        ));
        self.resolver.join_params.extend(params);

        if options.is_multiple() {
            self.with_multi_match = true;
        }

        self.multi_match_active_table_alias =
            columnify(&format!("__data_mm_{}_{}", related.name, field.name));
        let (mm_on, mm_params) = id_in(&self.multi_match_active_table_alias, &ids, "mmdata");
        self.multi_match.joins.push(Join::new(
            table(&related.name),
            self.multi_match_active_table_alias.clone(),
            Some(mm_on),
        ));
        self.multi_match.params.extend(mm_params);

        self.active_props.drain(..3);
        self.process_active_props()
    }

    fn process_active_props(mut self) -> SqliteResult<ResolverResult> {
        let props = std::mem::take(&mut self.active_props);
        let dialect = self.resolver.dialect;

        for (i, prop) in props.iter().enumerate() {
            let collection = self
                .resolver
                .load_collection(&self.active_collection_name)
                .map_err(|_| SqliteError::Resolve(format!("failed to resolve field {:?}", prop)))?;

            if i == props.len() - 1 {
                return self.resolve_last(&collection, prop);
            }

            let Some(field) = collection.schema.get_field_by_name(prop) else {
                if self.nullify_missing_field {
                    return Ok(ResolverResult::null());
                }
                return Err(SqliteError::Resolve(format!("unknown field {:?}", prop)));
            };

            // the remaining segments address a path inside the JSON value
            if field.field_type() == FieldType::Json {
                let rest: Vec<&str> = props[i + 1..].iter().map(String::as_str).collect();
                let path = json_path(&rest);
                let column = columnify(prop);

                let mut result = ResolverResult {
                    identifier: dialect
                        .json_extract(&format!("[[{}.{}]]", self.active_table_alias, column), &path),
                    no_coalesce: true,
                    ..ResolverResult::default()
                };
                if self.with_multi_match {
                    self.multi_match.value_identifier = dialect.json_extract(
                        &format!("[[{}.{}]]", self.multi_match_active_table_alias, column),
                        &path,
                    );
                    result.multi_match = Some(self.multi_match);
                }
                return Ok(result);
            }

            let Some(options) = field.options.as_relation() else {
                return Err(SqliteError::Resolve(format!(
                    "field {:?} is not a valid relation",
                    prop
                )));
            };
            let related = self
                .resolver
                .load_collection(&options.collection_id)
                .map_err(|_| SqliteError::Resolve(format!("failed to find field {:?} collection", prop)))?;

            let clean = columnify(&field.name);
            let multiple = options.is_multiple();

            // main query
            let prefixed = format!("{}.{}", self.active_table_alias, clean);
            let new_alias = format!("{}_{}", self.active_table_alias, clean);
            if multiple {
                let je_alias = format!("{}_{}_je", self.active_table_alias, clean);
                self.resolver.register_join(Join::new(
                    dialect.json_each(&format!("[[{}]]", prefixed)),
                    je_alias.clone(),
                    None,
                ));
                self.resolver.register_join(Join::new(
                    table(&related.name),
                    new_alias.clone(),
                    Some(format!("[[{}.id]] = [[{}.value]]", new_alias, je_alias)),
                ));
            } else {
                self.resolver.register_join(Join::new(
                    table(&related.name),
                    new_alias.clone(),
                    Some(format!("[[{}.id]] = [[{}]]", new_alias, prefixed)),
                ));
            }
            self.active_collection_name = related.name.clone();
            self.active_table_alias = new_alias;

            // multi-match subquery
            if multiple {
                self.with_multi_match = true;
            }
            let mm_prefixed = format!("{}.{}", self.multi_match_active_table_alias, clean);
            let mm_alias = format!("{}_{}", self.multi_match_active_table_alias, clean);
            if multiple {
                let mm_je_alias = format!("{}_{}_je", self.multi_match_active_table_alias, clean);
                self.multi_match.joins.push(Join::new(
                    dialect.json_each(&format!("[[{}]]", mm_prefixed)),
                    mm_je_alias.clone(),
                    None,
                ));
                self.multi_match.joins.push(Join::new(
                    table(&related.name),
                    mm_alias.clone(),
                    Some(format!("[[{}.id]] = [[{}.value]]", mm_alias, mm_je_alias)),
                ));
            } else {
                self.multi_match.joins.push(Join::new(
                    table(&related.name),
                    mm_alias.clone(),
                    Some(format!("[[{}.id]] = [[{}]]", mm_alias, mm_prefixed)),
                ));
            }
            self.multi_match_active_table_alias = mm_alias;
        }

        Err(self.failed())
    }

    /// Terminal segment: system column, modifier or schema field
    fn resolve_last(mut self, collection: &Collection, prop: &str) -> SqliteResult<ResolverResult> {
        let dialect = self.resolver.dialect;

        if resolvable_system_field_names(collection).contains(&prop) {
            let column = columnify(prop);
            let mut result =
                ResolverResult::identifier(format!("[[{}.{}]]", self.active_table_alias, column));

            if prop == FIELD_NAME_EMAIL && !self.allow_hidden_fields {
                result.guard = Some(format!(
                    "[[{}.{}]] = TRUE",
                    self.active_table_alias, FIELD_NAME_EMAIL_VISIBILITY
                ));
                if self.with_multi_match {
                    self.multi_match.conditions.push(format!(
                        "[[{}.{}]] = TRUE",
                        self.multi_match_active_table_alias, FIELD_NAME_EMAIL_VISIBILITY
                    ));
                }
            }

            if self.with_multi_match {
                self.multi_match.value_identifier =
                    format!("[[{}.{}]]", self.multi_match_active_table_alias, column);
                result.multi_match = Some(self.multi_match);
            }
            return Ok(result);
        }

        let (name, modifier) = split_modifier(prop)?;
        let Some(field) = collection.schema.get_field_by_name(name) else {
            if self.nullify_missing_field {
                return Ok(ResolverResult::null());
            }
            return Err(SqliteError::Resolve(format!("unknown field {:?}", name)));
        };

        let clean = columnify(&field.name);
        let column = format!("[[{}.{}]]", self.active_table_alias, clean);
        let mm_column = format!("[[{}.{}]]", self.multi_match_active_table_alias, clean);

        let list_modifier = matches!(modifier, Some(Modifier::Each | Modifier::Length));
        if list_modifier && !field.field_type().is_arrayable() {
            return Err(SqliteError::Resolve(format!(
                "field {:?} does not hold a list",
                field.name
            )));
        }

        if field.field_type().is_arrayable() {
            match modifier {
                Some(Modifier::Length) => {
                    let mut result = ResolverResult::identifier(dialect.json_array_length(&column));
                    if self.with_multi_match {
                        self.multi_match.value_identifier = dialect.json_array_length(&mm_column);
                        result.multi_match = Some(self.multi_match);
                    }
                    return Ok(result);
                }
                Some(Modifier::Each) => {
                    let je_alias = format!("{}_{}_je", self.active_table_alias, clean);
                    self.resolver
                        .register_join(Join::new(dialect.json_each(&column), je_alias.clone(), None));
                    let mut result = ResolverResult::identifier(format!("[[{}.value]]", je_alias));

                    if field.is_multiple() {
                        self.with_multi_match = true;
                    }
                    if self.with_multi_match {
                        let mm_je_alias =
                            format!("{}_{}_je", self.multi_match_active_table_alias, clean);
                        self.multi_match.joins.push(Join::new(
                            dialect.json_each(&mm_column),
                            mm_je_alias.clone(),
                            None,
                        ));
                        self.multi_match.value_identifier = format!("[[{}.value]]", mm_je_alias);
                        result.multi_match = Some(self.multi_match);
                    }
                    return Ok(result);
                }
                _ => {}
            }
        }

        // JSON values are unwrapped so top-level primitives compare like plain columns
        let is_json = field.field_type() == FieldType::Json;
        let mut result = if is_json {
            ResolverResult {
                identifier: dialect.json_extract(&column, ""),
                no_coalesce: true,
                ..ResolverResult::default()
            }
        } else {
            ResolverResult::identifier(column)
        };

        if self.with_multi_match {
            self.multi_match.value_identifier = if is_json {
                dialect.json_extract(&mm_column, "")
            } else {
                mm_column
            };
            result.multi_match = Some(self.multi_match);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("title", "title", None ; "no modifier")]
    #[test_case("tags:each", "tags", Some(Modifier::Each) ; "each")]
    #[test_case("tags:length", "tags", Some(Modifier::Length) ; "length")]
    #[test_case("tags:isset", "tags", Some(Modifier::Isset) ; "isset")]
    #[test_case("a:b:c", "a:b:c", None ; "more than one colon")]
    fn test_split_modifier(input: &str, name: &str, modifier: Option<Modifier>) {
        assert_eq!(split_modifier(input).expect("Failed to split"), (name, modifier));
    }

    #[test]
    fn test_split_modifier_rejects_unknown() {
        assert!(split_modifier("tags:upper").is_err());
    }

    #[test]
    fn test_id_in_binds_every_id() {
        let ids = vec!["a".to_string(), "b".to_string()];
        let (on, params) = id_in("rel", &ids, "p");
        assert!(on.starts_with("[[rel.id]] IN ({:p"));
        assert_eq!(params.len(), 2);
    }
}
