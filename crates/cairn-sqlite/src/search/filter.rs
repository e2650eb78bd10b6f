//! Filter expression parsing and SQL compilation
//!
//! ```text
//! title ~ 'draft' && (views > 10 || author.name = "bob")
//! ```
//!
//! `&&` binds tighter than `||`. Every non-literal operand is a field path
//! handed to a [`FieldResolver`]; literals become bound parameters.

use super::{Expression, FieldResolver, Params, ResolverResult};
use crate::dialect::Dialect;
use crate::error::{SqliteError, SqliteResult};
use cairn_core::utils::random_string;
use chumsky::extra;
use chumsky::prelude::*;
use serde_json::{Number, Value};

type Extra<'src> = extra::Err<Rich<'src, char>>;

// ============================================================================
// AST
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
}

/// Comparison operator. `any` marks the explicit `?` forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operator {
    pub sign: Sign,
    pub any: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    Field(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Compare {
        left: Operand,
        op: Operator,
        right: Operand,
    },
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
}

// ============================================================================
// Parser
// ============================================================================

fn kw<'src>(keyword: &'static str) -> impl Parser<'src, &'src str, (), Extra<'src>> + Clone {
    text::keyword::<&str, _, Extra<'src>>(keyword).ignored()
}

fn quoted<'src>(quote: char) -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    let escaped = just('\\').ignore_then(any());
    let plain = any().filter(move |c: &char| *c != quote && *c != '\\');

    just(quote)
        .ignore_then(escaped.or(plain).repeated().collect::<String>())
        .then_ignore(just(quote))
}

fn string_literal<'src>() -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    quoted('\'').or(quoted('"')).labelled("string literal")
}

fn number_literal<'src>() -> impl Parser<'src, &'src str, Value, Extra<'src>> + Clone {
    let digits = any().filter(|c: &char| c.is_ascii_digit()).repeated().at_least(1);

    just('-')
        .or_not()
        .then(digits.clone())
        .then(just('.').then(digits).or_not())
        .to_slice()
        .try_map(|s: &str, span| {
            if let Ok(i) = s.parse::<i64>() {
                return Ok(Value::from(i));
            }
            s.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| Rich::custom(span, "invalid number"))
        })
        .labelled("number")
}

fn field_path<'src>() -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    any()
        .filter(|c: &char| c.is_alphanumeric() || matches!(c, '_' | '.' | ':' | '@'))
        .repeated()
        .at_least(1)
        .to_slice()
        .map(|s: &str| s.to_string())
        .labelled("field")
}

fn operand<'src>() -> impl Parser<'src, &'src str, Operand, Extra<'src>> + Clone {
    choice((
        string_literal().map(|s| Operand::Literal(Value::String(s))),
        number_literal().map(Operand::Literal),
        kw("true").to(Operand::Literal(Value::Bool(true))),
        kw("false").to(Operand::Literal(Value::Bool(false))),
        kw("null").to(Operand::Literal(Value::Null)),
        field_path().map(Operand::Field),
    ))
    .padded()
}

fn operator<'src>() -> impl Parser<'src, &'src str, Operator, Extra<'src>> + Clone {
    let sign = choice((
        just("!=").to(Sign::Neq),
        just(">=").to(Sign::Gte),
        just("<=").to(Sign::Lte),
        just("!~").to(Sign::NotLike),
        just("=").to(Sign::Eq),
        just(">").to(Sign::Gt),
        just("<").to(Sign::Lt),
        just("~").to(Sign::Like),
    ));

    just('?')
        .or_not()
        .then(sign)
        .map(|(any, sign)| Operator {
            sign,
            any: any.is_some(),
        })
        .padded()
        .labelled("operator")
}

fn comparison<'src>() -> impl Parser<'src, &'src str, FilterExpr, Extra<'src>> + Clone {
    operand()
        .then(operator())
        .then(operand())
        .map(|((left, op), right)| FilterExpr::Compare { left, op, right })
}

fn filter_parser<'src>() -> impl Parser<'src, &'src str, FilterExpr, Extra<'src>> {
    recursive(|expr| {
        let group = expr.delimited_by(just('(').padded(), just(')').padded());
        let atom = group.or(comparison());

        let conjunction = atom
            .clone()
            .then(just("&&").padded().ignore_then(atom).repeated().collect::<Vec<_>>())
            .map(|(first, rest)| {
                rest.into_iter()
                    .fold(first, |l, r| FilterExpr::And(Box::new(l), Box::new(r)))
            });

        conjunction
            .clone()
            .then(just("||").padded().ignore_then(conjunction).repeated().collect::<Vec<_>>())
            .map(|(first, rest)| {
                rest.into_iter()
                    .fold(first, |l, r| FilterExpr::Or(Box::new(l), Box::new(r)))
            })
    })
    .padded()
    .then_ignore(end())
}

fn format_errors(errs: &[Rich<'_, char>], input: &str) -> String {
    errs.iter()
        .map(|e| {
            let found = e
                .found()
                .map_or("end of input".to_string(), |c| format!("'{}'", c));
            format!(
                "position {}: {} (found {}) in {:?}",
                e.span().start,
                e.reason(),
                found,
                input
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a filter string into its AST
pub fn parse_filter(input: &str) -> SqliteResult<FilterExpr> {
    if input.trim().is_empty() {
        return Err(SqliteError::Filter("empty filter expression".to_string()));
    }
    filter_parser()
        .parse(input)
        .into_result()
        .map_err(|errs| SqliteError::Filter(format_errors(&errs, input)))
}

// ============================================================================
// SQL compilation
// ============================================================================

/// Parse `filter` and compile it into a WHERE fragment
pub fn build_filter(filter: &str, resolver: &mut dyn FieldResolver) -> SqliteResult<Expression> {
    let ast = parse_filter(filter)?;
    let dialect = resolver.dialect();
    build_node(&ast, resolver, dialect)
}

fn build_node(
    node: &FilterExpr,
    resolver: &mut dyn FieldResolver,
    dialect: Dialect,
) -> SqliteResult<Expression> {
    match node {
        FilterExpr::And(l, r) => join(build_node(l, resolver, dialect)?, "AND", build_node(r, resolver, dialect)?),
        FilterExpr::Or(l, r) => join(build_node(l, resolver, dialect)?, "OR", build_node(r, resolver, dialect)?),
        FilterExpr::Compare { left, op, right } => {
            let left = resolve_operand(left, resolver)?;
            let right = resolve_operand(right, resolver)?;
            Ok(build_comparison(&left, *op, &right, dialect))
        }
    }
}

fn join(left: Expression, glue: &str, right: Expression) -> SqliteResult<Expression> {
    let mut params = left.params;
    params.extend(right.params);
    Ok(Expression::with_params(
        format!("({} {} {})", left.sql, glue, right.sql),
        params,
    ))
}

fn resolve_operand(operand: &Operand, resolver: &mut dyn FieldResolver) -> SqliteResult<ResolverResult> {
    match operand {
        Operand::Field(path) => resolver.resolve(path),
        Operand::Literal(Value::Null) => Ok(ResolverResult::null()),
        Operand::Literal(value) => {
            let name = format!("f{}", random_string(8));
            Ok(ResolverResult {
                identifier: format!("{{:{}}}", name),
                params: Params::from([(name, value.clone())]),
                ..ResolverResult::default()
            })
        }
    }
}

struct Side<'a> {
    identifier: &'a str,
    no_coalesce: bool,
    params: &'a Params,
}

impl<'a> From<&'a ResolverResult> for Side<'a> {
    fn from(r: &'a ResolverResult) -> Self {
        Side {
            identifier: &r.identifier,
            no_coalesce: r.no_coalesce,
            params: &r.params,
        }
    }
}

fn build_comparison(
    left: &ResolverResult,
    op: Operator,
    right: &ResolverResult,
    dialect: Dialect,
) -> Expression {
    let exists = !op.any && (left.multi_match.is_some() || right.multi_match.is_some());
    let mut expr = if exists {
        multi_match_exists(left, op.sign, right, dialect)
    } else {
        compare(Side::from(left), op.sign, Side::from(right))
    };

    for side in [left, right] {
        // a multi-matched operand carries its guard inside the subquery
        if exists && side.multi_match.is_some() {
            continue;
        }
        if let Some(guard) = &side.guard {
            expr.sql = format!("({} AND {})", expr.sql, guard);
        }
    }
    expr
}

/// `EXISTS` over the shadow subqueries so that one matching related row suffices
fn multi_match_exists(
    left: &ResolverResult,
    sign: Sign,
    right: &ResolverResult,
    dialect: Dialect,
) -> Expression {
    let mut params = Params::new();
    let mut sources = Vec::new();

    let mut source_for = |result: &ResolverResult, prefix: &str| -> String {
        match &result.multi_match {
            Some(sub) => {
                let alias = format!("{}{}", prefix, random_string(5));
                sources.push(format!("({}) [[{}]]", sub.build(dialect, &mut params), alias));
                format!("[[{}.multiMatchValue]]", alias)
            }
            None => result.identifier.clone(),
        }
    };
    let left_identifier = source_for(left, "__ml");
    let right_identifier = source_for(right, "__mr");

    let condition = compare(
        Side {
            identifier: &left_identifier,
            no_coalesce: left.no_coalesce,
            params: &left.params,
        },
        sign,
        Side {
            identifier: &right_identifier,
            no_coalesce: right.no_coalesce,
            params: &right.params,
        },
    );
    params.extend(condition.params);

    Expression::with_params(
        format!(
            "EXISTS (SELECT 1 FROM {} WHERE {})",
            sources.join(", "),
            condition.sql
        ),
        params,
    )
}

fn compare(left: Side<'_>, sign: Sign, right: Side<'_>) -> Expression {
    let mut params = left.params.clone();
    let (l, r) = (left.identifier, right.identifier);

    let sql = match sign {
        Sign::Eq | Sign::Neq => {
            params.extend(right.params.clone());
            let (op, null_op) = if sign == Sign::Eq { ("=", "IS") } else { ("!=", "IS NOT") };
            if left.no_coalesce || right.no_coalesce {
                format!("{} {} {}", l, null_op, r)
            } else {
                format!("COALESCE({}, '') {} COALESCE({}, '')", l, op, r)
            }
        }
        Sign::Like | Sign::NotLike => {
            let op = if sign == Sign::Like { "LIKE" } else { "NOT LIKE" };
            if right.params.is_empty() {
                format!("{} {} ('%' || {} || '%') ESCAPE '\\'", l, op, r)
            } else {
                params.extend(wrap_like_params(right.params));
                format!("{} {} {} ESCAPE '\\'", l, op, r)
            }
        }
        Sign::Gt | Sign::Gte | Sign::Lt | Sign::Lte => {
            params.extend(right.params.clone());
            let op = match sign {
                Sign::Gt => ">",
                Sign::Gte => ">=",
                Sign::Lt => "<",
                _ => "<=",
            };
            format!("{} {} {}", l, op, r)
        }
    };

    Expression::with_params(sql, params)
}

/// Values without their own `%` wildcard become escaped "contains" patterns
fn wrap_like_params(params: &Params) -> Params {
    params
        .iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let pattern = if has_unescaped(&text, '%') {
                text
            } else {
                format!("%{}%", escape_like(&text))
            };
            (key.clone(), Value::String(pattern))
        })
        .collect()
}

fn has_unescaped(text: &str, target: char) -> bool {
    let mut escaped = false;
    for c in text.chars() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == target {
            return true;
        }
    }
    false
}

fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut escaped = false;
    for c in text.chars() {
        if escaped {
            out.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => {
                out.push(c);
                escaped = true;
            }
            '%' | '_' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}
