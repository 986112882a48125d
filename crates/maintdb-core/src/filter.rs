//! Restricted SQL-like query language used by the structured-query tools.
//!
//! Accepted shapes (keywords are case-insensitive):
//!
//! ```text
//! [SELECT <* | col, ... | COUNT(*)> FROM <table>] [WHERE <predicate>] [LIMIT n]
//! ```
//!
//! Predicates compare known columns with `=`, `!=`/`<>`, `LIKE`, `ILIKE` and
//! `IS [NOT] NULL`, combined with `AND`/`OR` and parentheses. Input is parsed
//! with `sqlparser` and the resulting AST is narrowed to `StructuredQuery`;
//! anything outside that shape is rejected with a `FilterError` rather than
//! passed through to the store verbatim.

use sqlparser::ast::{
    BinaryOperator, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr, LimitClause, Query,
    Select, SelectItem, SetExpr, Statement, TableFactor, UnaryOperator, Value, ValueWithSpan,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::fmt;
use thiserror::Error;

use crate::types::Document;

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("unknown column '{name}'; available columns: {available}")]
    UnknownColumn { name: String, available: String },
    #[error("unknown table '{name}'; the only table is '{expected}'")]
    UnknownTable { name: String, expected: String },
    #[error("{0} is not supported")]
    Unsupported(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Id,
    AddNumber,
    AircraftRegistration,
    Discrepancy,
    Notes,
    CorrectiveAction,
    Technician,
}

impl Column {
    pub const ALL: [Column; 7] = [
        Column::Id,
        Column::AddNumber,
        Column::AircraftRegistration,
        Column::Discrepancy,
        Column::Notes,
        Column::CorrectiveAction,
        Column::Technician,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::AddNumber => "add_number",
            Column::AircraftRegistration => "aircraft_registration",
            Column::Discrepancy => "discrepancy",
            Column::Notes => "notes",
            Column::CorrectiveAction => "corrective_action",
            Column::Technician => "technician",
        }
    }

    pub fn type_name(self) -> &'static str {
        match self {
            Column::Id => "BIGINT",
            _ => "TEXT",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let bare = name.rsplit('.').next().unwrap_or(name).trim_matches('"');
        Self::ALL.into_iter().find(|c| c.name().eq_ignore_ascii_case(bare))
    }

    fn text_of(self, doc: &Document) -> Option<&str> {
        match self {
            Column::Id => None,
            Column::AddNumber => Some(doc.add_number.as_str()),
            Column::AircraftRegistration => Some(doc.aircraft_registration.as_str()),
            Column::Discrepancy => doc.discrepancy.as_deref(),
            Column::Notes => doc.notes.as_deref(),
            Column::CorrectiveAction => doc.corrective_action.as_deref(),
            Column::Technician => doc.technician.as_deref(),
        }
    }

    fn available() -> String {
        Self::ALL.iter().map(|c| c.name()).collect::<Vec<_>>().join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Text(String),
    Int(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    NotEq,
    Like,
    ILike,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Compare { column: Column, op: Comparison, value: Literal },
    IsNull { column: Column, negated: bool },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    /// Render as a SQL filter over the fixed column set. String literals are
    /// re-quoted, so the output never contains caller-supplied syntax.
    pub fn to_sql(&self) -> String {
        match self {
            Predicate::Compare { column, op, value } => {
                let op = match op {
                    Comparison::Eq => "=",
                    Comparison::NotEq => "!=",
                    Comparison::Like => "LIKE",
                    Comparison::ILike => "ILIKE",
                };
                format!("{} {} {}", column.name(), op, render_literal(value))
            }
            Predicate::IsNull { column, negated } => {
                format!("{} IS {}NULL", column.name(), if *negated { "NOT " } else { "" })
            }
            Predicate::And(a, b) => format!("({} AND {})", a.to_sql(), b.to_sql()),
            Predicate::Or(a, b) => format!("({} OR {})", a.to_sql(), b.to_sql()),
        }
    }

    /// Evaluate with SQL NULL semantics: comparisons against an absent field are false.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Predicate::Compare { column: Column::Id, op, value } => match (op, value) {
                (Comparison::Eq, Literal::Int(v)) => doc.id == *v,
                (Comparison::NotEq, Literal::Int(v)) => doc.id != *v,
                _ => false,
            },
            Predicate::Compare { column, op, value } => {
                let Some(field) = column.text_of(doc) else { return false };
                let Literal::Text(value) = value else { return false };
                match op {
                    Comparison::Eq => field == value,
                    Comparison::NotEq => field != value,
                    Comparison::Like => like_match(value, field, false),
                    Comparison::ILike => like_match(value, field, true),
                }
            }
            Predicate::IsNull { column: Column::Id, negated } => *negated,
            Predicate::IsNull { column, negated } => column.text_of(doc).is_none() != *negated,
            Predicate::And(a, b) => a.matches(doc) && b.matches(doc),
            Predicate::Or(a, b) => a.matches(doc) || b.matches(doc),
        }
    }
}

fn render_literal(value: &Literal) -> String {
    match value {
        Literal::Text(s) => format!("'{}'", s.replace('\'', "''")),
        Literal::Int(i) => i.to_string(),
    }
}

/// SQL `LIKE` matching: `%` is any run of characters, `_` exactly one.
pub fn like_match(pattern: &str, text: &str, case_insensitive: bool) -> bool {
    let fold = |s: &str| -> Vec<char> {
        if case_insensitive { s.to_lowercase().chars().collect() } else { s.chars().collect() }
    };
    let p = fold(pattern);
    let t = fold(text);
    // dp[j] == pattern[..i] matches text[..j]
    let mut dp = vec![false; t.len() + 1];
    dp[0] = true;
    for pc in &p {
        let mut next = vec![false; t.len() + 1];
        if *pc == '%' {
            let mut seen = false;
            for j in 0..=t.len() {
                seen |= dp[j];
                next[j] = seen;
            }
        } else {
            for j in 1..=t.len() {
                next[j] = dp[j - 1] && (*pc == '_' || *pc == t[j - 1]);
            }
        }
        dp = next;
    }
    dp[t.len()]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    Rows,
    Count,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredQuery {
    pub projection: Projection,
    pub predicate: Option<Predicate>,
    pub limit: usize,
}

impl StructuredQuery {
    /// Parse a tool input against the single table named `table`.
    ///
    /// A bare predicate (or a leading `WHERE`/`LIMIT`) is read as a query
    /// over `table`; empty input selects everything.
    pub fn parse(input: &str, table: &str) -> Result<Self, FilterError> {
        let cleaned = strip_wrapping(input);
        if cleaned.is_empty() {
            return Ok(StructuredQuery { projection: Projection::Rows, predicate: None, limit: DEFAULT_LIMIT });
        }
        let first = cleaned.split_whitespace().next().unwrap_or_default().to_ascii_uppercase();
        let sql = match first.as_str() {
            "SELECT" => cleaned.to_string(),
            "WHERE" | "LIMIT" => format!("SELECT * FROM \"{table}\" {cleaned}"),
            _ => format!("SELECT * FROM \"{table}\" WHERE {cleaned}"),
        };
        let mut statements =
            Parser::parse_sql(&GenericDialect {}, &sql).map_err(|e| FilterError::Syntax(e.to_string()))?;
        if statements.len() != 1 {
            return Err(FilterError::Syntax(format!("expected one statement, found {}", statements.len())));
        }
        match statements.remove(0) {
            Statement::Query(query) => from_query(*query, table),
            other => Err(FilterError::Unsupported(statement_keyword(&other))),
        }
    }
}

impl fmt::Display for StructuredQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.projection {
            Projection::Rows => write!(f, "SELECT *")?,
            Projection::Count => write!(f, "SELECT COUNT(*)")?,
        }
        if let Some(p) = &self.predicate {
            write!(f, " WHERE {}", p.to_sql())?;
        }
        if self.projection == Projection::Rows {
            write!(f, " LIMIT {}", self.limit)?;
        }
        Ok(())
    }
}

/// Drop markdown code fences, surrounding quotes and a trailing semicolon.
fn strip_wrapping(input: &str) -> &str {
    let mut s = input.trim();
    if let Some(rest) = s.strip_prefix("```") {
        s = match rest.split_once('\n') {
            Some((lang, body)) if lang.chars().all(|c| c.is_ascii_alphabetic()) => body,
            _ => rest,
        };
        s = s.trim_end().trim_end_matches("```");
    }
    s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s = &s[1..s.len() - 1];
    }
    s.trim().trim_end_matches(';').trim()
}

fn statement_keyword(statement: &Statement) -> String {
    statement.to_string().split_whitespace().next().unwrap_or("statement").to_ascii_uppercase()
}

fn from_query(query: Query, table: &str) -> Result<StructuredQuery, FilterError> {
    if query.with.is_some() {
        return Err(FilterError::Unsupported("WITH".into()));
    }
    let select = match *query.body {
        SetExpr::Select(select) => select,
        SetExpr::Query(_) => return Err(FilterError::Unsupported("subqueries".into())),
        _ => return Err(FilterError::Unsupported("UNION/INTERSECT/EXCEPT".into())),
    };
    check_table(&select, table)?;
    let projection = projection(&select.projection)?;

    // Unsupported clauses take precedence over predicate errors.
    if query.order_by.is_some() || !select.sort_by.is_empty() {
        return Err(FilterError::Unsupported("ORDER".into()));
    }
    if !matches!(&select.group_by, GroupByExpr::Expressions(exprs, _) if exprs.is_empty()) {
        return Err(FilterError::Unsupported("GROUP".into()));
    }
    if select.having.is_some() {
        return Err(FilterError::Unsupported("HAVING".into()));
    }
    if select.distinct.is_some() {
        return Err(FilterError::Unsupported("DISTINCT".into()));
    }
    if query.fetch.is_some() {
        return Err(FilterError::Unsupported("FETCH".into()));
    }
    let limit = limit(query.limit_clause)?;

    let predicate = select.selection.map(predicate).transpose()?;
    Ok(StructuredQuery { projection, predicate, limit })
}

fn check_table(select: &Select, table: &str) -> Result<(), FilterError> {
    let [from] = select.from.as_slice() else {
        return Err(match select.from.len() {
            0 => FilterError::Syntax("expected FROM <table>".into()),
            _ => FilterError::Unsupported("JOIN".into()),
        });
    };
    if !from.joins.is_empty() {
        return Err(FilterError::Unsupported("JOIN".into()));
    }
    let TableFactor::Table { name, .. } = &from.relation else {
        return Err(FilterError::Unsupported("subqueries".into()));
    };
    let bare = name.0.last().and_then(|part| part.as_ident()).map(|ident| ident.value.as_str()).unwrap_or_default();
    if !bare.eq_ignore_ascii_case(table) {
        return Err(FilterError::UnknownTable { name: name.to_string(), expected: table.to_string() });
    }
    Ok(())
}

fn projection(items: &[SelectItem]) -> Result<Projection, FilterError> {
    if let [SelectItem::UnnamedExpr(Expr::Function(f)) | SelectItem::ExprWithAlias { expr: Expr::Function(f), .. }] = items {
        if !f.name.to_string().eq_ignore_ascii_case("COUNT") {
            return Err(FilterError::Unsupported(format!("function {}", f.name)));
        }
        let FunctionArguments::List(list) = &f.args else {
            return Err(FilterError::Syntax("COUNT expects * or a column".into()));
        };
        return match list.args.as_slice() {
            [FunctionArg::Unnamed(FunctionArgExpr::Wildcard)] => Ok(Projection::Count),
            [FunctionArg::Unnamed(FunctionArgExpr::Expr(expr))] => column(expr).map(|_| Projection::Count),
            _ => Err(FilterError::Syntax("COUNT expects * or a column".into())),
        };
    }
    for item in items {
        match item {
            SelectItem::Wildcard(_) => {}
            SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                column(expr)?;
            }
            SelectItem::QualifiedWildcard(..) => {}
        }
    }
    Ok(Projection::Rows)
}

fn limit(clause: Option<LimitClause>) -> Result<usize, FilterError> {
    match clause {
        None => Ok(DEFAULT_LIMIT),
        Some(LimitClause::LimitOffset { offset: Some(_), .. }) | Some(LimitClause::OffsetCommaLimit { .. }) => {
            Err(FilterError::Unsupported("OFFSET".into()))
        }
        Some(LimitClause::LimitOffset { limit: None, .. }) => Ok(DEFAULT_LIMIT),
        Some(LimitClause::LimitOffset { limit: Some(expr), .. }) => match literal(&expr) {
            Some(Literal::Int(n)) if n > 0 => Ok(usize::try_from(n).unwrap_or(MAX_LIMIT).min(MAX_LIMIT)),
            _ => Err(FilterError::Syntax("LIMIT expects a positive integer".into())),
        },
    }
}

fn column(expr: &Expr) -> Result<Column, FilterError> {
    let name = match expr {
        Expr::Identifier(ident) => ident.value.clone(),
        Expr::CompoundIdentifier(parts) => parts.last().map(|ident| ident.value.clone()).unwrap_or_default(),
        other => return Err(FilterError::Syntax(format!("expected column name, found {other}"))),
    };
    Column::parse(&name).ok_or_else(|| FilterError::UnknownColumn { name, available: Column::available() })
}

/// String and integer literals; `None` for anything else.
fn literal(expr: &Expr) -> Option<Literal> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => match value {
            Value::SingleQuotedString(s) | Value::EscapedStringLiteral(s) => Some(Literal::Text(s.clone())),
            Value::Number(..) => value.to_string().parse().ok().map(Literal::Int),
            _ => None,
        },
        Expr::UnaryOp { op: UnaryOperator::Minus, expr } => match literal(expr) {
            Some(Literal::Int(n)) => Some(Literal::Int(-n)),
            _ => None,
        },
        _ => None,
    }
}

fn predicate(expr: Expr) -> Result<Predicate, FilterError> {
    match expr {
        Expr::Nested(inner) => predicate(*inner),
        Expr::BinaryOp { left, op: BinaryOperator::And, right } => {
            Ok(Predicate::And(Box::new(predicate(*left)?), Box::new(predicate(*right)?)))
        }
        Expr::BinaryOp { left, op: BinaryOperator::Or, right } => {
            Ok(Predicate::Or(Box::new(predicate(*left)?), Box::new(predicate(*right)?)))
        }
        Expr::BinaryOp { left, op: BinaryOperator::Eq, right } => compare(&left, Comparison::Eq, &right),
        Expr::BinaryOp { left, op: BinaryOperator::NotEq, right } => compare(&left, Comparison::NotEq, &right),
        Expr::BinaryOp { op, .. } => Err(FilterError::Unsupported(format!("operator {op}"))),
        Expr::Like { negated: true, .. } | Expr::ILike { negated: true, .. } => {
            Err(FilterError::Unsupported("NOT LIKE".into()))
        }
        Expr::Like { expr, pattern, .. } => compare(&expr, Comparison::Like, &pattern),
        Expr::ILike { expr, pattern, .. } => compare(&expr, Comparison::ILike, &pattern),
        Expr::IsNull(inner) => Ok(Predicate::IsNull { column: column(&inner)?, negated: false }),
        Expr::IsNotNull(inner) => Ok(Predicate::IsNull { column: column(&inner)?, negated: true }),
        Expr::InList { .. } | Expr::InSubquery { .. } => Err(FilterError::Unsupported("IN".into())),
        other => Err(FilterError::Syntax(format!("expected a comparison, found {other}"))),
    }
}

fn compare(left: &Expr, op: Comparison, right: &Expr) -> Result<Predicate, FilterError> {
    let column = column(left)?;
    let value = match (column, literal(right)) {
        (Column::Id, Some(Literal::Int(n))) => Literal::Int(n),
        (Column::Id, Some(Literal::Text(s))) => Literal::Int(
            s.trim().parse().map_err(|_| FilterError::TypeMismatch(format!("id expects an integer, got '{s}'")))?,
        ),
        (_, Some(Literal::Text(s))) => Literal::Text(s),
        (_, Some(Literal::Int(n))) => Literal::Text(n.to_string()),
        (_, None) => return Err(FilterError::Syntax(format!("expected literal value, found {right}"))),
    };
    if column == Column::Id && matches!(op, Comparison::Like | Comparison::ILike) {
        return Err(FilterError::TypeMismatch("LIKE is only valid on text columns".into()));
    }
    Ok(Predicate::Compare { column, op, value })
}
