//! Column-spec parser - the inline join mini-language.
//!
//! A column spec is a comma-separated list of tokens. Each token is either a
//! plain column of the primary table or a join token:
//!
//! ```text
//! id,name,owner->org(org_id){org_name,org_country}
//! ```
//!
//! `owner->org(org_id){...}` reads as "join `org` on `<table>.owner = org.org_id`
//! and pull `org_name` and `org_country` from it". Whitespace anywhere in the
//! spec is ignored.
//!
//! Tokens are recognized in a single left-to-right pass, so each join token
//! carries its own table, key and column group. Nothing is paired up by
//! position after the fact.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

static IDENT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());
static QUALIFIED_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").unwrap());

/// `name` is a bare SQL identifier (`org_id`).
pub fn is_identifier(name: &str) -> bool {
    IDENT_PATTERN.is_match(name)
}

/// `name` is an identifier with at most one qualifier (`public.users`, `org.name`).
pub fn is_qualified_identifier(name: &str) -> bool {
    QUALIFIED_PATTERN.is_match(name)
}

/// One LEFT JOIN parsed out of a join token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinDescriptor {
    /// Joined table
    pub table: String,
    /// Key column on the primary table
    pub from_column: String,
    /// Key column on the joined table
    pub to_column: String,
    /// Columns pulled from the joined table, in output order (never empty)
    pub columns: Vec<String>,
}

impl JoinDescriptor {
    /// Prefix used for output aliases, `org` -> `org_name` for column `name`.
    fn alias_prefix(&self) -> String {
        self.table.replace('.', "_")
    }

    /// `org.org_name AS org_org_name, ...`
    fn select_items(&self) -> impl Iterator<Item = String> + '_ {
        let prefix = self.alias_prefix();
        self.columns
            .iter()
            .map(move |col| format!("{}.{} AS {}_{}", self.table, col, prefix, col))
    }

    /// ` LEFT JOIN org ON users.owner=org.org_id`
    pub fn join_clause(&self, primary: &str) -> String {
        format!(
            " LEFT JOIN {} ON {}.{}={}.{}",
            self.table, primary, self.from_column, self.table, self.to_column
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SpecItem {
    Column(String),
    Join(JoinDescriptor),
}

/// Parsed column spec: primary-table columns interleaved with joins, in
/// the order they were written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSpec {
    items: Vec<SpecItem>,
}

impl ColumnSpec {
    /// Parse a column spec string.
    ///
    /// An empty (or all-whitespace) input yields an empty spec; callers
    /// decide whether that is acceptable.
    pub fn parse(input: &str) -> Result<Self> {
        let spec: String = input.chars().filter(|c| !c.is_whitespace()).collect();
        if spec.is_empty() {
            return Ok(Self::default());
        }

        let items = split_tokens(&spec)?
            .into_iter()
            .map(|token| parse_token(&spec, token))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { items })
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_joins(&self) -> bool {
        self.joins().next().is_some()
    }

    /// Primary-table columns before join expansion, join source columns included.
    pub fn base_columns(&self) -> Vec<&str> {
        self.items
            .iter()
            .map(|item| match item {
                SpecItem::Column(c) => c.as_str(),
                SpecItem::Join(j) => j.from_column.as_str(),
            })
            .collect()
    }

    pub fn joins(&self) -> impl Iterator<Item = &JoinDescriptor> {
        self.items.iter().filter_map(|item| match item {
            SpecItem::Join(j) => Some(j),
            SpecItem::Column(_) => None,
        })
    }

    /// Render the SELECT list for `table`.
    ///
    /// Without joins the columns are emitted as written. With joins every
    /// primary column is qualified with `table.`, and a join's source column
    /// is replaced by the aliased columns of the joined table. A plain token
    /// that repeats a join's source column is dropped for the same reason.
    pub fn select_list(&self, table: &str) -> String {
        if !self.has_joins() {
            return self.base_columns().join(", ");
        }

        let mut out = Vec::new();
        for item in &self.items {
            match item {
                SpecItem::Column(col) => {
                    if self.joins().any(|j| j.from_column == *col) {
                        continue;
                    }
                    if col.contains('.') {
                        out.push(col.clone());
                    } else {
                        out.push(format!("{}.{}", table, col));
                    }
                }
                SpecItem::Join(join) => out.extend(join.select_items()),
            }
        }
        out.join(", ")
    }

    /// All LEFT JOIN clauses, in spec order.
    pub fn join_clauses(&self, table: &str) -> String {
        self.joins().map(|j| j.join_clause(table)).collect()
    }
}

impl std::str::FromStr for ColumnSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Split on commas that are not inside a `(...)` or `{...}` group.
fn split_tokens(spec: &str) -> Result<Vec<&str>> {
    let mut tokens = Vec::new();
    let mut stack: Vec<char> = Vec::new();
    let mut start = 0;

    for (i, ch) in spec.char_indices() {
        match ch {
            '(' | '{' => {
                if !stack.is_empty() {
                    return Err(Error::malformed_spec(spec, format!("nested '{}' at {}", ch, i)));
                }
                stack.push(ch);
            }
            ')' | '}' => {
                let open = if ch == ')' { '(' } else { '{' };
                if stack.pop() != Some(open) {
                    return Err(Error::malformed_spec(spec, format!("unbalanced '{}' at {}", ch, i)));
                }
            }
            ',' if stack.is_empty() => {
                tokens.push(&spec[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    if let Some(open) = stack.pop() {
        return Err(Error::malformed_spec(spec, format!("unclosed '{}'", open)));
    }
    tokens.push(&spec[start..]);

    if tokens.iter().any(|t| t.is_empty()) {
        return Err(Error::malformed_spec(spec, "empty column name"));
    }
    Ok(tokens)
}

fn parse_token(spec: &str, token: &str) -> Result<SpecItem> {
    let Some((source, target)) = token.split_once("->") else {
        if token.contains(['(', '{']) {
            return Err(Error::malformed_spec(
                spec,
                format!("join group in '{}' has no '->'", token),
            ));
        }
        if token != "*" && !is_qualified_identifier(token) {
            return Err(Error::malformed_spec(spec, format!("invalid column '{}'", token)));
        }
        return Ok(SpecItem::Column(token.to_owned()));
    };

    if target.contains("->") {
        return Err(Error::malformed_spec(
            spec,
            format!("more than one '->' in '{}'", token),
        ));
    }
    if !is_identifier(source) {
        return Err(Error::malformed_spec(spec, format!("invalid join key '{}'", source)));
    }

    let (table, rest) = target.split_once('(').ok_or_else(|| {
        Error::malformed_spec(spec, format!("join '{}' is missing its (column) group", token))
    })?;
    let (to_column, rest) = rest.split_once(')').ok_or_else(|| {
        Error::malformed_spec(spec, format!("join '{}' has an unclosed (column) group", token))
    })?;
    let columns = rest
        .strip_prefix('{')
        .and_then(|r| r.strip_suffix('}'))
        .ok_or_else(|| {
            Error::malformed_spec(spec, format!("join '{}' is missing its {{columns}} group", token))
        })?;

    if !is_qualified_identifier(table) {
        return Err(Error::malformed_spec(spec, format!("invalid join table '{}'", table)));
    }
    if !is_identifier(to_column) {
        return Err(Error::malformed_spec(
            spec,
            format!("invalid join column '{}'", to_column),
        ));
    }

    let columns: Vec<String> = columns.split(',').map(str::to_owned).collect();
    if let Some(bad) = columns.iter().find(|c| !is_identifier(c)) {
        let reason = if bad.is_empty() {
            format!("join '{}' selects an empty column", token)
        } else {
            format!("invalid joined column '{}'", bad)
        };
        return Err(Error::malformed_spec(spec, reason));
    }

    Ok(SpecItem::Join(JoinDescriptor {
        table: table.to_owned(),
        from_column: source.to_owned(),
        to_column: to_column.to_owned(),
        columns,
    }))
}
