// Named placeholder handling for relational query text and document pipelines.
//
// Relational queries are authored with `:name` placeholders; the PostgreSQL
// driver binds positional `$n` parameters. The rewrite finds placeholders in
// the PostgreSQL token stream, replaces only those spans and never splices
// values into the text.

use serde_json::Value;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Location, Token, Tokenizer, TokenizerError};

/// Relational query text with `:name` placeholders replaced by `$n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionalSql {
    /// Text ready for the driver.
    pub sql: String,
    /// Parameter names by position: `names[0]` binds to `$1`.
    pub names: Vec<String>,
}

impl PositionalSql {
    /// Position (1-based) for `name`, registering it on first use.
    fn position_of(&mut self, name: &str) -> usize {
        match self.names.iter().position(|n| n == name) {
            Some(p) => p + 1,
            None => {
                self.names.push(name.to_string());
                self.names.len()
            }
        }
    }
}

/// Placeholder scanning for relational and document query bodies.
pub struct PlaceholderScanner;

impl PlaceholderScanner {
    /// Rewrite `:name` placeholders to `$1..$n`.
    ///
    /// A name used twice keeps its first position. Literals of every
    /// PostgreSQL form (`'..'`, `E'..'`, `$$..$$`), quoted identifiers,
    /// comments and `::` casts come through as their own tokens; the text
    /// between placeholders is copied from the source unchanged.
    pub fn to_positional(sql: &str) -> Result<PositionalSql, TokenizerError> {
        let dialect = PostgreSqlDialect {};
        let tokens = Tokenizer::new(&dialect, sql).tokenize_with_location()?;
        let offsets = SourceOffsets::new(sql);

        let mut positional = PositionalSql {
            sql: String::with_capacity(sql.len()),
            names: Vec::new(),
        };
        let mut copied = 0;
        let mut iter = tokens.iter().peekable();

        while let Some(current) = iter.next() {
            let found = match &current.token {
                Token::Placeholder(p) => p
                    .strip_prefix(':')
                    .filter(|n| Self::is_ident(n))
                    .map(|name| (name.to_string(), current.span.end)),
                Token::Colon => match iter.peek() {
                    Some(next) => match &next.token {
                        Token::Word(w) if w.quote_style.is_none() && Self::is_ident(&w.value) => {
                            Some((w.value.clone(), next.span.end))
                        }
                        _ => None,
                    },
                    None => None,
                },
                _ => None,
            };

            let Some((name, end)) = found else { continue };
            if matches!(current.token, Token::Colon) {
                iter.next();
            }

            let start = offsets.byte_offset(current.span.start);
            let end = offsets.byte_offset(end);
            positional.sql.push_str(&sql[copied..start]);
            let position = positional.position_of(&name);
            positional.sql.push_str(&format!("${}", position));
            copied = end;
        }
        positional.sql.push_str(&sql[copied..]);

        Ok(positional)
    }

    /// Placeholder names referenced by relational query text, first-use order.
    pub fn sql_placeholders(sql: &str) -> Result<Vec<String>, TokenizerError> {
        Ok(Self::to_positional(sql)?.names)
    }

    /// Name carried by a document pipeline placeholder value (`":name"`).
    pub fn pipeline_placeholder(value: &str) -> Option<&str> {
        let name = value.strip_prefix(':')?;
        Self::is_ident(name).then_some(name)
    }

    /// Placeholder names referenced anywhere inside pipeline stages.
    pub fn pipeline_placeholders(stages: &[Value]) -> Vec<String> {
        let mut names = Vec::new();
        for stage in stages {
            Self::collect_pipeline(stage, &mut names);
        }
        names
    }

    fn collect_pipeline(value: &Value, names: &mut Vec<String>) {
        match value {
            Value::String(s) => {
                if let Some(name) = Self::pipeline_placeholder(s) {
                    if !names.iter().any(|n| n == name) {
                        names.push(name.to_string());
                    }
                }
            }
            Value::Array(items) => items.iter().for_each(|v| Self::collect_pipeline(v, names)),
            Value::Object(map) => map.values().for_each(|v| Self::collect_pipeline(v, names)),
            _ => {}
        }
    }

    fn is_ident(name: &str) -> bool {
        let mut chars = name.chars();
        chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }
}

/// Maps tokenizer locations (1-based line and character column) back to
/// byte offsets in the source text.
struct SourceOffsets<'a> {
    source: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> SourceOffsets<'a> {
    fn new(source: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { source, line_starts }
    }

    fn byte_offset(&self, location: Location) -> usize {
        let line = (location.line as usize).saturating_sub(1);
        let Some(&line_start) = self.line_starts.get(line) else {
            return self.source.len();
        };
        let column = (location.column as usize).saturating_sub(1);
        self.source[line_start..]
            .char_indices()
            .nth(column)
            .map(|(i, _)| line_start + i)
            .unwrap_or(self.source.len())
    }
}
