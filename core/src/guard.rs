//! Pre-execution gates for model-generated SQL.
//!
//! Both checks are deliberately blunt and textual. They do not parse SQL; they only
//! have to guarantee that an unfiltered or mutating statement never reaches the
//! database, whatever the model intended.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::partition::PartitionFilter;

/// Phrase every missing-filter rejection contains.
pub const MISSING_FILTER_PHRASE: &str = "missing required filter";

static FORBIDDEN_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(INSERT|UPDATE|DELETE|MERGE|UPSERT|DROP|ALTER|CREATE|TRUNCATE|GRANT|REVOKE|EXEC|EXECUTE|CALL|COPY|INTO)\b",
    )
    .expect("forbidden keyword pattern is valid")
});

/// True when the candidate textually contains the required filter fragment as SQL
/// structure, not inside a string literal, quoted identifier or comment.
///
/// Case-sensitive, exactly as generated. An empty fragment authorizes nothing.
pub fn is_authorized(candidate_query: &str, required_clause_fragment: &str) -> bool {
    !required_clause_fragment.is_empty()
        && mask_literals_and_comments(candidate_query).contains(required_clause_fragment)
}

/// Why a statement was refused by the read-only classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementRejection {
    Empty,
    MultipleStatements,
    NotASelect { leading_keyword: String },
    ForbiddenKeyword { keyword: String },
}

impl fmt::Display for StatementRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementRejection::Empty => write!(f, "query is empty"),
            StatementRejection::MultipleStatements => {
                write!(f, "only a single statement may be executed")
            }
            StatementRejection::NotASelect { leading_keyword } => write!(
                f,
                "only SELECT queries are allowed, got '{leading_keyword}'"
            ),
            StatementRejection::ForbiddenKeyword { keyword } => write!(
                f,
                "data-modifying or definition keyword '{keyword}' is not allowed"
            ),
        }
    }
}

/// Allow-list check: a single `SELECT`/`WITH` statement with no DML/DDL keywords
/// outside string literals, quoted identifiers and comments.
pub fn classify_statement(sql: &str) -> Result<(), StatementRejection> {
    let masked = mask_literals_and_comments(sql);
    let body = masked.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if body.is_empty() {
        return Err(StatementRejection::Empty);
    }
    if body.contains(';') {
        return Err(StatementRejection::MultipleStatements);
    }

    let leading = body
        .split(|c: char| c.is_whitespace() || c == '(')
        .find(|word| !word.is_empty())
        .unwrap_or_default()
        .to_ascii_uppercase();
    if leading != "SELECT" && leading != "WITH" {
        return Err(StatementRejection::NotASelect {
            leading_keyword: leading,
        });
    }

    if let Some(found) = FORBIDDEN_KEYWORD.find(body) {
        return Err(StatementRejection::ForbiddenKeyword {
            keyword: found.as_str().to_ascii_uppercase(),
        });
    }
    Ok(())
}

/// A candidate refused before execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardViolation {
    NotReadOnly(StatementRejection),
    MissingFilter { fragment: String },
}

impl fmt::Display for GuardViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardViolation::NotReadOnly(reason) => write!(f, "Error: {reason}."),
            GuardViolation::MissingFilter { fragment } => write!(
                f,
                "Error: {MISSING_FILTER_PHRASE}. The query must include '{fragment}' on the Orders table."
            ),
        }
    }
}

/// Runs both gates in order: statement type first, then the partition filter.
pub fn inspect(candidate_query: &str, filter: &PartitionFilter) -> Result<(), GuardViolation> {
    classify_statement(candidate_query).map_err(GuardViolation::NotReadOnly)?;
    if !is_authorized(candidate_query, filter.fragment()) {
        return Err(GuardViolation::MissingFilter {
            fragment: filter.fragment().to_string(),
        });
    }
    Ok(())
}

/// Replaces the contents of `'...'` literals (including `E'...'` escape strings),
/// `"..."` identifiers, `$tag$...$tag$` dollar quotes and comments with blanks so
/// structural checks only see SQL structure. An unterminated quote masks the rest of
/// the text.
fn mask_literals_and_comments(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                let backslash_escapes = c == '\'' && is_escape_string_prefix(&chars, i);
                out.push(c);
                i += 1;
                while i < chars.len() {
                    let inner = chars[i];
                    if backslash_escapes && inner == '\\' {
                        out.push(' ');
                        i += 1;
                        if i < chars.len() {
                            out.push(' ');
                            i += 1;
                        }
                        continue;
                    }
                    if inner == c {
                        // doubled quote is an escape
                        if chars.get(i + 1) == Some(&c) {
                            out.push_str("  ");
                            i += 2;
                            continue;
                        }
                        out.push(c);
                        i += 1;
                        break;
                    }
                    out.push(' ');
                    i += 1;
                }
            }
            '$' => match dollar_tag_len(&chars, i) {
                Some(tag_len) => {
                    let tag = &chars[i..i + tag_len];
                    let body_start = i + tag_len;
                    let close = (body_start..chars.len())
                        .find(|&j| chars[j..].starts_with(tag));
                    let end = close.map_or(chars.len(), |j| j + tag_len);
                    out.push('$');
                    for _ in i + 1..end.saturating_sub(1) {
                        out.push(' ');
                    }
                    if close.is_some() {
                        out.push('$');
                    }
                    i = end;
                }
                None => {
                    out.push(c);
                    i += 1;
                }
            },
            '-' if chars.get(i + 1) == Some(&'-') => {
                i += 2;
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                out.push(' ');
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
                out.push(' ');
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// `E'...'` / `e'...'` where the `E` is not the tail of a longer identifier.
fn is_escape_string_prefix(chars: &[char], quote_at: usize) -> bool {
    quote_at >= 1
        && matches!(chars[quote_at - 1], 'E' | 'e')
        && (quote_at < 2 || !is_word_char(chars[quote_at - 2]))
}

/// Length of a `$tag$` / `$$` opener at `at`, including both dollar signs.
///
/// `$1` parameters and `$` inside identifiers are not dollar quotes.
fn dollar_tag_len(chars: &[char], at: usize) -> Option<usize> {
    if at > 0 && is_word_char(chars[at - 1]) {
        return None;
    }
    let mut j = at + 1;
    if chars.get(j).is_some_and(|&c| c.is_alphabetic() || c == '_') {
        j += 1;
        while chars.get(j).is_some_and(|&c| c.is_alphanumeric() || c == '_') {
            j += 1;
        }
    }
    (chars.get(j) == Some(&'$')).then_some(j - at + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::PartitionSet;

    fn filter() -> PartitionFilter {
        let set: PartitionSet = [101, 205].into_iter().collect();
        PartitionFilter::new("ServiceTeamId", &set).unwrap()
    }

    #[test]
    fn guard_rejects_query_without_fragment() {
        assert!(!is_authorized("SELECT * FROM Orders", "ServiceTeamId IN (101,205)"));
    }

    #[test]
    fn guard_accepts_query_with_fragment() {
        let sql = "SELECT o.Id FROM Orders o WHERE o.ServiceTeamId IN (101,205)";
        assert!(is_authorized(sql, "ServiceTeamId IN (101,205)"));
    }

    #[test]
    fn guard_is_case_sensitive() {
        let sql = "SELECT Id FROM Orders WHERE serviceteamid in (101,205)";
        assert!(!is_authorized(sql, "ServiceTeamId IN (101,205)"));
    }

    #[test]
    fn guard_rejects_other_partition_sets() {
        let sql = "SELECT Id FROM Orders WHERE ServiceTeamId IN (101,205,999)";
        assert!(!is_authorized(sql, "ServiceTeamId IN (101,205)"));
    }

    #[test]
    fn empty_fragment_authorizes_nothing() {
        assert!(!is_authorized("SELECT 1", ""));
    }

    #[test]
    fn classifier_accepts_select_and_cte() {
        classify_statement("SELECT Id FROM Orders;").expect("select is read-only");
        classify_statement("  with recent as (select Id from Orders) select * from recent")
            .expect("cte is read-only");
        classify_statement("(SELECT 1)").expect("parenthesised select is read-only");
    }

    #[test]
    fn classifier_rejects_mutations() {
        assert_eq!(
            classify_statement("DELETE FROM Orders WHERE ServiceTeamId IN (1)"),
            Err(StatementRejection::NotASelect {
                leading_keyword: "DELETE".to_string()
            })
        );
        assert_eq!(
            classify_statement("WITH x AS (DELETE FROM Orders RETURNING Id) SELECT * FROM x"),
            Err(StatementRejection::ForbiddenKeyword {
                keyword: "DELETE".to_string()
            })
        );
        assert_eq!(
            classify_statement("SELECT * INTO backup FROM Orders"),
            Err(StatementRejection::ForbiddenKeyword {
                keyword: "INTO".to_string()
            })
        );
    }

    #[test]
    fn classifier_rejects_stacked_statements() {
        assert_eq!(
            classify_statement("SELECT 1; DROP TABLE Orders"),
            Err(StatementRejection::MultipleStatements)
        );
    }

    #[test]
    fn keywords_inside_literals_and_comments_are_ignored() {
        classify_statement("SELECT Id FROM ApplicationUsers WHERE LastName = 'Update; Drop'")
            .expect("literal content is not structure");
        classify_statement("SELECT \"Delete\" FROM Tasks -- insert later\n")
            .expect("quoted identifiers and comments are masked");
        classify_statement("SELECT 'it''s; delete' /* drop */ FROM Orders")
            .expect("escaped quotes stay inside the literal");
    }

    #[test]
    fn empty_query_is_rejected() {
        assert_eq!(classify_statement("  ;  "), Err(StatementRejection::Empty));
    }

    #[test]
    fn fragment_inside_literal_does_not_authorize() {
        let sql = "SELECT Id, ServiceTeamId FROM Orders WHERE 'ServiceTeamId IN (101,205)' <> ''";
        assert!(!is_authorized(sql, "ServiceTeamId IN (101,205)"));
        assert!(matches!(
            inspect(sql, &filter()),
            Err(GuardViolation::MissingFilter { .. })
        ));
    }

    #[test]
    fn fragment_inside_comment_does_not_authorize() {
        for sql in [
            "SELECT Id FROM Orders -- ServiceTeamId IN (101,205)",
            "SELECT Id FROM Orders /* ServiceTeamId IN (101,205) */",
            "SELECT Id FROM Orders WHERE $$ServiceTeamId IN (101,205)$$ <> ''",
            "SELECT Id FROM Orders WHERE \"ServiceTeamId IN (101,205)\" IS NULL",
        ] {
            assert!(!is_authorized(sql, "ServiceTeamId IN (101,205)"), "{sql}");
        }
    }

    #[test]
    fn fragment_after_comment_still_authorizes() {
        let sql = "SELECT Id FROM Orders -- open orders\nWHERE ServiceTeamId IN (101,205)";
        assert!(is_authorized(sql, "ServiceTeamId IN (101,205)"));
    }

    #[test]
    fn dollar_quotes_are_masked_as_literals() {
        classify_statement("SELECT $$it's; delete$$ AS note FROM Orders")
            .expect("dollar-quoted body is not structure");
        classify_statement("SELECT $body$ drop ; $body$ FROM Orders")
            .expect("tagged dollar quote is masked");
        assert_eq!(
            classify_statement("SELECT $$'$$ FROM Orders; DROP TABLE Orders"),
            Err(StatementRejection::MultipleStatements)
        );
    }

    #[test]
    fn escape_strings_honour_backslash_quotes() {
        assert_eq!(
            classify_statement("SELECT E'\\'' FROM Orders; DROP TABLE Orders"),
            Err(StatementRejection::MultipleStatements)
        );
        classify_statement("SELECT E'a\\'; drop' FROM Orders")
            .expect("escaped quote stays inside the literal");
    }

    #[test]
    fn positional_parameters_are_not_dollar_quotes() {
        assert_eq!(dollar_tag_len(&"$1".chars().collect::<Vec<_>>(), 0), None);
        assert_eq!(dollar_tag_len(&"$$".chars().collect::<Vec<_>>(), 0), Some(2));
        assert_eq!(dollar_tag_len(&"$q$".chars().collect::<Vec<_>>(), 0), Some(3));
        assert_eq!(dollar_tag_len(&"a$b$".chars().collect::<Vec<_>>(), 1), None);
    }

    #[test]
    fn inspect_checks_statement_before_filter() {
        let err = inspect("DROP TABLE Orders", &filter()).unwrap_err();
        assert!(matches!(err, GuardViolation::NotReadOnly(_)));

        let err = inspect("SELECT * FROM Orders", &filter()).unwrap_err();
        assert!(err.to_string().contains(MISSING_FILTER_PHRASE));
        assert!(err.to_string().contains("ServiceTeamId IN (101,205)"));

        inspect(
            "SELECT Id FROM Orders WHERE ServiceTeamId IN (101,205)",
            &filter(),
        )
        .expect("filtered select passes");
    }
}
