//! Dependency-free SQL statement splitter.
//!
//! Splits raw SQL text into individually executable statements without
//! parsing the SQL grammar itself. The scanner only needs to know which
//! semicolons are real statement boundaries, which requires tracking string
//! literals, quoted identifiers, comments, and PostgreSQL dollar-quoted
//! blocks (the form used for function bodies).

use crate::error::Error;

#[derive(Debug)]
enum Mode {
    Normal,
    SingleQuote,
    DoubleQuote,
    LineComment,
    BlockComment,
    /// Inside a dollar-quoted block; holds the full opening delimiter
    /// (e.g. `$$` or `$BODY$`). Only the identical closing delimiter exits.
    Dollar(String),
}

/// Split SQL text into statements.
///
/// Total over any input: unterminated literals, comments, and dollar-quoted
/// blocks extend to end of input and are emitted as a single trailing
/// statement (with a warning) rather than raising an error. A semicolon only
/// terminates a statement outside of strings, identifiers, comments, and
/// dollar-quoted blocks. Fragments consisting solely of whitespace and
/// comments are discarded.
pub fn split_statements(sql: &str) -> Vec<String> {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut statements = Vec::new();
    let mut stmt_start = 0usize;
    let mut i = 0usize;
    let mut mode = Mode::Normal;

    while i < len {
        match mode {
            Mode::Normal => match bytes[i] {
                b'\'' => {
                    mode = Mode::SingleQuote;
                    i += 1;
                }
                b'"' => {
                    mode = Mode::DoubleQuote;
                    i += 1;
                }
                b'-' if bytes.get(i + 1) == Some(&b'-') => {
                    mode = Mode::LineComment;
                    i += 2;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    mode = Mode::BlockComment;
                    i += 2;
                }
                b'$' => {
                    if let Some(tag_end) = dollar_tag_end(bytes, i) {
                        mode = Mode::Dollar(sql[i..tag_end].to_string());
                        i = tag_end;
                    } else {
                        i += 1;
                    }
                }
                b';' => {
                    push_statement(&mut statements, &sql[stmt_start..i]);
                    i += 1;
                    stmt_start = i;
                }
                _ => i += 1,
            },
            Mode::SingleQuote => {
                if bytes[i] == b'\'' {
                    if bytes.get(i + 1) == Some(&b'\'') {
                        // doubled quote is an escaped quote, not a boundary
                        i += 2;
                    } else {
                        mode = Mode::Normal;
                        i += 1;
                    }
                } else {
                    i += 1;
                }
            }
            Mode::DoubleQuote => {
                if bytes[i] == b'"' {
                    mode = Mode::Normal;
                }
                i += 1;
            }
            Mode::LineComment => {
                if bytes[i] == b'\n' {
                    mode = Mode::Normal;
                }
                i += 1;
            }
            Mode::BlockComment => {
                if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    mode = Mode::Normal;
                    i += 2;
                } else {
                    i += 1;
                }
            }
            Mode::Dollar(ref tag) => {
                if bytes[i] == b'$' && sql[i..].starts_with(tag.as_str()) {
                    i += tag.len();
                    mode = Mode::Normal;
                } else {
                    i += 1;
                }
            }
        }
    }

    if !matches!(mode, Mode::Normal) {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            mode = ?mode,
            "SQL input ends inside an unterminated construct; treating the remainder as one statement"
        );
    }

    push_statement(&mut statements, &sql[stmt_start..]);
    statements
}

/// If `bytes[start]` opens a dollar-quote delimiter, return the index just
/// past its closing `$`. A tag is zero or more alphanumerics/underscores not
/// starting with a digit (so `$1` positional parameters are never mistaken
/// for delimiters). Tags are case-sensitive.
fn dollar_tag_end(bytes: &[u8], start: usize) -> Option<usize> {
    debug_assert_eq!(bytes[start], b'$');
    let mut j = start + 1;
    while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
        j += 1;
    }
    if j >= bytes.len() || bytes[j] != b'$' {
        return None;
    }
    if j > start + 1 && bytes[start + 1].is_ascii_digit() {
        return None;
    }
    Some(j + 1)
}

fn push_statement(statements: &mut Vec<String>, fragment: &str) {
    let trimmed = fragment.trim();
    if !is_effectively_empty(trimmed) {
        statements.push(trimmed.to_string());
    }
}

/// True when the fragment contains nothing but whitespace and comments.
fn is_effectively_empty(fragment: &str) -> bool {
    let bytes = fragment.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i += 2;
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() {
                    if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            }
            c if c.is_ascii_whitespace() => i += 1,
            _ => return false,
        }
    }
    true
}

/// Reject statements that would interfere with the transaction owned by the
/// engine: explicit transaction control and `set_config(...search_path...)`
/// (the latter breaks PostGIS installations when left behind by a changeset).
///
/// For transaction control only text visible in normal lexical mode is
/// inspected, so a `BEGIN` inside a plpgsql function body is fine. The
/// search_path scan keeps string contents (the setting name appears as a
/// string argument of a real call) but ignores comments, so a comment that
/// merely mentions the call does not fail the statement.
pub fn check_statement(stmt: &str) -> Result<(), Error> {
    let visible = normal_mode_text(stmt).to_ascii_uppercase();
    let first = visible
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .find(|w| !w.is_empty());
    if let Some(word @ ("BEGIN" | "COMMIT" | "ROLLBACK" | "START" | "END" | "ABORT")) = first {
        return Err(Error::Configuration(format!(
            "transaction control statement '{word}' is not allowed in changesets or hooks; \
             transactions are managed by the engine"
        )));
    }
    let uncommented = strip_comments(stmt).to_ascii_uppercase();
    if uncommented.contains("SET_CONFIG") && uncommented.contains("SEARCH_PATH") {
        return Err(Error::Configuration(
            "changing the search path via set_config is not allowed in changesets or hooks".into(),
        ));
    }
    Ok(())
}

/// Copy of the input with comments removed. String literals, quoted
/// identifiers, and dollar-quoted bodies are kept verbatim.
fn strip_comments(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut out = String::with_capacity(len);
    let mut keep_start = 0usize;
    let mut i = 0usize;
    let mut mode = Mode::Normal;

    while i < len {
        match mode {
            Mode::Normal => match bytes[i] {
                b'\'' => {
                    mode = Mode::SingleQuote;
                    i += 1;
                }
                b'"' => {
                    mode = Mode::DoubleQuote;
                    i += 1;
                }
                b'-' if bytes.get(i + 1) == Some(&b'-') => {
                    out.push_str(&sql[keep_start..i]);
                    mode = Mode::LineComment;
                    i += 2;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    out.push_str(&sql[keep_start..i]);
                    mode = Mode::BlockComment;
                    i += 2;
                }
                b'$' => {
                    if let Some(tag_end) = dollar_tag_end(bytes, i) {
                        mode = Mode::Dollar(sql[i..tag_end].to_string());
                        i = tag_end;
                    } else {
                        i += 1;
                    }
                }
                _ => i += 1,
            },
            Mode::SingleQuote => {
                if bytes[i] == b'\'' {
                    if bytes.get(i + 1) == Some(&b'\'') {
                        i += 2;
                    } else {
                        mode = Mode::Normal;
                        i += 1;
                    }
                } else {
                    i += 1;
                }
            }
            Mode::DoubleQuote => {
                if bytes[i] == b'"' {
                    mode = Mode::Normal;
                }
                i += 1;
            }
            Mode::LineComment => {
                if bytes[i] == b'\n' {
                    mode = Mode::Normal;
                    keep_start = i;
                }
                i += 1;
            }
            Mode::BlockComment => {
                if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    mode = Mode::Normal;
                    i += 2;
                    keep_start = i;
                } else {
                    i += 1;
                }
            }
            Mode::Dollar(ref tag) => {
                if bytes[i] == b'$' && sql[i..].starts_with(tag.as_str()) {
                    i += tag.len();
                    mode = Mode::Normal;
                } else {
                    i += 1;
                }
            }
        }
    }
    if !matches!(mode, Mode::LineComment | Mode::BlockComment) {
        out.push_str(&sql[keep_start..]);
    }
    out
}

/// Copy of the input with everything outside normal lexical mode blanked.
fn normal_mode_text(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut out = String::with_capacity(len);
    let mut i = 0usize;
    let mut mode = Mode::Normal;

    while i < len {
        match mode {
            Mode::Normal => match bytes[i] {
                b'\'' => {
                    mode = Mode::SingleQuote;
                    out.push(' ');
                    i += 1;
                }
                b'"' => {
                    mode = Mode::DoubleQuote;
                    out.push(' ');
                    i += 1;
                }
                b'-' if bytes.get(i + 1) == Some(&b'-') => {
                    mode = Mode::LineComment;
                    i += 2;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    mode = Mode::BlockComment;
                    i += 2;
                }
                b'$' => {
                    if let Some(tag_end) = dollar_tag_end(bytes, i) {
                        mode = Mode::Dollar(sql[i..tag_end].to_string());
                        out.push(' ');
                        i = tag_end;
                    } else {
                        out.push('$');
                        i += 1;
                    }
                }
                c => {
                    out.push(c as char);
                    i += 1;
                }
            },
            Mode::SingleQuote => {
                if bytes[i] == b'\'' {
                    if bytes.get(i + 1) == Some(&b'\'') {
                        i += 2;
                    } else {
                        mode = Mode::Normal;
                        i += 1;
                    }
                } else {
                    i += 1;
                }
            }
            Mode::DoubleQuote => {
                if bytes[i] == b'"' {
                    mode = Mode::Normal;
                }
                i += 1;
            }
            Mode::LineComment => {
                if bytes[i] == b'\n' {
                    mode = Mode::Normal;
                    out.push('\n');
                }
                i += 1;
            }
            Mode::BlockComment => {
                if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    mode = Mode::Normal;
                    i += 2;
                } else {
                    i += 1;
                }
            }
            Mode::Dollar(ref tag) => {
                if bytes[i] == b'$' && sql[i..].starts_with(tag.as_str()) {
                    i += tag.len();
                    mode = Mode::Normal;
                } else {
                    i += 1;
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_simple_statements() {
        let sql = "CREATE TABLE a (id INT);\nCREATE TABLE b (id INT);\n";
        let stmts = split_statements(sql);
        assert_eq!(
            stmts,
            vec!["CREATE TABLE a (id INT)", "CREATE TABLE b (id INT)"]
        );
    }

    #[test]
    fn semicolon_in_string_literal_is_not_a_boundary() {
        let sql = "COMMENT ON TABLE a IS 'first; second';\nSELECT 1;";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0], "COMMENT ON TABLE a IS 'first; second'");
    }

    #[test]
    fn doubled_quote_is_an_escape_not_a_boundary() {
        let sql = "INSERT INTO t VALUES ('O''Brien; Esq.');SELECT 1;";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0], "INSERT INTO t VALUES ('O''Brien; Esq.')");
    }

    #[test]
    fn semicolon_in_quoted_identifier_is_not_a_boundary() {
        let sql = "CREATE TABLE \"odd;name\" (id INT);";
        let stmts = split_statements(sql);
        assert_eq!(stmts, vec!["CREATE TABLE \"odd;name\" (id INT)"]);
    }

    #[test]
    fn semicolon_in_line_comment_is_not_a_boundary() {
        let sql = "SELECT 1 -- ; not a boundary\n+ 2;";
        let stmts = split_statements(sql);
        assert_eq!(stmts, vec!["SELECT 1 -- ; not a boundary\n+ 2"]);
    }

    #[test]
    fn semicolon_in_block_comment_is_not_a_boundary() {
        let sql = "SELECT /* one; two; */ 1;";
        let stmts = split_statements(sql);
        assert_eq!(stmts, vec!["SELECT /* one; two; */ 1"]);
    }

    #[test]
    fn function_body_with_internal_semicolons_is_one_statement() {
        let sql = "CREATE FUNCTION f() RETURNS void AS $$\n\
                   BEGIN\n  PERFORM 1;\n  PERFORM 2;\nEND;\n$$ LANGUAGE plpgsql;";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].ends_with("$$ LANGUAGE plpgsql"));
    }

    #[test]
    fn nested_dollar_tags_do_not_confuse_the_splitter() {
        // $BODY$ inside a $$ block is literal content; only the identical
        // closing tag terminates the block.
        let sql = "CREATE FUNCTION f() RETURNS text AS $$ SELECT '$BODY$ x; $BODY$'; $$ LANGUAGE sql;\nSELECT 1;";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);

        let sql = "CREATE FUNCTION g() RETURNS void AS $BODY$ BEGIN PERFORM '$$'; END; $BODY$ LANGUAGE plpgsql;";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 1);
    }

    #[test]
    fn dollar_tag_matching_is_case_sensitive() {
        // $tag$ closed by $TAG$ does not terminate, so the whole input is a
        // single (unterminated) trailing statement.
        let sql = "SELECT $tag$ ; $TAG$ ; $tag$;SELECT 2;";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[1], "SELECT 2");
    }

    #[test]
    fn positional_parameter_is_not_a_dollar_tag() {
        let sql = "SELECT $1; SELECT $2;";
        let stmts = split_statements(sql);
        assert_eq!(stmts, vec!["SELECT $1", "SELECT $2"]);
    }

    #[test]
    fn unterminated_literal_extends_to_end_of_input() {
        let sql = "SELECT 1;SELECT 'unterminated; SELECT 2;";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[1], "SELECT 'unterminated; SELECT 2;");
    }

    #[test]
    fn trailing_whitespace_and_comments_are_discarded() {
        let sql = "SELECT 1;\n-- done\n/* all done */\n  ";
        let stmts = split_statements(sql);
        assert_eq!(stmts, vec!["SELECT 1"]);
    }

    #[test]
    fn empty_statements_between_semicolons_are_discarded() {
        let sql = ";;SELECT 1;;";
        let stmts = split_statements(sql);
        assert_eq!(stmts, vec!["SELECT 1"]);
    }

    #[test]
    fn total_over_arbitrary_bytes() {
        // Must not panic on multibyte input or stray delimiters.
        let stmts = split_statements("SELECT 'héllo; wörld';SELECT $x$éé$x$;");
        assert_eq!(stmts.len(), 2);
        split_statements("$");
        split_statements("'");
        split_statements("/*");
        split_statements("--");
    }

    #[test]
    fn check_statement_rejects_transaction_control() {
        assert!(check_statement("BEGIN").is_err());
        assert!(check_statement("commit").is_err());
        assert!(check_statement("ROLLBACK").is_err());
        assert!(check_statement("  /* c */ BEGIN").is_err());
        assert!(check_statement("CREATE TABLE t (id INT)").is_ok());
    }

    #[test]
    fn check_statement_allows_plpgsql_begin_end() {
        let body = "CREATE FUNCTION f() RETURNS void AS $$ BEGIN PERFORM 1; END; $$ LANGUAGE plpgsql";
        assert!(check_statement(body).is_ok());
    }

    #[test]
    fn check_statement_rejects_search_path_set_config() {
        let stmt = "SELECT pg_catalog.set_config('search_path', '', false)";
        assert!(check_statement(stmt).is_err());
    }

    #[test]
    fn check_statement_ignores_search_path_mentions_in_comments() {
        let stmt = "-- never call set_config('search_path', ...) manually\n\
                    CREATE TABLE t (id INT)";
        assert!(check_statement(stmt).is_ok());

        let stmt = "/* set_config and search_path are off limits */ SELECT 1";
        assert!(check_statement(stmt).is_ok());
    }

    #[test]
    fn check_statement_scans_outside_comments_as_one_text() {
        // Each forbidden word alone is harmless.
        let stmt = "SELECT set_config('log_statement', 'all', false) -- search_path untouched";
        assert!(check_statement(stmt).is_ok());
        // The real call still trips even with a comment in between.
        let stmt = "SELECT set_config( -- setting\n'search_path', '', false)";
        assert!(check_statement(stmt).is_err());
    }

    #[test]
    fn percent_escapes_pass_through_unchanged() {
        let sql = "INSERT INTO t VALUES ('100%');SELECT '%(legacy)s';";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[1], "SELECT '%(legacy)s'");
    }
}
