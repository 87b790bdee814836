//! Placeholder rewriting
//!
//! Call sites write positional parameters as `%s` regardless of engine. Before a
//! statement with parameters reaches the engine, each `%s` is rewritten into the
//! engine's native marker. Markers inside string literals, quoted identifiers,
//! dollar-quoted bodies (`$$ ... $$`, `$tag$ ... $tag$`) and comments are left
//! alone, and `%%` collapses to a literal `%`.

/// Native positional-parameter syntax of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?` (SQLite)
    QuestionMark,
    /// `$1`, `$2`, ... (PostgreSQL)
    Numbered,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Code,
    SingleQuoted,
    DoubleQuoted,
    DollarQuoted,
    LineComment,
    BlockComment,
}

/// Opening dollar-quote delimiter starting at a `$` already consumed, e.g. `$$` or
/// `$body$`. `$1` is a parameter, not a tag.
fn dollar_tag(mut rest: std::iter::Peekable<std::str::Chars<'_>>) -> Option<String> {
    let mut tag = String::from("$");
    if rest.peek().is_some_and(|c| c.is_ascii_digit()) {
        return None;
    }
    while let Some(c) = rest.next() {
        match c {
            '$' => {
                tag.push('$');
                return Some(tag);
            }
            c if c.is_alphanumeric() || c == '_' => tag.push(c),
            _ => return None,
        }
    }
    None
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Rewrite `%s` markers in `statement` into `style`
pub fn rewrite_placeholders(statement: &str, style: PlaceholderStyle) -> String {
    let mut out = String::with_capacity(statement.len() + 8);
    let mut chars = statement.chars().peekable();
    let mut state = ScanState::Code;
    let mut position = 0usize;
    let mut closing_tag = String::new();

    while let Some(c) = chars.next() {
        match state {
            ScanState::Code => match c {
                '%' if chars.peek() == Some(&'s') => {
                    chars.next();
                    position += 1;
                    match style {
                        PlaceholderStyle::QuestionMark => out.push('?'),
                        PlaceholderStyle::Numbered => {
                            out.push('$');
                            out.push_str(&position.to_string());
                        }
                    }
                }
                '%' if chars.peek() == Some(&'%') => {
                    chars.next();
                    out.push('%');
                }
                '\'' => {
                    state = ScanState::SingleQuoted;
                    out.push(c);
                }
                '"' => {
                    state = ScanState::DoubleQuoted;
                    out.push(c);
                }
                // `a$b$` is an identifier, not the start of a dollar quote
                '$' if !out.chars().next_back().is_some_and(is_identifier_char) => {
                    match dollar_tag(chars.clone()) {
                        Some(tag) => {
                            for _ in 1..tag.chars().count() {
                                chars.next();
                            }
                            out.push_str(&tag);
                            closing_tag = tag;
                            state = ScanState::DollarQuoted;
                        }
                        None => out.push(c),
                    }
                }
                '-' if chars.peek() == Some(&'-') => {
                    chars.next();
                    state = ScanState::LineComment;
                    out.push_str("--");
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = ScanState::BlockComment;
                    out.push_str("/*");
                }
                _ => out.push(c),
            },
            // '' escapes fall out naturally: leave the literal, then re-enter it
            ScanState::SingleQuoted => {
                if c == '\'' {
                    state = ScanState::Code;
                }
                out.push(c);
            }
            ScanState::DoubleQuoted => {
                if c == '"' {
                    state = ScanState::Code;
                }
                out.push(c);
            }
            ScanState::DollarQuoted => {
                let tail = &closing_tag[1..];
                if c == '$' && chars.clone().take(tail.chars().count()).eq(tail.chars()) {
                    for _ in 0..tail.chars().count() {
                        chars.next();
                    }
                    out.push_str(&closing_tag);
                    state = ScanState::Code;
                } else {
                    out.push(c);
                }
            }
            ScanState::LineComment => {
                if c == '\n' {
                    state = ScanState::Code;
                }
                out.push(c);
            }
            ScanState::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = ScanState::Code;
                    out.push_str("*/");
                } else {
                    out.push(c);
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
    fn test_question_mark_style() {
        let sql = "INSERT INTO t (a, b) VALUES (%s, %s)";
        assert_eq!(
            rewrite_placeholders(sql, PlaceholderStyle::QuestionMark),
            "INSERT INTO t (a, b) VALUES (?, ?)"
        );
    }

    #[test]
    fn test_numbered_style() {
        let sql = "SELECT * FROM t WHERE a = %s AND b > %s OR c = %s";
        assert_eq!(
            rewrite_placeholders(sql, PlaceholderStyle::Numbered),
            "SELECT * FROM t WHERE a = $1 AND b > $2 OR c = $3"
        );
    }

    #[test]
    fn test_literals_and_comments_untouched() {
        let sql = "SELECT '%s', \"col%s\" FROM t -- %s\nWHERE x = %s /* %s */";
        assert_eq!(
            rewrite_placeholders(sql, PlaceholderStyle::Numbered),
            "SELECT '%s', \"col%s\" FROM t -- %s\nWHERE x = $1 /* %s */"
        );
    }

    #[test]
    fn test_escaped_quote_and_percent() {
        let sql = "SELECT * FROM t WHERE name LIKE 'it''s %s' AND code LIKE %s || '%%' AND r = 5 %% %s";
        assert_eq!(
            rewrite_placeholders(sql, PlaceholderStyle::QuestionMark),
            "SELECT * FROM t WHERE name LIKE 'it''s %s' AND code LIKE ? || '%%' AND r = 5 % ?"
        );
    }

    #[test]
    fn test_no_markers() {
        let sql = "CREATE TABLE t(x)";
        assert_eq!(rewrite_placeholders(sql, PlaceholderStyle::Numbered), sql);
    }

    #[test]
    fn test_dollar_quoted_bodies_untouched() {
        let sql = "SELECT $$ 100%s $$, $fn$ a %s $$ b $fn$, %s";
        assert_eq!(
            rewrite_placeholders(sql, PlaceholderStyle::Numbered),
            "SELECT $$ 100%s $$, $fn$ a %s $$ b $fn$, $1"
        );
    }

    #[test]
    fn test_dollar_signs_outside_quotes() {
        // positional parameters and identifiers containing `$` are not quotes
        let sql = "SELECT $1, price$usd FROM t WHERE a = %s";
        assert_eq!(
            rewrite_placeholders(sql, PlaceholderStyle::QuestionMark),
            "SELECT $1, price$usd FROM t WHERE a = ?"
        );
    }
}
