use std::ops::Range;

/// A column name found by [`ColumnTextScanner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub name: String,
    /// Byte range of the name in the scanned text, delimiters included.
    pub span: Range<usize>,
    /// Written as `[name]` or `"name"`.
    pub quoted: bool,
}

/// Extracts candidate column names from a clause or expression without parsing it.
///
/// Whitespace, quotes, brackets and punctuation delimit tokens. Bare words are kept unless they
/// are SQL keywords, numeric literals, bind parameters (`:name`, `@name`, `?`) or function names
/// (followed by `(`). String literals are skipped. Dotted names (`t.col`) are returned whole.
pub struct ColumnTextScanner<'a> {
    src: &'a str,
    chars: std::str::CharIndices<'a>,
    peeked: Option<(usize, char)>,
}

impl<'a> ColumnTextScanner<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices(),
            peeked: None,
        }
    }

    /// Distinct column names in order of first appearance.
    pub fn columns(text: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for col in ColumnTextScanner::new(text) {
            if !out.contains(&col.name) {
                out.push(col.name);
            }
        }
        out
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        self.peeked.take().or_else(|| self.chars.next())
    }

    fn peek(&mut self) -> Option<(usize, char)> {
        if self.peeked.is_none() {
            self.peeked = self.chars.next();
        }
        self.peeked
    }

    fn offset(&mut self) -> usize {
        self.peek().map_or(self.src.len(), |(i, _)| i)
    }

    fn is_ident_start(ch: char) -> bool {
        ch.is_alphabetic() || ch == '_'
    }

    fn is_ident_continue(ch: char) -> bool {
        ch.is_alphanumeric() || ch == '_' || ch == '$' || ch == '.'
    }

    fn skip_while(&mut self, pred: impl Fn(char) -> bool) {
        while let Some((_, ch)) = self.peek() {
            if !pred(ch) {
                break;
            }
            self.bump();
        }
    }

    fn skip_string(&mut self) {
        while let Some((_, ch)) = self.bump() {
            if ch == '\'' {
                // doubled quote is an escape
                if matches!(self.peek(), Some((_, '\''))) {
                    self.bump();
                    continue;
                }
                return;
            }
        }
    }

    fn lex_quoted(&mut self, start: usize, close: char) -> Option<ColumnRef> {
        let mut name = String::new();
        while let Some((_, ch)) = self.bump() {
            if ch == close {
                if matches!(self.peek(), Some((_, c)) if c == close) {
                    self.bump();
                    name.push(close);
                    continue;
                }
                let end = self.offset();
                return (!name.is_empty()).then(|| ColumnRef {
                    name,
                    span: start..end,
                    quoted: true,
                });
            }
            name.push(ch);
        }
        None
    }

    fn lex_word(&mut self, start: usize) -> Option<ColumnRef> {
        self.skip_while(Self::is_ident_continue);
        let end = self.offset();
        let word = self.src[start..end].trim_end_matches('.');
        if word.is_empty() || is_keyword(word) {
            return None;
        }

        self.skip_while(char::is_whitespace);
        if matches!(self.peek(), Some((_, '('))) {
            return None;
        }
        Some(ColumnRef {
            name: word.to_string(),
            span: start..start + word.len(),
            quoted: false,
        })
    }
}

impl Iterator for ColumnTextScanner<'_> {
    type Item = ColumnRef;

    fn next(&mut self) -> Option<ColumnRef> {
        while let Some((start, ch)) = self.bump() {
            match ch {
                '\'' => self.skip_string(),
                '[' => {
                    if let Some(col) = self.lex_quoted(start, ']') {
                        return Some(col);
                    }
                }
                '"' => {
                    if let Some(col) = self.lex_quoted(start, '"') {
                        return Some(col);
                    }
                }
                ':' | '@' => {
                    // Bind parameter; `::` is a cast and the type name that follows is skipped too.
                    self.skip_while(|c| c == ':' || c == '@' || Self::is_ident_continue(c));
                }
                '-' if matches!(self.peek(), Some((_, '-'))) => {
                    self.skip_while(|c| c != '\n');
                }
                c if c.is_ascii_digit() => {
                    self.skip_while(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_');
                }
                c if Self::is_ident_start(c) => {
                    if let Some(col) = self.lex_word(start) {
                        return Some(col);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

fn is_keyword(word: &str) -> bool {
    let lower = word.to_ascii_lowercase();
    matches!(
        lower.as_str(),
        "select"
            | "from"
            | "where"
            | "and"
            | "or"
            | "not"
            | "in"
            | "is"
            | "null"
            | "like"
            | "ilike"
            | "between"
            | "as"
            | "on"
            | "join"
            | "inner"
            | "left"
            | "right"
            | "outer"
            | "full"
            | "cross"
            | "group"
            | "by"
            | "order"
            | "having"
            | "limit"
            | "offset"
            | "fetch"
            | "top"
            | "distinct"
            | "all"
            | "any"
            | "some"
            | "union"
            | "except"
            | "intersect"
            | "case"
            | "when"
            | "then"
            | "else"
            | "end"
            | "asc"
            | "desc"
            | "exists"
            | "insert"
            | "update"
            | "delete"
            | "set"
            | "values"
            | "into"
            | "true"
            | "false"
            | "with"
            | "over"
            | "partition"
            | "escape"
            | "cast"
            | "interval"
            | "date"
            | "timestamp"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_are_case_insensitive() {
        assert!(is_keyword("SELECT"));
        assert!(is_keyword("Between"));
        assert!(!is_keyword("region"));
    }

    #[test]
    fn spans_point_at_the_name() {
        let text = "a = 1 and  [Order Date] > :since";
        let cols: Vec<ColumnRef> = ColumnTextScanner::new(text).collect();
        assert_eq!(cols.len(), 2);
        assert_eq!(&text[cols[0].span.clone()], "a");
        assert_eq!(&text[cols[1].span.clone()], "[Order Date]");
        assert!(cols[1].quoted);
    }
}
