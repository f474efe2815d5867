use crate::error::{Result, ScanError};
use std::fmt;
use std::ops::Range;

/// Kind of a tagged metadata region, written as `/*<KIND>payload*/ body /*</KIND>*/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    Table,
    Alias,
    Column,
    Where,
}

impl TagKind {
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        if name.eq_ignore_ascii_case("table") {
            Some(TagKind::Table)
        } else if name.eq_ignore_ascii_case("alias") {
            Some(TagKind::Alias)
        } else if name.eq_ignore_ascii_case("column") {
            Some(TagKind::Column)
        } else if name.eq_ignore_ascii_case("where") {
            Some(TagKind::Where)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TagKind::Table => "TABLE",
            TagKind::Alias => "ALIAS",
            TagKind::Column => "COLUMN",
            TagKind::Where => "WHERE",
        }
    }
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanToken {
    /// SQL text outside any other token, including string literals.
    Text(String),
    /// A `[bracketed]` or `"quoted"` identifier, unescaped.
    Column(String),
    /// Body of a `WHERE` tagged region.
    Where(String),
    /// A `-- line` comment or an untagged `/* block */` comment, without delimiters.
    Comment(String),
    /// A `TABLE`, `ALIAS` or `COLUMN` tagged region.
    Tagged {
        kind: TagKind,
        payload: String,
        body: String,
    },
}

/// Receives tokens in source order. `span` is the byte range the token covers in the input;
/// consecutive spans are contiguous and together cover the whole input.
pub trait ScanListener {
    fn on_token(&mut self, token: ScanToken, span: Range<usize>);
}

impl ScanListener for Vec<ScanToken> {
    fn on_token(&mut self, token: ScanToken, _span: Range<usize>) {
        self.push(token);
    }
}

impl ScanListener for Vec<(ScanToken, Range<usize>)> {
    fn on_token(&mut self, token: ScanToken, span: Range<usize>) {
        self.push((token, span));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    /// Inside `[...]` or `"..."`; `close` is the terminating byte.
    InField { close: u8 },
    InString,
    InBlockComment,
}

#[derive(Debug)]
struct OpenRegion {
    kind: TagKind,
    payload: String,
    start: usize,
    body_start: usize,
}

enum Tag<'a> {
    Open { kind: TagKind, payload: &'a str },
    Close { kind: TagKind },
}

/// Single-pass state machine over a SQL string.
///
/// Tokens inside an open tagged region are not reported individually; the region is reported
/// once, as a whole, when its closing tag is seen.
pub struct SqlTextScanner<'a> {
    src: &'a str,
    state: State,
    text_start: Option<usize>,
    token_start: usize,
    region: Option<OpenRegion>,
}

impl<'a> SqlTextScanner<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            state: State::Normal,
            text_start: None,
            token_start: 0,
            region: None,
        }
    }

    pub fn run<L: ScanListener + ?Sized>(mut self, listener: &mut L) -> Result<()> {
        let src = self.src;
        let bytes = src.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            let next = bytes.get(i + 1).copied();
            match self.state {
                State::Normal => match (b, next) {
                    (b'-', Some(b'-')) => {
                        self.flush_text(i, listener);
                        let end = src[i..].find('\n').map_or(bytes.len(), |n| i + n);
                        let body = src[i + 2..end].to_string();
                        self.emit(ScanToken::Comment(body), i..end, listener);
                        i = end;
                        continue;
                    }
                    (b'/', Some(b'*')) => {
                        self.flush_text(i, listener);
                        self.token_start = i;
                        self.state = State::InBlockComment;
                        i += 2;
                        continue;
                    }
                    (b'\'', _) => {
                        self.text_start.get_or_insert(i);
                        self.state = State::InString;
                    }
                    (b'[', _) | (b'"', _) => {
                        self.flush_text(i, listener);
                        self.token_start = i;
                        let close = if b == b'[' { b']' } else { b'"' };
                        self.state = State::InField { close };
                    }
                    _ => {
                        self.text_start.get_or_insert(i);
                    }
                },
                State::InString => {
                    if b == b'\'' {
                        if next == Some(b'\'') {
                            i += 2;
                            continue;
                        }
                        self.state = State::Normal;
                    }
                }
                State::InField { close } => {
                    if b == close {
                        if next == Some(close) {
                            i += 2;
                            continue;
                        }
                        let quote = (close as char).to_string();
                        let name = src[self.token_start + 1..i].replace(&quote.repeat(2), &quote);
                        self.emit(ScanToken::Column(name), self.token_start..i + 1, listener);
                        self.state = State::Normal;
                    }
                }
                State::InBlockComment => {
                    if b == b'*' && next == Some(b'/') {
                        let start = self.token_start;
                        self.state = State::Normal;
                        self.finish_block_comment(start, i + 2, listener)?;
                        i += 2;
                        continue;
                    }
                }
            }
            i += 1;
        }

        match self.state {
            State::InBlockComment => {
                return Err(ScanError::UnterminatedComment {
                    offset: self.token_start,
                })
            }
            State::InField { .. } => {
                log::debug!(
                    "unterminated quoted identifier at byte {}; keeping it as text",
                    self.token_start
                );
                self.text_start.get_or_insert(self.token_start);
            }
            State::InString | State::Normal => {}
        }
        self.flush_text(bytes.len(), listener);

        match self.region {
            Some(region) => Err(ScanError::UnterminatedTag {
                kind: region.kind,
                offset: region.start,
            }),
            None => Ok(()),
        }
    }

    fn finish_block_comment<L: ScanListener + ?Sized>(
        &mut self,
        start: usize,
        end: usize,
        listener: &mut L,
    ) -> Result<()> {
        let src = self.src;
        let content = &src[start + 2..end - 2];
        match parse_tag(content) {
            Some(Tag::Open { kind, payload }) => {
                if self.region.is_some() {
                    return Err(ScanError::NestedTag {
                        kind,
                        offset: start,
                    });
                }
                self.region = Some(OpenRegion {
                    kind,
                    payload: payload.to_string(),
                    start,
                    body_start: end,
                });
            }
            Some(Tag::Close { kind }) => match self.region.take() {
                Some(region) if region.kind == kind => {
                    let body = src[region.body_start..start].to_string();
                    let token = match kind {
                        TagKind::Where => ScanToken::Where(body),
                        _ => ScanToken::Tagged {
                            kind,
                            payload: region.payload,
                            body,
                        },
                    };
                    listener.on_token(token, region.start..end);
                }
                Some(region) => {
                    return Err(ScanError::MismatchedTag {
                        expected: region.kind,
                        found: kind,
                        offset: start,
                    })
                }
                None => {
                    return Err(ScanError::UnexpectedClose {
                        kind,
                        offset: start,
                    })
                }
            },
            None => self.emit(ScanToken::Comment(content.to_string()), start..end, listener),
        }
        Ok(())
    }

    fn flush_text<L: ScanListener + ?Sized>(&mut self, end: usize, listener: &mut L) {
        if let Some(start) = self.text_start.take() {
            if start < end {
                let text = self.src[start..end].to_string();
                self.emit(ScanToken::Text(text), start..end, listener);
            }
        }
    }

    fn emit<L: ScanListener + ?Sized>(&self, token: ScanToken, span: Range<usize>, listener: &mut L) {
        if self.region.is_none() {
            listener.on_token(token, span);
        }
    }
}

/// `<KIND>payload` opens a region; `</KIND>` closes one. Anything else is a plain comment.
fn parse_tag(content: &str) -> Option<Tag<'_>> {
    let rest = content.strip_prefix('<')?;
    let (closing, rest) = match rest.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, rest),
    };
    let gt = rest.find('>')?;
    let kind = TagKind::parse(&rest[..gt])?;
    let payload = &rest[gt + 1..];
    if closing {
        payload.trim().is_empty().then_some(Tag::Close { kind })
    } else {
        Some(Tag::Open { kind, payload })
    }
}

/// Scan `sql` into its tokens.
pub fn scan(sql: &str) -> Result<Vec<ScanToken>> {
    let mut tokens = Vec::new();
    SqlTextScanner::new(sql).run(&mut tokens)?;
    Ok(tokens)
}

/// Scan `sql` into tokens paired with the byte range each covers.
pub fn scan_with_spans(sql: &str) -> Result<Vec<(ScanToken, Range<usize>)>> {
    let mut tokens = Vec::new();
    SqlTextScanner::new(sql).run(&mut tokens)?;
    Ok(tokens)
}

/// Rewrite tagged regions (including `WHERE` regions, whose payload is empty).
///
/// `f` receives the kind, payload and body of each region and returns its replacement text, or
/// `None` to keep the region as written. Text outside tagged regions is copied unchanged.
pub fn rewrite_tagged<F>(sql: &str, mut f: F) -> Result<String>
where
    F: FnMut(TagKind, &str, &str) -> Option<String>,
{
    let mut out = String::with_capacity(sql.len());
    for (token, span) in scan_with_spans(sql)? {
        let replacement = match &token {
            ScanToken::Where(body) => f(TagKind::Where, "", body),
            ScanToken::Tagged {
                kind,
                payload,
                body,
            } => f(*kind, payload, body),
            _ => None,
        };
        match replacement {
            Some(text) => out.push_str(&text),
            None => out.push_str(&sql[span]),
        }
    }
    Ok(out)
}

/// Remove tag comments, keeping the bodies of tagged regions.
pub fn strip_tags(sql: &str) -> Result<String> {
    rewrite_tagged(sql, |_, _, body| Some(body.to_string()))
}
