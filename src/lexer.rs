//! Line-oriented tokenizer for the textual assembly format.

use std::rc::Rc;

use log::debug;

use crate::error::{Error, ErrorKind};
use crate::isa::Opcode;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Catch,
    Catchall,
    Language,
    Function,
    Record,
    Field,
}

fn find_keyword(s: &str) -> Option<Keyword> {
    match s {
        ".catch" => Some(Keyword::Catch),
        ".catchall" => Some(Keyword::Catchall),
        ".language" => Some(Keyword::Language),
        ".function" => Some(Keyword::Function),
        ".record" => Some(Keyword::Record),
        ".field" => Some(Keyword::Field),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    IdBad,
    DelComma,
    DelColon,
    DelBraceL,
    DelBraceR,
    DelBracketL,
    DelBracketR,
    DelSquareBracketL,
    DelSquareBracketR,
    DelGt,
    DelLt,
    DelEq,
    DelDot,
    /// bare identifier or number literal in text form
    Id,
    /// double-quoted literal, bounds include the quotes
    IdString,
    Operation(Opcode),
    Keyword(Keyword),
}

impl TokenKind {
    /// Stable name used in logs and assertions.
    pub fn what(&self) -> &'static str {
        match self {
            TokenKind::IdBad => "ID_BAD",
            TokenKind::DelComma => "DEL_COMMA",
            TokenKind::DelColon => "DEL_COLON",
            TokenKind::DelBraceL => "DEL_BRACE_L",
            TokenKind::DelBraceR => "DEL_BRACE_R",
            TokenKind::DelBracketL => "DEL_BRACKET_L",
            TokenKind::DelBracketR => "DEL_BRACKET_R",
            TokenKind::DelSquareBracketL => "DEL_SQUARE_BRACKET_L",
            TokenKind::DelSquareBracketR => "DEL_SQUARE_BRACKET_R",
            TokenKind::DelGt => "DEL_GT",
            TokenKind::DelLt => "DEL_LT",
            TokenKind::DelEq => "DEL_EQ",
            TokenKind::DelDot => "DEL_DOT",
            TokenKind::Id => "ID",
            TokenKind::IdString => "ID_STRING",
            TokenKind::Operation(_) => "OPERATION",
            TokenKind::Keyword(_) => "KEYWORD",
        }
    }
}

pub const COMMENT_MARKER: u8 = b'#';

fn find_delim(c: u8) -> Option<TokenKind> {
    match c {
        b',' => Some(TokenKind::DelComma),
        b':' => Some(TokenKind::DelColon),
        b'{' => Some(TokenKind::DelBraceL),
        b'}' => Some(TokenKind::DelBraceR),
        b'(' => Some(TokenKind::DelBracketL),
        b')' => Some(TokenKind::DelBracketR),
        b'<' => Some(TokenKind::DelLt),
        b'>' => Some(TokenKind::DelGt),
        b'=' => Some(TokenKind::DelEq),
        b'[' => Some(TokenKind::DelSquareBracketL),
        b']' => Some(TokenKind::DelSquareBracketR),
        _ => None,
    }
}

fn is_quote(c: u8) -> bool {
    c == b'"'
}

/// One token with its byte span inside the line it came from.
#[derive(Debug, Clone)]
pub struct Token {
    pub whole_line: Rc<str>,
    pub bound_left: usize,
    pub bound_right: usize,
    pub kind: TokenKind,
}

impl Token {
    pub fn text(&self) -> &str {
        &self.whole_line[self.bound_left..self.bound_right]
    }
}

/// Tokenizes one source line at a time. Stateless across lines apart from
/// the running line counter used in debug logs.
#[derive(Default)]
pub struct Lexer {
    lines_seen: usize,
}

struct Line {
    buffer: Rc<str>,
    pos: usize,
    end: usize,
    tokens: Vec<Token>,
}

impl Lexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits `source_str` into tokens. The returned tokens keep a reference
    /// to the whole line for diagnostics.
    pub fn tokenize_string(&mut self, source_str: &str) -> Result<Vec<Token>> {
        self.lines_seen += 1;
        debug!("started tokenizing of line {}", self.lines_seen);

        let mut line = Line {
            buffer: Rc::from(source_str),
            pos: 0,
            end: source_str.len(),
            tokens: Vec::new(),
        };

        self.preprocess(&mut line);
        skip_space(&mut line);
        self.lex_tokens(&mut line)?;

        debug!(
            "tokenization of line {} is successful ({} tokens)",
            self.lines_seen,
            line.tokens.len()
        );
        Ok(line.tokens)
    }

    /// Truncates the line at the first comment marker outside a string
    /// literal, then right-trims whitespace.
    ///
    /// A `"` toggles the in-string state whenever the preceding byte is not
    /// `\`. The preceding byte itself being an escaped backslash (`"\\"`)
    /// is not considered.
    fn preprocess(&self, line: &mut Line) {
        let bytes = line.buffer.as_bytes();
        let mut inside_str_lit = !bytes.is_empty() && is_quote(bytes[0]);
        let mut cmt_pos = None;

        for (i, &c) in bytes.iter().enumerate() {
            if c == b'"' {
                if i != 0 && bytes[i - 1] != b'\\' {
                    inside_str_lit = !inside_str_lit;
                }
            } else if c == COMMENT_MARKER && !inside_str_lit {
                cmt_pos = Some(i);
                break;
            }
        }

        if let Some(pos) = cmt_pos {
            line.end = pos;
        }

        let bytes = line.buffer.as_bytes();
        while line.end > line.pos && bytes[line.end - 1].is_ascii_whitespace() {
            line.end -= 1;
        }
    }

    fn lex_tokens(&mut self, line: &mut Line) -> Result<()> {
        if line.pos == line.end {
            return Ok(());
        }

        while line.pos < line.end {
            let bytes = line.buffer.as_bytes();
            let bound_left = line.pos;

            if find_delim(bytes[line.pos]).is_some() {
                line.pos += 1;
            } else if is_quote(bytes[line.pos]) {
                self.lex_string(line)?;
            } else {
                while line.pos < line.end
                    && find_delim(bytes[line.pos]).is_none()
                    && !bytes[line.pos].is_ascii_whitespace()
                {
                    line.pos += 1;
                }
            }

            let bound_right = line.pos;
            let kind = self.get_kind(line, bound_left, bound_right);
            debug!(
                "token identified (line {}, token {}): {:?} (type: {})",
                self.lines_seen,
                line.tokens.len() + 1,
                &line.buffer[bound_left..bound_right],
                kind.what()
            );
            line.tokens.push(Token {
                whole_line: line.buffer.clone(),
                bound_left,
                bound_right,
                kind,
            });

            skip_space(line);
        }

        Ok(())
    }

    /// Consumes a string literal. The terminating quote must not be escaped
    /// with a backslash.
    fn lex_string(&self, line: &mut Line) -> Result<()> {
        let bytes = line.buffer.as_bytes();
        let quote = bytes[line.pos];
        let begin = line.pos;
        let mut is_escape_seq = false;

        while line.pos < line.end {
            line.pos += 1;
            if line.pos >= line.end {
                break;
            }
            let c = bytes[line.pos];

            if is_escape_seq {
                is_escape_seq = false;
                continue;
            }

            if c == b'\\' {
                is_escape_seq = true;
            }

            if c == quote {
                break;
            }
        }

        if line.pos >= line.end || bytes[line.pos] != quote {
            return Err(Error::new(
                format!("Missing terminating {} character", quote as char),
                0,
                ErrorKind::StringMissingTerminatingCharacter,
                "",
                begin,
                line.pos,
                line.buffer.to_string(),
            ));
        }

        line.pos += 1;
        Ok(())
    }

    fn get_kind(&self, line: &Line, beg: usize, end: usize) -> TokenKind {
        let bytes = line.buffer.as_bytes();
        if let Some(kind) = find_delim(bytes[beg]) {
            return kind;
        }

        let text = &line.buffer[beg..end];
        if let Some(kw) = find_keyword(text) {
            return TokenKind::Keyword(kw);
        }
        if let Some(op) = Opcode::from_mnemonic(text) {
            return TokenKind::Operation(op);
        }
        if is_quote(bytes[beg]) {
            return TokenKind::IdString;
        }
        TokenKind::Id
    }
}

fn skip_space(line: &mut Line) {
    let bytes = line.buffer.as_bytes();
    while line.pos < line.end && bytes[line.pos].is_ascii_whitespace() {
        line.pos += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<&'static str> {
        Lexer::new()
            .tokenize_string(source)
            .unwrap()
            .iter()
            .map(|t| t.kind.what())
            .collect()
    }

    #[test]
    fn test_operation_with_registers() {
        assert_eq!(kinds("mov v1, v2"), vec!["OPERATION", "ID", "DEL_COMMA", "ID"]);
    }

    #[test]
    fn test_operation_with_immediate() {
        assert_eq!(kinds("ldai 1"), vec!["OPERATION", "ID"]);
    }

    #[test]
    fn test_jump_target() {
        assert_eq!(kinds("jmp Ilabel"), vec!["OPERATION", "ID"]);
    }

    #[test]
    fn test_dotted_mnemonic() {
        assert_eq!(kinds("call.short f, v1"), vec!["OPERATION", "ID", "DEL_COMMA", "ID"]);
    }

    #[test]
    fn test_label_line() {
        assert_eq!(kinds("label:"), vec!["ID", "DEL_COLON"]);
    }

    #[test]
    fn test_all_delimiters() {
        assert_eq!(
            kinds(",:{}()<>="),
            vec![
                "DEL_COMMA",
                "DEL_COLON",
                "DEL_BRACE_L",
                "DEL_BRACE_R",
                "DEL_BRACKET_L",
                "DEL_BRACKET_R",
                "DEL_LT",
                "DEL_GT",
                "DEL_EQ"
            ]
        );
    }

    #[test]
    fn test_function_keyword() {
        assert_eq!(
            kinds(".function asd(u32){}"),
            vec![
                "KEYWORD",
                "ID",
                "DEL_BRACKET_L",
                "ID",
                "DEL_BRACKET_R",
                "DEL_BRACE_L",
                "DEL_BRACE_R"
            ]
        );
    }

    #[test]
    fn test_array_type() {
        let tokens = Lexer::new().tokenize_string("i32[]").unwrap();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].kind, TokenKind::Id);
        assert_eq!(tokens[1].kind, TokenKind::DelSquareBracketL);
        assert_eq!(tokens[2].kind, TokenKind::DelSquareBracketR);
    }

    #[test]
    fn test_string_literal_missing_terminator() {
        let err = Lexer::new().tokenize_string("\"123").unwrap_err();
        assert_eq!(err.kind, ErrorKind::StringMissingTerminatingCharacter);
        assert_eq!(err.pos, 0);
        assert_eq!(err.end, 4);
    }

    #[test]
    fn test_string_literal_escaped_quote_is_not_a_terminator() {
        let err = Lexer::new().tokenize_string("\"123\\\"").unwrap_err();
        assert_eq!(err.kind, ErrorKind::StringMissingTerminatingCharacter);
    }

    #[test]
    fn test_string_literal_with_backslash() {
        let s = "\" a b \\ c d \"";
        let tokens = Lexer::new().tokenize_string(s).unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::IdString);
        assert_eq!(tokens[0].bound_left, 0);
        assert_eq!(tokens[0].bound_right, s.len());
    }

    #[test]
    fn test_string_literal_followed_by_id() {
        let s = "\"abcd\"1234";
        let tokens = Lexer::new().tokenize_string(s).unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].kind, TokenKind::IdString);
        assert_eq!(tokens[0].bound_right, s.find('1').unwrap());
    }

    #[test]
    fn test_comment_stripping() {
        assert_eq!(kinds("mov v0, v1 # moving!"), vec!["OPERATION", "ID", "DEL_COMMA", "ID"]);
        assert!(kinds("# only a comment").is_empty());
    }

    #[test]
    fn test_comment_marker_inside_string() {
        let tokens = Lexer::new().tokenize_string("lda.str \"a#b\"").unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].kind, TokenKind::IdString);
        assert_eq!(tokens[1].text(), "\"a#b\"");
    }

    // The preprocessor treats the quote in `"\\"` as escaped even though the
    // backslash before it is itself escaped; this pins the long-standing
    // behavior.
    #[test]
    fn test_comment_strip_quote_after_double_backslash() {
        let tokens = Lexer::new().tokenize_string("lda.str \"a\\\\\" # c").unwrap();
        // the `"` after `\\` does not close the literal for the comment
        // scanner, so the `#` survives comment stripping and reaches the
        // token stream
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[1].text(), "\"a\\\\\"");
        assert_eq!(tokens[2].text(), "#");
    }

    #[test]
    fn test_empty_line() {
        assert!(kinds("").is_empty());
        assert!(kinds("    \t ").is_empty());
    }
}
