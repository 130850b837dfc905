//! Cursor over one line's token list.
//!
//! `advance`/`retreat` move between tokens; the cursor keeps the current
//! token kind cached and flips `end` when stepping past the last token, the
//! way the parser productions expect to probe line boundaries.

use crate::error::Error;
use crate::lexer::{Token, TokenKind};
use crate::parser::number::to_number;

pub const MAX_DWORD: usize = 65536;

#[derive(Default)]
pub struct Context {
    pub tokens: Vec<Token>,
    /// 1-based position of the current token
    pub number: usize,
    pub end: bool,
    pub id: Option<TokenKind>,
    pub signop: Option<TokenKind>,
    pub err: Option<Error>,
    pub ins_number: usize,
}

impl Context {
    pub fn make(&mut self, tokens: Vec<Token>) {
        self.err = None;
        self.ins_number = 0;
        self.tokens = tokens;
        self.number = 1;
        self.end = false;
        self.id = self.tokens.first().map(|t| t.kind);
        self.signop = None;
    }

    pub fn cur(&self) -> TokenKind {
        self.id.unwrap_or(TokenKind::IdBad)
    }

    pub fn cur_token(&self) -> &Token {
        &self.tokens[self.number - 1]
    }

    pub fn token(&self) -> &str {
        self.cur_token().text()
    }

    pub fn len(&self) -> usize {
        self.token().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// True once the cursor has stepped past the last token of the line.
    pub fn mask(&self) -> bool {
        self.end
    }

    pub fn next_mask(&self) -> bool {
        self.end || self.tokens.len() < self.number + 1
    }

    /// Kind of the token after the current one (or the current one at the
    /// end of the line).
    pub fn next_kind(&self) -> TokenKind {
        if self.tokens.len() > self.number {
            self.tokens[self.number].kind
        } else {
            self.tokens[self.number - 1].kind
        }
    }

    pub fn advance(&mut self) {
        if self.tokens.len() > self.number {
            self.number += 1;
            self.id = Some(self.tokens[self.number - 1].kind);
        } else {
            self.end = true;
        }
    }

    pub fn retreat(&mut self) {
        if self.number > 1 {
            self.number -= 1;
            self.id = Some(self.tokens[self.number - 1].kind);
        }
        self.end = false;
    }

    pub fn up_sign_operation(&mut self) {
        self.signop = self.id;
    }

    pub fn set_err(&mut self, err: Error) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }

    pub fn has_err(&self) -> bool {
        self.err.is_some()
    }

    /// Register operand name check: `<c><digits>` with no leading zero.
    /// For `a`-registers the numeric part must not exceed `n`.
    pub fn validate_register_name(&self, c: char, n: usize) -> bool {
        let token = self.token();
        let mut chars = token.chars();
        if chars.next() != Some(c) {
            return false;
        }

        let p = &token[1..];
        if p.is_empty() || (p.len() > 1 && p.starts_with('0')) {
            return false;
        }

        if c != 'a' {
            p.bytes().all(|b| b.is_ascii_digit())
        } else {
            to_number(p) <= n
        }
    }

    /// Parameter declarations must be named `aN` with `N` equal to the
    /// number of parameters declared so far.
    pub fn validate_parameter_name(&self, number_of_params_already_is: usize) -> bool {
        if number_of_params_already_is >= MAX_DWORD {
            return false;
        }

        let token = self.token();
        if let Some(p) = token.strip_prefix('a') {
            return to_number(p) == number_of_params_already_is;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn ctx_for(src: &str) -> Context {
        let mut ctx = Context::default();
        ctx.make(Lexer::new().tokenize_string(src).unwrap());
        ctx
    }

    #[test]
    fn test_cursor_walk() {
        let mut ctx = ctx_for("mov v1, v2");
        assert_eq!(ctx.token(), "mov");
        ctx.advance();
        assert_eq!(ctx.token(), "v1");
        ctx.advance();
        assert_eq!(ctx.cur(), TokenKind::DelComma);
        ctx.advance();
        assert_eq!(ctx.token(), "v2");
        assert!(!ctx.mask());
        ctx.advance();
        assert!(ctx.mask());
        ctx.retreat();
        assert!(!ctx.mask());
        assert_eq!(ctx.token(), "v2");
    }

    #[test]
    fn test_register_name_validation() {
        let ctx = ctx_for("v12");
        assert!(ctx.validate_register_name('v', 0));
        assert!(!ctx.validate_register_name('a', 0));

        let ctx = ctx_for("v01");
        assert!(!ctx.validate_register_name('v', 0));

        let ctx = ctx_for("a1");
        assert!(ctx.validate_register_name('a', 1));
        assert!(!ctx.validate_register_name('a', 0));
    }

    #[test]
    fn test_parameter_name_validation() {
        let ctx = ctx_for("a0");
        assert!(ctx.validate_parameter_name(0));
        assert!(!ctx.validate_parameter_name(1));

        let ctx = ctx_for("a2");
        assert!(ctx.validate_parameter_name(2));
    }
}
