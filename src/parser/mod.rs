//! Recursive-descent parser over per-line token lists.
//!
//! The parser consumes the lexer's output line by line, building the
//! [`Program`] graph. Records, functions, fields and labels may be referenced
//! before they are defined; forward references are resolved in the post-loop
//! passes, which also renumber `aN` register operands once each function's
//! register count is known.

pub mod number;
mod operands;

use std::collections::HashMap;

use log::debug;

use crate::context::Context;
use crate::error::{Error, ErrorKind, ErrorList};
use crate::isa::InstFlags;
use crate::lang::Language;
use crate::lexer::{Keyword, Lexer, Token, TokenKind};
use crate::mangling::{demangle_name, mangle_function_name};
use crate::meta::{MetaError, MetaErrorKind};
use crate::program::{
    CatchBlock, Field, FileLocation, Function, Ins, Label, Parameter, Program, Record,
    SourcePosition,
};
use crate::types::{Type, TypeId};

/// Which entity currently receives metadata attributes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum MetaTarget {
    Record,
    Field,
    Function,
    Param,
}

#[derive(Default)]
pub struct Parser {
    pub(crate) program: Program,
    pub(crate) context: Context,
    pub(crate) curr_record: Option<String>,
    pub(crate) curr_func: Option<String>,
    pub(crate) line_stric: usize,
    pub(crate) err: Option<Error>,
    pub(crate) warnings: ErrorList,
    pub(crate) open: bool,
    pub(crate) record_def: bool,
    pub(crate) func_def: bool,
    /// Function being declared, before its mangled key is known.
    pub(crate) pending_func: Option<Function>,
    /// Parameter being declared, before it joins the pending function.
    pub(crate) pending_param: Option<Parameter>,
    /// Deferred `aN` operand rewrites: function key -> (1-based instruction
    /// number, register operand index).
    pub(crate) function_arguments_lists: HashMap<String, Vec<(usize, usize)>>,
    pub(crate) curr_func_return_type: Type,
}

pub fn is_alpha_numeric(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub fn is_non_digit(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a whole source text, running the lexer line by line.
    pub fn parse_source(source: &str, file_name: &str) -> Result<(Program, ErrorList), Error> {
        let mut lexer = Lexer::new();
        let mut token_lines = Vec::new();
        for (i, line) in source.lines().enumerate() {
            match lexer.tokenize_string(line) {
                Ok(tokens) => token_lines.push(tokens),
                Err(mut e) => {
                    e.line_number = i + 1;
                    return Err(e);
                }
            }
        }

        Parser::new().parse(token_lines, file_name)
    }

    /// Parses pre-tokenized lines. Returns the program plus accumulated
    /// warnings, or the first fatal error.
    pub fn parse(
        mut self,
        token_lines: Vec<Vec<Token>>,
        file_name: &str,
    ) -> Result<(Program, ErrorList), Error> {
        let mut is_lang_parsed = false;
        let mut is_first_statement = true;

        for tokens in token_lines {
            self.line_stric += 1;

            if tokens.is_empty() {
                continue;
            }

            debug!("started parsing of line {}", self.line_stric);
            self.context.make(tokens);

            match self.context.cur() {
                TokenKind::Keyword(Keyword::Catch) | TokenKind::Keyword(Keyword::Catchall) => {
                    self.parse_as_catchall();
                }
                TokenKind::Keyword(Keyword::Language) => {
                    self.parse_as_language(&mut is_lang_parsed, is_first_statement);
                }
                TokenKind::Keyword(Keyword::Record) => {
                    self.parse_as_record();
                }
                TokenKind::Keyword(Keyword::Function) => {
                    self.parse_as_function();
                }
                TokenKind::DelBraceR => {
                    self.parse_as_brace_right();
                }
                _ => {
                    if self.func_def {
                        self.parse_function_code();
                    } else if self.record_def {
                        self.parse_record_fields();
                    }
                }
            }

            if !self.parse_after_line(&mut is_first_statement) {
                break;
            }
        }

        self.parse_after_main_loop(file_name)
    }

    pub fn warnings(&self) -> &ErrorList {
        &self.warnings
    }

    // ------------------------------------------------------------------
    // diagnostics
    // ------------------------------------------------------------------

    pub(crate) fn get_error(&self, message: &str, kind: ErrorKind) -> Error {
        let token = self.context.cur_token();
        Error::new(
            message,
            self.line_stric,
            kind,
            "",
            token.bound_left,
            token.bound_right,
            token.whole_line.to_string(),
        )
    }

    /// Error anchored after the current token; used for "expected more"
    /// reports at line ends.
    pub(crate) fn get_error_after(&self, message: &str, kind: ErrorKind) -> Error {
        let token = self.context.cur_token();
        Error::new(
            message,
            self.line_stric,
            kind,
            "",
            token.bound_right,
            token.bound_right,
            token.whole_line.to_string(),
        )
    }

    pub(crate) fn get_warning(&mut self, message: &str, kind: ErrorKind) {
        let token = self.context.cur_token();
        self.warnings.push(Error::warning(
            message,
            self.line_stric,
            kind,
            token.bound_left,
            token.bound_right,
            token.whole_line.to_string(),
        ));
    }

    pub(crate) fn set_error(&mut self) {
        if self.err.is_none() {
            if let Some(e) = self.context.err.clone() {
                self.err = Some(e);
            }
        }
    }

    fn has_error(&self) -> bool {
        self.err.is_some()
    }

    pub(crate) fn current_position(&self, left_bound: bool) -> SourcePosition {
        let token = self.context.cur_token();
        SourcePosition {
            line: self.line_stric,
            column: if left_bound { token.bound_left } else { token.bound_right },
        }
    }

    pub(crate) fn file_location_here(&self, is_defined: bool) -> FileLocation {
        let token = self.context.cur_token();
        FileLocation {
            whole_line: token.whole_line.to_string(),
            bound_left: token.bound_left,
            bound_right: token.bound_right,
            line_number: self.line_stric,
            is_defined,
        }
    }

    // ------------------------------------------------------------------
    // name validation
    // ------------------------------------------------------------------

    pub(crate) fn prefixed_valid_name(&self) -> bool {
        let s = self.context.token();
        let mut chars = s.chars();
        match chars.next() {
            Some(c) if is_non_digit(c) => {}
            _ => return false,
        }

        let bytes: Vec<char> = s.chars().collect();
        let mut i = 1;
        while i < bytes.len() {
            if bytes[i] == '.' {
                i += 1;
                if i >= bytes.len() || !is_non_digit(bytes[i]) {
                    return false;
                }
            } else if !is_alpha_numeric(bytes[i]) && bytes[i] != '$' {
                return false;
            }
            i += 1;
        }

        true
    }

    pub(crate) fn record_valid_name(&self) -> bool {
        self.prefixed_valid_name()
    }

    pub(crate) fn function_valid_name(&self) -> bool {
        self.prefixed_valid_name()
    }

    pub(crate) fn label_valid_name(&self) -> bool {
        let s = self.context.token();
        let mut chars = s.chars();
        match chars.next() {
            Some(c) if is_non_digit(c) => {}
            _ => return false,
        }
        chars.all(is_alpha_numeric)
    }

    pub(crate) fn type_valid_name(&self) -> bool {
        if Type::id_of(self.context.token(), false) != TypeId::Reference {
            return true;
        }
        self.prefixed_valid_name()
    }

    // ------------------------------------------------------------------
    // forward-reference tables
    // ------------------------------------------------------------------

    /// Inserts or refreshes a record entry. Returns false when the name is
    /// already defined and `defined` asks for a second definition.
    pub(crate) fn add_record_to_table(&mut self, name: &str, defined: bool) -> bool {
        let location = self.file_location_here(defined);
        match self.program.record_table.get_mut(name) {
            None => {
                let rec = Record::with_location(name, self.program.lang, location);
                self.program.record_table.insert(name.to_string(), rec);
                true
            }
            Some(rec) => {
                let loc = rec.file_location.as_mut().unwrap();
                if loc.is_defined && defined {
                    return false;
                }
                if !loc.is_defined && defined {
                    *loc = location;
                    return true;
                }
                if !loc.is_defined {
                    *loc = location;
                }
                true
            }
        }
    }

    pub(crate) fn add_label_to_table(&mut self, name: &str, defined: bool) -> bool {
        let location = self.file_location_here(defined);
        let func = self.curr_func().expect("label outside of function");
        match func.label_table.get_mut(name) {
            None => {
                func.label_table.insert(
                    name.to_string(),
                    Label {
                        name: name.to_string(),
                        file_location: Some(location),
                    },
                );
                true
            }
            Some(label) => {
                let loc = label.file_location.as_mut().unwrap();
                if loc.is_defined && defined {
                    return false;
                }
                if !loc.is_defined && defined {
                    *loc = location;
                    return true;
                }
                if !loc.is_defined {
                    *loc = location;
                }
                true
            }
        }
    }

    pub(crate) fn curr_func(&mut self) -> Option<&mut Function> {
        if self.pending_func.is_some() {
            return self.pending_func.as_mut();
        }
        match &self.curr_func {
            Some(key) => self.program.function_table.get_mut(key),
            None => None,
        }
    }

    pub(crate) fn curr_record(&mut self) -> Option<&mut Record> {
        match &self.curr_record {
            Some(key) => self.program.record_table.get_mut(key),
            None => None,
        }
    }

    // ------------------------------------------------------------------
    // directives
    // ------------------------------------------------------------------

    fn parse_as_language(&mut self, is_lang_parsed: &mut bool, is_first_statement: bool) {
        if *is_lang_parsed {
            let err = self.get_error("Multiple .language directives", ErrorKind::MultipleDirectives);
            self.context.set_err(err);
            return;
        }

        if !is_first_statement {
            let err = self.get_error(
                ".language directive must be specified before any other declarations",
                ErrorKind::IncorrectDirectiveLocation,
            );
            self.context.set_err(err);
            return;
        }

        debug!("started parsing of .language directive (line {})", self.line_stric);
        self.parse_as_language_directive();
        *is_lang_parsed = true;
    }

    fn parse_as_language_directive(&mut self) {
        self.context.advance();

        if self.context.mask() {
            let err = self.get_error_after(
                "Incorrect .language directive: Expected language",
                ErrorKind::BadDirectiveDeclaration,
            );
            self.context.set_err(err);
            return;
        }

        let lang = match Language::from_string(self.context.token()) {
            Some(lang) => lang,
            None => {
                let err = self.get_error(
                    "Incorrect .language directive: Unknown language",
                    ErrorKind::UnknownLanguage,
                );
                self.context.set_err(err);
                return;
            }
        };

        self.context.advance();

        if !self.context.mask() {
            let err = self.get_error(
                "Incorrect .language directive: Unexpected token",
                ErrorKind::BadDirectiveDeclaration,
            );
            self.context.set_err(err);
            return;
        }

        self.program.lang = lang;
    }

    fn parse_as_catchall(&mut self) {
        let is_catch = self.context.cur() == TokenKind::Keyword(Keyword::Catch);
        let directive_name = if is_catch { ".catch" } else { ".catchall" };

        if !self.func_def {
            let err = self.get_error(
                &format!("{} directive is outside a function body.", directive_name),
                ErrorKind::IncorrectDirectiveLocation,
            );
            self.context.set_err(err);
            return;
        }

        debug!(
            "started parsing of {} directive (line {})",
            directive_name, self.line_stric
        );
        self.parse_as_catch_directive();
    }

    fn parse_as_catch_directive(&mut self) {
        const CATCH_DIRECTIVE_TOKENS: usize = 8;
        const CATCHALL_DIRECTIVE_TOKENS: usize = 6;
        const CATCH_FULL_DIRECTIVE_TOKENS: usize = 10;
        const CATCHALL_FULL_DIRECTIVE_TOKENS: usize = 8;

        let is_catchall = self.context.cur() == TokenKind::Keyword(Keyword::Catchall);
        let size = self.context.tokens.len();

        if is_catchall && size != CATCHALL_DIRECTIVE_TOKENS && size != CATCHALL_FULL_DIRECTIVE_TOKENS {
            let err = self.get_error(
                "Incorrect catch block declaration. Must be in the format: .catchall \
                 <try_begin_label>, <try_end_label>, <catch_begin_label>[, <catch_end_label>]",
                ErrorKind::BadDirectiveDeclaration,
            );
            self.context.set_err(err);
            return;
        }

        if !is_catchall && size != CATCH_DIRECTIVE_TOKENS && size != CATCH_FULL_DIRECTIVE_TOKENS {
            let err = self.get_error(
                "Incorrect catch block declaration. Must be in the format: .catch \
                 <exception_record>, <try_begin_label>, <try_end_label>, <catch_begin_label>[, \
                 <catch_end_label>]",
                ErrorKind::BadDirectiveDeclaration,
            );
            self.context.set_err(err);
            return;
        }

        self.context.advance();

        if !is_catchall && !self.record_valid_name() {
            let err = self.get_error(
                "Invalid name of the exception record.",
                ErrorKind::BadRecordName,
            );
            self.context.set_err(err);
            return;
        }

        let full = (is_catchall && size == CATCHALL_FULL_DIRECTIVE_TOKENS)
            || (!is_catchall && size == CATCH_FULL_DIRECTIVE_TOKENS);

        if let Some(catch_block) = self.prepare_catch_block(is_catchall, full) {
            if let Some(func) = self.curr_func() {
                func.catch_blocks.push(catch_block);
            }
        }
    }

    fn prepare_catch_block(&mut self, is_catchall: bool, full: bool) -> Option<CatchBlock> {
        let mut catch_block = CatchBlock {
            whole_line: self.context.tokens[0].whole_line.to_string(),
            ..Default::default()
        };

        let label_count = if full { 4 } else { 3 };
        let label_names = ["try block begin", "try block end", "catch block begin", "catch block end"];
        let mut labels: Vec<String> = Vec::new();

        if !is_catchall {
            catch_block.exception_record = self.context.token().to_string();
            self.context.advance();
        }

        let mut skip_comma = is_catchall;
        for name in label_names.iter().take(label_count) {
            if !skip_comma {
                if self.context.cur() != TokenKind::DelComma {
                    let err = self.get_error("Expected comma.", ErrorKind::BadDirectiveDeclaration);
                    self.context.set_err(err);
                    return None;
                }
                self.context.advance();
            }
            skip_comma = false;

            if !self.label_valid_name() {
                let err = self.get_error(
                    &format!("Invalid name of the {} label.", name),
                    ErrorKind::BadLabel,
                );
                self.context.set_err(err);
                return None;
            }
            let label = self.context.token().to_string();
            self.add_label_to_table(&label, false);
            labels.push(label);
            self.context.advance();
        }

        catch_block.try_begin_label = labels[0].clone();
        catch_block.try_end_label = labels[1].clone();
        catch_block.catch_begin_label = labels[2].clone();
        catch_block.catch_end_label = if full { labels[3].clone() } else { labels[2].clone() };

        Some(catch_block)
    }

    // ------------------------------------------------------------------
    // records
    // ------------------------------------------------------------------

    fn parse_as_record(&mut self) {
        debug!("started parsing of record (line {})", self.line_stric);
        self.func_def = false;
        self.record_def = true;

        if !self.open {
            self.context.advance();
        } else {
            let err = self.get_error(
                "No record can be defined inside another record.",
                ErrorKind::BadDefinition,
            );
            self.context.set_err(err);
            return;
        }

        if !self.parse_record_full_sign() {
            return;
        }

        if !self.parse_meta_def(MetaTarget::Record) {
            return;
        }

        if !self.open && self.context.cur() == TokenKind::DelBraceL && !self.context.mask() {
            let begin = self.current_position(false);
            if let Some(rec) = self.curr_record() {
                rec.body_location.begin = begin;
            }
            self.context.advance();
            self.open = true;
        }

        if self.open && !self.context.mask() && self.context.cur() != TokenKind::DelBraceR {
            self.parse_record_fields();
        } else if self.open {
            if let Some(rec) = self.curr_record() {
                rec.body_presence = true;
            }
        }

        if self.open && !self.context.mask() && self.context.cur() == TokenKind::DelBraceR {
            let end = self.current_position(true);
            if let Some(rec) = self.curr_record() {
                rec.body_location.end = end;
            }
            self.context.advance();
            self.open = false;
        }
    }

    fn parse_record_full_sign(&mut self) -> bool {
        self.parse_record_name()
    }

    fn parse_record_name(&mut self) -> bool {
        if !self.record_valid_name() {
            let err = if self.context.cur() == TokenKind::DelBracketL {
                self.get_error("No record name.", ErrorKind::BadRecordName)
            } else {
                self.get_error("Invalid name of the record.", ErrorKind::BadRecordName)
            };
            self.context.set_err(err);
            return false;
        }

        let name = self.context.token().to_string();
        if !self.add_record_to_table(&name, true) {
            let err = self.get_error("This record already exists.", ErrorKind::BadIdRecord);
            self.context.set_err(err);
            return false;
        }
        self.curr_record = Some(name);

        debug!("record name found (line {})", self.line_stric);
        self.context.advance();
        true
    }

    fn parse_record_fields(&mut self) {
        if !self.open && self.context.cur() == TokenKind::DelBraceL {
            let begin = self.current_position(false);
            if let Some(rec) = self.curr_record() {
                rec.body_location.begin = begin;
            }
            self.open = true;
            self.context.advance();
        }

        if let Some(rec) = self.curr_record() {
            rec.body_presence = true;
        }

        if !self.open {
            let err = self.get_error("Expected keyword.", ErrorKind::BadKeyword);
            self.context.set_err(err);
            return;
        }

        if self.context.mask() {
            return;
        }

        if self.context.cur() == TokenKind::DelBraceR {
            let end = self.current_position(true);
            if let Some(rec) = self.curr_record() {
                rec.body_location.end = end;
            }
            self.context.advance();
            self.open = false;
            return;
        }

        let line_of_def = self.line_stric;
        if let Some(rec) = self.curr_record() {
            let lang = rec.language;
            let mut fld = Field::new(lang);
            fld.line_of_def = line_of_def;
            rec.field_list.push(fld);
        }

        debug!("parse line {} as field", self.line_stric);
        self.parse_record_field();
    }

    fn parse_record_field(&mut self) {
        if !self.parse_field_type() {
            return;
        }

        if self.context.mask() {
            let err = self.get_error_after("Expected field name.", ErrorKind::BadFieldMissingName);
            self.context.set_err(err);
            return;
        }

        if !self.parse_field_name() {
            return;
        }

        if self.open && self.context.cur() == TokenKind::DelBraceR && !self.context.mask() {
            let end = self.current_position(true);
            if let Some(rec) = self.curr_record() {
                rec.body_location.end = end;
            }
            self.context.advance();
            self.open = false;
            return;
        }

        if !self.parse_meta_def(MetaTarget::Field) {
            return;
        }

        if self.open && self.context.cur() == TokenKind::DelBraceR && !self.context.mask() {
            let end = self.current_position(true);
            if let Some(rec) = self.curr_record() {
                rec.body_location.end = end;
            }
            self.context.advance();
            self.open = false;
        }
    }

    fn parse_field_type(&mut self) -> bool {
        debug!("started searching for field type (line {})", self.line_stric);

        if !self.type_valid_name() {
            let err = self.get_error("Not a correct type.", ErrorKind::BadFieldValueType);
            self.context.set_err(err);
            return false;
        }

        let type_ = match self.parse_type() {
            Some(t) => t,
            None => return false,
        };

        if let Some(rec) = self.curr_record() {
            let fld = rec.field_list.last_mut().unwrap();
            fld.type_ = type_.clone();
            fld.metadata.set_field_type(type_);
        }

        true
    }

    fn parse_field_name(&mut self) -> bool {
        if !self.prefixed_valid_name() {
            let err = self.get_error("Invalid field name.", ErrorKind::BadOperationName);
            self.context.set_err(err);
            return false;
        }

        let field_name = self.context.token().to_string();
        let bounds = (
            self.context.cur_token().bound_left,
            self.context.cur_token().bound_right,
            self.context.cur_token().whole_line.to_string(),
        );
        let line = self.line_stric;

        let mut duplicate = false;
        if let Some(rec) = self.curr_record() {
            // the field under construction is the last entry; search earlier ones
            let last = rec.field_list.len() - 1;
            if let Some(pos) = rec.field_list[..last].iter().position(|f| f.name == field_name) {
                if rec.field_list[pos].is_defined {
                    duplicate = true;
                } else {
                    rec.field_list.remove(pos);
                }
            }

            if !duplicate {
                let fld = rec.field_list.last_mut().unwrap();
                fld.name = field_name;
                fld.bound_left = bounds.0;
                fld.bound_right = bounds.1;
                fld.whole_line = bounds.2;
                fld.line_of_def = line;
                fld.is_defined = true;
            }
        }

        if duplicate {
            let err = self.get_error(
                "Repeated field names in the same record.",
                ErrorKind::RepeatingFieldName,
            );
            self.context.set_err(err);
            return false;
        }

        self.context.advance();
        true
    }

    // ------------------------------------------------------------------
    // functions
    // ------------------------------------------------------------------

    fn parse_as_function(&mut self) {
        debug!("started parsing of function (line {})", self.line_stric);
        self.record_def = false;
        self.func_def = true;

        if !self.open {
            self.context.advance();
        } else {
            let err = self.get_error(
                "No one function can be defined inside another function.",
                ErrorKind::BadDefinition,
            );
            self.context.set_err(err);
            return;
        }

        if !self.parse_function_full_sign() {
            return;
        }

        if !self.parse_meta_def(MetaTarget::Function) {
            return;
        }

        if !self.open && self.context.cur() == TokenKind::DelBraceL && !self.context.mask() {
            let begin = self.current_position(false);
            if let Some(func) = self.curr_func() {
                func.body_location.begin = begin;
            }
            self.context.advance();
            self.open = true;
        }

        if self.open && !self.context.mask() && self.context.cur() != TokenKind::DelBraceR {
            self.parse_function_code();
        } else if self.open {
            if let Some(func) = self.curr_func() {
                func.body_presence = true;
            }
        }

        if self.open && !self.context.mask() && self.context.cur() == TokenKind::DelBraceR {
            let end = self.current_position(true);
            if let Some(func) = self.curr_func() {
                func.body_location.end = end;
            }
            self.context.advance();
            self.open = false;
        }
    }

    fn parse_function_full_sign(&mut self) -> bool {
        if !self.parse_function_return() {
            return false;
        }

        if !self.parse_function_name() {
            return false;
        }

        if self.context.cur() == TokenKind::DelBracketL && !self.context.mask() {
            self.context.advance();

            if !self.parse_function_args() {
                return false;
            }

            if self.context.cur() == TokenKind::DelBracketR && !self.context.mask() {
                self.context.advance();
                return self.finalize_function_signature();
            }
            let err = self.get_error("Expected ')'.", ErrorKind::BadArgsBound);
            self.context.set_err(err);
        } else {
            let err = self.get_error("Expected '('.", ErrorKind::BadArgsBound);
            self.context.set_err(err);
        }

        false
    }

    fn parse_function_return(&mut self) -> bool {
        debug!("started searching for return value (line {})", self.line_stric);

        if !self.type_valid_name() {
            let err = if self.context.cur() == TokenKind::DelBracketL {
                self.get_error("No return type.", ErrorKind::BadFunctionReturnValue)
            } else {
                self.get_error("Invalid return type.", ErrorKind::BadFunctionReturnValue)
            };
            self.context.set_err(err);
            return false;
        }

        match self.parse_type() {
            Some(t) => {
                self.curr_func_return_type = t;
                true
            }
            None => false,
        }
    }

    fn parse_function_name(&mut self) -> bool {
        if !self.function_valid_name() {
            let err = if self.context.cur() == TokenKind::DelBracketL {
                self.get_error("No function name.", ErrorKind::BadFunctionName)
            } else {
                self.get_error("Invalid name of the function.", ErrorKind::BadFunctionName)
            };
            self.context.set_err(err);
            return false;
        }

        let name = self.context.token().to_string();
        let location = self.file_location_here(true);
        let mut func = Function::with_location(name, self.program.lang, location);
        func.return_type = self.curr_func_return_type.clone();
        self.pending_func = Some(func);

        debug!("function name found (line {})", self.line_stric);
        self.context.advance();
        true
    }

    /// Mangles the finished signature and moves the pending function into
    /// the function table under its mangled key.
    fn finalize_function_signature(&mut self) -> bool {
        let func = self.pending_func.take().unwrap();
        let mangled = mangle_function_name(&func.name, &func.params, &func.return_type);

        if let Some(existing) = self.program.function_table.get(&mangled) {
            if existing.file_location.as_ref().map(|l| l.is_defined).unwrap_or(false) {
                let err = self.get_error("This function already exists.", ErrorKind::BadIdFunction);
                self.context.set_err(err);
                return false;
            }
        }

        self.function_arguments_lists.entry(mangled.clone()).or_default();
        self.program.function_table.insert(mangled.clone(), func);
        self.curr_func = Some(mangled);
        true
    }

    fn parse_function_args(&mut self) -> bool {
        debug!("started searching for parameters (line {})", self.line_stric);

        let mut comma = false;

        loop {
            if self.context.mask() {
                return false;
            }

            if self.context.cur() != TokenKind::DelComma && self.context.cur() != TokenKind::Id {
                break;
            }

            if !self.parse_function_arg_comma(&mut comma) {
                return false;
            }

            if !self.parse_function_arg() {
                return false;
            }
        }

        true
    }

    fn parse_function_arg_comma(&mut self, comma: &mut bool) -> bool {
        if *comma && self.context.cur() != TokenKind::DelComma {
            let err = self.get_error("Expected comma.", ErrorKind::BadNumberOperands);
            self.context.set_err(err);
            return false;
        }

        if *comma {
            self.context.advance();
        }

        *comma = true;
        true
    }

    fn parse_function_arg(&mut self) -> bool {
        if self.context.cur() != TokenKind::Id {
            let err = self.get_error("Expected identifier.", ErrorKind::BadFunctionParameters);
            self.context.set_err(err);
            return false;
        }

        if !self.type_valid_name() {
            let err = self.get_error("Invalid parameter type.", ErrorKind::BadType);
            self.context.set_err(err);
            return false;
        }

        let type_ = match self.parse_type() {
            Some(t) => t,
            None => return false,
        };

        if self.context.mask() {
            return false;
        }

        if self.context.cur() != TokenKind::Id {
            let err = self.get_error("Expected identifier.", ErrorKind::BadFunctionParameters);
            self.context.set_err(err);
            return false;
        }

        let params_so_far = self.pending_func.as_ref().map(|f| f.params.len()).unwrap_or(0);
        if !self.context.validate_parameter_name(params_so_far) {
            let err = self.get_error("Invalid parameter name.", ErrorKind::BadParamName);
            self.context.set_err(err);
            return false;
        }

        self.context.advance();

        let lang = self.program.lang;
        self.pending_param = Some(Parameter::new(type_, lang));

        if self.context.cur() == TokenKind::DelLt && !self.context.mask() {
            if !self.parse_meta_def(MetaTarget::Param) {
                self.pending_param = None;
                return false;
            }
        }

        let param = self.pending_param.take().unwrap();
        if let Some(func) = self.pending_func.as_mut() {
            func.params.push(param);
        }

        true
    }

    // ------------------------------------------------------------------
    // types
    // ------------------------------------------------------------------

    /// Consumes `<component> ('[' ']')*` from the token stream. Array types
    /// are interned in the program.
    pub(crate) fn parse_type(&mut self) -> Option<Type> {
        let component_name = self.context.token().to_string();
        let mut rank = 0;

        self.context.advance();

        while self.context.cur() == TokenKind::DelSquareBracketL && !self.context.mask() {
            self.context.advance();
            if self.context.cur() != TokenKind::DelSquareBracketR || self.context.mask() {
                let err = self.get_error("Expected ']'.", ErrorKind::BadArrayTypeBound);
                self.context.set_err(err);
                return None;
            }
            self.context.advance();
            rank += 1;
        }

        let type_ = Type::new(component_name, rank);
        if type_.is_array() {
            self.program.array_types.insert(type_.clone());
        }

        Some(type_)
    }

    // ------------------------------------------------------------------
    // function bodies
    // ------------------------------------------------------------------

    fn parse_as_brace_right(&mut self) {
        if !self.open {
            let err = self.get_error(
                "Delimiter '}' for the code area is outside a function.",
                ErrorKind::BadBound,
            );
            self.context.set_err(err);
            return;
        }

        debug!("body is closed (line {})", self.line_stric);

        self.open = false;
        let end = self.current_position(true);
        if self.func_def {
            if let Some(func) = self.curr_func() {
                func.body_location.end = end;
            }
        } else if self.record_def {
            if let Some(rec) = self.curr_record() {
                rec.body_location.end = end;
            }
        }
        self.context.advance();
    }

    fn parse_function_code(&mut self) {
        if !self.open && self.context.cur() == TokenKind::DelBraceL {
            self.open = true;
            let begin = self.current_position(false);
            if let Some(func) = self.curr_func() {
                func.body_location.begin = begin;
            }
            self.context.advance();
        }

        if let Some(func) = self.curr_func() {
            func.body_presence = true;
        }

        if !self.open {
            let err = self.get_error("Expected keyword.", ErrorKind::BadKeyword);
            self.context.set_err(err);
            return;
        }

        // a line may carry several instructions and labels before the body
        // closes
        while !self.context.mask() && !self.context.has_err() {
            if self.context.cur() == TokenKind::DelBraceR {
                let end = self.current_position(true);
                if let Some(func) = self.curr_func() {
                    func.body_location.end = end;
                }
                self.context.advance();
                self.open = false;
                return;
            }

            if let Some(func) = self.curr_func() {
                func.ins.push(Ins::default());
            }

            debug!(
                "parse instruction on line {} ([label:] operation [operand,])",
                self.line_stric
            );
            if !self.parse_function_instruction() {
                return;
            }
        }
    }

    fn parse_function_instruction(&mut self) -> bool {
        if !self.parse_label() {
            return false;
        }

        if !self.parse_operation() {
            // a label-only instruction, the closing brace, or a real error
            return !self.context.has_err();
        }

        self.parse_operands()
    }

    fn parse_label(&mut self) -> bool {
        debug!("started searching for label (line {})", self.line_stric);

        if self.context.next_kind() == TokenKind::DelColon && !self.context.next_mask() {
            if self.label_valid_name() {
                let name = self.context.token().to_string();
                if self.add_label_to_table(&name, true) {
                    let ins_idx = {
                        let func = self.curr_func().unwrap();
                        func.ins.len() - 1
                    };
                    if let Some(func) = self.curr_func() {
                        func.ins[ins_idx].set_label = true;
                        func.ins[ins_idx].label = Some(name);
                    }
                    debug!("label detected (line {})", self.line_stric);
                    self.context.advance();
                    self.context.advance();
                    return true;
                }

                let err = self.get_error("This label already exists.", ErrorKind::BadLabelExt);
                self.context.set_err(err);
            } else {
                let err = self.get_error(
                    "Invalid name of label. Label can only contain characters: '_', '0' - '9', \
                     'a' - 'z', 'A' - 'Z'; and starts with any letter or with '_'.",
                    ErrorKind::BadLabel,
                );
                self.context.set_err(err);
            }

            return false;
        }

        debug!("label is not detected (line {})", self.line_stric);
        true
    }

    fn parse_operation(&mut self) -> bool {
        if self.context.mask() {
            return false;
        }

        if self.open && self.context.cur() == TokenKind::DelBraceR {
            return false;
        }

        // a second label on the same line closes the current (label-only)
        // instruction
        if self.context.next_kind() == TokenKind::DelColon && !self.context.next_mask() {
            return false;
        }

        debug!("started searching for operation (line {})", self.line_stric);

        if let TokenKind::Operation(opcode) = self.context.cur() {
            self.set_operation_information();
            self.context.up_sign_operation();
            if let Some(func) = self.curr_func() {
                func.ins.last_mut().unwrap().opcode = Some(opcode);
            }
            debug!("operation is detected (line {})", self.line_stric);
            self.context.advance();
            return true;
        }

        let err = self.get_error("Invalid operation name.", ErrorKind::BadOperationName);
        self.context.set_err(err);
        false
    }

    fn set_operation_information(&mut self) {
        let line = self.line_stric;
        let token = self.context.cur_token();
        let debug = crate::program::debuginfo::InsDebug {
            line_number: line,
            bound_left: token.bound_left,
            bound_right: token.bound_right,
            whole_line: token.whole_line.to_string(),
        };
        let ins_number = {
            let func = self.curr_func().unwrap();
            func.ins.len()
        };
        self.context.ins_number = ins_number;
        if let Some(func) = self.curr_func() {
            func.ins.last_mut().unwrap().ins_debug = debug;
        }
    }

    // ------------------------------------------------------------------
    // line and end-of-input bookkeeping
    // ------------------------------------------------------------------

    fn parse_after_line(&mut self, is_first_statement: &mut bool) -> bool {
        self.set_error();

        if !self.context.mask() && self.err.is_none() {
            let err = self.get_error("There should be nothing after.", ErrorKind::BadEnd);
            self.context.set_err(err);
            self.set_error();
        }

        if self.has_error() {
            debug!("processing aborted (error detected)");
            return false;
        }

        debug!("parsing of line {} is successful", self.line_stric);
        *is_first_statement = false;
        true
    }

    fn parse_after_main_loop(mut self, file_name: &str) -> Result<(Program, ErrorList), Error> {
        self.parse_reset_function_labels_and_params();

        if self.open && self.err.is_none() {
            let (line, name) = match self.curr_func.as_ref() {
                Some(key) => {
                    let func = &self.program.function_table[key];
                    (
                        func.file_location.as_ref().map(|l| l.line_number).unwrap_or(0),
                        func.name.clone(),
                    )
                }
                None => (self.line_stric, String::new()),
            };
            self.err = Some(Error::new(
                "Code area is not closed.",
                line,
                ErrorKind::BadClose,
                "",
                0,
                name.len(),
                name,
            ));
        }

        self.resolve_call_ids();
        self.parse_reset_tables();

        if let Some(err) = self.err {
            return Err(err);
        }

        for func in self.program.function_table.values_mut() {
            if func.metadata.has_implementation() {
                func.source_file = file_name.to_string();
            }
        }

        for rec in self.program.record_table.values_mut() {
            if rec.has_implementation() {
                rec.source_file = file_name.to_string();
            }
        }

        Ok((self.program, self.warnings))
    }

    fn parse_reset_function_labels_and_params(&mut self) {
        if self.open || self.err.is_some() {
            return;
        }

        for func in self.program.function_table.values() {
            let mut undefined: Vec<&Label> = func
                .label_table
                .values()
                .filter(|l| !l.file_location.as_ref().unwrap().is_defined)
                .collect();
            undefined.sort_by_key(|l| {
                let loc = l.file_location.as_ref().unwrap();
                (loc.line_number, loc.bound_left)
            });
            if let Some(label) = undefined.first() {
                let loc = label.file_location.as_ref().unwrap();
                self.err = Some(Error::new(
                    "This label does not exist.",
                    loc.line_number,
                    ErrorKind::BadLabelExt,
                    "",
                    loc.bound_left,
                    loc.bound_right,
                    loc.whole_line.clone(),
                ));
                return;
            }
        }

        for func in self.program.function_table.values() {
            for ins in &func.ins {
                if ins.opcode.is_some() && !ins.is_valid_to_emit() {
                    let debug = &ins.ins_debug;
                    self.err = Some(Error::new(
                        "Register width mismatch.",
                        debug.line_number,
                        ErrorKind::BadNameReg,
                        "",
                        debug.bound_left,
                        debug.bound_right,
                        debug.whole_line.clone(),
                    ));
                    return;
                }
            }
        }

        for (key, rewrites) in &self.function_arguments_lists {
            let func = match self.program.function_table.get_mut(key) {
                Some(f) => f,
                None => continue,
            };
            func.regs_num = (func.value_of_first_param + 1) as usize;

            for &(ins_number, operand_idx) in rewrites {
                if func.ins.is_empty() || func.ins.len() < ins_number {
                    continue;
                }
                let offset = (func.value_of_first_param + 1) as u16;
                let ins = &mut func.ins[ins_number - 1];
                if ins.regs.is_empty() {
                    continue;
                }
                ins.regs[operand_idx] += offset;

                let max_reg_number = 1usize << ins.max_reg_encoding_width();
                if ins.regs[operand_idx] as usize >= max_reg_number {
                    let debug = &ins.ins_debug;
                    self.err = Some(Error::new(
                        "Register width mismatch.",
                        debug.line_number,
                        ErrorKind::BadNameReg,
                        "",
                        debug.bound_left,
                        debug.bound_right,
                        debug.whole_line.clone(),
                    ));
                    return;
                }
            }
        }
    }

    /// Rewrites call-site function ids to the mangled keys they resolve to.
    /// A call id matches either a mangled key directly or the demangled name
    /// of exactly one table entry.
    fn resolve_call_ids(&mut self) {
        if self.err.is_some() {
            return;
        }

        let keys: Vec<String> = self.program.function_table.keys().cloned().collect();
        let mut failures: Vec<(String, crate::program::debuginfo::InsDebug)> = Vec::new();

        for func in self.program.function_table.values_mut() {
            for ins in func.ins.iter_mut() {
                if !ins.is_call() || ins.is_pseudo_call() || ins.ids.is_empty() {
                    continue;
                }
                let id = ins.ids[0].clone();
                if self_contains(&keys, &id) {
                    continue;
                }
                match keys.iter().find(|k| demangle_name(k) == id) {
                    Some(key) => ins.ids[0] = key.clone(),
                    None => failures.push((id, ins.ins_debug.clone())),
                }
            }
        }

        if let Some((_, debug)) = failures.first() {
            self.err = Some(Error::new(
                "This function does not exist.",
                debug.line_number,
                ErrorKind::BadIdFunction,
                "",
                debug.bound_left,
                debug.bound_right,
                debug.whole_line.clone(),
            ));
        }
    }

    fn parse_reset_tables(&mut self) {
        if self.err.is_some() {
            return;
        }

        self.parse_reset_function_table();

        if self.err.is_some() {
            return;
        }

        self.parse_reset_record_table();
    }

    fn parse_reset_function_table(&mut self) {
        for func in self.program.function_table.values() {
            let loc = func.file_location.as_ref().unwrap();
            if !loc.is_defined {
                self.err = Some(Error::new(
                    "This function does not exist.",
                    loc.line_number,
                    ErrorKind::BadIdFunction,
                    "",
                    loc.bound_left,
                    loc.bound_right,
                    loc.whole_line.clone(),
                ));
                return;
            }

            if func.has_implementation() != func.body_presence {
                self.err = Some(Error::new(
                    "Inconsistent definition of the function and its metadata.",
                    loc.line_number,
                    ErrorKind::BadDefinitionFunction,
                    "",
                    loc.bound_left,
                    loc.bound_right,
                    loc.whole_line.clone(),
                ));
                return;
            }

            for ins in &func.ins {
                if !ins.is_call() || ins.is_pseudo_call() || ins.ids.is_empty() {
                    continue;
                }

                let is_initobj = ins.has_flag(InstFlags::METHOD_ID)
                    && matches!(
                        ins.opcode,
                        Some(crate::isa::Opcode::Initobj)
                            | Some(crate::isa::Opcode::InitobjShort)
                            | Some(crate::isa::Opcode::InitobjRange)
                    );
                let diff = if is_initobj { 0 } else { 1 };

                let callee = match self.program.function_table.get(&ins.ids[0]) {
                    Some(f) => f,
                    None => continue,
                };
                if ins.operand_list_length() - diff < callee.params_num() {
                    let debug = &ins.ins_debug;
                    self.err = Some(Error::new(
                        "Function argument mismatch.",
                        debug.line_number,
                        ErrorKind::FunctionArgumentMismatch,
                        "",
                        debug.bound_left,
                        debug.bound_right,
                        debug.whole_line.clone(),
                    ));
                    return;
                }
            }
        }
    }

    fn parse_reset_record_table(&mut self) {
        for rec in self.program.record_table.values() {
            let loc = rec.file_location.as_ref().unwrap();
            if !loc.is_defined {
                self.err = Some(Error::new(
                    "This record does not exist.",
                    loc.line_number,
                    ErrorKind::BadIdRecord,
                    "",
                    loc.bound_left,
                    loc.bound_right,
                    loc.whole_line.clone(),
                ));
                return;
            }

            if rec.has_implementation() != rec.body_presence {
                self.err = Some(Error::new(
                    "Inconsistency of the definition of the record and its metadata.",
                    loc.line_number,
                    ErrorKind::BadDefinitionRecord,
                    "",
                    loc.bound_left,
                    loc.bound_right,
                    loc.whole_line.clone(),
                ));
                return;
            }

            for fld in &rec.field_list {
                if !fld.is_defined {
                    self.err = Some(Error::new(
                        "This field does not exist.",
                        fld.line_of_def,
                        ErrorKind::BadIdField,
                        "",
                        fld.bound_left,
                        fld.bound_right,
                        fld.whole_line.clone(),
                    ));
                    return;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // metadata lists
    // ------------------------------------------------------------------

    pub(crate) fn parse_meta_def(&mut self, target: MetaTarget) -> bool {
        debug!("started searching for metadata (line {})", self.line_stric);

        if self.context.mask() {
            return true;
        }

        let mut flag = false;
        if self.context.cur() == TokenKind::DelLt {
            flag = true;
            self.context.advance();
        }

        if !self.parse_meta_list(flag, target) {
            return false;
        }

        if !flag && self.context.cur() == TokenKind::DelGt && !self.context.mask() {
            let err = self.get_error("Expected '<'.", ErrorKind::BadMetadataBound);
            self.context.set_err(err);
            self.context.advance();
            return false;
        }

        if flag && !self.context.has_err() {
            self.context.advance();
        }

        true
    }

    fn parse_meta_list(&mut self, flag: bool, target: MetaTarget) -> bool {
        if !flag
            && !self.context.mask()
            && self.context.cur() != TokenKind::DelGt
            && self.context.cur() != TokenKind::DelBraceL
        {
            let err = self.get_error("No meta data expected.", ErrorKind::BadDefinitionMetadata);
            self.context.set_err(err);
            return false;
        }

        let mut comma = false;
        let mut eq = false;
        let mut attribute_name = String::new();

        loop {
            if self.context.mask() {
                if flag {
                    let err = self.get_error_after("Expected '>'.", ErrorKind::BadMetadataBound);
                    self.context.set_err(err);
                    return false;
                }
                break;
            }

            match self.context.cur() {
                TokenKind::DelComma | TokenKind::Id | TokenKind::IdString | TokenKind::DelEq => {}
                _ => break,
            }

            if !self.parse_meta_list_comma(&mut comma, eq) {
                return false;
            }

            if !self.meet_exp_meta_list(eq) {
                return false;
            }

            if !self.build_meta_list_attr(&mut eq, &mut attribute_name, target) {
                return false;
            }
        }

        if flag && self.context.cur() != TokenKind::DelGt {
            let err = self.get_error("Expected '>'.", ErrorKind::BadMetadataBound);
            self.context.set_err(err);
            self.context.advance();
            return false;
        }

        if let Some(meta_err) = self.apply_meta_validate(target) {
            self.set_metadata_context_error(meta_err, false);
            return false;
        }

        true
    }

    fn parse_meta_list_comma(&mut self, comma: &mut bool, eq: bool) -> bool {
        if !eq && *comma && self.context.cur() != TokenKind::DelComma {
            let err = self.get_error("Expected comma.", ErrorKind::BadNumberOperands);
            self.context.set_err(err);
            return false;
        }

        if !eq && *comma {
            self.context.advance();
        }

        *comma = true;
        true
    }

    fn meet_exp_meta_list(&mut self, eq: bool) -> bool {
        if !eq && self.context.cur() != TokenKind::Id {
            let err = self.get_error_after("Expected identifier.", ErrorKind::BadDefinitionMetadata);
            self.context.set_err(err);
            return false;
        }

        if eq && self.context.cur() != TokenKind::Id && self.context.cur() != TokenKind::IdString {
            let err = self.get_error_after(
                "Expected identifier or string literal.",
                ErrorKind::BadDefinitionMetadata,
            );
            self.context.set_err(err);
            return false;
        }

        if !eq && !self.prefixed_valid_name() {
            let err = self.get_error("Invalid attribute name.", ErrorKind::BadNameId);
            self.context.set_err(err);
            return false;
        }

        true
    }

    fn build_meta_list_attr(
        &mut self,
        eq: &mut bool,
        attribute_name: &mut String,
        target: MetaTarget,
    ) -> bool {
        let mut attribute_value = String::new();

        if *eq && self.context.cur() == TokenKind::IdString {
            match self.parse_string_literal() {
                Some(v) => attribute_value = v,
                None => return false,
            }
        } else if *eq {
            attribute_value = self.context.token().to_string();
        } else {
            *attribute_name = self.context.token().to_string();
        }

        self.context.advance();

        if self.context.mask() {
            // line ended in the middle of the list; the caller reports the
            // missing '>'
            if *eq {
                let has_value = true;
                if let Some(meta_err) =
                    self.apply_meta_attribute(target, attribute_name, Some(&attribute_value))
                {
                    self.set_metadata_context_error(meta_err, has_value);
                }
                *eq = false;
                return !self.context.has_err();
            }
            if let Some(meta_err) = self.apply_meta_attribute(target, attribute_name, None) {
                self.set_metadata_context_error(meta_err, false);
                return false;
            }
            return true;
        }

        if self.context.cur() == TokenKind::DelEq {
            if *eq {
                let err = self.get_error("Unexpected '='.", ErrorKind::BadNoExpDelim);
                self.context.set_err(err);
                return false;
            }

            self.context.advance();
            *eq = true;
        } else {
            let has_value = *eq;
            let res = if has_value {
                self.apply_meta_attribute(target, attribute_name, Some(&attribute_value))
            } else {
                self.apply_meta_attribute(target, attribute_name, None)
            };

            *eq = false;

            if let Some(meta_err) = res {
                self.set_metadata_context_error(meta_err, has_value);
                return false;
            }
        }

        true
    }

    fn apply_meta_attribute(
        &mut self,
        target: MetaTarget,
        attribute: &str,
        value: Option<&str>,
    ) -> Option<MetaError> {
        match target {
            MetaTarget::Record => {
                let rec = self.curr_record()?;
                match value {
                    Some(v) => rec.metadata.set_attribute_value(attribute, v),
                    None => rec.metadata.set_attribute(attribute),
                }
            }
            MetaTarget::Field => {
                let rec = self.curr_record()?;
                let fld = rec.field_list.last_mut()?;
                match value {
                    Some(v) => fld.metadata.set_attribute_value(attribute, v),
                    None => fld.metadata.set_attribute(attribute),
                }
            }
            MetaTarget::Function => {
                let func = self.curr_func()?;
                match value {
                    Some(v) => func.metadata.set_attribute_value(attribute, v),
                    None => func.metadata.set_attribute(attribute),
                }
            }
            MetaTarget::Param => {
                let param = self.pending_param.as_mut()?;
                match value {
                    Some(v) => param.metadata.set_attribute_value(attribute, v),
                    None => param.metadata.set_attribute(attribute),
                }
            }
        }
    }

    fn apply_meta_validate(&mut self, target: MetaTarget) -> Option<MetaError> {
        match target {
            MetaTarget::Record => self.curr_record()?.metadata.validate_data(),
            MetaTarget::Field => {
                let rec = self.curr_record()?;
                rec.field_list.last_mut()?.metadata.validate_data()
            }
            MetaTarget::Function => self.curr_func()?.metadata.validate_data(),
            MetaTarget::Param => self.pending_param.as_mut()?.metadata.validate_data(),
        }
    }

    fn set_metadata_context_error(&mut self, err: MetaError, _has_value: bool) {
        let kind = match err.kind {
            MetaErrorKind::UnknownAttribute => ErrorKind::BadMetadataUnknownAttribute,
            MetaErrorKind::MissingAttribute => ErrorKind::BadMetadataMissingAttribute,
            MetaErrorKind::MissingValue => ErrorKind::BadMetadataMissingValue,
            MetaErrorKind::UnexpectedAttribute => ErrorKind::BadMetadataUnexpectedAttribute,
            MetaErrorKind::UnexpectedValue => ErrorKind::BadMetadataUnexpectedValue,
            MetaErrorKind::InvalidValue => ErrorKind::BadMetadataInvalidValue,
            MetaErrorKind::MultipleAttribute => ErrorKind::BadMetadataMultipleAttribute,
        };
        let error = self.get_error(&err.message, kind);
        self.context.set_err(error);
    }
}

fn self_contains(keys: &[String], id: &str) -> bool {
    keys.iter().any(|k| k == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Opcode;
    use crate::program::Imm;

    fn parse_ok(source: &str) -> Program {
        let (program, _warnings) = Parser::parse_source(source, "test.pa").unwrap();
        program
    }

    fn parse_err(source: &str) -> Error {
        Parser::parse_source(source, "test.pa").unwrap_err()
    }

    #[test]
    fn test_record_with_field() {
        let program = parse_ok(".record R { i32 x }");
        let rec = &program.record_table["R"];
        assert_eq!(rec.field_list.len(), 1);
        assert_eq!(rec.field_list[0].name, "x");
        assert_eq!(rec.field_list[0].type_.name(), "i32");
        assert!(rec.body_presence);
        assert_eq!(rec.source_file, "test.pa");
    }

    #[test]
    fn test_record_multi_line() {
        let program = parse_ok(".record R {\n  i32 x\n  f64 y\n}");
        let rec = &program.record_table["R"];
        assert_eq!(rec.field_list.len(), 2);
        assert_eq!(rec.field_list[1].name, "y");
        assert_eq!(rec.field_list[1].type_.name(), "f64");
    }

    #[test]
    fn test_repeating_field_name() {
        let err = parse_err(".record R {\n  i32 x\n  i32 x\n}");
        assert_eq!(err.kind, ErrorKind::RepeatingFieldName);
    }

    #[test]
    fn test_record_already_exists() {
        let err = parse_err(".record R {}\n.record R {}");
        assert_eq!(err.kind, ErrorKind::BadIdRecord);
    }

    #[test]
    fn test_minimal_record_and_method() {
        let program = parse_ok(
            ".record R { i32 x }\n.function i32 R.get(R a0) { lda.obj a0 ldobj R.x return }",
        );

        let func = &program.function_table["R.get:R;i32;"];
        assert_eq!(func.name, "R.get");
        assert_eq!(func.params.len(), 1);
        assert_eq!(func.params[0].type_.name(), "R");
        assert_eq!(func.ins.len(), 3);
        assert_eq!(func.ins[0].opcode, Some(Opcode::LdaObj));
        assert_eq!(func.ins[1].opcode, Some(Opcode::Ldobj));
        assert_eq!(func.ins[1].ids, vec!["R.x".to_string()]);
        assert_eq!(func.ins[2].opcode, Some(Opcode::Return));
        assert_eq!(func.source_file, "test.pa");
    }

    #[test]
    fn test_string_interning_in_program() {
        let program = parse_ok(".function void f() { lda.str \"hi\" lda.str \"hi\" return }");
        assert_eq!(program.strings.len(), 1);
        assert!(program.strings.contains("hi"));
    }

    #[test]
    fn test_string_escapes() {
        let program = parse_ok(".function void f() { lda.str \"a\\n\\x41\\101b\" return }");
        assert!(program.strings.contains("a\nAAb"));
    }

    #[test]
    fn test_bad_hex_escape() {
        let err = parse_err(".function void f() { lda.str \"\\xZZ\" return }");
        assert_eq!(err.kind, ErrorKind::BadStringInvalidHexEscapeSequence);
    }

    #[test]
    fn test_unknown_escape() {
        let err = parse_err(".function void f() { lda.str \"\\q\" return }");
        assert_eq!(err.kind, ErrorKind::BadStringUnknownEscapeSequence);
    }

    #[test]
    fn test_catch_directive() {
        let program = parse_ok(
            ".record E {}\n\
             .function void f() {\n\
               begin: return\n\
               end:\n\
               handler: return\n\
               handler_end:\n\
             }\n\
             .catch E, begin, end, handler, handler_end",
        );

        let func = &program.function_table["f:void;"];
        assert_eq!(func.catch_blocks.len(), 1);
        let cb = &func.catch_blocks[0];
        assert_eq!(cb.exception_record, "E");
        assert_eq!(cb.try_begin_label, "begin");
        assert_eq!(cb.try_end_label, "end");
        assert_eq!(cb.catch_begin_label, "handler");
        assert_eq!(cb.catch_end_label, "handler_end");
    }

    #[test]
    fn test_catchall_without_catch_end() {
        let program = parse_ok(
            ".function void f() {\n  b: return e: h: return\n}\n.catchall b, e, h",
        );

        let func = &program.function_table["f:void;"];
        let cb = &func.catch_blocks[0];
        assert_eq!(cb.exception_record, "");
        assert_eq!(cb.catch_begin_label, "h");
        assert_eq!(cb.catch_end_label, "h");
    }

    #[test]
    fn test_catch_outside_function() {
        let err = parse_err(".catch E, a, b, c");
        assert_eq!(err.kind, ErrorKind::IncorrectDirectiveLocation);
    }

    #[test]
    fn test_parameter_renumbering() {
        let program = parse_ok(
            ".function void f(i32 a0, i32 a1) {\n\
               start:\n\
               mov v0, a0\n\
               mov v1, a1\n\
               return\n\
             }",
        );

        let func = &program.function_table["f:i32;i32;void;"];
        assert_eq!(func.regs_num, 2);
        assert_eq!(func.value_of_first_param, 1);
        // a0 -> 2, a1 -> 3
        assert_eq!(func.ins[1].regs, vec![0, 2]);
        assert_eq!(func.ins[2].regs, vec![1, 3]);
    }

    #[test]
    fn test_parameter_renumbering_width_overflow() {
        // mov encodes 4-bit registers; a1 lands on register 16
        let err = parse_err(
            ".function void f(i32 a0, i32 a1) {\n\
               movi v14, 0\n\
               mov v0, a1\n\
               return\n\
             }",
        );
        assert_eq!(err.kind, ErrorKind::BadNameReg);
    }

    #[test]
    fn test_register_operand_exceeding_encoding_width() {
        // mov encodes 4-bit registers
        let err = parse_err(".function void f() { mov v16, v0\nreturn }");
        assert_eq!(err.kind, ErrorKind::BadNameReg);
    }

    #[test]
    fn test_bad_param_order() {
        let err = parse_err(".function void f(i32 a1) {}");
        assert_eq!(err.kind, ErrorKind::BadParamName);
    }

    #[test]
    fn test_undefined_label() {
        let err = parse_err(".function void f() { jmp nowhere\nreturn }");
        assert_eq!(err.kind, ErrorKind::BadLabelExt);
    }

    #[test]
    fn test_duplicate_label() {
        let err = parse_err(".function void f() { l: return l: return }");
        assert_eq!(err.kind, ErrorKind::BadLabelExt);
    }

    #[test]
    fn test_unknown_language() {
        let err = parse_err(".language Esperanto");
        assert_eq!(err.kind, ErrorKind::UnknownLanguage);
    }

    #[test]
    fn test_language_must_be_first() {
        let err = parse_err(".record R {}\n.language PandaAssembly");
        assert_eq!(err.kind, ErrorKind::IncorrectDirectiveLocation);
    }

    #[test]
    fn test_multiple_language_directives() {
        let err = parse_err(".language PandaAssembly\n.language PandaAssembly");
        // the second directive is no longer the first statement
        assert!(matches!(
            err.kind,
            ErrorKind::MultipleDirectives | ErrorKind::IncorrectDirectiveLocation
        ));
    }

    #[test]
    fn test_language_directive() {
        let program = parse_ok(".language ECMAScript");
        assert_eq!(program.lang, Language::EcmaScript);
    }

    #[test]
    fn test_nested_record_is_error() {
        let err = parse_err(".record A {\n.record B {}\n}");
        assert_eq!(err.kind, ErrorKind::BadDefinition);
    }

    #[test]
    fn test_unclosed_body() {
        let err = parse_err(".function void f() {");
        assert_eq!(err.kind, ErrorKind::BadClose);
    }

    #[test]
    fn test_brace_outside_function() {
        let err = parse_err("}");
        assert_eq!(err.kind, ErrorKind::BadBound);
    }

    #[test]
    fn test_call_to_missing_function() {
        let err = parse_err(".function void f() { call.short g\nreturn }");
        assert_eq!(err.kind, ErrorKind::BadIdFunction);
    }

    #[test]
    fn test_call_resolves_to_mangled_name() {
        let program = parse_ok(
            ".function void g(i32 a0) {\n  return\n}\n\
             .function void f() {\n  movi v0, 1\n  call.short g, v0\n  return\n}",
        );
        let f = &program.function_table["f:void;"];
        let call = f.ins.iter().find(|i| i.opcode == Some(Opcode::CallShort)).unwrap();
        assert_eq!(call.ids[0], "g:i32;void;");
    }

    #[test]
    fn test_function_argument_mismatch() {
        let err = parse_err(
            ".function void g(i32 a0, i32 a1) {\n  return\n}\n\
             .function void f() {\n  movi v0, 1\n  call.short g, v0\n  return\n}",
        );
        assert_eq!(err.kind, ErrorKind::FunctionArgumentMismatch);
    }

    #[test]
    fn test_external_function_without_body() {
        let program = parse_ok(".function void ext() <external>");
        let func = &program.function_table["ext:void;"];
        assert!(func.metadata.is_foreign());
        assert!(!func.has_implementation());
    }

    #[test]
    fn test_function_body_metadata_mismatch() {
        let err = parse_err(".function void f() <external> {\n  return\n}");
        assert_eq!(err.kind, ErrorKind::BadDefinitionFunction);
    }

    #[test]
    fn test_external_record() {
        let program = parse_ok(".record Ext <external>");
        assert!(program.record_table["Ext"].metadata.is_foreign());
    }

    #[test]
    fn test_type_operand_forward_declares_record() {
        let err = parse_err(".function void f() { lda.type Missing\nreturn }");
        assert_eq!(err.kind, ErrorKind::BadIdRecord);
    }

    #[test]
    fn test_field_operand_forward_declares_field() {
        let err = parse_err(
            ".record R {}\n.function void f() { ldobj R.nope\nreturn }",
        );
        assert_eq!(err.kind, ErrorKind::BadIdField);
    }

    #[test]
    fn test_array_type_interning() {
        let program = parse_ok(
            ".function void f() {\n  movi v0, 4\n  newarr v0, v0, i32[]\n  return\n}",
        );
        assert!(program.array_types.iter().any(|t| t.name() == "i32[]"));
    }

    #[test]
    fn test_immediates() {
        let program = parse_ok(
            ".function void f() {\n  ldai 0x10\n  ldai 0b101\n  ldai 010\n  ldai -7\n  \
             fldai.64 1.5\n  fldai.64 2e3\n  return\n}",
        );
        let func = &program.function_table["f:void;"];
        let imms: Vec<Imm> = func.ins.iter().flat_map(|i| i.imms.clone()).collect();
        assert_eq!(
            imms,
            vec![
                Imm::Int(16),
                Imm::Int(5),
                Imm::Int(8),
                Imm::Int(-7),
                Imm::Double(1.5),
                Imm::Double(2000.0)
            ]
        );
    }

    #[test]
    fn test_bad_integer() {
        let err = parse_err(".function void f() { ldai 12notanumber\nreturn }");
        assert_eq!(err.kind, ErrorKind::BadIntegerName);
    }

    #[test]
    fn test_record_metadata_annotation() {
        let program = parse_ok(
            ".record A <annotation> {}\n\
             .record R <panda.annotation.class=A, panda.annotation.element.name=x, \
             panda.annotation.element.type=i32, panda.annotation.element.value=3> {}",
        );
        let rec = &program.record_table["R"];
        let anns = rec.metadata.annotations();
        assert_eq!(anns.len(), 1);
        assert_eq!(anns[0].record_name, "A");
        assert_eq!(anns[0].elements[0].name, "x");
    }

    #[test]
    fn test_metadata_unknown_attribute() {
        let err = parse_err(".record R <frobnicate> {}");
        assert_eq!(err.kind, ErrorKind::BadMetadataUnknownAttribute);
    }

    #[test]
    fn test_metadata_missing_bound() {
        let err = parse_err(".record R <external {}");
        assert_eq!(err.kind, ErrorKind::BadMetadataBound);
    }

    #[test]
    fn test_double_eq_in_metadata() {
        let err = parse_err(".record R <extends=A=B> {}");
        assert_eq!(err.kind, ErrorKind::BadNoExpDelim);
    }

    #[test]
    fn test_trailing_garbage_after_record() {
        let err = parse_err(".record R {} garbage");
        assert_eq!(err.kind, ErrorKind::BadEnd);
    }

    #[test]
    fn test_static_function_metadata() {
        let program = parse_ok(".function void f() <static> {\n  return\n}");
        let func = &program.function_table["f:void;"];
        assert!(func.is_static());
    }

    #[test]
    fn test_field_constant_value() {
        let program = parse_ok(".record R {\n  i32 x <value=5>\n}");
        let field = &program.record_table["R"].field_list[0];
        assert!(field.metadata.value().is_some());
    }
}
