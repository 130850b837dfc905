use std::fmt::{self, Debug};

use thiserror::Error;

/// Severity of a reported diagnostic. Warnings are collected and returned
/// alongside a successful parse; errors abort the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorClass {
    Warning = 0,
    #[default]
    Error,
}

/// Closed set of diagnostic kinds produced by the lexer, the parser and the
/// emitter.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorKind {
    #[default]
    #[error("NONE")]
    None,

    // Lexer
    #[error("ERR_STRING_MISSING_TERMINATING_CHARACTER")]
    StringMissingTerminatingCharacter,

    // Parser
    #[error("ERR_BAD_LABEL")]
    BadLabel,
    #[error("ERR_BAD_LABEL_EXT")]
    BadLabelExt,
    #[error("ERR_BAD_NAME_ID")]
    BadNameId,
    #[error("ERR_BAD_NAME_REG")]
    BadNameReg,
    #[error("ERR_BAD_INTEGER_NAME")]
    BadIntegerName,
    #[error("ERR_BAD_INTEGER_WIDTH")]
    BadIntegerWidth,
    #[error("ERR_BAD_FLOAT_NAME")]
    BadFloatName,
    #[error("ERR_BAD_FLOAT_WIDTH")]
    BadFloatWidth,
    #[error("ERR_BAD_NUMBER_OPERANDS")]
    BadNumberOperands,
    #[error("ERR_BAD_OPERAND")]
    BadOperand,
    #[error("ERR_BAD_OPERATION_NAME")]
    BadOperationName,
    #[error("ERR_BAD_NONEXISTING_OPERATION")]
    BadNonExistingOperation,
    #[error("ERR_BAD_ID_FUNCTION")]
    BadIdFunction,
    #[error("ERR_BAD_ID_RECORD")]
    BadIdRecord,
    #[error("ERR_BAD_ID_FIELD")]
    BadIdField,
    #[error("ERR_BAD_FUNCTION_NAME")]
    BadFunctionName,
    #[error("ERR_BAD_RECORD_NAME")]
    BadRecordName,
    #[error("ERR_BAD_DEFINITION_METADATA")]
    BadDefinitionMetadata,
    #[error("ERR_BAD_DEFINITION_FUNCTION")]
    BadDefinitionFunction,
    #[error("ERR_BAD_DEFINITION_RECORD")]
    BadDefinitionRecord,
    #[error("ERR_BAD_METADATA_BOUND")]
    BadMetadataBound,
    #[error("ERR_BAD_METADATA_UNKNOWN_ATTRIBUTE")]
    BadMetadataUnknownAttribute,
    #[error("ERR_BAD_METADATA_INVALID_VALUE")]
    BadMetadataInvalidValue,
    #[error("ERR_BAD_METADATA_MISSING_ATTRIBUTE")]
    BadMetadataMissingAttribute,
    #[error("ERR_BAD_METADATA_MISSING_VALUE")]
    BadMetadataMissingValue,
    #[error("ERR_BAD_METADATA_UNEXPECTED_ATTRIBUTE")]
    BadMetadataUnexpectedAttribute,
    #[error("ERR_BAD_METADATA_UNEXPECTED_VALUE")]
    BadMetadataUnexpectedValue,
    #[error("ERR_BAD_METADATA_MULTIPLE_ATTRIBUTE")]
    BadMetadataMultipleAttribute,
    #[error("ERR_BAD_FUNCTION_PARAMETERS")]
    BadFunctionParameters,
    #[error("ERR_BAD_FUNCTION_RETURN_VALUE")]
    BadFunctionReturnValue,
    #[error("ERR_FUNCTION_ARGUMENT_MISMATCH")]
    FunctionArgumentMismatch,
    #[error("ERR_BAD_FIELD_MISSING_NAME")]
    BadFieldMissingName,
    #[error("ERR_BAD_FIELD_VALUE_TYPE")]
    BadFieldValueType,
    #[error("ERR_BAD_CHARACTER")]
    BadCharacter,
    #[error("ERR_BAD_KEYWORD")]
    BadKeyword,
    #[error("ERR_BAD_DEFINITION")]
    BadDefinition,
    #[error("ERR_BAD_BOUND")]
    BadBound,
    #[error("ERR_BAD_END")]
    BadEnd,
    #[error("ERR_BAD_CLOSE")]
    BadClose,
    #[error("ERR_BAD_ARGS_BOUND")]
    BadArgsBound,
    #[error("ERR_BAD_TYPE")]
    BadType,
    #[error("ERR_BAD_PARAM_NAME")]
    BadParamName,
    #[error("ERR_BAD_NOEXP_DELIM")]
    BadNoExpDelim,
    #[error("ERR_BAD_STRING_INVALID_HEX_ESCAPE_SEQUENCE")]
    BadStringInvalidHexEscapeSequence,
    #[error("ERR_BAD_STRING_UNKNOWN_ESCAPE_SEQUENCE")]
    BadStringUnknownEscapeSequence,
    #[error("ERR_BAD_ARRAY_TYPE_BOUND")]
    BadArrayTypeBound,
    #[error("ERR_UNDEFINED_TYPE")]
    UndefinedType,
    #[error("ERR_MULTIPLE_DIRECTIVES")]
    MultipleDirectives,
    #[error("ERR_INCORRECT_DIRECTIVE_LOCATION")]
    IncorrectDirectiveLocation,
    #[error("ERR_BAD_DIRECTIVE_DECLARATION")]
    BadDirectiveDeclaration,
    #[error("ERR_UNKNOWN_LANGUAGE")]
    UnknownLanguage,
    #[error("ERR_BAD_MNEMONIC_NAME")]
    BadMnemonicName,
    #[error("ERR_REPEATING_FIELD_NAME")]
    RepeatingFieldName,

    // Emitter
    #[error("ERR_EMIT")]
    Emit,

    // Warnings
    #[error("WAR_UNEXPECTED_RETURN_TYPE")]
    WarUnexpectedReturnType,
    #[error("WAR_UNEXPECTED_TYPE_ID")]
    WarUnexpectedTypeId,
}

/// One diagnostic: a kind, a severity class, a human message and the exact
/// source location (line number, byte span inside the line, and the line
/// itself for caret reports).
#[derive(Clone, Default)]
pub struct Error {
    pub class: ErrorClass,
    pub kind: ErrorKind,
    pub message: String,
    pub verbose: String,
    pub line_number: usize,
    pub pos: usize,
    pub end: usize,
    pub whole_line: String,
}

impl Error {
    pub fn new(
        message: impl Into<String>,
        line_number: usize,
        kind: ErrorKind,
        verbose: impl Into<String>,
        pos: usize,
        end: usize,
        whole_line: impl Into<String>,
    ) -> Self {
        Self {
            class: ErrorClass::Error,
            kind,
            message: message.into(),
            verbose: verbose.into(),
            line_number,
            pos,
            end,
            whole_line: whole_line.into(),
        }
    }

    pub fn warning(
        message: impl Into<String>,
        line_number: usize,
        kind: ErrorKind,
        pos: usize,
        end: usize,
        whole_line: impl Into<String>,
    ) -> Self {
        Self {
            class: ErrorClass::Warning,
            ..Self::new(message, line_number, kind, "", pos, end, whole_line)
        }
    }

    /// Emitter failures carry no source position, only a message.
    pub fn emitter(message: impl Into<String>) -> Self {
        Self::new(message, 0, ErrorKind::Emit, "", 0, 0, "")
    }

    pub fn is_error(&self) -> bool {
        self.kind != ErrorKind::None && self.class == ErrorClass::Error
    }

    /// Multi-line report with a line echo and a caret under the offending
    /// column, as printed by the CLI front end.
    pub fn caret_report(&self, tag: &str) -> String {
        let header = format!("{}: {}", tag, self.message);
        let lead = format!("      Line {}, Column {}: ", self.line_number, self.pos + 1);
        let caret = format!("{:>width$}", '^', width = lead.len() + self.pos + 1);
        format!("{}\n{}{}\n{}", header, lead, self.whole_line, caret)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.verbose.is_empty() {
            write!(f, "{} [{}]", self.message, self.kind)
        } else {
            write!(f, "{} ({}) [{}]", self.message, self.verbose, self.kind)
        }
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl std::error::Error for Error {}

pub type ErrorList = Vec<Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caret_points_at_offending_column() {
        let err = Error::new(
            "Invalid name of label.",
            3,
            ErrorKind::BadLabel,
            "",
            4,
            9,
            "jmp 0bad_label",
        );
        let report = err.caret_report("ERROR");
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].ends_with("jmp 0bad_label"));
        // caret sits under byte 4 of the echoed line
        let echo_start = lines[1].len() - "jmp 0bad_label".len();
        assert_eq!(lines[2].len(), echo_start + 4 + 1);
        assert!(lines[2].ends_with('^'));
    }

    #[test]
    fn warning_class() {
        let war = Error::warning("w", 1, ErrorKind::WarUnexpectedTypeId, 0, 0, "");
        assert_eq!(war.class, ErrorClass::Warning);
        assert!(!war.is_error());
    }
}
