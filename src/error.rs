use std::fmt;

use thiserror::Error;

/// A position inside program or script source text, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl Default for SourceLocation {
    fn default() -> Self {
        Self { line: 1, column: 1 }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Failure to build a ternary value from a digit string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BadInput {
    #[error("too many characters in string")]
    TooManyCharacters,
    #[error("invalid character in string: {0:?}")]
    InvalidCharacter(char),
}

/// Malformed program source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("program data must be at least 2 instructions long")]
    TooShort,
    #[error("program data does not fit into the 59049 cell address space")]
    TooLong,
    #[error("non-whitespace character must be graphical ASCII: {value} at {location}")]
    NonGraphical { value: u32, location: SourceLocation },
    #[error("invalid instruction in program: {value} at {location}")]
    InvalidInstruction { value: u32, location: SourceLocation },
    #[error("failed to read program source: {0}")]
    Io(String),
}

impl ParseError {
    /// The source position the error refers to, if it has one.
    pub fn location(&self) -> Option<SourceLocation> {
        match self {
            ParseError::NonGraphical { location, .. }
            | ParseError::InvalidInstruction { location, .. } => Some(*location),
            _ => None,
        }
    }
}

/// Runtime failure inside the vCPU.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("cipher input must be graphical ASCII: {value} at step {step}")]
    NonGraphical { value: u32, step: usize },
    #[error("operation not allowed while in the {actual} state")]
    WrongState { actual: &'static str },
}

/// Malformed debugger script text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct ScriptParseError {
    pub message: String,
    pub location: Option<SourceLocation>,
}

impl ScriptParseError {
    pub fn new(message: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            message: message.into(),
            location: Some(location),
        }
    }
}

impl fmt::Display for ScriptParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.location {
            Some(location) => write!(f, "{} at {}", self.message, location),
            None => write!(f, "{}", self.message),
        }
    }
}

/// A well-formed debugger script that violates the structural rules.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptInvalidError {
    #[error("a script must contain exactly one run command")]
    RunCount,
    #[error("step or resume commands cannot appear before a run")]
    StepOrResumeBeforeRun,
    #[error("if there are any add_breakpoint commands, at least one must appear before the run")]
    BreakpointAfterRun,
    #[error("if a stop command is present, it must be the last")]
    StopNotLast,
}

/// All the error kinds the virtual machine can surface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalbolgeError {
    #[error("invalid program source: {0}")]
    Parse(#[from] ParseError),
    #[error("program execution failed: {0}")]
    Execution(#[from] ExecutionError),
    #[error("invalid debugger script: {0}")]
    ScriptParse(#[from] ScriptParseError),
    #[error("malformed debugger script: {0}")]
    ScriptInvalid(#[from] ScriptInvalidError),
    #[error("{message}")]
    System { code: i32, message: String },
}

impl MalbolgeError {
    /// Maps an OS failure onto the `System` variant, keeping the platform
    /// error code for the process exit status.
    pub fn from_io(error: std::io::Error) -> Self {
        MalbolgeError::System {
            code: error.raw_os_error().unwrap_or(1),
            message: error.to_string(),
        }
    }
}
