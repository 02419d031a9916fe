//! Text parser for debugger scripts.
//!
//! Scripts are sequences of semicolon-terminated commands of the form
//! `name(arg=value, ...)`. Whitespace is free except inside string
//! literals, and `//` starts a line comment.
use std::fs;
use std::path::Path;

use hashbrown::HashMap;
use once_cell::sync::Lazy;
use tinyvec::ArrayVec;

use super::Command;
use crate::error::{MalbolgeError, ScriptParseError, SourceLocation};
use crate::ternary::Ternary;
use crate::vcpu::Register;

/// Single-character escapes, from the C escape list.
static CONTROL_ESCAPES: Lazy<HashMap<char, char>> = Lazy::new(|| {
    let mut map = HashMap::new();
    map.insert('a', '\x07');
    map.insert('b', '\x08');
    map.insert('t', '\t');
    map.insert('n', '\n');
    map.insert('v', '\x0b');
    map.insert('f', '\x0c');
    map.insert('r', '\r');
    map
});

/// Upper bound on arguments per command; the widest schema has two.
const MAX_ARGS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
enum RawValue {
    /// A bare token, e.g. a number or register name.
    Token(String),
    /// A quoted string, already unescaped.
    Str(String),
}

impl Default for RawValue {
    fn default() -> Self {
        RawValue::Token(String::new())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RawArg {
    name: String,
    name_location: SourceLocation,
    value: RawValue,
    value_location: SourceLocation,
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    location: SourceLocation,
}

impl Scanner {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            location: SourceLocation::default(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.location.line += 1;
            self.location.column = 1;
        } else {
            self.location.column += 1;
        }
        Some(c)
    }

    /// The location of the next character to be read.
    fn location(&self) -> SourceLocation {
        self.location
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else if c == '/' && self.chars.get(self.pos + 1) == Some(&'/') {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    /// Reads an identifier: letters, digits and underscores.
    fn identifier(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        name
    }

    /// Reads a bare value token, up to a separator or whitespace.
    fn token(&mut self) -> String {
        let mut token = String::new();
        while let Some(c) = self.peek() {
            if c == ',' || c == ')' || c == ';' || c.is_whitespace() {
                break;
            }
            token.push(c);
            self.bump();
        }
        token
    }

    /// Reads a double-quoted string literal, resolving escapes while
    /// scanning. The opening quote is the next character.
    fn string_literal(&mut self) -> Result<String, ScriptParseError> {
        let start = self.location();
        self.bump();

        let mut value = String::new();
        loop {
            let c = match self.bump() {
                Some(c) => c,
                None => return Err(ScriptParseError::new("unterminated string", start)),
            };

            match c {
                '"' => return Ok(value),
                '\\' => {
                    let escape_location = self.location();
                    let escaped = match self.bump() {
                        Some(c) => c,
                        None => return Err(ScriptParseError::new("unterminated string", start)),
                    };
                    value.push(self.resolve_escape(escaped, escape_location)?);
                }
                _ => value.push(c),
            }
        }
    }

    fn resolve_escape(
        &mut self,
        escaped: char,
        location: SourceLocation,
    ) -> Result<char, ScriptParseError> {
        if let Some(resolved) = CONTROL_ESCAPES.get(&escaped) {
            return Ok(*resolved);
        }
        if escaped == '"' || escaped == '\'' || escaped == '?' || escaped == '\\' {
            return Ok(escaped);
        }

        if escaped == 'x' {
            let mut digits = String::new();
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() {
                    digits.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            if digits.is_empty() {
                return Err(ScriptParseError::new("cannot parse escape character", location));
            }
            let value = u32::from_str_radix(&digits, 16)
                .ok()
                .filter(|v| *v <= 0xff)
                .ok_or_else(|| {
                    ScriptParseError::new("hex escape out of range", location)
                })?;
            return Ok(char::from(value as u8));
        }

        if escaped.is_digit(8) {
            let mut digits = String::new();
            digits.push(escaped);
            while digits.len() < 3 {
                match self.peek() {
                    Some(c) if c.is_digit(8) => {
                        digits.push(c);
                        self.bump();
                    }
                    _ => break,
                }
            }
            let value = u32::from_str_radix(&digits, 8)
                .ok()
                .filter(|v| *v <= 0xff)
                .ok_or_else(|| {
                    ScriptParseError::new("octal escape out of range", location)
                })?;
            return Ok(char::from(value as u8));
        }

        Err(ScriptParseError::new("cannot parse escape character", location))
    }
}

/// Parses a `uint` argument: decimal by default, `0x`/`0X` for hex, a
/// leading zero for octal.
fn parse_uint(token: &str, location: SourceLocation) -> Result<u32, ScriptParseError> {
    let bad = || ScriptParseError::new(format!("cannot parse number: {:?}", token), location);

    let (digits, radix) = if token.starts_with("0x") || token.starts_with("0X") {
        (&token[2..], 16)
    } else if token.len() > 1 && token.starts_with('0') {
        (&token[1..], 8)
    } else {
        (&token[..], 10)
    };

    if digits.is_empty() {
        return Err(bad());
    }
    u32::from_str_radix(digits, radix).map_err(|_| bad())
}

/// Parses a `ternary` argument: a `uint`, or a `t`-prefixed trit string.
fn parse_ternary(token: &str, location: SourceLocation) -> Result<Ternary, ScriptParseError> {
    if let Some(trits) = token.strip_prefix('t') {
        return trits
            .parse::<Ternary>()
            .map_err(|e| ScriptParseError::new(e.to_string(), location));
    }
    parse_uint(token, location).map(Ternary::new)
}

fn expect_token(arg: &RawArg) -> Result<&str, ScriptParseError> {
    match &arg.value {
        RawValue::Token(token) => Ok(token),
        RawValue::Str(_) => Err(ScriptParseError::new(
            format!("argument {} cannot take a string", arg.name),
            arg.value_location,
        )),
    }
}

/// Looks up an argument by name, flagging any names the schema does not
/// know.
struct ArgSet<'a> {
    args: &'a [RawArg],
    known: &'a [&'a str],
}

impl<'a> ArgSet<'a> {
    fn new(args: &'a [RawArg], known: &'a [&'a str]) -> Result<Self, ScriptParseError> {
        for arg in args {
            if !known.contains(&arg.name.as_str()) {
                return Err(ScriptParseError::new(
                    format!("unrecognised argument name: {}", arg.name),
                    arg.name_location,
                ));
            }
        }
        Ok(Self { args, known })
    }

    fn get(&self, name: &str) -> Option<&'a RawArg> {
        self.args.iter().find(|arg| arg.name == name)
    }

    fn required(
        &self,
        name: &str,
        command_location: SourceLocation,
    ) -> Result<&'a RawArg, ScriptParseError> {
        debug_assert!(self.known.contains(&name));
        self.get(name).ok_or_else(|| {
            ScriptParseError::new(format!("missing required argument: {}", name), command_location)
        })
    }
}

fn build_command(
    name: &str,
    name_location: SourceLocation,
    args: &[RawArg],
) -> Result<Command, ScriptParseError> {
    match name {
        "add_breakpoint" => {
            let args = ArgSet::new(args, &["address", "ignore_count"])?;
            let address = args.required("address", name_location)?;
            let address = parse_ternary(expect_token(address)?, address.value_location)?;
            let ignore_count = match args.get("ignore_count") {
                Some(arg) => parse_uint(expect_token(arg)?, arg.value_location)?,
                None => 0,
            };
            Ok(Command::AddBreakpoint {
                address,
                ignore_count,
            })
        }
        "remove_breakpoint" => {
            let args = ArgSet::new(args, &["address"])?;
            let address = args.required("address", name_location)?;
            let address = parse_ternary(expect_token(address)?, address.value_location)?;
            Ok(Command::RemoveBreakpoint { address })
        }
        "run" => {
            let args = ArgSet::new(args, &["max_runtime_ms"])?;
            let max_runtime_ms = match args.get("max_runtime_ms") {
                Some(arg) => parse_uint(expect_token(arg)?, arg.value_location)?,
                None => 0,
            };
            Ok(Command::Run { max_runtime_ms })
        }
        "address_value" => {
            let args = ArgSet::new(args, &["address"])?;
            let address = args.required("address", name_location)?;
            let address = parse_ternary(expect_token(address)?, address.value_location)?;
            Ok(Command::AddressValue { address })
        }
        "register_value" => {
            let args = ArgSet::new(args, &["reg"])?;
            let reg = args.required("reg", name_location)?;
            let token = expect_token(reg)?;
            let register = Register::from_name(token).ok_or_else(|| {
                ScriptParseError::new(
                    format!("unrecognised vCPU register ID: {}", token),
                    reg.value_location,
                )
            })?;
            Ok(Command::RegisterValue { register })
        }
        "step" => {
            ArgSet::new(args, &[])?;
            Ok(Command::Step)
        }
        "resume" => {
            ArgSet::new(args, &[])?;
            Ok(Command::Resume)
        }
        "stop" => {
            ArgSet::new(args, &[])?;
            Ok(Command::Stop)
        }
        "on_input" => {
            let args = ArgSet::new(args, &["data"])?;
            let data = args.required("data", name_location)?;
            match &data.value {
                RawValue::Str(s) => Ok(Command::OnInput { data: s.clone() }),
                RawValue::Token(_) => Err(ScriptParseError::new(
                    "argument data requires a quoted string",
                    data.value_location,
                )),
            }
        }
        _ => Err(ScriptParseError::new(
            format!("unrecognised function name: {}", name),
            name_location,
        )),
    }
}

fn parse_command(scanner: &mut Scanner) -> Result<Command, ScriptParseError> {
    let name_location = scanner.location();
    let name = scanner.identifier();
    if name.is_empty() {
        return Err(ScriptParseError::new("no function name", name_location));
    }

    scanner.skip_whitespace_and_comments();
    if scanner.peek() != Some('(') {
        return Err(ScriptParseError::new(
            "no open bracket in function",
            scanner.location(),
        ));
    }
    scanner.bump();

    let mut args: ArrayVec<[RawArg; MAX_ARGS]> = ArrayVec::new();
    loop {
        scanner.skip_whitespace_and_comments();
        match scanner.peek() {
            Some(')') => {
                scanner.bump();
                break;
            }
            None => {
                return Err(ScriptParseError::new(
                    "no close bracket in function",
                    scanner.location(),
                ));
            }
            Some(_) => {}
        }

        let arg_location = scanner.location();
        let arg_name = scanner.identifier();
        if arg_name.is_empty() {
            return Err(ScriptParseError::new(
                "missing argument name",
                arg_location,
            ));
        }
        if args.iter().any(|arg: &RawArg| arg.name == arg_name) {
            return Err(ScriptParseError::new(
                format!("duplicate argument name: {}", arg_name),
                arg_location,
            ));
        }
        if args.len() == args.capacity() {
            return Err(ScriptParseError::new("too many arguments", arg_location));
        }

        scanner.skip_whitespace_and_comments();
        if scanner.peek() != Some('=') {
            return Err(ScriptParseError::new(
                "missing argument value",
                scanner.location(),
            ));
        }
        scanner.bump();

        scanner.skip_whitespace_and_comments();
        let value_location = scanner.location();
        let value = match scanner.peek() {
            Some('"') => RawValue::Str(scanner.string_literal()?),
            _ => {
                let token = scanner.token();
                if token.is_empty() {
                    return Err(ScriptParseError::new(
                        "missing argument value",
                        value_location,
                    ));
                }
                RawValue::Token(token)
            }
        };

        args.push(RawArg {
            name: arg_name,
            name_location: arg_location,
            value,
            value_location,
        });

        scanner.skip_whitespace_and_comments();
        match scanner.peek() {
            Some(',') => {
                scanner.bump();
            }
            Some(')') => {}
            _ => {
                return Err(ScriptParseError::new(
                    "expected ',' or ')' after argument",
                    scanner.location(),
                ));
            }
        }
    }

    build_command(&name, name_location, &args)
}

/// Parses script text into a command sequence. Structural rules are not
/// checked here; [`validate`](super::validate) runs before execution.
pub fn parse(source: &str) -> Result<Vec<Command>, ScriptParseError> {
    let mut scanner = Scanner::new(source);
    let mut commands = Vec::new();

    loop {
        scanner.skip_whitespace_and_comments();
        if scanner.peek().is_none() {
            break;
        }

        commands.push(parse_command(&mut scanner)?);

        scanner.skip_whitespace_and_comments();
        match scanner.peek() {
            // the final terminator may be omitted
            Some(';') => {
                scanner.bump();
            }
            None => break,
            Some(c) => {
                return Err(ScriptParseError::new(
                    format!("expected ';' after command, found {:?}", c),
                    scanner.location(),
                ));
            }
        }
    }

    Ok(commands)
}

/// Parses a script file from disk.
pub fn parse_path<P: AsRef<Path>>(path: P) -> Result<Vec<Command>, MalbolgeError> {
    let source = fs::read_to_string(path).map_err(MalbolgeError::from_io)?;
    Ok(parse(&source)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_command_form() {
        let script = "\
add_breakpoint(address=9,  ignore_count=2);
add_breakpoint(address=42, ignore_count=0x2);
add_breakpoint(address=t12012);
add_breakpoint(address=0x42);
remove_breakpoint(address=9);
run();
run(max_runtime_ms=10);
run(max_runtime_ms=021);
address_value(address=t12012);
register_value(reg=A);
register_value(reg=C);
register_value(reg=D);
step();
resume();
stop();
on_input(data=\"hello\");
on_input(data=\"he\\\"llo\");
";
        let commands = parse(script).unwrap();
        assert_eq!(
            commands,
            vec![
                Command::AddBreakpoint {
                    address: Ternary::new(9),
                    ignore_count: 2
                },
                Command::AddBreakpoint {
                    address: Ternary::new(42),
                    ignore_count: 2
                },
                Command::AddBreakpoint {
                    address: Ternary::new(140),
                    ignore_count: 0
                },
                Command::AddBreakpoint {
                    address: Ternary::new(0x42),
                    ignore_count: 0
                },
                Command::RemoveBreakpoint {
                    address: Ternary::new(9)
                },
                Command::Run { max_runtime_ms: 0 },
                Command::Run { max_runtime_ms: 10 },
                Command::Run { max_runtime_ms: 17 },
                Command::AddressValue {
                    address: Ternary::new(140)
                },
                Command::RegisterValue {
                    register: Register::A
                },
                Command::RegisterValue {
                    register: Register::C
                },
                Command::RegisterValue {
                    register: Register::D
                },
                Command::Step,
                Command::Resume,
                Command::Stop,
                Command::OnInput {
                    data: "hello".into()
                },
                Command::OnInput {
                    data: "he\"llo".into()
                },
            ]
        );
    }

    #[test]
    fn whitespace_and_comments_are_free() {
        let script = "add_breakpoint  \n\t(\t  address  =  \t9\n,  \n   \t  ignore_count= 2)\n\t\t; // trailing comment\n// a full comment line\nrun(\t)\n\n\n;\n";
        let commands = parse(script).unwrap();
        assert_eq!(
            commands,
            vec![
                Command::AddBreakpoint {
                    address: Ternary::new(9),
                    ignore_count: 2
                },
                Command::Run { max_runtime_ms: 0 },
            ]
        );
    }

    #[test]
    fn string_escapes() {
        let script = "on_input(data=\"a\\tb\\nc\\\\d\\x41\\101 done\");";
        let commands = parse(script).unwrap();
        assert_eq!(
            commands,
            vec![Command::OnInput {
                data: "a\tb\nc\\dAA done".into()
            }]
        );
    }

    #[test]
    fn strings_keep_separators_and_comment_markers() {
        let script = "on_input(data=\"a;b,c)d // not a comment\");";
        let commands = parse(script).unwrap();
        assert_eq!(
            commands,
            vec![Command::OnInput {
                data: "a;b,c)d // not a comment".into()
            }]
        );
    }

    #[test]
    fn reports_locations() {
        let err = parse("a").unwrap_err();
        assert_eq!(err.location, Some(SourceLocation::new(1, 2)));
        assert!(err.message.contains("no open bracket"));

        let err = parse("\n\n   nonsense();").unwrap_err();
        assert_eq!(err.location, Some(SourceLocation::new(3, 4)));
        assert!(err.message.contains("unrecognised function name"));

        let err = parse("run(wrong=100);").unwrap_err();
        assert_eq!(err.location, Some(SourceLocation::new(1, 5)));
        assert!(err.message.contains("unrecognised argument name"));

        let err = parse("register_value(reg=42);").unwrap_err();
        assert_eq!(err.location, Some(SourceLocation::new(1, 20)));
        assert!(err.message.contains("unrecognised vCPU register ID"));
    }

    #[test]
    fn rejects_malformed_commands() {
        assert!(parse("()").is_err());
        assert!(parse("run(").is_err());
        assert!(parse("run(=9)").is_err());
        assert!(parse("run(max_runtime_ms)").is_err());
        assert!(parse("run(max_runtime_ms=)").is_err());
        assert!(parse("run(max_runtime_ms=,)").is_err());
        assert!(parse("run(max_runtime_ms=\"hello\")").is_err());
        assert!(parse("add_breakpoint(address=4, ignore_count)").is_err());
        assert!(parse("on_input(data=\")").is_err());
        assert!(parse("on_input(data=hi)").is_err());
        assert!(parse("run() run()").is_err());
    }

    #[test]
    fn rejects_duplicate_argument_names() {
        let err = parse("add_breakpoint(address=4, address=5);").unwrap_err();
        assert!(err.message.contains("duplicate argument name"));
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(parse("run(max_runtime_ms=12abc);").is_err());
        assert!(parse("run(max_runtime_ms=0x);").is_err());
        assert!(parse("run(max_runtime_ms=09);").is_err());
        assert!(parse("address_value(address=t3);").is_err());
    }

    #[test]
    fn empty_script_parses_to_nothing() {
        assert_eq!(parse("").unwrap(), vec![]);
        assert_eq!(parse("  \n // only a comment\n").unwrap(), vec![]);
    }
}
