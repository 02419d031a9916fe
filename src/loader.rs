//! Program source loading and normalisation.
//!
//! In malbolge the position of a character changes its meaning. A
//! "normalised" program has that positional cipher stripped away, leaving
//! only the eight instruction characters; "denormalisation" reinstates the
//! mapping so the program can run on the vCPU.
use std::fs;
use std::io::Read;
use std::path::Path;

use log::{debug, info};

use crate::definitions::cipher;
use crate::error::{MalbolgeError, ParseError, SourceLocation};
use crate::instruction;
use crate::memory::VirtualMemory;
use crate::ternary::Ternary;

/// Canonical instruction character to the graphical character it
/// denormalises to at position zero.
const DENORMALISE_MAP: [(u8, u8); 8] = [
    (b'*', b'\''),
    (b'j', b'('),
    (b'p', b'>'),
    (b'o', b'D'),
    (b'v', b'Q'),
    (b'i', b'b'),
    (b'<', b'c'),
    (b'/', b'u'),
];

/// How a load call decides whether the source is normalised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Treat the source as normalised iff every non-whitespace character is
    /// one of the eight instruction characters. A heuristic: a cipher-form
    /// program could coincidentally consist of only those characters, in
    /// which case [`ForceDenormalised`](LoadMode::ForceDenormalised) is the
    /// escape hatch.
    Auto,
    /// Treat the source as normalised, denormalising it before the load.
    ForceNormalised,
    /// Treat the source as already in cipher form.
    ForceDenormalised,
}

/// Walks the source, skipping whitespace while keeping 1-based line/column
/// tracking, and hands every non-whitespace character together with its
/// ciphered instruction to `emit`.
fn validate<F>(source: &str, mut emit: F) -> Result<(), ParseError>
where
    F: FnMut(char, u8),
{
    let mut location = SourceLocation::default();
    let mut index = 0usize;

    for c in source.chars() {
        if c.is_whitespace() {
            if c == '\n' {
                location.line += 1;
                location.column = 1;
            } else {
                location.column += 1;
            }
            continue;
        }

        let instr = instruction::pre_cipher(c as u32, index).ok_or(ParseError::NonGraphical {
            value: c as u32,
            location,
        })?;
        if !instruction::is_instruction(instr) {
            return Err(ParseError::InvalidInstruction {
                value: u32::from(instr),
                location,
            });
        }

        emit(c, instr);
        location.column += 1;
        index += 1;
    }

    Ok(())
}

/// True if every non-whitespace character of `source` is one of the eight
/// instruction characters.
pub fn is_likely_normalised(source: &str) -> bool {
    source
        .chars()
        .filter(|c| !c.is_whitespace())
        .all(|c| c.is_ascii() && instruction::is_instruction(c as u8))
}

/// Strips the positional cipher out of `source`, leaving only instruction
/// characters. Validates exactly like a load does.
pub fn normalise(source: &str) -> Result<String, ParseError> {
    let mut output = String::new();
    validate(source, |_, instr| output.push(char::from(instr)))?;
    Ok(output)
}

/// Reinstates the positional cipher of a normalised program.
pub fn denormalise(source: &str) -> Result<String, ParseError> {
    let mut output = String::new();
    let mut location = SourceLocation::default();
    let mut index = 0usize;

    for c in source.chars() {
        if c.is_whitespace() {
            if c == '\n' {
                location.line += 1;
                location.column = 1;
            } else {
                location.column += 1;
            }
            continue;
        }

        let base = DENORMALISE_MAP
            .iter()
            .find(|(instr, _)| c.is_ascii() && *instr == c as u8)
            .map(|(_, base)| *base)
            .ok_or(ParseError::InvalidInstruction {
                value: c as u32,
                location,
            })?;

        let offset = (index % cipher::SIZE) as i32;
        let mut shifted = i32::from(base) - offset;
        if shifted < cipher::GRAPHICAL_MIN as i32 {
            shifted += cipher::SIZE as i32;
        }
        output.push(char::from(shifted as u8));

        location.column += 1;
        index += 1;
    }

    Ok(output)
}

/// Loads a program held in a string, producing a fully initialised memory
/// image.
pub fn load_str(source: &str, mode: LoadMode) -> Result<VirtualMemory, MalbolgeError> {
    let normalised = match mode {
        LoadMode::Auto => is_likely_normalised(source),
        LoadMode::ForceNormalised => true,
        LoadMode::ForceDenormalised => false,
    };

    let denormalised;
    let cipher_text = if normalised {
        debug!("source detected as normalised, denormalising");
        denormalised = denormalise(source)?;
        &denormalised
    } else {
        source
    };

    let mut program = Vec::new();
    validate(cipher_text, |c, _| program.push(Ternary::new(c as u32)))?;
    debug!("loaded size: {}", program.len());

    Ok(VirtualMemory::new(program)?)
}

/// Loads a program from a file on disk.
pub fn load_path<P: AsRef<Path>>(path: P, mode: LoadMode) -> Result<VirtualMemory, MalbolgeError> {
    info!("loading file: {}", path.as_ref().display());
    let source = fs::read_to_string(path).map_err(MalbolgeError::from_io)?;
    load_str(&source, mode)
}

/// Loads a program piped in through standard input.
pub fn load_stdin(mode: LoadMode) -> Result<VirtualMemory, MalbolgeError> {
    info!("loading program from stdin");
    let mut source = String::new();
    std::io::stdin()
        .read_to_string(&mut source)
        .map_err(MalbolgeError::from_io)?;
    load_str(&source, mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcpu::tests::{ECHO, HELLO_WORLD, HELLO_WORLD_NORMALISED};

    #[test]
    fn normalise_hello_world() {
        assert_eq!(normalise(HELLO_WORLD).unwrap(), HELLO_WORLD_NORMALISED);
    }

    #[test]
    fn denormalise_round_trip() {
        let normalised = normalise(HELLO_WORLD).unwrap();
        assert_eq!(denormalise(&normalised).unwrap(), HELLO_WORLD);
    }

    #[test]
    fn denormalise_rejects_non_instruction() {
        assert_eq!(
            denormalise("jjx"),
            Err(ParseError::InvalidInstruction {
                value: u32::from(b'x'),
                location: SourceLocation::new(1, 3),
            })
        );
    }

    #[test]
    fn likely_normalised() {
        assert!(is_likely_normalised(HELLO_WORLD_NORMALISED));
        assert!(is_likely_normalised("jj \n iv"));
        assert!(!is_likely_normalised(HELLO_WORLD));
        assert!(!is_likely_normalised("jja"));
    }

    #[test]
    fn load_auto_detects() {
        // both forms must load to the same memory image
        let from_cipher = load_str(HELLO_WORLD, LoadMode::Auto).unwrap();
        let from_normalised = load_str(HELLO_WORLD_NORMALISED, LoadMode::Auto).unwrap();
        assert_eq!(from_cipher, from_normalised);
    }

    #[test]
    fn load_force_modes() {
        assert!(load_str(HELLO_WORLD, LoadMode::ForceDenormalised).is_ok());
        assert!(load_str(HELLO_WORLD_NORMALISED, LoadMode::ForceNormalised).is_ok());

        // normalised text read as cipher form fails validation: 'j' at
        // index 0 ciphers to 'Q', which is not an instruction
        match load_str(HELLO_WORLD_NORMALISED, LoadMode::ForceDenormalised) {
            Err(MalbolgeError::Parse(ParseError::InvalidInstruction { .. })) => {}
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn load_multi_line_source() {
        // the echo program spans five lines; whitespace must be stripped
        // without disturbing the cipher positions
        assert!(load_str(ECHO, LoadMode::Auto).is_ok());
    }

    #[test]
    fn rejects_non_graphical_with_location() {
        let source = "('&%\n:9]\u{1}!";
        assert_eq!(
            load_str(source, LoadMode::ForceDenormalised)
                .unwrap_err(),
            MalbolgeError::Parse(ParseError::NonGraphical {
                value: 1,
                location: SourceLocation::new(2, 4),
            })
        );
    }

    #[test]
    fn whitespace_advances_column() {
        // two leading spaces shift the column of the offending character
        let source = "  \u{1}";
        match load_str(source, LoadMode::ForceDenormalised).unwrap_err() {
            MalbolgeError::Parse(ParseError::NonGraphical { location, .. }) => {
                assert_eq!(location, SourceLocation::new(1, 3));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn rejects_short_programs() {
        assert_eq!(
            load_str("(", LoadMode::ForceDenormalised).unwrap_err(),
            MalbolgeError::Parse(ParseError::TooShort)
        );
    }
}
