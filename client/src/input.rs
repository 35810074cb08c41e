//! Line-oriented commands standing in for mouse and keyboard input.
//!
//! ```text
//! set <row> <col> <r> <g> <b>
//! set <row> <col> #RRGGBB
//! get <row> <col>
//! size
//! quit
//! ```

use shared::{PixelEdit, Rgb};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set(PixelEdit),
    Get { row: i16, col: i16 },
    Size,
    Quit,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}'")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("invalid color '{0}', expected #RRGGBB")]
    InvalidColor(String),
}

const SET_USAGE: &str = "set <row> <col> <r> <g> <b> | set <row> <col> #RRGGBB";
const GET_USAGE: &str = "get <row> <col>";

pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let (name, args) = words.split_first().ok_or(CommandError::Empty)?;

    match name.to_ascii_lowercase().as_str() {
        "set" => {
            let (row, col, color) = match args {
                [row, col, hex] => (row, col, parse_hex_color(hex)?),
                [row, col, r, g, b] => (
                    row,
                    col,
                    Rgb::new(parse_number(r)?, parse_number(g)?, parse_number(b)?),
                ),
                _ => return Err(CommandError::Usage(SET_USAGE)),
            };
            Ok(Command::Set(PixelEdit::new(
                parse_number(row)?,
                parse_number(col)?,
                color,
            )))
        }
        "get" => match args {
            [row, col] => Ok(Command::Get {
                row: parse_number(row)?,
                col: parse_number(col)?,
            }),
            _ => Err(CommandError::Usage(GET_USAGE)),
        },
        "size" => Ok(Command::Size),
        "quit" | "exit" => Ok(Command::Quit),
        _ => Err(CommandError::Unknown(name.to_string())),
    }
}

fn parse_number<T: FromStr>(word: &str) -> Result<T, CommandError> {
    word.parse()
        .map_err(|_| CommandError::InvalidNumber(word.to_string()))
}

pub fn parse_hex_color(hex: &str) -> Result<Rgb, CommandError> {
    let invalid = || CommandError::InvalidColor(hex.to_string());

    let digits = hex.strip_prefix('#').ok_or_else(invalid)?;
    if digits.len() != 6 || !digits.is_ascii() {
        return Err(invalid());
    }

    let channel = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&digits[range], 16).map_err(|_| invalid())
    };
    Ok(Rgb::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

pub fn color_to_hex(color: Rgb) -> String {
    format!("#{:02X}{:02X}{:02X}", color.r, color.g, color.b)
}
