use std::{
    fs,
    io::{self, BufRead, BufReader},
    path::Path,
};

use xz2::read::XzDecoder;

use crate::{
    error::TraceError,
    memory::{MemAddr, MemoryCell},
};

// Trace Format
const MAX_LINE_LENGTH: usize = 1000;
const MAX_ADDRESS: u32 = u32::MAX;
pub const MAX_ACCESS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemKind {
    Data,
    Instr,
}

/// One memory operation read from a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceStep {
    pub op: Op,
    pub kind: MemKind,
    pub addr: MemAddr,
    pub size: usize,
    value: Option<[MemoryCell; MAX_ACCESS]>,
}

impl TraceStep {
    /// The recorded cells, most significant byte first.
    pub fn value(&self) -> Option<&[MemoryCell]> {
        self.value.as_ref().map(|v| &v[..self.size])
    }
}

fn parse_hex(token: &str) -> Option<u64> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u64::from_str_radix(digits, 16).ok()
}

/// Spreads `value` big-endian over `size` cells, dropping the upper bytes.
fn value_cells(value: u64, size: usize) -> [MemoryCell; MAX_ACCESS] {
    let mut cells = [MemoryCell::default(); MAX_ACCESS];
    let bytes = value.to_be_bytes();
    for (cell, &byte) in cells.iter_mut().zip(&bytes[MAX_ACCESS - size..]) {
        *cell = MemoryCell::known(byte);
    }
    cells
}

fn parse_step(line: &str) -> Result<TraceStep, &'static str> {
    let mut tokens = line.split_whitespace();
    let head = tokens.next().ok_or("empty line")?;
    let mut head_chars = head.chars();
    let op_char = head_chars.next().ok_or("invalid operation")?;
    let kind_char = match head_chars.next() {
        Some(ch) => ch,
        None => {
            let kind = tokens.next().ok_or("invalid memory kind")?;
            let mut kind_chars = kind.chars();
            let ch = kind_chars.next().ok_or("invalid memory kind")?;
            if kind_chars.next().is_some() {
                return Err("invalid memory kind");
            }
            ch
        }
    };
    if head_chars.next().is_some() {
        return Err("invalid operation");
    }

    let op = match op_char {
        'R' => Op::Read,
        'W' => Op::Write,
        _ => return Err("invalid operation"),
    };
    let kind = match kind_char {
        'D' => MemKind::Data,
        'I' => MemKind::Instr,
        _ => return Err("invalid memory kind"),
    };
    let addr = tokens
        .next()
        .and_then(parse_hex)
        .filter(|&a| a <= u64::from(MAX_ADDRESS))
        .and_then(|a| MemAddr::try_from(a).ok())
        .ok_or("invalid address")?;
    let size = match tokens.next() {
        Some(token) => match token {
            "1" | "2" | "4" | "8" => token.parse().map_err(|_| "invalid size")?,
            _ => return Err("invalid size"),
        },
        None => 1,
    };
    let value = match tokens.next() {
        Some(token) => Some(value_cells(parse_hex(token).ok_or("invalid value")?, size)),
        None => None,
    };
    if tokens.next().is_some() {
        return Err("unexpected trailing data");
    }
    if op == Op::Write && value.is_none() {
        return Err("write without a value");
    }

    Ok(TraceStep {
        op,
        kind,
        addr,
        size,
        value,
    })
}

/// Lazily parsed trace. Reads stdin, a plain file, or an `.xz` file.
pub struct Trace {
    reader: Box<dyn BufRead>,
    path: String,
    line: usize,
    buf: String,
}

impl Trace {
    pub fn open(path: Option<&Path>) -> Result<Trace, TraceError> {
        let Some(path) = path else {
            return Ok(Trace::from_reader(io::stdin().lock(), "<stdin>"));
        };
        let name = path.display().to_string();
        let stream = fs::File::open(path).map_err(|source| TraceError::Open {
            path: name.clone(),
            source,
        })?;
        if path.extension().is_some_and(|ext| ext == "xz") {
            Ok(Trace::from_reader(BufReader::new(XzDecoder::new(stream)), &name))
        } else {
            Ok(Trace::from_reader(BufReader::new(stream), &name))
        }
    }

    pub fn from_reader(reader: impl BufRead + 'static, path: &str) -> Trace {
        Trace {
            reader: Box::new(reader),
            path: path.to_owned(),
            line: 0,
            buf: String::new(),
        }
    }

    fn error(&self, msg: &'static str) -> TraceError {
        TraceError::Syntax {
            path: self.path.clone(),
            line: self.line,
            msg,
        }
    }

    /// Next operation, skipping blank lines and `#` comments.
    pub fn next_step(&mut self) -> Result<Option<TraceStep>, TraceError> {
        loop {
            self.buf.clear();
            let read = match self.reader.read_line(&mut self.buf) {
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                    self.line += 1;
                    return Err(self.error("invalid characters"));
                }
                Err(err) => return Err(err.into()),
            };
            if read == 0 {
                return Ok(None);
            }
            self.line += 1;
            if self.buf.trim_end_matches(['\n', '\r']).len() > MAX_LINE_LENGTH {
                return Err(self.error("line is too long"));
            }
            let body = self.buf.split('#').next().unwrap_or("").trim();
            if body.is_empty() {
                continue;
            }
            return parse_step(body).map(Some).map_err(|msg| self.error(msg));
        }
    }
}

impl Iterator for Trace {
    type Item = Result<TraceStep, TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_step().transpose()
    }
}
