//! Console capability used by the IN and OUT instructions.
//!
//! The engine never touches process stdin/stdout directly; it calls whatever
//! [`Console`] it was built with. [`StdConsole`] talks to a reader/writer pair
//! (process stdio by default) and [`ScriptedConsole`] replays a fixed input
//! sequence for tests and deterministic reruns.

use crate::decode::Reg;
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("console input closed")]
    Closed,
    #[error("invalid integer input {0:?}")]
    InvalidInput(String),
    #[error("console io error: {0}")]
    Io(#[from] io::Error),
}

pub trait Console {
    /// Block until one integer is available for `reg`.
    fn read_value(&mut self, reg: Reg) -> Result<i64, ConsoleError>;

    /// Emit the value held in `reg`.
    fn write_value(&mut self, reg: Reg, value: u8) -> Result<(), ConsoleError>;
}

impl<C: Console + ?Sized> Console for &mut C {
    fn read_value(&mut self, reg: Reg) -> Result<i64, ConsoleError> {
        (**self).read_value(reg)
    }

    fn write_value(&mut self, reg: Reg, value: u8) -> Result<(), ConsoleError> {
        (**self).write_value(reg, value)
    }
}

/// Line-oriented console over a reader and a writer.
///
/// Input is tokenised on whitespace, so several values may be typed on one
/// line; each IN consumes one token.
pub struct StdConsole<R, W> {
    input: R,
    output: W,
    pending: VecDeque<String>,
    prompt: bool,
}

impl StdConsole<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> StdConsole<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            pending: VecDeque::new(),
            prompt: true,
        }
    }

    /// Disable the `Input value for Rn:` prompt.
    pub fn without_prompt(mut self) -> Self {
        self.prompt = false;
        self
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn next_token(&mut self) -> Result<String, ConsoleError> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Ok(token);
            }
            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Err(ConsoleError::Closed);
            }
            self.pending
                .extend(line.split_whitespace().map(str::to_string));
        }
    }
}

impl<R: BufRead, W: Write> Console for StdConsole<R, W> {
    fn read_value(&mut self, reg: Reg) -> Result<i64, ConsoleError> {
        if self.prompt && self.pending.is_empty() {
            write!(self.output, "Input value for {reg}: ")?;
            self.output.flush()?;
        }
        let token = self.next_token()?;
        parse_integer(&token)
    }

    fn write_value(&mut self, reg: Reg, value: u8) -> Result<(), ConsoleError> {
        writeln!(self.output, "Output {reg}: {value}")?;
        self.output.flush()?;
        Ok(())
    }
}

/// Parse one decimal integer token with an optional sign.
pub fn parse_integer(token: &str) -> Result<i64, ConsoleError> {
    token
        .parse::<i64>()
        .map_err(|_| ConsoleError::InvalidInput(token.to_string()))
}

/// Console fed from a fixed list of inputs; records every output.
#[derive(Debug, Default, Clone)]
pub struct ScriptedConsole {
    inputs: VecDeque<i64>,
    outputs: Vec<(Reg, u8)>,
}

impl ScriptedConsole {
    pub fn new(inputs: impl IntoIterator<Item = i64>) -> Self {
        Self {
            inputs: inputs.into_iter().collect(),
            outputs: Vec::new(),
        }
    }

    pub fn outputs(&self) -> &[(Reg, u8)] {
        &self.outputs
    }

    pub fn output_values(&self) -> Vec<u8> {
        self.outputs.iter().map(|(_, value)| *value).collect()
    }

    pub fn remaining_inputs(&self) -> usize {
        self.inputs.len()
    }
}

impl Console for ScriptedConsole {
    fn read_value(&mut self, _reg: Reg) -> Result<i64, ConsoleError> {
        self.inputs.pop_front().ok_or(ConsoleError::Closed)
    }

    fn write_value(&mut self, reg: Reg, value: u8) -> Result<(), ConsoleError> {
        self.outputs.push((reg, value));
        Ok(())
    }
}
