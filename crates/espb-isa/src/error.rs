// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

use std::any::Any;
use std::fmt::{Debug, Display};

pub trait RuntimeError: Debug + Display {
    fn get_message(&self) -> &str;
    fn as_any(&self) -> &dyn Any;
}

/// the result/exit code taxonomy of the dispatcher. carried as a plain
/// `#[repr(u16)]` value so it crosses an FFI boundary without wrapping.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok = 0,
    InvalidOperand,
    InvalidFuncIndex,
    InvalidRegisterIndex,
    InvalidGlobalIndex,
    InvalidOpcode,
    UnknownOpcode,
    TypeMismatch,
    StackOverflow,
    StackUnderflow,
    MemoryAccessOutOfBounds,
    MemoryAlloc,
    OutOfMemory,
    InstantiationFailed,
    ImportResolutionFailed,
    RuntimeErrorGeneric,
    RuntimeTrap,
    RuntimeTrapDivByZero,
    RuntimeTrapIntegerOverflow,
    RuntimeTrapBadBranchTarget,
}

/// a [`ResultCode`] paired with a human-readable message. returned by every
/// fallible operation in the dispatcher and the host-import path; there is
/// no rollback of side effects that completed before the error (spec 7 --
/// "no transactional semantics").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterError {
    pub code: ResultCode,
    message: String,
}

impl InterpreterError {
    pub fn new(code: ResultCode, message: impl Into<String>) -> Self {
        InterpreterError {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ResultCode {
        self.code
    }
}

impl Display for InterpreterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for InterpreterError {}

impl RuntimeError for InterpreterError {
    fn get_message(&self) -> &str {
        &self.message
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub type InterpretResult<T> = Result<T, InterpreterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_and_message() {
        let e = InterpreterError::new(ResultCode::RuntimeTrapDivByZero, "division by zero");
        assert_eq!(format!("{}", e), "RuntimeTrapDivByZero: division by zero");
    }
}
