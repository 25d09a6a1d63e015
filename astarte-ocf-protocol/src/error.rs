// This file is part of Astarte.
//
// Copyright 2026 SECO Mind Srl
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Errors of the resource payloads.
//!
//! The error carries what failed and a static description of the payload or field, like
//! `couldn't decode doxm`.

use std::fmt::Display;

/// Error encoding, decoding or validating a resource payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    ctx: &'static str,
}

impl Error {
    /// Create the error for the payload or field described by `ctx`.
    pub const fn new(kind: ErrorKind, ctx: &'static str) -> Self {
        Self { kind, ctx }
    }

    /// Returns what failed.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Returns the payload or field the error refers to.
    pub fn ctx(&self) -> &'static str {
        self.ctx
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.ctx)
    }
}

impl std::error::Error for Error {}

/// What failed on the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Couldn't serialize the payload to CBOR.
    Encode,
    /// Couldn't deserialize the CBOR payload or the PEM block.
    Decode,
    /// An enumerated value not defined by OCF, like an unknown `oxmsel` or `dos.s`.
    OutOfRange,
    /// A field is malformed, like a device UUID or a certificate common name.
    Invalid,
    /// The device answered with an error response code.
    ErrorResponse,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Encode => write!(f, "couldn't encode"),
            ErrorKind::Decode => write!(f, "couldn't decode"),
            ErrorKind::OutOfRange => write!(f, "value out of range"),
            ErrorKind::Invalid => write!(f, "invalid value"),
            ErrorKind::ErrorResponse => write!(f, "error response received"),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn error_display() {
        let error = Error::new(ErrorKind::Decode, "doxm");

        insta::assert_snapshot!(error, @"couldn't decode doxm");
    }

    #[test]
    fn error_kind_and_ctx() {
        let error = Error::new(ErrorKind::OutOfRange, "for OperationalState");

        assert_eq!(*error.kind(), ErrorKind::OutOfRange);
        assert_eq!(error.ctx(), "for OperationalState");
    }

    #[test]
    fn error_kind_display() {
        let kinds = [
            ErrorKind::Encode,
            ErrorKind::Decode,
            ErrorKind::OutOfRange,
            ErrorKind::Invalid,
            ErrorKind::ErrorResponse,
        ]
        .map(|kind| kind.to_string())
        .join("\n");

        insta::assert_snapshot!(kinds, @r"
        couldn't encode
        couldn't decode
        value out of range
        invalid value
        error response received
        ");
    }
}
