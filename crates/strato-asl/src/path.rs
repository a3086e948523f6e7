// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reference paths used as state input/output selectors.
//!
//! A reference path is a `$`-rooted selector into a JSON document, in the
//! restricted JSONPath dialect the state language allows for I/O binding.
//! The orchestrator core never evaluates paths; it only validates and
//! carries them.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{AslError, Result};

/// Characters a reference path may never contain.
const FORBIDDEN: [char; 4] = ['@', ',', ':', '?'];

/// A validated `$`-rooted reference path.
///
/// Construction goes through [`ReferencePath::parse`], so a value of this
/// type is always well-formed. The path is opaque thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ReferencePath(String);

impl ReferencePath {
    /// Parse and validate a reference path.
    ///
    /// Rejects inputs that do not start with `$` and inputs containing any
    /// of `@`, `,`, `:`, `?`.
    pub fn parse(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if !s.starts_with('$') {
            return Err(AslError::PathMissingRoot(s));
        }
        if s.contains(FORBIDDEN) {
            return Err(AslError::PathForbiddenCharacter(s));
        }
        Ok(Self(s))
    }

    /// The raw selector text, including the leading `$`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The selector with the `$.` root stripped, for callers that index
    /// a parameter object by top-level field name.
    pub fn field_name(&self) -> &str {
        self.0.strip_prefix("$.").unwrap_or(&self.0)
    }
}

impl AsRef<str> for ReferencePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReferencePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ReferencePath {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ReferencePath::parse(s).map_err(serde::de::Error::custom)
    }
}
