//! Placeholder substitution for URLs and header values.
//!
//! Any `{{name}}` occurrence is replaced by the value registered under `name`.
//! Unknown names are left verbatim, braces included.
//!
//! The process-wide table returned by [`ConstantTable::global`] is shared by
//! every default-configured [`Sender`](crate::Sender). It is guarded by an
//! `RwLock`, so it can still be written after startup.
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use lazy_static::lazy_static;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

lazy_static! {
    static ref GLOBAL_CONSTANTS: ConstantTable = ConstantTable::new();
}

/// Shared name -> value table. Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct ConstantTable {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl ConstantTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the process-wide table.
    pub fn global() -> ConstantTable {
        GLOBAL_CONSTANTS.clone()
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) -> &Self {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn remove(&self, name: &str) -> Option<String> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces every known `{{name}}` in `input`.
    ///
    /// Returns the input unchanged (borrowed) when it holds no placeholder.
    pub fn substitute<'a>(&self, input: &'a str) -> Cow<'a, str> {
        if !input.contains(OPEN) {
            return Cow::Borrowed(input);
        }

        let table = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(start) = rest.find(OPEN) {
            out.push_str(&rest[..start]);
            let after_open = &rest[start + OPEN.len()..];

            let Some(end) = after_open.find(CLOSE) else {
                // unterminated: keep the remainder as-is
                rest = &rest[start..];
                break;
            };

            let name = &after_open[..end];
            match table.get(name) {
                Some(value) => out.push_str(value),
                None => {
                    out.push_str(OPEN);
                    out.push_str(name);
                    out.push_str(CLOSE);
                }
            }
            rest = &after_open[end + CLOSE.len()..];
        }

        out.push_str(rest);
        Cow::Owned(out)
    }
}
