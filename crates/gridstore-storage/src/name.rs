//! Object names

use std::fmt;

use crate::error::StorageError;

/// A validated object name.
///
/// Names consist of ASCII letters, digits, `_` and `.` only. The bare
/// names `.` and `..` are rejected even though they fit the character
/// class, since a filesystem backend would resolve them to its root or
/// the root's parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectName(String);

impl ObjectName {
    pub fn parse(name: &str) -> Result<Self, StorageError> {
        if name.is_empty() {
            return Err(StorageError::InvalidName("name is empty".to_string()));
        }

        if let Some(c) = name.chars().find(|c| !is_name_char(*c)) {
            return Err(StorageError::InvalidName(format!(
                "'{}' contains forbidden character {:?}",
                name, c
            )));
        }

        if name == "." || name == ".." {
            return Err(StorageError::InvalidName(format!(
                "'{}' is a reserved name",
                name
            )));
        }

        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Characters allowed in an object name
pub fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
