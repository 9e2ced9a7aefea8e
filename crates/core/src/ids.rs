#![forbid(unsafe_code)]

/// Pattern every lane and workspace name must match. Quoted verbatim in
/// error messages so callers see exactly what is allowed.
pub const NAME_PATTERN: &str = "^[A-Za-z0-9][A-Za-z0-9._-]*$";

const MAX_NAME_LEN: usize = 128;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NameError {
    Empty,
    TooLong,
    InvalidFirstChar,
    InvalidChar { ch: char, index: usize },
    DoubleDot,
}

impl std::fmt::Display for NameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "name must not be empty (allowed: {NAME_PATTERN})"),
            Self::TooLong => write!(f, "name exceeds {MAX_NAME_LEN} characters"),
            Self::InvalidFirstChar => {
                write!(f, "name must start with a letter or digit (allowed: {NAME_PATTERN})")
            }
            Self::InvalidChar { ch, index } => write!(
                f,
                "invalid character {ch:?} at index {index} (allowed: {NAME_PATTERN})"
            ),
            Self::DoubleDot => write!(f, "name must not contain '..'"),
        }
    }
}

impl std::error::Error for NameError {}

fn validate_name(value: &str) -> Result<(), NameError> {
    if value.is_empty() {
        return Err(NameError::Empty);
    }
    if value.len() > MAX_NAME_LEN {
        return Err(NameError::TooLong);
    }
    for (index, ch) in value.chars().enumerate() {
        if index == 0 {
            if !ch.is_ascii_alphanumeric() {
                return Err(NameError::InvalidFirstChar);
            }
            continue;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
            continue;
        }
        return Err(NameError::InvalidChar { ch, index });
    }
    if value.contains("..") {
        return Err(NameError::DoubleDot);
    }
    Ok(())
}

/// A validated lane name. No path separators, no `..`, no NULs: the
/// character set alone rules those out, the explicit checks document it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LaneName(String);

impl LaneName {
    pub fn try_new(value: impl Into<String>) -> Result<Self, NameError> {
        let value = value.into();
        validate_name(&value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for LaneName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated workspace name. Same grammar as lane names; the workspace
/// manager additionally confirms the derived path stays inside the
/// workspaces directory.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WorkspaceName(String);

impl WorkspaceName {
    pub fn try_new(value: impl Into<String>) -> Result<Self, NameError> {
        let value = value.into();
        validate_name(&value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for WorkspaceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        for name in ["main", "feature-auth", "agent.7", "A_1"] {
            assert!(LaneName::try_new(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_separators_and_traversal() {
        assert!(matches!(
            LaneName::try_new("feat/auth"),
            Err(NameError::InvalidChar { ch: '/', .. })
        ));
        assert!(matches!(
            LaneName::try_new("a\\b"),
            Err(NameError::InvalidChar { ch: '\\', .. })
        ));
        assert_eq!(LaneName::try_new("a..b"), Err(NameError::DoubleDot));
        assert!(matches!(
            WorkspaceName::try_new("ws\0"),
            Err(NameError::InvalidChar { ch: '\0', .. })
        ));
    }

    #[test]
    fn rejects_bad_first_char() {
        assert_eq!(LaneName::try_new(".hidden"), Err(NameError::InvalidFirstChar));
        assert_eq!(LaneName::try_new("-x"), Err(NameError::InvalidFirstChar));
        assert_eq!(LaneName::try_new(""), Err(NameError::Empty));
    }

    #[test]
    fn error_message_names_the_pattern() {
        let err = LaneName::try_new("bad/name").unwrap_err();
        assert!(err.to_string().contains(NAME_PATTERN));
    }
}
