use crate::policy::PolicyError;

use regex::{Regex, RegexBuilder};

/// Process-wide rules for spotting password-like fields and user-like
/// tables. Each of the two checks is either a case-insensitive substring
/// test or a regex, set from configuration; the defaults are the substring
/// forms.
#[derive(Debug, Clone)]
pub struct SensitiveNames {
    password_regex: Option<Regex>,
    password_substring: Option<String>,
    user_regex: Option<Regex>,
    user_substring: Option<String>,
}

impl Default for SensitiveNames {
    fn default() -> Self {
        SensitiveNames {
            password_regex: None,
            password_substring: Some("password".to_string()),
            user_regex: None,
            user_substring: Some("user".to_string()),
        }
    }
}

fn build_regex(pattern: &str) -> Result<Regex, PolicyError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| PolicyError::BadPattern {
            pattern: pattern.to_string(),
            source,
        })
}

impl SensitiveNames {
    pub fn from_options(
        password_regex: Option<&str>,
        password_substring: Option<&str>,
        user_regex: Option<&str>,
        user_substring: Option<&str>,
    ) -> Result<Self, PolicyError> {
        if password_regex.is_some() && password_substring.is_some() {
            return Err(PolicyError::ConflictingMatchers);
        }
        if user_regex.is_some() && user_substring.is_some() {
            return Err(PolicyError::ConflictingMatchers);
        }
        let defaults = SensitiveNames::default();

        let (password_regex, password_substring) = match (password_regex, password_substring) {
            (Some(re), None) => (Some(build_regex(re)?), None),
            (None, Some(sub)) => (None, Some(sub.to_lowercase())),
            (None, None) => (defaults.password_regex, defaults.password_substring),
            (Some(_), Some(_)) => unreachable!(),
        };
        let (user_regex, user_substring) = match (user_regex, user_substring) {
            (Some(re), None) => (Some(build_regex(re)?), None),
            (None, Some(sub)) => (None, Some(sub.to_lowercase())),
            (None, None) => (defaults.user_regex, defaults.user_substring),
            (Some(_), Some(_)) => unreachable!(),
        };

        Ok(SensitiveNames {
            password_regex,
            password_substring,
            user_regex,
            user_substring,
        })
    }

    pub fn is_password_field(&self, field: &str) -> bool {
        is_match(&self.password_regex, &self.password_substring, field)
    }

    pub fn is_user_table(&self, table: &str) -> bool {
        is_match(&self.user_regex, &self.user_substring, table)
    }
}

fn is_match(regex: &Option<Regex>, substring: &Option<String>, name: &str) -> bool {
    if let Some(substring) = substring {
        return name.to_lowercase().contains(substring);
    }
    if let Some(regex) = regex {
        return regex.is_match(name);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_substrings() {
        let names = SensitiveNames::default();
        assert!(names.is_password_field("password"));
        assert!(names.is_password_field("user_Password_hash"));
        assert!(!names.is_password_field("pass"));
        assert!(names.is_user_table("users"));
        assert!(!names.is_user_table("items"));
    }

    #[test]
    fn regex_form() {
        let names =
            SensitiveNames::from_options(Some("^(pw|passwd)$"), None, None, None).unwrap();
        assert!(names.is_password_field("pw"));
        assert!(names.is_password_field("PASSWD"));
        assert!(!names.is_password_field("password"));
    }

    #[test]
    fn conflicting_matchers_are_rejected() {
        assert!(SensitiveNames::from_options(Some("x"), Some("y"), None, None).is_err());
        assert!(SensitiveNames::from_options(None, None, Some("x"), Some("y")).is_err());
    }

    #[test]
    fn bad_regex_is_rejected() {
        assert!(SensitiveNames::from_options(Some("("), None, None, None).is_err());
    }
}
