//! Environment variable interpolation for config files.
//!
//! - `$VAR` or `${VAR}`: substitute, error if unset
//! - `${VAR:-default}`: default when unset or empty
//! - `${VAR-default}`: default only when unset
//! - `$$`: literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$
        |
        \$\{
            (?P<braced>[A-Za-z_][A-Za-z0-9_]*)
            (?: (?P<op>:?-) (?P<default>[^}]*) )?
        \}
        |
        \$(?P<bare>[A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("Invalid regex pattern")
});

/// Interpolate environment variables in `input`.
///
/// Every problem is collected so a config with several missing variables
/// reports all of them at once.
pub fn interpolate(input: &str) -> Result<String, Vec<String>> {
    let mut errors = Vec::new();

    let text = ENV_VAR_PATTERN.replace_all(input, |caps: &Captures| {
        let whole = &caps[0];
        if whole == "$$" {
            return "$".to_string();
        }

        let name = caps
            .name("braced")
            .or_else(|| caps.name("bare"))
            .map_or("", |m| m.as_str());
        let op = caps.name("op").map(|m| m.as_str());
        let default = caps.name("default").map(|m| m.as_str());

        match env::var(name) {
            Ok(value) if value.contains('\n') || value.contains('\r') => {
                errors.push(format!(
                    "environment variable '{name}' contains newlines, which is not allowed"
                ));
                whole.to_string()
            }
            Ok(value) if value.is_empty() && op == Some(":-") => {
                default.unwrap_or_default().to_string()
            }
            Ok(value) => value,
            Err(_) => match default {
                Some(default) => default.to_string(),
                None => {
                    errors.push(format!("environment variable '{name}' is not set"));
                    whole.to_string()
                }
            },
        }
    });

    if errors.is_empty() {
        Ok(text.into_owned())
    } else {
        Err(errors)
    }
}
