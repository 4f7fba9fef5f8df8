//! `name=value` modifiers. RFC 4408 §4.6.2 only gives special meaning to `redirect`
//! and `exp`; every other well-formed `name=value` pair must be accepted and ignored.

use crate::macros::MacroString;

fn starts_with_ident<'a>(s: &'a str, ident: &str) -> Option<&'a str> {
    if s.len() < ident.len() {
        return None;
    }
    if s[0..ident.len()].eq_ignore_ascii_case(ident) {
        Some(&s[ident.len()..])
    } else {
        None
    }
}

#[derive(Debug)]
pub(crate) enum Modifier {
    Redirect(MacroString),
    Explanation(MacroString),
    Unknown,
}

impl Modifier {
    pub(crate) fn parse(s: &str) -> Result<Self, String> {
        if let Some(spec) = starts_with_ident(s, "redirect=") {
            return Ok(Self::Redirect(MacroString::parse(spec)?));
        }
        if let Some(spec) = starts_with_ident(s, "exp=") {
            return Ok(Self::Explanation(MacroString::parse(spec)?));
        }

        let (name, _) = s
            .split_once('=')
            .ok_or_else(|| format!("invalid modifier {s}"))?;

        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && name.chars().next().unwrap().is_ascii_alphabetic();
        if !valid {
            return Err(format!("modifier name '{name}' is invalid"));
        }

        Ok(Self::Unknown)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_redirect() {
        assert!(matches!(
            Modifier::parse("redirect=_spf.example.com").unwrap(),
            Modifier::Redirect(_)
        ));
    }

    #[test]
    fn parses_exp() {
        assert!(matches!(
            Modifier::parse("exp=explain._spf.%{d}").unwrap(),
            Modifier::Explanation(_)
        ));
    }

    #[test]
    fn unrecognized_name_value_is_ignored() {
        assert!(matches!(
            Modifier::parse("op=1").unwrap(),
            Modifier::Unknown
        ));
    }

    #[test]
    fn rejects_malformed_name() {
        assert!(Modifier::parse("1bad=x").is_err());
        assert!(Modifier::parse("noequals").is_err());
    }
}
