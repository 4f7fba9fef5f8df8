//! Macro strings: the `%{...}` expansion language used by `exists`, the domain-spec
//! of `include`/`a`/`mx`/`ptr`/`exists`, and the `exp` modifier (RFC 4408 §8).

use std::fmt;
use std::net::IpAddr;

use crate::ip;

fn starts_with_number(input: &str) -> Result<(Option<u32>, &str), String> {
    let i = input
        .find(|c: char| !c.is_numeric())
        .unwrap_or(input.len());
    if i == 0 {
        return Ok((None, input));
    }
    let number = input[..i]
        .parse::<u32>()
        .map_err(|err| format!("error parsing transformer digits in {input}: {err}"))?;
    Ok((Some(number), &input[i..]))
}

/// The fields a macro string may draw on. `c`, `r` and `t` are only meaningful while
/// expanding an `exp` explanation string; `MacroString::expand` rejects them elsewhere.
pub(crate) struct ExpandContext<'a> {
    pub sender: &'a str,
    pub local_part: &'a str,
    pub sender_domain: &'a str,
    pub domain: &'a str,
    pub client_ip: IpAddr,
    pub helo_domain: Option<&'a str>,
    pub relaying_host_name: &'a str,
    pub now_unix: u64,
    pub is_explanation: bool,
    /// The `%{p}` value, resolved ahead of time via the same validated-PTR search the
    /// `ptr` mechanism uses (RFC 4408 §8.1/§10.2). `None` becomes the literal `unknown`.
    pub validated_ptr_name: Option<&'a str>,
}

/// A parsed macro string: literal runs interleaved with `%{...}` terms, retained in
/// declaration order so it can be re-expanded against many contexts without reparsing.
#[derive(Debug, Clone)]
pub(crate) struct MacroString {
    elements: Vec<MacroElement>,
}

impl MacroString {
    pub(crate) fn parse(s: &str) -> Result<Self, String> {
        let mut elements = vec![];

        fn add_literal(elements: &mut Vec<MacroElement>, literal: &str) {
            match elements.last_mut() {
                Some(MacroElement::Literal(prior)) => prior.push_str(literal),
                _ => elements.push(MacroElement::Literal(literal.to_string())),
            }
        }

        fn is_macro_literal(c: char) -> bool {
            let c = c as u32;
            (0x21..=0x24).contains(&c) || (0x26..=0x7e).contains(&c)
        }

        let mut s = s;
        while !s.is_empty() {
            if s.starts_with("%%") {
                add_literal(&mut elements, "%");
                s = &s[2..];
                continue;
            }
            if s.starts_with("%_") {
                add_literal(&mut elements, " ");
                s = &s[2..];
                continue;
            }
            if s.starts_with("%-") {
                add_literal(&mut elements, "%20");
                s = &s[2..];
                continue;
            }
            if s.starts_with("%{") {
                if s.len() < 4 {
                    return Err(format!("unexpected end of input in {s}"));
                }

                let (name, url_escape) = MacroName::parse(
                    s.chars()
                        .nth(2)
                        .ok_or_else(|| format!("unexpected end of input in {s}"))?,
                )?;

                let mut transformer_digits = None;
                let mut reverse = false;

                let remain = if let Ok((n, r)) = starts_with_number(&s[3..]) {
                    transformer_digits = n;
                    r
                } else {
                    &s[3..]
                };

                // RFC 4408 §8.1: DIGITS is 1-128; `%{d0}` and `%{d129}` are syntax errors.
                if let Some(n) = transformer_digits {
                    if n == 0 || n > 128 {
                        return Err(format!("transformer digits out of range (1-128) in {s}"));
                    }
                }

                let delimiters = if remain.starts_with('r') {
                    reverse = true;
                    &remain[1..]
                } else {
                    remain
                };

                let (delimiters, remain) = delimiters
                    .split_once('}')
                    .ok_or_else(|| format!("expected '}}' to close macro in {s}"))?;

                elements.push(MacroElement::Macro(MacroTerm {
                    name,
                    transformer_digits,
                    reverse,
                    url_escape,
                    delimiters: delimiters.to_string(),
                }));

                s = remain;
                continue;
            }

            if !is_macro_literal(s.chars().next().unwrap()) {
                return Err(format!("invalid macro char in {s}"));
            }

            add_literal(&mut elements, &s[0..1]);
            s = &s[1..];
        }

        Ok(Self { elements })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Whether this macro string contains a `%{p}` term, i.e. whether expanding it
    /// requires the validated-PTR search to have already run.
    pub(crate) fn needs_validated_ptr(&self) -> bool {
        self.elements.iter().any(|e| {
            matches!(e, MacroElement::Macro(m) if m.name == MacroName::ValidatedDomainName)
        })
    }

    pub(crate) fn expand(&self, cx: &ExpandContext<'_>) -> Result<String, String> {
        let (mut result, mut buf) = (String::new(), String::new());
        for element in &self.elements {
            let m = match element {
                MacroElement::Literal(t) => {
                    result.push_str(t);
                    continue;
                }
                MacroElement::Macro(m) => m,
            };

            if matches!(
                m.name,
                MacroName::ClientIpPlain | MacroName::RelayingHostName | MacroName::Timestamp
            ) && !cx.is_explanation
            {
                return Err(format!(
                    "macro letter {} is only valid in explanation text",
                    m.name.as_char()
                ));
            }

            buf.clear();
            match m.name {
                MacroName::Sender => buf.push_str(cx.sender),
                MacroName::LocalPart => buf.push_str(cx.local_part),
                MacroName::SenderDomain => buf.push_str(cx.sender_domain),
                MacroName::Domain => buf.push_str(cx.domain),
                MacroName::Ip => buf.push_str(&ip::macro_ip_literal(cx.client_ip)),
                MacroName::ValidatedDomainName => {
                    buf.push_str(cx.validated_ptr_name.unwrap_or("unknown"))
                }
                MacroName::ReverseDnsZone => buf.push_str(ip::reverse_dns_keyword(cx.client_ip)),
                MacroName::HeloDomain => buf.push_str(cx.helo_domain.unwrap_or("unknown")),
                MacroName::ClientIpPlain => buf.push_str(&ip::plain_literal(cx.client_ip)),
                MacroName::RelayingHostName => buf.push_str(cx.relaying_host_name),
                MacroName::Timestamp => {
                    use std::fmt::Write as _;
                    let _ = write!(buf, "{}", cx.now_unix);
                }
            }

            let delimiters = if m.delimiters.is_empty() {
                "."
            } else {
                &m.delimiters
            };

            let mut tokens: Vec<&str> = buf.split(|c| delimiters.contains(c)).collect();

            if m.reverse {
                tokens.reverse();
            }

            if let Some(n) = m.transformer_digits {
                let n = n as usize;
                while tokens.len() > n {
                    tokens.remove(0);
                }
            }

            let output = tokens.join(".");

            if m.url_escape {
                // RFC 7208 §7.3: uppercase macros expand like their lowercase
                // equivalents and are then URL-escaped (unreserved set per RFC 3986 §2.3).
                for c in output.chars() {
                    if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~') {
                        result.push(c);
                    } else {
                        let mut bytes = [0u8; 4];
                        for b in c.encode_utf8(&mut bytes).bytes() {
                            use std::fmt::Write as _;
                            let _ = write!(result, "%{b:02x}");
                        }
                    }
                }
            } else {
                result.push_str(&output);
            }
        }

        Ok(result)
    }
}

impl fmt::Display for MacroString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in &self.elements {
            match element {
                MacroElement::Literal(lit) => write!(f, "{lit}")?,
                MacroElement::Macro(term) => write!(f, "{term}")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum MacroElement {
    Literal(String),
    Macro(MacroTerm),
}

#[derive(Debug, Clone)]
struct MacroTerm {
    name: MacroName,
    transformer_digits: Option<u32>,
    url_escape: bool,
    reverse: bool,
    delimiters: String,
}

impl fmt::Display for MacroTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = if self.url_escape {
            self.name.as_char().to_ascii_uppercase()
        } else {
            self.name.as_char()
        };
        write!(f, "%{{{letter}{}", self.delimiters)?;
        if let Some(digits) = self.transformer_digits {
            write!(f, "{digits}")?;
        }
        if self.reverse {
            f.write_str("r")?;
        }
        f.write_str("}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MacroName {
    Sender,
    LocalPart,
    SenderDomain,
    Domain,
    Ip,
    ValidatedDomainName,
    ReverseDnsZone,
    HeloDomain,
    ClientIpPlain,
    RelayingHostName,
    Timestamp,
}

impl MacroName {
    fn parse(c: char) -> Result<(Self, bool), String> {
        let escape = c.is_ascii_uppercase();
        let name = match c.to_ascii_lowercase() {
            's' => Self::Sender,
            'l' => Self::LocalPart,
            'o' => Self::SenderDomain,
            'd' => Self::Domain,
            'i' => Self::Ip,
            'p' => Self::ValidatedDomainName,
            'v' => Self::ReverseDnsZone,
            'h' => Self::HeloDomain,
            'c' => Self::ClientIpPlain,
            'r' => Self::RelayingHostName,
            't' => Self::Timestamp,
            _ => return Err(format!("invalid macro letter {c}")),
        };
        Ok((name, escape))
    }

    fn as_char(&self) -> char {
        match self {
            Self::Sender => 's',
            Self::LocalPart => 'l',
            Self::SenderDomain => 'o',
            Self::Domain => 'd',
            Self::Ip => 'i',
            Self::ValidatedDomainName => 'p',
            Self::ReverseDnsZone => 'v',
            Self::HeloDomain => 'h',
            Self::ClientIpPlain => 'c',
            Self::RelayingHostName => 'r',
            Self::Timestamp => 't',
        }
    }
}
