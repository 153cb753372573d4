//! Range, format and command-line helpers

use crate::error::PipelineError;

/// Parse `first-last` (inclusive). `first` may be negative: `-5-5`.
pub fn parse_range(s: &str) -> Result<(i64, i64), PipelineError> {
    let s = s.trim();
    let syntax = || PipelineError::RangeSyntax(s.to_string());
    // Skip the first char so a leading minus sign is not taken as the separator.
    let sep = s
        .char_indices()
        .skip(1)
        .find(|&(_, c)| c == '-')
        .map(|(i, _)| i)
        .ok_or_else(syntax)?;
    let first: i64 = s[..sep].trim().parse().map_err(|_| syntax())?;
    let last: i64 = s[sep + 1..].trim().parse().map_err(|_| syntax())?;
    if first > last {
        return Err(PipelineError::InvalidRange { first, last });
    }
    Ok((first, last))
}

/// Body buffer sizes are configured in MiB.
pub fn mib_to_bytes(mib: usize) -> Result<usize, PipelineError> {
    mib.checked_mul(1024 * 1024)
        .ok_or(PipelineError::BodyBufferSize(mib))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Radix {
    Dec,
    Hex,
    HexUpper,
    Oct,
    Bin,
}

/// printf-style template with exactly one integer directive (`%d`, `%x`, `%X`, `%o`, `%b`),
/// optional `0`/`-` flags and a width. `%%` is a literal percent sign.
#[derive(Clone, Debug)]
pub struct RangeFormat {
    prefix: String,
    suffix: String,
    radix: Radix,
    width: usize,
    zero_pad: bool,
    left_align: bool,
}

impl RangeFormat {
    pub fn parse(format: &str) -> Result<Self, PipelineError> {
        let err = |reason: &str| PipelineError::RangeFormat {
            format: format.to_string(),
            reason: reason.to_string(),
        };

        let mut prefix = String::new();
        let mut suffix = String::new();
        let mut directive: Option<(Radix, usize, bool, bool)> = None;
        let mut chars = format.chars().peekable();

        while let Some(c) = chars.next() {
            let out = if directive.is_some() {
                &mut suffix
            } else {
                &mut prefix
            };
            if c != '%' {
                out.push(c);
                continue;
            }
            if chars.peek() == Some(&'%') {
                chars.next();
                out.push('%');
                continue;
            }
            if directive.is_some() {
                return Err(err("more than one directive"));
            }

            let (mut zero_pad, mut left_align) = (false, false);
            while let Some(&f) = chars.peek() {
                match f {
                    '0' => zero_pad = true,
                    '-' => left_align = true,
                    _ => break,
                }
                chars.next();
            }
            let mut width = 0usize;
            while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                width = width * 10 + d as usize;
                chars.next();
            }
            let radix = match chars.next() {
                Some('d') => Radix::Dec,
                Some('x') => Radix::Hex,
                Some('X') => Radix::HexUpper,
                Some('o') => Radix::Oct,
                Some('b') => Radix::Bin,
                Some(_) => return Err(err("unsupported directive, use d, x, X, o or b")),
                None => return Err(err("incomplete directive at end")),
            };
            directive = Some((radix, width, zero_pad, left_align));
        }

        let (radix, width, zero_pad, left_align) =
            directive.ok_or_else(|| err("no integer directive"))?;
        Ok(Self {
            prefix,
            suffix,
            radix,
            width,
            zero_pad: zero_pad && !left_align,
            left_align,
        })
    }

    pub fn format(&self, n: i64) -> String {
        let abs = n.unsigned_abs();
        let digits = match self.radix {
            Radix::Dec => abs.to_string(),
            Radix::Hex => format!("{abs:x}"),
            Radix::HexUpper => format!("{abs:X}"),
            Radix::Oct => format!("{abs:o}"),
            Radix::Bin => format!("{abs:b}"),
        };
        let sign = if n < 0 { "-" } else { "" };
        let len = sign.len() + digits.len();
        let pad = self.width.saturating_sub(len);

        let mut out = String::with_capacity(self.prefix.len() + self.suffix.len() + len + pad);
        out.push_str(&self.prefix);
        if self.left_align {
            out.push_str(sign);
            out.push_str(&digits);
            out.extend(std::iter::repeat_n(' ', pad));
        } else if self.zero_pad {
            out.push_str(sign);
            out.extend(std::iter::repeat_n('0', pad));
            out.push_str(&digits);
        } else {
            out.extend(std::iter::repeat_n(' ', pad));
            out.push_str(sign);
            out.push_str(&digits);
        }
        out.push_str(&self.suffix);
        out
    }
}

/// Split a command line the way a POSIX shell would for simple cases: whitespace separates
/// words, single quotes are literal, double quotes allow `\"` and `\\`, a backslash outside
/// quotes escapes the next character. No expansion of any kind.
pub fn split_command(cmd: &str) -> Result<Vec<String>, PipelineError> {
    let invalid = || PipelineError::InvalidCommand(cmd.to_string());
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = cmd.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => word.push(c),
                        None => return Err(invalid()),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(e @ ('"' | '\\' | '$' | '`')) => word.push(e),
                            Some(other) => {
                                word.push('\\');
                                word.push(other);
                            }
                            None => return Err(invalid()),
                        },
                        Some(c) => word.push(c),
                        None => return Err(invalid()),
                    }
                }
            }
            '\\' => {
                in_word = true;
                word.push(chars.next().ok_or_else(invalid)?);
            }
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }
    if in_word {
        words.push(word);
    }
    if words.is_empty() {
        return Err(invalid());
    }
    Ok(words)
}

/// Inverse of [`split_command`] for display: quote words that need it.
pub fn join_command<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|a| {
            let a = a.as_ref();
            let plain = !a.is_empty()
                && a.chars()
                    .all(|c| c.is_ascii_alphanumeric() || "-_./:=,@%+".contains(c));
            if plain {
                a.to_string()
            } else {
                format!("'{}'", a.replace('\'', r"'\''"))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
