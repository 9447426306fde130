//! printf-style naming patterns expanded with an endpoint index.

use fleetload_types::ConfigurationError;

/// Widest field a conversion may pad to.
pub const MAX_WIDTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Radix {
    Decimal,
    LowerHex,
    UpperHex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Conversion {
    radix: Radix,
    width: usize,
    zero_pad: bool,
    left_align: bool,
}

impl Conversion {
    fn write(&self, out: &mut String, index: u64) {
        let digits = match self.radix {
            Radix::Decimal => index.to_string(),
            Radix::LowerHex => format!("{:x}", index),
            Radix::UpperHex => format!("{:X}", index),
        };
        let pad = self.width.saturating_sub(digits.len());
        if self.left_align {
            out.push_str(&digits);
            out.extend(std::iter::repeat(' ').take(pad));
        } else {
            let fill = if self.zero_pad { '0' } else { ' ' };
            out.extend(std::iter::repeat(fill).take(pad));
            out.push_str(&digits);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Index(Conversion),
}

/// A naming pattern such as `LESHAN%08d` or `1234567890ABCDEF%08X`.
///
/// Supports at most one integer conversion (`d`, `x` or `X`, with optional
/// `0` or `-` flag and width) and `%%` escapes. A pattern without a
/// conversion expands to itself for every index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPattern {
    source: String,
    segments: Vec<Segment>,
}

impl IndexPattern {
    pub fn parse(pattern: &str) -> Result<Self, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidPattern {
            pattern: pattern.to_string(),
            reason,
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut conversions = 0;
        let mut chars = pattern.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            if chars.peek() == Some(&'%') {
                chars.next();
                literal.push('%');
                continue;
            }

            let mut zero_pad = false;
            let mut left_align = false;
            loop {
                match chars.peek() {
                    Some('0') => zero_pad = true,
                    Some('-') => left_align = true,
                    _ => break,
                }
                chars.next();
            }
            let mut width = String::new();
            while let Some(digit) = chars.peek().filter(|c| c.is_ascii_digit()) {
                width.push(*digit);
                chars.next();
            }
            let width = if width.is_empty() {
                0
            } else {
                width
                    .parse::<usize>()
                    .ok()
                    .filter(|w| *w <= MAX_WIDTH)
                    .ok_or_else(|| {
                        invalid(format!("width {} exceeds the maximum of {}", width, MAX_WIDTH))
                    })?
            };

            let radix = match chars.next() {
                Some('d') => Radix::Decimal,
                Some('x') => Radix::LowerHex,
                Some('X') => Radix::UpperHex,
                Some(other) => return Err(invalid(format!("unsupported conversion '%{}'", other))),
                None => return Err(invalid("incomplete conversion at end of pattern".into())),
            };
            if zero_pad && left_align {
                return Err(invalid("flags '0' and '-' cannot be combined".into()));
            }
            if (zero_pad || left_align) && width == 0 {
                return Err(invalid("flag requires a width".into()));
            }

            conversions += 1;
            if conversions > 1 {
                return Err(invalid("more than one index conversion".into()));
            }
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Index(Conversion {
                radix,
                width,
                zero_pad,
                left_align,
            }));
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: pattern.to_string(),
            segments,
        })
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the pattern contains an index conversion.
    pub fn has_index(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, Segment::Index(_)))
    }

    pub fn format(&self, index: u64) -> String {
        let mut out = String::with_capacity(self.source.len() + 8);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Index(conversion) => conversion.write(&mut out, index),
            }
        }
        out
    }
}

impl std::fmt::Display for IndexPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for IndexPattern {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// `first .. last`, or just `first` for a single endpoint.
pub(crate) fn describe_range(first: &str, last: &str, endpoints: usize) -> String {
    if endpoints > 1 {
        format!("{} .. {}", first, last)
    } else {
        first.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand(pattern: &str, index: u64) -> String {
        IndexPattern::parse(pattern).unwrap().format(index)
    }

    #[test]
    fn test_default_patterns() {
        assert_eq!(expand("LESHAN%08d", 1), "LESHAN00000001");
        assert_eq!(expand("LESHAN%08d", 123456789), "LESHAN123456789");
        assert_eq!(expand("1234567890ABCDEF%08X", 255), "1234567890ABCDEF000000FF");
    }

    #[test]
    fn test_widths_and_flags() {
        assert_eq!(expand("[%5d]", 7), "[    7]");
        assert_eq!(expand("[%-5d]", 7), "[7    ]");
        assert_eq!(expand("dev-%x", 255), "dev-ff");
        assert_eq!(expand("%d", 42), "42");
    }

    #[test]
    fn test_escapes_and_constants() {
        assert_eq!(expand("100%%-%d", 3), "100%-3");
        let constant = IndexPattern::parse("fixed").unwrap();
        assert!(!constant.has_index());
        assert_eq!(constant.format(9), "fixed");
    }

    #[test]
    fn test_invalid_patterns() {
        for (pattern, reason) in [
            ("dev-%s", "unsupported conversion '%s'"),
            ("dev-%", "incomplete conversion at end of pattern"),
            ("%d-%d", "more than one index conversion"),
            ("%0d", "flag requires a width"),
            ("dev-%65d", "width 65 exceeds the maximum of 64"),
            (
                "%999999999999999999999999d",
                "width 999999999999999999999999 exceeds the maximum of 64",
            ),
        ] {
            assert_eq!(
                IndexPattern::parse(pattern),
                Err(ConfigurationError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: reason.to_string(),
                }),
                "pattern {}",
                pattern
            );
        }
    }

    #[test]
    fn test_widest_field() {
        let padded = expand("%064X", 0xAB);
        assert_eq!(padded.len(), MAX_WIDTH);
        assert!(padded.ends_with("000AB"));
    }

    #[test]
    fn test_describe_range() {
        assert_eq!(describe_range("a", "a", 1), "a");
        assert_eq!(describe_range("a", "c", 3), "a .. c");
    }
}
