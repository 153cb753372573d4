//! Response classification. Tags records hidden; never drops them.

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender};
use log::debug;
use regex::bytes::Regex;
use std::collections::HashSet;
use std::str::FromStr;

use crate::Response;
use crate::engine::extract::compile_patterns;
use crate::error::PipelineError;

use super::context::{CancelToken, Delivery, recv_or_cancel, send_or_cancel};

/// A pure predicate over a response. `reject` = hide.
pub trait Filter: Send + Sync {
    fn reject(&self, response: &Response) -> bool;
}

/// Inclusive size range; a missing bound is open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizeRange {
    pub min: Option<usize>,
    pub max: Option<usize>,
}

impl SizeRange {
    pub fn contains(&self, n: usize) -> bool {
        self.min.is_none_or(|min| n >= min) && self.max.is_none_or(|max| n <= max)
    }
}

impl FromStr for SizeRange {
    type Err = PipelineError;

    /// `N`, `A-B`, `A-` or `-B`.
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = || PipelineError::InvalidSizeSpec {
            spec: spec.to_string(),
        };
        let num = |s: &str| s.trim().parse::<usize>().map_err(|_| invalid());
        let spec_t = spec.trim();
        let range = match spec_t.split_once('-') {
            None => {
                let n = num(spec_t)?;
                SizeRange {
                    min: Some(n),
                    max: Some(n),
                }
            }
            Some(("", "")) => return Err(invalid()),
            Some(("", max)) => SizeRange {
                min: None,
                max: Some(num(max)?),
            },
            Some((min, "")) => SizeRange {
                min: Some(num(min)?),
                max: None,
            },
            Some((min, max)) => SizeRange {
                min: Some(num(min)?),
                max: Some(num(max)?),
            },
        };
        if let (Some(min), Some(max)) = (range.min, range.max)
            && min > max
        {
            return Err(invalid());
        }
        Ok(range)
    }
}

pub fn parse_size_ranges(specs: &[String]) -> Result<Vec<SizeRange>, PipelineError> {
    specs.iter().map(|s| s.parse()).collect()
}

/// Hide when the status is in the set.
pub struct StatusCode(pub HashSet<u16>);

impl Filter for StatusCode {
    fn reject(&self, r: &Response) -> bool {
        self.0.contains(&r.status)
    }
}

/// Hide when header size or body size falls in any configured range.
pub struct Size {
    pub header: Vec<SizeRange>,
    pub body: Vec<SizeRange>,
}

impl Filter for Size {
    fn reject(&self, r: &Response) -> bool {
        self.header.iter().any(|s| s.contains(r.header_bytes))
            || self.body.iter().any(|s| s.contains(r.body_bytes))
    }
}

fn matches_any(patterns: &[Regex], r: &Response) -> bool {
    patterns
        .iter()
        .any(|re| re.is_match(r.raw_header.as_bytes()) || re.is_match(&r.body))
}

/// Hide when any pattern matches the header block or the captured body.
pub struct RejectPattern(pub Vec<Regex>);

impl Filter for RejectPattern {
    fn reject(&self, r: &Response) -> bool {
        matches_any(&self.0, r)
    }
}

/// Hide unless at least one pattern matches the header block or the captured body.
pub struct AcceptPattern(pub Vec<Regex>);

impl Filter for AcceptPattern {
    fn reject(&self, r: &Response) -> bool {
        !matches_any(&self.0, r)
    }
}

/// The ordered filter chain.
#[derive(Default)]
pub struct Classifier {
    filters: Vec<Box<dyn Filter>>,
}

impl Classifier {
    /// Build the chain from raw settings. Every spec and pattern is validated here.
    pub fn compile(
        hide_status: &[u16],
        hide_header_size: &[String],
        hide_body_size: &[String],
        hide_pattern: &[String],
        show_pattern: &[String],
    ) -> Result<Self, PipelineError> {
        let mut filters: Vec<Box<dyn Filter>> = Vec::new();
        if !hide_status.is_empty() {
            filters.push(Box::new(StatusCode(hide_status.iter().copied().collect())));
        }
        let header = parse_size_ranges(hide_header_size)?;
        let body = parse_size_ranges(hide_body_size)?;
        if !header.is_empty() || !body.is_empty() {
            filters.push(Box::new(Size { header, body }));
        }
        if !hide_pattern.is_empty() {
            filters.push(Box::new(RejectPattern(compile_patterns(hide_pattern)?)));
        }
        if !show_pattern.is_empty() {
            filters.push(Box::new(AcceptPattern(compile_patterns(show_pattern)?)));
        }
        Ok(Self { filters })
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// OR of every rule.
    pub fn is_hidden(&self, r: &Response) -> bool {
        self.filters.iter().any(|f| f.reject(r))
    }

    /// Tag and forward every record, exactly once each, until input closes.
    pub fn run(
        &self,
        input: Receiver<Response>,
        output: Sender<Response>,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut seen = 0_usize;
        while let Some(mut response) = recv_or_cancel(&input, cancel) {
            response.hidden = self.is_hidden(&response);
            match send_or_cancel(&output, response, cancel) {
                Delivery::Sent => seen += 1,
                Delivery::Cancelled => break,
                Delivery::Closed => return Err(PipelineError::Disconnected("mark").into()),
            }
        }
        debug!("mark: {} records classified", seen);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(status: u16, body: &str) -> Response {
        Response {
            status,
            body_bytes: body.len(),
            body: body.as_bytes().to_vec(),
            raw_header: "HTTP/1.1 200 OK\r\nServer: test\r\n\r\n".into(),
            ..Response::default()
        }
    }

    #[test]
    fn size_range_forms() {
        let p = |s: &str| s.parse::<SizeRange>().unwrap();
        assert_eq!(p("12"), SizeRange { min: Some(12), max: Some(12) });
        assert_eq!(p("1-5"), SizeRange { min: Some(1), max: Some(5) });
        assert_eq!(p("7-"), SizeRange { min: Some(7), max: None });
        assert_eq!(p("-9"), SizeRange { min: None, max: Some(9) });
        for bad in ["", "-", "a", "5-1", "1-2-3"] {
            assert!(bad.parse::<SizeRange>().is_err(), "{bad:?}");
        }
    }

    #[test]
    fn open_ranges_contain_their_side() {
        let lower: SizeRange = "100-".parse().unwrap();
        assert!(lower.contains(100) && lower.contains(usize::MAX) && !lower.contains(99));
        let upper: SizeRange = "-100".parse().unwrap();
        assert!(upper.contains(0) && upper.contains(100) && !upper.contains(101));
    }

    #[test]
    fn pattern_matches_header_block_too() {
        let c = Classifier::compile(&[], &[], &[], &["Server: test".into()], &[]).unwrap();
        assert!(c.is_hidden(&resp(200, "nothing here")));
    }

    #[test]
    fn show_pattern_hides_non_matching() {
        let c = Classifier::compile(&[], &[], &[], &[], &["admin".into()]).unwrap();
        assert!(c.is_hidden(&resp(200, "user page")));
        assert!(!c.is_hidden(&resp(200, "admin page")));
    }

    #[test]
    fn empty_chain_shows_everything() {
        let c = Classifier::default();
        assert!(c.is_empty());
        assert!(!c.is_hidden(&resp(500, "")));
    }
}
