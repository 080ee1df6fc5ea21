//! Admission control for input streams.
//!
//! A filter is consulted for every class descriptor, array, object and back-reference the
//! reader resolves. It sees the candidate class, the requested array length, the number of
//! references read so far, the current nesting depth and the bytes consumed. A
//! [`FilterStatus::Rejected`] verdict (or an error) aborts the read with an invalid-class error.
//!
//! Streams without a filter of their own use the process-wide one, set with
//! [`set_global_filter`] or taken from the `OBJSTREAM_SERIAL_FILTER` environment variable.
//!
//! # Pattern syntax
//!
//! ```text
//! maxdepth=20;maxarray=100000;demo.model.**;java.lang.*;!*
//! ```
//!
//! Entries are separated by `;`. `maxdepth=`, `maxrefs=`, `maxbytes=` and `maxarray=` set
//! limits. Any other entry is a class pattern, optionally negated with `!`:
//!
//! | Pattern | Matches |
//! |---------|---------|
//! | `a.b.C` | exactly that class |
//! | `a.b.*` | classes in package `a.b` |
//! | `a.b.**` | classes in `a.b` and its subpackages |
//! | `Prefix*` | names starting with `Prefix` |
//! | `*` | every class |
//!
//! The first matching class pattern decides. Arrays are checked by their element class;
//! primitive arrays only against the limits.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::constants::SERIAL_FILTER_ENV;
use crate::desc::ClassDesc;
use crate::error::{Result, StreamError};

/// Verdict of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStatus {
    /// No opinion; the read proceeds.
    Undecided,
    /// Explicitly accepted.
    Allowed,
    /// Rejected; the read fails.
    Rejected,
}

/// What a filter is asked about.
#[derive(Debug, Clone, Copy)]
pub struct FilterInfo<'a> {
    /// The candidate class; `None` for back-references.
    pub class: Option<&'a ClassDesc>,
    /// Requested length for arrays, `-1` otherwise.
    pub array_length: i64,
    /// Object references read so far.
    pub references: u64,
    /// Current nesting depth.
    pub depth: u64,
    /// Bytes consumed from the source so far.
    pub stream_bytes: u64,
}

/// An admission-control predicate.
pub trait ObjectInputFilter: Send + Sync {
    /// Judges one resolution step.
    fn check_input(&self, info: &FilterInfo<'_>) -> Result<FilterStatus>;
}

impl<F> ObjectInputFilter for F
where
    F: Fn(&FilterInfo<'_>) -> Result<FilterStatus> + Send + Sync,
{
    fn check_input(&self, info: &FilterInfo<'_>) -> Result<FilterStatus> {
        self(info)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ClassPattern {
    Exact(String),
    Package(String),
    Subpackages(String),
    Prefix(String),
    Any,
}

impl ClassPattern {
    fn matches(&self, name: &str) -> bool {
        match self {
            Self::Exact(n) => name == n,
            Self::Package(pkg) => name
                .strip_prefix(pkg.as_str())
                .is_some_and(|rest| !rest.is_empty() && !rest.contains('.')),
            Self::Subpackages(pkg) => name.starts_with(pkg.as_str()),
            Self::Prefix(p) => name.starts_with(p.as_str()),
            Self::Any => true,
        }
    }
}

/// Filter built from a pattern string.
#[derive(Clone, PartialEq, Eq)]
pub struct PatternFilter {
    pattern: String,
    max_depth: Option<u64>,
    max_refs: Option<u64>,
    max_bytes: Option<u64>,
    max_array: Option<u64>,
    classes: Vec<(ClassPattern, FilterStatus)>,
}

impl fmt::Debug for PatternFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PatternFilter").field(&self.pattern).finish()
    }
}

impl PatternFilter {
    /// Parses a pattern string.
    pub fn parse(pattern: &str) -> Result<Self> {
        let mut filter = Self {
            pattern: pattern.to_string(),
            max_depth: None,
            max_refs: None,
            max_bytes: None,
            max_array: None,
            classes: Vec::new(),
        };
        for entry in pattern.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            if let Some((key, value)) = entry.split_once('=') {
                let limit = value.trim().parse::<u64>().map_err(|_| {
                    StreamError::IllegalState(format!("invalid filter limit: {entry}"))
                })?;
                let slot = match key.trim() {
                    "maxdepth" => &mut filter.max_depth,
                    "maxrefs" => &mut filter.max_refs,
                    "maxbytes" => &mut filter.max_bytes,
                    "maxarray" => &mut filter.max_array,
                    _ => {
                        return Err(StreamError::IllegalState(format!(
                            "unknown filter limit: {entry}"
                        )));
                    }
                };
                *slot = Some(limit);
                continue;
            }
            let (status, body) = match entry.strip_prefix('!') {
                Some(rest) => (FilterStatus::Rejected, rest),
                None => (FilterStatus::Allowed, entry),
            };
            let class = if body == "*" {
                ClassPattern::Any
            } else if let Some(pkg) = body.strip_suffix(".**") {
                ClassPattern::Subpackages(format!("{pkg}."))
            } else if let Some(pkg) = body.strip_suffix(".*") {
                ClassPattern::Package(format!("{pkg}."))
            } else if let Some(prefix) = body.strip_suffix('*') {
                ClassPattern::Prefix(prefix.to_string())
            } else if body.is_empty() || body.contains('*') {
                return Err(StreamError::IllegalState(format!(
                    "invalid filter pattern: {entry}"
                )));
            } else {
                ClassPattern::Exact(body.to_string())
            };
            filter.classes.push((class, status));
        }
        Ok(filter)
    }

    /// The pattern this filter was parsed from.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    fn exceeds(limit: Option<u64>, value: u64) -> bool {
        limit.is_some_and(|max| value > max)
    }
}

impl ObjectInputFilter for PatternFilter {
    fn check_input(&self, info: &FilterInfo<'_>) -> Result<FilterStatus> {
        if Self::exceeds(self.max_refs, info.references)
            || Self::exceeds(self.max_depth, info.depth)
            || Self::exceeds(self.max_bytes, info.stream_bytes)
        {
            return Ok(FilterStatus::Rejected);
        }
        let Some(class) = info.class else {
            return Ok(FilterStatus::Undecided);
        };
        let mut name = class.name();
        if name.starts_with('[') {
            if info.array_length >= 0 && Self::exceeds(self.max_array, info.array_length as u64) {
                return Ok(FilterStatus::Rejected);
            }
            match crate::desc::array_component_class(name) {
                Some(component) => name = component,
                None => return Ok(FilterStatus::Undecided),
            }
        }
        Ok(self
            .classes
            .iter()
            .find(|(pattern, _)| pattern.matches(name))
            .map_or(FilterStatus::Undecided, |(_, status)| *status))
    }
}

static GLOBAL_FILTER: OnceLock<Option<Arc<dyn ObjectInputFilter>>> = OnceLock::new();

/// Installs the process-wide filter. Fails once a global filter has been set or initialised.
pub fn set_global_filter(filter: Arc<dyn ObjectInputFilter>) -> Result<()> {
    GLOBAL_FILTER
        .set(Some(filter))
        .map_err(|_| StreamError::IllegalState("global filter already set".to_string()))
}

/// The process-wide filter, initialised from `OBJSTREAM_SERIAL_FILTER` on first use.
pub fn global_filter() -> Option<Arc<dyn ObjectInputFilter>> {
    GLOBAL_FILTER.get_or_init(filter_from_env).clone()
}

fn filter_from_env() -> Option<Arc<dyn ObjectInputFilter>> {
    let pattern = std::env::var(SERIAL_FILTER_ENV).ok()?;
    if pattern.trim().is_empty() {
        return None;
    }
    match PatternFilter::parse(&pattern) {
        Ok(filter) => {
            log::debug!("[reader] global filter from environment: {pattern}");
            Some(Arc::new(filter))
        }
        Err(e) => {
            log::warn!("[reader] ignoring {SERIAL_FILTER_ENV}: {e}");
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::desc::{ClassDescBuilder, lookup_array};

    fn info(class: Option<&ClassDesc>) -> FilterInfo<'_> {
        FilterInfo {
            class,
            array_length: -1,
            references: 1,
            depth: 1,
            stream_bytes: 10,
        }
    }

    fn check(filter: &PatternFilter, name: &str) -> FilterStatus {
        let d = ClassDescBuilder::new(name).build().unwrap();
        filter.check_input(&info(Some(&d))).unwrap()
    }

    #[test]
    fn class_patterns() {
        let f =
            PatternFilter::parse("demo.model.*;demo.deep.**;Acme*;!demo.model.Secret;!*").unwrap();
        assert_eq!(check(&f, "demo.model.Point"), FilterStatus::Allowed);
        assert_eq!(check(&f, "demo.model.sub.Point"), FilterStatus::Rejected);
        assert_eq!(check(&f, "demo.deep.a.b.C"), FilterStatus::Allowed);
        assert_eq!(check(&f, "AcmeWidget"), FilterStatus::Allowed);
        // The first match wins, so the later negation never applies.
        assert_eq!(check(&f, "demo.model.Secret"), FilterStatus::Allowed);
        assert_eq!(check(&f, "other.Type"), FilterStatus::Rejected);
    }

    #[test]
    fn limits() {
        let f = PatternFilter::parse("maxdepth=2;maxrefs=5;maxarray=3").unwrap();
        let mut i = info(None);
        assert_eq!(f.check_input(&i).unwrap(), FilterStatus::Undecided);
        i.depth = 3;
        assert_eq!(f.check_input(&i).unwrap(), FilterStatus::Rejected);

        let arr = lookup_array("[I").unwrap();
        let mut i = info(Some(&arr));
        i.array_length = 3;
        assert_eq!(f.check_input(&i).unwrap(), FilterStatus::Undecided);
        i.array_length = 4;
        assert_eq!(f.check_input(&i).unwrap(), FilterStatus::Rejected);
    }

    #[test]
    fn arrays_are_checked_by_element_class() {
        let f = PatternFilter::parse("!java.lang.String").unwrap();
        let arr = lookup_array("[[Ljava.lang.String;").unwrap();
        assert_eq!(
            f.check_input(&info(Some(&arr))).unwrap(),
            FilterStatus::Rejected
        );
    }

    #[test]
    fn malformed_patterns() {
        assert!(PatternFilter::parse("maxdepth=x").is_err());
        assert!(PatternFilter::parse("maxwidth=3").is_err());
        assert!(PatternFilter::parse("a*b").is_err());
        assert!(PatternFilter::parse(" ; ;").is_ok());
    }
}
