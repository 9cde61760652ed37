#![cfg_attr(doc, doc = include_str!("../README.md"))]

use core::fmt;

/// Bound for error sources attached to an [`Error`].
pub trait Source: std::error::Error + Sync + Send + 'static {}

impl<T> Source for T where T: std::error::Error + Sync + Send + 'static {}

/// An error carrying a static context string, a crate-specific kind and an
/// optional source.
#[derive(Debug)]
pub struct Error<Kind> {
    pub context: &'static str,
    pub kind: Kind,
    source: Option<Box<dyn std::error::Error + Sync + Send>>,
}

impl<Kind> Error<Kind> {
    #[cold]
    #[must_use]
    pub fn new(context: &'static str, kind: Kind) -> Self {
        Self {
            context,
            kind,
            source: None,
        }
    }

    #[cold]
    #[must_use]
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: Source,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn into_other_kind<OtherKind>(self) -> Error<OtherKind>
    where
        Kind: Into<OtherKind>,
    {
        Error {
            context: self.context,
            kind: self.kind.into(),
            source: self.source,
        }
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    pub fn report(&self) -> ErrorReport<'_, Kind> {
        ErrorReport(self)
    }
}

impl<Kind> fmt::Display for Error<Kind>
where
    Kind: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.context, self.kind)
    }
}

impl<Kind> std::error::Error for Error<Kind>
where
    Kind: std::error::Error,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let Some(source) = self.kind.source() {
            Some(source)
        } else if let Some(e) = &self.source {
            Some(e.as_ref())
        } else {
            None
        }
    }
}

impl<Kind> From<Error<Kind>> for std::io::Error
where
    Kind: std::error::Error + Send + Sync + 'static,
{
    fn from(error: Error<Kind>) -> Self {
        Self::other(error)
    }
}

/// Helper printing the whole cause chain of an [`Error`].
pub struct ErrorReport<'a, Kind>(&'a Error<Kind>);

impl<Kind> fmt::Display for ErrorReport<'_, Kind>
where
    Kind: std::error::Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use std::error::Error as _;

        write!(f, "{}", self.0)?;

        let mut next_source = self.0.source();

        while let Some(e) = next_source {
            write!(f, ", caused by: {e}")?;
            next_source = e.source();
        }

        Ok(())
    }
}
