use std::fmt;

/// Run every step of a multi-step cleanup, remembering the first failure.
///
/// Steps are recorded in order and none of them is skipped because an earlier one failed. The first error is returned
/// by [`Cleanup::finish()`] once everything ran, later ones are only logged.
#[derive(Debug)]
pub(crate) struct Cleanup<E> {
    first: Option<E>,
}

impl<E: fmt::Display> Cleanup<E> {
    pub(crate) fn new() -> Self {
        Self { first: None }
    }

    /// Record the outcome of a step and hand back its value, if any.
    pub(crate) fn record<T, F: Into<E>>(&mut self, result: Result<T, F>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                let err = err.into();

                match self.first {
                    None => self.first = Some(err),
                    Some(_) => tracing::debug!("Suppressed cleanup error: {err}"),
                }

                None
            }
        }
    }

    #[inline]
    pub(crate) fn is_ok(&self) -> bool {
        self.first.is_none()
    }

    pub(crate) fn finish(self) -> Result<(), E> {
        match self.first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
