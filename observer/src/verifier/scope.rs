use crate::Error;
use std::fmt::Debug;

/// The actor and request a check is made for, attached to every mismatch it reports.
#[derive(Clone, Copy)]
pub(crate) struct Scope<'a> {
    pub actor: &'a str,
    pub request_id: &'a str,
}

impl<'a> Scope<'a> {
    pub fn new(actor: &'a str, request_id: &'a str) -> Self {
        Self { actor, request_id }
    }

    pub fn mismatch(
        &self,
        field: impl Into<String>,
        expected: impl Debug,
        observed: impl Debug,
    ) -> Error {
        Error::Mismatch {
            actor: self.actor.to_string(),
            request_id: self.request_id.to_string(),
            field: field.into(),
            expected: format!("{expected:?}"),
            observed: format!("{observed:?}"),
        }
    }

    pub fn ensure_eq<T: PartialEq + Debug + ?Sized>(
        &self,
        field: impl Into<String>,
        expected: &T,
        observed: &T,
    ) -> Result<(), Error> {
        if expected == observed {
            return Ok(());
        }
        Err(self.mismatch(field, expected, observed))
    }
}
