//! Opaque inbound credential.

/// Bearer credential as presented by the caller.
///
/// Opaque to the pipeline: no structure is assumed, nothing is decoded.
/// `Debug` redacts the secret so request logging cannot leak it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl core::fmt::Debug for Credential {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_prints_the_secret() {
        let c = Credential::new("super-secret");
        assert!(!format!("{c:?}").contains("super-secret"));
    }
}
