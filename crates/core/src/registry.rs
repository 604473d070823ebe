//! Startup verification of the entity registry.
//!
//! The registry is a closed enum, so most mistakes are unrepresentable.
//! What the compiler cannot check is declaration consistency: duplicate
//! table names, or a kind whose own protected list collides with the common
//! set. Verified once at process startup, never per request.

use std::collections::HashSet;

use crate::entity::EntityKind;
use crate::error::CommandError;

/// Verify the entity registry declarations.
///
/// Call once during startup; a failure here is a build defect, not a
/// runtime condition.
pub fn verify() -> Result<(), CommandError> {
    let mut tables = HashSet::new();
    for kind in EntityKind::ALL {
        if !tables.insert(kind.table_name()) {
            return Err(CommandError::validation(format!(
                "duplicate table name '{}' in entity registry",
                kind.table_name()
            )));
        }

        let mut seen = HashSet::new();
        for field in kind.protected_fields() {
            if !seen.insert(field) {
                return Err(CommandError::validation(format!(
                    "duplicate protected field '{field}' on table '{}'",
                    kind.table_name()
                )));
            }
        }

        for required in ["id", "workspace_id", "created_at"] {
            if !seen.contains(required) {
                return Err(CommandError::validation(format!(
                    "table '{}' does not protect '{required}'",
                    kind.table_name()
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #[test]
    fn registry_verifies() {
        super::verify().unwrap();
    }
}
