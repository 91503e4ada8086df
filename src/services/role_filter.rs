use crate::error::CatalogError;
use crate::models::{Catalog, QueryDefinition};

/// Catalog entries visible to `role`, in catalog order.
///
/// An empty catalog and a role with no visible entries are reported as
/// distinct errors so callers never have to interpret an empty list.
pub fn visible<'a>(catalog: &'a Catalog, role: &str) -> Result<Vec<&'a QueryDefinition>, CatalogError> {
    if catalog.is_empty() {
        return Err(CatalogError::Empty);
    }

    let entries: Vec<&QueryDefinition> = catalog
        .entries()
        .iter()
        .filter(|d| d.is_visible_to(role))
        .collect();

    if entries.is_empty() {
        tracing::debug!("No catalog entries visible to role '{}'", role);
        return Err(CatalogError::NoEntriesForRole(role.trim().to_string()));
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        Catalog::new(vec![
            QueryDefinition::relational("doctor only", "SELECT 1").with_roles(["doctor"]),
            QueryDefinition::relational("shared", "SELECT 1").with_roles(["all"]),
            QueryDefinition::relational("nurse and pharmacist", "SELECT 1")
                .with_roles(["nurse", "Pharmacist"]),
            QueryDefinition::relational("untagged", "SELECT 1"),
        ])
        .unwrap()
    }

    fn names(entries: Vec<&QueryDefinition>) -> Vec<&str> {
        entries.into_iter().map(|d| d.name()).collect()
    }

    #[test]
    fn test_role_sees_own_and_shared_entries() {
        let catalog = catalog();
        assert_eq!(
            names(visible(&catalog, "doctor").unwrap()),
            vec!["doctor only", "shared", "untagged"]
        );
        assert_eq!(
            names(visible(&catalog, "nurse").unwrap()),
            vec!["shared", "nurse and pharmacist", "untagged"]
        );
    }

    #[test]
    fn test_role_match_is_case_insensitive() {
        let catalog = catalog();
        assert_eq!(
            names(visible(&catalog, "PHARMACIST").unwrap()),
            vec!["shared", "nurse and pharmacist", "untagged"]
        );
    }

    #[test]
    fn test_all_role_is_catalog_wide_view() {
        let catalog = catalog();
        assert_eq!(visible(&catalog, "all").unwrap().len(), 4);
        assert_eq!(visible(&catalog, "All").unwrap().len(), 4);
    }

    #[test]
    fn test_membership_is_exact_for_every_entry_and_role() {
        let catalog = catalog();
        for role in ["doctor", "nurse", "pharmacist", "guardian", "manager"] {
            let seen = names(visible(&catalog, role).unwrap());
            for entry in catalog.entries() {
                let tagged = entry
                    .roles()
                    .iter()
                    .any(|r| r == "all" || r.eq_ignore_ascii_case(role));
                assert_eq!(seen.contains(&entry.name()), tagged, "{} / {}", entry.name(), role);
            }
        }
    }

    #[test]
    fn test_role_without_entries_is_explicit() {
        let catalog = Catalog::new(vec![
            QueryDefinition::relational("doctor only", "SELECT 1").with_roles(["doctor"]),
        ])
        .unwrap();
        assert_eq!(
            visible(&catalog, "nurse").unwrap_err(),
            CatalogError::NoEntriesForRole("nurse".to_string())
        );
    }

    #[test]
    fn test_empty_catalog_is_distinct() {
        let catalog = Catalog::default();
        assert_eq!(visible(&catalog, "doctor").unwrap_err(), CatalogError::Empty);
    }
}
