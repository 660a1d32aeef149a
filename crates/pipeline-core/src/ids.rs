//! Public identifiers: `<kind>_<ulid>`.

use ulid::Ulid;

fn new_public_id(prefix: &str) -> String {
    format!("{prefix}_{}", Ulid::new())
}

pub fn new_submission_public_id() -> String {
    new_public_id("sub")
}

pub fn new_candidate_public_id() -> String {
    new_public_id("cand")
}

pub fn new_assignment_public_id() -> String {
    new_public_id("asg")
}

pub fn new_export_public_id() -> String {
    new_public_id("exp")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_ids_carry_the_expected_prefix() {
        let id = new_submission_public_id();
        assert!(id.starts_with("sub_"));
        assert_eq!(id.len(), "sub_".len() + 26);
    }

    #[test]
    fn ids_are_not_reused() {
        assert_ne!(new_candidate_public_id(), new_candidate_public_id());
    }
}
