//! Run identifier generation.

use uuid::Uuid;

/// Generates a new random run id (UUID v4).
#[must_use]
pub fn generate_run_id() -> Uuid {
    Uuid::new_v4()
}

/// Generates a time-ordered UUID v7, used for event ids.
#[must_use]
pub fn generate_uuid_v7() -> Uuid {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_is_v4() {
        assert_eq!(generate_run_id().get_version_num(), 4);
    }

    #[test]
    fn test_v7_ids_are_ordered() {
        let a = generate_uuid_v7();
        let b = generate_uuid_v7();
        assert_eq!(a.get_version_num(), 7);
        assert!(a <= b);
    }
}
