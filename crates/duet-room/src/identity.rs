use duet_common::new_id;

/// Who this client is inside a room.
///
/// The id is generated once per client run and is never shown to users;
/// the display name is free-form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub participant_id: String,
    pub display_name: String,
}

impl Identity {
    pub fn new(participant_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            display_name: display_name.into(),
        }
    }

    /// Create an identity with a fresh random participant id.
    pub fn generate(display_name: &str) -> Self {
        Self::new(new_id(), display_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = Identity::generate("alice");
        let b = Identity::generate("alice");
        assert_eq!(a.display_name, "alice");
        assert_ne!(a.participant_id, b.participant_id);
    }
}
