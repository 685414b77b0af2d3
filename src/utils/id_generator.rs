use rand::Rng;
use uuid::Uuid;

/// Generates identifiers for runs and correlation tags.
///
/// Run ids are UUIDv4 strings; short tags are lowercase alphanumeric and
/// meant for human-scannable log correlation rather than uniqueness at
/// scale.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdGenerator;

impl IdGenerator {
    pub fn new() -> Self {
        Self
    }

    /// A fresh run id, unique per invocation.
    pub fn generate_run_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// A short random tag, e.g. for per-branch log scopes.
    pub fn generate_tag(&self, len: usize) -> String {
        const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
        let mut rng = rand::rng();
        (0..len)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
            .collect()
    }
}
