//! Human-scannable id generation for lineages and namespaces.

use rand::Rng;

/// Generates short, prefixed, random ids.
///
/// Checkpoint ids are UUIDs; these ids are for the human-facing addressing
/// layer (lineages, namespaces) when callers do not supply their own.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdGenerator;

impl IdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn random_suffix(self) -> String {
        const ALPHABET: &[u8] = b"0123456789abcdef";
        let mut rng = rand::rng();
        (0..8)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
            .collect()
    }

    /// Generate a lineage id, e.g. `lineage-3fa94c1e`.
    #[must_use]
    pub fn generate_lineage_id(self) -> String {
        format!("lineage-{}", self.random_suffix())
    }

    /// Generate a namespace, e.g. `ns-9b02d4a7`.
    #[must_use]
    pub fn generate_namespace(self) -> String {
        format!("ns-{}", self.random_suffix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_prefix_and_length() {
        let id = IdGenerator::new().generate_lineage_id();
        assert!(id.starts_with("lineage-"));
        assert_eq!(id.len(), "lineage-".len() + 8);
    }

    #[test]
    fn ids_are_not_constant() {
        let generator = IdGenerator::new();
        let a = generator.generate_namespace();
        let b = generator.generate_namespace();
        // Collisions are possible but vanishingly unlikely for 8 hex chars.
        assert!(a.starts_with("ns-") && b.starts_with("ns-"));
    }
}
