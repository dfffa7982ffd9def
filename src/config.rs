/// What [`crate::Heap::release`] does with free neighbours of the released block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Coalesce {
    /// Merge with the right neighbour if it is free, otherwise with the left one.
    /// A block freed between two free blocks only absorbs the right one, leaving
    /// two adjacent free blocks behind.
    OneSide,
    /// Merge with every free neighbour. No two adjacent blocks are ever free.
    #[default]
    BothSides,
}

/// Tunables of a [`crate::Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    pub coalesce: Coalesce,
    /// Check range, alignment, magic and state of every released pointer.
    pub validate: bool,
}

impl HeapConfig {
    pub const DEFAULT: Self = Self {
        coalesce: Coalesce::BothSides,
        validate: true,
    };

    pub const fn with_coalesce(mut self, coalesce: Coalesce) -> Self {
        self.coalesce = coalesce;
        self
    }

    pub const fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_full_and_validated() {
        let config = HeapConfig::default();

        assert_eq!(config, HeapConfig::DEFAULT);
        assert_eq!(config.coalesce, Coalesce::BothSides);
        assert!(config.validate);
    }

    #[test]
    fn builders_override_fields() {
        let config = HeapConfig::DEFAULT
            .with_coalesce(Coalesce::OneSide)
            .with_validation(false);

        assert_eq!(config.coalesce, Coalesce::OneSide);
        assert!(!config.validate);
    }
}
