use types::phase0::primitives::Gwei;

/// Per-validator balance changes computed during epoch processing.
pub trait EpochDeltas: Copy {
    /// Pairs of reward and penalty in the order they are applied.
    ///
    /// Penalties saturate at zero, so applying the pairs one at a time can give a different
    /// balance than applying their sums.
    fn components(self) -> impl IntoIterator<Item = (Gwei, Gwei)>;
}
