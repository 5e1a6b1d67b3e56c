use anyhow::{ensure, Result};
use tokio_util::sync::CancellationToken;

use crate::unphased::Error;

/// Fails with [`Error::Cancelled`] once `cancel` has been triggered.
///
/// Called between elements of long loops. Whatever the loop already did stays in the working
/// copy of the state, which the driver discards.
#[inline]
pub fn check(cancel: &CancellationToken) -> Result<()> {
    ensure!(!cancel.is_cancelled(), Error::Cancelled);
    Ok(())
}
