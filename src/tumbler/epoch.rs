// =============================================================================
// TUMBLEMIX v0.4 - Epochs
// =============================================================================
//
// An epoch is a tumbler lifecycle window indexed by the block height it
// was created at. Every epoch owns one RSA puzzle key and, on demand, one
// external receive address. Epochs overlap: a new one is created every
// EPOCH_RENEWAL blocks and expires EPOCH_DURATION blocks after its start,
// so in-flight sessions can keep referencing their key by height.
//
// =============================================================================

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{error, info};

use crate::puzzle::PuzzleKey;
use crate::tumbler::{Tumbler, TumblerError};
use crate::CONFIRMATION_INTERVAL;

/// One epoch window: a puzzle key valid for the window's duration and a
/// lazily allocated receive address, immutable once set.
pub struct Epoch {
    pub block_height: i32,
    puzzle_key: PuzzleKey,
    /// Receive address and its public key. The lock guards the lazy
    /// allocation so concurrent requests can't double-allocate.
    address: AsyncMutex<Option<(String, Vec<u8>)>>,
}

impl Epoch {
    fn new(block_height: i32, puzzle_key: PuzzleKey) -> Epoch {
        Epoch {
            block_height,
            puzzle_key,
            address: AsyncMutex::new(None),
        }
    }
}

impl Tumbler {
    /// Periodically creates new epochs so that consecutive windows
    /// overlap. Runs until shutdown.
    pub(crate) async fn epoch_creator(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), TumblerError> {
        let period = CONFIRMATION_INTERVAL * self.config().epoch_renewal as u32;
        info!("generating an epoch every {} seconds", period.as_secs());

        // Create one immediately.
        self.create_new_epoch().await?;

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                _ = ticker.tick() => {
                    if let Err(e) = self.create_new_epoch().await {
                        error!("failed to set up a new epoch: {}", e);
                    }
                }
            }
        }
    }

    async fn create_new_epoch(&self) -> Result<(), TumblerError> {
        let block_height = self
            .wallet()
            .current_block_height()
            .await
            .map_err(TumblerError::Wallet)?;
        if block_height > i32::MAX as u32 {
            return Err(TumblerError::Internal(format!(
                "block height is too large: {}",
                block_height
            )));
        }
        self.new_epoch(block_height as i32)?;
        info!("created new epoch at block height {}", block_height);
        Ok(())
    }

    /// Creates a new epoch interval starting at the specified block
    /// height. Heights must be strictly increasing; anything not newer
    /// than the latest epoch is rejected. Expired epochs are evicted on
    /// the way.
    pub fn new_epoch(&self, block_height: i32) -> Result<(), TumblerError> {
        // Don't grind out a key for a height that can't be accepted.
        {
            let epochs = self.epochs.read().unwrap();
            if let Some(last) = epochs.last() {
                if last.block_height >= block_height {
                    return Err(TumblerError::BadBlockHeight(block_height));
                }
            }
        }

        let puzzle_key = PuzzleKey::generate(self.config().puzzle_difficulty)?;
        let epoch = Arc::new(Epoch::new(block_height, puzzle_key));

        let mut epochs = self.epochs.write().unwrap();
        if let Some(last) = epochs.last() {
            if last.block_height >= block_height {
                return Err(TumblerError::BadBlockHeight(block_height));
            }
        }
        // Expire old epochs.
        let epoch_duration = self.config().epoch_duration;
        epochs.retain(|e| e.block_height + epoch_duration >= block_height);
        epochs.push(epoch);
        self.last_epoch.store(block_height, Ordering::SeqCst);
        Ok(())
    }

    /// Height of the most recent epoch.
    pub(crate) fn current_epoch(&self) -> Result<i32, TumblerError> {
        match self.last_epoch.load(Ordering::SeqCst) {
            0 => Err(TumblerError::NoCurrentEpoch),
            height => Ok(height),
        }
    }

    /// Puzzle key of the epoch at exactly `block_height`.
    pub(crate) fn puzzle_key(&self, block_height: i32) -> Result<PuzzleKey, TumblerError> {
        let epochs = self.epochs.read().unwrap();
        for e in epochs.iter() {
            if e.block_height == block_height {
                return Ok(e.puzzle_key.clone());
            }
        }
        Err(TumblerError::EpochNotFound)
    }

    /// Returns the epoch's receive address, allocating one from the
    /// wallet on first use. Epochs close to expiry refuse allocation so
    /// payments can't land on an address about to leave rotation.
    pub(crate) async fn epoch_address(
        &self,
        block_height: i32,
    ) -> Result<(String, Vec<u8>), TumblerError> {
        let epoch = {
            let epochs = self.epochs.read().unwrap();
            epochs
                .iter()
                .find(|e| e.block_height == block_height)
                .cloned()
        }
        .ok_or(TumblerError::EpochNotFound)?;

        let mut slot = epoch.address.lock().await;
        if let Some((addr, pubkey)) = slot.as_ref() {
            return Ok((addr.clone(), pubkey.clone()));
        }

        // Don't bother with epochs that are about to expire.
        let last = self.last_epoch.load(Ordering::SeqCst);
        if epoch.block_height + self.config().epoch_duration < last - 1 {
            return Err(TumblerError::EpochTooOld(block_height));
        }

        let (addr, pubkey) = self
            .wallet()
            .next_external_address()
            .await
            .map_err(TumblerError::Wallet)?;
        *slot = Some((addr.clone(), pubkey.clone()));
        Ok((addr, pubkey))
    }

    #[cfg(test)]
    pub(crate) fn epoch_count(&self) -> usize {
        self.epochs.read().unwrap().len()
    }
}
