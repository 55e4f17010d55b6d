//! Idempotent administrative application (§4.2).

use tracing::{debug, warn};

use crate::error::MirrorResult;
use crate::postoffice::{AddressInfo, ApplyOutcome, DestroyQueueOptions, PostOffice, QueueConfig};

/// Applies address/queue administrative events idempotently.
///
/// Every operation here treats "already satisfied" as success: the source
/// owns lifecycle, and the mirror's job is to converge, not to report on
/// state the source has already moved past (§4.2, §7).
pub struct AdminApplier;

impl AdminApplier {
    pub fn new() -> Self {
        Self
    }

    pub fn add_address(&self, post_office: &dyn PostOffice, info: &AddressInfo) -> MirrorResult<()> {
        match post_office.add_address(info)? {
            ApplyOutcome::Applied => {}
            ApplyOutcome::AlreadySatisfied => debug!(address = %info.name, "address already present"),
        }
        Ok(())
    }

    pub fn delete_address(&self, post_office: &dyn PostOffice, info: &AddressInfo) -> MirrorResult<()> {
        match post_office.delete_address(info)? {
            ApplyOutcome::Applied => {}
            ApplyOutcome::AlreadySatisfied => {
                debug!(address = %info.name, "address already absent, treating delete as success");
            }
        }
        Ok(())
    }

    pub fn create_queue(&self, post_office: &dyn PostOffice, cfg: &QueueConfig) -> MirrorResult<()> {
        match post_office.create_queue(cfg)? {
            ApplyOutcome::Applied => {}
            ApplyOutcome::AlreadySatisfied => debug!(queue = %cfg.name, address = %cfg.address, "queue already exists"),
        }
        Ok(())
    }

    /// Destroys a queue with the fixed mirror-delete option set (§4.2):
    /// `remove_consumers=false, force=true, auto_delete_address=false,
    /// check_consumer_count=false`.
    pub fn delete_queue(&self, post_office: &dyn PostOffice, address: &str, queue: &str) -> MirrorResult<()> {
        match post_office.delete_queue(address, queue, DestroyQueueOptions::mirror_delete())? {
            ApplyOutcome::Applied => {}
            ApplyOutcome::AlreadySatisfied => {
                debug!(%address, %queue, "queue already absent, treating delete as success");
            }
        }
        Ok(())
    }
}

impl Default for AdminApplier {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs and swallows any administrative failure other than the idempotent
/// cases above — administrative events must not stall the stream (§4.2).
pub fn swallow_admin_failure(context: &str, err: &crate::error::MirrorError) {
    warn!(%context, error = %err, "administrative event failed, swallowing");
}
