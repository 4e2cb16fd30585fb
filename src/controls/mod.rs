//! Typed request and response controls.

pub mod paged;
pub mod psearch;
pub mod sort;
pub mod sync;
pub mod vlv;

pub use paged::PagedResultsControl;
pub use psearch::{ChangeType, EntryChangeNotificationControl, PersistentSearchControl};
pub use sort::{SortKey, SortRequestControl, SortResponseControl};
pub use sync::{SyncDoneControl, SyncInfo, SyncMode, SyncRequestControl, SyncState, SyncStateControl};
pub use vlv::{VlvRequestControl, VlvResponseControl, VlvTarget};

use crate::error::{Error, Result};
use crate::protocol::{find_control, Control};

/// A control the client attaches to a request.
pub trait RequestControl {
    const OID: &'static str;

    fn critical(&self) -> bool;

    fn encode_value(&self) -> Option<Vec<u8>>;

    fn to_control(&self) -> Control {
        Control::new(Self::OID, self.critical(), self.encode_value())
    }
}

/// A control the server returns on an entry or a result.
pub trait ResponseControl: Sized {
    const OID: &'static str;

    fn decode_value(value: &[u8]) -> Result<Self>;

    /// Decode the first control with this OID, if present.
    fn find(controls: &[Control]) -> Result<Option<Self>> {
        match find_control(controls, Self::OID) {
            Some(control) => {
                let value = control
                    .value
                    .as_deref()
                    .ok_or_else(|| Error::decode(format!("control {} has no value", Self::OID)))?;
                Self::decode_value(value).map(Some)
            }
            None => Ok(None),
        }
    }
}
