pub mod device;
pub mod events;
pub mod notification;
pub mod response;
pub mod transaction;

pub use device::*;
pub use events::*;
pub use notification::*;
pub use response::*;
pub use transaction::*;
