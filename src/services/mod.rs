pub mod backoff;
pub mod broadcaster;
pub mod cache;
pub mod devices;
pub mod fanout;
pub mod notifier;
pub mod payments;
pub mod push;
pub mod registry;
pub mod store;
pub mod sweep;

pub use broadcaster::{RealtimeBroadcaster, Subscriber};
pub use cache::CacheService;
pub use devices::DeviceRepository;
pub use fanout::{FanoutReport, NotificationFanoutService};
pub use notifier::{LifecycleNotifier, PaymentNotifier};
pub use payments::{PaymentService, ProviderOutcome};
pub use push::{DeliveryError, PushGateway, WebPushGateway};
pub use registry::TransactionRegistry;
pub use store::{InMemoryTransactionStore, TransactionStore};
pub use sweep::{CancellationSweep, SweepReport};
